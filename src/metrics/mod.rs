//! Metric strategies.
//!
//! A metric measures one behavioral property for every user of a cohort.
//! The set of metrics is closed: [`MetricKind`] names the catalogue and
//! [`Metric`] is the tagged union over the implemented leaves. Each leaf
//! implements [`UserMetric`] and owns its connection handle for as long as
//! it lives.
//!
//! ```rust,no_run
//! use usermetrics::{Cohort, Cutoff, Metric, MetricKind, ProcessOptions, TimeWindow, UserMetric};
//! # async fn run(ctx: &umstore_core::StoreContext) -> usermetrics::Result<()> {
//! let cohort = Cohort::new("enwiki", [101_i64, 102, 103]);
//! let options = ProcessOptions::default()
//!     .window(TimeWindow::new("2012-10-26T00:00:00", "2012-11-07T00:00:00")?)
//!     .cutoff(Cutoff::WindowEnd);
//!
//! let mut metric = Metric::open(MetricKind::Threshold, ctx, cohort.project()).await?;
//! for row in metric.process(&cohort, &options).await?.iter() {
//!     println!("{}", serde_json::to_string(row).unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bytes_added;
pub mod edit_count;
pub mod live_account;
pub mod threshold;
pub mod time_to_threshold;

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use umstore_core::{ConnectionHandle, StoreContext, Value};
use crate::cohort::{Cohort, UserId};
use crate::error::{MetricError, Result};
use crate::escape::{format_list, format_namespace, NamespaceFilter};
use crate::result::ResultRow;
use crate::templates::{QueryKey, TemplateStore};
use crate::timestamp::{normalize, TimeWindow, Timestamp};

pub use bytes_added::BytesAdded;
pub use edit_count::EditCount;
pub use live_account::LiveAccount;
pub use threshold::{activity_clause, Survival, Threshold};
pub use time_to_threshold::TimeToThreshold;

/// Every metric name the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Threshold,
    Survival,
    EditCount,
    BytesAdded,
    TimeToThreshold,
    RevertRate,
    Blocks,
    LiveAccount,
    NamespaceOfEdits,
    EditRate,
}

impl MetricKind {
    pub const ALL: [MetricKind; 10] = [
        MetricKind::Threshold,
        MetricKind::Survival,
        MetricKind::EditCount,
        MetricKind::BytesAdded,
        MetricKind::TimeToThreshold,
        MetricKind::RevertRate,
        MetricKind::Blocks,
        MetricKind::LiveAccount,
        MetricKind::NamespaceOfEdits,
        MetricKind::EditRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Threshold => "threshold",
            MetricKind::Survival => "survival",
            MetricKind::EditCount => "edit_count",
            MetricKind::BytesAdded => "bytes_added",
            MetricKind::TimeToThreshold => "time_to_threshold",
            MetricKind::RevertRate => "revert_rate",
            MetricKind::Blocks => "blocks",
            MetricKind::LiveAccount => "live_account",
            MetricKind::NamespaceOfEdits => "namespace_of_edits",
            MetricKind::EditRate => "edit_rate",
        }
    }

    /// Declared header of the metric; fails for metrics with no strategy.
    pub fn header(&self) -> Result<&'static [&'static str]> {
        match self {
            MetricKind::Threshold => Ok(threshold::THRESHOLD_HEADER),
            MetricKind::Survival => Ok(threshold::SURVIVAL_HEADER),
            MetricKind::EditCount => Ok(edit_count::EDIT_COUNT_HEADER),
            MetricKind::BytesAdded => Ok(bytes_added::BYTES_ADDED_HEADER),
            MetricKind::TimeToThreshold => Ok(time_to_threshold::TIME_TO_THRESHOLD_HEADER),
            MetricKind::LiveAccount => Ok(live_account::LIVE_ACCOUNT_HEADER),
            other => Err(MetricError::UnimplementedMetric(other.to_string())),
        }
    }

    pub fn is_implemented(&self) -> bool {
        self.header().is_ok()
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        MetricKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MetricError::UnknownMetric(s.to_string()))
    }
}

/// Reference point that splits "before" from "after" activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cutoff {
    /// Each user's registration time plus `hours`
    AfterRegistration { hours: i64 },
    /// The end of the options' time window
    WindowEnd,
}

impl Default for Cutoff {
    fn default() -> Self {
        Cutoff::AfterRegistration { hours: 24 }
    }
}

/// Options accepted by [`UserMetric::process`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Handles are numeric ids (`true`) or user names (`false`)
    pub is_id: bool,
    /// Count activity after the cutoff instead of up to it
    pub is_survival: bool,
    /// Also bound activity to the time window
    pub restrict: bool,
    pub cutoff: Cutoff,
    pub namespace: NamespaceFilter,
    pub window: Option<TimeWindow>,
    /// Activity count a user must reach
    pub n: i64,
    /// Index of the edit time-to-threshold starts from
    pub first_edit: i64,
    /// Index of the edit time-to-threshold ends at; `-1` is the last edit
    pub threshold_edit: i64,
    /// Minutes after registration within which a live account opens the editor
    pub active_minutes: i64,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            is_id: true,
            is_survival: false,
            restrict: false,
            cutoff: Cutoff::default(),
            namespace: NamespaceFilter::All,
            window: None,
            n: 1,
            first_edit: 0,
            threshold_edit: 1,
            active_minutes: 60,
        }
    }
}

impl ProcessOptions {
    pub fn is_id(mut self, is_id: bool) -> Self {
        self.is_id = is_id;
        self
    }

    pub fn survival(mut self, is_survival: bool) -> Self {
        self.is_survival = is_survival;
        self
    }

    pub fn restrict(mut self, restrict: bool) -> Self {
        self.restrict = restrict;
        self
    }

    pub fn cutoff(mut self, cutoff: Cutoff) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Cutoff `t` hours after registration.
    pub fn t(self, hours: i64) -> Self {
        self.cutoff(Cutoff::AfterRegistration { hours })
    }

    pub fn n(mut self, n: i64) -> Self {
        self.n = n;
        self
    }

    pub fn namespace(mut self, namespace: NamespaceFilter) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Edit indices time-to-threshold measures between.
    pub fn edits(mut self, first: i64, threshold: i64) -> Self {
        self.first_edit = first;
        self.threshold_edit = threshold;
        self
    }

    pub fn active_minutes(mut self, minutes: i64) -> Self {
        self.active_minutes = minutes;
        self
    }

    pub(crate) fn require_window(&self, option: &'static str) -> Result<&TimeWindow> {
        self.window.as_ref().ok_or(MetricError::MissingOption(option))
    }
}

/// The capability every metric strategy provides.
#[async_trait]
pub trait UserMetric: Send + Sync {
    fn kind(&self) -> MetricKind;

    /// Ordered field names of this metric's rows.
    fn header(&self) -> &'static [&'static str];

    /// The template this metric's per-user query is built from.
    fn query_key(&self) -> QueryKey;

    /// Computes the metric for `cohort`, replacing earlier results.
    ///
    /// On failure the previous results are left untouched.
    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self>
    where
        Self: Sized;

    fn results(&self) -> &[ResultRow];

    fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
        self.results().iter()
    }
}

/// State shared by every strategy: its handle, templates and last results.
pub struct MetricBase {
    handle: ConnectionHandle,
    templates: Arc<TemplateStore>,
    results: Vec<ResultRow>,
}

impl MetricBase {
    pub fn new(handle: ConnectionHandle, templates: Arc<TemplateStore>) -> Self {
        Self {
            handle,
            templates,
            results: Vec::new(),
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    fn replace_results(&mut self, results: Vec<ResultRow>) {
        self.results = results;
    }
}

/// Columns a handle is matched against in the logging and revision tables.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UserFields {
    pub log: &'static str,
    pub rev: &'static str,
}

impl UserFields {
    pub fn for_handles(is_id: bool) -> Self {
        if is_id {
            Self { log: "log_user", rev: "rev_user" }
        } else {
            Self { log: "log_user_text", rev: "rev_user_text" }
        }
    }
}

/// The value a handle is bound as and reported with.
pub(crate) fn handle_value(user: &UserId, is_id: bool) -> Value {
    if is_id {
        user.to_value()
    } else {
        Value::Text(user.to_string())
    }
}

/// Integer column value; NULL reads as zero.
pub(crate) fn integer(value: &Value, column: &str) -> Result<i64> {
    match value {
        Value::Null => Ok(0),
        other => other.as_i64().ok_or_else(|| MetricError::UnexpectedValue {
            column: column.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Timestamp column value in any representation [`normalize`] accepts.
pub(crate) fn timestamp(value: &Value, column: &str) -> Result<Timestamp> {
    let text = value.as_str().ok_or_else(|| MetricError::UnexpectedValue {
        column: column.to_string(),
        value: value.to_string(),
    })?;
    normalize(text)
}

/// The `uid_str` slot for `cohort` plus any parameters it binds.
///
/// Numeric ids are inlined through [`format_list`]; names are bound, one
/// placeholder per user, so they reach the store unaltered.
pub(crate) fn cohort_in_list(cohort: &Cohort, is_id: bool) -> Result<(String, Vec<Value>)> {
    if cohort.is_empty() {
        return Err(MetricError::EmptyCohort);
    }
    if is_id {
        let ids = cohort
            .iter()
            .map(|user| {
                user.as_id().ok_or_else(|| MetricError::UnexpectedValue {
                    column: "user_id".to_string(),
                    value: user.to_string(),
                })
            })
            .collect::<Result<Vec<i64>>>()?;
        Ok((format_list(&ids, false), Vec::new()))
    } else {
        let placeholders = vec!["?"; cohort.len()].join(",");
        let names = cohort.iter().map(|user| handle_value(user, false)).collect();
        Ok((placeholders, names))
    }
}

/// The `ns` slot: the namespace clause followed by `AND`, or nothing.
pub(crate) fn namespace_slot(filter: &NamespaceFilter) -> Result<String> {
    let mut filter = filter.clone();
    let clause = format_namespace(&mut filter)?;
    if clause.is_empty() {
        Ok(clause)
    } else {
        Ok(format!("{} AND", clause))
    }
}

/// Tagged union over the implemented strategies.
pub enum Metric {
    Threshold(Threshold),
    Survival(Survival),
    EditCount(EditCount),
    BytesAdded(BytesAdded),
    TimeToThreshold(TimeToThreshold),
    LiveAccount(LiveAccount),
}

impl Metric {
    /// Builds the strategy for `kind` around `handle`.
    pub fn new(kind: MetricKind, handle: ConnectionHandle) -> Result<Self> {
        Self::with_templates(kind, handle, Arc::new(TemplateStore::default()))
    }

    pub fn with_templates(
        kind: MetricKind,
        handle: ConnectionHandle,
        templates: Arc<TemplateStore>,
    ) -> Result<Self> {
        let base = MetricBase::new(handle, templates);
        match kind {
            MetricKind::Threshold => Ok(Metric::Threshold(Threshold::from_base(base))),
            MetricKind::Survival => Ok(Metric::Survival(Survival::from_base(base))),
            MetricKind::EditCount => Ok(Metric::EditCount(EditCount::from_base(base))),
            MetricKind::BytesAdded => Ok(Metric::BytesAdded(BytesAdded::from_base(base))),
            MetricKind::TimeToThreshold => Ok(Metric::TimeToThreshold(TimeToThreshold::from_base(base))),
            MetricKind::LiveAccount => Ok(Metric::LiveAccount(LiveAccount::from_base(base))),
            other => Err(MetricError::UnimplementedMetric(other.to_string())),
        }
    }

    /// Builds the strategy with its own read-only handle on the instance
    /// serving `project`.
    pub async fn open(kind: MetricKind, context: &StoreContext, project: &str) -> Result<Self> {
        kind.header()?;
        let instance = context.instance_for(project);
        debug!(metric = %kind, instance, "opening metric handle");
        let handle = context.reader(instance).await?;
        Self::new(kind, handle)
    }
}

#[async_trait]
impl UserMetric for Metric {
    fn kind(&self) -> MetricKind {
        match self {
            Metric::Threshold(m) => m.kind(),
            Metric::Survival(m) => m.kind(),
            Metric::EditCount(m) => m.kind(),
            Metric::BytesAdded(m) => m.kind(),
            Metric::TimeToThreshold(m) => m.kind(),
            Metric::LiveAccount(m) => m.kind(),
        }
    }

    fn header(&self) -> &'static [&'static str] {
        match self {
            Metric::Threshold(m) => m.header(),
            Metric::Survival(m) => m.header(),
            Metric::EditCount(m) => m.header(),
            Metric::BytesAdded(m) => m.header(),
            Metric::TimeToThreshold(m) => m.header(),
            Metric::LiveAccount(m) => m.header(),
        }
    }

    fn query_key(&self) -> QueryKey {
        match self {
            Metric::Threshold(m) => m.query_key(),
            Metric::Survival(m) => m.query_key(),
            Metric::EditCount(m) => m.query_key(),
            Metric::BytesAdded(m) => m.query_key(),
            Metric::TimeToThreshold(m) => m.query_key(),
            Metric::LiveAccount(m) => m.query_key(),
        }
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        match self {
            Metric::Threshold(m) => {
                m.process(cohort, options).await?;
            }
            Metric::Survival(m) => {
                m.process(cohort, options).await?;
            }
            Metric::EditCount(m) => {
                m.process(cohort, options).await?;
            }
            Metric::BytesAdded(m) => {
                m.process(cohort, options).await?;
            }
            Metric::TimeToThreshold(m) => {
                m.process(cohort, options).await?;
            }
            Metric::LiveAccount(m) => {
                m.process(cohort, options).await?;
            }
        }
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        match self {
            Metric::Threshold(m) => m.results(),
            Metric::Survival(m) => m.results(),
            Metric::EditCount(m) => m.results(),
            Metric::BytesAdded(m) => m.results(),
            Metric::TimeToThreshold(m) => m.results(),
            Metric::LiveAccount(m) => m.results(),
        }
    }
}

impl<'a> IntoIterator for &'a Metric {
    type Item = &'a ResultRow;
    type IntoIter = std::slice::Iter<'a, ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.results().iter()
    }
}
