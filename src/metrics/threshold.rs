//! Threshold and survival metrics.
//!
//! Both look up each user's registration, then count the user's revisions on
//! one side of a cutoff. Threshold counts activity up to the cutoff, survival
//! counts activity after it. A user passes when the count reaches `n`.

use std::collections::HashMap;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use umstore_core::Value;
use super::{
    cohort_in_list, handle_value, integer, namespace_slot, timestamp, Cutoff, MetricBase,
    MetricKind, ProcessOptions, UserFields, UserMetric,
};
use crate::cohort::{Cohort, UserId};
use crate::error::{MetricError, Result};
use crate::escape::escape_identifier;
use crate::result::ResultRow;
use crate::templates::{QueryKey, Slots};
use crate::timestamp::{TimeWindow, Timestamp};

pub const THRESHOLD_HEADER: &[&str] = &["user_id", "has_reached_threshold"];
pub const SURVIVAL_HEADER: &[&str] = &["user_id", "is_alive"];

const REGISTRATION_HEADER: &[&str] = &["log_user", "log_user_text", "log_timestamp"];
const ACTIVITY_HEADER: &[&str] = &["revs"];

/// The timestamp condition of the activity query.
///
/// Survival counts revisions strictly after the cutoff, threshold counts
/// revisions at or before it. With `restrict`, the window bounds are ANDed on
/// after the directional condition. Bind order: cutoff, then window start and
/// end.
pub fn activity_clause(is_survival: bool, restrict: bool) -> String {
    let op = if is_survival { ">" } else { "<=" };
    let mut clause = format!("rev_timestamp {} ?", op);
    if restrict {
        clause.push_str(" AND rev_timestamp > ? AND rev_timestamp <= ?");
    }
    clause
}

pub struct Threshold {
    base: MetricBase,
}

impl Threshold {
    pub fn from_base(base: MetricBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl UserMetric for Threshold {
    fn kind(&self) -> MetricKind {
        MetricKind::Threshold
    }

    fn header(&self) -> &'static [&'static str] {
        THRESHOLD_HEADER
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::ActivityCount
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        let rows = threshold_rows(&self.base, THRESHOLD_HEADER, cohort, options).await?;
        info!(metric = "threshold", project = cohort.project(), users = cohort.len(), rows = rows.len(), "processed cohort");
        self.base.replace_results(rows);
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        &self.base.results
    }
}

/// Threshold with `is_survival` always set.
pub struct Survival {
    base: MetricBase,
}

impl Survival {
    pub fn from_base(base: MetricBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl UserMetric for Survival {
    fn kind(&self) -> MetricKind {
        MetricKind::Survival
    }

    fn header(&self) -> &'static [&'static str] {
        SURVIVAL_HEADER
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::ActivityCount
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        let options = options.clone().survival(true);
        let rows = threshold_rows(&self.base, SURVIVAL_HEADER, cohort, &options).await?;
        info!(metric = "survival", project = cohort.project(), users = cohort.len(), rows = rows.len(), "processed cohort");
        self.base.replace_results(rows);
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        &self.base.results
    }
}

/// The window `options` must carry, if its cutoff or restriction needs one.
fn needed_window(options: &ProcessOptions) -> Result<Option<&TimeWindow>> {
    if options.restrict {
        options.require_window("restrict").map(Some)
    } else if options.cutoff == Cutoff::WindowEnd {
        options.require_window("window").map(Some)
    } else {
        Ok(None)
    }
}

fn cutoff_for(options: &ProcessOptions, registered: &Timestamp, window: Option<&TimeWindow>) -> Result<Timestamp> {
    match (options.cutoff, window) {
        (Cutoff::AfterRegistration { hours }, _) => registered.plus_hours(hours),
        (Cutoff::WindowEnd, Some(window)) => Ok(window.end().clone()),
        (Cutoff::WindowEnd, None) => Err(MetricError::MissingOption("window")),
    }
}

/// Registration time of every registered cohort member, keyed by handle text.
async fn registrations(
    base: &MetricBase,
    cohort: &Cohort,
    project: &str,
    fields: UserFields,
    is_id: bool,
) -> Result<HashMap<String, Timestamp>> {
    let (uid_str, params) = cohort_in_list(cohort, is_id)?;
    let sql = base.templates().render(
        QueryKey::RegistrationLookup,
        &Slots::new()
            .set("project", project)
            .set("user_field", fields.log)
            .set("uid_str", uid_str),
    )?;

    let mut registered = HashMap::new();
    for row in base.handle().query(&sql, &params).await? {
        let row = ResultRow::new(REGISTRATION_HEADER, row)?;
        let values = row.values();
        let (handle_column, handle) = if is_id {
            ("log_user", &values[0])
        } else {
            ("log_user_text", &values[1])
        };
        let user = UserId::from_value(handle, handle_column)?;
        registered.insert(user.to_string(), timestamp(&values[2], "log_timestamp")?);
    }
    Ok(registered)
}

/// Computes one `[user_id, passed]` row per registered cohort member.
///
/// Nothing is returned unless every query succeeds.
async fn threshold_rows(
    base: &MetricBase,
    header: &'static [&'static str],
    cohort: &Cohort,
    options: &ProcessOptions,
) -> Result<Vec<ResultRow>> {
    if cohort.is_empty() {
        return Err(MetricError::EmptyCohort);
    }
    let project = escape_identifier(cohort.project())?;
    let fields = UserFields::for_handles(options.is_id);
    let ns = namespace_slot(&options.namespace)?;
    let window = needed_window(options)?;

    let registered = registrations(base, cohort, &project, fields, options.is_id).await?;

    let ts_clause = format!("AND {}", activity_clause(options.is_survival, options.restrict));
    let sql = base.templates().render(
        QueryKey::ActivityCount,
        &Slots::new()
            .set("project", project.as_str())
            .set("ns", ns)
            .set("user_field", fields.rev)
            .set("ts_clause", ts_clause),
    )?;

    let mut rows = Vec::with_capacity(cohort.len());
    for user in cohort {
        let Some(registered_at) = registered.get(&user.to_string()) else {
            warn!(user = %user, project = cohort.project(), "no registration record, skipping user");
            continue;
        };
        let cutoff = cutoff_for(options, registered_at, window)?;
        let handle = handle_value(user, options.is_id);

        let mut params = vec![handle.clone(), Value::Text(cutoff.to_string())];
        if options.restrict {
            if let Some(window) = window {
                params.push(Value::Text(window.start().to_string()));
                params.push(Value::Text(window.end().to_string()));
            }
        }

        let count = activity_count(base.handle().query(&sql, &params).await?)?;
        debug!(user = %user, cutoff = %cutoff, count, "counted activity");
        rows.push(ResultRow::new(header, vec![handle, Value::Bool(count >= options.n)])?);
    }
    Ok(rows)
}

/// Decodes the single `revs` row of the activity query.
fn activity_count(rows: Vec<Vec<Value>>) -> Result<i64> {
    let row = rows.into_iter().next().ok_or_else(|| MetricError::UnexpectedValue {
        column: "revs".to_string(),
        value: "no rows".to_string(),
    })?;
    let row = ResultRow::new(ACTIVITY_HEADER, row)?;
    integer(&row.values()[0], "revs")
}
