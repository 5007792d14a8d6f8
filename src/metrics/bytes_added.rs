//! Bytes contributed per user over a time window.
//!
//! Every revision is compared with its parent; a revision without a parent
//! counts its full length as added.

use std::collections::HashMap;
use async_trait::async_trait;
use tracing::info;
use umstore_core::Value;
use super::{
    cohort_in_list, handle_value, integer, namespace_slot, MetricBase, MetricKind,
    ProcessOptions, UserFields, UserMetric,
};
use crate::cohort::{Cohort, UserId};
use crate::error::Result;
use crate::escape::escape_identifier;
use crate::result::ResultRow;
use crate::templates::{QueryKey, Slots};

pub const BYTES_ADDED_HEADER: &[&str] = &[
    "user_id",
    "bytes_added_net",
    "bytes_added_absolute",
    "bytes_added_pos",
    "bytes_added_neg",
    "edit_count",
];

const REVISION_HEADER: &[&str] = &["user", "rev_len", "parent_len"];

/// Running byte totals for one user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    net: i64,
    absolute: i64,
    positive: i64,
    negative: i64,
    edits: i64,
}

impl Tally {
    fn add(&mut self, diff: i64) {
        self.net += diff;
        self.absolute += diff.abs();
        if diff > 0 {
            self.positive += diff;
        } else {
            self.negative += diff;
        }
        self.edits += 1;
    }

    fn into_values(self, handle: Value) -> Vec<Value> {
        vec![
            handle,
            Value::Int(self.net),
            Value::Int(self.absolute),
            Value::Int(self.positive),
            Value::Int(self.negative),
            Value::Int(self.edits),
        ]
    }
}

pub struct BytesAdded {
    base: MetricBase,
}

impl BytesAdded {
    pub fn from_base(base: MetricBase) -> Self {
        Self { base }
    }

    async fn compute(&self, cohort: &Cohort, options: &ProcessOptions) -> Result<Vec<ResultRow>> {
        let window = options.require_window("window")?;
        let project = escape_identifier(cohort.project())?;
        let fields = UserFields::for_handles(options.is_id);
        let (uid_str, mut params) = cohort_in_list(cohort, options.is_id)?;
        params.push(Value::Text(window.start().to_string()));
        params.push(Value::Text(window.end().to_string()));

        let sql = self.base.templates().render(
            QueryKey::BytesAdded,
            &Slots::new()
                .set("project", project.as_str())
                .set("ns", namespace_slot(&options.namespace)?)
                .set("user_field", fields.rev)
                .set("uid_str", uid_str),
        )?;

        let mut tallies: HashMap<String, Tally> = HashMap::new();
        for row in self.base.handle().query(&sql, &params).await? {
            let row = ResultRow::new(REVISION_HEADER, row)?;
            let values = row.values();
            let user = UserId::from_value(&values[0], fields.rev)?;
            let diff = integer(&values[1], "rev_len")? - integer(&values[2], "parent_len")?;
            tallies.entry(user.to_string()).or_default().add(diff);
        }

        cohort
            .iter()
            .map(|user| {
                let tally = tallies.get(&user.to_string()).copied().unwrap_or_default();
                ResultRow::new(BYTES_ADDED_HEADER, tally.into_values(handle_value(user, options.is_id)))
            })
            .collect()
    }
}

#[async_trait]
impl UserMetric for BytesAdded {
    fn kind(&self) -> MetricKind {
        MetricKind::BytesAdded
    }

    fn header(&self) -> &'static [&'static str] {
        BYTES_ADDED_HEADER
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::BytesAdded
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        let rows = self.compute(cohort, options).await?;
        info!(metric = "bytes_added", project = cohort.project(), users = rows.len(), "processed cohort");
        self.base.replace_results(rows);
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        &self.base.results
    }
}
