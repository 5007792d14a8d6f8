//! Minutes a user took to get from one edit to another.
//!
//! Edits are indexed from zero in time order; `-1` names the last edit. A
//! user short of either edit gets `-1`.

use std::collections::HashMap;
use async_trait::async_trait;
use tracing::{debug, info};
use umstore_core::Value;
use super::{
    cohort_in_list, handle_value, namespace_slot, timestamp, MetricBase, MetricKind,
    ProcessOptions, UserFields, UserMetric,
};
use crate::cohort::{Cohort, UserId};
use crate::error::Result;
use crate::escape::escape_identifier;
use crate::result::ResultRow;
use crate::templates::{QueryKey, Slots};
use crate::timestamp::Timestamp;

pub const TIME_TO_THRESHOLD_HEADER: &[&str] = &["user_id", "minutes_diff"];

const LAST_EDIT: i64 = -1;
const REVISION_HEADER: &[&str] = &["user", "rev_timestamp"];

fn edit_at(edits: &[Timestamp], index: i64) -> Option<&Timestamp> {
    if index == LAST_EDIT {
        edits.last()
    } else {
        usize::try_from(index).ok().and_then(|i| edits.get(i))
    }
}

/// Minutes between edit `first` and edit `threshold`, or `-1`.
fn minutes_between(edits: &[Timestamp], first: i64, threshold: i64) -> Result<i64> {
    match (edit_at(edits, first), edit_at(edits, threshold)) {
        (Some(start), Some(end)) => Ok((end.to_datetime()? - start.to_datetime()?).num_minutes()),
        _ => Ok(-1),
    }
}

pub struct TimeToThreshold {
    base: MetricBase,
}

impl TimeToThreshold {
    pub fn from_base(base: MetricBase) -> Self {
        Self { base }
    }

    async fn compute(&self, cohort: &Cohort, options: &ProcessOptions) -> Result<Vec<ResultRow>> {
        let project = escape_identifier(cohort.project())?;
        let fields = UserFields::for_handles(options.is_id);
        let (uid_str, params) = cohort_in_list(cohort, options.is_id)?;

        let sql = self.base.templates().render(
            QueryKey::RevisionTimes,
            &Slots::new()
                .set("project", project.as_str())
                .set("ns", namespace_slot(&options.namespace)?)
                .set("user_field", fields.rev)
                .set("uid_str", uid_str),
        )?;

        let mut edits: HashMap<String, Vec<Timestamp>> = HashMap::new();
        for row in self.base.handle().query(&sql, &params).await? {
            let row = ResultRow::new(REVISION_HEADER, row)?;
            let values = row.values();
            let user = UserId::from_value(&values[0], fields.rev)?;
            edits
                .entry(user.to_string())
                .or_default()
                .push(timestamp(&values[1], "rev_timestamp")?);
        }

        cohort
            .iter()
            .map(|user| {
                let history = edits.get(&user.to_string()).map(Vec::as_slice).unwrap_or_default();
                let minutes = minutes_between(history, options.first_edit, options.threshold_edit)?;
                debug!(user = %user, edits = history.len(), minutes, "time to threshold");
                ResultRow::new(
                    TIME_TO_THRESHOLD_HEADER,
                    vec![handle_value(user, options.is_id), Value::Int(minutes)],
                )
            })
            .collect()
    }
}

#[async_trait]
impl UserMetric for TimeToThreshold {
    fn kind(&self) -> MetricKind {
        MetricKind::TimeToThreshold
    }

    fn header(&self) -> &'static [&'static str] {
        TIME_TO_THRESHOLD_HEADER
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::RevisionTimes
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        let rows = self.compute(cohort, options).await?;
        info!(metric = "time_to_threshold", project = cohort.project(), users = rows.len(), "processed cohort");
        self.base.replace_results(rows);
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        &self.base.results
    }
}
