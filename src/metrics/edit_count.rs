//! Revision count and bytes added per user over a time window.

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

pub const EDIT_COUNT_HEADER: &[&str] = &["user_id", "edit_count", "bytes_added"];

/// Issues one grouped query per cohort. Users without revisions in the
/// window are reported with zero counts.
pub struct EditCount {
    base: MetricBase,
}

impl EditCount {
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
            QueryKey::EditCount,
            &Slots::new()
                .set("project", project.as_str())
                .set("ns", namespace_slot(&options.namespace)?)
                .set("user_field", fields.rev)
                .set("uid_str", uid_str),
        )?;

        let mut totals: HashMap<String, (i64, i64)> = HashMap::new();
        for row in self.base.handle().query(&sql, &params).await? {
            let row = ResultRow::new(EDIT_COUNT_HEADER, row)?;
            let values = row.values();
            let user = UserId::from_value(&values[0], fields.rev)?;
            let count = integer(&values[1], "edit_count")?;
            let bytes = integer(&values[2], "bytes_added")?;
            totals.insert(user.to_string(), (count, bytes));
        }

        cohort
            .iter()
            .map(|user| {
                let (count, bytes) = totals.get(&user.to_string()).copied().unwrap_or((0, 0));
                ResultRow::new(
                    EDIT_COUNT_HEADER,
                    vec![handle_value(user, options.is_id), Value::Int(count), Value::Int(bytes)],
                )
            })
            .collect()
    }
}

#[async_trait]
impl UserMetric for EditCount {
    fn kind(&self) -> MetricKind {
        MetricKind::EditCount
    }

    fn header(&self) -> &'static [&'static str] {
        EDIT_COUNT_HEADER
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::EditCount
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        let rows = self.compute(cohort, options).await?;
        info!(metric = "edit_count", project = cohort.project(), users = rows.len(), "processed cohort");
        self.base.replace_results(rows);
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        &self.base.results
    }
}
