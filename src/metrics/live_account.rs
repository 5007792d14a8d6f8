//! Whether a new account opened the editor soon after registering.
//!
//! An account is live when its first click on an edit page falls within
//! `active_minutes` of its registration. Users with no click, or no click on
//! a page in the namespace filter, are not live.

use std::collections::HashMap;
use async_trait::async_trait;
use tracing::info;
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

pub const LIVE_ACCOUNT_HEADER: &[&str] = &["user_id", "is_active_account"];

const CLICK_HEADER: &[&str] = &["user", "log_timestamp", "first_click"];

fn is_live(registered: &Timestamp, first_click: &Timestamp, active_minutes: i64) -> Result<bool> {
    let elapsed = first_click.to_datetime()? - registered.to_datetime()?;
    Ok(elapsed.num_seconds() <= active_minutes * 60)
}

pub struct LiveAccount {
    base: MetricBase,
}

impl LiveAccount {
    pub fn from_base(base: MetricBase) -> Self {
        Self { base }
    }

    async fn compute(&self, cohort: &Cohort, options: &ProcessOptions) -> Result<Vec<ResultRow>> {
        let project = escape_identifier(cohort.project())?;
        let fields = UserFields::for_handles(options.is_id);
        let (uid_str, params) = cohort_in_list(cohort, options.is_id)?;

        let sql = self.base.templates().render(
            QueryKey::FirstEditClick,
            &Slots::new()
                .set("project", project.as_str())
                .set("ns", namespace_slot(&options.namespace)?)
                .set("user_field", fields.log)
                .set("uid_str", uid_str),
        )?;

        let mut live: HashMap<String, bool> = HashMap::new();
        for row in self.base.handle().query(&sql, &params).await? {
            let row = ResultRow::new(CLICK_HEADER, row)?;
            let values = row.values();
            let user = UserId::from_value(&values[0], fields.log)?;
            if values[2].is_null() {
                continue;
            }
            let registered = timestamp(&values[1], "log_timestamp")?;
            let first_click = timestamp(&values[2], "first_click")?;
            live.insert(user.to_string(), is_live(&registered, &first_click, options.active_minutes)?);
        }

        cohort
            .iter()
            .map(|user| {
                let is_live = live.get(&user.to_string()).copied().unwrap_or(false);
                ResultRow::new(
                    LIVE_ACCOUNT_HEADER,
                    vec![handle_value(user, options.is_id), Value::Bool(is_live)],
                )
            })
            .collect()
    }
}

#[async_trait]
impl UserMetric for LiveAccount {
    fn kind(&self) -> MetricKind {
        MetricKind::LiveAccount
    }

    fn header(&self) -> &'static [&'static str] {
        LIVE_ACCOUNT_HEADER
    }

    fn query_key(&self) -> QueryKey {
        QueryKey::FirstEditClick
    }

    async fn process(&mut self, cohort: &Cohort, options: &ProcessOptions) -> Result<&mut Self> {
        let rows = self.compute(cohort, options).await?;
        info!(metric = "live_account", project = cohort.project(), users = rows.len(), "processed cohort");
        self.base.replace_results(rows);
        Ok(self)
    }

    fn results(&self) -> &[ResultRow] {
        &self.base.results
    }
}
