//! Cohort resolution and cohort bookkeeping.
//!
//! [`CohortResolver`] builds cohorts from the registration and revision
//! tables, streams users registered in a window, and records cohorts in the
//! bookkeeping tables. Reads go through the shared read-only handle where the
//! routing allows it; writes always use a dedicated handle.

use std::sync::Arc;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use umstore_core::config::CohortStoreConfig;
use umstore_core::{ConnectionHandle, StoreContext, Value};
use crate::cohort::{Cohort, UserId};
use crate::error::{MetricError, Result};
use crate::escape::{escape_identifier, escape_qualified};
use crate::templates::{QueryKey, Slots, TemplateStore};
use crate::timestamp::{normalize, TimeWindow, TimestampRepr};

/// Where `users_between` reads registrations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserQuerySource {
    /// Account-creation entries of the logging table
    #[default]
    Logging,
    /// `user_registration` of the user table
    Registration,
}

impl UserQuerySource {
    fn query_key(&self) -> QueryKey {
        match self {
            UserQuerySource::Logging => QueryKey::UsersFromLog,
            UserQuerySource::Registration => QueryKey::UsersFromRegistration,
        }
    }

    fn user_column(&self) -> &'static str {
        match self {
            UserQuerySource::Logging => "log_user",
            UserQuerySource::Registration => "user_id",
        }
    }
}

pub struct CohortResolver {
    context: Arc<StoreContext>,
    templates: Arc<TemplateStore>,
    source: UserQuerySource,
    bookkeeping: CohortStoreConfig,
}

impl CohortResolver {
    pub fn new(context: Arc<StoreContext>, source: UserQuerySource) -> Self {
        Self {
            context,
            templates: Arc::new(TemplateStore::default()),
            source,
            bookkeeping: CohortStoreConfig::default(),
        }
    }

    pub fn with_bookkeeping(mut self, bookkeeping: CohortStoreConfig) -> Self {
        self.bookkeeping = bookkeeping;
        self
    }

    pub fn with_templates(mut self, templates: Arc<TemplateStore>) -> Self {
        self.templates = templates;
        self
    }

    pub fn source(&self) -> UserQuerySource {
        self.source
    }

    /// The most active users registered in `window`, most active first.
    ///
    /// Only users with more than `min_activity_count` revisions qualify; at
    /// most `max_size` are returned.
    pub async fn resolve(
        &self,
        project: &str,
        window: &TimeWindow,
        max_size: usize,
        min_activity_count: i64,
    ) -> Result<Vec<UserId>> {
        let schema = escape_identifier(project)?;
        let sql = self
            .templates
            .render(QueryKey::CohortCandidates, &Slots::new().set("project", schema))?;
        let limit = i64::try_from(max_size).unwrap_or(i64::MAX);
        let params = [
            Value::Text(window.start().to_string()),
            Value::Text(window.end().to_string()),
            Value::Int(min_activity_count),
            Value::Int(limit),
        ];

        let handle = self.context.reader_for(project).await?;
        let users = handle
            .query(&sql, &params)
            .await?
            .iter()
            .map(|row| UserId::from_value(row.first().unwrap_or(&Value::Null), "user_id"))
            .collect::<Result<Vec<_>>>()?;
        info!(project, users = users.len(), max_size, min_activity_count, "resolved cohort");
        Ok(users)
    }

    /// Highest recorded cohort id; [`MetricError::NoCohortsExist`] if none.
    pub async fn latest_cohort_id(&self) -> Result<i64> {
        let handle = self.context.reader(&self.bookkeeping.instance).await?;
        self.latest_on(&handle).await
    }

    /// One past the highest recorded cohort id, or 1 for an empty store.
    pub async fn next_cohort_id(&self) -> Result<i64> {
        let handle = self.context.reader(&self.bookkeeping.instance).await?;
        self.next_on(&handle).await
    }

    async fn latest_on(&self, handle: &ConnectionHandle) -> Result<i64> {
        let table = escape_qualified(&self.bookkeeping.meta_table)?;
        let sql = self
            .templates
            .render(QueryKey::LatestCohortId, &Slots::new().set("meta_table", table))?;
        let rows = handle.query(&sql, &[]).await?;
        match rows.first().and_then(|row| row.first()) {
            None | Some(Value::Null) => Err(MetricError::NoCohortsExist),
            Some(value) => value.as_i64().ok_or_else(|| MetricError::UnexpectedValue {
                column: "utm_id".to_string(),
                value: value.to_string(),
            }),
        }
    }

    async fn next_on(&self, handle: &ConnectionHandle) -> Result<i64> {
        match self.latest_on(handle).await {
            Ok(latest) => Ok(latest + 1),
            Err(MetricError::NoCohortsExist) => {
                warn!(table = %self.bookkeeping.meta_table, "no cohorts recorded yet, starting at 1");
                Ok(1)
            }
            Err(e) => Err(e),
        }
    }

    /// Users registered between `start` and `end`, in registration order.
    ///
    /// The query runs when the stream is first polled; every call returns a
    /// new stream that queries again.
    pub fn users_between<'a, 'b>(
        &self,
        start: impl Into<TimestampRepr<'a>>,
        end: impl Into<TimestampRepr<'b>>,
        project: &str,
    ) -> BoxStream<'static, Result<UserId>> {
        let window = TimeWindow::new(start, end);
        let context = Arc::clone(&self.context);
        let templates = Arc::clone(&self.templates);
        let source = self.source;
        let project = project.to_string();

        Box::pin(async_stream::stream! {
            match fetch_users(&context, &templates, source, &project, window).await {
                Ok(users) => {
                    for user in users {
                        yield Ok(user);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    /// Stores `cohort` under `name` and returns its new id.
    ///
    /// Runs in one transaction on a dedicated read-write handle.
    pub async fn record(&self, name: &str, cohort: &Cohort, notes: &str) -> Result<i64> {
        if cohort.is_empty() {
            return Err(MetricError::EmptyCohort);
        }
        let handle = self.context.dedicated(&self.bookkeeping.instance).await?;
        handle.execute_batch("BEGIN TRANSACTION").await?;

        match self.insert_cohort(&handle, name, cohort, notes).await {
            Ok(id) => {
                handle.execute_batch("COMMIT").await?;
                info!(cohort_id = id, name, users = cohort.len(), "recorded cohort");
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback) = handle.execute_batch("ROLLBACK").await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn insert_cohort(
        &self,
        handle: &ConnectionHandle,
        name: &str,
        cohort: &Cohort,
        notes: &str,
    ) -> Result<i64> {
        let id = self.next_on(handle).await?;
        let meta_table = escape_qualified(&self.bookkeeping.meta_table)?;
        let users_table = escape_qualified(&self.bookkeeping.users_table)?;
        let touched = normalize(chrono::Utc::now())?;

        let sql = self
            .templates
            .render(QueryKey::InsertCohortMeta, &Slots::new().set("meta_table", meta_table))?;
        handle
            .execute(
                &sql,
                &[
                    Value::Int(id),
                    Value::Text(name.to_string()),
                    Value::Text(cohort.project().to_string()),
                    Value::Text(notes.to_string()),
                    Value::Text(touched.to_string()),
                    Value::Bool(true),
                ],
            )
            .await?;

        let sql = self
            .templates
            .render(QueryKey::InsertCohortUser, &Slots::new().set("users_table", users_table))?;
        for user in cohort {
            handle.execute(&sql, &[user.to_value(), Value::Int(id)]).await?;
        }
        debug!(cohort_id = id, "inserted cohort rows");
        Ok(id)
    }
}

async fn fetch_users(
    context: &StoreContext,
    templates: &TemplateStore,
    source: UserQuerySource,
    project: &str,
    window: Result<TimeWindow>,
) -> Result<Vec<UserId>> {
    let window = window?;
    let schema = escape_identifier(project)?;
    let sql = templates.render(source.query_key(), &Slots::new().set("project", schema))?;
    let handle = context.reader_for(project).await?;
    let rows = handle
        .query(
            &sql,
            &[
                Value::Text(window.start().to_string()),
                Value::Text(window.end().to_string()),
            ],
        )
        .await?;
    debug!(project, ?source, rows = rows.len(), "fetched users");
    rows.iter()
        .map(|row| UserId::from_value(row.first().unwrap_or(&Value::Null), source.user_column()))
        .collect()
}
