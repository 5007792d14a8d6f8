//! Query template registry.
//!
//! Templates are kept multi-line for readability and collapsed to a single
//! whitespace-normalized line at render time. Placeholders are written
//! `{name}` and carry only the compound clauses a driver cannot bind: schema
//! qualifiers, cohort IN-lists, the namespace clause and the directional
//! timestamp clause. Every other value is a positional `?` parameter.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;
use crate::error::{MetricError, Result};

/// Registered query operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKey {
    /// Registration rows for a set of users
    RegistrationLookup,
    /// Revision count for one user with namespace and directional clauses
    ActivityCount,
    /// Most active users registered in a window
    CohortCandidates,
    /// Users registered in a window, from the account-creation log
    UsersFromLog,
    /// Users registered in a window, from the user table
    UsersFromRegistration,
    LatestCohortId,
    /// Per-user revision count and byte total over a window
    EditCount,
    InsertCohortMeta,
    InsertCohortUser,
    /// Each revision's length next to its parent's, over a window
    BytesAdded,
    /// Every revision timestamp of a set of users, oldest first
    RevisionTimes,
    /// Registration time and first edit-page click per user
    FirstEditClick,
}

impl QueryKey {
    pub const ALL: [QueryKey; 12] = [
        QueryKey::RegistrationLookup,
        QueryKey::ActivityCount,
        QueryKey::CohortCandidates,
        QueryKey::UsersFromLog,
        QueryKey::UsersFromRegistration,
        QueryKey::LatestCohortId,
        QueryKey::EditCount,
        QueryKey::InsertCohortMeta,
        QueryKey::InsertCohortUser,
        QueryKey::BytesAdded,
        QueryKey::RevisionTimes,
        QueryKey::FirstEditClick,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKey::RegistrationLookup => "registration_lookup",
            QueryKey::ActivityCount => "activity_count",
            QueryKey::CohortCandidates => "cohort_candidates",
            QueryKey::UsersFromLog => "users_from_log",
            QueryKey::UsersFromRegistration => "users_from_registration",
            QueryKey::LatestCohortId => "latest_cohort_id",
            QueryKey::EditCount => "edit_count",
            QueryKey::InsertCohortMeta => "insert_cohort_meta",
            QueryKey::InsertCohortUser => "insert_cohort_user",
            QueryKey::BytesAdded => "bytes_added",
            QueryKey::RevisionTimes => "revision_times",
            QueryKey::FirstEditClick => "first_edit_click",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            QueryKey::RegistrationLookup => {
                "SELECT log_user, log_user_text, log_timestamp
                FROM {project}.logging
                WHERE log_action = 'create'
                    AND log_type = 'newusers'
                    AND {user_field} IN ({uid_str})"
            }
            QueryKey::ActivityCount => {
                "SELECT count(*) AS revs
                FROM {project}.revision AS r
                    JOIN {project}.page AS p ON r.rev_page = p.page_id
                WHERE {ns} {user_field} = ? {ts_clause}"
            }
            QueryKey::CohortCandidates => {
                "SELECT u.user_id, count(*) AS revs
                FROM {project}.\"user\" AS u
                    JOIN {project}.revision AS r ON r.rev_user = u.user_id
                WHERE u.user_registration BETWEEN ? AND ?
                GROUP BY u.user_id
                HAVING count(*) > ?
                ORDER BY 2 DESC, 1
                LIMIT ?"
            }
            QueryKey::UsersFromLog => {
                "SELECT log_user
                FROM {project}.logging
                WHERE log_action = 'create'
                    AND log_type = 'newusers'
                    AND log_timestamp BETWEEN ? AND ?
                ORDER BY log_timestamp, log_user"
            }
            QueryKey::UsersFromRegistration => {
                "SELECT user_id
                FROM {project}.\"user\"
                WHERE user_registration BETWEEN ? AND ?
                ORDER BY user_registration, user_id"
            }
            QueryKey::LatestCohortId => "SELECT max(utm_id) FROM {meta_table}",
            QueryKey::EditCount => {
                "SELECT {user_field}, count(*) AS edit_count, coalesce(sum(r.rev_len), 0) AS bytes_added
                FROM {project}.revision AS r
                    JOIN {project}.page AS p ON r.rev_page = p.page_id
                WHERE {ns} {user_field} IN ({uid_str})
                    AND rev_timestamp > ?
                    AND rev_timestamp <= ?
                GROUP BY {user_field}"
            }
            QueryKey::InsertCohortMeta => {
                "INSERT INTO {meta_table}
                    (utm_id, utm_name, utm_project, utm_notes, utm_touched, utm_enabled)
                VALUES (?, ?, ?, ?, ?, ?)"
            }
            QueryKey::InsertCohortUser => {
                "INSERT INTO {users_table} (ut_user, ut_tag) VALUES (?, ?)"
            }
            QueryKey::BytesAdded => {
                "SELECT r.{user_field}, r.rev_len, coalesce(pr.rev_len, 0) AS parent_len
                FROM {project}.revision AS r
                    JOIN {project}.page AS p ON r.rev_page = p.page_id
                    LEFT JOIN {project}.revision AS pr ON pr.rev_id = r.rev_parent_id
                WHERE {ns} r.{user_field} IN ({uid_str})
                    AND r.rev_timestamp > ?
                    AND r.rev_timestamp <= ?
                ORDER BY r.rev_timestamp, r.rev_id"
            }
            QueryKey::RevisionTimes => {
                "SELECT {user_field}, rev_timestamp
                FROM {project}.revision AS r
                    JOIN {project}.page AS p ON r.rev_page = p.page_id
                WHERE {ns} {user_field} IN ({uid_str})
                ORDER BY {user_field}, rev_timestamp, rev_id"
            }
            QueryKey::FirstEditClick => {
                "SELECT l.{user_field}, l.log_timestamp, min(e.ept_timestamp) AS first_click
                FROM {project}.logging AS l
                    JOIN {project}.edit_page_tracking AS e ON e.ept_user = l.log_user
                    JOIN {project}.page AS p ON e.ept_title = p.page_title
                WHERE {ns} l.log_action = 'create'
                    AND l.log_type = 'newusers'
                    AND l.{user_field} IN ({uid_str})
                GROUP BY l.{user_field}, l.log_timestamp"
            }
        }
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueryKey {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        QueryKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| MetricError::UnknownTemplate(s.to_string()))
    }
}

/// Values for a template's `{name}` placeholders.
///
/// Callers fill slots only with output of the escaping utilities.
#[derive(Debug, Clone, Default)]
pub struct Slots<'a> {
    values: Vec<(&'static str, Cow<'a, str>)>,
}

impl<'a> Slots<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<Cow<'a, str>>) -> Self {
        self.values.retain(|(n, _)| *n != name);
        self.values.push((name, value.into()));
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_ref())
    }
}

/// Maps each [`QueryKey`] to its template text.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<QueryKey, Cow<'static, str>>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        let templates = QueryKey::ALL
            .iter()
            .map(|key| (*key, Cow::Borrowed(key.builtin())))
            .collect();
        Self { templates }
    }
}

impl TemplateStore {
    /// A store with no templates registered.
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Replaces the template for `key`.
    pub fn register(&mut self, key: QueryKey, template: impl Into<String>) {
        self.templates.insert(key, Cow::Owned(template.into()));
    }

    pub fn get(&self, key: QueryKey) -> Result<&str> {
        self.templates
            .get(&key)
            .map(|t| t.as_ref())
            .ok_or_else(|| MetricError::UnknownTemplate(key.to_string()))
    }

    /// Substitutes every placeholder of `key`'s template, collapses
    /// whitespace and checks the result parses as standard SQL.
    pub fn render(&self, key: QueryKey, slots: &Slots<'_>) -> Result<String> {
        let template = self.get(key)?;
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| MetricError::MissingSlot {
                template: key.to_string(),
                slot: after.to_string(),
            })?;
            let name = &after[..close];
            let value = slots.get(name).ok_or_else(|| MetricError::MissingSlot {
                template: key.to_string(),
                slot: name.to_string(),
            })?;
            rendered.push_str(value);
            rest = &after[close + 1..];
        }
        rendered.push_str(rest);

        let sql = collapse_whitespace(&rendered);
        validate(&sql)?;
        debug!(template = %key, sql = %sql, "rendered query");
        Ok(sql)
    }
}

/// Collapses runs of whitespace (newlines, indentation) to single spaces.
pub fn collapse_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fails unless `sql` parses as standard SQL.
pub fn validate(sql: &str) -> Result<()> {
    Parser::parse_sql(&GenericDialect {}, sql)
        .map(|_| ())
        .map_err(|e| MetricError::InvalidQuery(format!("{}: {}", e, sql)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_slots() -> Slots<'static> {
        Slots::new()
            .set("project", "enwiki")
            .set("user_field", "rev_user")
            .set("ns", "")
            .set("ts_clause", "AND rev_timestamp <= ?")
    }

    #[test]
    fn test_render_collapses_whitespace() {
        let store = TemplateStore::default();
        let sql = store.render(QueryKey::ActivityCount, &project_slots()).unwrap();
        assert_eq!(
            sql,
            "SELECT count(*) AS revs FROM enwiki.revision AS r JOIN enwiki.page AS p \
             ON r.rev_page = p.page_id WHERE rev_user = ? AND rev_timestamp <= ?"
        );
        assert!(!sql.contains('\n'));
        assert!(!sql.contains("  "));
    }

    #[test]
    fn test_missing_slot() {
        let store = TemplateStore::default();
        let slots = Slots::new().set("project", "enwiki");
        match store.render(QueryKey::RegistrationLookup, &slots) {
            Err(MetricError::MissingSlot { template, slot }) => {
                assert_eq!(template, "registration_lookup");
                assert_eq!(slot, "user_field");
            }
            other => panic!("expected missing slot, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_template() {
        let store = TemplateStore::empty();
        assert!(matches!(
            store.render(QueryKey::ActivityCount, &project_slots()),
            Err(MetricError::UnknownTemplate(_))
        ));
        assert!(matches!("no_such_query".parse::<QueryKey>(), Err(MetricError::UnknownTemplate(_))));
        assert_eq!("edit_count".parse::<QueryKey>().unwrap(), QueryKey::EditCount);
    }

    #[test]
    fn test_register_override() {
        let mut store = TemplateStore::default();
        store.register(QueryKey::LatestCohortId, "SELECT max(utm_id)\n   FROM {meta_table}\n");
        let sql = store
            .render(QueryKey::LatestCohortId, &Slots::new().set("meta_table", "cohorts.meta"))
            .unwrap();
        assert_eq!(sql, "SELECT max(utm_id) FROM cohorts.meta");
    }

    #[test]
    fn test_rejects_non_sql() {
        let mut store = TemplateStore::default();
        store.register(QueryKey::LatestCohortId, "SELEKT {meta_table}");
        let result = store.render(QueryKey::LatestCohortId, &Slots::new().set("meta_table", "m"));
        assert!(matches!(result, Err(MetricError::InvalidQuery(_))));
    }

    #[test]
    fn test_builtin_templates_are_standard_sql() {
        let store = TemplateStore::default();
        let slots = project_slots()
            .set("uid_str", "101,102")
            .set("meta_table", "usertags_meta")
            .set("users_table", "usertags");
        for key in QueryKey::ALL {
            store.render(key, &slots).unwrap_or_else(|e| panic!("{}: {}", key, e));
        }
    }
}
