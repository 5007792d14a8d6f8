//! Cohorts of user handles.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};
use umstore_core::Value;
use crate::error::{MetricError, Result};
use crate::escape::Escape;

/// A user handle: a numeric id or a user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Id(i64),
    Name(String),
}

impl UserId {
    /// Reads a handle out of a store value.
    pub fn from_value(value: &Value, column: &str) -> Result<Self> {
        match value {
            Value::Int(id) => Ok(UserId::Id(*id)),
            Value::Text(name) => Ok(UserId::Name(name.clone())),
            other => Err(MetricError::UnexpectedValue {
                column: column.to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn as_id(&self) -> Option<i64> {
        match self {
            UserId::Id(id) => Some(*id),
            UserId::Name(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            UserId::Id(id) => Value::Int(*id),
            UserId::Name(name) => Value::Text(name.clone()),
        }
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UserId::Id(id) => write!(f, "{}", id),
            UserId::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId::Id(id)
    }
}

impl From<&str> for UserId {
    fn from(name: &str) -> Self {
        UserId::Name(name.to_string())
    }
}

impl From<String> for UserId {
    fn from(name: String) -> Self {
        UserId::Name(name)
    }
}

impl Escape for UserId {
    type Escaped = String;

    fn escape(&self) -> String {
        match self {
            UserId::Id(id) => id.escape(),
            UserId::Name(name) => name.escape(),
        }
    }
}

/// Users measured together, all from one project.
///
/// Handles are unique; the first occurrence of a duplicate wins, so a ranked
/// input keeps its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    project: String,
    users: Vec<UserId>,
}

impl Cohort {
    pub fn new<I, U>(project: impl Into<String>, users: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        let mut seen = HashSet::new();
        let users = users
            .into_iter()
            .map(Into::into)
            .filter(|user: &UserId| seen.insert(user.clone()))
            .collect();
        Self {
            project: project.into(),
            users,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UserId> {
        self.users.iter()
    }
}

impl<'a> IntoIterator for &'a Cohort {
    type Item = &'a UserId;
    type IntoIter = std::slice::Iter<'a, UserId>;

    fn into_iter(self) -> Self::IntoIter {
        self.users.iter()
    }
}
