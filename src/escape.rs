//! Escaping and clause formatting for query templates.
//!
//! Template slots that cannot be bound as parameters (schema names, IN-lists,
//! the namespace clause) are the only places text is spliced into a query.
//! Everything spliced goes through this module.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::{MetricError, Result};

/// Sentinel accepted in configuration for "no namespace restriction".
pub const ALL_NAMESPACES: &str = "all_namespaces";

/// Shape-preserving escaping: scalars stay scalars, lists stay lists.
pub trait Escape {
    type Escaped;

    fn escape(&self) -> Self::Escaped;
}

impl Escape for str {
    type Escaped = String;

    fn escape(&self) -> String {
        escape_scalar(self)
    }
}

impl Escape for String {
    type Escaped = String;

    fn escape(&self) -> String {
        escape_scalar(self)
    }
}

impl Escape for i64 {
    type Escaped = String;

    fn escape(&self) -> String {
        self.to_string()
    }
}

impl Escape for i32 {
    type Escaped = String;

    fn escape(&self) -> String {
        self.to_string()
    }
}

impl<T: Escape> Escape for [T] {
    type Escaped = Vec<T::Escaped>;

    fn escape(&self) -> Self::Escaped {
        self.iter().map(Escape::escape).collect()
    }
}

impl<T: Escape> Escape for Vec<T> {
    type Escaped = Vec<T::Escaped>;

    fn escape(&self) -> Self::Escaped {
        self.as_slice().escape()
    }
}

/// Escapes a scalar or (recursively) a list of them.
pub fn escape<T: Escape + ?Sized>(value: &T) -> T::Escaped {
    value.escape()
}

/// Drops whitespace, control characters, backslashes, double quotes and
/// semicolons; doubles single quotes so the result is safe inside `'...'`.
fn escape_scalar(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            c if c.is_whitespace() || c.is_control() => {}
            '\\' | '"' | ';' | '`' => {}
            '\'' => escaped.push_str("''"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Validates a schema or table name for unquoted use.
pub fn escape_identifier(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name.to_string())
    } else {
        Err(MetricError::InvalidIdentifier(name.to_string()))
    }
}

/// Validates a possibly schema-qualified name such as `enwiki.revision`.
pub fn escape_qualified(name: &str) -> Result<String> {
    name.split('.')
        .map(escape_identifier)
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join("."))
        .map_err(|_| MetricError::InvalidIdentifier(name.to_string()))
}

/// Comma-joins escaped values, optionally single-quoting each.
pub fn format_list<T>(values: &[T], quote: bool) -> String
where
    T: Escape,
    T::Escaped: Display,
{
    values
        .iter()
        .map(|v| {
            if quote {
                format!("'{}'", v.escape())
            } else {
                v.escape().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Namespace restriction for activity queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NamespaceRepr", into = "NamespaceRepr")]
pub enum NamespaceFilter {
    All,
    Codes(BTreeSet<i64>),
}

impl NamespaceFilter {
    pub fn codes(codes: impl IntoIterator<Item = i64>) -> Result<Self> {
        let codes: BTreeSet<i64> = codes.into_iter().collect();
        if codes.is_empty() {
            return Err(MetricError::InvalidNamespace("empty namespace set".to_string()));
        }
        Ok(NamespaceFilter::Codes(codes))
    }
}

impl Default for NamespaceFilter {
    fn default() -> Self {
        NamespaceFilter::All
    }
}

impl Display for NamespaceFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceFilter::All => write!(f, "{}", ALL_NAMESPACES),
            NamespaceFilter::Codes(codes) => {
                let codes: Vec<String> = codes.iter().map(i64::to_string).collect();
                write!(f, "{}", codes.join(","))
            }
        }
    }
}

impl FromStr for NamespaceFilter {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == ALL_NAMESPACES || s == "all" || s == "*" {
            return Ok(NamespaceFilter::All);
        }
        let codes = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<i64>()
                    .map_err(|_| MetricError::InvalidNamespace(s.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        NamespaceFilter::codes(codes)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum NamespaceRepr {
    Code(i64),
    Codes(Vec<i64>),
    Text(String),
}

impl TryFrom<NamespaceRepr> for NamespaceFilter {
    type Error = MetricError;

    fn try_from(repr: NamespaceRepr) -> Result<Self> {
        match repr {
            NamespaceRepr::Code(code) => NamespaceFilter::codes([code]),
            NamespaceRepr::Codes(codes) => NamespaceFilter::codes(codes),
            NamespaceRepr::Text(text) => text.parse(),
        }
    }
}

impl From<NamespaceFilter> for NamespaceRepr {
    fn from(filter: NamespaceFilter) -> Self {
        match filter {
            NamespaceFilter::All => NamespaceRepr::Text(ALL_NAMESPACES.to_string()),
            NamespaceFilter::Codes(codes) => NamespaceRepr::Codes(codes.into_iter().collect()),
        }
    }
}

/// Builds the `page_namespace` condition for `filter`.
///
/// "All namespaces" yields an empty string. A single code yields an equality
/// clause and is taken out of the set; several codes yield an `IN` clause.
pub fn format_namespace(filter: &mut NamespaceFilter) -> Result<String> {
    match filter {
        NamespaceFilter::All => Ok(String::new()),
        NamespaceFilter::Codes(codes) => match codes.len() {
            0 => Err(MetricError::InvalidNamespace("empty namespace set".to_string())),
            1 => {
                let code = codes
                    .pop_first()
                    .ok_or_else(|| MetricError::InvalidNamespace("empty namespace set".to_string()))?;
                Ok(format!("page_namespace = {}", code))
            }
            _ => {
                let codes: Vec<i64> = codes.iter().copied().collect();
                Ok(format!("page_namespace IN ({})", format_list(&codes, false)))
            }
        },
    }
}
