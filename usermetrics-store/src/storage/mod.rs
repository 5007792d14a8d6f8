//! Storage backends and connection handles for metric queries.
//!
//! This module provides:
//! - `duckdb`: Embedded DuckDB backend used for local and test instances
//! - `connector`: Instance registry handing out scoped connection handles
//!
//! Each backend implements the `StorageBackend` trait, providing a consistent
//! interface for parameterized queries regardless of the engine behind it.

pub mod connector;
pub mod duckdb;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// A single scalar returned by (or bound into) a store query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

/// One row as returned by the store, in select-list order.
pub type Row = Vec<Value>;

impl Value {
    /// Interprets the value as an integer, accepting numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Float(_) | Value::Null => None,
        }
    }

    /// Interprets the value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Storage backend trait for metric queries.
///
/// A backend wraps exactly one connection. Queries are issued and drained
/// before the call returns, so a caller never observes a half-read result.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Runs a query with positional (`?`) parameters and returns every row.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Runs a statement with positional parameters, returning affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Runs one or more statements without parameters (DDL, seeding).
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Opens a new, independent connection to the same database.
    fn try_clone_boxed(&self) -> Result<Box<dyn StorageBackend>>;
}
