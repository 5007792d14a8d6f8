//! Aggregation over metric results.
//!
//! Reduces the per-user rows of a processed metric to cohort-level numbers:
//! a generic [`AggregateFunction`] over one field, and [`boolean_rate`] for
//! the pass rate of threshold-style metrics.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use umstore_core::Value;
use crate::error::{MetricError, Result};
use crate::result::ResultRow;

pub const AGGREGATE_HEADER: &[&str] = &["field", "function", "value"];
pub const BOOLEAN_RATE_HEADER: &[&str] = &["total_users", "threshold_reached", "rate"];

/// Aggregation functions over one numeric or boolean field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Count the number of non-null values
    Count,
    /// Sum all values
    Sum,
    /// Calculate the average
    Avg,
    /// Find the minimum value
    Min,
    /// Find the maximum value
    Max,
}

impl Display for AggregateFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "count"),
            AggregateFunction::Sum => write!(f, "sum"),
            AggregateFunction::Avg => write!(f, "avg"),
            AggregateFunction::Min => write!(f, "min"),
            AggregateFunction::Max => write!(f, "max"),
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "avg" | "mean" => Ok(AggregateFunction::Avg),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            other => Err(MetricError::UnknownMetric(format!("aggregate {}", other))),
        }
    }
}

/// Non-null values of `field` as floats.
fn field_values(rows: &[ResultRow], field: &str) -> Result<Vec<f64>> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let value = row.get(field).ok_or_else(|| MetricError::UnexpectedValue {
            column: field.to_string(),
            value: "missing field".to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        values.push(value.as_f64().ok_or_else(|| MetricError::UnexpectedValue {
            column: field.to_string(),
            value: value.to_string(),
        })?);
    }
    Ok(values)
}

/// Applies `function` to `field` across `rows`. No values aggregate to 0.
pub fn apply_function(function: AggregateFunction, rows: &[ResultRow], field: &str) -> Result<f64> {
    let values = field_values(rows, field)?;
    if values.is_empty() {
        return Ok(0.0);
    }

    Ok(match function {
        AggregateFunction::Count => values.len() as f64,
        AggregateFunction::Sum => values.iter().sum(),
        AggregateFunction::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// `[field, function, value]` for one aggregation.
pub fn aggregate(function: AggregateFunction, rows: &[ResultRow], field: &str) -> Result<ResultRow> {
    let value = apply_function(function, rows, field)?;
    ResultRow::new(
        AGGREGATE_HEADER,
        vec![
            Value::Text(field.to_string()),
            Value::Text(function.to_string()),
            Value::Float(value),
        ],
    )
}

/// Share of users whose boolean `field` is true.
pub fn boolean_rate(rows: &[ResultRow], field: &str) -> Result<ResultRow> {
    let total = rows.len() as i64;
    let reached = apply_function(AggregateFunction::Sum, rows, field)? as i64;
    let rate = if total == 0 { 0.0 } else { reached as f64 / total as f64 };
    ResultRow::new(
        BOOLEAN_RATE_HEADER,
        vec![Value::Int(total), Value::Int(reached), Value::Float(rate)],
    )
}
