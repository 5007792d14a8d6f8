//! Canonical `YYYYMMDDHHMMSS` timestamps.
//!
//! Revision and logging tables store times as fourteen digit strings. Every
//! time value that ends up in a query goes through [`normalize`] first, so it
//! can be compared lexically against those columns.

use std::fmt::{Display, Formatter};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use crate::error::{MetricError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Only this many leading characters of a string are parsed; fractional
/// seconds and zone suffixes after it are ignored.
const PARSE_PREFIX: usize = 19;

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y%m%d%H%M%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"];

/// A timestamp in canonical fourteen digit form.
///
/// Ordering of the text matches chronological ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(String);

/// Anything a timestamp can be given as.
#[derive(Debug, Clone)]
pub enum TimestampRepr<'a> {
    Text(&'a str),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
}

impl<'a> From<&'a str> for TimestampRepr<'a> {
    fn from(s: &'a str) -> Self {
        TimestampRepr::Text(s)
    }
}

impl<'a> From<&'a String> for TimestampRepr<'a> {
    fn from(s: &'a String) -> Self {
        TimestampRepr::Text(s.as_str())
    }
}

impl<'a> From<&'a Timestamp> for TimestampRepr<'a> {
    fn from(ts: &'a Timestamp) -> Self {
        TimestampRepr::Text(ts.as_str())
    }
}

impl From<NaiveDateTime> for TimestampRepr<'_> {
    fn from(dt: NaiveDateTime) -> Self {
        TimestampRepr::DateTime(dt)
    }
}

impl From<NaiveDate> for TimestampRepr<'_> {
    fn from(d: NaiveDate) -> Self {
        TimestampRepr::Date(d)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for TimestampRepr<'_> {
    fn from(dt: DateTime<Tz>) -> Self {
        TimestampRepr::DateTime(dt.naive_utc())
    }
}

/// Converts a string or calendar value into a canonical [`Timestamp`].
pub fn normalize<'a>(repr: impl Into<TimestampRepr<'a>>) -> Result<Timestamp> {
    let datetime = match repr.into() {
        TimestampRepr::DateTime(dt) => dt,
        TimestampRepr::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| MetricError::MalformedTimestamp(d.to_string()))?,
        TimestampRepr::Text(s) => parse_text(s)?,
    };
    Ok(Timestamp(datetime.format(TIMESTAMP_FORMAT).to_string()))
}

fn parse_text(s: &str) -> Result<NaiveDateTime> {
    let trimmed = s.trim();
    let prefix = match trimmed.char_indices().nth(PARSE_PREFIX) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    };

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(prefix, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(prefix, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| MetricError::MalformedTimestamp(s.to_string()))
}

impl Timestamp {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_datetime(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.0, TIMESTAMP_FORMAT)
            .map_err(|_| MetricError::MalformedTimestamp(self.0.clone()))
    }

    /// The timestamp `hours` later.
    pub fn plus_hours(&self, hours: i64) -> Result<Timestamp> {
        let shifted = self
            .to_datetime()?
            .checked_add_signed(Duration::hours(hours))
            .ok_or_else(|| MetricError::MalformedTimestamp(format!("{} + {}h", self.0, hours)))?;
        normalize(shifted)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = MetricError;

    fn try_from(s: String) -> Result<Self> {
        normalize(s.as_str())
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl std::str::FromStr for Timestamp {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s)
    }
}

/// A `(start, end)` pair with `start <= end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: Timestamp,
    end: Timestamp,
}

impl TimeWindow {
    pub fn new<'a, 'b>(
        start: impl Into<TimestampRepr<'a>>,
        end: impl Into<TimestampRepr<'b>>,
    ) -> Result<Self> {
        let start = normalize(start)?;
        let end = normalize(end)?;
        if start > end {
            return Err(MetricError::InvalidWindow {
                start: start.0,
                end: end.0,
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &Timestamp {
        &self.start
    }

    pub fn end(&self) -> &Timestamp {
        &self.end
    }
}
