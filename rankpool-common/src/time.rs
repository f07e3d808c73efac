//! Timestamp utilities
//!
//! All timestamps are stored as RFC 3339 UTC text with millisecond precision
//! and a `Z` suffix, so lexicographic order in SQL matches chronological
//! order.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Encode a timestamp for storage
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp
pub fn from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp '{}': {}", raw, e)))
}

/// Calendar day key (`YYYY-MM-DD`) of a timestamp
pub fn day_key(ts: &DateTime<Utc>) -> String {
    ts.date_naive().format("%Y-%m-%d").to_string()
}

/// Midday UTC of a calendar day
pub fn noon(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN))
        .and_utc()
}
