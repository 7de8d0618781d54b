//! ISO-8601 timestamp encoding for date attributes.

use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Formats a date as an ISO-8601 timestamp in UTC, e.g. `2024-03-01T09:30:00Z`.
///
/// Fractional seconds are emitted only when present so that parsing the
/// result yields the same instant.
#[must_use]
pub fn iso8601_timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an ISO-8601 timestamp.
///
/// Accepts RFC 3339 strings with any offset, and offset-less
/// `YYYY-MM-DDTHH:MM:SS[.fff]` strings, which are taken as UTC.
///
/// # Errors
///
/// Returns [`ModelError::InvalidTimestamp`] if the text is not a timestamp.
pub fn date_from_iso8601(text: &str) -> ModelResult<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ModelError::InvalidTimestamp(text.to_string()))
}
