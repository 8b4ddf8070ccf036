//! Timestamp parsing helpers for JSONL interchange.
//!
//! Export always writes RFC 3339 with a UTC offset, but files written by
//! cooperating tools (or hand-edited in review) show up with legacy forms:
//! no fractional seconds, a space instead of `T`, or a bare date. Import
//! accepts all of them rather than rejecting the line.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Parse a timestamp string, tolerating legacy layouts.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Space-separated datetime without offset, assumed UTC
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    // Bare date, midnight UTC
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

/// Serde deserializer for required timestamps.
///
/// # Errors
///
/// Returns a serde error when the string matches no supported layout.
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{raw}'")))
}

/// Serde deserializer for optional timestamps.
///
/// A present-but-unparseable value is an error; absent or null is `None`.
///
/// # Errors
///
/// Returns a serde error when a present string matches no supported layout.
pub fn deserialize_opt_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_timestamp("2025-01-15T12:00:00Z").unwrap();
        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn test_parse_rfc3339_with_offset_and_fraction() {
        let dt = parse_timestamp("2025-01-15T12:00:00.123456+02:00").unwrap();
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn test_parse_space_separated() {
        let dt = parse_timestamp("2025-01-15 12:00:00").unwrap();
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn test_parse_bare_date() {
        let dt = parse_timestamp("2025-06-20").unwrap();
        assert_eq!(dt.month(), 6);
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("not a time").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
