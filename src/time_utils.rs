// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time parsing.

use chrono::{DateTime, NaiveDate, Utc};

/// Parse a client-reported calendar day. Only the zero-padded `YYYY-MM-DD`
/// form is accepted.
pub fn parse_health_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Parse an ISO-8601 timestamp with offset and normalize it to UTC.
pub fn parse_utc_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Hours between `start` and `now`; negative when `start` is in the future.
pub fn elapsed_hours(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - start).num_milliseconds() as f64 / 3_600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_health_date() {
        assert_eq!(
            parse_health_date("2025-03-01"),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert!(parse_health_date("2025-3-1").is_none());
        assert!(parse_health_date("2025-02-30").is_none());
        assert!(parse_health_date("20250301").is_none());
        assert!(parse_health_date("").is_none());
    }

    #[test]
    fn test_parse_rfc3339_normalizes_offset() {
        let parsed = parse_utc_rfc3339("2025-03-01T10:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap());
        assert!(parse_utc_rfc3339("yesterday").is_none());
    }

    #[test]
    fn test_elapsed_hours() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(elapsed_hours(start, now), 1.5);
        assert!(elapsed_hours(now, start) < 0.0);
    }
}
