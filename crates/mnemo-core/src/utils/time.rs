//! Time Utilities
//!
//! Every persisted timestamp is an epoch in milliseconds next to an RFC 3339
//! string.

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse datetime from RFC 3339 string
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format datetime as RFC 3339 string
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// RFC 3339 form of an epoch-millisecond timestamp
pub fn format_millis(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|dt| format_datetime(&dt))
        .unwrap_or_default()
}

/// Fractional days from `then_ms` to `now_ms`, clamped at zero.
pub fn days_since(then_ms: i64, now_ms: i64) -> f64 {
    (now_ms - then_ms).max(0) as f64 / MS_PER_DAY as f64
}

/// Epoch milliseconds `days` before `now_ms`
pub fn days_ago(now_ms: i64, days: u32) -> i64 {
    now_ms - i64::from(days) * MS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_format_roundtrip() {
        let now = now_utc();
        let parsed = parse_datetime(&format_datetime(&now)).unwrap();
        assert_eq!(now.timestamp(), parsed.timestamp());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_datetime("not a date").is_none());
        assert!(parse_datetime("").is_none());
    }

    #[test]
    fn test_format_millis() {
        let formatted = format_millis(1_705_314_600_000);
        let dt = parse_datetime(&formatted).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 15);
    }

    #[test]
    fn test_days_since() {
        let now = 100 * MS_PER_DAY;
        assert_eq!(days_since(now - 3 * MS_PER_DAY, now), 3.0);
        assert_eq!(days_since(now + MS_PER_DAY, now), 0.0);
        assert_eq!(days_ago(now, 10), 90 * MS_PER_DAY);
    }
}
