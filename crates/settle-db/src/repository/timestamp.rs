//! Timestamp encoding for bound parameters.
//!
//! Every timestamp column is written as fixed-width UTC text
//! (`2026-01-02T03:04:05.123456Z`), so `ORDER BY created_at` and friends
//! sort chronologically. The default encoder trims the fraction, which
//! breaks text ordering within one second.

use chrono::{DateTime, SecondsFormat, Utc};

/// Encodes a timestamp as fixed-width UTC text.
#[inline]
pub(crate) fn encode(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[inline]
pub(crate) fn encode_opt(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_encode_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let fraction = whole + Duration::milliseconds(120);

        assert_eq!(encode(whole), "2026-01-02T03:04:05.000000Z");
        assert_eq!(encode(fraction), "2026-01-02T03:04:05.120000Z");
        assert_eq!(encode(whole).len(), encode(fraction).len());
        assert!(encode(whole) < encode(fraction));
        assert_eq!(encode_opt(None), None);
    }

    #[test]
    fn test_encode_round_trips_through_parse() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap() + Duration::microseconds(42);
        let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(&encode(at)).unwrap().into();
        assert_eq!(parsed, at);
    }
}
