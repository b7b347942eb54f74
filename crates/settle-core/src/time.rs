//! # Business Time
//!
//! Discount windows are entered by admins in business-local time (GMT+8)
//! and evaluated as UTC instants, whatever the server's locale.
//!
//! ```text
//! "2024-04-10T00:00"        ──► 2024-04-09T16:00:00Z   (no offset: GMT+8)
//! "2024-04-10T00:00:00Z"    ──► 2024-04-10T00:00:00Z   (explicit offset kept)
//! "2024-04-10"              ──► 2024-04-09T16:00:00Z   (local midnight)
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::ValidationError;
use crate::validation::ValidationResult;
use crate::BUSINESS_UTC_OFFSET_SECS;

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// The business timezone.
pub fn business_offset() -> FixedOffset {
    FixedOffset::east_opt(BUSINESS_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Renders an instant in business-local time.
pub fn to_business_time(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&business_offset())
}

/// Parses an admin-entered date-time.
///
/// RFC 3339 input keeps its offset. Input without an offset is read as
/// business-local time; a bare date means local midnight.
pub fn parse_business_datetime(input: &str) -> ValidationResult<DateTime<Utc>> {
    let input = input.trim();
    let invalid = || ValidationError::InvalidFormat {
        field: "date".to_string(),
        reason: format!("'{}' is not a valid date-time", input),
    };

    if input.is_empty() {
        return Err(ValidationError::Required {
            field: "date".to_string(),
        });
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(invalid)?;

    business_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}
