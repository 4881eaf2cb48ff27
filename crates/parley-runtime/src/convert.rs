//! Property value conversions
//!
//! Envelope properties are strings; these helpers convert them to and from
//! the typed values command implementations expose. Numeric fields tolerate
//! malformed input by reporting an explicit "unset" instead of failing the
//! whole call.

use chrono::{DateTime, NaiveDateTime};

use parley_core::errors::{ParleyError, Result};
use parley_core::Timestamp;

/// Compact wall-clock format used on the wire: 14 digits, `yyyyMMddHHmmss`
pub const COMPACT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parse a case-insensitive `"true"`/`"false"`; anything else is unset
pub fn parse_bool_ci(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parse an integer; malformed input is unset rather than an error
pub fn parse_int_or_unset(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Parse a 14-digit compact timestamp
pub fn parse_compact_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), COMPACT_TIMESTAMP_FORMAT).map_err(|_| {
        ParleyError::post_processing(format!("not a 14-digit timestamp: {:?}", raw))
    })
}

/// Render a timestamp in the compact wire format (UTC)
pub fn format_compact_timestamp(at: Timestamp) -> Result<String> {
    let datetime = DateTime::from_timestamp_millis(at.as_millis() as i64)
        .ok_or_else(|| ParleyError::encoding("timestamp out of range"))?;
    Ok(datetime.format(COMPACT_TIMESTAMP_FORMAT).to_string())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_parsing_is_case_insensitive() {
        assert_eq!(parse_bool_ci("true"), Some(true));
        assert_eq!(parse_bool_ci("TRUE"), Some(true));
        assert_eq!(parse_bool_ci(" False "), Some(false));
        assert_eq!(parse_bool_ci("yes"), None);
        assert_eq!(parse_bool_ci(""), None);
    }

    #[test]
    fn test_malformed_int_is_unset_not_error() {
        assert_eq!(parse_int_or_unset("42"), Some(42));
        assert_eq!(parse_int_or_unset(" -7 "), Some(-7));
        assert_eq!(parse_int_or_unset("forty-two"), None);
        assert_eq!(parse_int_or_unset(""), None);
    }

    #[test]
    fn test_compact_timestamp_round_trip() {
        let rendered = format_compact_timestamp(Timestamp::from_millis(0)).unwrap();
        assert_eq!(rendered, "19700101000000");
        let parsed = parse_compact_timestamp(&rendered).unwrap();
        assert_eq!(parsed.format(COMPACT_TIMESTAMP_FORMAT).to_string(), rendered);
    }

    #[test]
    fn test_bad_timestamp_is_post_processing_error() {
        let err = parse_compact_timestamp("2024-01-01").unwrap_err();
        assert_eq!(
            err.error_code(),
            parley_core::ErrorCode::PostProcessing
        );
    }
}
