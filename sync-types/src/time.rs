//! Stored timestamp and date formats.
//!
//! Timestamps are persisted as fixed-width UTC text (`YYYY-MM-DDTHH:MM:SS.ffffffZ`)
//! so that lexical comparison in SQL matches chronological order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::TypesError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a timestamp in the fixed-width stored form.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored (or any RFC 3339) timestamp back into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TypesError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| TypesError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
}

/// Format a calendar date in ISO form.
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse an ISO calendar date.
pub fn parse_date(value: &str) -> Result<NaiveDate, TypesError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|source| TypesError::InvalidDate {
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stored_form_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap();
        let fractional = whole + chrono::Duration::milliseconds(5);

        let a = format_timestamp(&whole);
        let b = format_timestamp(&fractional);

        assert_eq!(a, "2024-05-15T10:30:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn parse_accepts_offsets() {
        let parsed = parse_timestamp("2024-05-15T12:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn timestamp_survives_storage() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(TypesError::InvalidTimestamp { .. })
        ));
        assert!(matches!(parse_date("2024-13-01"), Err(TypesError::InvalidDate { .. })));
    }
}
