//! Flexible date parsing for dataset date columns
//!
//! Upload sources carry dates in mixed formats ("21/10/2008", "Oct 21, 2008",
//! "2008-10-21"). Numeric day/month forms are disambiguated day-first, so
//! "03/04/2021" is 3 April 2021.

use chrono::{NaiveDate, NaiveDateTime};

/// Date-only formats tried in order. Day-first numeric forms come before
/// month-first so ambiguous values resolve day-first.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b, %Y",
    "%d %B, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse a date string in any of the supported formats.
///
/// Returns `None` for values that match no format; callers decide whether
/// that means "null cell" (ingestion) or "reject the request" (filters).
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return Some(d);
        }
    }
    None
}

/// Parse a caller-supplied date and render it as `YYYY-MM-DD`.
pub fn parse_date_value(value: &str) -> Option<String> {
    parse_flexible_date(value).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Canonical DateTime rendering for storage: midnight of the parsed date.
pub fn to_storage_datetime(date: NaiveDate) -> String {
    date.format("%Y-%m-%d 00:00:00").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_first_disambiguation() {
        // Both day and month are valid; day-first wins.
        assert_eq!(
            parse_flexible_date("03/04/2021"),
            NaiveDate::from_ymd_opt(2021, 4, 3)
        );
    }

    #[test]
    fn test_month_first_fallback() {
        // 13 cannot be a month, so the month-first format picks it up.
        assert_eq!(
            parse_flexible_date("04/13/2021"),
            NaiveDate::from_ymd_opt(2021, 4, 13)
        );
    }

    #[test]
    fn test_iso_and_named_month_formats() {
        let expected = NaiveDate::from_ymd_opt(2008, 10, 21);
        assert_eq!(parse_flexible_date("2008-10-21"), expected);
        assert_eq!(parse_flexible_date("Oct 21, 2008"), expected);
        assert_eq!(parse_flexible_date("21 Oct, 2008"), expected);
        assert_eq!(parse_flexible_date("21 October 2008"), expected);
        assert_eq!(parse_flexible_date("2008-10-21 15:30:00"), expected);
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert_eq!(parse_flexible_date("coming soon"), None);
        assert_eq!(parse_flexible_date(""), None);
        assert_eq!(parse_flexible_date("32/13/2020"), None);
    }

    #[test]
    fn test_parse_date_value_format() {
        assert_eq!(
            parse_date_value("21/10/2008").as_deref(),
            Some("2008-10-21")
        );
        assert_eq!(parse_date_value("not a date"), None);
    }

    #[test]
    fn test_storage_datetime() {
        let d = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(to_storage_datetime(d), "2020-01-01 00:00:00");
    }
}
