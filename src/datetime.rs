//! Timestamp normalization for the tick formats found on Windows images.
//!
//! Every artifact timestamp ends up as `Option<DateTime<Utc>>`. A value that is
//! zero, precedes the Unix epoch, or cannot be represented maps to `None`.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday, Datelike};

/// FILETIME ticks (100ns) between 1601-01-01 and 1970-01-01
pub const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Microseconds between 1601-01-01 and 1970-01-01 (Chromium/WebKit epoch)
pub const WEBKIT_UNIX_EPOCH_MICROS: i64 = 11_644_473_600_000_000;

const TICKS_PER_SECOND: u64 = 10_000_000;

/// Convert a Windows FILETIME to UTC, keeping 100ns precision
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 || filetime < FILETIME_UNIX_EPOCH {
        return None;
    }
    let delta = filetime - FILETIME_UNIX_EPOCH;
    let secs = (delta / TICKS_PER_SECOND) as i64;
    let nanos = ((delta % TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Inverse of [`filetime_to_datetime`]
pub fn datetime_to_filetime(dt: &DateTime<Utc>) -> Option<u64> {
    let secs = u64::try_from(dt.timestamp()).ok()?;
    let ticks = secs
        .checked_mul(TICKS_PER_SECOND)?
        .checked_add(u64::from(dt.timestamp_subsec_nanos() / 100))?;
    ticks.checked_add(FILETIME_UNIX_EPOCH)
}

/// Convert a Unix `time_t` (seconds) to UTC
pub fn unix_seconds_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Convert microseconds since the Unix epoch (Firefox PRTime) to UTC
pub fn unix_micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    if micros <= 0 {
        return None;
    }
    DateTime::from_timestamp_micros(micros)
}

/// Convert microseconds since 1601-01-01 (Chromium) to UTC
pub fn webkit_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    if micros <= 0 || micros < WEBKIT_UNIX_EPOCH_MICROS {
        return None;
    }
    DateTime::from_timestamp_micros(micros - WEBKIT_UNIX_EPOCH_MICROS)
}

/// Parse date string in various formats (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
pub fn parse_date_filter(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive_dt));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
        let naive_dt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::InvalidInput("Invalid date format".to_string()))?;
        return Ok(Utc.from_utc_datetime(&naive_dt));
    }

    Err(Error::InvalidInput(format!(
        "Invalid date format '{}'. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
        date_str
    )))
}

/// Check if a timestamp falls within the specified date range
pub fn timestamp_in_range(
    timestamp: &DateTime<Utc>,
    after: &Option<DateTime<Utc>>,
    before: &Option<DateTime<Utc>>,
) -> bool {
    if let Some(after_dt) = after {
        if timestamp < after_dt {
            return false;
        }
    }
    if let Some(before_dt) = before {
        if timestamp > before_dt {
            return false;
        }
    }
    true
}

/// Format timestamp for the human-readable run report
pub fn format_timestamp_human(dt: &DateTime<Utc>) -> String {
    format!("{} {} UTC", format_weekday(dt.weekday()), dt.format("%Y-%m-%d %H:%M:%S"))
}

fn format_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_filetime_zero_and_pre_epoch_are_null() {
        assert!(filetime_to_datetime(0).is_none());
        assert!(filetime_to_datetime(FILETIME_UNIX_EPOCH - 1).is_none());
        assert!(filetime_to_datetime(1).is_none());
    }

    #[test]
    fn test_filetime_epoch_boundary() {
        let dt = filetime_to_datetime(FILETIME_UNIX_EPOCH).unwrap();
        assert_eq!(dt.timestamp(), 0);
    }

    #[test]
    fn test_filetime_known_value() {
        // 2000-01-01 00:00:00 UTC
        let dt = filetime_to_datetime(125_911_584_000_000_000).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2000-01-01 00:00:00");
    }

    #[test]
    fn test_filetime_reversible_to_tick() {
        for ft in [
            FILETIME_UNIX_EPOCH,
            FILETIME_UNIX_EPOCH + 1,
            128_166_372_003_061_629,
            130_000_000_000_000_007,
            133_000_000_123_456_789,
        ] {
            let dt = filetime_to_datetime(ft).unwrap();
            assert_eq!(datetime_to_filetime(&dt), Some(ft));
        }
    }

    #[test]
    fn test_filetime_monotonic() {
        let mut previous = None;
        let mut ft = FILETIME_UNIX_EPOCH;
        for step in [1u64, 9, 10_000_000, 864_000_000_000, 3, 315_360_000_000_000] {
            ft += step;
            let dt = filetime_to_datetime(ft).unwrap();
            if let Some(prev) = previous {
                assert!(dt > prev);
            }
            previous = Some(dt);
        }
    }

    #[test]
    fn test_filetime_subsecond_precision() {
        let dt = filetime_to_datetime(FILETIME_UNIX_EPOCH + 12_345).unwrap();
        assert_eq!(dt.nanosecond(), 1_234_500);
    }

    #[test]
    fn test_browser_epochs() {
        assert!(unix_micros_to_datetime(0).is_none());
        let ff = unix_micros_to_datetime(1_234_567_890_000_000).unwrap();
        assert_eq!(ff.timestamp(), 1_234_567_890);

        assert!(webkit_to_datetime(0).is_none());
        let chrome = webkit_to_datetime(WEBKIT_UNIX_EPOCH_MICROS + 1_000_000).unwrap();
        assert_eq!(chrome.timestamp(), 1);
        assert!(webkit_to_datetime(WEBKIT_UNIX_EPOCH_MICROS - 1).is_none());
    }

    #[test]
    fn test_unix_seconds() {
        assert!(unix_seconds_to_datetime(0).is_none());
        assert!(unix_seconds_to_datetime(-5).is_none());
        assert_eq!(unix_seconds_to_datetime(86_400).unwrap().format("%Y-%m-%d").to_string(), "1970-01-02");
    }

    #[test]
    fn test_parse_date_filter() {
        let dt = parse_date_filter("2023-12-25").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2023-12-25 00:00:00");
        let dt = parse_date_filter("2023-12-25 15:30:45").unwrap();
        assert_eq!(dt.format("%H:%M:%S").to_string(), "15:30:45");
        assert!(parse_date_filter("2023/12/25").is_err());
    }

    #[test]
    fn test_timestamp_in_range() {
        let ts = parse_date_filter("2023-12-25 12:00:00").unwrap();
        let after = Some(parse_date_filter("2023-12-20").unwrap());
        let before = Some(parse_date_filter("2023-12-30").unwrap());
        assert!(timestamp_in_range(&ts, &after, &before));
        let late_after = Some(parse_date_filter("2023-12-26").unwrap());
        assert!(!timestamp_in_range(&ts, &late_after, &before));
    }

    #[test]
    fn test_format_timestamp_human() {
        let dt = parse_date_filter("2024-04-01 08:43:34").unwrap();
        assert_eq!(format_timestamp_human(&dt), "Mon 2024-04-01 08:43:34 UTC");
    }
}
