//! Human date expressions for the `since` filter

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

/// `7 days` → `7days`, so humantime sees one span per number
static SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+([a-zA-Z]+)").expect("valid regex"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse a human date expression into a calendar date
///
/// Accepts absolute dates (`2024-01-15`, `2024/01/15`, `January 15, 2024`),
/// date-times (`2024-01-15 08:30`, RFC 3339, RFC 2822), `today`,
/// `yesterday`, and relative durations (`7d`, `2 weeks ago`) measured back
/// from `now`.
pub fn parse_since(input: &str, now: DateTime<Utc>) -> Result<NaiveDate, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty date expression".to_string());
    }

    match input.to_ascii_lowercase().as_str() {
        "today" | "now" => return Ok(now.date_naive()),
        "yesterday" => return Ok((now - Duration::days(1)).date_naive()),
        _ => {}
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Ok(dt.with_timezone(&Utc).date_naive());
    }
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
    {
        return Ok(date);
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
    {
        return Ok(dt.date());
    }

    parse_relative(input, now)
}

fn parse_relative(input: &str, now: DateTime<Utc>) -> Result<NaiveDate, String> {
    let lowered = input.to_ascii_lowercase();
    let spans = lowered.strip_suffix("ago").unwrap_or(&lowered).trim();
    let spans = SPAN_RE.replace_all(spans, "$1$2");

    let elapsed = humantime::parse_duration(&spans)
        .map_err(|e| format!("not a recognised date or duration ({e})"))?;
    let elapsed = Duration::from_std(elapsed).map_err(|e| e.to_string())?;

    now.checked_sub_signed(elapsed)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| "duration reaches before the supported date range".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_absolute_dates() {
        assert_eq!(parse_since("2024-01-15", now()), Ok(date(2024, 1, 15)));
        assert_eq!(parse_since("2024/01/15", now()), Ok(date(2024, 1, 15)));
        assert_eq!(parse_since("January 15, 2024", now()), Ok(date(2024, 1, 15)));
        assert_eq!(parse_since("15 Jan 2024", now()), Ok(date(2024, 1, 15)));
    }

    #[test]
    fn test_datetimes() {
        assert_eq!(parse_since("2024-01-15 08:30", now()), Ok(date(2024, 1, 15)));
        assert_eq!(parse_since("2024-01-15T23:30:00-05:00", now()), Ok(date(2024, 1, 16)));
        assert_eq!(
            parse_since("Mon, 15 Jan 2024 10:00:00 +0000", now()),
            Ok(date(2024, 1, 15))
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(parse_since("today", now()), Ok(date(2024, 3, 10)));
        assert_eq!(parse_since("Yesterday", now()), Ok(date(2024, 3, 9)));
    }

    #[test]
    fn test_relative_durations() {
        assert_eq!(parse_since("7d", now()), Ok(date(2024, 3, 3)));
        assert_eq!(parse_since("2 weeks ago", now()), Ok(date(2024, 2, 25)));
        assert_eq!(parse_since("36h", now()), Ok(date(2024, 3, 9)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_since("", now()).is_err());
        assert!(parse_since("next blue moon", now()).is_err());
        assert!(parse_since("2024-13-45", now()).is_err());
    }
}
