use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// Time-of-day with no date: "09:25", "9:25AM", "14:05:00", "9 pm".
static BARE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d{1,2}(?::\d{2}){1,2}\s*(?:[ap]\.?m\.?)?$|^\d{1,2}\s*[ap]\.?m\.?$")
        .expect("valid regex")
});

const NUMERIC_FORMATS: &[&str] = &[
    "%Y-%m-%d", // ISO 8601
    "%Y/%m/%d",
    "%d/%m/%Y", // European
    "%d-%m-%Y", // European dash
    "%d.%m.%Y",
    "%m/%d/%Y", // US
];

const TEXTUAL_FORMATS: &[&str] = &[
    "%B %d, %Y", // January 15, 2024
    "%b %d, %Y", // Jan 15, 2024
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y", // 15 January 2024
    "%d %b %Y",
    "%b. %d, %Y",
];

/// True for strings that carry only a time of day.
pub fn is_bare_time(raw: &str) -> bool {
    BARE_TIME.is_match(raw.trim())
}

/// Parse a record date in any supported notation.
///
/// Bare times of day are rejected rather than promoted to today's date.
/// Trailing time components ("2024-01-15T09:25:00", "01/15/2024 9:25 AM")
/// are ignored.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim().trim_matches('"');
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("unknown")
        || trimmed == "NOT_FOUND"
    {
        return None;
    }
    if is_bare_time(trimmed) {
        tracing::debug!("Rejecting bare time-of-day as a record date");
        return None;
    }

    // ISO datetime: keep the date half.
    let date_part = trimmed.split(['T', 't']).next().unwrap_or(trimmed);
    if let Some(d) = parse_exact(date_part) {
        return Some(d);
    }

    // Progressively drop trailing tokens (time, timezone, weekday noise).
    let cleaned = trimmed.replace(',', ", ").replace(",  ", ", ");
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    for n in (1..=tokens.len()).rev() {
        let candidate = tokens[..n].join(" ");
        if let Some(d) = parse_exact(&candidate) {
            return Some(d);
        }
    }
    None
}

fn parse_exact(candidate: &str) -> Option<NaiveDate> {
    let candidate = candidate.trim().trim_end_matches(',');
    for format in NUMERIC_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(candidate, format) {
            return Some(d);
        }
    }
    for format in TEXTUAL_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(candidate, format) {
            return Some(d);
        }
    }
    parse_french_textual_date(candidate)
}

/// Parse French textual date like "15 janvier 2024" or "1er mars 2024".
fn parse_french_textual_date(text: &str) -> Option<NaiveDate> {
    let lower = text.to_lowercase();
    let parts: Vec<&str> = lower.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }

    let day_str = parts[0].trim_end_matches("er").trim_end_matches("ème");
    let day: u32 = day_str.parse().ok()?;

    let month = match parts[1] {
        "janvier" => 1,
        "février" | "fevrier" => 2,
        "mars" => 3,
        "avril" => 4,
        "mai" => 5,
        "juin" => 6,
        "juillet" => 7,
        "août" | "aout" => 8,
        "septembre" => 9,
        "octobre" => 10,
        "novembre" => 11,
        "décembre" | "decembre" => 12,
        _ => return None,
    };

    let year: i32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn iso_dates() {
        assert_eq!(parse_record_date("2024-01-15"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_record_date("2024-01-15T09:25:00Z"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_record_date("2024-01-15 09:25"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn european_day_first_wins_when_ambiguous() {
        assert_eq!(parse_record_date("03/04/2024"), Some(ymd(2024, 4, 3)));
        assert_eq!(parse_record_date("15-01-2024"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn us_format_when_day_first_is_impossible() {
        assert_eq!(parse_record_date("01/15/2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_record_date("01/15/2024 09:25AM"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn english_month_names() {
        assert_eq!(parse_record_date("January 15, 2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_record_date("Jan 15, 2024 9:25 AM"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_record_date("15 Jan 2024"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn french_textual_dates() {
        assert_eq!(parse_record_date("15 janvier 2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_record_date("1er mars 2024"), Some(ymd(2024, 3, 1)));
    }

    #[test]
    fn bare_times_are_rejected() {
        for raw in ["09:25AM", "9:25 am", "14:05", "14:05:00", "9 pm", "11:30 p.m."] {
            assert!(is_bare_time(raw), "{raw} should be a bare time");
            assert_eq!(parse_record_date(raw), None, "{raw} must not become a date");
        }
    }

    #[test]
    fn placeholders_and_garbage_are_none() {
        assert_eq!(parse_record_date(""), None);
        assert_eq!(parse_record_date("null"), None);
        assert_eq!(parse_record_date("last Tuesday"), None);
        assert_eq!(parse_record_date("2024-13-45"), None);
    }
}
