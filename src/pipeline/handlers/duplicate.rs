//! Natural-key fingerprints for duplicate detection.
//!
//! Parts are normalized (trimmed, lowercased, whitespace collapsed) before
//! hashing so cosmetic differences between extractions of the same
//! document produce the same key.

use base64::Engine;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Canonical form of one key component.
pub fn normalize_part(part: &str) -> String {
    part.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 over the normalized, `|`-joined parts, base64 encoded.
pub fn fingerprint(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|p| normalize_part(p))
        .collect::<Vec<_>>()
        .join("|");
    let hash = Sha256::digest(joined.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Key over (name, date, source).
pub fn primary_key(name: &str, date: NaiveDate, source: Option<&str>) -> String {
    fingerprint(&[name, &date.to_string(), source.unwrap_or("")])
}

/// First five alphanumeric characters of a name, lowercased.
/// Lets "Amoxicillin 500" and "amoxicilline" share a secondary key.
pub fn name_stem(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .take(5)
        .collect()
}

/// Key over (name stem, value, unit, reference range, date). `None`
/// without a value.
pub fn secondary_key(
    name: &str,
    value: Option<&str>,
    unit: Option<&str>,
    range: Option<&str>,
    date: NaiveDate,
) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    Some(fingerprint(&[
        &name_stem(name),
        value,
        unit.unwrap_or(""),
        range.unwrap_or(""),
        &date.to_string(),
    ]))
}

/// Numeric value rendered without float noise: 5.40 -> "5.4", 120.0 -> "120".
pub fn format_number(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn cosmetic_differences_share_a_key() {
        assert_eq!(
            primary_key("Hemoglobin  A1c", date(), Some("City Lab")),
            primary_key("hemoglobin a1c", date(), Some(" CITY LAB "))
        );
    }

    #[test]
    fn different_dates_differ() {
        let other = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert_ne!(
            primary_key("Glucose", date(), None),
            primary_key("Glucose", other, None)
        );
    }

    #[test]
    fn part_boundaries_matter() {
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }

    #[test]
    fn secondary_key_needs_a_value() {
        assert_eq!(secondary_key("Glucose", None, Some("mg/dL"), None, date()), None);
        assert_eq!(secondary_key("Glucose", Some("  "), None, None, date()), None);
        assert!(secondary_key("Potassium", Some("5.4"), Some("mmol/L"), Some("3.9-5.5"), date()).is_some());
    }

    #[test]
    fn stems_ignore_case_and_punctuation() {
        assert_eq!(name_stem("Amoxicillin 500"), "amoxi");
        assert_eq!(name_stem("amoxi-cilline"), "amoxi");
        assert_eq!(name_stem("AB"), "ab");
    }

    #[test]
    fn same_value_different_tests_differ() {
        assert_ne!(
            secondary_key("Urine nitrite", Some("negative"), None, None, date()),
            secondary_key("Urine leukocytes", Some("negative"), None, None, date())
        );
        assert_eq!(
            secondary_key("Hemoglobin A1c", Some("6.1"), Some("%"), None, date()),
            secondary_key("HEMOGLOBIN a1c", Some("6.1"), Some("%"), None, date())
        );
    }

    #[test]
    fn numbers_format_stably() {
        assert_eq!(format_number(5.40), "5.4");
        assert_eq!(format_number(120.0), "120");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
    }
}
