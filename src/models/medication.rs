use serde::{Deserialize, Serialize};

use super::lenient;

/// One prescribed medication line, as extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationEntry {
    #[serde(default, deserialize_with = "lenient::string")]
    pub medication_name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub dosage: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub frequency: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub route: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub instructions: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub prescribing_doctor: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub prescription_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub quantity: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub refills: Option<String>,
}

impl MedicationEntry {
    /// Strength in milligrams when the dosage states one ("500 mg", "0.5g", "250mcg").
    pub fn dose_mg(&self) -> Option<f64> {
        let dosage = self.dosage.as_deref()?.to_lowercase();
        let amount = lenient::parse_leading_number(&dosage)?;
        let unit: String = dosage
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ',' || c.is_whitespace())
            .chars()
            .take_while(|c| c.is_alphabetic())
            .collect();
        match unit.as_str() {
            "mg" => Some(amount),
            "g" => Some(amount * 1000.0),
            "mcg" | "µg" | "ug" => Some(amount / 1000.0),
            _ => None,
        }
    }

    /// Duration in days ("30 days", "2 weeks", "3 months"), capped at
    /// [`MAX_DURATION_DAYS`].
    pub fn duration_days(&self) -> Option<i64> {
        let duration = self.duration.as_deref()?.to_lowercase();
        let amount = lenient::parse_leading_number(&duration)?;
        let days = if duration.contains("week") || duration.contains("semaine") {
            amount * 7.0
        } else if duration.contains("month") || duration.contains("mois") {
            amount * 30.0
        } else if duration.contains("year") {
            amount * 365.0
        } else {
            amount
        };
        if !days.is_finite() || days < 0.0 {
            return None;
        }
        Some(days.round().min(MAX_DURATION_DAYS as f64) as i64)
    }
}

/// Longest treatment duration taken at face value (about a century).
pub const MAX_DURATION_DAYS: i64 = 36_500;

/// A prescription document: shared header plus its medication lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionDocument {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub prescription_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub prescribing_doctor: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub facility: Option<String>,
    #[serde(default)]
    pub medications: Vec<MedicationEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_dosage(dosage: &str) -> MedicationEntry {
        MedicationEntry {
            medication_name: "Metformin".into(),
            dosage: Some(dosage.into()),
            ..Default::default()
        }
    }

    #[test]
    fn dose_units_convert_to_mg() {
        assert_eq!(with_dosage("500 mg").dose_mg(), Some(500.0));
        assert_eq!(with_dosage("0.5g").dose_mg(), Some(500.0));
        assert_eq!(with_dosage("250 mcg").dose_mg(), Some(0.25));
        assert_eq!(with_dosage("2 tablets").dose_mg(), None);
    }

    #[test]
    fn duration_parsing() {
        let mut entry = with_dosage("10 mg");
        entry.duration = Some("2 weeks".into());
        assert_eq!(entry.duration_days(), Some(14));
        entry.duration = Some("30 days".into());
        assert_eq!(entry.duration_days(), Some(30));
        entry.duration = Some("3 months".into());
        assert_eq!(entry.duration_days(), Some(90));
        entry.duration = Some("ongoing".into());
        assert_eq!(entry.duration_days(), None);
    }

    #[test]
    fn huge_durations_are_capped() {
        let mut entry = with_dosage("10 mg");
        entry.duration = Some("999999999 years".into());
        assert_eq!(entry.duration_days(), Some(MAX_DURATION_DAYS));
        entry.duration = Some("-5 days".into());
        assert_eq!(entry.duration_days(), None);
    }
}
