use serde::{Deserialize, Serialize};

use super::enums::AbnormalFlag;
use super::lenient;

/// One test line of a lab report, as extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabEntry {
    #[serde(default, deserialize_with = "lenient::string")]
    pub test_name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub test_category: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub value_text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub reference_range_low: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub reference_range_high: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub reference_range_text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub abnormal_flag: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub test_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub lab_facility: Option<String>,
}

impl LabEntry {
    /// Explicit flag when readable, otherwise derived from the reference range.
    pub fn effective_flag(&self) -> Option<AbnormalFlag> {
        self.abnormal_flag
            .as_deref()
            .and_then(AbnormalFlag::from_label)
            .or_else(|| {
                self.value.and_then(|v| {
                    AbnormalFlag::evaluate(v, self.reference_range_low, self.reference_range_high)
                })
            })
    }

    /// Reference range as printed, or rebuilt from its bounds.
    pub fn reference_range(&self) -> Option<String> {
        if let Some(text) = &self.reference_range_text {
            return Some(text.clone());
        }
        match (self.reference_range_low, self.reference_range_high) {
            (Some(low), Some(high)) => Some(format!("{low}-{high}")),
            (Some(low), None) => Some(format!(">{low}")),
            (None, Some(high)) => Some(format!("<{high}")),
            (None, None) => None,
        }
    }

    /// Numeric value when present, otherwise the textual result.
    pub fn display_value(&self) -> Option<String> {
        self.value
            .map(|v| v.to_string())
            .or_else(|| self.value_text.clone())
    }
}

/// A whole lab report: document-level fields plus its test lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabReport {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub report_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub lab_facility: Option<String>,
    #[serde(default)]
    pub tests: Vec<LabEntry>,
}
