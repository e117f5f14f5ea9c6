use serde::{Deserialize, Serialize};

use super::enums::VitalType;
use super::lenient;

/// One vital-sign reading, as extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalEntry {
    #[serde(default, deserialize_with = "lenient::string")]
    pub vital_type: String,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub value_primary: Option<f64>,
    /// Diastolic for blood pressure; unused otherwise.
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub value_secondary: Option<f64>,
    /// Raw reading as written, e.g. "120/80".
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub value_text: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub measured_on: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub measured_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub notes: Option<String>,
}

impl VitalEntry {
    pub fn known_type(&self) -> Option<VitalType> {
        VitalType::from_label(&self.vital_type)
    }

    /// Fills missing numeric values from the textual reading ("120/80", "98.6 F").
    pub fn normalize_values(&mut self) {
        let Some(text) = self.value_text.clone() else {
            return;
        };
        let mut parts = text.splitn(2, '/');
        if self.value_primary.is_none() {
            self.value_primary = parts.next().and_then(lenient::parse_leading_number);
        } else {
            parts.next();
        }
        if self.value_secondary.is_none() {
            self.value_secondary = parts.next().and_then(lenient::parse_leading_number);
        }
    }

    /// "120/80" for paired readings, the primary value otherwise.
    pub fn display_value(&self) -> Option<String> {
        match (self.value_primary, self.value_secondary) {
            (Some(p), Some(s)) => Some(format!("{p}/{s}")),
            (Some(p), None) => Some(p.to_string()),
            _ => self.value_text.clone(),
        }
    }
}

/// A vitals document: an optional document-level date plus its readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalsLog {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub measured_on: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub source: Option<String>,
    #[serde(default)]
    pub readings: Vec<VitalEntry>,
}
