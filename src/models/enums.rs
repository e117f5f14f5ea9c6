use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(AbnormalFlag {
    Normal => "normal",
    Low => "low",
    High => "high",
    CriticalLow => "critical_low",
    CriticalHigh => "critical_high",
});

impl AbnormalFlag {
    /// Lenient reading of lab-report flag notations ("H", "L", "HH", "abnormal", ...).
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "normal" | "n" | "within_range" | "wnl" => Some(Self::Normal),
            "low" | "l" | "below" => Some(Self::Low),
            "high" | "h" | "above" | "abnormal" | "elevated" => Some(Self::High),
            "critical_low" | "ll" | "panic_low" => Some(Self::CriticalLow),
            "critical_high" | "hh" | "panic_high" | "critical" => Some(Self::CriticalHigh),
            _ => None,
        }
    }

    /// Flag derived from a numeric value against its reference range.
    pub fn evaluate(value: f64, low: Option<f64>, high: Option<f64>) -> Option<Self> {
        match (low, high) {
            (None, None) => None,
            (Some(low), _) if value < low => Some(Self::Low),
            (_, Some(high)) if value > high => Some(Self::High),
            _ => Some(Self::Normal),
        }
    }

    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

str_enum!(VitalType {
    BloodPressure => "blood_pressure",
    HeartRate => "heart_rate",
    Temperature => "temperature",
    OxygenSaturation => "oxygen_saturation",
    BloodGlucose => "blood_glucose",
    RespiratoryRate => "respiratory_rate",
    Weight => "weight",
    Height => "height",
});

impl VitalType {
    /// Maps free-text vital names onto a known type.
    pub fn from_label(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase().replace(['-', '_'], " ");
        let key = key.split_whitespace().collect::<Vec<_>>().join(" ");
        match key.as_str() {
            "blood pressure" | "bp" | "tension" | "tension arterielle" => Some(Self::BloodPressure),
            "heart rate" | "pulse" | "hr" | "pulse rate" | "frequence cardiaque" => {
                Some(Self::HeartRate)
            }
            "temperature" | "temp" | "body temperature" => Some(Self::Temperature),
            "oxygen saturation" | "spo2" | "sp02" | "o2 sat" | "saturation" => {
                Some(Self::OxygenSaturation)
            }
            "blood glucose" | "glucose" | "blood sugar" | "glycemia" | "glycemie" => {
                Some(Self::BloodGlucose)
            }
            "respiratory rate" | "respiration" | "rr" | "breathing rate" => {
                Some(Self::RespiratoryRate)
            }
            "weight" | "body weight" | "poids" => Some(Self::Weight),
            "height" | "taille" => Some(Self::Height),
            _ => None,
        }
    }

    /// Default unit for this vital type.
    pub fn default_unit(&self) -> &'static str {
        match self {
            Self::BloodPressure => "mmHg",
            Self::HeartRate => "bpm",
            Self::Temperature => "°C",
            Self::OxygenSaturation => "%",
            Self::BloodGlucose => "mg/dL",
            Self::RespiratoryRate => "breaths/min",
            Self::Weight => "kg",
            Self::Height => "cm",
        }
    }

    /// Adult reference range for the primary value, in the default unit.
    pub fn normal_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::BloodPressure => Some((90.0, 140.0)),
            Self::HeartRate => Some((60.0, 100.0)),
            Self::Temperature => Some((36.1, 37.8)),
            Self::OxygenSaturation => Some((95.0, 100.0)),
            Self::BloodGlucose => Some((70.0, 140.0)),
            Self::RespiratoryRate => Some((12.0, 20.0)),
            Self::Weight | Self::Height => None,
        }
    }
}

str_enum!(TrendDirection {
    Increasing => "increasing",
    Decreasing => "decreasing",
    Stable => "stable",
    NonNumeric => "non_numeric",
});

str_enum!(StorageOutcome {
    Created => "created",
    DuplicateSkipped => "duplicate_skipped",
    Rejected => "rejected",
});
