use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    DiagnosticLanguage,
    PrescriptiveLanguage,
    AlarmLanguage,
    PromptInjection,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiagnosticLanguage => "diagnostic_language",
            Self::PrescriptiveLanguage => "prescriptive_language",
            Self::AlarmLanguage => "alarm_language",
            Self::PromptInjection => "prompt_injection",
        }
    }
}

/// One flagged span of screened text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub category: ViolationCategory,
    pub matched_text: String,
    pub offset: usize,
    pub length: usize,
    pub reason: String,
}

impl Violation {
    /// "category: reason ('matched')", the form reported in verdicts.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} ('{}')",
            self.category.as_str(),
            self.reason,
            self.matched_text
        )
    }
}

/// Result of cleaning untrusted text.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedText {
    pub text: String,
    pub was_modified: bool,
    pub violations: Vec<Violation>,
}
