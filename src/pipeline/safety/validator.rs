use async_trait::async_trait;

use super::keywords::scan_keywords;
use super::sanitize::sanitize_untrusted_text;
use crate::capabilities::{CapabilityError, SafetyValidator, SafetyVerdict, ValidationContext};

const MAX_UNTRUSTED_LENGTH: usize = 200_000;

/// Rule-based [`SafetyValidator`].
///
/// Untrusted input is sanitized: injection patterns make it unsafe but the
/// cleaned text is offered as `filtered_content`. Generated answers are
/// scanned for diagnostic, prescriptive and alarm language; any hit makes
/// the answer unsafe with nothing salvageable.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSafetyValidator;

impl KeywordSafetyValidator {
    pub fn new() -> Self {
        Self
    }
}

fn confidence_for(violations: usize) -> f32 {
    (1.0 - 0.25 * violations as f32).max(0.0)
}

#[async_trait]
impl SafetyValidator for KeywordSafetyValidator {
    async fn validate(
        &self,
        text: &str,
        context: ValidationContext,
    ) -> Result<SafetyVerdict, CapabilityError> {
        match context {
            ValidationContext::ExtractedText | ValidationContext::UserInput => {
                let sanitized = sanitize_untrusted_text(text, MAX_UNTRUSTED_LENGTH);
                if !sanitized.violations.is_empty() {
                    tracing::warn!(
                        ?context,
                        violations = sanitized.violations.len(),
                        "Untrusted text contained prompt-injection patterns"
                    );
                }
                Ok(SafetyVerdict {
                    is_safe: sanitized.violations.is_empty(),
                    confidence_score: confidence_for(sanitized.violations.len()),
                    violations: sanitized.violations.iter().map(|v| v.summary()).collect(),
                    filtered_content: sanitized.text,
                })
            }
            ValidationContext::GeneratedAnswer => {
                let violations = scan_keywords(text);
                if violations.is_empty() {
                    return Ok(SafetyVerdict::safe(text));
                }
                tracing::warn!(violations = violations.len(), "Generated answer failed safety scan");
                Ok(SafetyVerdict {
                    is_safe: false,
                    filtered_content: String::new(),
                    confidence_score: confidence_for(violations.len()),
                    violations: violations.iter().map(|v| v.summary()).collect(),
                })
            }
        }
    }
}
