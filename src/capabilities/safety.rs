use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CapabilityError;

/// What kind of text is being screened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationContext {
    /// Untrusted text pulled out of an uploaded file.
    ExtractedText,
    /// Free text typed by the user.
    UserInput,
    /// An answer produced by the language model.
    GeneratedAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    /// Cleaned text; may be empty when nothing usable remains.
    pub filtered_content: String,
    pub violations: Vec<String>,
    pub confidence_score: f32,
}

impl SafetyVerdict {
    pub fn safe(content: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            filtered_content: content.into(),
            violations: Vec::new(),
            confidence_score: 1.0,
        }
    }
}

#[async_trait]
pub trait SafetyValidator: Send + Sync {
    async fn validate(
        &self,
        text: &str,
        context: ValidationContext,
    ) -> Result<SafetyVerdict, CapabilityError>;
}
