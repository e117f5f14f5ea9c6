use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CapabilityError;

/// Text pulled out of an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    /// 0.0..=1.0; 1.0 for digital text, lower for OCR.
    pub confidence: f32,
}

/// Turns an uploaded file into plain text (OCR, PDF text layer, ...).
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, file_path: &Path, file_type: &str) -> Result<ExtractedText, CapabilityError>;
}

/// Reads plain-text uploads directly. Any other type is reported as
/// unsupported so callers can plug a real OCR backend in its place.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

const TEXT_TYPES: &[&str] = &["txt", "text", "text/plain", "md", "markdown", "csv", "text/csv"];

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, file_path: &Path, file_type: &str) -> Result<ExtractedText, CapabilityError> {
        let normalized = file_type.trim().trim_start_matches('.').to_lowercase();
        if !TEXT_TYPES.contains(&normalized.as_str()) {
            return Err(CapabilityError::Unsupported(normalized));
        }
        let text = tokio::fs::read_to_string(file_path)
            .await
            .map_err(|e| CapabilityError::Io(format!("{}: {e}", file_path.display())))?;
        Ok(ExtractedText {
            text,
            confidence: 1.0,
        })
    }
}
