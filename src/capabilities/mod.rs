//! Capability contracts consumed by the orchestrators and handlers.
//!
//! Everything that talks to the outside world (text extraction, safety
//! screening, the language model, persistence) sits behind a trait here so
//! workflows can be driven by real backends or by the mocks in [`mock`].

pub mod extractor;
pub mod llm;
pub mod mock;
pub mod safety;
pub mod storage;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub use extractor::{ExtractedText, PlainTextExtractor, TextExtractor};
pub use llm::{ChatMessage, ChatRole, LanguageModel};
pub use safety::{SafetyValidator, SafetyVerdict, ValidationContext};
pub use storage::{
    CandidateRecord, DuplicateMatch, InsertOutcome, RecordQuery, Storage, StorageError,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Language model error: {0}")]
    LanguageModel(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("Safety validation failed: {0}")]
    Safety(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CapabilityError {
    pub fn timeout(operation: impl Into<String>, bound: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Runs one capability call under an upper bound.
///
/// Elapsed bounds surface as [`CapabilityError::Timeout`] converted into the
/// caller's error type, so every call site handles it like any other failure.
pub async fn with_timeout<T, E, F>(operation: &str, bound: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<CapabilityError>,
{
    match tokio::time::timeout(bound, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = bound.as_millis() as u64,
                "Capability call timed out"
            );
            Err(CapabilityError::timeout(operation, bound).into())
        }
    }
}
