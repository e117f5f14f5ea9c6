use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Machine-readable failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExtractionParseFailure,
    UnsupportedDocumentType,
    ImageProcessingFailure,
    CapabilityTimeout,
    RoutingError,
    InvalidRequest,
    ProcessingFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractionParseFailure => "extraction_parse_failure",
            Self::UnsupportedDocumentType => "unsupported_document_type",
            Self::ImageProcessingFailure => "image_processing_failure",
            Self::CapabilityTimeout => "capability_timeout",
            Self::RoutingError => "routing_error",
            Self::InvalidRequest => "invalid_request",
            Self::ProcessingFailure => "processing_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error slot a step fills instead of returning an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    pub kind: ErrorKind,
    pub step: String,
    pub message: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl WorkflowFailure {
    pub fn new(kind: ErrorKind, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            step: step.into(),
            message: message.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Metadata every workflow state carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub request_id: Uuid,
    pub user_id: String,
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Step name to elapsed milliseconds, recorded by the engine.
    pub step_timings: BTreeMap<String, u64>,
    pub error: Option<WorkflowFailure>,
}

impl RunMeta {
    pub fn new(user_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id,
            started_at: Utc::now(),
            step_timings: BTreeMap::new(),
            error: None,
        }
    }

    pub fn record_step_time(&mut self, step: &str, elapsed_ms: u64) {
        self.step_timings.insert(step.to_string(), elapsed_ms);
    }

    /// Fills the error slot. The first failure wins.
    pub fn set_error(&mut self, failure: WorkflowFailure) {
        if self.error.is_none() {
            tracing::warn!(
                request_id = %self.request_id,
                step = %failure.step,
                kind = %failure.kind,
                "Workflow step failed: {}",
                failure.message
            );
            self.error = Some(failure);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A per-request state record the engine can drive.
pub trait StepState: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn meta(&self) -> &RunMeta;
    fn meta_mut(&mut self) -> &mut RunMeta;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let mut meta = RunMeta::new("u1", None);
        meta.set_error(WorkflowFailure::new(ErrorKind::InvalidRequest, "a", "first"));
        meta.set_error(WorkflowFailure::new(ErrorKind::ProcessingFailure, "b", "second"));
        let error = meta.error.unwrap();
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert_eq!(error.step, "a");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CapabilityTimeout).unwrap();
        assert_eq!(json, "\"capability_timeout\"");
        assert_eq!(ErrorKind::UnsupportedDocumentType.as_str(), "unsupported_document_type");
    }
}
