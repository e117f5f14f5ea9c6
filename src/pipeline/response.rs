//! Caller-facing response shapes shared by both workflows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::pipeline::handlers::{BatchOutcome, StorageReport, StoredRecord};
use crate::pipeline::workflow::{ErrorKind, RunMeta, WorkflowError, WorkflowFailure};

/// An error the caller can show, tagged with a stable kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub detail: Value,
}

impl UserFacingError {
    pub fn unsupported_document_type(detected_type: &str, suggestions: &[String]) -> Self {
        Self {
            kind: ErrorKind::UnsupportedDocumentType,
            message: format!(
                "Documents of type '{detected_type}' are not supported yet. Supported types: {}.",
                suggestions.join(", ")
            ),
            detail: json!({ "detected_type": detected_type, "suggestions": suggestions }),
        }
    }

    pub fn routing(reason: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::RoutingError,
            message: "Your request could not be routed. Please try again.".to_string(),
            detail: json!({ "reason": reason.into() }),
        }
    }
}

impl From<&WorkflowFailure> for UserFacingError {
    fn from(failure: &WorkflowFailure) -> Self {
        let message = match failure.kind {
            ErrorKind::ExtractionParseFailure => {
                "We couldn't read structured data from this document. Please check the file and try again."
                    .to_string()
            }
            ErrorKind::UnsupportedDocumentType | ErrorKind::InvalidRequest => failure.message.clone(),
            ErrorKind::ImageProcessingFailure => {
                "We couldn't analyze this image. Please try a clearer photo or another file.".to_string()
            }
            ErrorKind::CapabilityTimeout => {
                "This is taking longer than expected. Please try again in a moment.".to_string()
            }
            ErrorKind::RoutingError => "Your request could not be routed. Please try again.".to_string(),
            ErrorKind::ProcessingFailure => {
                "Something went wrong while processing your request. Please try again.".to_string()
            }
        };
        Self {
            kind: failure.kind,
            message,
            detail: failure.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageScenario {
    Stored,
    PartialDuplicate,
    DuplicateSkipped,
    AnalysisOnly,
    NothingToStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSummary {
    pub records_stored: usize,
    pub duplicates_skipped: usize,
    pub records_rejected: usize,
    pub scenario: StorageScenario,
}

impl StorageSummary {
    pub fn from_report(report: &StorageReport) -> Self {
        let scenario = match report.outcome {
            BatchOutcome::Stored => StorageScenario::Stored,
            BatchOutcome::PartialDuplicate => StorageScenario::PartialDuplicate,
            BatchOutcome::DuplicateSkipped => StorageScenario::DuplicateSkipped,
            BatchOutcome::NothingToStore => StorageScenario::NothingToStore,
        };
        Self {
            records_stored: report.created,
            duplicates_skipped: report.duplicates_skipped,
            records_rejected: report.rejected,
            scenario,
        }
    }

    /// Extraction used for answering only; nothing persisted.
    pub fn analysis_only() -> Self {
        Self {
            records_stored: 0,
            duplicates_skipped: 0,
            records_rejected: 0,
            scenario: StorageScenario::AnalysisOnly,
        }
    }

    pub fn status_message(&self, category: &str) -> String {
        let rejected = if self.records_rejected > 0 {
            format!(" {} entr(ies) could not be read and were skipped.", self.records_rejected)
        } else {
            String::new()
        };
        match self.scenario {
            StorageScenario::Stored => format!(
                "Saved {} new {category} record(s).{rejected}",
                self.records_stored
            ),
            StorageScenario::PartialDuplicate => format!(
                "Saved {} new {category} record(s); {} duplicate(s) were already on file.{rejected}",
                self.records_stored, self.duplicates_skipped
            ),
            StorageScenario::DuplicateSkipped => format!(
                "No new data: all {} duplicate(s) are already in your {category} records.{rejected}",
                self.duplicates_skipped
            ),
            StorageScenario::AnalysisOnly => {
                format!("Analyzed your {category} document to answer your question; nothing was saved.")
            }
            StorageScenario::NothingToStore => {
                format!("No {category} records could be saved from this document.{rejected}")
            }
        }
    }
}

/// Result of a question answered from records or general knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationSummary {
    /// `single_domain`, `multi_domain` or `consultation`.
    pub route: String,
    pub domains_consulted: Vec<String>,
    pub records_considered: usize,
}

/// What every public entry point returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub request_id: Uuid,
    pub success: bool,
    pub category: Option<String>,
    pub extracted_data: Option<Value>,
    pub retrieved_data: Option<Value>,
    pub storage: Option<StorageSummary>,
    /// Records created by this request; duplicates and rejects excluded.
    pub stored_records: Vec<StoredRecord>,
    pub processing_status_message: Option<String>,
    pub answer: Option<String>,
    pub answer_filtered: bool,
    pub consultation: Option<ConsultationSummary>,
    pub error: Option<UserFacingError>,
    pub partial_data: Option<Value>,
    pub step_timings: BTreeMap<String, u64>,
}

impl WorkflowResponse {
    pub fn new(meta: &RunMeta) -> Self {
        Self {
            request_id: meta.request_id,
            success: !meta.has_error(),
            category: None,
            extracted_data: None,
            retrieved_data: None,
            storage: None,
            stored_records: Vec::new(),
            processing_status_message: None,
            answer: None,
            answer_filtered: false,
            consultation: None,
            error: meta.error.as_ref().map(UserFacingError::from),
            partial_data: None,
            step_timings: meta.step_timings.clone(),
        }
    }

    /// Failed response for a run the engine itself aborted.
    pub fn from_engine_error(request_id: Uuid, err: &WorkflowError) -> Self {
        tracing::error!(%request_id, error = %err, "Workflow aborted");
        Self {
            request_id,
            success: false,
            category: None,
            extracted_data: None,
            retrieved_data: None,
            storage: None,
            stored_records: Vec::new(),
            processing_status_message: None,
            answer: None,
            answer_filtered: false,
            consultation: None,
            error: Some(UserFacingError::routing(err.to_string())),
            partial_data: None,
            step_timings: BTreeMap::new(),
        }
    }

    /// Records a failure after the run, keeping whatever was already filled.
    pub fn fail(&mut self, failure: &WorkflowFailure) {
        self.success = false;
        self.error = Some(UserFacingError::from(failure));
    }
}
