use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::context::{AcceptedText, CachedExtraction};
use crate::pipeline::handlers::{DomainDataset, ExtractionResult, StorageReport};
use crate::pipeline::response::WorkflowResponse;
use crate::pipeline::structuring::DocumentClassification;
use crate::pipeline::workflow::{RunMeta, StepState};

/// One uploaded document to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub file_path: PathBuf,
    pub file_type: String,
    /// With a question the document is analyzed, not filed.
    pub user_question: Option<String>,
    pub cached_extraction: Option<CachedExtraction>,
}

impl DocumentRequest {
    pub fn new(file_path: impl Into<PathBuf>, file_type: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_type: file_type.into(),
            user_question: None,
            cached_extraction: None,
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.user_question = Some(question.into()).filter(|q: &String| !q.trim().is_empty());
        self
    }

    pub fn with_cached_extraction(mut self, cached: CachedExtraction) -> Self {
        self.cached_extraction = Some(cached);
        self
    }

    pub fn source_document(&self) -> String {
        self.file_path.display().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub meta: RunMeta,
    pub request: DocumentRequest,
    pub text: Option<AcceptedText>,
    pub classification: Option<DocumentClassification>,
    pub extraction: Option<ExtractionResult>,
    pub storage: Option<StorageReport>,
    /// Earlier records of the same category, loaded to answer a question.
    pub history: Option<DomainDataset>,
    pub response: Option<WorkflowResponse>,
}

impl DocumentState {
    pub fn new(request: DocumentRequest, user_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            meta: RunMeta::new(user_id, session_id),
            request,
            text: None,
            classification: None,
            extraction: None,
            storage: None,
            history: None,
            response: None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.classification.as_ref().map(|c| c.category.as_str())
    }
}

impl StepState for DocumentState {
    fn meta(&self) -> &RunMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RunMeta {
        &mut self.meta
    }
}
