use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::context::{AcceptedText, CachedExtraction};
use crate::pipeline::handlers::{DomainDataset, ExtractionResult, RelevanceAssessment, StorageReport};
use crate::pipeline::response::WorkflowResponse;
use crate::pipeline::structuring::DocumentClassification;
use crate::pipeline::workflow::{RunMeta, StepState};

/// A file attached to a customer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_path: PathBuf,
    pub file_type: String,
    pub cached_extraction: Option<CachedExtraction>,
}

impl UploadedFile {
    pub fn new(file_path: impl Into<PathBuf>, file_type: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_type: file_type.into(),
            cached_extraction: None,
        }
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
pub struct CustomerRequest {
    /// Blank messages are stored as `None`.
    pub user_message: Option<String>,
    pub uploaded_file: Option<UploadedFile>,
}

impl CustomerRequest {
    pub fn new(user_message: Option<String>, uploaded_file: Option<UploadedFile>) -> Self {
        Self {
            user_message: user_message.filter(|m| !m.trim().is_empty()),
            uploaded_file,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    FileOnly,
    FileAndQuestion,
    QuestionOnly,
    /// A message reporting a new measurement, processed like a document.
    DataUpdate,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileOnly => "file_only",
            Self::FileAndQuestion => "file_and_question",
            Self::QuestionOnly => "question_only",
            Self::DataUpdate => "data_update",
        }
    }
}

/// What the user wants done with a file sent alongside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadIntent {
    UploadOnly,
    AskDocument,
    AskHistory,
    UploadAndCompare,
}

impl UploadIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadOnly => "upload_only",
            Self::AskDocument => "ask_document",
            Self::AskHistory => "ask_history",
            Self::UploadAndCompare => "upload_and_compare",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "upload_only" | "upload" | "save" | "store" => Some(Self::UploadOnly),
            "ask_document" | "document" | "document_question" => Some(Self::AskDocument),
            "ask_history" | "history" | "history_question" => Some(Self::AskHistory),
            "upload_and_compare" | "compare" | "upload_compare" => Some(Self::UploadAndCompare),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRelevance {
    DocumentSpecific,
    General,
}

impl DocumentRelevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentSpecific => "document_specific",
            Self::General => "general",
        }
    }
}

/// How a request will be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPlan {
    pub request_type: RequestType,
    pub intent: Option<UploadIntent>,
    pub requires_file_processing: bool,
    pub requires_data_retrieval: bool,
}

impl RequestPlan {
    pub fn for_type(request_type: RequestType) -> Self {
        let (file, retrieval) = match request_type {
            RequestType::FileOnly | RequestType::DataUpdate => (true, false),
            RequestType::QuestionOnly => (false, true),
            RequestType::FileAndQuestion => (true, false),
        };
        Self {
            request_type,
            intent: None,
            requires_file_processing: file,
            requires_data_retrieval: retrieval,
        }
    }

    /// Plan for a file sent with a message. `upload_only` is treated as a
    /// plain upload and stores; every other intent is analysis only.
    pub fn from_intent(intent: UploadIntent) -> Self {
        let (request_type, file, retrieval) = match intent {
            UploadIntent::UploadOnly => (RequestType::FileOnly, true, false),
            UploadIntent::AskDocument => (RequestType::FileAndQuestion, true, false),
            UploadIntent::AskHistory => (RequestType::FileAndQuestion, false, true),
            UploadIntent::UploadAndCompare => (RequestType::FileAndQuestion, true, true),
        };
        Self {
            request_type,
            intent: Some(intent),
            requires_file_processing: file,
            requires_data_retrieval: retrieval,
        }
    }

    /// Only plain uploads and reported measurements are persisted.
    pub fn stores(&self) -> bool {
        matches!(self.request_type, RequestType::FileOnly | RequestType::DataUpdate)
    }

    pub fn answers_question(&self) -> bool {
        matches!(
            self.request_type,
            RequestType::FileAndQuestion | RequestType::QuestionOnly
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    SingleDomain,
    MultiDomain,
    Consultation,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleDomain => "single_domain",
            Self::MultiDomain => "multi_domain",
            Self::Consultation => "consultation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: RouteKind,
    /// Set for single-domain routes.
    pub domain: Option<String>,
    pub confidence: f32,
    pub reasoning: String,
    /// The label the model gave before any correction.
    pub raw_label: String,
    /// True when a low-confidence or unclear answer was widened.
    pub widened: bool,
}

/// The processed upload (or reported measurement) kept for answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContext {
    pub source: String,
    pub text: AcceptedText,
    pub classification: DocumentClassification,
    pub extraction: Option<ExtractionResult>,
    pub storage: Option<StorageReport>,
}

impl FileContext {
    pub fn category(&self) -> &str {
        &self.classification.category
    }
}

/// Data one domain contributed to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainContribution {
    pub category: String,
    pub relevance_score: f32,
    pub dataset: DomainDataset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub meta: RunMeta,
    pub request: CustomerRequest,
    pub plan: Option<RequestPlan>,
    pub file: Option<FileContext>,
    /// False once a general question dropped the upload from the answer context.
    pub file_in_context: bool,
    pub routing: Option<RoutingDecision>,
    pub assessments: Vec<RelevanceAssessment>,
    pub retrieved: Vec<DomainContribution>,
    pub response: Option<WorkflowResponse>,
}

impl CoordinatorState {
    pub fn new(request: CustomerRequest, user_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            meta: RunMeta::new(user_id, session_id),
            request,
            plan: None,
            file: None,
            file_in_context: true,
            routing: None,
            assessments: Vec::new(),
            retrieved: Vec::new(),
            response: None,
        }
    }

    pub fn question(&self) -> Option<&str> {
        self.request.user_message.as_deref()
    }

    /// The processed file, if it still belongs in the answer context.
    pub fn file_context(&self) -> Option<&FileContext> {
        self.file.as_ref().filter(|_| self.file_in_context)
    }
}

impl StepState for CoordinatorState {
    fn meta(&self) -> &RunMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RunMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_messages_are_dropped() {
        let request = CustomerRequest::new(Some("   ".into()), None);
        assert!(request.user_message.is_none());
    }

    #[test]
    fn intent_flags() {
        let upload = RequestPlan::from_intent(UploadIntent::UploadOnly);
        assert_eq!(upload.request_type, RequestType::FileOnly);
        assert!(upload.stores());

        let history = RequestPlan::from_intent(UploadIntent::AskHistory);
        assert!(!history.requires_file_processing);
        assert!(history.requires_data_retrieval);
        assert!(!history.stores());

        let compare = RequestPlan::from_intent(UploadIntent::UploadAndCompare);
        assert!(compare.requires_file_processing && compare.requires_data_retrieval);
        assert!(!compare.stores());
    }

    #[test]
    fn intent_labels_are_lenient() {
        assert_eq!(UploadIntent::from_label("Upload Only"), Some(UploadIntent::UploadOnly));
        assert_eq!(UploadIntent::from_label("compare"), Some(UploadIntent::UploadAndCompare));
        assert_eq!(UploadIntent::from_label("banana"), None);
    }
}
