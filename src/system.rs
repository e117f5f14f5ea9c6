//! Public entry points: one long-lived [`AgentSystem`] serves every request.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::capabilities::{LanguageModel, SafetyValidator, Storage, TextExtractor};
use crate::config::{self, OrchestratorConfig};
use crate::db::{DatabaseError, SqliteStorage};
use crate::pipeline::context::{AgentContext, CachedExtraction};
use crate::pipeline::coordinator::{Coordinator, CustomerRequest, UploadedFile};
use crate::pipeline::handlers::{HandlerDeps, HandlerRegistry};
use crate::pipeline::processor::{DocumentProcessor, DocumentRequest};
use crate::pipeline::response::WorkflowResponse;
use crate::pipeline::workflow::WorkflowError;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Workflow graph error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Both workflows over one shared set of capabilities and handlers.
pub struct AgentSystem {
    context: Arc<AgentContext>,
    processor: DocumentProcessor,
    coordinator: Coordinator,
}

impl AgentSystem {
    /// Builds the system with the built-in vitals, lab, prescription and
    /// pharmacy handlers over `storage`.
    pub fn new(
        config: OrchestratorConfig,
        llm: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
        safety: Arc<dyn SafetyValidator>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, SystemError> {
        let deps = HandlerDeps::new(llm.clone(), storage)
            .with_timeouts(config.timeouts)
            .with_max_prompt_chars(config.max_prompt_chars);
        let registry = HandlerRegistry::with_builtin_handlers(deps);
        Self::with_registry(config, llm, extractor, safety, registry)
    }

    /// Builds the system over a caller-assembled registry, e.g. one holding
    /// extension handlers for image domains.
    pub fn with_registry(
        config: OrchestratorConfig,
        llm: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
        safety: Arc<dyn SafetyValidator>,
        registry: HandlerRegistry,
    ) -> Result<Self, SystemError> {
        let context = Arc::new(AgentContext {
            config,
            llm,
            extractor,
            safety,
            registry,
        });
        let processor = DocumentProcessor::build(context.clone())?;
        let coordinator = Coordinator::build(context.clone())?;
        tracing::info!(
            "{} v{} ready with handlers: {}",
            config::APP_NAME,
            config::APP_VERSION,
            context.registry.categories().join(", ")
        );
        Ok(Self {
            context,
            processor,
            coordinator,
        })
    }

    /// Opens (or creates) the record database under the application data
    /// directory and builds the system over it.
    pub fn open_default(
        config: OrchestratorConfig,
        llm: Arc<dyn LanguageModel>,
        extractor: Arc<dyn TextExtractor>,
        safety: Arc<dyn SafetyValidator>,
    ) -> Result<Self, SystemError> {
        std::fs::create_dir_all(config::app_data_dir())?;
        let storage = SqliteStorage::open(&config::database_path())?;
        Self::new(config, llm, extractor, safety, Arc::new(storage))
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.context.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.context.config
    }

    /// Processes one uploaded document. With a question the document is
    /// analyzed and answered about but not stored.
    pub async fn process_document(
        &self,
        file_path: impl Into<PathBuf>,
        file_type: &str,
        user_id: &str,
        session_id: Option<String>,
        user_question: Option<String>,
        cached_extraction: Option<CachedExtraction>,
    ) -> WorkflowResponse {
        let mut request = DocumentRequest::new(file_path, file_type);
        if let Some(question) = user_question {
            request = request.with_question(question);
        }
        if let Some(cached) = cached_extraction {
            request = request.with_cached_extraction(cached);
        }
        self.processor.process(request, user_id, session_id).await
    }

    /// Serves a chat turn: a message, a file, or both.
    pub async fn process_customer_request(
        &self,
        user_message: Option<String>,
        user_id: &str,
        session_id: Option<String>,
        uploaded_file: Option<UploadedFile>,
    ) -> WorkflowResponse {
        let request = CustomerRequest::new(user_message, uploaded_file);
        self.coordinator.handle(request, user_id, session_id).await
    }
}
