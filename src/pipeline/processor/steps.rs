use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::state::DocumentState;
use crate::config::OCR_PREVIEW_CHARS;
use crate::pipeline::context::{capability_failure, handler_failure, AgentContext};
use crate::pipeline::handlers::{RetrievalStrategy, StorageReport};
use crate::pipeline::response::{StorageSummary, WorkflowResponse};
use crate::pipeline::structuring::prompt::{document_answer_messages, truncate_for_prompt};
use crate::pipeline::structuring::{classify_document, excerpt};
use crate::pipeline::workflow::{ErrorKind, Step, WorkflowFailure};

pub const EXTRACT_TEXT: &str = "extract_text";
pub const CLASSIFY_DOCUMENT: &str = "classify_document";
pub const PROCESS_WITH_AGENTS: &str = "process_with_agents";
pub const GENERATE_RESPONSE: &str = "generate_response";
pub const HANDLE_ERROR: &str = "handle_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    ExtractText,
    ClassifyDocument,
    ProcessWithAgents,
    GenerateResponse,
    HandleError,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractText => EXTRACT_TEXT,
            Self::ClassifyDocument => CLASSIFY_DOCUMENT,
            Self::ProcessWithAgents => PROCESS_WITH_AGENTS,
            Self::GenerateResponse => GENERATE_RESPONSE,
            Self::HandleError => HANDLE_ERROR,
        }
    }
}

/// One document-workflow step bound to the shared context.
pub struct DocumentStep {
    kind: StepKind,
    ctx: Arc<AgentContext>,
}

impl DocumentStep {
    pub fn new(kind: StepKind, ctx: Arc<AgentContext>) -> Self {
        Self { kind, ctx }
    }

    async fn extract_text(&self, mut state: DocumentState) -> DocumentState {
        let result = self
            .ctx
            .acquire_text(
                EXTRACT_TEXT,
                &state.request.file_path,
                &state.request.file_type,
                state.request.cached_extraction.as_ref(),
            )
            .await;
        match result {
            Ok(text) => state.text = Some(text),
            Err(failure) => state.meta.set_error(failure),
        }
        state
    }

    async fn classify_document(&self, mut state: DocumentState) -> DocumentState {
        let Some(text) = &state.text else {
            return state;
        };
        let config = &self.ctx.config;
        let classification = classify_document(
            self.ctx.llm.as_ref(),
            &text.text,
            &self.ctx.registry.categories(),
            &config.default_document_category,
            config.timeouts.llm,
            config.max_prompt_chars,
        )
        .await;
        if let Some(detected) = classification.unsupported_type() {
            // The chat coordinator rejects these; here they fall through to the default.
            tracing::warn!(
                request_id = %state.meta.request_id,
                detected,
                default = %classification.category,
                "Unsupported document type filed under default category"
            );
        }
        tracing::info!(
            request_id = %state.meta.request_id,
            category = %classification.category,
            fallback = classification.fallback_used,
            "Document classified"
        );
        state.classification = Some(classification);
        state
    }

    async fn process_with_agents(&self, mut state: DocumentState) -> DocumentState {
        let text = state.text.as_ref().map(|t| t.text.clone());
        let category = state.category().map(str::to_string);
        let (Some(text), Some(category)) = (text, category) else {
            state.meta.set_error(WorkflowFailure::new(
                ErrorKind::ProcessingFailure,
                PROCESS_WITH_AGENTS,
                "Document was not classified",
            ));
            return state;
        };
        let Some(handler) = self.ctx.registry.get(&category) else {
            state.meta.set_error(
                WorkflowFailure::new(
                    ErrorKind::ProcessingFailure,
                    PROCESS_WITH_AGENTS,
                    format!("No handler registered for '{category}'"),
                )
                .with_detail(json!({ "category": category })),
            );
            return state;
        };

        let source = state.request.source_document();
        let hctx = self.ctx.handler_context(&state.meta, Some(&source));

        let extraction = match handler.extract(&text, &hctx).await {
            Ok(extraction) => extraction,
            Err(e) => {
                state.meta.set_error(handler_failure(PROCESS_WITH_AGENTS, &category, &e));
                return state;
            }
        };

        if state.request.user_question.is_some() {
            // Analyze, don't file: history is context for the answer only.
            let strategy = RetrievalStrategy::new(
                self.ctx.config.history_lookback_days,
                self.ctx.config.history_limit,
            );
            match handler.retrieve(&strategy, &hctx).await {
                Ok(history) => state.history = Some(history),
                Err(e) => tracing::warn!(category = %category, error = %e, "History unavailable for answer"),
            }
        } else {
            match handler.store(&extraction, &hctx).await {
                Ok(report) => state.storage = Some(report),
                Err(e) => {
                    state.extraction = Some(extraction);
                    state.meta.set_error(handler_failure(PROCESS_WITH_AGENTS, &category, &e));
                    return state;
                }
            }
        }

        state.extraction = Some(extraction);
        state
    }

    async fn generate_response(&self, mut state: DocumentState) -> DocumentState {
        let mut response = WorkflowResponse::new(&state.meta);
        let category = state.category().unwrap_or_default().to_string();
        response.category = Some(category.clone());
        response.extracted_data = state.extraction.as_ref().map(|e| e.payload.to_json());

        let summary = match (&state.request.user_question, &state.storage) {
            (Some(_), _) => StorageSummary::analysis_only(),
            (None, Some(report)) => {
                response.stored_records = report.created_records();
                StorageSummary::from_report(report)
            }
            (None, None) => StorageSummary::from_report(&StorageReport::from_records(category.as_str(), Vec::new())),
        };
        response.processing_status_message = Some(summary.status_message(&category));
        response.storage = Some(summary);

        if let Some(question) = state.request.user_question.clone() {
            response.retrieved_data = state
                .history
                .as_ref()
                .and_then(|h| serde_json::to_value(h).ok());

            let max_chars = self.ctx.config.max_prompt_chars;
            let extracted = response
                .extracted_data
                .as_ref()
                .map(|d| truncate_for_prompt(&d.to_string(), max_chars))
                .unwrap_or_default();
            let history = state
                .history
                .as_ref()
                .filter(|h| !h.is_empty())
                .and_then(|h| serde_json::to_string(h).ok())
                .map(|h| truncate_for_prompt(&h, max_chars));
            let messages = document_answer_messages(&question, &category, &extracted, history.as_deref());

            match self.ctx.complete("llm.answer_document", &messages).await {
                Ok(answer) => {
                    let (answer, filtered) = self.ctx.screen_answer(answer).await;
                    response.answer = Some(answer);
                    response.answer_filtered = filtered;
                }
                Err(e) => response.fail(&capability_failure(GENERATE_RESPONSE, &e)),
            }
        }

        state.response = Some(response);
        state
    }

    async fn handle_error(&self, mut state: DocumentState) -> DocumentState {
        let mut response = WorkflowResponse::new(&state.meta);
        response.success = false;
        response.category = state.category().map(str::to_string);
        response.extracted_data = state.extraction.as_ref().map(|e| e.payload.to_json());
        response.partial_data = Some(json!({
            "ocr_preview": state.text.as_ref().map(|t| excerpt(&t.text, OCR_PREVIEW_CHARS)),
            "category": state.category(),
        }));
        state.response = Some(response);
        state
    }
}

#[async_trait]
impl Step<DocumentState> for DocumentStep {
    async fn run(&self, state: DocumentState) -> DocumentState {
        match self.kind {
            StepKind::ExtractText => self.extract_text(state).await,
            StepKind::ClassifyDocument => self.classify_document(state).await,
            StepKind::ProcessWithAgents => self.process_with_agents(state).await,
            StepKind::GenerateResponse => self.generate_response(state).await,
            StepKind::HandleError => self.handle_error(state).await,
        }
    }
}
