//! Document processing workflow:
//! `extract_text → classify_document → process_with_agents → generate_response`,
//! with `handle_error` as the terminal error path.

pub mod state;
pub mod steps;

use std::sync::Arc;

pub use state::{DocumentRequest, DocumentState};
pub use steps::{DocumentStep, StepKind};

use steps::{CLASSIFY_DOCUMENT, EXTRACT_TEXT, GENERATE_RESPONSE, HANDLE_ERROR, PROCESS_WITH_AGENTS};

use crate::pipeline::context::AgentContext;
use crate::pipeline::response::WorkflowResponse;
use crate::pipeline::workflow::{CompiledWorkflow, ExecutionConfig, WorkflowBuilder, WorkflowError};

/// Route label out of `classify_document`.
pub fn classification_route(state: &DocumentState) -> String {
    if state.meta.has_error() {
        "error".to_string()
    } else {
        "process".to_string()
    }
}

pub struct DocumentProcessor {
    workflow: CompiledWorkflow<DocumentState>,
}

impl DocumentProcessor {
    pub fn build(ctx: Arc<AgentContext>) -> Result<Self, WorkflowError> {
        let step = |kind: StepKind| DocumentStep::new(kind, ctx.clone());
        let workflow = WorkflowBuilder::new("document_processing")
            .register_step(EXTRACT_TEXT, step(StepKind::ExtractText))
            .register_step(CLASSIFY_DOCUMENT, step(StepKind::ClassifyDocument))
            .register_step(PROCESS_WITH_AGENTS, step(StepKind::ProcessWithAgents))
            .register_step(GENERATE_RESPONSE, step(StepKind::GenerateResponse))
            .register_step(HANDLE_ERROR, step(StepKind::HandleError))
            .set_entry(EXTRACT_TEXT)
            .set_error_step(HANDLE_ERROR)
            .register_edge(EXTRACT_TEXT, CLASSIFY_DOCUMENT)
            .register_conditional(
                CLASSIFY_DOCUMENT,
                classification_route,
                &[("process", PROCESS_WITH_AGENTS), ("error", HANDLE_ERROR)],
            )
            .register_edge(PROCESS_WITH_AGENTS, GENERATE_RESPONSE)
            .with_config(ExecutionConfig {
                max_steps: ctx.config.max_steps,
            })
            .compile()?;
        Ok(Self { workflow })
    }

    /// Runs one document through the workflow. Always returns a response.
    pub async fn process(
        &self,
        request: DocumentRequest,
        user_id: &str,
        session_id: Option<String>,
    ) -> WorkflowResponse {
        let state = DocumentState::new(request, user_id, session_id);
        let request_id = state.meta.request_id;
        tracing::info!(%request_id, user_id, file_type = %state.request.file_type, "Processing document");

        match self.workflow.run(state).await {
            Ok(state) => {
                let mut response = state
                    .response
                    .unwrap_or_else(|| WorkflowResponse::new(&state.meta));
                response.step_timings = state.meta.step_timings;
                response
            }
            Err(e) => WorkflowResponse::from_engine_error(request_id, &e),
        }
    }
}
