//! Capabilities and helpers shared by the steps of both workflows.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capabilities::{
    with_timeout, CapabilityError, ChatMessage, LanguageModel, SafetyValidator, TextExtractor,
    ValidationContext,
};
use crate::config::{OrchestratorConfig, DEFAULT_OCR_CONFIDENCE, SAFE_FALLBACK_MESSAGE};
use crate::pipeline::handlers::{HandlerContext, HandlerError, HandlerRegistry};
use crate::pipeline::workflow::{ErrorKind, RunMeta, WorkflowFailure};

/// Text a caller already extracted from the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedExtraction {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Document text accepted for processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedText {
    pub text: String,
    pub confidence: f32,
    /// True when the safety screen replaced the raw text.
    pub filtered: bool,
}

/// Everything a step needs besides its state. Built once, shared by all runs.
pub struct AgentContext {
    pub config: OrchestratorConfig,
    pub llm: Arc<dyn LanguageModel>,
    pub extractor: Arc<dyn TextExtractor>,
    pub safety: Arc<dyn SafetyValidator>,
    pub registry: HandlerRegistry,
}

impl AgentContext {
    pub fn handler_context(&self, meta: &RunMeta, source_document: Option<&str>) -> HandlerContext {
        HandlerContext {
            request_id: meta.request_id,
            user_id: meta.user_id.clone(),
            session_id: meta.session_id.clone(),
            source_document: source_document.map(str::to_string),
            today: self.config.today(),
        }
    }

    /// Cached text skips the extractor. Cached and fresh text alike are
    /// screened as untrusted input before use.
    pub async fn acquire_text(
        &self,
        step: &str,
        file_path: &Path,
        file_type: &str,
        cached: Option<&CachedExtraction>,
    ) -> Result<AcceptedText, WorkflowFailure> {
        let (raw, confidence) = match cached {
            Some(cached) => {
                tracing::debug!(chars = cached.text.len(), "Using cached extraction");
                (
                    cached.text.clone(),
                    cached.confidence.unwrap_or(DEFAULT_OCR_CONFIDENCE),
                )
            }
            None => {
                let extracted = with_timeout(
                    "extractor.extract",
                    self.config.timeouts.extraction,
                    self.extractor.extract(file_path, file_type),
                )
                .await
                .map_err(|e| capability_failure(step, &e))?;
                (extracted.text, extracted.confidence)
            }
        };

        if raw.trim().is_empty() {
            return Err(WorkflowFailure::new(
                ErrorKind::ProcessingFailure,
                step,
                "No text could be extracted from the document",
            ));
        }

        let (text, filtered) = self.screen_input(step, &raw, ValidationContext::ExtractedText).await?;
        Ok(AcceptedText {
            text,
            confidence,
            filtered,
        })
    }

    /// Screens untrusted text. Unsafe text with a usable filtered version is
    /// accepted in its filtered form.
    pub async fn screen_input(
        &self,
        step: &str,
        text: &str,
        context: ValidationContext,
    ) -> Result<(String, bool), WorkflowFailure> {
        let verdict = with_timeout(
            "safety.validate_input",
            self.config.timeouts.llm,
            self.safety.validate(text, context),
        )
        .await
        .map_err(|e| capability_failure(step, &e))?;

        if verdict.is_safe {
            return Ok((text.to_string(), false));
        }
        if !verdict.filtered_content.trim().is_empty() {
            tracing::warn!(
                step,
                violations = ?verdict.violations,
                "Untrusted text failed screening; continuing with filtered text"
            );
            return Ok((verdict.filtered_content, true));
        }
        Err(WorkflowFailure::new(
            ErrorKind::ProcessingFailure,
            step,
            "The document content could not be processed safely",
        )
        .with_detail(json!({ "violations": verdict.violations })))
    }

    /// Screens a generated answer. Returns the text to show and whether it
    /// was replaced by the fallback message.
    pub async fn screen_answer(&self, answer: String) -> (String, bool) {
        let verdict = with_timeout(
            "safety.validate_answer",
            self.config.timeouts.llm,
            self.safety.validate(&answer, ValidationContext::GeneratedAnswer),
        )
        .await;

        match verdict {
            Ok(v) if v.is_safe => (answer, false),
            Ok(v) => {
                tracing::warn!(violations = ?v.violations, "Generated answer flagged; using fallback");
                (SAFE_FALLBACK_MESSAGE.to_string(), true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Answer validation unavailable; using fallback");
                (SAFE_FALLBACK_MESSAGE.to_string(), true)
            }
        }
    }

    /// Free-text completion under the LLM bound.
    pub async fn complete(&self, operation: &str, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        let answer = with_timeout(operation, self.config.timeouts.llm, self.llm.invoke(messages)).await?;
        Ok(answer.trim().to_string())
    }
}

/// Maps a capability error onto the error slot.
pub fn capability_failure(step: &str, err: &CapabilityError) -> WorkflowFailure {
    match err {
        CapabilityError::Timeout {
            operation,
            timeout_ms,
        } => WorkflowFailure::new(
            ErrorKind::CapabilityTimeout,
            step,
            format!("{operation} did not finish in time"),
        )
        .with_detail(json!({ "operation": operation, "timeout_ms": timeout_ms })),
        other => WorkflowFailure::new(ErrorKind::ProcessingFailure, step, other.to_string()),
    }
}

/// Maps a handler error onto the error slot.
pub fn handler_failure(step: &str, category: &str, err: &HandlerError) -> WorkflowFailure {
    match err {
        HandlerError::Parse(parse) => WorkflowFailure::new(
            ErrorKind::ExtractionParseFailure,
            step,
            format!("Could not read structured {category} data: {}", parse.reason),
        )
        .with_detail(json!({ "category": category, "response_excerpt": parse.excerpt })),
        HandlerError::Capability(e) => capability_failure(step, e),
        other => WorkflowFailure::new(ErrorKind::ProcessingFailure, step, other.to_string())
            .with_detail(json!({ "category": category })),
    }
}
