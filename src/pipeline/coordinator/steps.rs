use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::fanout::{assess_all, retrieve_selected, select_relevant};
use super::intent::{classify_document_relevance, classify_message_type, classify_upload_intent};
use super::routing::{route_question, RoutingPolicy};
use super::state::{
    CoordinatorState, DocumentRelevance, DomainContribution, FileContext, RequestPlan, RequestType,
    RouteKind, UploadIntent,
};
use crate::capabilities::{ChatMessage, ValidationContext};
use crate::config::OCR_PREVIEW_CHARS;
use crate::pipeline::context::{capability_failure, handler_failure, AcceptedText, AgentContext};
use crate::pipeline::handlers::HandlerError;
use crate::pipeline::response::{ConsultationSummary, StorageSummary, UserFacingError, WorkflowResponse};
use crate::pipeline::structuring::prompt::{
    consultation_messages, document_answer_messages, domain_answer_messages, truncate_for_prompt,
};
use crate::pipeline::structuring::{classify_document, excerpt, IMAGE_DOMAINS};
use crate::pipeline::workflow::{ErrorKind, Step, WorkflowFailure};

pub const ANALYZE_REQUEST: &str = "analyze_request";
pub const SMART_FILE_QUESTION_ROUTER: &str = "smart_file_question_router";
pub const PROCESS_FILE: &str = "process_file";
pub const MEDICAL_DOCTOR: &str = "medical_doctor";
pub const RETRIEVE_DOMAIN_DATA: &str = "retrieve_domain_data";
pub const MULTI_DOMAIN_RETRIEVAL: &str = "multi_domain_retrieval";
pub const GENERATE_RESPONSE: &str = "generate_response";
pub const HANDLE_ERROR: &str = "handle_error";

/// Source label for measurements reported in a chat message.
const MESSAGE_SOURCE: &str = "user_message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorStepKind {
    AnalyzeRequest,
    SmartFileQuestionRouter,
    ProcessFile,
    MedicalDoctor,
    RetrieveDomainData,
    MultiDomainRetrieval,
    GenerateResponse,
    HandleError,
}

impl CoordinatorStepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AnalyzeRequest => ANALYZE_REQUEST,
            Self::SmartFileQuestionRouter => SMART_FILE_QUESTION_ROUTER,
            Self::ProcessFile => PROCESS_FILE,
            Self::MedicalDoctor => MEDICAL_DOCTOR,
            Self::RetrieveDomainData => RETRIEVE_DOMAIN_DATA,
            Self::MultiDomainRetrieval => MULTI_DOMAIN_RETRIEVAL,
            Self::GenerateResponse => GENERATE_RESPONSE,
            Self::HandleError => HANDLE_ERROR,
        }
    }
}

pub struct CoordinatorStep {
    kind: CoordinatorStepKind,
    ctx: Arc<AgentContext>,
}

fn invalid_request(step: &str, message: &str) -> WorkflowFailure {
    WorkflowFailure::new(ErrorKind::InvalidRequest, step, message)
}

fn unsupported_type(step: &str, detected: &str, suggestions: &[String]) -> WorkflowFailure {
    let error = UserFacingError::unsupported_document_type(detected, suggestions);
    WorkflowFailure::new(ErrorKind::UnsupportedDocumentType, step, error.message).with_detail(error.detail)
}

fn image_failure(step: &str, image_domain: &str, err: &HandlerError) -> WorkflowFailure {
    WorkflowFailure::new(
        ErrorKind::ImageProcessingFailure,
        step,
        format!("The {image_domain} analysis failed: {err}"),
    )
    .with_detail(json!({ "image_domain": image_domain, "reason": err.to_string() }))
}

impl CoordinatorStep {
    pub fn new(kind: CoordinatorStepKind, ctx: Arc<AgentContext>) -> Self {
        Self { kind, ctx }
    }

    async fn analyze_request(&self, mut state: CoordinatorState) -> CoordinatorState {
        let has_file = state.request.uploaded_file.is_some();
        let timeout = self.ctx.config.timeouts.llm;
        let llm = self.ctx.llm.as_ref();

        let plan = match (has_file, state.request.user_message.clone()) {
            (false, None) => {
                state.meta.set_error(invalid_request(
                    ANALYZE_REQUEST,
                    "Please upload a file or type a message.",
                ));
                return state;
            }
            (true, None) => RequestPlan::for_type(RequestType::FileOnly),
            (false, Some(message)) => {
                RequestPlan::for_type(classify_message_type(llm, &message, timeout).await)
            }
            (true, Some(message)) => match classify_upload_intent(llm, &message, timeout).await {
                Some(intent) => RequestPlan::from_intent(intent),
                // Left for the smart router to settle.
                None => RequestPlan::for_type(RequestType::FileAndQuestion),
            },
        };

        tracing::info!(
            request_id = %state.meta.request_id,
            request_type = plan.request_type.as_str(),
            intent = ?plan.intent,
            "Request analyzed"
        );
        state.plan = Some(plan);
        state
    }

    async fn smart_file_question_router(&self, mut state: CoordinatorState) -> CoordinatorState {
        let question = state.question().map(str::to_string);
        let preview = state
            .request
            .uploaded_file
            .as_ref()
            .and_then(|f| f.cached_extraction.as_ref())
            .map(|c| excerpt(&c.text, OCR_PREVIEW_CHARS));
        let preview = match preview {
            // Untrusted until screened, like any extracted text.
            Some(preview) => self
                .ctx
                .screen_input(SMART_FILE_QUESTION_ROUTER, &preview, ValidationContext::ExtractedText)
                .await
                .ok()
                .map(|(text, _)| text),
            None => None,
        };
        let (Some(question), Some(plan)) = (question, state.plan.clone()) else {
            state.meta.set_error(invalid_request(
                SMART_FILE_QUESTION_ROUTER,
                "A question is required with this upload.",
            ));
            return state;
        };

        let plan = match plan.intent {
            Some(_) => plan,
            None => {
                let relevance = classify_document_relevance(
                    self.ctx.llm.as_ref(),
                    &question,
                    true,
                    preview.as_deref(),
                    self.ctx.config.timeouts.llm,
                )
                .await;
                let intent = match relevance {
                    DocumentRelevance::DocumentSpecific => UploadIntent::AskDocument,
                    DocumentRelevance::General => UploadIntent::AskHistory,
                };
                tracing::info!(relevance = relevance.as_str(), "Upload intent settled by document relevance");
                RequestPlan::from_intent(intent)
            }
        };

        if !plan.requires_file_processing {
            tracing::info!(request_id = %state.meta.request_id, "General question; upload left out of context");
            state.file_in_context = false;
        }
        state.plan = Some(plan);
        state
    }

    async fn acquire(&self, state: &CoordinatorState) -> Result<(AcceptedText, String), WorkflowFailure> {
        if let Some(file) = &state.request.uploaded_file {
            let text = self
                .ctx
                .acquire_text(
                    PROCESS_FILE,
                    &file.file_path,
                    &file.file_type,
                    file.cached_extraction.as_ref(),
                )
                .await?;
            return Ok((text, file.source_document()));
        }

        let is_update = state
            .plan
            .as_ref()
            .is_some_and(|p| p.request_type == RequestType::DataUpdate);
        match (is_update, state.question()) {
            (true, Some(message)) => {
                let (text, filtered) = self
                    .ctx
                    .screen_input(PROCESS_FILE, message, ValidationContext::UserInput)
                    .await?;
                Ok((
                    AcceptedText {
                        text,
                        confidence: 1.0,
                        filtered,
                    },
                    MESSAGE_SOURCE.to_string(),
                ))
            }
            _ => Err(invalid_request(PROCESS_FILE, "There is nothing to process.")),
        }
    }

    async fn process_file(&self, mut state: CoordinatorState) -> CoordinatorState {
        let stores = state.plan.as_ref().is_some_and(RequestPlan::stores);
        let (text, source) = match self.acquire(&state).await {
            Ok(acquired) => acquired,
            Err(failure) => {
                state.meta.set_error(failure);
                return state;
            }
        };

        let config = &self.ctx.config;
        let allowed = self.ctx.registry.categories();
        let classification = classify_document(
            self.ctx.llm.as_ref(),
            &text.text,
            &allowed,
            &config.default_document_category,
            config.timeouts.llm,
            config.max_prompt_chars,
        )
        .await;
        let category = classification.category.clone();
        let unsupported = classification.unsupported_type().map(str::to_string);

        let mut file = FileContext {
            source: source.clone(),
            text,
            classification,
            extraction: None,
            storage: None,
        };

        if let Some(detected) = unsupported {
            tracing::info!(detected = %detected, "Document type not supported");
            state.file = Some(file);
            state.meta.set_error(unsupported_type(PROCESS_FILE, &detected, &allowed));
            return state;
        }

        let Some(handler) = self.ctx.registry.get(&category) else {
            state.file = Some(file);
            state.meta.set_error(unsupported_type(PROCESS_FILE, &category, &allowed));
            return state;
        };

        let hctx = self.ctx.handler_context(&state.meta, Some(&source));
        let extraction = match handler.extract(&file.text.text, &hctx).await {
            Ok(extraction) => extraction,
            Err(e) => {
                let failure = if IMAGE_DOMAINS.contains(&category.as_str()) {
                    image_failure(PROCESS_FILE, &category, &e)
                } else {
                    handler_failure(PROCESS_FILE, &category, &e)
                };
                state.file = Some(file);
                state.meta.set_error(failure);
                return state;
            }
        };

        if stores {
            match handler.store(&extraction, &hctx).await {
                Ok(report) => file.storage = Some(report),
                Err(e) => state.meta.set_error(handler_failure(PROCESS_FILE, &category, &e)),
            }
        }
        file.extraction = Some(extraction);
        state.file = Some(file);
        state
    }

    async fn medical_doctor(&self, mut state: CoordinatorState) -> CoordinatorState {
        let Some(question) = state.question().map(str::to_string) else {
            state
                .meta
                .set_error(invalid_request(MEDICAL_DOCTOR, "There is no question to answer."));
            return state;
        };
        let config = &self.ctx.config;
        let llm = self.ctx.llm.as_ref();

        let preview = state
            .file_context()
            .map(|f| excerpt(&f.text.text, OCR_PREVIEW_CHARS));
        if let Some(preview) = preview {
            let relevance =
                classify_document_relevance(llm, &question, true, Some(&preview), config.timeouts.llm).await;
            if relevance == DocumentRelevance::General {
                tracing::info!(request_id = %state.meta.request_id, "General question; upload left out of context");
                state.file_in_context = false;
            }
        }

        let policy = RoutingPolicy {
            confidence_threshold: config.routing_confidence_threshold,
            default_domain: config.default_question_domain.clone(),
        };
        let decision = route_question(
            llm,
            &question,
            &self.ctx.registry.categories(),
            &policy,
            config.timeouts.llm,
        )
        .await;
        tracing::info!(
            request_id = %state.meta.request_id,
            route = decision.route.as_str(),
            domain = ?decision.domain,
            confidence = decision.confidence,
            "Question routed"
        );
        state.routing = Some(decision);
        state
    }

    async fn retrieve_domain_data(&self, mut state: CoordinatorState) -> CoordinatorState {
        let routed = state
            .routing
            .as_ref()
            .and_then(|r| r.domain.clone().map(|d| (d, r.confidence)));
        let Some((domain, confidence)) = routed else {
            state.meta.set_error(WorkflowFailure::new(
                ErrorKind::ProcessingFailure,
                RETRIEVE_DOMAIN_DATA,
                "No domain was selected",
            ));
            return state;
        };
        let Some(handler) = self.ctx.registry.get(&domain) else {
            state.meta.set_error(
                WorkflowFailure::new(
                    ErrorKind::ProcessingFailure,
                    RETRIEVE_DOMAIN_DATA,
                    format!("No handler registered for '{domain}'"),
                )
                .with_detail(json!({ "category": domain })),
            );
            return state;
        };

        let hctx = self.ctx.handler_context(&state.meta, None);
        match handler.retrieve(&handler.default_strategy(), &hctx).await {
            Ok(dataset) => {
                tracing::info!(category = %domain, records = dataset.records.len(), "Domain data retrieved");
                state.retrieved = vec![DomainContribution {
                    category: domain,
                    relevance_score: confidence,
                    dataset,
                }];
            }
            Err(e) => state
                .meta
                .set_error(handler_failure(RETRIEVE_DOMAIN_DATA, &domain, &e)),
        }
        state
    }

    async fn multi_domain_retrieval(&self, mut state: CoordinatorState) -> CoordinatorState {
        let Some(question) = state.question().map(str::to_string) else {
            return state;
        };
        let hctx = self.ctx.handler_context(&state.meta, None);
        let handlers = self.ctx.registry.handlers();

        let assessments = assess_all(&handlers, &question, &hctx).await;
        let selected = select_relevant(&assessments, self.ctx.config.relevance_threshold);
        tracing::info!(
            request_id = %state.meta.request_id,
            assessed = assessments.len(),
            selected = selected.len(),
            "Relevance fan-out finished"
        );
        let contributions = retrieve_selected(&handlers, &selected, &hctx).await;

        state.retrieved = contributions;
        state.assessments = assessments;
        state
    }

    /// Uploaded document and retrieved datasets, as prompt text.
    fn answer_context(&self, state: &CoordinatorState) -> Option<String> {
        let mut sections = Map::new();
        if let Some(extraction) = state.file_context().and_then(|f| f.extraction.as_ref()) {
            sections.insert(
                "uploaded_document".to_string(),
                json!({ "category": extraction.category, "data": extraction.payload.to_json() }),
            );
        }
        for contribution in state.retrieved.iter().filter(|c| !c.dataset.is_empty()) {
            sections.insert(
                contribution.category.clone(),
                serde_json::to_value(&contribution.dataset).unwrap_or(Value::Null),
            );
        }
        (!sections.is_empty()).then(|| {
            truncate_for_prompt(&Value::Object(sections).to_string(), self.ctx.config.max_prompt_chars)
        })
    }

    fn answer_messages(&self, state: &CoordinatorState, question: &str) -> Vec<ChatMessage> {
        let context = self.answer_context(state);
        match &state.routing {
            None => match state.file_context().and_then(|f| f.extraction.as_ref()) {
                Some(extraction) => {
                    let extracted = truncate_for_prompt(
                        &extraction.payload.to_json().to_string(),
                        self.ctx.config.max_prompt_chars,
                    );
                    document_answer_messages(question, &extraction.category, &extracted, None)
                }
                None => consultation_messages(question, None),
            },
            Some(routing) => match (routing.route, routing.domain.as_deref()) {
                (RouteKind::SingleDomain, Some(domain)) => domain_answer_messages(
                    question,
                    domain,
                    context
                        .as_deref()
                        .unwrap_or("No records found in the lookback window."),
                ),
                _ => consultation_messages(question, context.as_deref()),
            },
        }
    }

    async fn generate_response(&self, mut state: CoordinatorState) -> CoordinatorState {
        let mut response = WorkflowResponse::new(&state.meta);
        let answers = state.plan.as_ref().is_some_and(RequestPlan::answers_question);

        if let Some(file) = &state.file {
            let category = file.category().to_string();
            response.category = Some(category.clone());
            response.extracted_data = file.extraction.as_ref().map(|e| e.payload.to_json());
            let summary = match (&file.storage, answers) {
                (_, true) => StorageSummary::analysis_only(),
                (Some(report), false) => {
                    response.stored_records = report.created_records();
                    StorageSummary::from_report(report)
                }
                (None, false) => StorageSummary::analysis_only(),
            };
            response.processing_status_message = Some(summary.status_message(&category));
            response.storage = Some(summary);
        }

        if let (true, Some(question)) = (answers, state.question().map(str::to_string)) {
            if let Some(routing) = &state.routing {
                if response.category.is_none() {
                    response.category = routing.domain.clone();
                }
                response.consultation = Some(ConsultationSummary {
                    route: routing.route.as_str().to_string(),
                    domains_consulted: state.retrieved.iter().map(|c| c.category.clone()).collect(),
                    records_considered: state.retrieved.iter().map(|c| c.dataset.records.len()).sum(),
                });
            }
            if !state.retrieved.is_empty() {
                let retrieved: Map<String, Value> = state
                    .retrieved
                    .iter()
                    .map(|c| {
                        (
                            c.category.clone(),
                            serde_json::to_value(&c.dataset).unwrap_or(Value::Null),
                        )
                    })
                    .collect();
                response.retrieved_data = Some(Value::Object(retrieved));
            }

            let messages = self.answer_messages(&state, &question);
            match self.ctx.complete("llm.answer", &messages).await {
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

    async fn handle_error(&self, mut state: CoordinatorState) -> CoordinatorState {
        let mut response = WorkflowResponse::new(&state.meta);
        response.success = false;
        if let Some(file) = &state.file {
            response.category = Some(file.category().to_string());
            response.extracted_data = file.extraction.as_ref().map(|e| e.payload.to_json());
            response.partial_data = Some(json!({
                "ocr_preview": excerpt(&file.text.text, OCR_PREVIEW_CHARS),
                "category": file.category(),
            }));
        }
        state.response = Some(response);
        state
    }
}

#[async_trait]
impl Step<CoordinatorState> for CoordinatorStep {
    async fn run(&self, state: CoordinatorState) -> CoordinatorState {
        match self.kind {
            CoordinatorStepKind::AnalyzeRequest => self.analyze_request(state).await,
            CoordinatorStepKind::SmartFileQuestionRouter => self.smart_file_question_router(state).await,
            CoordinatorStepKind::ProcessFile => self.process_file(state).await,
            CoordinatorStepKind::MedicalDoctor => self.medical_doctor(state).await,
            CoordinatorStepKind::RetrieveDomainData => self.retrieve_domain_data(state).await,
            CoordinatorStepKind::MultiDomainRetrieval => self.multi_domain_retrieval(state).await,
            CoordinatorStepKind::GenerateResponse => self.generate_response(state).await,
            CoordinatorStepKind::HandleError => self.handle_error(state).await,
        }
    }
}
