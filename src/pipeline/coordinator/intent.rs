//! Request-level classifications. Each one degrades to a fixed default
//! instead of failing the run.

use std::time::Duration;

use serde::Deserialize;

use super::state::{DocumentRelevance, RequestType, UploadIntent};
use crate::capabilities::{with_timeout, CapabilityError, ChatMessage, LanguageModel};
use crate::models::lenient;
use crate::pipeline::structuring::prompt::{
    document_relevance_messages, message_type_messages, upload_intent_messages,
};
use crate::pipeline::structuring::salvage_json;

#[derive(Debug, Deserialize)]
struct RawLabel {
    #[serde(
        default,
        alias = "message_type",
        alias = "intent",
        alias = "relevance",
        deserialize_with = "lenient::opt_string"
    )]
    label: Option<String>,
}

/// Reads the label out of a JSON reply, or the first non-empty line of a
/// plain one.
fn read_label(reply: &str) -> Option<String> {
    let label = match salvage_json(reply) {
        Ok((value, _)) => serde_json::from_value::<RawLabel>(value).ok()?.label,
        Err(_) => reply.lines().find(|l| !l.trim().is_empty()).map(str::to_string),
    }?;
    let label = label
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '.')
        .to_lowercase()
        .replace([' ', '-'], "_");
    (!label.is_empty()).then_some(label)
}

async fn ask(
    llm: &dyn LanguageModel,
    operation: &str,
    timeout: Duration,
    messages: &[ChatMessage],
) -> Result<String, CapabilityError> {
    with_timeout(operation, timeout, llm.invoke(messages)).await
}

/// Question or reported measurement, for a message sent without a file.
/// Anything unreadable is treated as a question.
pub async fn classify_message_type(llm: &dyn LanguageModel, message: &str, timeout: Duration) -> RequestType {
    let reply = match ask(llm, "llm.classify_message", timeout, &message_type_messages(message)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "Message classification failed; treating as question");
            return RequestType::QuestionOnly;
        }
    };
    match read_label(&reply).as_deref() {
        Some("data_update" | "data" | "update" | "measurement" | "report") => RequestType::DataUpdate,
        Some("question") => RequestType::QuestionOnly,
        other => {
            tracing::info!(label = ?other, "Unrecognized message type; treating as question");
            RequestType::QuestionOnly
        }
    }
}

/// Intent for a message sent with a file. `None` when the model gave no
/// usable answer.
pub async fn classify_upload_intent(
    llm: &dyn LanguageModel,
    message: &str,
    timeout: Duration,
) -> Option<UploadIntent> {
    let reply = match ask(llm, "llm.classify_upload_intent", timeout, &upload_intent_messages(message)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "Upload intent classification failed");
            return None;
        }
    };
    let intent = read_label(&reply).and_then(|l| UploadIntent::from_label(&l));
    if intent.is_none() {
        tracing::info!("Upload intent unreadable");
    }
    intent
}

/// Whether answering `question` needs the attached document.
///
/// Without a file the answer is always `General` and no call is made.
/// With a file, an unusable reply keeps the document in context.
pub async fn classify_document_relevance(
    llm: &dyn LanguageModel,
    question: &str,
    has_file: bool,
    document_preview: Option<&str>,
    timeout: Duration,
) -> DocumentRelevance {
    if !has_file {
        return DocumentRelevance::General;
    }
    let messages = document_relevance_messages(question, document_preview);
    let reply = match ask(llm, "llm.document_relevance", timeout, &messages).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(error = %e, "Document relevance check failed; keeping the document");
            return DocumentRelevance::DocumentSpecific;
        }
    };
    match read_label(&reply).as_deref() {
        Some("general" | "general_question" | "history") => DocumentRelevance::General,
        _ => DocumentRelevance::DocumentSpecific,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::MockLanguageModel;
    use crate::pipeline::structuring::prompt::{
        TASK_CLASSIFY_MESSAGE, TASK_DOCUMENT_RELEVANCE, TASK_UPLOAD_INTENT,
    };

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn labels_from_json_or_text() {
        assert_eq!(read_label(r#"{"intent": "Ask Document"}"#).as_deref(), Some("ask_document"));
        assert_eq!(read_label("```json\n{\"message_type\": \"data_update\"}\n```").as_deref(), Some("data_update"));
        assert_eq!(read_label("\n\"general\".\n").as_deref(), Some("general"));
        assert_eq!(read_label(r#"{"other": 1}"#), None);
    }

    #[tokio::test]
    async fn message_type_defaults_to_question() {
        let llm = MockLanguageModel::new("no idea").on(TASK_CLASSIFY_MESSAGE, "???");
        assert_eq!(classify_message_type(&llm, "hello", T).await, RequestType::QuestionOnly);

        let llm = MockLanguageModel::failing("offline");
        assert_eq!(classify_message_type(&llm, "hello", T).await, RequestType::QuestionOnly);

        let llm = MockLanguageModel::new("").on(TASK_CLASSIFY_MESSAGE, r#"{"message_type": "data_update"}"#);
        assert_eq!(
            classify_message_type(&llm, "my weight today is 72 kg", T).await,
            RequestType::DataUpdate
        );
    }

    #[tokio::test]
    async fn upload_intent_parses_or_gives_none() {
        let llm = MockLanguageModel::new("").on(TASK_UPLOAD_INTENT, r#"{"intent": "upload_and_compare"}"#);
        assert_eq!(
            classify_upload_intent(&llm, "compare with last year", T).await,
            Some(UploadIntent::UploadAndCompare)
        );

        let llm = MockLanguageModel::new("").on(TASK_UPLOAD_INTENT, "not sure");
        assert_eq!(classify_upload_intent(&llm, "hm", T).await, None);
    }

    #[tokio::test]
    async fn relevance_without_file_skips_the_model() {
        let llm = MockLanguageModel::new("document_specific");
        let relevance = classify_document_relevance(&llm, "what is a normal pulse?", false, None, T).await;
        assert_eq!(relevance, DocumentRelevance::General);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn relevance_with_file() {
        let llm = MockLanguageModel::new("").on(TASK_DOCUMENT_RELEVANCE, r#"{"relevance": "general"}"#);
        let relevance = classify_document_relevance(&llm, "what is a normal pulse?", true, Some("Glucose"), T).await;
        assert_eq!(relevance, DocumentRelevance::General);

        let llm = MockLanguageModel::failing("offline");
        let relevance = classify_document_relevance(&llm, "what does this say?", true, None, T).await;
        assert_eq!(relevance, DocumentRelevance::DocumentSpecific);
    }
}
