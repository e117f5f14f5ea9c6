//! Prompt builders. Every system prompt opens with a `TASK:` line naming
//! the job so transcripts (and scripted test models) can tell calls apart.

use crate::capabilities::ChatMessage;

use super::parser::excerpt;

pub const TASK_CLASSIFY_DOCUMENT: &str = "TASK: classify_document";
pub const TASK_ASSESS_RELEVANCE: &str = "TASK: assess_relevance";
pub const TASK_ROUTE_QUESTION: &str = "TASK: route_question";
pub const TASK_CLASSIFY_MESSAGE: &str = "TASK: classify_message";
pub const TASK_UPLOAD_INTENT: &str = "TASK: classify_upload_intent";
pub const TASK_DOCUMENT_RELEVANCE: &str = "TASK: document_relevance";
pub const TASK_ANSWER_DOCUMENT: &str = "TASK: answer_document_question";
pub const TASK_ANSWER_DOMAIN: &str = "TASK: answer_domain_question";
pub const TASK_CONSULTATION: &str = "TASK: medical_consultation";

/// Task marker for a domain's extraction prompt.
pub fn extraction_task(category: &str) -> String {
    format!("TASK: extract_{category}")
}

/// Truncates document text for inclusion in a prompt.
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    let clipped = excerpt(text, max_chars);
    if clipped.len() < text.len() {
        format!("{clipped}\n[... truncated ...]")
    } else {
        clipped
    }
}

pub fn classify_document_messages(text: &str, categories: &[String]) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_CLASSIFY_DOCUMENT}\n\
         You sort medical documents into categories.\n\
         Supported categories: {}.\n\
         If the document is something else (insurance, billing, radiology image, discharge summary, \
         nutrition photo, medical image), name that type instead.\n\
         Respond with JSON only: {{\"category\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}",
        categories.join(", ")
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Document text:\n{text}")),
    ]
}

pub fn extraction_messages(category: &str, schema: &str, text: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{}\n\
         Extract every {category} fact from the document below.\n\
         Copy values exactly as written. Use null for anything not stated. Never invent values.\n\
         Write dates as YYYY-MM-DD when the document gives a full date; never turn a bare time into a date.\n\
         Respond with JSON only, matching this shape:\n{schema}",
        extraction_task(category)
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Document text:\n{text}")),
    ]
}

pub fn relevance_messages(category: &str, description: &str, question: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_ASSESS_RELEVANCE}\n\
         DOMAIN: {category}\n\
         The {category} domain covers: {description}\n\
         Decide whether this domain's records help answer the user's question.\n\
         Respond with JSON only: {{\"is_relevant\": true|false, \"relevance_score\": 0.0-1.0, \
         \"reasoning\": \"...\", \"retrieval_strategy\": {{\"days_back\": N, \"limit\": N, \
         \"priority_fields\": [\"...\"]}}}}"
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Question: {question}")),
    ]
}

pub fn route_question_messages(question: &str, domains: &[String]) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_ROUTE_QUESTION}\n\
         Pick the data domain that answers the user's health question.\n\
         Domains: {}, medical_consultation (general medical knowledge, no records needed), \
         multi_domain (needs several domains).\n\
         Respond with JSON only: {{\"domain\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}",
        domains.join(", ")
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Question: {question}")),
    ]
}

pub fn message_type_messages(message: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_CLASSIFY_MESSAGE}\n\
         Decide whether the user is asking a question or reporting new health data to record \
         (for example \"my blood pressure this morning was 130/85\").\n\
         Respond with JSON only: {{\"message_type\": \"question\"|\"data_update\", \"reasoning\": \"...\"}}"
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(message.to_string()),
    ]
}

pub fn upload_intent_messages(message: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_UPLOAD_INTENT}\n\
         The user uploaded a file and wrote a message. Classify the intent:\n\
         - upload_only: just wants the file saved\n\
         - ask_document: asks about the content of this file\n\
         - ask_history: asks about their past records, not this file\n\
         - upload_and_compare: wants this file compared against their history\n\
         Respond with JSON only: {{\"intent\": \"...\", \"reasoning\": \"...\"}}"
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(message.to_string()),
    ]
}

pub fn document_relevance_messages(question: &str, document_preview: Option<&str>) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_DOCUMENT_RELEVANCE}\n\
         The user attached a document and asked a question. Decide whether answering needs the \
         attached document (document_specific) or is a general health question (general).\n\
         Respond with JSON only: {{\"relevance\": \"document_specific\"|\"general\", \"reasoning\": \"...\"}}"
    );
    let mut user = format!("Question: {question}");
    if let Some(preview) = document_preview {
        user.push_str(&format!("\n\nAttached document begins:\n{preview}"));
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

const ANSWER_RULES: &str = "Answer only from the data provided. Say plainly when the data does not \
     cover the question. Do not diagnose and do not prescribe; suggest discussing concerns with a \
     healthcare provider.";

pub fn document_answer_messages(
    question: &str,
    category: &str,
    extracted: &str,
    history: Option<&str>,
) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_ANSWER_DOCUMENT}\n\
         You explain a freshly uploaded {category} document to its owner.\n{ANSWER_RULES}"
    );
    let mut user = format!("Question: {question}\n\nExtracted document data:\n{extracted}");
    if let Some(history) = history {
        user.push_str(&format!("\n\nEarlier {category} records:\n{history}"));
    }
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn domain_answer_messages(question: &str, category: &str, dataset: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_ANSWER_DOMAIN}\n\
         You answer questions about the user's {category} history.\n{ANSWER_RULES}"
    );
    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Question: {question}\n\n{category} data:\n{dataset}")),
    ]
}

pub fn consultation_messages(question: &str, context: Option<&str>) -> Vec<ChatMessage> {
    let system = format!(
        "{TASK_CONSULTATION}\n\
         You are a careful health assistant. Combine general medical knowledge with any records \
         provided.\n{ANSWER_RULES}"
    );
    let user = match context {
        Some(context) => format!("Question: {question}\n\nRelevant records:\n{context}"),
        None => format!("Question: {question}\n\nNo stored records were relevant."),
    };
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_prompt_carries_its_task_marker() {
        let cats = vec!["lab".to_string()];
        assert!(classify_document_messages("x", &cats)[0].content.starts_with(TASK_CLASSIFY_DOCUMENT));
        assert!(extraction_messages("lab", "{}", "x")[0].content.starts_with("TASK: extract_lab"));
        assert!(relevance_messages("lab", "d", "q")[0].content.contains("DOMAIN: lab\n"));
        assert!(route_question_messages("q", &cats)[0].content.starts_with(TASK_ROUTE_QUESTION));
        assert!(consultation_messages("q", None)[1].content.contains("No stored records"));
    }

    #[test]
    fn truncation_marks_clipped_text() {
        assert_eq!(truncate_for_prompt("short", 10), "short");
        let clipped = truncate_for_prompt("abcdefghij", 4);
        assert!(clipped.starts_with("abcd"));
        assert!(clipped.contains("truncated"));
    }
}
