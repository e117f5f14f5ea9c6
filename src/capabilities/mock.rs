//! Scriptable capability implementations for tests and offline runs.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CapabilityError, ChatMessage, ExtractedText, LanguageModel, SafetyValidator, SafetyVerdict,
    TextExtractor, ValidationContext,
};

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// Language model that answers from ordered substring rules.
///
/// The first rule whose pattern occurs anywhere in the prompt wins;
/// otherwise the default reply is returned.
pub struct MockLanguageModel {
    rules: Vec<(String, MockReply)>,
    default: MockReply,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLanguageModel {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: MockReply::Text(default_response.into()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A model whose every call fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            default: MockReply::Fail(message.into()),
            ..Self::new("")
        }
    }

    pub fn on(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules
            .push((pattern.into(), MockReply::Text(response.into())));
        self
    }

    pub fn on_failure(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules
            .push((pattern.into(), MockReply::Fail(message.into())));
        self
    }

    /// Sleeps before every reply (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of recorded prompts containing `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|messages| messages.iter().any(|m| m.content.contains(pattern)))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let reply = self
            .rules
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.default);

        match reply {
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Fail(message) => Err(CapabilityError::LanguageModel(message.clone())),
        }
    }
}

/// Extractor returning fixed text regardless of the file.
pub struct MockTextExtractor {
    result: Result<ExtractedText, CapabilityError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockTextExtractor {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            result: Ok(ExtractedText {
                text: text.into(),
                confidence,
            }),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            result: Err(CapabilityError::Extraction(message.into())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for MockTextExtractor {
    async fn extract(&self, _file_path: &Path, _file_type: &str) -> Result<ExtractedText, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

/// Validator with a fixed rule: text containing a marker is unsafe.
pub struct StaticSafetyValidator {
    unsafe_marker: Option<String>,
    filtered_replacement: String,
}

impl StaticSafetyValidator {
    pub fn allow_all() -> Self {
        Self {
            unsafe_marker: None,
            filtered_replacement: String::new(),
        }
    }

    /// Flags any text containing `marker`; filtered content is empty.
    pub fn flag_containing(marker: impl Into<String>) -> Self {
        Self {
            unsafe_marker: Some(marker.into()),
            filtered_replacement: String::new(),
        }
    }

    /// Flags text containing `marker` but offers `replacement` as filtered content.
    pub fn filter_containing(marker: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            unsafe_marker: Some(marker.into()),
            filtered_replacement: replacement.into(),
        }
    }
}

#[async_trait]
impl SafetyValidator for StaticSafetyValidator {
    async fn validate(
        &self,
        text: &str,
        _context: ValidationContext,
    ) -> Result<SafetyVerdict, CapabilityError> {
        match &self.unsafe_marker {
            Some(marker) if text.contains(marker.as_str()) => Ok(SafetyVerdict {
                is_safe: false,
                filtered_content: self.filtered_replacement.clone(),
                violations: vec![format!("matched marker '{marker}'")],
                confidence_score: 0.0,
            }),
            _ => Ok(SafetyVerdict::safe(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let llm = MockLanguageModel::new("default")
            .on("TASK: a", "first")
            .on("TASK", "second");
        let reply = llm.invoke(&[ChatMessage::system("TASK: a")]).await.unwrap();
        assert_eq!(reply, "first");
        let reply = llm.invoke(&[ChatMessage::user("TASK: b")]).await.unwrap();
        assert_eq!(reply, "second");
        let reply = llm.invoke(&[ChatMessage::user("hello")]).await.unwrap();
        assert_eq!(reply, "default");
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.calls_matching("TASK"), 2);
    }

    #[tokio::test]
    async fn failure_rules_return_errors() {
        let llm = MockLanguageModel::new("ok").on_failure("explode", "model down");
        let err = llm.invoke(&[ChatMessage::user("explode")]).await.unwrap_err();
        assert_eq!(err, CapabilityError::LanguageModel("model down".into()));
    }

    #[tokio::test]
    async fn static_validator_flags_marker() {
        let validator = StaticSafetyValidator::flag_containing("UNSAFE");
        let verdict = validator
            .validate("this is UNSAFE", ValidationContext::GeneratedAnswer)
            .await
            .unwrap();
        assert!(!verdict.is_safe);
        assert!(verdict.filtered_content.is_empty());

        let verdict = validator
            .validate("fine", ValidationContext::GeneratedAnswer)
            .await
            .unwrap();
        assert!(verdict.is_safe);
        assert_eq!(verdict.filtered_content, "fine");
    }
}
