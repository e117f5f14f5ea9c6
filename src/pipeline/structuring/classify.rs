use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::parser::salvage_json;
use super::prompt::{classify_document_messages, truncate_for_prompt};
use crate::capabilities::{with_timeout, CapabilityError, LanguageModel};
use crate::models::lenient;

/// Recognized document types no built-in handler processes.
pub const UNSUPPORTED_DOCUMENT_TYPES: &[&str] = &[
    "insurance",
    "billing",
    "radiology_image",
    "radiology_report",
    "discharge_summary",
    "other",
];

/// Image-analysis domains served only by registered extension handlers.
pub const IMAGE_DOMAINS: &[&str] = &["nutrition", "medical_image"];

/// Map a free-text category name onto a canonical tag.
/// Handles English and French names; unknown labels pass through snake_cased.
pub fn normalize_category_label(raw: &str) -> String {
    let lower = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.').to_lowercase();
    let canonical = match lower.as_str() {
        // English
        "lab" | "labs" | "lab_result" | "lab result" | "lab_results" | "lab results" | "laboratory"
        | "blood_test" | "blood test" | "blood work" => "lab",
        "vitals" | "vital" | "vital_signs" | "vital signs" | "vital_sign" => "vitals",
        "prescription" | "prescriptions" | "medication" | "medications" | "rx" => "prescription",
        "pharmacy" | "pharmacy_receipt" | "pharmacy receipt" | "receipt" | "pharmacy_record"
        | "pharmacy record" => "pharmacy",
        "nutrition" | "food" | "meal" | "food photo" => "nutrition",
        "medical_image" | "medical image" | "skin" | "wound" | "photo" => "medical_image",
        "radiology" | "imaging" | "x-ray" | "xray" | "mri" | "ct scan" => "radiology_image",
        "radiology_report" | "radiology report" => "radiology_report",
        "insurance" | "insurance claim" => "insurance",
        "billing" | "invoice" | "bill" | "hospital bill" => "billing",
        "discharge" | "discharge summary" | "discharge_summary" => "discharge_summary",
        // French
        "ordonnance" => "prescription",
        "résultat" | "résultats" | "résultats de laboratoire" | "bilan sanguin"
        | "bilan biologique" | "analyse" | "analyses" => "lab",
        "constantes" | "signes vitaux" => "vitals",
        "pharmacie" | "ticket de pharmacie" => "pharmacy",
        "radiologie" | "imagerie" | "irm" | "scanner" => "radiology_image",
        "mutuelle" | "assurance" => "insurance",
        "facture" => "billing",
        "lettre de sortie" | "compte rendu de sortie" => "discharge_summary",
        other => return other.replace([' ', '-'], "_"),
    };
    canonical.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentClassification {
    /// Always one of the allowed categories.
    pub category: String,
    pub confidence: f32,
    pub reasoning: String,
    /// What the model actually said when it fell outside the allowed set.
    pub detected_type: Option<String>,
    pub fallback_used: bool,
}

impl DocumentClassification {
    pub fn fallback(default_category: &str, detected_type: Option<String>, reasoning: impl Into<String>) -> Self {
        Self {
            category: default_category.to_string(),
            confidence: 0.0,
            reasoning: reasoning.into(),
            detected_type,
            fallback_used: true,
        }
    }

    /// The model named a known type that no allowed handler covers.
    pub fn unsupported_type(&self) -> Option<&str> {
        self.detected_type.as_deref().filter(|t| {
            UNSUPPORTED_DOCUMENT_TYPES.contains(t) || IMAGE_DOMAINS.contains(t)
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "document_type", alias = "type", deserialize_with = "lenient::opt_string")]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    reasoning: Option<String>,
}

/// Turns a classification reply into a category from `allowed`.
///
/// JSON replies are salvaged; anything else is read as a bare label.
/// Labels outside `allowed` resolve to `default_category`.
pub fn resolve_classification(
    response: &str,
    allowed: &[String],
    default_category: &str,
) -> DocumentClassification {
    let (label, confidence, reasoning) = match salvage_json(response) {
        Ok((value, _)) => match serde_json::from_value::<RawClassification>(value) {
            Ok(raw) => (
                raw.category.unwrap_or_default(),
                raw.confidence.map(|c| c.clamp(0.0, 1.0) as f32),
                raw.reasoning.unwrap_or_default(),
            ),
            Err(_) => (String::new(), None, String::new()),
        },
        Err(_) => {
            let first_line = response.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            (first_line.to_string(), None, String::new())
        }
    };

    let category = normalize_category_label(&label);
    if allowed.iter().any(|a| a == &category) {
        return DocumentClassification {
            category,
            confidence: confidence.unwrap_or(0.5),
            reasoning,
            detected_type: None,
            fallback_used: false,
        };
    }

    tracing::info!(
        detected = %category,
        default = default_category,
        "Ambiguous document classification, using default category"
    );
    let detected = (!category.is_empty()).then_some(category);
    DocumentClassification::fallback(
        default_category,
        detected,
        "classification outside supported categories",
    )
}

/// Asks the model for a document category.
///
/// Never fails: model errors and timeouts fall back to `default_category`.
pub async fn classify_document(
    llm: &dyn LanguageModel,
    text: &str,
    allowed: &[String],
    default_category: &str,
    timeout: Duration,
    max_prompt_chars: usize,
) -> DocumentClassification {
    let messages = classify_document_messages(&truncate_for_prompt(text, max_prompt_chars), allowed);
    let result: Result<String, CapabilityError> =
        with_timeout("llm.classify_document", timeout, llm.invoke(&messages)).await;

    match result {
        Ok(response) => resolve_classification(&response, allowed, default_category),
        Err(e) => {
            tracing::warn!(error = %e, default = default_category, "Document classification failed");
            DocumentClassification::fallback(default_category, None, format!("classifier unavailable: {e}"))
        }
    }
}
