//! Plumbing shared by the built-in domain handlers: model calls under a
//! timeout, JSON salvage, batch storage and record loading.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::error::HandlerError;
use super::types::{
    DatasetRow, HandlerContext, Provenance, RelevanceAssessment, RetrievalStrategy,
    StorageReport, StoredRecord,
};
use crate::capabilities::{
    with_timeout, CandidateRecord, ChatMessage, DuplicateMatch, InsertOutcome, LanguageModel, RecordQuery,
    Storage,
};
use crate::config::CapabilityTimeouts;
use crate::models::enums::StorageOutcome;
use crate::models::lenient;
use crate::pipeline::structuring::prompt::{extraction_messages, relevance_messages, truncate_for_prompt};
use crate::pipeline::structuring::{is_bare_time, parse_record_date, salvage_json, ParseFailure, ParseStrategy};

/// Capabilities every built-in handler is constructed with.
#[derive(Clone)]
pub struct HandlerDeps {
    pub llm: Arc<dyn LanguageModel>,
    pub storage: Arc<dyn Storage>,
    pub timeouts: CapabilityTimeouts,
    pub max_prompt_chars: usize,
}

impl HandlerDeps {
    pub fn new(llm: Arc<dyn LanguageModel>, storage: Arc<dyn Storage>) -> Self {
        Self {
            llm,
            storage,
            timeouts: CapabilityTimeouts::default(),
            max_prompt_chars: 8_000,
        }
    }

    pub fn with_timeouts(mut self, timeouts: CapabilityTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_prompt_chars(mut self, max_prompt_chars: usize) -> Self {
        self.max_prompt_chars = max_prompt_chars;
        self
    }

    /// Invokes the model under the LLM bound and salvages JSON from the reply.
    pub async fn complete_json(
        &self,
        operation: &str,
        messages: &[ChatMessage],
    ) -> Result<(Value, ParseStrategy), HandlerError> {
        let response: String =
            with_timeout(operation, self.timeouts.llm, self.llm.invoke(messages)).await?;
        Ok(salvage_json(&response)?)
    }

    /// Runs the extraction prompt for `category` and decodes the reply into `T`.
    ///
    /// A bare array reply is wrapped under `list_key` so models that skip
    /// the envelope still decode.
    pub async fn extract_document<T: DeserializeOwned>(
        &self,
        category: &str,
        schema: &str,
        raw_text: &str,
        list_key: &str,
    ) -> Result<(T, ParseStrategy), HandlerError> {
        let text = truncate_for_prompt(raw_text, self.max_prompt_chars);
        let messages = extraction_messages(category, schema, &text);
        let operation = format!("llm.extract_{category}");
        let (value, strategy) = self.complete_json(&operation, &messages).await?;

        let value = match value {
            Value::Array(items) => {
                let mut envelope = serde_json::Map::new();
                envelope.insert(list_key.to_string(), Value::Array(items));
                Value::Object(envelope)
            }
            other => other,
        };
        let raw = value.to_string();
        let document = serde_json::from_value(value)
            .map_err(|e| ParseFailure::new(format!("unexpected {category} shape: {e}"), &raw))?;
        Ok((document, strategy))
    }

    /// Writes one batch and turns the per-candidate outcomes into records.
    ///
    /// `rejected` entries never reach storage; they are appended to the
    /// report so callers see every extracted entry accounted for.
    pub async fn insert_candidates(
        &self,
        ctx: &HandlerContext,
        category: &str,
        candidates: Vec<CandidateRecord>,
        rejected: Vec<StoredRecord>,
    ) -> Result<StorageReport, HandlerError> {
        let mut records = Vec::with_capacity(candidates.len() + rejected.len());

        if !candidates.is_empty() {
            let outcomes: Vec<InsertOutcome> =
                with_timeout("storage.insert_batch", self.timeouts.storage, async {
                    self.storage
                        .insert_batch(
                            &ctx.user_id,
                            category,
                            ctx.source_document.as_deref(),
                            candidates.clone(),
                        )
                        .await
                        .map_err(HandlerError::from)
                })
                .await?;

            for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
                records.push(match outcome {
                    InsertOutcome::Created(id) => StoredRecord {
                        record_id: Some(id),
                        category: category.to_string(),
                        label: candidate.label,
                        record_date: Some(candidate.record_date),
                        outcome: StorageOutcome::Created,
                        reason: None,
                        fields: candidate.payload,
                    },
                    InsertOutcome::Duplicate {
                        existing_id,
                        matched_on,
                    } => StoredRecord {
                        record_id: Some(existing_id),
                        category: category.to_string(),
                        label: candidate.label,
                        record_date: Some(candidate.record_date),
                        outcome: StorageOutcome::DuplicateSkipped,
                        reason: Some(duplicate_reason(matched_on).to_string()),
                        fields: Value::Null,
                    },
                });
            }
        }
        records.extend(rejected);

        let report = StorageReport::from_records(category, records);
        tracing::info!(
            request_id = %ctx.request_id,
            category,
            created = report.created,
            duplicates = report.duplicates_skipped,
            rejected = report.rejected,
            "Stored extraction batch"
        );
        Ok(report)
    }

    /// Records for the context's user inside the strategy's window, newest first.
    pub async fn load_rows(
        &self,
        ctx: &HandlerContext,
        category: &str,
        strategy: &RetrievalStrategy,
    ) -> Result<Vec<DatasetRow>, HandlerError> {
        let query = RecordQuery {
            user_id: ctx.user_id.clone(),
            category: category.to_string(),
            since: strategy.since(ctx.today),
            limit: strategy.limit,
        };
        let records = with_timeout("storage.query_records", self.timeouts.storage, async {
            self.storage
                .query_records(query)
                .await
                .map_err(HandlerError::from)
        })
        .await?;

        Ok(records
            .into_iter()
            .map(|r| DatasetRow {
                record_id: r.id,
                label: r.label,
                record_date: r.record_date,
                source: r.source,
                data: r.payload,
            })
            .collect())
    }

    /// Model-backed relevance check. Never fails: any problem yields
    /// "not relevant" with the domain's default strategy.
    pub async fn assess_with_llm(
        &self,
        category: &str,
        description: &str,
        default_strategy: RetrievalStrategy,
        question: &str,
    ) -> RelevanceAssessment {
        let messages = relevance_messages(category, description, question);
        let operation = format!("llm.assess_relevance_{category}");
        let value = match self.complete_json(&operation, &messages).await {
            Ok((value, _)) => value,
            Err(e) => {
                tracing::warn!(category, error = %e, "Relevance assessment failed");
                return RelevanceAssessment::not_relevant(
                    category,
                    default_strategy,
                    format!("assessment unavailable: {e}"),
                );
            }
        };

        match serde_json::from_value::<RawRelevance>(value) {
            Ok(raw) => raw.into_assessment(category, default_strategy),
            Err(e) => {
                tracing::warn!(category, error = %e, "Relevance reply had an unexpected shape");
                RelevanceAssessment::not_relevant(category, default_strategy, "unreadable assessment")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRelevance {
    #[serde(default)]
    is_relevant: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    relevance_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    reasoning: Option<String>,
    #[serde(default)]
    retrieval_strategy: Option<RawStrategy>,
}

/// Upper bounds on model-suggested retrieval windows.
const MAX_LOOKBACK_DAYS: u32 = 36_500;
const MAX_RETRIEVAL_LIMIT: u32 = 1_000;

/// Rounds a model-supplied count into `1..=max`. `None` below one or
/// when not a finite number.
fn bounded_count(raw: f64, max: u32) -> Option<u32> {
    if !raw.is_finite() || raw < 1.0 {
        return None;
    }
    let clamped = raw.round().min(f64::from(max)) as i64;
    u32::try_from(clamped).ok()
}

#[derive(Debug, Deserialize)]
struct RawStrategy {
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    days_back: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    limit: Option<f64>,
    #[serde(default)]
    priority_fields: Vec<Value>,
}

impl RawRelevance {
    fn into_assessment(self, category: &str, default_strategy: RetrievalStrategy) -> RelevanceAssessment {
        let score = match (self.relevance_score, self.is_relevant) {
            (Some(score), _) => score.clamp(0.0, 1.0) as f32,
            (None, Some(true)) => 1.0,
            (None, _) => 0.0,
        };
        let is_relevant = self.is_relevant.unwrap_or(score > 0.5);

        let mut strategy = default_strategy;
        if let Some(raw) = self.retrieval_strategy {
            if let Some(days) = raw.days_back.and_then(|d| bounded_count(d, MAX_LOOKBACK_DAYS)) {
                strategy.days_back = days;
            }
            if let Some(limit) = raw
                .limit
                .and_then(|l| bounded_count(l, MAX_RETRIEVAL_LIMIT))
                .and_then(|l| usize::try_from(l).ok())
            {
                strategy.limit = limit;
            }
            let fields: Vec<String> = raw
                .priority_fields
                .iter()
                .filter_map(lenient::value_to_string)
                .collect();
            if !fields.is_empty() {
                strategy.priority_fields = fields;
            }
        }

        RelevanceAssessment {
            category: category.to_string(),
            is_relevant,
            relevance_score: score,
            strategy,
            reasoning: self.reasoning.unwrap_or_default(),
        }
    }
}

/// Resolves the date a record is filed under.
///
/// The entry's own date wins; the document date is used only when the entry
/// carries none. A present but unreadable entry date rejects the entry.
/// `fallback` covers entries with no date anywhere.
pub fn resolve_record_date(
    entry_date: Option<&str>,
    document_date: Option<&str>,
    fallback: Option<NaiveDate>,
) -> Result<NaiveDate, String> {
    let entry_date = entry_date.map(str::trim).filter(|d| !d.is_empty());
    let document_date = document_date.map(str::trim).filter(|d| !d.is_empty());

    match entry_date.or(document_date) {
        Some(raw) if is_bare_time(raw) => Err(format!("'{raw}' is a time of day, not a date")),
        Some(raw) => parse_record_date(raw).ok_or_else(|| format!("unparseable date '{raw}'")),
        None => fallback.ok_or_else(|| "no date in entry or document".to_string()),
    }
}

fn duplicate_reason(matched_on: DuplicateMatch) -> &'static str {
    match matched_on {
        DuplicateMatch::PrimaryKey => "already stored (same name, date and source)",
        DuplicateMatch::SecondaryKey => "already stored (same value, unit, range and date)",
    }
}

/// An entry dropped before storage.
pub fn rejected_record(category: &str, label: &str, reason: impl Into<String>) -> StoredRecord {
    let reason = reason.into();
    tracing::warn!(category, label, reason = %reason, "Skipping extracted entry");
    StoredRecord {
        record_id: None,
        category: category.to_string(),
        label: label.to_string(),
        record_date: None,
        outcome: StorageOutcome::Rejected,
        reason: Some(reason),
        fields: Value::Null,
    }
}

/// Extraction confidence: a clean parse scores higher than a salvaged one,
/// scaled by the share of entries that survived validation.
pub fn extraction_confidence(strategy: ParseStrategy, total: usize, valid: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let base = match strategy {
        ParseStrategy::Direct | ParseStrategy::FencedBlock => 0.95,
        _ => 0.80,
    };
    (base * valid as f32 / total as f32).clamp(0.0, 1.0)
}

pub fn provenance(raw_text: &str, strategy: ParseStrategy, total: usize, valid: usize) -> Provenance {
    Provenance {
        source_text_length: raw_text.chars().count(),
        confidence: extraction_confidence(strategy, total, valid),
        parse_strategy: strategy.as_str().to_string(),
        extracted_at: Utc::now(),
    }
}
