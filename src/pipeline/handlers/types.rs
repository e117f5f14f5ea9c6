use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::enums::{StorageOutcome, TrendDirection};
use crate::models::{LabReport, PharmacyReceipt, PrescriptionDocument, VitalsLog};

/// Per-request context every handler call receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerContext {
    pub request_id: Uuid,
    pub user_id: String,
    pub session_id: Option<String>,
    /// Reference to the uploaded file, stored next to each record.
    pub source_document: Option<String>,
    /// Anchor for lookback windows.
    pub today: NaiveDate,
}

impl HandlerContext {
    pub fn new(user_id: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: None,
            source_document: None,
            today,
        }
    }

    pub fn with_source_document(mut self, source: impl Into<String>) -> Self {
        self.source_document = Some(source.into());
        self
    }
}

/// Domain-typed extraction payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ExtractedPayload {
    Vitals(VitalsLog),
    Lab(LabReport),
    Prescription(PrescriptionDocument),
    Pharmacy(PharmacyReceipt),
    /// Extension handlers carry their own shape.
    Other(serde_json::Value),
}

impl ExtractedPayload {
    pub fn entry_count(&self) -> usize {
        match self {
            Self::Vitals(log) => log.readings.len(),
            Self::Lab(report) => report.tests.len(),
            Self::Prescription(doc) => doc.medications.len(),
            Self::Pharmacy(receipt) => receipt.items.len(),
            Self::Other(value) => value.as_array().map_or(1, Vec::len),
        }
    }

    /// The payload body without the enum tag.
    pub fn to_json(&self) -> serde_json::Value {
        let result = match self {
            Self::Vitals(log) => serde_json::to_value(log),
            Self::Lab(report) => serde_json::to_value(report),
            Self::Prescription(doc) => serde_json::to_value(doc),
            Self::Pharmacy(receipt) => serde_json::to_value(receipt),
            Self::Other(value) => Ok(value.clone()),
        };
        result.unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_text_length: usize,
    pub confidence: f32,
    pub parse_strategy: String,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub category: String,
    pub payload: ExtractedPayload,
    pub provenance: Provenance,
}

/// What happened to one extracted entry during storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: Option<Uuid>,
    pub category: String,
    pub label: String,
    pub record_date: Option<NaiveDate>,
    pub outcome: StorageOutcome,
    pub reason: Option<String>,
    /// Fields durably written; null unless created.
    pub fields: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Stored,
    PartialDuplicate,
    DuplicateSkipped,
    NothingToStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageReport {
    pub category: String,
    pub records: Vec<StoredRecord>,
    pub created: usize,
    pub duplicates_skipped: usize,
    pub rejected: usize,
    pub outcome: BatchOutcome,
}

impl StorageReport {
    pub fn from_records(category: impl Into<String>, records: Vec<StoredRecord>) -> Self {
        let count = |o: StorageOutcome| records.iter().filter(|r| r.outcome == o).count();
        let created = count(StorageOutcome::Created);
        let duplicates_skipped = count(StorageOutcome::DuplicateSkipped);
        let rejected = count(StorageOutcome::Rejected);
        let outcome = match (created, duplicates_skipped) {
            (0, 0) => BatchOutcome::NothingToStore,
            (0, _) => BatchOutcome::DuplicateSkipped,
            (_, 0) => BatchOutcome::Stored,
            _ => BatchOutcome::PartialDuplicate,
        };
        Self {
            category: category.into(),
            records,
            created,
            duplicates_skipped,
            rejected,
            outcome,
        }
    }

    /// Only the records that were newly written.
    pub fn created_records(&self) -> Vec<StoredRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == StorageOutcome::Created)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    pub days_back: u32,
    pub limit: usize,
    #[serde(default)]
    pub priority_fields: Vec<String>,
}

impl RetrievalStrategy {
    pub fn new(days_back: u32, limit: usize) -> Self {
        Self {
            days_back,
            limit,
            priority_fields: Vec::new(),
        }
    }

    /// First day of the window; saturates at the earliest representable date.
    pub fn since(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_signed(chrono::Duration::days(i64::from(self.days_back)))
            .unwrap_or(NaiveDate::MIN)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceAssessment {
    pub category: String,
    pub is_relevant: bool,
    pub relevance_score: f32,
    pub strategy: RetrievalStrategy,
    pub reasoning: String,
}

impl RelevanceAssessment {
    pub fn not_relevant(category: &str, strategy: RetrievalStrategy, reasoning: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            is_relevant: false,
            relevance_score: 0.0,
            strategy,
            reasoning: reasoning.into(),
        }
    }
}

/// One stored record as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub record_id: Uuid,
    pub label: String,
    pub record_date: NaiveDate,
    pub source: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub subject: String,
    pub direction: TrendDirection,
    pub first_value: Option<f64>,
    pub last_value: Option<f64>,
    pub change_percent: Option<f64>,
    pub data_points: usize,
    pub unit: Option<String>,
}

/// A record worth pointing out (out of range, critical, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub subject: String,
    pub record_date: NaiveDate,
    pub value: String,
    pub reason: String,
}

/// Records plus derived views for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDataset {
    pub category: String,
    pub lookback_days: u32,
    pub total_records: usize,
    pub records: Vec<DatasetRow>,
    pub trends: Vec<TrendSummary>,
    pub highlights: Vec<Highlight>,
    pub summary: serde_json::Value,
}

impl DomainDataset {
    pub fn empty(category: &str, lookback_days: u32) -> Self {
        Self {
            category: category.to_string(),
            lookback_days,
            total_records: 0,
            records: Vec::new(),
            trends: Vec::new(),
            highlights: Vec::new(),
            summary: serde_json::Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
