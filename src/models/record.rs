use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One durable fact in the health record store.
///
/// `payload` holds the domain entry as JSON; the natural keys are
/// fingerprints computed by the owning handler and drive duplicate
/// detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: Uuid,
    pub user_id: String,
    pub category: String,
    pub label: String,
    pub record_date: NaiveDate,
    pub source: Option<String>,
    pub primary_key: String,
    pub secondary_key: Option<String>,
    pub payload: serde_json::Value,
    pub document_ref: Option<String>,
    pub created_at: NaiveDateTime,
}
