use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::HealthRecord;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(err))
    }
}

/// A validated record waiting for its duplicate check and insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub label: String,
    pub record_date: NaiveDate,
    pub source: Option<String>,
    /// Fingerprint of (name, date, source).
    pub primary_key: String,
    /// Fingerprint of (value, unit, reference range, date) when a value exists.
    pub secondary_key: Option<String>,
    pub payload: serde_json::Value,
}

/// Which natural key matched an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMatch {
    PrimaryKey,
    SecondaryKey,
}

/// Per-candidate result of a batch insert, in candidate order.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Uuid),
    Duplicate {
        existing_id: Uuid,
        matched_on: DuplicateMatch,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub user_id: String,
    pub category: String,
    pub since: NaiveDate,
    pub limit: usize,
}

/// Durable health-record persistence.
///
/// `insert_batch` must run the duplicate checks and inserts of one batch
/// atomically with respect to other batches for the same user, so that
/// concurrent submissions of the same document store each fact once.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_batch(
        &self,
        user_id: &str,
        category: &str,
        document_ref: Option<&str>,
        candidates: Vec<CandidateRecord>,
    ) -> Result<Vec<InsertOutcome>, StorageError>;

    async fn query_records(&self, query: RecordQuery) -> Result<Vec<HealthRecord>, StorageError>;
}
