//! SQLite-backed [`Storage`] implementation.
//!
//! rusqlite is blocking, so every operation runs on the blocking pool and
//! holds the connection mutex for its whole transaction. Duplicate lookups
//! and inserts of one batch therefore never interleave with another batch.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use uuid::Uuid;

use super::repository::{
    find_by_primary_key, find_by_secondary_key, get_health_records_since, insert_health_record,
};
use super::{open_database, open_memory_database, DatabaseError};
use crate::capabilities::{
    CandidateRecord, DuplicateMatch, InsertOutcome, RecordQuery, Storage, StorageError,
};
use crate::models::HealthRecord;

#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    /// Wraps an already-migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Task("connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn existing_duplicate(
    conn: &Connection,
    user_id: &str,
    category: &str,
    candidate: &CandidateRecord,
) -> Result<Option<(Uuid, DuplicateMatch)>, DatabaseError> {
    if let Some(id) = find_by_primary_key(conn, user_id, category, &candidate.primary_key)? {
        return Ok(Some((id, DuplicateMatch::PrimaryKey)));
    }
    if let Some(secondary) = &candidate.secondary_key {
        if let Some(id) = find_by_secondary_key(conn, user_id, category, secondary)? {
            return Ok(Some((id, DuplicateMatch::SecondaryKey)));
        }
    }
    Ok(None)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_batch(
        &self,
        user_id: &str,
        category: &str,
        document_ref: Option<&str>,
        candidates: Vec<CandidateRecord>,
    ) -> Result<Vec<InsertOutcome>, StorageError> {
        let user_id = user_id.to_string();
        let category = category.to_string();
        let document_ref = document_ref.map(str::to_string);

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut outcomes = Vec::with_capacity(candidates.len());

            for candidate in candidates {
                if let Some((existing_id, matched_on)) =
                    existing_duplicate(&tx, &user_id, &category, &candidate)?
                {
                    tracing::debug!(%existing_id, ?matched_on, "Skipping duplicate record");
                    outcomes.push(InsertOutcome::Duplicate {
                        existing_id,
                        matched_on,
                    });
                    continue;
                }

                let record = HealthRecord {
                    id: Uuid::new_v4(),
                    user_id: user_id.clone(),
                    category: category.clone(),
                    label: candidate.label,
                    record_date: candidate.record_date,
                    source: candidate.source,
                    primary_key: candidate.primary_key,
                    secondary_key: candidate.secondary_key,
                    payload: candidate.payload,
                    document_ref: document_ref.clone(),
                    created_at: chrono::Utc::now().naive_utc(),
                };

                match insert_health_record(&tx, &record) {
                    Ok(()) => outcomes.push(InsertOutcome::Created(record.id)),
                    Err(e) if e.is_constraint_violation() => {
                        // Unique index caught what the lookup missed.
                        let existing_id =
                            find_by_primary_key(&tx, &user_id, &category, &record.primary_key)?
                                .ok_or(e)?;
                        outcomes.push(InsertOutcome::Duplicate {
                            existing_id,
                            matched_on: DuplicateMatch::PrimaryKey,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            tx.commit()?;
            Ok(outcomes)
        })
        .await
    }

    async fn query_records(&self, query: RecordQuery) -> Result<Vec<HealthRecord>, StorageError> {
        self.with_connection(move |conn| {
            Ok(get_health_records_since(
                conn,
                &query.user_id,
                &query.category,
                &query.since,
                query.limit,
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn candidate(primary: &str, secondary: Option<&str>) -> CandidateRecord {
        CandidateRecord {
            label: "Hemoglobin".into(),
            record_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            source: Some("City Lab".into()),
            primary_key: primary.into(),
            secondary_key: secondary.map(str::to_string),
            payload: json!({"test_name": "Hemoglobin", "value": 13.5}),
        }
    }

    #[tokio::test]
    async fn inserts_then_skips_duplicates() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        let first = storage
            .insert_batch("u1", "lab", Some("doc-1"), vec![candidate("p1", Some("s1"))])
            .await
            .unwrap();
        assert!(matches!(first[0], InsertOutcome::Created(_)));

        let second = storage
            .insert_batch("u1", "lab", Some("doc-1"), vec![candidate("p1", Some("s1"))])
            .await
            .unwrap();
        assert!(matches!(
            second[0],
            InsertOutcome::Duplicate {
                matched_on: DuplicateMatch::PrimaryKey,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn secondary_key_catches_renamed_fact() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_batch("u1", "lab", None, vec![candidate("hgb", Some("13.5|g/dl"))])
            .await
            .unwrap();

        let outcomes = storage
            .insert_batch("u1", "lab", None, vec![candidate("hemoglobin", Some("13.5|g/dl"))])
            .await
            .unwrap();
        assert!(matches!(
            outcomes[0],
            InsertOutcome::Duplicate {
                matched_on: DuplicateMatch::SecondaryKey,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_are_stored_once() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let outcomes = storage
            .insert_batch("u1", "lab", None, vec![candidate("p1", None), candidate("p1", None)])
            .await
            .unwrap();
        assert!(matches!(outcomes[0], InsertOutcome::Created(_)));
        assert!(matches!(outcomes[1], InsertOutcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn concurrent_batches_store_each_fact_once() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .insert_batch("u1", "lab", None, vec![candidate("p1", Some("s1"))])
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            let outcomes = handle.await.unwrap();
            if matches!(outcomes[0], InsertOutcome::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);

        let since = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let rows = storage
            .query_records(RecordQuery {
                user_id: "u1".into(),
                category: "lab".into(),
                since,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_batch("u1", "lab", None, vec![candidate("p1", None)])
            .await
            .unwrap();
        let outcomes = storage
            .insert_batch("u2", "lab", None, vec![candidate("p1", None)])
            .await
            .unwrap();
        assert!(matches!(outcomes[0], InsertOutcome::Created(_)));
    }
}
