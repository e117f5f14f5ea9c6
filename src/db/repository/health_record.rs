use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::HealthRecord;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_COLUMNS: &str = "SELECT id, user_id, category, label, record_date, source,
     primary_key, secondary_key, payload, document_ref, created_at
     FROM health_records";

pub fn insert_health_record(conn: &Connection, record: &HealthRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO health_records (id, user_id, category, label, record_date, source,
         primary_key, secondary_key, payload, document_ref, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.id.to_string(),
            record.user_id,
            record.category,
            record.label,
            record.record_date.format(DATE_FORMAT).to_string(),
            record.source,
            record.primary_key,
            record.secondary_key,
            record.payload.to_string(),
            record.document_ref,
            record.created_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )?;
    Ok(())
}

/// Existing record id sharing the primary natural key, if any.
pub fn find_by_primary_key(
    conn: &Connection,
    user_id: &str,
    category: &str,
    primary_key: &str,
) -> Result<Option<Uuid>, DatabaseError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM health_records
             WHERE user_id = ?1 AND category = ?2 AND primary_key = ?3 LIMIT 1",
            params![user_id, category, primary_key],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|s| parse_uuid(&s)).transpose()
}

/// Existing record id sharing the secondary natural key, if any.
pub fn find_by_secondary_key(
    conn: &Connection,
    user_id: &str,
    category: &str,
    secondary_key: &str,
) -> Result<Option<Uuid>, DatabaseError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM health_records
             WHERE user_id = ?1 AND category = ?2 AND secondary_key = ?3 LIMIT 1",
            params![user_id, category, secondary_key],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|s| parse_uuid(&s)).transpose()
}

/// Records dated on or after `since`, newest first.
pub fn get_health_records_since(
    conn: &Connection,
    user_id: &str,
    category: &str,
    since: &NaiveDate,
    limit: usize,
) -> Result<Vec<HealthRecord>, DatabaseError> {
    let sql = format!(
        "{SELECT_COLUMNS} WHERE user_id = ?1 AND category = ?2 AND record_date >= ?3
         ORDER BY record_date DESC, created_at DESC LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows = stmt.query_map(
        params![user_id, category, since.format(DATE_FORMAT).to_string(), limit],
        record_row_from_rusqlite,
    )?;

    let mut records = Vec::new();
    for row in rows {
        records.push(record_from_row(row?)?);
    }
    Ok(records)
}

pub fn get_health_record(conn: &Connection, id: &Uuid) -> Result<Option<HealthRecord>, DatabaseError> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], record_row_from_rusqlite)
        .optional()?;
    row.map(record_from_row).transpose()
}

pub fn count_health_records(
    conn: &Connection,
    user_id: &str,
    category: &str,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM health_records WHERE user_id = ?1 AND category = ?2",
        params![user_id, category],
        |row| row.get::<_, u32>(0),
    )?;
    Ok(count)
}

// Internal row type for HealthRecord mapping
struct RecordRow {
    id: String,
    user_id: String,
    category: String,
    label: String,
    record_date: String,
    source: Option<String>,
    primary_key: String,
    secondary_key: Option<String>,
    payload: String,
    document_ref: Option<String>,
    created_at: String,
}

fn record_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<RecordRow, rusqlite::Error> {
    Ok(RecordRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        label: row.get(3)?,
        record_date: row.get(4)?,
        source: row.get(5)?,
        primary_key: row.get(6)?,
        secondary_key: row.get(7)?,
        payload: row.get(8)?,
        document_ref: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn record_from_row(row: RecordRow) -> Result<HealthRecord, DatabaseError> {
    Ok(HealthRecord {
        id: parse_uuid(&row.id)?,
        user_id: row.user_id,
        category: row.category,
        label: row.label,
        record_date: NaiveDate::parse_from_str(&row.record_date, DATE_FORMAT).map_err(|e| {
            DatabaseError::CorruptColumn {
                column: "record_date".into(),
                reason: e.to_string(),
            }
        })?,
        source: row.source,
        primary_key: row.primary_key,
        secondary_key: row.secondary_key,
        payload: serde_json::from_str(&row.payload).map_err(|e| DatabaseError::CorruptColumn {
            column: "payload".into(),
            reason: e.to_string(),
        })?,
        document_ref: row.document_ref,
        created_at: NaiveDateTime::parse_from_str(&row.created_at, TIMESTAMP_FORMAT)
            .unwrap_or_default(),
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::CorruptColumn {
        column: "id".into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use serde_json::json;

    fn record(user: &str, category: &str, key: &str, date: &str) -> HealthRecord {
        HealthRecord {
            id: Uuid::new_v4(),
            user_id: user.into(),
            category: category.into(),
            label: "Glucose".into(),
            record_date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            source: Some("City Lab".into()),
            primary_key: key.into(),
            secondary_key: Some(format!("{key}-secondary")),
            payload: json!({"test_name": "Glucose", "value": 5.4}),
            document_ref: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let conn = open_memory_database().unwrap();
        let rec = record("u1", "lab", "k1", "2024-01-15");
        insert_health_record(&conn, &rec).unwrap();

        let loaded = get_health_record(&conn, &rec.id).unwrap().unwrap();
        assert_eq!(loaded.label, "Glucose");
        assert_eq!(loaded.payload["value"], json!(5.4));
        assert_eq!(loaded.record_date, rec.record_date);
    }

    #[test]
    fn natural_key_lookups_are_scoped_by_user_and_category() {
        let conn = open_memory_database().unwrap();
        let rec = record("u1", "lab", "k1", "2024-01-15");
        insert_health_record(&conn, &rec).unwrap();

        assert_eq!(find_by_primary_key(&conn, "u1", "lab", "k1").unwrap(), Some(rec.id));
        assert_eq!(find_by_primary_key(&conn, "u2", "lab", "k1").unwrap(), None);
        assert_eq!(find_by_primary_key(&conn, "u1", "vitals", "k1").unwrap(), None);
        assert_eq!(
            find_by_secondary_key(&conn, "u1", "lab", "k1-secondary").unwrap(),
            Some(rec.id)
        );
    }

    #[test]
    fn unique_index_rejects_same_primary_key() {
        let conn = open_memory_database().unwrap();
        insert_health_record(&conn, &record("u1", "lab", "k1", "2024-01-15")).unwrap();
        let err = insert_health_record(&conn, &record("u1", "lab", "k1", "2024-01-15")).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn records_since_filters_and_orders() {
        let conn = open_memory_database().unwrap();
        insert_health_record(&conn, &record("u1", "lab", "a", "2023-01-01")).unwrap();
        insert_health_record(&conn, &record("u1", "lab", "b", "2024-02-01")).unwrap();
        insert_health_record(&conn, &record("u1", "lab", "c", "2024-03-01")).unwrap();

        let since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let records = get_health_records_since(&conn, "u1", "lab", &since, 10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].primary_key, "c");

        let limited = get_health_records_since(&conn, "u1", "lab", &since, 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(count_health_records(&conn, "u1", "lab").unwrap(), 3);
    }
}
