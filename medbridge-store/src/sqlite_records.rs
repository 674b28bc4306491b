//! Lab observations and medical records
//!
//! Rows are appended as-is. Re-syncing the same remote data produces
//! duplicates; a unique key on the remote resource id would make sync
//! idempotent.

use chrono::{DateTime, Utc};
use medbridge_core::{LabObservation, MedicalRecord};
use rusqlite::{params, Connection};

pub(crate) fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS lab_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id TEXT NOT NULL,
            test_name TEXT NOT NULL,
            loinc TEXT,
            value REAL NOT NULL,
            unit TEXT,
            ref_range TEXT,
            status TEXT NOT NULL,
            source TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS medical_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id TEXT NOT NULL,
            record_type TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            date TEXT NOT NULL,
            source TEXT NOT NULL,
            provider TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_labs_patient ON lab_observations(patient_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_patient ON medical_records(patient_id, record_type)",
        [],
    )?;

    Ok(())
}

pub(crate) fn insert_lab(conn: &Connection, lab: &LabObservation) -> rusqlite::Result<i64> {
    conn.execute(
        r#"
        INSERT INTO lab_observations
        (patient_id, test_name, loinc, value, unit, ref_range, status, source, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            lab.patient_id,
            lab.test_name,
            lab.loinc,
            lab.value,
            lab.unit,
            lab.ref_range,
            lab.status,
            lab.source,
            lab.timestamp,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_record(conn: &Connection, record: &MedicalRecord) -> rusqlite::Result<i64> {
    conn.execute(
        r#"
        INSERT INTO medical_records
        (patient_id, record_type, title, description, date, source, provider)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            record.patient_id,
            record.record_type,
            record.title,
            record.description,
            record.date,
            record.source,
            record.provider,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Labs for a patient, newest first
pub(crate) fn list_labs(conn: &Connection, patient_id: &str) -> rusqlite::Result<Vec<LabObservation>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, patient_id, test_name, loinc, value, unit, ref_range, status, source, timestamp
        FROM lab_observations
        WHERE patient_id = ?1
        ORDER BY timestamp DESC, id DESC
        "#,
    )?;

    let rows = stmt.query_map(params![patient_id], |row| {
        Ok(LabObservation {
            id: Some(row.get(0)?),
            patient_id: row.get(1)?,
            test_name: row.get(2)?,
            loinc: row.get(3)?,
            value: row.get(4)?,
            unit: row.get(5)?,
            ref_range: row.get(6)?,
            status: row.get(7)?,
            source: row.get(8)?,
            timestamp: row.get::<_, DateTime<Utc>>(9)?,
        })
    })?;

    rows.collect()
}

/// Records for a patient, newest date first, optionally of one type
pub(crate) fn list_records(
    conn: &Connection,
    patient_id: &str,
    record_type: Option<&str>,
) -> rusqlite::Result<Vec<MedicalRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, patient_id, record_type, title, description, date, source, provider
        FROM medical_records
        WHERE patient_id = ?1 AND (?2 IS NULL OR record_type = ?2)
        ORDER BY date DESC, id DESC
        "#,
    )?;

    let rows = stmt.query_map(params![patient_id, record_type], |row| {
        Ok(MedicalRecord {
            id: Some(row.get(0)?),
            patient_id: row.get(1)?,
            record_type: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            date: row.get(5)?,
            source: row.get(6)?,
            provider: row.get(7)?,
        })
    })?;

    rows.collect()
}
