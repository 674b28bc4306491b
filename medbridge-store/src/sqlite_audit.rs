//! Patient-facing audit trail
//!
//! Append-only: rows are inserted and listed, never updated or deleted.

use chrono::{DateTime, Utc};
use medbridge_core::AuditEntry;
use rusqlite::{params, Connection};

pub(crate) fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id TEXT NOT NULL,
            action TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            icon TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_patient ON audit_log(patient_id, created_at)",
        [],
    )?;

    Ok(())
}

/// Insert an entry, returning its row id
pub(crate) fn append(conn: &Connection, entry: &AuditEntry) -> rusqlite::Result<i64> {
    conn.execute(
        r#"
        INSERT INTO audit_log (patient_id, action, performed_by, icon, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            entry.patient_id,
            entry.action,
            entry.performed_by,
            entry.icon,
            entry.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent entries for a patient, newest first
pub(crate) fn recent(
    conn: &Connection,
    patient_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, patient_id, action, performed_by, icon, created_at
        FROM audit_log
        WHERE patient_id = ?1
        ORDER BY created_at DESC, id DESC
        LIMIT ?2
        "#,
    )?;

    let rows = stmt.query_map(params![patient_id, limit as i64], |row| {
        Ok(AuditEntry {
            id: Some(row.get(0)?),
            patient_id: row.get(1)?,
            action: row.get(2)?,
            performed_by: row.get(3)?,
            icon: row.get(4)?,
            created_at: row.get::<_, DateTime<Utc>>(5)?,
        })
    })?;

    rows.collect()
}
