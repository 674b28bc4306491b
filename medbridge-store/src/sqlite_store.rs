//! SQLite-based persistence
//!
//! Schema:
//!   - fhir_connections: one row per patient/EHR link, tokens as vault output
//!   - lab_observations, medical_records: rows written by sync
//!   - audit_log: append-only patient-facing trail
//!
//! Everything lives in one database file so a sync pass and its audit entry
//! commit together.

use chrono::{DateTime, Utc};
use medbridge_core::{
    AuditEntry, ConnectionStatus, FhirConnection, LabObservation, MedicalRecord,
    NewFhirConnection,
};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, Transaction};
use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};
use crate::{sqlite_audit, sqlite_records};

const CONNECTION_COLUMNS: &str = "id, patient_id, ehr_name, fhir_base_url, patient_fhir_id, \
     access_token, refresh_token, token_expires_at, status, created_at, last_synced_at";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl SqliteStore {
    /// Open the store (create if not exists)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for read-write concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS fhir_connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patient_id TEXT NOT NULL,
                ehr_name TEXT NOT NULL,
                fhir_base_url TEXT NOT NULL,
                patient_fhir_id TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                last_synced_at TEXT
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_connections_patient ON fhir_connections(patient_id)",
            [],
        )?;

        sqlite_records::create_tables(&conn)?;
        sqlite_audit::create_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a new active connection
    pub fn insert_connection(
        &self,
        new: &NewFhirConnection,
        created_at: DateTime<Utc>,
    ) -> Result<FhirConnection> {
        let conn = self.lock()?;
        insert_connection(&conn, new, created_at)
    }

    /// Get a connection by id, only if it belongs to `patient_id`
    pub fn get_connection(&self, id: i64, patient_id: &str) -> Result<Option<FhirConnection>> {
        let conn = self.lock()?;
        get_connection(&conn, id, patient_id)
    }

    /// All connections of a patient, oldest first
    pub fn list_connections(&self, patient_id: &str) -> Result<Vec<FhirConnection>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM fhir_connections WHERE patient_id = ?1 ORDER BY id",
            CONNECTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![patient_id], connection_from_row)?;

        let mut connections = Vec::new();
        for row in rows {
            connections.push(row?);
        }
        Ok(connections)
    }

    /// Hard-delete a connection owned by `patient_id`
    pub fn delete_connection(&self, id: i64, patient_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        delete_connection(&conn, id, patient_id)
    }

    /// Move a connection owned by `patient_id` to `status`
    pub fn set_connection_status(
        &self,
        id: i64,
        patient_id: &str,
        status: ConnectionStatus,
    ) -> Result<bool> {
        let conn = self.lock()?;
        set_connection_status(&conn, id, patient_id, status)
    }

    /// Lab observations of a patient, newest first
    pub fn list_lab_observations(&self, patient_id: &str) -> Result<Vec<LabObservation>> {
        let conn = self.lock()?;
        Ok(sqlite_records::list_labs(&conn, patient_id)?)
    }

    /// Medical records of a patient, newest first, optionally of one type
    pub fn list_medical_records(
        &self,
        patient_id: &str,
        record_type: Option<&str>,
    ) -> Result<Vec<MedicalRecord>> {
        let conn = self.lock()?;
        Ok(sqlite_records::list_records(&conn, patient_id, record_type)?)
    }

    /// Append an audit entry
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<i64> {
        let conn = self.lock()?;
        Ok(sqlite_audit::append(&conn, entry)?)
    }

    /// Most recent audit entries of a patient
    pub fn recent_audit(&self, patient_id: &str, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        Ok(sqlite_audit::recent(&conn, patient_id, limit)?)
    }

    /// Execute multiple operations atomically within an SQLite transaction
    pub fn in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TransactionOps<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let ops = TransactionOps { tx: &tx };
        let result = f(&ops)?;
        tx.commit()?;
        Ok(result)
    }
}

/// Operations available within a transaction
pub struct TransactionOps<'a> {
    tx: &'a Transaction<'a>,
}

#[allow(clippy::result_large_err)]
impl<'a> TransactionOps<'a> {
    pub fn insert_connection(
        &self,
        new: &NewFhirConnection,
        created_at: DateTime<Utc>,
    ) -> Result<FhirConnection> {
        insert_connection(self.tx.deref(), new, created_at)
    }

    pub fn delete_connection(&self, id: i64, patient_id: &str) -> Result<bool> {
        delete_connection(self.tx.deref(), id, patient_id)
    }

    pub fn set_connection_status(
        &self,
        id: i64,
        patient_id: &str,
        status: ConnectionStatus,
    ) -> Result<bool> {
        set_connection_status(self.tx.deref(), id, patient_id, status)
    }

    /// Stamp `last_synced_at`
    pub fn mark_synced(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.tx.execute(
            "UPDATE fhir_connections SET last_synced_at = ?1 WHERE id = ?2",
            params![at, id],
        )?;
        Ok(())
    }

    pub fn insert_lab_observation(&self, lab: &LabObservation) -> Result<i64> {
        Ok(sqlite_records::insert_lab(self.tx.deref(), lab)?)
    }

    pub fn insert_medical_record(&self, record: &MedicalRecord) -> Result<i64> {
        Ok(sqlite_records::insert_record(self.tx.deref(), record)?)
    }

    pub fn append_audit(&self, entry: &AuditEntry) -> Result<i64> {
        Ok(sqlite_audit::append(self.tx.deref(), entry)?)
    }
}

fn insert_connection(
    conn: &Connection,
    new: &NewFhirConnection,
    created_at: DateTime<Utc>,
) -> Result<FhirConnection> {
    conn.execute(
        r#"
        INSERT INTO fhir_connections
        (patient_id, ehr_name, fhir_base_url, patient_fhir_id, access_token,
         refresh_token, token_expires_at, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            new.patient_id,
            new.ehr_name,
            new.fhir_base_url,
            new.patient_fhir_id,
            new.access_token,
            new.refresh_token,
            new.token_expires_at,
            ConnectionStatus::Active.as_str(),
            created_at,
        ],
    )?;

    Ok(FhirConnection {
        id: conn.last_insert_rowid(),
        patient_id: new.patient_id.clone(),
        ehr_name: new.ehr_name.clone(),
        fhir_base_url: new.fhir_base_url.clone(),
        patient_fhir_id: new.patient_fhir_id.clone(),
        access_token: new.access_token.clone(),
        refresh_token: new.refresh_token.clone(),
        token_expires_at: Some(new.token_expires_at),
        status: ConnectionStatus::Active,
        created_at,
        last_synced_at: None,
    })
}

fn get_connection(conn: &Connection, id: i64, patient_id: &str) -> Result<Option<FhirConnection>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM fhir_connections WHERE id = ?1 AND patient_id = ?2",
        CONNECTION_COLUMNS
    ))?;
    Ok(stmt
        .query_row(params![id, patient_id], connection_from_row)
        .optional()?)
}

fn delete_connection(conn: &Connection, id: i64, patient_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM fhir_connections WHERE id = ?1 AND patient_id = ?2",
        params![id, patient_id],
    )?;
    Ok(rows > 0)
}

fn set_connection_status(
    conn: &Connection,
    id: i64,
    patient_id: &str,
    status: ConnectionStatus,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE fhir_connections SET status = ?1 WHERE id = ?2 AND patient_id = ?3",
        params![status.as_str(), id, patient_id],
    )?;
    Ok(rows > 0)
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<FhirConnection> {
    let status: String = row.get(8)?;
    let status = ConnectionStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            Type::Text,
            format!("unknown connection status '{}'", status).into(),
        )
    })?;

    Ok(FhirConnection {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        ehr_name: row.get(2)?,
        fhir_base_url: row.get(3)?,
        patient_fhir_id: row.get(4)?,
        access_token: row.get(5)?,
        refresh_token: row.get(6)?,
        token_expires_at: row.get(7)?,
        status,
        created_at: row.get(9)?,
        last_synced_at: row.get(10)?,
    })
}
