//! Pull of remote Patient and Observation resources into local records
//!
//! A pass never aborts on a remote failure: fetch errors and entries that
//! cannot be mapped are collected as [`SyncFailure`]s and the rest of the
//! data is still written. The pass commits in one store transaction together
//! with the `last_synced_at` stamp and the caller's audit entry.

use chrono::{DateTime, Utc};
use medbridge_core::fhir_mapping::{bundle_resources, map_observation, map_patient, resource_type};
use medbridge_core::{AuditEntry, FhirConnection, LabObservation, MappingContext, MedicalRecord};
use medbridge_store::SqliteStore;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::{Result, SmartError};
use crate::fhir_client::FhirClient;
use crate::vault::CredentialVault;

/// Page size requested for the Observation search
pub const OBSERVATION_PAGE_SIZE: usize = 100;

/// Counts reported to the patient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// A Patient resource was fetched and recorded
    pub patient: bool,
    pub observations: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Patient,
    Observations,
    Observation,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStage::Patient => "patient",
            SyncStage::Observations => "observations",
            SyncStage::Observation => "observation",
        })
    }
}

/// A non-fatal problem met during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub stage: SyncStage,
    pub resource_id: Option<String>,
    pub kind: &'static str,
    pub reason: String,
}

/// Rows mapped from remote data, not yet written
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub connection_id: i64,
    pub patient: bool,
    pub labs: Vec<LabObservation>,
    pub records: Vec<MedicalRecord>,
    pub failures: Vec<SyncFailure>,
    pub synced_at: DateTime<Utc>,
}

/// Outcome of a committed pass
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub summary: SyncSummary,
    pub failures: Vec<SyncFailure>,
    pub synced_at: DateTime<Utc>,
}

impl SyncBatch {
    fn new(connection_id: i64, synced_at: DateTime<Utc>) -> Self {
        Self {
            connection_id,
            patient: false,
            labs: Vec::new(),
            records: Vec::new(),
            failures: Vec::new(),
            synced_at,
        }
    }

    fn fail(&mut self, stage: SyncStage, resource_id: Option<&str>, err: &SmartError) {
        tracing::warn!(
            connection_id = self.connection_id,
            stage = %stage,
            resource_id = resource_id.unwrap_or("-"),
            kind = err.kind(),
            error = %err,
            "FHIR sync step failed"
        );
        self.failures.push(SyncFailure {
            stage,
            resource_id: resource_id.map(String::from),
            kind: err.kind(),
            reason: err.to_string(),
        });
    }

    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            patient: self.patient,
            observations: self.labs.len(),
            records: self.records.len(),
        }
    }

    /// Write rows, stamp `last_synced_at` and append `audit`, atomically
    pub fn commit(self, store: &SqliteStore, audit: Option<&AuditEntry>) -> Result<SyncReport> {
        let summary = self.summary();
        store.in_transaction(|tx| {
            for lab in &self.labs {
                tx.insert_lab_observation(lab)?;
            }
            for record in &self.records {
                tx.insert_medical_record(record)?;
            }
            tx.mark_synced(self.connection_id, self.synced_at)?;
            if let Some(entry) = audit {
                tx.append_audit(entry)?;
            }
            Ok(())
        })?;

        tracing::info!(
            connection_id = self.connection_id,
            patient = summary.patient,
            observations = summary.observations,
            records = summary.records,
            failures = self.failures.len(),
            "FHIR sync committed"
        );

        Ok(SyncReport {
            summary,
            failures: self.failures,
            synced_at: self.synced_at,
        })
    }
}

pub struct SyncEngine<'a> {
    fhir: &'a FhirClient,
    vault: &'a CredentialVault,
}

impl<'a> SyncEngine<'a> {
    pub fn new(fhir: &'a FhirClient, vault: &'a CredentialVault) -> Self {
        Self { fhir, vault }
    }

    /// Fetch and map remote data for `connection` on behalf of `patient_id`
    pub async fn pull(
        &self,
        connection: &FhirConnection,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> SyncBatch {
        let mut batch = SyncBatch::new(connection.id, now);
        let ctx = MappingContext::new(patient_id, connection.ehr_name.as_str(), now);
        let access_token = self.vault.decrypt(&connection.access_token);
        let base = connection.fhir_base_url.trim_end_matches('/');
        let remote_patient = connection.remote_patient();
        let remote_patient_param = urlencoding::encode(remote_patient);

        let patient_url = format!("{}/Patient/{}", base, remote_patient_param);
        match self.fhir.get(&patient_url, &access_token).await {
            Ok(patient) => match map_patient(&patient, &ctx) {
                Some(record) => {
                    batch.patient = true;
                    batch.records.push(record);
                }
                None => {
                    let err = SmartError::MalformedFhirResource {
                        reason: format!(
                            "expected Patient, got {}",
                            resource_type(&patient).unwrap_or("no resourceType")
                        ),
                    };
                    batch.fail(SyncStage::Patient, Some(remote_patient), &err);
                }
            },
            Err(err) => batch.fail(SyncStage::Patient, Some(remote_patient), &err),
        }

        let observations_url = format!(
            "{}/Observation?patient={}&_count={}",
            base, remote_patient_param, OBSERVATION_PAGE_SIZE
        );
        match self.fhir.get(&observations_url, &access_token).await {
            Ok(bundle) => self.map_bundle(&bundle, &ctx, &mut batch),
            Err(err) => batch.fail(SyncStage::Observations, None, &err),
        }

        batch
    }

    fn map_bundle(&self, bundle: &Value, ctx: &MappingContext, batch: &mut SyncBatch) {
        for resource in bundle_resources(bundle) {
            match map_observation(resource, ctx) {
                Ok(Some(mapped)) => {
                    batch.labs.push(mapped.lab);
                    batch.records.push(mapped.record);
                }
                Ok(None) => {}
                Err(err) => {
                    let id = resource.get("id").and_then(Value::as_str);
                    batch.fail(SyncStage::Observation, id, &SmartError::from(err));
                }
            }
        }
    }

    /// Pull and commit one pass
    pub async fn sync(
        &self,
        store: &SqliteStore,
        connection: &FhirConnection,
        patient_id: &str,
        audit: Option<&AuditEntry>,
    ) -> Result<SyncReport> {
        let batch = self.pull(connection, patient_id, Utc::now()).await;
        batch.commit(store, audit)
    }
}
