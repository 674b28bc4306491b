//! Persisted entities shared by the store and the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record type written for a synced Patient resource
pub const RECORD_TYPE_VISIT: &str = "visit";

/// Record type written for a synced Observation
pub const RECORD_TYPE_LAB: &str = "lab";

/// Lifecycle status of an EHR connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    /// Reserved for token-lifetime enforcement; nothing transitions here yet
    Expired,
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ConnectionStatus::Active),
            "expired" => Some(ConnectionStatus::Expired),
            "revoked" => Some(ConnectionStatus::Revoked),
            _ => None,
        }
    }
}

/// A patient's link to one remote FHIR server.
///
/// `access_token` and `refresh_token` hold vault output, never plaintext
/// when an encryption key is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct FhirConnection {
    pub id: i64,
    pub patient_id: String,
    pub ehr_name: String,
    pub fhir_base_url: String,
    pub patient_fhir_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl FhirConnection {
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    /// Remote patient reference used in FHIR queries
    pub fn remote_patient(&self) -> &str {
        self.patient_fhir_id.as_deref().unwrap_or("self")
    }
}

/// Values for a connection about to be inserted
#[derive(Debug, Clone)]
pub struct NewFhirConnection {
    pub patient_id: String,
    pub ehr_name: String,
    pub fhir_base_url: String,
    pub patient_fhir_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
}

/// Numeric lab result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabObservation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub patient_id: String,
    pub test_name: String,
    pub loinc: Option<String>,
    pub value: f64,
    pub unit: Option<String>,
    pub ref_range: Option<String>,
    pub status: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Entry in the patient's record timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub title: String,
    pub description: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub source: String,
    pub provider: String,
}

/// Append-only audit trail entry shown to the patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub patient_id: String,
    pub action: String,
    pub performed_by: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
}
