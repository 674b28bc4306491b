use chrono::{DateTime, Utc};
use medbridge_core::AuditEntry;

/// Actor shown for patient-initiated actions
pub const PERFORMED_BY_PATIENT: &str = "You";

pub const SYNC_ICON: &str = "sync";

/// Patient-visible events of the EHR integration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    ConnectionEstablished,
    DataResynced,
    ConnectionRemoved,
}

impl AuditEvent {
    pub fn as_str(&self) -> &str {
        match self {
            AuditEvent::ConnectionEstablished => "connection_established",
            AuditEvent::DataResynced => "data_resynced",
            AuditEvent::ConnectionRemoved => "connection_removed",
        }
    }

    pub fn action(&self, ehr: &str) -> String {
        match self {
            AuditEvent::ConnectionEstablished => format!("FHIR connection established ({})", ehr),
            AuditEvent::DataResynced => format!("FHIR data re-synced ({})", ehr),
            AuditEvent::ConnectionRemoved => format!("FHIR connection removed ({})", ehr),
        }
    }

    /// Entry to persist for `patient_id`
    pub fn entry(&self, patient_id: &str, ehr: &str, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: None,
            patient_id: patient_id.to_string(),
            action: self.action(ehr),
            performed_by: PERFORMED_BY_PATIENT.to_string(),
            icon: SYNC_ICON.to_string(),
            created_at: at,
        }
    }
}

/// Log an audit event once it has been committed
pub fn log_event(event: AuditEvent, patient_id: &str, ehr: &str, connection_id: i64) {
    tracing::info!(
        patient_id = patient_id,
        ehr = ehr,
        connection_id = connection_id,
        event = event.as_str(),
        "Audit: {}",
        event.action(ehr)
    );
}

/// Log an authentication attempt
pub fn log_auth_attempt(client_ip: &str, user_id: Option<&str>, success: bool) {
    if success {
        tracing::info!(
            user_id = user_id.unwrap_or("unknown"),
            client_ip = %client_ip,
            status = "success",
            "Audit: Authentication successful"
        );
    } else {
        tracing::warn!(
            client_ip = %client_ip,
            status = "failed",
            "Audit: Authentication failed"
        );
    }
}
