pub mod ehr;
pub mod error;
pub mod fhir_mapping;
pub mod launch;
pub mod models;
pub mod operation_outcome;

pub use ehr::{EhrConfig, EhrRegistry, DEFAULT_SCOPES, GENERIC_EHR};
pub use error::{CoreError, Result};
pub use fhir_mapping::{MappedObservation, MappingContext};
pub use launch::{build_authorize_url, LaunchState};
pub use models::{
    AuditEntry, ConnectionStatus, FhirConnection, LabObservation, MedicalRecord,
    NewFhirConnection,
};
pub use operation_outcome::{IssueSeverity, IssueType, OperationOutcome};
