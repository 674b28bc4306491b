use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown EHR '{ehr}'. Use 'epic', 'cerner', or 'generic' with a fhir_url.")]
    InvalidEhr { ehr: String },

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Invalid FHIR timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid FHIR quantity value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
