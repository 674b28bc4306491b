//! Error taxonomy of the SMART integration and its HTTP mapping
//!
//! Responses carry a FHIR OperationOutcome whose issue details hold the
//! machine-readable kind. Upstream response bodies and storage details are
//! logged for operators and never placed in the response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use medbridge_core::{ConnectionStatus, CoreError, IssueType, OperationOutcome};
use medbridge_store::StoreError;
use thiserror::Error;

use crate::vault::VaultError;

#[derive(Error, Debug)]
pub enum SmartError {
    #[error("Unknown EHR '{ehr}'. Use 'epic', 'cerner', or 'generic' with a fhir_url.")]
    InvalidEhr { ehr: String },

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("Token exchange failed ({status})")]
    UpstreamToken { status: u16, body: String },

    #[error("Could not reach token endpoint: {reason}")]
    UpstreamUnreachable { reason: String },

    #[error("Malformed token response: {reason}")]
    MalformedTokenResponse { reason: String },

    #[error("FHIR server returned {status}: {reason}")]
    FhirUpstream { status: u16, reason: String },

    #[error("Could not reach FHIR server: {reason}")]
    FhirUnreachable { reason: String },

    #[error("Malformed FHIR resource: {reason}")]
    MalformedFhirResource { reason: String },

    #[error("FHIR connection not found")]
    NotFound,

    #[error("Connection is {}; cannot sync", .status.as_str())]
    InvalidStateTransition { status: ConnectionStatus },

    #[error("{0}")]
    Unauthorized(String),

    #[error("Credential encryption failed: {0}")]
    Encryption(#[from] VaultError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SmartError>;

impl From<CoreError> for SmartError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidEhr { ehr } => SmartError::InvalidEhr { ehr },
            CoreError::InvalidState => SmartError::InvalidState,
            CoreError::InvalidTimestamp(raw) => SmartError::MalformedFhirResource {
                reason: format!("invalid timestamp '{}'", raw),
            },
            CoreError::InvalidValue(raw) => SmartError::MalformedFhirResource {
                reason: format!("invalid quantity value '{}'", raw),
            },
        }
    }
}

impl SmartError {
    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SmartError::InvalidEhr { .. } => "invalid-ehr",
            SmartError::InvalidState => "invalid-state",
            SmartError::UpstreamToken { .. } => "upstream-token",
            SmartError::UpstreamUnreachable { .. } => "upstream-unreachable",
            SmartError::MalformedTokenResponse { .. } => "malformed-token-response",
            SmartError::FhirUpstream { .. } => "fhir-upstream",
            SmartError::FhirUnreachable { .. } => "fhir-unreachable",
            SmartError::MalformedFhirResource { .. } => "malformed-fhir-resource",
            SmartError::NotFound => "not-found",
            SmartError::InvalidStateTransition { .. } => "invalid-state-transition",
            SmartError::Unauthorized(_) => "unauthorized",
            SmartError::Encryption(_) => "encryption",
            SmartError::Storage(_) => "storage",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SmartError::InvalidEhr { .. }
            | SmartError::InvalidState
            | SmartError::InvalidStateTransition { .. } => StatusCode::BAD_REQUEST,
            SmartError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SmartError::NotFound => StatusCode::NOT_FOUND,
            SmartError::UpstreamToken { .. }
            | SmartError::UpstreamUnreachable { .. }
            | SmartError::MalformedTokenResponse { .. }
            | SmartError::FhirUpstream { .. }
            | SmartError::FhirUnreachable { .. }
            | SmartError::MalformedFhirResource { .. } => StatusCode::BAD_GATEWAY,
            SmartError::Encryption(_) | SmartError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn issue_type(&self) -> IssueType {
        match self {
            SmartError::InvalidEhr { .. } | SmartError::InvalidState => IssueType::Invalid,
            SmartError::InvalidStateTransition { .. } => IssueType::BusinessRule,
            SmartError::Unauthorized(_) => IssueType::Login,
            SmartError::NotFound => IssueType::NotFound,
            SmartError::UpstreamUnreachable { .. } | SmartError::FhirUnreachable { .. } => {
                IssueType::Transient
            }
            _ => IssueType::Exception,
        }
    }

    /// Message safe to show the patient
    pub fn public_message(&self) -> String {
        match self {
            SmartError::Encryption(_) | SmartError::Storage(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for SmartError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            SmartError::UpstreamToken { status: upstream, body } => {
                tracing::warn!(
                    kind = self.kind(),
                    upstream_status = upstream,
                    upstream_body = %body,
                    "Token exchange rejected by EHR"
                );
            }
            SmartError::Encryption(e) => {
                tracing::error!(kind = self.kind(), error = %e, "Request failed");
            }
            SmartError::Storage(e) => {
                tracing::error!(kind = self.kind(), error = %e, "Request failed");
            }
            _ if status.is_server_error() => {
                tracing::warn!(kind = self.kind(), error = %self, "Request failed");
            }
            _ => {
                tracing::debug!(kind = self.kind(), error = %self, "Request rejected");
            }
        }

        let outcome =
            OperationOutcome::error(self.issue_type(), self.public_message()).with_kind(self.kind());
        (status, Json(outcome)).into_response()
    }
}
