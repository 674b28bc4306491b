use serde::{Deserialize, Serialize};

/// Code system for the machine-readable error kind carried in `issue.details`
pub const ERROR_KIND_SYSTEM: &str = "urn:medbridge:error-kind";

/// FHIR OperationOutcome resource for error reporting
/// See: https://www.hl7.org/fhir/operationoutcome.html
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

/// Subset of the FHIR issue-type value set used by this service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Login,
    NotFound,
    BusinessRule,
    Exception,
    Transient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding: Option<Vec<Coding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl OperationOutcome {
    /// Create a new OperationOutcome with a single issue
    pub fn new(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
                details: None,
            }],
        }
    }

    /// Create an error OperationOutcome
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    /// Tag the last issue with a machine-readable error kind
    pub fn with_kind(mut self, kind: &str) -> Self {
        if let Some(issue) = self.issue.last_mut() {
            issue.details = Some(CodeableConcept {
                coding: Some(vec![Coding {
                    system: Some(ERROR_KIND_SYSTEM.to_string()),
                    code: Some(kind.to_string()),
                }]),
                text: None,
            });
        }
        self
    }

    /// Error kind of the first issue, if tagged
    pub fn kind(&self) -> Option<&str> {
        self.issue
            .first()?
            .details
            .as_ref()?
            .coding
            .as_ref()?
            .first()?
            .code
            .as_deref()
    }
}
