//! SMART launch state and authorization URL construction
//!
//! The OAuth callback is a stateless redirect target, so everything it needs
//! to resume the flow travels in the `state` query parameter as
//! `{patient_id}|{ehr}|{fhir_base}`.
//!
//! The state is not signed. Anyone who can craft a callback URL can bind an
//! authorization code to an arbitrary patient id; an HMAC over the state or a
//! server-side nonce mapping would close that gap.

use std::fmt;
use std::str::FromStr;

use crate::ehr::EhrConfig;
use crate::error::{CoreError, Result};

/// Separator between state components
pub const STATE_DELIMITER: char = '|';

/// Context carried through the EHR authorization round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchState {
    pub patient_id: String,
    pub ehr: String,
    pub fhir_base: String,
}

impl LaunchState {
    pub fn new(
        patient_id: impl Into<String>,
        ehr: impl Into<String>,
        fhir_base: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            ehr: ehr.into(),
            fhir_base: fhir_base.into(),
        }
    }

    /// Encode as the opaque `state` query value
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a `state` value received on the callback.
    ///
    /// Splits on the first two delimiters; the FHIR base is the remainder.
    pub fn parse(state: &str) -> Result<Self> {
        let mut parts = state.splitn(3, STATE_DELIMITER);
        let (Some(patient_id), Some(ehr), Some(fhir_base)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::InvalidState);
        };

        if patient_id.is_empty() || ehr.is_empty() {
            return Err(CoreError::InvalidState);
        }

        Ok(Self::new(patient_id, ehr, fhir_base))
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}",
            self.patient_id,
            self.ehr,
            self.fhir_base,
            d = STATE_DELIMITER
        )
    }
}

impl FromStr for LaunchState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Build the EHR authorization URL the patient's browser is sent to
pub fn build_authorize_url(
    config: &EhrConfig,
    client_id: &str,
    redirect_uri: &str,
    state: &LaunchState,
) -> String {
    let state = state.encode();
    let params = [
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("scope", config.scopes.as_str()),
        ("state", state.as_str()),
        ("aud", config.fhir_base.as_str()),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let separator = if config.authorize_url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", config.authorize_url, separator, query)
}
