//! Authenticated reads against a remote FHIR server

use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, SmartError};

pub const FHIR_JSON: &str = "application/fhir+json";

#[derive(Clone)]
pub struct FhirClient {
    client: reqwest::Client,
}

impl FhirClient {
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// GET a FHIR resource or bundle as JSON
    pub async fn get(&self, url: &str, access_token: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| SmartError::FhirUnreachable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SmartError::FhirUpstream {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SmartError::FhirUnreachable {
                reason: e.to_string(),
            })?;

        serde_json::from_slice(&body).map_err(|e| SmartError::MalformedFhirResource {
            reason: format!("response from {} is not JSON: {}", url, e),
        })
    }
}
