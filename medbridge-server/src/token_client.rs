//! OAuth2 authorization-code exchange against an EHR token endpoint

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::time::Duration as StdDuration;

use crate::error::{Result, SmartError};

/// Lifetime assumed when the token response omits `expires_in`
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Tokens granted by the EHR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds
    pub expires_in: i64,
    /// SMART launch context: the patient id on the EHR side
    pub patient: Option<String>,
}

impl TokenResponse {
    /// Interpret a token endpoint JSON body
    pub fn from_json(body: &Value) -> Result<Self> {
        let malformed = |reason: &str| SmartError::MalformedTokenResponse {
            reason: reason.to_string(),
        };

        if !body.is_object() {
            return Err(malformed("body is not a JSON object"));
        }

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| malformed("missing access_token"))?
            .to_string();

        let expires_in = match body.get("expires_in") {
            None | Some(Value::Null) => DEFAULT_EXPIRES_IN,
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| malformed("invalid expires_in"))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| malformed("invalid expires_in"))?,
            Some(_) => return Err(malformed("invalid expires_in")),
        };
        if !(0..=i64::from(i32::MAX)).contains(&expires_in) {
            return Err(malformed("expires_in out of range"));
        }

        let text = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        Ok(Self {
            access_token,
            refresh_token: text("refresh_token"),
            expires_in,
            patient: text("patient"),
        })
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in)
    }
}

/// HTTP client for token endpoints
#[derive(Clone)]
pub struct TokenClient {
    client: reqwest::Client,
}

impl TokenClient {
    pub fn new(timeout: StdDuration) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(
        &self,
        token_url: &str,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
    ) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
        ];

        let response = self
            .client
            .post(token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| SmartError::UpstreamUnreachable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SmartError::UpstreamUnreachable {
                reason: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(SmartError::UpstreamToken {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value =
            serde_json::from_str(&body).map_err(|e| SmartError::MalformedTokenResponse {
                reason: format!("body is not JSON: {e}"),
            })?;

        let tokens = TokenResponse::from_json(&json)?;
        tracing::debug!(
            token_url = %token_url,
            expires_in = tokens.expires_in,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Token exchange succeeded"
        );
        Ok(tokens)
    }
}
