use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    audit,
    config::{JwtSettings, DEV_JWT_SECRET},
    error::SmartError,
    AppState,
};

/// Paths served without a bearer token
const PUBLIC_PATHS: &[&str] = &["/health", "/api/fhir/callback"];

/// Authenticated patient
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    /// Local patient the request acts for
    pub patient_id: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = SmartError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| SmartError::Unauthorized("Authentication required".to_string()))
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: Option<String>,
    iss: Option<String>,
    aud: Option<serde_json::Value>,
    exp: Option<u64>,
    iat: Option<u64>,
    /// Local patient id issued by the login service
    #[serde(default)]
    patient_id: Option<String>,
    /// SMART launch context: patient ID
    #[serde(default)]
    patient: Option<String>,
}

/// Verifies bearer tokens against the configured key
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// HS256 with the configured secret, else RS256 with the public key file,
    /// else HS256 with the development secret
    pub fn from_settings(settings: &JwtSettings) -> Result<Self, String> {
        let (key, algorithm) = if let Some(ref secret) = settings.secret {
            (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
        } else if let Some(ref key_file) = settings.public_key_file {
            let pem = std::fs::read(key_file)
                .map_err(|e| format!("Failed to read public key file: {}", e))?;
            let key = DecodingKey::from_rsa_pem(&pem)
                .map_err(|e| format!("Invalid public key: {}", e))?;
            (key, Algorithm::RS256)
        } else {
            (DecodingKey::from_secret(DEV_JWT_SECRET.as_bytes()), Algorithm::HS256)
        };

        let mut validation = Validation::new(algorithm);

        if let Some(ref issuer) = settings.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = settings.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        Ok(Self { key, validation })
    }

    /// Decode a token into the patient it acts for
    pub fn verify(&self, token: &str) -> Result<AuthUser, SmartError> {
        let token_data: TokenData<JwtClaims> =
            jsonwebtoken::decode(token, &self.key, &self.validation)
                .map_err(|e| SmartError::Unauthorized(format!("Invalid JWT: {}", e)))?;
        let claims = token_data.claims;

        let patient_id = claims
            .patient_id
            .or(claims.patient)
            .or_else(|| claims.sub.clone())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SmartError::Unauthorized("Token carries no patient identity".to_string()))?;

        Ok(AuthUser {
            user_id: claims.sub.unwrap_or_else(|| patient_id.clone()),
            patient_id,
        })
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let client_ip = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(auth_header) = auth_header else {
        audit::log_auth_attempt(&client_ip, None, false);
        return Err(SmartError::Unauthorized("Missing Authorization header".to_string()).into_response());
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        audit::log_auth_attempt(&client_ip, None, false);
        return Err(SmartError::Unauthorized(
            "Invalid Authorization header format. Use 'Bearer <token>'".to_string(),
        )
        .into_response());
    };

    let auth_user = match state.jwt.verify(token.trim()) {
        Ok(user) => user,
        Err(e) => {
            audit::log_auth_attempt(&client_ip, None, false);
            return Err(e.into_response());
        }
    };

    audit::log_auth_attempt(&client_ip, Some(&auth_user.user_id), true);

    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}
