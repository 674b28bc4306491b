//! medbridge-server - SMART-on-FHIR integration service
//!
//! Links a patient's account to external EHRs over SMART-on-FHIR OAuth2 and
//! pulls their Patient and Observation data into local records.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod fhir_client;
pub mod handlers;
pub mod sync;
pub mod token_client;
pub mod vault;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use medbridge_core::EhrRegistry;
use medbridge_store::SqliteStore;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::auth::JwtVerifier;
use crate::config::ServerConfig;
use crate::fhir_client::FhirClient;
use crate::token_client::TokenClient;
use crate::vault::CredentialVault;

/// Application state
pub struct AppState {
    pub store: SqliteStore,
    pub config: ServerConfig,
    pub ehr_registry: EhrRegistry,
    pub jwt: JwtVerifier,
    pub vault: CredentialVault,
    pub token_client: TokenClient,
    pub fhir_client: FhirClient,
}

impl AppState {
    /// Build the shared state from configuration and an opened store
    pub fn new(config: ServerConfig, store: SqliteStore) -> Result<Self, Box<dyn std::error::Error>> {
        let vault = CredentialVault::from_config(config.smart.encryption_key.as_deref())?;
        let jwt = JwtVerifier::from_settings(&config.auth.jwt)?;
        let timeout = config.http_timeout();

        Ok(Self {
            store,
            ehr_registry: config.ehr_registry(),
            jwt,
            vault,
            token_client: TokenClient::new(timeout)?,
            fhir_client: FhirClient::new(timeout)?,
            config,
        })
    }
}

/// Build the application router with all routes and middleware
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // SMART-on-FHIR flow
        .route("/api/fhir/authorize", get(handlers::smart::authorize))
        .route("/api/fhir/callback", get(handlers::smart::callback))
        .route("/api/fhir/connections", get(handlers::smart::list_connections))
        .route(
            "/api/fhir/connections/{id}",
            axum::routing::delete(handlers::smart::delete_connection),
        )
        .route(
            "/api/fhir/connections/{id}/sync",
            post(handlers::smart::sync_connection),
        )
        // Synced data
        .route("/api/labs", get(handlers::records::list_labs))
        .route("/api/records", get(handlers::records::list_records))
        .route("/api/audit-log", get(handlers::records::audit_log))
        // Middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1MB
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
