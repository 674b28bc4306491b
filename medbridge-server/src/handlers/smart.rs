//! SMART-on-FHIR authorization flow and connection management
//!
//! `state` round-trips `{patient_id}|{ehr}|{fhir_base}` unsigned, so the
//! callback trusts whatever identity it carries. Signing it with an HMAC, or
//! keeping a server-side nonce map, would close that gap.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, SubsecRound, Utc};
use medbridge_core::{
    build_authorize_url, ConnectionStatus, FhirConnection, LaunchState, NewFhirConnection,
    GENERIC_EHR,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::audit::{self, AuditEvent};
use crate::auth::AuthUser;
use crate::error::{Result, SmartError};
use crate::sync::SyncEngine;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    pub ehr: String,
    pub fhir_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Connection as listed to its owner; tokens are never included
#[derive(Debug, Serialize)]
pub struct ConnectionView {
    pub id: i64,
    pub ehr_name: String,
    pub fhir_base_url: String,
    pub patient_fhir_id: Option<String>,
    pub status: ConnectionStatus,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<FhirConnection> for ConnectionView {
    fn from(c: FhirConnection) -> Self {
        Self {
            id: c.id,
            ehr_name: c.ehr_name,
            fhir_base_url: c.fhir_base_url,
            patient_fhir_id: c.patient_fhir_id,
            status: c.status,
            token_expires_at: c.token_expires_at,
            created_at: c.created_at,
            last_synced_at: c.last_synced_at,
        }
    }
}

/// Authorization URL for an EHR (GET /api/fhir/authorize)
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<AuthorizeParams>,
) -> Result<Json<Value>> {
    let config = state
        .ehr_registry
        .resolve(&params.ehr, params.fhir_url.as_deref())?;

    let launch = LaunchState::new(&user.patient_id, &params.ehr, &config.fhir_base);
    let authorize_url = build_authorize_url(
        &config,
        &state.config.smart.client_id,
        &state.config.smart.redirect_uri,
        &launch,
    );

    tracing::info!(
        patient_id = %user.patient_id,
        ehr = %params.ehr,
        fhir_base = %config.fhir_base,
        "SMART authorization started"
    );

    Ok(Json(json!({
        "authorize_url": authorize_url,
        "ehr": params.ehr,
    })))
}

/// OAuth2 redirect target (GET /api/fhir/callback)
///
/// Exchanges the code, persists the connection with its audit entry, then
/// runs the initial sync.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>> {
    let launch = LaunchState::parse(params.state.as_deref().unwrap_or_default())?;
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(SmartError::InvalidState)?;

    let generic_base = (launch.ehr == GENERIC_EHR).then_some(launch.fhir_base.as_str());
    let config = state.ehr_registry.resolve(&launch.ehr, generic_base)?;

    let tokens = state
        .token_client
        .exchange_code(
            &config.token_url,
            &code,
            &state.config.smart.redirect_uri,
            &state.config.smart.client_id,
        )
        .await?;

    let now = Utc::now().trunc_subsecs(0);
    let new = NewFhirConnection {
        patient_id: launch.patient_id.clone(),
        ehr_name: launch.ehr.clone(),
        fhir_base_url: config.fhir_base.clone(),
        patient_fhir_id: tokens.patient.clone(),
        access_token: state.vault.encrypt(&tokens.access_token)?,
        refresh_token: tokens
            .refresh_token
            .as_deref()
            .map(|t| state.vault.encrypt(t))
            .transpose()?,
        token_expires_at: tokens.expires_at(now),
    };

    let event = AuditEvent::ConnectionEstablished;
    let entry = event.entry(&launch.patient_id, &launch.ehr, now);
    let connection = state.store.in_transaction(|tx| {
        let connection = tx.insert_connection(&new, now)?;
        tx.append_audit(&entry)?;
        Ok(connection)
    })?;
    audit::log_event(event, &launch.patient_id, &launch.ehr, connection.id);

    let report = SyncEngine::new(&state.fhir_client, &state.vault)
        .sync(&state.store, &connection, &launch.patient_id, None)
        .await?;

    Ok(Json(json!({
        "status": "connected",
        "connection_id": connection.id,
        "ehr": launch.ehr,
        "patient_fhir_id": connection.patient_fhir_id,
        "sync": report.summary,
    })))
}

/// Connections of the authenticated patient (GET /api/fhir/connections)
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ConnectionView>>> {
    let connections = state.store.list_connections(&user.patient_id)?;
    Ok(Json(connections.into_iter().map(ConnectionView::from).collect()))
}

/// Re-sync an active connection (POST /api/fhir/connections/{id}/sync)
pub async fn sync_connection(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let connection = state
        .store
        .get_connection(id, &user.patient_id)?
        .ok_or(SmartError::NotFound)?;

    if !connection.is_active() {
        return Err(SmartError::InvalidStateTransition {
            status: connection.status,
        });
    }

    let now = Utc::now();
    let event = AuditEvent::DataResynced;
    let entry = event.entry(&user.patient_id, &connection.ehr_name, now);

    let batch = SyncEngine::new(&state.fhir_client, &state.vault)
        .pull(&connection, &user.patient_id, now)
        .await;
    let report = batch.commit(&state.store, Some(&entry))?;
    audit::log_event(event, &user.patient_id, &connection.ehr_name, connection.id);

    Ok(Json(json!({
        "status": "synced",
        "connection_id": connection.id,
        "sync": report.summary,
    })))
}

/// Remove a connection (DELETE /api/fhir/connections/{id})
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let connection = state
        .store
        .get_connection(id, &user.patient_id)?
        .ok_or(SmartError::NotFound)?;

    let event = AuditEvent::ConnectionRemoved;
    let entry = event.entry(&user.patient_id, &connection.ehr_name, Utc::now());
    let deleted = state.store.in_transaction(|tx| {
        let deleted = tx.delete_connection(id, &user.patient_id)?;
        if deleted {
            tx.append_audit(&entry)?;
        }
        Ok(deleted)
    })?;

    // Lost a race with a concurrent delete
    if !deleted {
        return Err(SmartError::NotFound);
    }
    audit::log_event(event, &user.patient_id, &connection.ehr_name, id);

    Ok(Json(json!({
        "status": "deleted",
        "connection_id": id,
    })))
}
