use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use medbridge_core::{LabObservation, MedicalRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::AppState;

/// Entries returned by the audit log endpoint
pub const AUDIT_LOG_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct RecordsParams {
    #[serde(rename = "type")]
    pub record_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditView {
    pub id: Option<i64>,
    pub action: String,
    pub by: String,
    pub when: DateTime<Utc>,
    pub icon: String,
}

/// Lab observations, newest first (GET /api/labs)
pub async fn list_labs(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<LabObservation>>> {
    Ok(Json(state.store.list_lab_observations(&user.patient_id)?))
}

/// Medical records, newest first (GET /api/records?type=)
///
/// `type=all` is the same as no filter.
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<RecordsParams>,
) -> Result<Json<Vec<MedicalRecord>>> {
    let record_type = params
        .record_type
        .as_deref()
        .filter(|t| !t.is_empty() && *t != "all");
    Ok(Json(
        state
            .store
            .list_medical_records(&user.patient_id, record_type)?,
    ))
}

/// Most recent audit entries (GET /api/audit-log)
pub async fn audit_log(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<AuditView>>> {
    let entries = state.store.recent_audit(&user.patient_id, AUDIT_LOG_LIMIT)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| AuditView {
                id: e.id,
                action: e.action,
                by: e.performed_by,
                when: e.created_at,
                icon: e.icon,
            })
            .collect(),
    ))
}
