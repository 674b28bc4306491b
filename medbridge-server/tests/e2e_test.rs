//! End-to-end integration test
//!
//! Drives the SMART-on-FHIR flow against a mock EHR:
//! authorize -> callback (token exchange + initial sync) -> list -> re-sync -> delete

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::Duration;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use medbridge_core::ConnectionStatus;
use medbridge_server::{build_router, config::ServerConfig, AppState};
use medbridge_store::SqliteStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

const JWT_SECRET: &str = "e2e-test-secret-0123456789";
const ENCRYPTION_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const EHR_ACCESS_TOKEN: &str = "ehr-access-token";

#[derive(Clone)]
struct MockEhr {
    token_status: StatusCode,
    token_body: Value,
}

impl MockEhr {
    fn granting() -> Self {
        Self {
            token_status: StatusCode::OK,
            token_body: json!({
                "access_token": EHR_ACCESS_TOKEN,
                "refresh_token": "ehr-refresh-token",
                "token_type": "Bearer",
                "expires_in": 1800,
                "patient": "remote-42"
            }),
        }
    }
}

async fn mock_token(
    State(mock): State<Arc<MockEhr>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if form.get("grant_type").map(String::as_str) != Some("authorization_code")
        || form.get("code").map(String::as_str) != Some("auth-code-1")
    {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})));
    }
    (mock.token_status, Json(mock.token_body.clone()))
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", EHR_ACCESS_TOKEN);
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

async fn mock_patient(Path(id): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "resourceType": "Patient",
            "id": id,
            "name": [{"given": ["Maria", "Elena"], "family": "Garcia"}],
            "birthDate": "1980-04-02"
        })),
    )
}

async fn mock_observations(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let observation = |id: &str, code: &str, name: &str, value: Option<f64>, unit: &str| {
        let mut obs = json!({
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"system": "http://loinc.org", "code": code, "display": name}]},
            "effectiveDateTime": "2024-05-10T09:15:00Z",
            "referenceRange": [{"low": {"value": 70}, "high": {"value": 99}}]
        });
        if let Some(v) = value {
            obs["valueQuantity"] = json!({"value": v, "unit": unit});
        }
        obs
    };
    (
        StatusCode::OK,
        Json(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": observation("o1", "2345-7", "Glucose", Some(92.0), "mg/dL")},
                {"resource": observation("o2", "4548-4", "Hemoglobin A1c", Some(5.6), "%")},
                {"resource": observation("o3", "2093-3", "Cholesterol", None, "mg/dL")}
            ]
        })),
    )
}

/// Start a mock EHR (token endpoint + FHIR API) on a random port
async fn start_mock_ehr(mock: MockEhr) -> String {
    let app = Router::new()
        .route("/auth/token", post(mock_token))
        .route("/Patient/{id}", get(mock_patient))
        .route("/Observation", get(mock_observations))
        .with_state(Arc::new(mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Start a test server on a random port, returns (base_url, state, _temp_dir)
async fn start_test_server() -> (String, Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().unwrap();

    let mut config = ServerConfig::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();
    config.auth.jwt.secret = Some(JWT_SECRET.to_string());
    config.smart.encryption_key = Some(ENCRYPTION_KEY.to_string());
    config.smart.http_timeout_secs = 5;

    let store = SqliteStore::open(config.database_path()).unwrap();
    let state = Arc::new(AppState::new(config, store).unwrap());

    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), state, temp_dir)
}

fn bearer(patient_id: &str) -> String {
    let claims = json!({
        "sub": format!("user-{}", patient_id),
        "patient_id": patient_id,
        "exp": chrono::Utc::now().timestamp() as u64 + 3600,
        "iat": chrono::Utc::now().timestamp() as u64,
    });
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

fn error_kind(body: &Value) -> &str {
    body["issue"][0]["details"]["coding"][0]["code"]
        .as_str()
        .unwrap_or_default()
}

/// Run authorize + callback for `patient_id` against the mock EHR
async fn connect(
    client: &reqwest::Client,
    base_url: &str,
    ehr_url: &str,
    patient_id: &str,
) -> reqwest::Response {
    let resp = client
        .get(format!("{}/api/fhir/authorize", base_url))
        .query(&[("ehr", "generic"), ("fhir_url", ehr_url)])
        .header("Authorization", bearer(patient_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let authorize_url = reqwest::Url::parse(body["authorize_url"].as_str().unwrap()).unwrap();
    let state = authorize_url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    client
        .get(format!("{}/api/fhir/callback", base_url))
        .query(&[("code", "auth-code-1"), ("state", state.as_str())])
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let (base_url, _state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/fhir/connections", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(error_kind(&body), "unauthorized");

    let resp = client
        .get(format!("{}/api/fhir/connections", base_url))
        .header("Authorization", "Bearer not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_authorize_url() {
    let (base_url, _state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/fhir/authorize?ehr=epic", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ehr"], "epic");

    let url = reqwest::Url::parse(body["authorize_url"].as_str().unwrap()).unwrap();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["client_id"], "medbridge-local-dev");
    assert_eq!(query["redirect_uri"], "http://localhost:8000/api/fhir/callback");
    assert!(query["state"].starts_with("p1|epic|"));
    assert_eq!(query["aud"], query["state"].splitn(3, '|').nth(2).unwrap());
}

#[tokio::test]
async fn test_authorize_rejects_unknown_ehr() {
    let (base_url, _state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    for query in ["ehr=meditech", "ehr=generic", "ehr=generic&fhir_url="] {
        let resp = client
            .get(format!("{}/api/fhir/authorize?{}", base_url, query))
            .header("Authorization", bearer("p1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "query {}", query);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(error_kind(&body), "invalid-ehr");
    }
}

#[tokio::test]
async fn test_callback_invalid_state() {
    let (base_url, _state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/fhir/callback", base_url))
        .query(&[("code", "auth-code-1"), ("state", "only-one-part")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(error_kind(&body), "invalid-state");
    assert_eq!(body["issue"][0]["diagnostics"], "Invalid state parameter");
}

#[tokio::test]
async fn test_full_connection_flow() {
    let ehr_url = start_mock_ehr(MockEhr::granting()).await;
    let (base_url, state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // Callback: token exchange + initial sync
    let resp = connect(&client, &base_url, &ehr_url, "p1").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "connected");
    assert_eq!(body["ehr"], "generic");
    assert_eq!(body["patient_fhir_id"], "remote-42");
    assert_eq!(body["sync"]["patient"], true);
    assert_eq!(body["sync"]["observations"], 2);
    assert_eq!(body["sync"]["records"], 3);
    let connection_id = body["connection_id"].as_i64().unwrap();

    // Stored row: encrypted tokens, expiry from expires_in
    let stored = state
        .store
        .get_connection(connection_id, "p1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.status.as_str(), "active");
    assert_eq!(stored.fhir_base_url, ehr_url);
    assert_ne!(stored.access_token, EHR_ACCESS_TOKEN);
    assert_eq!(state.vault.decrypt(&stored.access_token), EHR_ACCESS_TOKEN);
    let refresh = stored.refresh_token.as_deref().unwrap();
    assert_ne!(refresh, "ehr-refresh-token");
    assert_eq!(state.vault.decrypt(refresh), "ehr-refresh-token");
    assert_eq!(
        stored.token_expires_at,
        Some(stored.created_at + Duration::seconds(1800))
    );
    assert!(stored.last_synced_at.is_some());

    // Listing never exposes tokens
    let resp = client
        .get(format!("{}/api/fhir/connections", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let connections: Value = resp.json().await.unwrap();
    let listed = connections.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], connection_id);
    assert_eq!(listed[0]["status"], "active");
    assert!(listed[0].get("access_token").is_none());
    assert!(listed[0].get("refresh_token").is_none());
    assert!(!connections.to_string().contains(EHR_ACCESS_TOKEN));

    // Synced labs and records
    let labs: Value = client
        .get(format!("{}/api/labs", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let labs = labs.as_array().unwrap();
    assert_eq!(labs.len(), 2);
    assert!(labs.iter().all(|l| l["source"] == "FHIR:generic"));
    assert!(labs.iter().any(|l| l["test_name"] == "Glucose" && l["ref_range"] == "70-99"));

    let visits: Value = client
        .get(format!("{}/api/records?type=visit", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(visits.as_array().unwrap().len(), 1);
    assert_eq!(
        visits[0]["description"],
        "Patient: Maria Elena Garcia. Birth date: 1980-04-02."
    );

    // Re-sync appends
    let resp = client
        .post(format!(
            "{}/api/fhir/connections/{}/sync",
            base_url, connection_id
        ))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "synced");
    assert_eq!(body["sync"]["observations"], 2);

    let all_records: Value = client
        .get(format!("{}/api/records?type=all", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all_records.as_array().unwrap().len(), 6);

    // Delete
    let resp = client
        .delete(format!("{}/api/fhir/connections/{}", base_url, connection_id))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "deleted");
    assert_eq!(body["connection_id"], connection_id);
    assert!(state.store.list_connections("p1").unwrap().is_empty());

    // Audit trail, newest first
    let audit: Value = client
        .get(format!("{}/api/audit-log", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(
        actions,
        vec![
            "FHIR connection removed (generic)",
            "FHIR data re-synced (generic)",
            "FHIR connection established (generic)",
        ]
    );
    assert!(audit.as_array().unwrap().iter().all(|e| e["by"] == "You" && e["icon"] == "sync"));
}

#[tokio::test]
async fn test_other_patient_cannot_touch_connection() {
    let ehr_url = start_mock_ehr(MockEhr::granting()).await;
    let (base_url, state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let body: Value = connect(&client, &base_url, &ehr_url, "p1")
        .await
        .json()
        .await
        .unwrap();
    let connection_id = body["connection_id"].as_i64().unwrap();

    let resp = client
        .delete(format!("{}/api/fhir/connections/{}", base_url, connection_id))
        .header("Authorization", bearer("p2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(error_kind(&body), "not-found");

    let resp = client
        .post(format!(
            "{}/api/fhir/connections/{}/sync",
            base_url, connection_id
        ))
        .header("Authorization", bearer("p2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Untouched, and no audit entry for the other patient
    assert!(state.store.get_connection(connection_id, "p1").unwrap().is_some());
    assert!(state.store.recent_audit("p2", 50).unwrap().is_empty());
}

#[tokio::test]
async fn test_revoked_connection_cannot_sync() {
    let ehr_url = start_mock_ehr(MockEhr::granting()).await;
    let (base_url, state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let body: Value = connect(&client, &base_url, &ehr_url, "p1")
        .await
        .json()
        .await
        .unwrap();
    let connection_id = body["connection_id"].as_i64().unwrap();
    assert!(state
        .store
        .set_connection_status(connection_id, "p1", ConnectionStatus::Revoked)
        .unwrap());

    let labs_before = state.store.list_lab_observations("p1").unwrap().len();
    let records_before = state.store.list_medical_records("p1", None).unwrap().len();
    let audit_before = state.store.recent_audit("p1", 50).unwrap().len();
    let synced_before = state
        .store
        .get_connection(connection_id, "p1")
        .unwrap()
        .unwrap()
        .last_synced_at;

    let resp = client
        .post(format!(
            "{}/api/fhir/connections/{}/sync",
            base_url, connection_id
        ))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(error_kind(&body), "invalid-state-transition");
    assert_eq!(
        body["issue"][0]["diagnostics"],
        "Connection is revoked; cannot sync"
    );

    assert_eq!(state.store.list_lab_observations("p1").unwrap().len(), labs_before);
    assert_eq!(
        state.store.list_medical_records("p1", None).unwrap().len(),
        records_before
    );
    assert_eq!(state.store.recent_audit("p1", 50).unwrap().len(), audit_before);
    let stored = state.store.get_connection(connection_id, "p1").unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Revoked);
    assert_eq!(stored.last_synced_at, synced_before);
}

#[tokio::test]
async fn test_token_response_without_access_token() {
    let ehr_url = start_mock_ehr(MockEhr {
        token_status: StatusCode::OK,
        token_body: json!({"token_type": "Bearer", "expires_in": 3600}),
    })
    .await;
    let (base_url, state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = connect(&client, &base_url, &ehr_url, "p1").await;
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(error_kind(&body), "malformed-token-response");

    assert!(state.store.list_connections("p1").unwrap().is_empty());
    assert!(state.store.recent_audit("p1", 50).unwrap().is_empty());
}

#[tokio::test]
async fn test_token_endpoint_rejection_is_not_leaked() {
    let ehr_url = start_mock_ehr(MockEhr {
        token_status: StatusCode::UNAUTHORIZED,
        token_body: json!({"error": "invalid_client", "error_description": "client secret s3cr3t mismatch"}),
    })
    .await;
    let (base_url, state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = connect(&client, &base_url, &ehr_url, "p1").await;
    assert_eq!(resp.status(), 502);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("s3cr3t"));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(error_kind(&body), "upstream-token");

    assert!(state.store.list_connections("p1").unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_connection() {
    let (base_url, _state, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/fhir/connections/9999/sync", base_url))
        .header("Authorization", bearer("p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
