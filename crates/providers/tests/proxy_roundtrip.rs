//! Integration tests for the provider adapters against a mock proxy server.
//!
//! The mock is a small axum router bound to an ephemeral port. It records
//! every request it receives so tests can assert on the translated wire
//! payloads as well as on the normalized results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use genflow_core::config::{AspectRatio, CanonicalConfig};
use genflow_core::error::GenerationError;
use genflow_core::job::JobStatus;
use genflow_core::types::{Category, ProviderKind};
use genflow_providers::{ProviderAdapter, ProviderRegistry, ProxyClient, SubmitRequest};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Mock proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    api_key: Option<String>,
    body: Option<Value>,
}

#[derive(Clone, Default)]
struct Mock {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Mock {
    fn record(&self, path: &str, headers: &HeaderMap, body: Option<Value>) {
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            api_key: headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn sutu_submit(
    State(mock): State<Mock>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.record("/api/sutu/v1/videos", &headers, Some(body));
    Json(json!({"id": "v-1", "status": "queued", "progress": 0, "created_at": 1_700_000_000}))
}

async fn sutu_status(
    State(mock): State<Mock>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Json<Value> {
    mock.record(&format!("/api/sutu/v1/videos/{id}"), &headers, None);
    Json(json!({
        "id": id,
        "status": "completed",
        "progress": 100,
        "video_url": format!("https://cdn.example/{id}.mp4"),
    }))
}

async fn kie_submit(
    State(mock): State<Mock>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.record("/api/kie/api/v1/jobs/createTask", &headers, Some(body));
    Json(json!({"code": 200, "msg": "success", "data": {"taskId": "k-9"}}))
}

async fn kie_record(
    State(mock): State<Mock>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let task_id = query.get("taskId").cloned().unwrap_or_default();
    mock.record("/api/kie/api/v1/jobs/recordInfo", &headers, None);
    Json(json!({
        "code": 200,
        "data": {"taskId": task_id, "state": "generating", "progress": 55}
    }))
}

async fn dayu_status_fails() -> impl IntoResponse {
    (StatusCode::BAD_GATEWAY, "upstream exploded")
}

async fn yunwu_status_html() -> impl IntoResponse {
    (StatusCode::OK, "<html>maintenance</html>")
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Start the mock proxy on an ephemeral port and return its base URL.
async fn spawn_proxy() -> (String, Mock) {
    let mock = Mock::default();
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/sutu/v1/videos", post(sutu_submit))
        .route("/api/sutu/v1/videos/{id}", get(sutu_status))
        .route("/api/kie/api/v1/jobs/createTask", post(kie_submit))
        .route("/api/kie/api/v1/jobs/recordInfo", get(kie_record))
        .route("/api/dayu/v1/videos/generations/{id}", get(dayu_status_fails))
        .route("/api/yunwu/v1/video/query", get(yunwu_status_html))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), mock)
}

fn registry(base_url: &str) -> ProviderRegistry {
    ProviderRegistry::with_defaults(ProxyClient::new(base_url, Duration::from_secs(5)).unwrap())
}

fn video_request(model: &str, config: CanonicalConfig) -> SubmitRequest {
    SubmitRequest {
        model: model.into(),
        category: Category::Video,
        prompt: "a lighthouse in a storm".into(),
        config,
    }
}

// ---------------------------------------------------------------------------
// Test: submission translates the canonical config and sends the key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sutu_submit_sends_translated_body_and_api_key() {
    let (base_url, mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Sutu).unwrap();

    let config = CanonicalConfig {
        aspect_ratio: AspectRatio::Portrait,
        duration_secs: 15,
        hd: true,
        reference_asset: Some("https://assets.example/ref.png".into()),
    };
    let submitted = adapter
        .submit_task(&video_request("sora-2", config), "sk-sutu")
        .await
        .unwrap();

    assert_eq!(submitted.id, "v-1");
    assert_eq!(submitted.status, JobStatus::Queued);
    assert_eq!(submitted.created_at.timestamp(), 1_700_000_000);

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].api_key.as_deref(), Some("sk-sutu"));
    let body = requests[0].body.clone().unwrap();
    assert_eq!(body["model"], "sora-2");
    assert_eq!(body["orientation"], "portrait");
    assert_eq!(body["duration"], 15);
    assert_eq!(body["size"], "large");
    assert_eq!(body["image_url"], "https://assets.example/ref.png");
}

// ---------------------------------------------------------------------------
// Test: status check normalizes and reports progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sutu_status_completes_and_reports_progress() {
    let (base_url, _mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Sutu).unwrap();

    let seen = Mutex::new(Vec::new());
    let callback = |p: u8| seen.lock().unwrap().push(p);
    let update = adapter
        .check_status("v-1", "sk-sutu", Some(&callback))
        .await
        .unwrap();

    assert_eq!(update.status, JobStatus::Completed);
    assert_eq!(
        update.result.unwrap().artifact_url,
        "https://cdn.example/v-1.mp4"
    );
    assert_eq!(*seen.lock().unwrap(), vec![100]);
}

#[tokio::test]
async fn job_id_with_reserved_characters_stays_one_path_segment() {
    let (base_url, mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Sutu).unwrap();

    let update = adapter
        .check_status("v/2?draft#1", "sk-sutu", None)
        .await
        .unwrap();

    assert_eq!(update.status, JobStatus::Completed);
    assert_eq!(mock.requests()[0].path, "/api/sutu/v1/videos/v/2?draft#1");
}

#[tokio::test]
async fn kie_round_trip_uses_envelope_and_query_parameter() {
    let (base_url, mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Kie).unwrap();

    let submitted = adapter
        .submit_task(&video_request("sora-2-kie", CanonicalConfig::default()), "sk-kie")
        .await
        .unwrap();
    assert_eq!(submitted.id, "k-9");

    let update = adapter.check_status("k-9", "sk-kie", None).await.unwrap();
    assert_eq!(update.status, JobStatus::Processing);
    assert_eq!(update.progress, Some(55));

    let requests = mock.requests();
    let body = requests[0].body.clone().unwrap();
    assert_eq!(body["input"]["aspect_ratio"], "landscape");
    assert_eq!(body["input"]["n_frames"], "10");
    assert_eq!(requests[1].path, "/api/kie/api/v1/jobs/recordInfo");
}

// ---------------------------------------------------------------------------
// Test: error classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_success_status_is_provider_error_with_body() {
    let (base_url, _mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Dayu).unwrap();

    let err = adapter.check_status("d-1", "sk-dayu", None).await.unwrap_err();
    assert_matches!(
        err,
        GenerationError::Provider { provider: ProviderKind::Dayu, status: 502, ref body }
            if body == "upstream exploded"
    );
}

#[tokio::test]
async fn non_json_body_is_provider_error() {
    let (base_url, _mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Yunwu).unwrap();

    let err = adapter.check_status("y-1", "sk-yunwu", None).await.unwrap_err();
    assert_matches!(err, GenerationError::Provider { status: 200, .. });
}

#[tokio::test]
async fn unreachable_proxy_is_transport_error() {
    let adapter = registry("http://127.0.0.1:1").get(ProviderKind::Yijia).unwrap();

    let err = adapter.check_status("x", "sk-yijia", None).await.unwrap_err();
    assert_matches!(err, GenerationError::Transport { provider: ProviderKind::Yijia, .. });
    assert!(err.is_infrastructure());
}

#[tokio::test]
async fn blank_credential_never_reaches_the_proxy() {
    let (base_url, mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Sutu).unwrap();

    let err = adapter
        .submit_task(&video_request("sora-2", CanonicalConfig::default()), "")
        .await
        .unwrap_err();
    assert_matches!(err, GenerationError::Configuration(_));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn image_request_to_video_only_provider_is_rejected() {
    let (base_url, mock) = spawn_proxy().await;
    let adapter = registry(&base_url).get(ProviderKind::Sutu).unwrap();

    let request = SubmitRequest {
        category: Category::Image,
        ..video_request("sora-2", CanonicalConfig::default())
    };
    let err = adapter.submit_task(&request, "sk-sutu").await.unwrap_err();
    assert_matches!(err, GenerationError::Configuration(_));
    assert!(mock.requests().is_empty());
}

// ---------------------------------------------------------------------------
// Test: readiness probe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn readiness_probe_succeeds_against_live_proxy() {
    let (base_url, _mock) = spawn_proxy().await;
    let client = ProxyClient::new(base_url, Duration::from_secs(5)).unwrap();

    assert!(client.check_health().await);
    assert!(client.wait_until_ready(3, Duration::from_millis(10)).await);
}
