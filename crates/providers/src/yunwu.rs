//! Yunwu adapter.
//!
//! Yunwu keeps the aspect ratio string but wants the duration as a string
//! and references as an `images` array. Its status response nests the
//! interesting parts under `detail`, with progress as a 0-1 fraction and an
//! explicit `content_violation` flag.

use async_trait::async_trait;
use genflow_core::config::CanonicalConfig;
use genflow_core::error::GenerationError;
use genflow_core::job::{JobStatus, StatusUpdate, SubmitResult};
use genflow_core::status::{parse_progress, Observation, StatusTable, COMMON_STATUSES};
use genflow_core::types::{Category, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapter::{
    finish_observation, non_empty, require_category, require_credential, timestamp_or_now,
    ProgressCallback, ProviderAdapter, SubmitRequest,
};
use crate::http::{decode, ProxyClient};

pub const PROXY_PATH: &str = "/api/yunwu";

const STATUSES: StatusTable = StatusTable::extending(
    &COMMON_STATUSES,
    &[
        ("image_downloading", JobStatus::Processing),
        ("video_generating", JobStatus::Processing),
        ("video_upsampling", JobStatus::Processing),
        ("video_generation_completed", JobStatus::Completed),
        ("video_generation_failed", JobStatus::Error),
    ],
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YunwuConfig {
    pub aspect_ratio: &'static str,
    pub duration: &'static str,
    pub hd: bool,
}

pub fn transform_config(config: &CanonicalConfig) -> YunwuConfig {
    YunwuConfig {
        aspect_ratio: config.aspect_ratio.as_str(),
        duration: if config.duration_secs <= 10 { "10" } else { "15" },
        hd: config.hd,
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detail: Option<Detail>,
}

#[derive(Debug, Default, Deserialize)]
struct Detail {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    progress_pct: Option<serde_json::Value>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    content_violation: Option<bool>,
    #[serde(default)]
    violation_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct YunwuAdapter {
    client: ProxyClient,
}

impl YunwuAdapter {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for YunwuAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Yunwu
    }

    fn categories(&self) -> &'static [Category] {
        &[Category::Video]
    }

    fn transform_config(&self, config: &CanonicalConfig) -> serde_json::Value {
        serde_json::json!(transform_config(config))
    }

    async fn submit_task(
        &self,
        request: &SubmitRequest,
        credential: &str,
    ) -> Result<SubmitResult, GenerationError> {
        require_credential(self.kind(), credential)?;
        require_category(self, request.category)?;

        let fields = transform_config(&request.config);
        let images: Vec<&str> = request.config.reference_asset.as_deref().into_iter().collect();
        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "images": images,
            "aspect_ratio": fields.aspect_ratio,
            "duration": fields.duration,
            "hd": fields.hd,
        });

        let url = self.client.url(PROXY_PATH, "/v1/video/create");
        let value = self
            .client
            .post_json(self.kind(), &url, credential, &body)
            .await?;
        let response: SubmitResponse = decode(self.kind(), &value)?;

        Ok(SubmitResult {
            id: response.id,
            status: STATUSES.map(response.status.as_deref().unwrap_or("pending")),
            progress: 0,
            created_at: timestamp_or_now(response.created_at),
        })
    }

    async fn check_status(
        &self,
        id: &str,
        credential: &str,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<StatusUpdate, GenerationError> {
        require_credential(self.kind(), credential)?;

        let url = self.client.url(PROXY_PATH, "/v1/video/query");
        let value = self
            .client
            .get_json(self.kind(), &url, credential, &[("id", id)])
            .await?;
        let response: StatusResponse = decode(self.kind(), &value)?;

        Ok(finish_observation(
            self.kind(),
            &STATUSES,
            observe(response, value),
            on_progress,
        ))
    }
}

fn observe(response: StatusResponse, raw: serde_json::Value) -> Observation {
    let detail = response.detail.unwrap_or_default();
    // The detail status is more specific than the top-level one.
    let native_status = non_empty(detail.status.as_deref())
        .or_else(|| non_empty(response.status.as_deref()))
        .unwrap_or_default();
    let violation = detail
        .content_violation
        .unwrap_or(false)
        .then(|| detail.violation_reason.clone().unwrap_or_default());

    Observation {
        native_status,
        progress: detail
            .progress_pct
            .as_ref()
            .and_then(|p| parse_progress(p, true)),
        artifact_url: non_empty(detail.video_url.as_deref()),
        failure_reason: non_empty(detail.failure_reason.as_deref()),
        violation,
        raw: Some(raw),
    }
}
