//! Dayu adapter.
//!
//! Dayu takes pixel sizes instead of ratios and a fixed set of clip
//! lengths (4, 8 or 12 seconds). Moderation results come back in a separate
//! `moderation` object.

use async_trait::async_trait;
use genflow_core::config::{AspectRatio, CanonicalConfig};
use genflow_core::error::GenerationError;
use genflow_core::job::{StatusUpdate, SubmitResult};
use genflow_core::status::{parse_progress, Observation, StatusTable, COMMON_STATUSES};
use genflow_core::types::{Category, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapter::{
    finish_observation, non_empty, require_category, require_credential, timestamp_or_now,
    ProgressCallback, ProviderAdapter, SubmitRequest,
};
use crate::http::{decode, ProxyClient};

pub const PROXY_PATH: &str = "/api/dayu";

const STATUSES: StatusTable = StatusTable::extending(&COMMON_STATUSES, &[]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayuConfig {
    pub size: &'static str,
    pub seconds: &'static str,
}

pub fn transform_config(config: &CanonicalConfig) -> DayuConfig {
    let size = match (config.aspect_ratio, config.hd) {
        (AspectRatio::Landscape, false) => "1280x720",
        (AspectRatio::Landscape, true) => "1792x1024",
        (AspectRatio::Portrait, false) => "720x1280",
        (AspectRatio::Portrait, true) => "1024x1792",
        (AspectRatio::Square, _) => "1024x1024",
    };
    let seconds = match config.duration_secs {
        0..=4 => "4",
        5..=8 => "8",
        _ => "12",
    };
    DayuConfig { size, seconds }
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
    progress: Option<serde_json::Value>,
    #[serde(default)]
    data: Option<Output>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    moderation: Option<Moderation>,
}

#[derive(Debug, Deserialize)]
struct Output {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Moderation {
    #[serde(default)]
    flagged: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct DayuAdapter {
    client: ProxyClient,
}

impl DayuAdapter {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for DayuAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dayu
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
        let mut body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "size": fields.size,
            "seconds": fields.seconds,
        });
        if let Some(reference) = &request.config.reference_asset {
            body["input_reference"] = serde_json::Value::String(reference.clone());
        }

        let url = self.client.url(PROXY_PATH, "/v1/videos/generations");
        let value = self
            .client
            .post_json(self.kind(), &url, credential, &body)
            .await?;
        let response: SubmitResponse = decode(self.kind(), &value)?;

        Ok(SubmitResult {
            id: response.id,
            status: STATUSES.map(response.status.as_deref().unwrap_or("queued")),
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

        let url = self
            .client
            .resource_url(PROXY_PATH, "/v1/videos/generations", id)?;
        let value = self.client.get_json(self.kind(), &url, credential, &[]).await?;
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
    let violation = response
        .moderation
        .filter(|m| m.flagged.unwrap_or(false))
        .map(|m| m.reason.unwrap_or_default());

    Observation {
        native_status: response.status.unwrap_or_default(),
        progress: response
            .progress
            .as_ref()
            .and_then(|p| parse_progress(p, false)),
        artifact_url: response
            .data
            .and_then(|d| non_empty(d.url.as_deref())),
        failure_reason: response
            .error
            .and_then(|e| non_empty(e.message.as_deref())),
        violation,
        raw: Some(raw),
    }
}
