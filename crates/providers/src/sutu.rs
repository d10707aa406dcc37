//! Sutu adapter.
//!
//! Wire format: orientation words instead of aspect ratios, a numeric
//! duration, and a `small`/`large` size tier instead of an HD flag.
//!
//! | Canonical          | Sutu                                  |
//! |--------------------|---------------------------------------|
//! | `16:9` / `1:1`     | `orientation: "landscape"`            |
//! | `9:16`             | `orientation: "portrait"`             |
//! | duration <= 10     | `duration: 10`                        |
//! | duration > 10      | `duration: 15`                        |
//! | `hd`               | `size: "large"` (else `"small"`)      |

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

/// Proxy prefix for Sutu.
pub const PROXY_PATH: &str = "/api/sutu";

/// Error code Sutu uses for moderation rejections.
const CONTENT_POLICY_CODE: &str = "content_policy_violation";

const STATUSES: StatusTable = StatusTable::extending(&COMMON_STATUSES, &[]);

/// Sutu-specific generation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SutuConfig {
    pub orientation: &'static str,
    pub duration: u32,
    pub size: &'static str,
}

/// Canonical config -> Sutu fields.
pub fn transform_config(config: &CanonicalConfig) -> SutuConfig {
    SutuConfig {
        orientation: match config.aspect_ratio {
            AspectRatio::Portrait => "portrait",
            AspectRatio::Landscape | AspectRatio::Square => "landscape",
        },
        duration: if config.duration_secs <= 10 { 10 } else { 15 },
        size: if config.hd { "large" } else { "small" },
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
    progress: Option<serde_json::Value>,
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
    video_url: Option<String>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct SutuAdapter {
    client: ProxyClient,
}

impl SutuAdapter {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for SutuAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sutu
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
            "orientation": fields.orientation,
            "duration": fields.duration,
            "size": fields.size,
        });
        if let Some(reference) = &request.config.reference_asset {
            body["image_url"] = serde_json::Value::String(reference.clone());
        }

        let url = self.client.url(PROXY_PATH, "/v1/videos");
        let value = self
            .client
            .post_json(self.kind(), &url, credential, &body)
            .await?;
        let response: SubmitResponse = decode(self.kind(), &value)?;

        Ok(SubmitResult {
            id: response.id,
            status: STATUSES.map(response.status.as_deref().unwrap_or("queued")),
            progress: response
                .progress
                .as_ref()
                .and_then(|p| parse_progress(p, false))
                .unwrap_or(0),
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

        let url = self.client.resource_url(PROXY_PATH, "/v1/videos", id)?;
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
    let (failure_reason, violation) = match &response.error {
        Some(err) => {
            let message = non_empty(err.message.as_deref());
            if err.code.as_deref() == Some(CONTENT_POLICY_CODE) {
                (None, Some(message.unwrap_or_default()))
            } else {
                (message, None)
            }
        }
        None => (None, None),
    };

    Observation {
        native_status: response.status.unwrap_or_default(),
        progress: response
            .progress
            .as_ref()
            .and_then(|p| parse_progress(p, false)),
        artifact_url: non_empty(response.video_url.as_deref()),
        failure_reason,
        violation,
        raw: Some(raw),
    }
}
