//! Kie adapter.
//!
//! Kie wraps every response in a `{code, msg, data}` envelope and reports a
//! non-200 `code` for rejected requests even when the HTTP status is 200.
//! Finished jobs carry their output URLs inside `resultJson`, a JSON
//! document encoded as a string.
//!
//! Kie serves both video and image models; image requests send an
//! `image_size` instead of the clip fields.

use async_trait::async_trait;
use genflow_core::config::{AspectRatio, CanonicalConfig};
use genflow_core::error::GenerationError;
use genflow_core::job::{JobStatus, StatusUpdate, SubmitResult};
use genflow_core::status::{parse_progress, Observation, StatusTable, COMMON_STATUSES};
use genflow_core::types::{Category, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapter::{
    finish_observation, non_empty, require_category, require_credential, ProgressCallback,
    ProviderAdapter, SubmitRequest,
};
use crate::http::{decode, ProxyClient};

pub const PROXY_PATH: &str = "/api/kie";

/// Envelope code for an accepted request.
const CODE_OK: i64 = 200;

/// `failCode` values that mean the content was refused.
const CONTENT_POLICY_CODES: &[&str] = &["CONTENT_POLICY", "SENSITIVE_CONTENT"];

const STATUSES: StatusTable = StatusTable::extending(
    &COMMON_STATUSES,
    &[
        ("queuing", JobStatus::Queued),
        ("fail", JobStatus::Error),
    ],
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KieConfig {
    pub aspect_ratio: &'static str,
    pub n_frames: &'static str,
    pub size: &'static str,
}

pub fn transform_config(config: &CanonicalConfig) -> KieConfig {
    KieConfig {
        aspect_ratio: orientation(config.aspect_ratio),
        n_frames: if config.duration_secs <= 10 { "10" } else { "15" },
        size: if config.hd { "high" } else { "standard" },
    }
}

fn orientation(ratio: AspectRatio) -> &'static str {
    match ratio {
        AspectRatio::Landscape => "landscape",
        AspectRatio::Portrait => "portrait",
        AspectRatio::Square => "square",
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Created {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    result_json: Option<String>,
    #[serde(default)]
    fail_code: Option<String>,
    #[serde(default)]
    fail_msg: Option<String>,
    #[serde(default)]
    progress: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultJson {
    #[serde(default)]
    result_urls: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct KieAdapter {
    client: ProxyClient,
}

impl KieAdapter {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }

    /// Unwrap the envelope, turning a rejected `code` into a provider error.
    fn open<T>(&self, envelope: Envelope<T>, raw: &serde_json::Value) -> Result<T, GenerationError> {
        match envelope {
            Envelope {
                code: CODE_OK,
                data: Some(data),
                ..
            } => Ok(data),
            Envelope { code, msg, .. } => {
                tracing::warn!(
                    provider = %self.kind(),
                    code,
                    msg = msg.as_deref().unwrap_or_default(),
                    "Kie rejected request",
                );
                Err(GenerationError::Provider {
                    provider: self.kind(),
                    status: u16::try_from(code).unwrap_or(0),
                    body: raw.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for KieAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kie
    }

    fn categories(&self) -> &'static [Category] {
        &[Category::Video, Category::Image]
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

        let image_urls: Vec<&str> = request.config.reference_asset.as_deref().into_iter().collect();
        let input = match request.category {
            Category::Image => serde_json::json!({
                "prompt": request.prompt,
                "image_urls": image_urls,
                "image_size": orientation(request.config.aspect_ratio),
            }),
            _ => {
                let fields = transform_config(&request.config);
                serde_json::json!({
                    "prompt": request.prompt,
                    "image_urls": image_urls,
                    "aspect_ratio": fields.aspect_ratio,
                    "n_frames": fields.n_frames,
                    "size": fields.size,
                })
            }
        };
        let body = serde_json::json!({ "model": request.model, "input": input });

        let url = self.client.url(PROXY_PATH, "/api/v1/jobs/createTask");
        let value = self
            .client
            .post_json(self.kind(), &url, credential, &body)
            .await?;
        let envelope: Envelope<Created> = decode(self.kind(), &value)?;
        let created = self.open(envelope, &value)?;

        Ok(SubmitResult {
            id: created.task_id,
            status: JobStatus::Queued,
            progress: 0,
            created_at: chrono::Utc::now(),
        })
    }

    async fn check_status(
        &self,
        id: &str,
        credential: &str,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<StatusUpdate, GenerationError> {
        require_credential(self.kind(), credential)?;

        let url = self.client.url(PROXY_PATH, "/api/v1/jobs/recordInfo");
        let value = self
            .client
            .get_json(self.kind(), &url, credential, &[("taskId", id)])
            .await?;
        let envelope: Envelope<Record> = decode(self.kind(), &value)?;
        let record = self.open(envelope, &value)?;

        Ok(finish_observation(
            self.kind(),
            &STATUSES,
            observe(record, value),
            on_progress,
        ))
    }
}

fn observe(record: Record, raw: serde_json::Value) -> Observation {
    let artifact_url = record
        .result_json
        .as_deref()
        .and_then(|s| match serde_json::from_str::<ResultJson>(s) {
            Ok(parsed) => parsed.result_urls.into_iter().flatten().find(|u| !u.trim().is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "Kie resultJson is not valid JSON");
                None
            }
        });

    let refused = record
        .fail_code
        .as_deref()
        .is_some_and(|code| CONTENT_POLICY_CODES.contains(&code));
    let message = non_empty(record.fail_msg.as_deref());
    let (failure_reason, violation) = if refused {
        (None, Some(message.unwrap_or_default()))
    } else {
        (message, None)
    };

    Observation {
        native_status: record.state.unwrap_or_default(),
        progress: record
            .progress
            .as_ref()
            .and_then(|p| parse_progress(p, false)),
        artifact_url,
        failure_reason,
        violation,
        raw: Some(raw),
    }
}
