//! Yijia adapter.
//!
//! Upper-case task states, 5 or 10 second clips, a `standard`/`pro`
//! quality tier, and an `is_compliant` flag that defaults to true.

use async_trait::async_trait;
use genflow_core::config::CanonicalConfig;
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

pub const PROXY_PATH: &str = "/api/yijia";

const STATUSES: StatusTable =
    StatusTable::extending(&COMMON_STATUSES, &[("not_started", JobStatus::Queued)]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YijiaConfig {
    pub ratio: &'static str,
    pub duration: u32,
    pub quality: &'static str,
}

pub fn transform_config(config: &CanonicalConfig) -> YijiaConfig {
    YijiaConfig {
        ratio: config.aspect_ratio.as_str(),
        duration: if config.duration_secs <= 5 { 5 } else { 10 },
        quality: if config.hd { "pro" } else { "standard" },
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
    #[serde(default)]
    task_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    progress: Option<serde_json::Value>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    fail_reason: Option<String>,
    #[serde(default)]
    is_compliant: Option<bool>,
    #[serde(default)]
    compliance_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct YijiaAdapter {
    client: ProxyClient,
}

impl YijiaAdapter {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for YijiaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Yijia
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
            "ratio": fields.ratio,
            "duration": fields.duration,
            "quality": fields.quality,
        });
        if let Some(reference) = &request.config.reference_asset {
            body["reference_image"] = serde_json::Value::String(reference.clone());
        }

        let url = self.client.url(PROXY_PATH, "/v2/video/submit");
        let value = self
            .client
            .post_json(self.kind(), &url, credential, &body)
            .await?;
        let response: SubmitResponse = decode(self.kind(), &value)?;

        Ok(SubmitResult {
            id: response.task_id,
            status: STATUSES.map(response.task_status.as_deref().unwrap_or("SUBMITTED")),
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

        let url = self.client.resource_url(PROXY_PATH, "/v2/video/result", id)?;
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
    Observation {
        native_status: response.task_status.unwrap_or_default(),
        progress: response
            .progress
            .as_ref()
            .and_then(|p| parse_progress(p, false)),
        artifact_url: non_empty(response.video_url.as_deref()),
        failure_reason: non_empty(response.fail_reason.as_deref()),
        violation: (!response.is_compliant.unwrap_or(true))
            .then(|| response.compliance_reason.unwrap_or_default()),
        raw: Some(raw),
    }
}

#[cfg(test)]
mod tests {
    use genflow_core::config::AspectRatio;
    use genflow_core::job::FailureKind;
    use genflow_core::status::normalize;

    use super::*;

    fn status(value: serde_json::Value) -> StatusUpdate {
        let response: StatusResponse = serde_json::from_value(value.clone()).unwrap();
        normalize(&STATUSES, observe(response, value))
    }

    #[test]
    fn transform_snaps_duration_and_quality() {
        let config = CanonicalConfig {
            aspect_ratio: AspectRatio::Square,
            duration_secs: 3,
            hd: false,
            reference_asset: None,
        };
        assert_eq!(
            transform_config(&config),
            YijiaConfig {
                ratio: "1:1",
                duration: 5,
                quality: "standard",
            }
        );
        assert_eq!(transform_config(&CanonicalConfig::default()).duration, 10);
    }

    #[test]
    fn upper_case_states() {
        assert_eq!(status(serde_json::json!({"task_status": "SUBMITTED"})).status, JobStatus::Queued);
        assert_eq!(status(serde_json::json!({"task_status": "QUEUED"})).status, JobStatus::Queued);
        let running = status(serde_json::json!({"task_status": "IN_PROGRESS", "progress": "60%"}));
        assert_eq!(running.status, JobStatus::Processing);
        assert_eq!(running.progress, Some(60));
    }

    #[test]
    fn success_with_video() {
        let update = status(serde_json::json!({
            "task_status": "SUCCESS", "video_url": "https://yj/v.mp4"
        }));
        assert_eq!(update.result.unwrap().artifact_url, "https://yj/v.mp4");
    }

    #[test]
    fn non_compliant_failure() {
        let update = status(serde_json::json!({
            "task_status": "FAILURE", "is_compliant": false, "compliance_reason": "copyrighted character"
        }));
        let failure = update.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ContentPolicy);
        assert_eq!(failure.message, "copyrighted character");
    }

    #[test]
    fn plain_failure_uses_fail_reason() {
        let update = status(serde_json::json!({"task_status": "FAILURE", "fail_reason": "timeout"}));
        let failure = update.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Infrastructure);
        assert_eq!(failure.message, "timeout");
    }

    #[test]
    fn non_compliant_with_video_still_completes() {
        let update = status(serde_json::json!({
            "task_status": "SUCCESS", "video_url": "https://yj/v.mp4",
            "is_compliant": false, "compliance_reason": "logo visible"
        }));
        assert_eq!(update.status, JobStatus::Completed);
        assert_eq!(update.result.unwrap().violation.as_deref(), Some("logo visible"));
    }

    #[test]
    fn null_compliance_counts_as_compliant() {
        let value = serde_json::json!({"task_status": "IN_PROGRESS", "is_compliant": null});
        let response: StatusResponse = decode(ProviderKind::Yijia, &value).unwrap();
        let update = normalize(&STATUSES, observe(response, value));
        assert_eq!(update.status, JobStatus::Processing);
        assert!(update.failure.is_none());

        let update = status(serde_json::json!({
            "task_status": "SUCCESS", "video_url": "https://yj/v.mp4", "is_compliant": null
        }));
        assert!(update.result.unwrap().violation.is_none());
    }
}
