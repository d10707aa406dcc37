//! The uniform contract every provider back-end implements.

use async_trait::async_trait;
use genflow_core::config::CanonicalConfig;
use genflow_core::error::GenerationError;
use genflow_core::job::{StatusUpdate, SubmitResult};
use genflow_core::status::{normalize, Observation, StatusTable};
use genflow_core::types::{Category, ProviderKind, Timestamp};

/// Callback receiving the extracted progress percentage of a status check.
pub type ProgressCallback<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Everything an adapter needs to submit one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    /// Provider-side model name, e.g. `"sora-2"`.
    pub model: String,
    pub category: Category,
    pub prompt: String,
    pub config: CanonicalConfig,
}

/// One provider back-end.
///
/// Each call is exactly one round-trip to the proxy: no caching, no retry.
/// Retry policy belongs to the caller.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Categories this provider can generate.
    fn categories(&self) -> &'static [Category];

    /// Convert the canonical config to this provider's fields.
    ///
    /// Pure, total and deterministic.
    fn transform_config(&self, config: &CanonicalConfig) -> serde_json::Value;

    /// Submit one job.
    async fn submit_task(
        &self,
        request: &SubmitRequest,
        credential: &str,
    ) -> Result<SubmitResult, GenerationError>;

    /// Query one job's status. `on_progress` is invoked with the extracted
    /// percentage before returning, when the provider reported one.
    async fn check_status(
        &self,
        id: &str,
        credential: &str,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<StatusUpdate, GenerationError>;
}

// ---------------------------------------------------------------------------
// Shared adapter helpers
// ---------------------------------------------------------------------------

/// Reject blank credentials before any network call.
pub(crate) fn require_credential(
    provider: ProviderKind,
    credential: &str,
) -> Result<(), GenerationError> {
    if credential.trim().is_empty() {
        return Err(GenerationError::Configuration(format!(
            "Missing API key for provider {provider}"
        )));
    }
    Ok(())
}

/// Reject categories the adapter cannot serve.
pub(crate) fn require_category(
    adapter: &dyn ProviderAdapter,
    category: Category,
) -> Result<(), GenerationError> {
    if !adapter.categories().contains(&category) {
        return Err(GenerationError::Configuration(format!(
            "Provider {} does not generate {category}",
            adapter.kind()
        )));
    }
    Ok(())
}

/// Normalize an observation, log unfamiliar vocabulary, and report progress.
pub(crate) fn finish_observation(
    provider: ProviderKind,
    table: &StatusTable,
    obs: Observation,
    on_progress: Option<ProgressCallback<'_>>,
) -> StatusUpdate {
    if !table.recognizes(&obs.native_status) {
        tracing::warn!(
            provider = %provider,
            native_status = %obs.native_status,
            "Unknown provider status, treating as processing",
        );
    }
    let update = normalize(table, obs);
    if let (Some(callback), Some(percent)) = (on_progress, update.progress) {
        callback(percent);
    }
    update
}

/// Provider timestamps arrive as unix seconds; absent or invalid ones fall
/// back to now.
pub(crate) fn timestamp_or_now(unix_secs: Option<i64>) -> Timestamp {
    unix_secs
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(chrono::Utc::now)
}

/// Non-empty trimmed string, or `None`.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use genflow_core::job::JobStatus;
    use genflow_core::status::COMMON_STATUSES;

    use super::*;

    #[test]
    fn blank_credential_is_configuration_error() {
        let err = require_credential(ProviderKind::Kie, "  ").unwrap_err();
        assert!(matches!(err, GenerationError::Configuration(_)));
        assert!(require_credential(ProviderKind::Kie, "sk-1").is_ok());
    }

    #[test]
    fn progress_callback_receives_extracted_percent() {
        let seen = AtomicU8::new(0);
        let callback = |p: u8| seen.store(p, Ordering::SeqCst);
        let update = finish_observation(
            ProviderKind::Sutu,
            &COMMON_STATUSES,
            Observation {
                native_status: "running".into(),
                progress: Some(37),
                ..Default::default()
            },
            Some(&callback),
        );
        assert_eq!(update.status, JobStatus::Processing);
        assert_eq!(seen.load(Ordering::SeqCst), 37);
    }

    #[test]
    fn timestamp_fallback() {
        let ts = timestamp_or_now(Some(1_700_000_000));
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(timestamp_or_now(None) <= chrono::Utc::now());
    }
}
