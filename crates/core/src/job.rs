//! Canonical job lifecycle.
//!
//! [`GenerationJob`] holds the canonical view of one submitted job. Its
//! fields are private: the only ways to mutate it are [`GenerationJob::apply`],
//! [`GenerationJob::advance_progress`] and [`GenerationJob::fail`], which
//! enforce the two lifecycle invariants:
//!
//! - progress never decreases;
//! - once `completed` or `error`, nothing changes again.

use serde::{Deserialize, Serialize};

use crate::config::CanonicalConfig;
use crate::types::{Category, JobRef, ModelId, ProviderKind, Timestamp};

/// Upper bound of the progress scale.
pub const PROGRESS_MAX: u8 = 100;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// The canonical four-state lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// `completed` and `error` are sticky.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Result / failure payloads
// ---------------------------------------------------------------------------

/// Output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Retrievable URL of the primary artifact.
    pub artifact_url: String,
    /// Moderation note attached by a provider that still delivered output.
    pub violation: Option<String>,
}

/// Why a job ended in `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider, network or model failure.
    Infrastructure,
    /// The provider refused the content.
    ContentPolicy,
}

/// Terminal error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Human-readable cause, always present.
    pub message: String,
    pub kind: FailureKind,
    /// Raw provider payload for diagnostic surfaces.
    pub raw: Option<serde_json::Value>,
}

impl JobFailure {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Infrastructure,
            raw: None,
        }
    }

    pub fn content_policy(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::ContentPolicy,
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

// ---------------------------------------------------------------------------
// Adapter outputs
// ---------------------------------------------------------------------------

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: Timestamp,
}

/// One normalized status observation returned by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// Progress reported by the provider, if any, clamped to 0..=100.
    pub progress: Option<u8>,
    /// Present when `status` is `completed`.
    pub result: Option<JobResult>,
    /// Present when `status` is `error`.
    pub failure: Option<JobFailure>,
    /// The provider's own status string, kept for logging.
    pub native_status: String,
}

impl StatusUpdate {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// Effect of feeding an observation into a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing observable changed.
    Unchanged,
    /// Status or progress moved forward but the job is still live.
    Advanced,
    /// The job just reached `completed`.
    Completed,
    /// The job just reached `error`.
    Failed,
    /// The job was already terminal; the observation was discarded.
    Ignored,
}

/// One submitted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    id: String,
    provider: ProviderKind,
    model_id: ModelId,
    category: Category,
    prompt: String,
    config: CanonicalConfig,
    status: JobStatus,
    progress: u8,
    result: Option<JobResult>,
    error: Option<JobFailure>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl GenerationJob {
    /// Create the canonical record for a freshly submitted job.
    pub fn submitted(
        submit: &SubmitResult,
        provider: ProviderKind,
        model_id: impl Into<ModelId>,
        category: Category,
        prompt: impl Into<String>,
        config: CanonicalConfig,
    ) -> Self {
        // A submit response never carries a terminal verdict we can trust
        // without an artifact, so it only seeds the live states.
        let status = match submit.status {
            JobStatus::Processing => JobStatus::Processing,
            _ => JobStatus::Queued,
        };
        Self {
            id: submit.id.clone(),
            provider,
            model_id: model_id.into(),
            category,
            prompt: prompt.into(),
            config,
            status,
            progress: submit.progress.min(PROGRESS_MAX),
            result: None,
            error: None,
            created_at: submit.created_at,
            updated_at: submit.created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn job_ref(&self) -> JobRef {
        JobRef::new(self.provider, self.id.clone())
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn config(&self) -> &CanonicalConfig {
        &self.config
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise progress to `reported` if it is higher than the current value.
    ///
    /// Returns `true` when the stored value changed. Regressions and
    /// updates to terminal jobs are ignored.
    pub fn advance_progress(&mut self, reported: u8) -> bool {
        if self.is_terminal() {
            return false;
        }
        let reported = reported.min(PROGRESS_MAX);
        if reported > self.progress {
            self.progress = reported;
            self.updated_at = chrono::Utc::now();
            true
        } else {
            false
        }
    }

    /// Feed one normalized observation into the job.
    pub fn apply(&mut self, update: &StatusUpdate) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }

        match update.status {
            JobStatus::Completed => {
                let Some(result) = update.result.clone() else {
                    return self.fail(JobFailure::infrastructure(
                        "Provider reported completion without an artifact",
                    ));
                };
                self.status = JobStatus::Completed;
                self.progress = PROGRESS_MAX;
                self.result = Some(result);
                self.updated_at = chrono::Utc::now();
                Transition::Completed
            }
            JobStatus::Error => {
                let failure = update
                    .failure
                    .clone()
                    .unwrap_or_else(|| JobFailure::infrastructure("Generation failed"));
                self.fail(failure)
            }
            live => {
                let progressed = update
                    .progress
                    .map(|p| self.advance_progress(p))
                    .unwrap_or(false);
                // queued -> processing is forward; processing -> queued is a
                // regression from a flaky provider and is ignored.
                let moved = live == JobStatus::Processing && self.status == JobStatus::Queued;
                if moved {
                    self.status = JobStatus::Processing;
                    self.updated_at = chrono::Utc::now();
                }
                if progressed || moved {
                    Transition::Advanced
                } else {
                    Transition::Unchanged
                }
            }
        }
    }

    /// Move the job to `error`. No-op on terminal jobs.
    pub fn fail(&mut self, failure: JobFailure) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }
        self.status = JobStatus::Error;
        self.error = Some(failure);
        self.updated_at = chrono::Utc::now();
        Transition::Failed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> GenerationJob {
        let submit = SubmitResult {
            id: "job-1".into(),
            status: JobStatus::Queued,
            progress: 0,
            created_at: chrono::Utc::now(),
        };
        GenerationJob::submitted(
            &submit,
            ProviderKind::Sutu,
            "sora-2@sutu",
            Category::Video,
            "a cat surfing",
            CanonicalConfig::default(),
        )
    }

    fn live(status: JobStatus, progress: Option<u8>) -> StatusUpdate {
        StatusUpdate {
            status,
            progress,
            result: None,
            failure: None,
            native_status: status.as_str().into(),
        }
    }

    fn completed(url: &str) -> StatusUpdate {
        StatusUpdate {
            status: JobStatus::Completed,
            progress: Some(100),
            result: Some(JobResult {
                artifact_url: url.into(),
                violation: None,
            }),
            failure: None,
            native_status: "completed".into(),
        }
    }

    // -- progress -------------------------------------------------------------

    #[test]
    fn progress_moves_forward() {
        let mut job = job();
        assert_eq!(job.apply(&live(JobStatus::Processing, Some(40))), Transition::Advanced);
        assert_eq!(job.progress(), 40);
        assert_eq!(job.status(), JobStatus::Processing);
    }

    #[test]
    fn progress_regression_is_ignored() {
        let mut job = job();
        job.apply(&live(JobStatus::Processing, Some(60)));
        assert_eq!(job.apply(&live(JobStatus::Processing, Some(20))), Transition::Unchanged);
        assert_eq!(job.progress(), 60);
    }

    #[test]
    fn progress_above_100_is_clamped() {
        let mut job = job();
        assert!(job.advance_progress(250));
        assert_eq!(job.progress(), 100);
    }

    #[test]
    fn processing_never_falls_back_to_queued() {
        let mut job = job();
        job.apply(&live(JobStatus::Processing, None));
        job.apply(&live(JobStatus::Queued, None));
        assert_eq!(job.status(), JobStatus::Processing);
    }

    // -- terminal states ------------------------------------------------------

    #[test]
    fn completion_sets_result_and_full_progress() {
        let mut job = job();
        assert_eq!(job.apply(&completed("https://cdn/x.mp4")), Transition::Completed);
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 100);
        assert_eq!(job.result().unwrap().artifact_url, "https://cdn/x.mp4");
    }

    #[test]
    fn completed_is_sticky() {
        let mut job = job();
        job.apply(&completed("https://cdn/x.mp4"));
        assert_eq!(job.apply(&live(JobStatus::Error, None)), Transition::Ignored);
        assert_eq!(job.fail(JobFailure::infrastructure("late")), Transition::Ignored);
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.error().is_none());
    }

    #[test]
    fn error_is_sticky() {
        let mut job = job();
        job.fail(JobFailure::infrastructure("boom"));
        assert_eq!(job.apply(&completed("https://cdn/x.mp4")), Transition::Ignored);
        assert!(!job.advance_progress(90));
        assert_eq!(job.status(), JobStatus::Error);
        assert!(job.result().is_none());
    }

    #[test]
    fn completion_without_artifact_fails() {
        let mut job = job();
        let update = live(JobStatus::Completed, Some(100));
        assert_eq!(job.apply(&update), Transition::Failed);
        assert_eq!(job.error().unwrap().kind, FailureKind::Infrastructure);
    }

    #[test]
    fn error_without_details_gets_generic_message() {
        let mut job = job();
        job.apply(&live(JobStatus::Error, None));
        assert_eq!(job.error().unwrap().message, "Generation failed");
    }
}
