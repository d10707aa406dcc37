//! Status normalizer: provider vocabulary -> canonical lifecycle.
//!
//! Each provider ships a [`StatusTable`]. Lookups are case-insensitive.
//! Anything a table does not know maps to `processing`.

use crate::job::{JobFailure, JobResult, JobStatus, StatusUpdate};

/// Message used when a provider reports failure without saying why.
pub const GENERIC_FAILURE_MESSAGE: &str = "Generation failed without a reason from the provider";

/// Message used when a provider flags content without saying why.
pub const GENERIC_VIOLATION_MESSAGE: &str = "Content was rejected by the provider's policy";

/// Vocabulary shared by most providers.
pub const COMMON_STATUSES: StatusTable = StatusTable::new(&[
    ("queued", JobStatus::Queued),
    ("pending", JobStatus::Queued),
    ("waiting", JobStatus::Queued),
    ("submitted", JobStatus::Queued),
    ("not_start", JobStatus::Queued),
    ("processing", JobStatus::Processing),
    ("running", JobStatus::Processing),
    ("in_progress", JobStatus::Processing),
    ("generating", JobStatus::Processing),
    ("completed", JobStatus::Completed),
    ("succeeded", JobStatus::Completed),
    ("success", JobStatus::Completed),
    ("done", JobStatus::Completed),
    ("failed", JobStatus::Error),
    ("failure", JobStatus::Error),
    ("error", JobStatus::Error),
    ("cancelled", JobStatus::Error),
    ("canceled", JobStatus::Error),
]);

// ---------------------------------------------------------------------------
// StatusTable
// ---------------------------------------------------------------------------

/// Static mapping from native status strings to canonical states.
///
/// A table may extend a base table; its own entries win.
#[derive(Debug, Clone, Copy)]
pub struct StatusTable {
    entries: &'static [(&'static str, JobStatus)],
    base: Option<&'static StatusTable>,
}

impl StatusTable {
    pub const fn new(entries: &'static [(&'static str, JobStatus)]) -> Self {
        Self {
            entries,
            base: None,
        }
    }

    /// A table that falls back to `base` for strings it does not list.
    pub const fn extending(
        base: &'static StatusTable,
        entries: &'static [(&'static str, JobStatus)],
    ) -> Self {
        Self {
            entries,
            base: Some(base),
        }
    }

    /// Exact (case-insensitive) lookup, `None` for unknown strings.
    pub fn lookup(&self, native: &str) -> Option<JobStatus> {
        let native = native.trim();
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(native))
            .map(|(_, status)| *status)
            .or_else(|| self.base.and_then(|base| base.lookup(native)))
    }

    /// Whether `native` is part of this table's vocabulary.
    pub fn recognizes(&self, native: &str) -> bool {
        self.lookup(native).is_some()
    }

    /// Canonical status for `native`, defaulting to `processing`.
    pub fn map(&self, native: &str) -> JobStatus {
        self.lookup(native).unwrap_or(JobStatus::Processing)
    }
}

// ---------------------------------------------------------------------------
// Observation -> StatusUpdate
// ---------------------------------------------------------------------------

/// Fields an adapter extracted from one status response.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub native_status: String,
    pub progress: Option<u8>,
    pub artifact_url: Option<String>,
    /// Provider's failure reason, used verbatim when present.
    pub failure_reason: Option<String>,
    /// Set when the provider flagged the content.
    pub violation: Option<String>,
    /// Full response body, attached to failures for diagnostics.
    pub raw: Option<serde_json::Value>,
}

/// Normalize one observation through `table`.
///
/// - A flagged job that still produced an artifact is `completed` with the
///   flag on its result; one without an artifact is a content-policy `error`.
/// - A failed job carries the provider's reason or
///   [`GENERIC_FAILURE_MESSAGE`].
pub fn normalize(table: &StatusTable, obs: Observation) -> StatusUpdate {
    let status = table.map(&obs.native_status);
    let artifact_url = obs.artifact_url.filter(|url| !url.trim().is_empty());

    if let Some(violation) = obs.violation {
        let reason = non_blank(violation).unwrap_or_else(|| GENERIC_VIOLATION_MESSAGE.to_string());
        if status == JobStatus::Completed && artifact_url.is_some() {
            return StatusUpdate {
                status,
                progress: Some(100),
                result: artifact_url.map(|artifact_url| JobResult {
                    artifact_url,
                    violation: Some(reason),
                }),
                failure: None,
                native_status: obs.native_status,
            };
        }
        if status.is_terminal() {
            let mut failure = JobFailure::content_policy(reason);
            failure.raw = obs.raw;
            return StatusUpdate {
                status: JobStatus::Error,
                progress: obs.progress,
                result: None,
                failure: Some(failure),
                native_status: obs.native_status,
            };
        }
        // A violation on a live job is provisional; keep observing.
    }

    match status {
        JobStatus::Error => {
            let message = obs
                .failure_reason
                .and_then(non_blank)
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
            let mut failure = JobFailure::infrastructure(message);
            failure.raw = obs.raw;
            StatusUpdate {
                status,
                progress: obs.progress,
                result: None,
                failure: Some(failure),
                native_status: obs.native_status,
            }
        }
        JobStatus::Completed => StatusUpdate {
            status,
            progress: Some(100),
            result: artifact_url.map(|artifact_url| JobResult {
                artifact_url,
                violation: None,
            }),
            failure: None,
            native_status: obs.native_status,
        },
        live => StatusUpdate {
            status: live,
            progress: obs.progress,
            result: None,
            failure: None,
            native_status: obs.native_status,
        },
    }
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

// ---------------------------------------------------------------------------
// Progress parsing
// ---------------------------------------------------------------------------

/// Interpret a provider progress value.
///
/// Accepts integers (`45`), floats in percent (`45.5`), fractions
/// (`0.45`, only when the provider declares a fractional scale), and strings
/// such as `"45%"`. Anything unparseable yields `None`.
pub fn parse_progress(value: &serde_json::Value, fractional: bool) -> Option<u8> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    let percent = if fractional { number * 100.0 } else { number };
    Some(percent.clamp(0.0, 100.0).floor() as u8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
