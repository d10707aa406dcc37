//! Per-model health bookkeeping.
//!
//! [`HealthTracker`] owns one [`ModelRecord`] per model id, created lazily on
//! first outcome. Updates go through a single mutex so concurrent job
//! completions never lose an increment. Selection reads a [`HealthView`],
//! a point-in-time copy that later outcomes do not disturb.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::FailureKind;
use crate::types::{ModelId, Timestamp};

/// A model is unhealthy once this many failures happen in a row.
pub const UNHEALTHY_AFTER_CONSECUTIVE_FAILURES: u32 = 3;

// ---------------------------------------------------------------------------
// Outcome / policy
// ---------------------------------------------------------------------------

/// Terminal outcome of one job, as far as model health is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// The provider refused the content; the model itself may be fine.
    ContentPolicy,
}

impl From<FailureKind> for Outcome {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Infrastructure => Outcome::Failure,
            FailureKind::ContentPolicy => Outcome::ContentPolicy,
        }
    }
}

impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// How content-policy outcomes affect health scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPolicyScoring {
    /// Counted separately; never affects `healthy`.
    #[default]
    Ignore,
    /// Treated exactly like an infrastructure failure.
    Count,
}

impl ContentPolicyScoring {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(ContentPolicyScoring::Ignore),
            "count" => Ok(ContentPolicyScoring::Count),
            other => Err(CoreError::Validation(format!(
                "Unknown content policy scoring '{other}'. Must be one of: ignore, count"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ModelRecord
// ---------------------------------------------------------------------------

/// Cumulative outcome counters for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub content_policy_count: u64,
    #[serde(default)]
    pub last_outcome_at: Option<Timestamp>,
}

impl ModelRecord {
    pub fn healthy(&self) -> bool {
        self.consecutive_failures < UNHEALTHY_AFTER_CONSECUTIVE_FAILURES
    }

    /// `success / (success + failure)`, or `0.0` with no data.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn apply(&mut self, outcome: Outcome, scoring: ContentPolicyScoring) {
        match outcome {
            Outcome::Success => {
                self.success_count += 1;
                self.consecutive_failures = 0;
            }
            Outcome::Failure => {
                self.failure_count += 1;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
            Outcome::ContentPolicy => {
                self.content_policy_count += 1;
                if scoring == ContentPolicyScoring::Count {
                    self.failure_count += 1;
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                }
            }
        }
        self.last_outcome_at = Some(chrono::Utc::now());
    }
}

/// Health verdict exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub model_id: ModelId,
    pub healthy: bool,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub content_policy_count: u64,
}

impl HealthSnapshot {
    fn from_record(model_id: &str, record: &ModelRecord) -> Self {
        Self {
            model_id: model_id.to_string(),
            healthy: record.healthy(),
            success_rate: record.success_rate(),
            consecutive_failures: record.consecutive_failures,
            success_count: record.success_count,
            failure_count: record.failure_count,
            content_policy_count: record.content_policy_count,
        }
    }
}

// ---------------------------------------------------------------------------
// HealthView
// ---------------------------------------------------------------------------

/// Immutable copy of every record, taken at one instant.
#[derive(Debug, Clone, Default)]
pub struct HealthView {
    records: HashMap<ModelId, ModelRecord>,
}

impl HealthView {
    /// Models without records are healthy.
    pub fn is_healthy(&self, model_id: &str) -> bool {
        self.records
            .get(model_id)
            .map(ModelRecord::healthy)
            .unwrap_or(true)
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelRecord> {
        self.records.get(model_id)
    }
}

// ---------------------------------------------------------------------------
// HealthTracker
// ---------------------------------------------------------------------------

/// Shared, thread-safe health bookkeeping.
#[derive(Debug, Default)]
pub struct HealthTracker {
    records: Mutex<HashMap<ModelId, ModelRecord>>,
    scoring: ContentPolicyScoring,
}

impl HealthTracker {
    pub fn new(scoring: ContentPolicyScoring) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            scoring,
        }
    }

    /// Seed the tracker with previously persisted records.
    pub fn with_records(
        scoring: ContentPolicyScoring,
        records: HashMap<ModelId, ModelRecord>,
    ) -> Self {
        Self {
            records: Mutex::new(records),
            scoring,
        }
    }

    pub fn scoring(&self) -> ContentPolicyScoring {
        self.scoring
    }

    /// Record a terminal outcome and return the model's new verdict.
    pub fn record(&self, model_id: &str, outcome: Outcome) -> HealthSnapshot {
        let mut records = self.lock();
        let record = records.entry(model_id.to_string()).or_default();
        record.apply(outcome, self.scoring);
        HealthSnapshot::from_record(model_id, record)
    }

    /// Current verdict; a model with no data is healthy with a 0 success rate.
    pub fn get_health(&self, model_id: &str) -> HealthSnapshot {
        let records = self.lock();
        match records.get(model_id) {
            Some(record) => HealthSnapshot::from_record(model_id, record),
            None => HealthSnapshot::from_record(model_id, &ModelRecord::default()),
        }
    }

    /// Operator reset. Returns `false` if the model had no record.
    pub fn reset(&self, model_id: &str) -> bool {
        self.lock().remove(model_id).is_some()
    }

    /// Point-in-time copy for a selection decision.
    pub fn view(&self) -> HealthView {
        HealthView {
            records: self.lock().clone(),
        }
    }

    /// Copy of all records, for persistence.
    pub fn records(&self) -> HashMap<ModelId, ModelRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModelId, ModelRecord>> {
        // Counters stay valid after a panicking holder.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
