//! Task-group aggregation rules.
//!
//! A task group is a fixed-size batch of sub-jobs sharing one canonical
//! config. These functions derive the group's status and progress from its
//! members; the coordinator that runs the members lives in the pipeline.

use serde::{Deserialize, Serialize};

use crate::config::validate_prompt;
use crate::error::CoreError;
use crate::job::JobStatus;

/// Largest number of segments one group may hold.
pub const MAX_SEGMENTS_PER_GROUP: usize = 64;

/// One content segment of a group (e.g. one shot of a storyboard scene).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Sub-prompt for this segment.
    pub prompt: String,
    /// Segment-specific reference asset, overriding the shared one.
    #[serde(default)]
    pub reference_asset: Option<String>,
}

impl Segment {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_asset: None,
        }
    }
}

/// Validate a group definition before anything is submitted.
pub fn validate_segments(segments: &[Segment]) -> Result<(), CoreError> {
    if segments.is_empty() {
        return Err(CoreError::Validation(
            "A task group needs at least one segment".to_string(),
        ));
    }
    if segments.len() > MAX_SEGMENTS_PER_GROUP {
        return Err(CoreError::Validation(format!(
            "A task group may hold at most {MAX_SEGMENTS_PER_GROUP} segments, got {}",
            segments.len()
        )));
    }
    for (i, segment) in segments.iter().enumerate() {
        validate_prompt(&segment.prompt)
            .map_err(|e| CoreError::Validation(format!("Segment {i}: {e}")))?;
        if let Some(asset) = &segment.reference_asset {
            crate::config::validate_asset_reference(asset)
                .map_err(|e| CoreError::Validation(format!("Segment {i}: {e}")))?;
        }
    }
    Ok(())
}

/// Derive a group's status from its members' statuses.
///
/// - `completed` iff every member is completed;
/// - `error` iff at least one member is in error and none is still live;
/// - otherwise `processing` if any member is processing or settled, else
///   `queued`.
pub fn aggregate_status(members: &[JobStatus]) -> JobStatus {
    if members.is_empty() {
        return JobStatus::Queued;
    }
    if members.iter().all(|s| *s == JobStatus::Completed) {
        return JobStatus::Completed;
    }
    let any_live = members.iter().any(|s| !s.is_terminal());
    if !any_live {
        // All terminal and not all completed: at least one error.
        return JobStatus::Error;
    }
    if members.iter().all(|s| *s == JobStatus::Queued) {
        JobStatus::Queued
    } else {
        JobStatus::Processing
    }
}

/// Equal-weight mean of member progress, floor-rounded.
pub fn combined_progress(members: &[u8]) -> u8 {
    if members.is_empty() {
        return 0;
    }
    let sum: u32 = members.iter().map(|p| u32::from(*p)).sum();
    (sum / members.len() as u32) as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
