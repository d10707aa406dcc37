//! Task-group state: a fixed set of member jobs sharing one config.
//!
//! A [`TaskGroup`] is created by the orchestrator, which also runs its
//! members. The group itself only tracks them: each slot is pending until a
//! worker-pool permit frees up, then either holds the member job's live
//! state or the reason its submission was rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use genflow_core::config::CanonicalConfig;
use genflow_core::error::CoreError;
use genflow_core::job::{GenerationJob, JobFailure, JobStatus};
use genflow_core::task_group::{aggregate_status, combined_progress, Segment};
use genflow_core::types::{Category, JobRef, ModelId};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

/// One member slot.
#[derive(Debug, Clone)]
pub(crate) enum Member {
    /// Waiting for a worker-pool permit.
    Pending,
    Submitted {
        job: JobRef,
        state: watch::Receiver<GenerationJob>,
        /// The member job's own polling token.
        cancel: CancellationToken,
    },
    /// The provider refused the submission.
    Rejected(JobFailure),
}

impl Member {
    fn status(&self) -> JobStatus {
        match self {
            Member::Pending => JobStatus::Queued,
            Member::Submitted { state, .. } => state.borrow().status(),
            Member::Rejected(_) => JobStatus::Error,
        }
    }

    /// Terminal, or polling was stopped by a cancel.
    fn is_finished(&self) -> bool {
        self.status().is_terminal() || self.is_stopped()
    }

    /// Cancelled before reaching a terminal state.
    fn is_stopped(&self) -> bool {
        match self {
            Member::Submitted { cancel, .. } => {
                cancel.is_cancelled() && !self.status().is_terminal()
            }
            Member::Pending | Member::Rejected(_) => false,
        }
    }

    fn progress(&self) -> u8 {
        match self {
            Member::Submitted { state, .. } => state.borrow().progress(),
            Member::Pending | Member::Rejected(_) => 0,
        }
    }
}

/// Point-in-time view of one member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSnapshot {
    pub index: usize,
    pub job: Option<JobRef>,
    pub status: JobStatus,
    pub progress: u8,
    pub artifact_url: Option<String>,
    pub error: Option<JobFailure>,
}

/// Point-in-time view of a whole group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSnapshot {
    pub id: String,
    pub model_id: ModelId,
    pub status: JobStatus,
    pub progress: u8,
    pub cancelled: bool,
    pub members: Vec<MemberSnapshot>,
}

pub struct TaskGroup {
    id: String,
    model_id: ModelId,
    category: Category,
    config: CanonicalConfig,
    segments: Vec<Segment>,
    members: RwLock<Vec<Member>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    settled: AtomicBool,
}

impl TaskGroup {
    pub(crate) fn new(
        id: String,
        model_id: ModelId,
        category: Category,
        config: CanonicalConfig,
        segments: Vec<Segment>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        let members = vec![Member::Pending; segments.len()];
        Self {
            id,
            model_id,
            category,
            config,
            segments,
            members: RwLock::new(members),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            cancel,
            settled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.read().iter().map(Member::status).collect()
    }

    pub fn aggregate_status(&self) -> JobStatus {
        aggregate_status(&self.statuses())
    }

    /// Floor of the mean member progress.
    pub fn combined_progress(&self) -> u8 {
        let progress: Vec<u8> = self.read().iter().map(Member::progress).collect();
        combined_progress(&progress)
    }

    /// Job refs of submitted members, by index.
    pub fn job_refs(&self) -> Vec<Option<JobRef>> {
        self.read()
            .iter()
            .map(|m| match m {
                Member::Submitted { job, .. } => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        let members = self.read();
        let member_snapshots = members
            .iter()
            .enumerate()
            .map(|(index, member)| match member {
                Member::Pending => MemberSnapshot {
                    index,
                    job: None,
                    status: JobStatus::Queued,
                    progress: 0,
                    artifact_url: None,
                    error: None,
                },
                Member::Submitted { job, state, .. } => {
                    let current = state.borrow();
                    MemberSnapshot {
                        index,
                        job: Some(job.clone()),
                        status: current.status(),
                        progress: current.progress(),
                        artifact_url: current.result().map(|r| r.artifact_url.clone()),
                        error: current.error().cloned(),
                    }
                }
                Member::Rejected(failure) => MemberSnapshot {
                    index,
                    job: None,
                    status: JobStatus::Error,
                    progress: 0,
                    artifact_url: None,
                    error: Some(failure.clone()),
                },
            })
            .collect::<Vec<_>>();
        let statuses: Vec<JobStatus> = member_snapshots.iter().map(|m| m.status).collect();
        let progress: Vec<u8> = member_snapshots.iter().map(|m| m.progress).collect();

        GroupSnapshot {
            id: self.id.clone(),
            model_id: self.model_id.clone(),
            status: aggregate_status(&statuses),
            progress: combined_progress(&progress),
            cancelled: self.is_cancelled(),
            members: member_snapshots,
        }
    }

    // ---- crate-internal mutation, used by the orchestrator ----

    pub(crate) fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Config for one member: the shared snapshot with the segment's own
    /// reference asset, if it has one.
    pub(crate) fn member_request(&self, index: usize) -> Result<(String, CanonicalConfig), CoreError> {
        let segment = self.segments.get(index).ok_or_else(|| not_found(&self.id, index))?;
        let mut config = self.config.clone();
        if let Some(reference) = &segment.reference_asset {
            config.reference_asset = Some(reference.clone());
        }
        Ok((segment.prompt.clone(), config))
    }

    /// Reset a failed or individually cancelled member to pending so it can
    /// be submitted again. Checked and swapped under one lock, so only one of
    /// several concurrent retries wins.
    pub(crate) fn claim_retry(&self, index: usize) -> Result<(), CoreError> {
        let mut members = self.write();
        let member = members
            .get_mut(index)
            .ok_or_else(|| not_found(&self.id, index))?;
        let status = member.status();
        if status != JobStatus::Error && !member.is_stopped() {
            return Err(CoreError::Conflict(format!(
                "Segment {index} of group {} is {status}; only failed or cancelled segments can be retried",
                self.id
            )));
        }
        *member = Member::Pending;
        self.settled.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn set_member(&self, index: usize, member: Member) {
        if let Some(slot) = self.write().get_mut(index) {
            *slot = member;
        }
    }

    /// Whether every member is terminal or stopped, or the whole group was
    /// cancelled.
    pub fn is_finished(&self) -> bool {
        self.is_cancelled() || self.read().iter().all(Member::is_finished)
    }

    /// Claim the one-shot settle notification. `true` exactly once per
    /// transition into an all-finished state.
    pub(crate) fn try_settle(&self) -> bool {
        self.read().iter().all(Member::is_finished) && !self.settled.swap(true, Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Member>> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Member>> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.id)
            .field("model_id", &self.model_id)
            .field("members", &self.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn not_found(group_id: &str, index: usize) -> CoreError {
    CoreError::NotFound {
        entity: "task group segment",
        id: format!("{group_id}#{index}"),
    }
}
