//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` between the orchestrator and
//! whatever presents job state to the user.

use chrono::{DateTime, Utc};
use genflow_core::job::{JobFailure, JobResult, JobStatus};
use genflow_core::types::{JobRef, ModelId};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A state change of a job or task group.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The provider accepted the job.
    Submitted {
        job: JobRef,
        model_id: ModelId,
        group_id: Option<String>,
    },

    /// Progress moved forward (never emitted for regressions).
    Progress {
        job: JobRef,
        status: JobStatus,
        /// Completion percentage (0-100).
        percent: u8,
    },

    /// The job reached `completed`.
    Completed { job: JobRef, result: JobResult },

    /// The job reached `error`.
    Failed { job: JobRef, failure: JobFailure },

    /// Local observation of the job stopped; the remote job may continue.
    Cancelled {
        job: JobRef,
        /// Last status observed before cancellation.
        last_status: JobStatus,
    },

    /// Every member of a task group is terminal (or the group was cancelled).
    GroupSettled {
        group_id: String,
        status: JobStatus,
        progress: u8,
    },
}

impl JobEvent {
    /// Short dot-separated name, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Submitted { .. } => "job.submitted",
            JobEvent::Progress { .. } => "job.progress",
            JobEvent::Completed { .. } => "job.completed",
            JobEvent::Failed { .. } => "job.failed",
            JobEvent::Cancelled { .. } => "job.cancelled",
            JobEvent::GroupSettled { .. } => "group.settled",
        }
    }

    /// The job this event concerns, if it is job-scoped.
    pub fn job(&self) -> Option<&JobRef> {
        match self {
            JobEvent::Submitted { job, .. }
            | JobEvent::Progress { job, .. }
            | JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job, .. } => Some(job),
            JobEvent::GroupSettled { .. } => None,
        }
    }
}

/// An event stamped with the time it was published.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: JobEvent,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use genflow_events::bus::EventBus;
///
/// let bus = EventBus::default();
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(event = event.name(), "Publishing job event");
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(Envelope {
            event,
            timestamp: Utc::now(),
        });
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
