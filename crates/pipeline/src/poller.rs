//! Job poller: drives one submitted job to a terminal state.
//!
//! The poller owns the only [`watch::Sender`] for its job, so every
//! mutation of the canonical [`GenerationJob`] happens here and goes through
//! [`GenerationJob::apply`] / [`GenerationJob::advance_progress`]. Status
//! checks are strictly sequential: the next one is scheduled only after the
//! previous one returned.
//!
//! Cancellation stops observation only. The remote job is left alone and
//! the local record keeps its last-known status.

use std::sync::Arc;
use std::time::Duration;

use genflow_core::error::GenerationError;
use genflow_core::job::{FailureKind, GenerationJob, JobFailure, JobStatus, Transition};
use genflow_events::{EventBus, JobEvent};
use genflow_providers::ProviderAdapter;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Poll interval schedule. A `multiplier` of `1.0` gives a fixed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSchedule {
    /// Delay before the first status check.
    pub initial_interval: Duration,
    /// Upper bound on the delay between checks.
    pub max_interval: Duration,
    /// Factor by which the delay grows after each check.
    pub multiplier: f64,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(3_000),
            max_interval: Duration::from_millis(15_000),
            multiplier: 1.5,
        }
    }
}

impl PollSchedule {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
        }
    }
}

/// Calculate the next poll delay, clamped to [`PollSchedule::max_interval`].
pub fn next_delay(current: Duration, schedule: &PollSchedule) -> Duration {
    let next_ms = (current.as_millis() as f64 * schedule.multiplier) as u64;
    Duration::from_millis(next_ms).min(schedule.max_interval)
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

/// Everything one poll loop needs.
pub struct PollContext {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub credential: String,
    pub schedule: PollSchedule,
    /// Consecutive transport errors tolerated before the job fails.
    pub error_tolerance: u32,
    pub events: Arc<EventBus>,
    pub cancel: CancellationToken,
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Completed,
    Failed(FailureKind),
    /// Observation stopped before a terminal state.
    Cancelled,
}

/// Poll until the job is terminal or `ctx.cancel` fires.
pub async fn poll_job(ctx: PollContext, state: watch::Sender<GenerationJob>) -> PollExit {
    let job_ref = state.borrow().job_ref();
    let mut delay = ctx.schedule.initial_interval;
    let mut consecutive_errors = 0u32;

    if let Some(exit) = terminal_exit(&state.borrow()) {
        return exit;
    }

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return cancelled(&ctx, &state),
            _ = tokio::time::sleep(delay) => {}
        }

        let on_progress = |percent: u8| {
            if state.send_if_modified(|job| job.advance_progress(percent)) {
                let job = state.borrow();
                tracing::debug!(job_id = %job_ref, percent = job.progress(), "Progress advanced");
                ctx.events.publish(JobEvent::Progress {
                    job: job.job_ref(),
                    status: job.status(),
                    percent: job.progress(),
                });
            }
        };

        tracing::debug!(job_id = %job_ref, delay_ms = delay.as_millis() as u64, "Checking job status");
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return cancelled(&ctx, &state),
            result = ctx.adapter.check_status(&job_ref.id, &ctx.credential, Some(&on_progress)) => result,
        };

        match result {
            Ok(update) => {
                consecutive_errors = 0;
                let current = state.borrow().progress();
                if let Some(reported) = update.progress.filter(|p| *p < current) {
                    tracing::warn!(
                        job_id = %job_ref,
                        reported,
                        current,
                        "Provider reported lower progress, ignoring",
                    );
                }

                let mut transition = Transition::Unchanged;
                state.send_if_modified(|job| {
                    transition = job.apply(&update);
                    !matches!(transition, Transition::Unchanged | Transition::Ignored)
                });

                match transition {
                    Transition::Completed | Transition::Failed | Transition::Ignored => {
                        if let Some(exit) = finish(&ctx, &state) {
                            return exit;
                        }
                    }
                    Transition::Advanced => {
                        let job = state.borrow();
                        ctx.events.publish(JobEvent::Progress {
                            job: job.job_ref(),
                            status: job.status(),
                            percent: job.progress(),
                        });
                    }
                    Transition::Unchanged => {}
                }
            }
            Err(e) if is_transient(&e) && consecutive_errors < ctx.error_tolerance => {
                consecutive_errors += 1;
                tracing::warn!(
                    job_id = %job_ref,
                    error = %e,
                    attempt = consecutive_errors,
                    tolerance = ctx.error_tolerance,
                    "Status check failed, retrying on next tick",
                );
            }
            Err(e) => {
                let failure = match &e {
                    GenerationError::ContentPolicy { reason, .. } => {
                        JobFailure::content_policy(reason.clone())
                    }
                    other => JobFailure::infrastructure(other.to_string()),
                };
                state.send_if_modified(|job| job.fail(failure) == Transition::Failed);
                if let Some(exit) = finish(&ctx, &state) {
                    return exit;
                }
            }
        }

        delay = next_delay(delay, &ctx.schedule);
    }
}

fn is_transient(e: &GenerationError) -> bool {
    matches!(e, GenerationError::Transport { .. })
}

fn terminal_exit(job: &GenerationJob) -> Option<PollExit> {
    match job.status() {
        JobStatus::Completed => Some(PollExit::Completed),
        JobStatus::Error => Some(PollExit::Failed(
            job.error()
                .map(|f| f.kind)
                .unwrap_or(FailureKind::Infrastructure),
        )),
        _ => None,
    }
}

/// Publish the terminal event for a job that just settled.
fn finish(ctx: &PollContext, state: &watch::Sender<GenerationJob>) -> Option<PollExit> {
    let job = state.borrow();
    let exit = terminal_exit(&job)?;
    match (job.result(), job.error()) {
        (Some(result), _) => {
            tracing::info!(
                job_id = %job.job_ref(),
                model_id = %job.model_id(),
                flagged = result.violation.is_some(),
                "Job completed",
            );
            ctx.events.publish(JobEvent::Completed {
                job: job.job_ref(),
                result: result.clone(),
            });
        }
        (None, Some(failure)) => {
            tracing::error!(
                job_id = %job.job_ref(),
                model_id = %job.model_id(),
                kind = ?failure.kind,
                error = %failure.message,
                "Job failed",
            );
            ctx.events.publish(JobEvent::Failed {
                job: job.job_ref(),
                failure: failure.clone(),
            });
        }
        (None, None) => {}
    }
    Some(exit)
}

fn cancelled(ctx: &PollContext, state: &watch::Sender<GenerationJob>) -> PollExit {
    let job = state.borrow();
    tracing::info!(
        job_id = %job.job_ref(),
        last_status = %job.status(),
        "Polling cancelled",
    );
    ctx.events.publish(JobEvent::Cancelled {
        job: job.job_ref(),
        last_status: job.status(),
    });
    PollExit::Cancelled
}
