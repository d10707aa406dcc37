//! Orchestrator facade.
//!
//! [`Orchestrator`] owns the provider registry, the model catalog, health
//! bookkeeping, priority lists and every live job. Each submitted job gets
//! its own polling task with a child [`CancellationToken`]; task-group
//! members additionally share their group's token so one cancel stops them
//! all.
//!
//! State changes are published on the shared [`EventBus`]. Call
//! [`Orchestrator::subscribe`] to receive them, or [`Orchestrator::watch`]
//! to follow one job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use genflow_core::config::{validate_prompt, CanonicalConfig};
use genflow_core::error::{CoreError, GenerationError};
use genflow_core::health::{HealthSnapshot, HealthTracker, Outcome};
use genflow_core::job::{GenerationJob, JobFailure, JobStatus};
use genflow_core::priority::{candidate_order, select_model, PriorityLists, Selection};
use genflow_core::task_group::{validate_segments, Segment};
use genflow_core::types::{Category, JobRef, ModelId};
use genflow_events::{Envelope, EventBus, JobEvent};
use genflow_providers::{ProviderRegistry, SubmitRequest};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, ModelSpec};
use crate::config::PipelineConfig;
use crate::credentials::Credentials;
use crate::poller::{poll_job, PollContext, PollExit};
use crate::store::StateStore;
use crate::task_group::{Member, TaskGroup};

/// How long [`Orchestrator::shutdown`] waits for each polling task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bookkeeping for one submitted job.
struct TrackedJob {
    state: watch::Receiver<GenerationJob>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Everything needed to build an [`Orchestrator`].
pub struct OrchestratorParts {
    pub config: PipelineConfig,
    pub registry: ProviderRegistry,
    pub credentials: Credentials,
    pub catalog: Catalog,
    pub store: Arc<dyn StateStore>,
    pub events: Arc<EventBus>,
}

pub struct Orchestrator {
    config: PipelineConfig,
    registry: ProviderRegistry,
    credentials: Credentials,
    catalog: Catalog,
    health: Arc<HealthTracker>,
    priorities: RwLock<PriorityLists>,
    store: Arc<dyn StateStore>,
    events: Arc<EventBus>,
    jobs: RwLock<HashMap<JobRef, Arc<TrackedJob>>>,
    groups: RwLock<HashMap<String, Arc<TaskGroup>>>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Load persisted state and build the orchestrator.
    ///
    /// A store that fails to load is logged and treated as empty.
    pub async fn start(parts: OrchestratorParts) -> Arc<Self> {
        let OrchestratorParts {
            config,
            registry,
            credentials,
            catalog,
            store,
            events,
        } = parts;

        let persisted = match store.load().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted state, starting fresh");
                Default::default()
            }
        };

        let priorities =
            PriorityLists::merged(&persisted.priorities, &catalog.available_by_category());
        let health = HealthTracker::with_records(config.content_policy_scoring, persisted.health);

        tracing::info!(
            models = catalog.models().len(),
            providers = ?registry.kinds(),
            credentials = ?credentials.configured(),
            "Orchestrator started",
        );

        Arc::new(Self {
            config,
            registry,
            credentials,
            catalog,
            health: Arc::new(health),
            priorities: RwLock::new(priorities),
            store,
            events,
            jobs: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to job and group events.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Submit one job to the best available model of `category`.
    ///
    /// The reference asset, if any, travels in `config`. Unless
    /// `fallback_on_submit_error` is set, a rejected submission is returned
    /// as-is; otherwise the remaining candidates are tried in order.
    pub async fn submit(
        self: &Arc<Self>,
        category: Category,
        prompt: &str,
        config: CanonicalConfig,
    ) -> Result<JobRef, GenerationError> {
        validate_prompt(prompt)?;
        config.validate()?;

        let candidates = self.candidates(category).await?;
        let mut last_error = None;
        for model_id in candidates {
            let spec = self.catalog.get(&model_id)?.clone();
            match self
                .submit_to(&spec, prompt, config.clone(), None, &self.cancel)
                .await
            {
                Ok((job, ..)) => return Ok(job),
                Err(e) if self.config.fallback_on_submit_error && e.is_infrastructure() => {
                    tracing::warn!(
                        model_id = %spec.id,
                        error = %e,
                        "Submission failed, trying next candidate",
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| no_models(category)))
    }

    /// Submit one job to a specific catalog model, bypassing selection.
    pub async fn submit_with_model(
        self: &Arc<Self>,
        model_id: &str,
        prompt: &str,
        config: CanonicalConfig,
    ) -> Result<JobRef, GenerationError> {
        validate_prompt(prompt)?;
        config.validate()?;
        let spec = self.catalog.get(model_id)?.clone();
        let (job, ..) = self.submit_to(&spec, prompt, config, None, &self.cancel).await?;
        Ok(job)
    }

    /// Re-submit a terminal or cancelled job with its original prompt and
    /// config snapshot. The new job gets a new id; the old record is
    /// untouched.
    pub async fn resubmit(self: &Arc<Self>, job: &JobRef) -> Result<JobRef, GenerationError> {
        let tracked = self.tracked(job).await?;
        let previous = tracked.state.borrow().clone();
        if !previous.is_terminal() && !tracked.cancel.is_cancelled() {
            return Err(CoreError::Conflict(format!(
                "Job {job} is still {}; cancel it or wait for it to finish",
                previous.status()
            ))
            .into());
        }
        let spec = self.catalog.get(previous.model_id())?.clone();
        tracing::info!(job_id = %job, model_id = %spec.id, "Resubmitting job");
        let (new_job, ..) = self
            .submit_to(
                &spec,
                previous.prompt(),
                previous.config().clone(),
                None,
                &self.cancel,
            )
            .await?;
        Ok(new_job)
    }

    /// Current canonical state of a job.
    pub async fn get_status(&self, job: &JobRef) -> Result<GenerationJob, GenerationError> {
        Ok(self.tracked(job).await?.state.borrow().clone())
    }

    /// Follow a job's state as it changes.
    pub async fn watch(
        &self,
        job: &JobRef,
    ) -> Result<watch::Receiver<GenerationJob>, GenerationError> {
        Ok(self.tracked(job).await?.state.clone())
    }

    /// Stop polling a job and return its last-known status.
    ///
    /// The remote job is not touched. Once this returns, the local record no
    /// longer changes.
    pub async fn cancel(&self, job: &JobRef) -> Result<JobStatus, GenerationError> {
        let tracked = self.tracked(job).await?;
        tracked.cancel.cancel();
        if let Some(handle) = tracked.task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(job_id = %job, error = %e, "Polling task ended abnormally");
            }
        }
        let status = tracked.state.borrow().status();
        Ok(status)
    }

    /// Drop a terminal or cancelled job from the registry. Group members
    /// stay visible through their group until it is forgotten.
    pub async fn forget(&self, job: &JobRef) -> Result<(), GenerationError> {
        let mut jobs = self.jobs.write().await;
        let tracked = jobs.get(job).ok_or_else(|| CoreError::NotFound {
            entity: "job",
            id: job.to_string(),
        })?;
        let status = tracked.state.borrow().status();
        if !status.is_terminal() && !tracked.cancel.is_cancelled() {
            return Err(CoreError::Conflict(format!(
                "Job {job} is still {status}; cancel it or wait for it to finish"
            ))
            .into());
        }
        jobs.remove(job);
        tracing::debug!(job_id = %job, "Job forgotten");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    /// Pick a model for `category` from one consistent health snapshot.
    pub async fn select_model(&self, category: Category) -> Result<Selection, GenerationError> {
        let priorities = self.priorities.read().await;
        let selection = select_model(priorities.get(category), &self.health.view())
            .ok_or_else(|| no_models(category))?;
        if selection.degraded {
            tracing::warn!(
                category = %category,
                model_id = %selection.model_id,
                "Every model is unhealthy, using the most preferred one",
            );
        }
        Ok(selection)
    }

    /// Record a terminal outcome for a model and persist the counters.
    pub async fn record_outcome(
        &self,
        model_id: &str,
        outcome: impl Into<Outcome>,
    ) -> HealthSnapshot {
        record_and_persist(&self.health, self.store.as_ref(), model_id, outcome.into()).await
    }

    pub fn get_model_health(&self, model_id: &str) -> HealthSnapshot {
        self.health.get_health(model_id)
    }

    /// Operator reset of a model's counters. Returns `false` if there were
    /// none.
    pub async fn reset_model_health(&self, model_id: &str) -> bool {
        let removed = self.health.reset(model_id);
        if removed {
            tracing::info!(model_id, "Model health reset");
            if let Err(e) = self.store.save_health(&self.health.records()).await {
                tracing::warn!(error = %e, "Failed to persist model health");
            }
        }
        removed
    }

    pub async fn priority_list(&self, category: Category) -> Vec<ModelId> {
        self.priorities.read().await.get(category).to_vec()
    }

    /// Replace a category's preference order, merged against the catalog,
    /// and persist it. Returns the merged list.
    pub async fn set_priority_list(&self, category: Category, order: &[ModelId]) -> Vec<ModelId> {
        let available = self.catalog.available(category);
        let snapshot = {
            let mut priorities = self.priorities.write().await;
            priorities.set(category, order, &available);
            priorities.to_map()
        };
        if let Err(e) = self.store.save_priorities(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist priority lists");
        }
        let merged = snapshot.get(&category).cloned().unwrap_or_default();
        tracing::info!(category = %category, order = ?merged, "Priority list updated");
        merged
    }

    // -----------------------------------------------------------------------
    // Task groups
    // -----------------------------------------------------------------------

    /// Create a group with one member per segment, all on the same model,
    /// and start submitting them through the group's worker pool.
    pub async fn submit_group(
        self: &Arc<Self>,
        category: Category,
        segments: Vec<Segment>,
        config: CanonicalConfig,
    ) -> Result<Arc<TaskGroup>, GenerationError> {
        validate_segments(&segments)?;
        config.validate()?;

        let selection = self.select_model(category).await?;
        let spec = self.catalog.get(&selection.model_id)?;
        // Fail fast on setup problems instead of rejecting every member.
        self.credentials.get(spec.provider)?;
        self.registry.get(spec.provider)?;

        let group = Arc::new(TaskGroup::new(
            uuid::Uuid::now_v7().to_string(),
            spec.id.clone(),
            category,
            config,
            segments,
            self.config.group_concurrency,
            self.cancel.child_token(),
        ));
        self.groups
            .write()
            .await
            .insert(group.id().to_string(), Arc::clone(&group));

        tracing::info!(
            group_id = %group.id(),
            model_id = %group.model_id(),
            members = group.len(),
            concurrency = self.config.group_concurrency,
            "Task group created",
        );

        for index in 0..group.len() {
            self.spawn_member(&group, index);
        }
        Ok(group)
    }

    pub async fn group(&self, group_id: &str) -> Result<Arc<TaskGroup>, GenerationError> {
        self.groups
            .read()
            .await
            .get(group_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "task group",
                    id: group_id.to_string(),
                }
                .into()
            })
    }

    /// Re-run one failed or individually cancelled member without touching
    /// its siblings.
    pub async fn retry_segment(
        self: &Arc<Self>,
        group_id: &str,
        index: usize,
    ) -> Result<(), GenerationError> {
        let group = self.group(group_id).await?;
        if group.is_cancelled() {
            return Err(CoreError::Conflict(format!("Task group {group_id} was cancelled")).into());
        }
        group.claim_retry(index)?;

        tracing::info!(group_id, index, "Retrying task group segment");
        self.spawn_member(&group, index);
        Ok(())
    }

    /// Stop polling every live member. Completed and failed members keep
    /// their results; live ones keep their last-known status.
    pub async fn cancel_group(&self, group_id: &str) -> Result<JobStatus, GenerationError> {
        let group = self.group(group_id).await?;
        group.cancel_token().cancel();
        let jobs: Vec<JobRef> = group.job_refs().into_iter().flatten().collect();
        for stopped in join_all(jobs.iter().map(|job| self.cancel(job))).await {
            stopped?;
        }

        let snapshot = group.snapshot();
        tracing::info!(group_id, status = %snapshot.status, "Task group cancelled");
        self.events.publish(JobEvent::GroupSettled {
            group_id: group_id.to_string(),
            status: snapshot.status,
            progress: snapshot.progress,
        });
        Ok(snapshot.status)
    }

    /// Drop a finished or cancelled group and its member jobs.
    pub async fn forget_group(&self, group_id: &str) -> Result<(), GenerationError> {
        let mut groups = self.groups.write().await;
        let group = groups.get(group_id).cloned().ok_or_else(|| CoreError::NotFound {
            entity: "task group",
            id: group_id.to_string(),
        })?;
        if !group.is_finished() {
            return Err(CoreError::Conflict(format!(
                "Task group {group_id} is still {}; cancel it or wait for it to settle",
                group.aggregate_status()
            ))
            .into());
        }
        groups.remove(group_id);
        drop(groups);

        let mut jobs = self.jobs.write().await;
        for job in group.job_refs().into_iter().flatten() {
            jobs.remove(&job);
        }
        tracing::debug!(group_id, "Task group forgotten");
        Ok(())
    }

    /// Cancel every polling task and wait briefly for each to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.cancel.cancel();

        let jobs: Vec<(JobRef, Arc<TrackedJob>)> = self
            .jobs
            .read()
            .await
            .iter()
            .map(|(job, tracked)| (job.clone(), Arc::clone(tracked)))
            .collect();
        for (job, tracked) in jobs {
            if let Some(handle) = tracked.task.lock().await.take() {
                if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                    tracing::warn!(job_id = %job, "Polling task did not stop in time");
                }
            }
        }
        tracing::info!("Orchestrator shut down");
    }

    // ---- private helpers ----

    async fn tracked(&self, job: &JobRef) -> Result<Arc<TrackedJob>, GenerationError> {
        self.jobs.read().await.get(job).cloned().ok_or_else(|| {
            CoreError::NotFound {
                entity: "job",
                id: job.to_string(),
            }
            .into()
        })
    }

    /// Try-order for `category`: healthy models by preference, then the
    /// rest. Only the first is used unless submit fallback is enabled.
    async fn candidates(&self, category: Category) -> Result<Vec<ModelId>, GenerationError> {
        if !self.config.fallback_on_submit_error {
            return Ok(vec![self.select_model(category).await?.model_id]);
        }
        let priorities = self.priorities.read().await;
        let order = candidate_order(priorities.get(category), &self.health.view());
        if order.is_empty() {
            return Err(no_models(category));
        }
        Ok(order)
    }

    /// Submit to one model and start polling the new job under `parent`.
    /// Returns the job, its state and its own polling token.
    async fn submit_to(
        &self,
        spec: &ModelSpec,
        prompt: &str,
        config: CanonicalConfig,
        group_id: Option<&str>,
        parent: &CancellationToken,
    ) -> Result<(JobRef, watch::Receiver<GenerationJob>, CancellationToken), GenerationError> {
        let credential = self.credentials.get(spec.provider)?.to_string();
        let adapter = self.registry.get(spec.provider)?;

        let request = SubmitRequest {
            model: spec.provider_model.clone(),
            category: spec.category,
            prompt: prompt.to_string(),
            config,
        };
        let submitted = match adapter.submit_task(&request, &credential).await {
            Ok(submitted) => submitted,
            Err(e) => {
                tracing::error!(
                    model_id = %spec.id,
                    provider = %spec.provider,
                    error = %e,
                    "Submission failed",
                );
                if let Some(outcome) = submission_outcome(&e) {
                    record_and_persist(&self.health, self.store.as_ref(), &spec.id, outcome).await;
                }
                return Err(e);
            }
        };

        let job = GenerationJob::submitted(
            &submitted,
            spec.provider,
            spec.id.clone(),
            spec.category,
            request.prompt,
            request.config,
        );
        let job_ref = job.job_ref();
        let (state_tx, state_rx) = watch::channel(job);
        let cancel = parent.child_token();

        tracing::info!(job_id = %job_ref, model_id = %spec.id, group_id, "Job submitted");
        self.events.publish(JobEvent::Submitted {
            job: job_ref.clone(),
            model_id: spec.id.clone(),
            group_id: group_id.map(str::to_string),
        });

        let ctx = PollContext {
            adapter,
            credential,
            schedule: self.config.poll.clone(),
            error_tolerance: self.config.poll_error_tolerance,
            events: Arc::clone(&self.events),
            cancel: cancel.clone(),
        };
        let health = Arc::clone(&self.health);
        let store = Arc::clone(&self.store);
        let model_id = spec.id.clone();

        // Hold the map lock across the spawn so a fast poller can never be
        // looked up before it is registered.
        let mut jobs = self.jobs.write().await;
        let task = tokio::spawn(async move {
            let exit = poll_job(ctx, state_tx).await;
            let outcome = match exit {
                PollExit::Completed => Outcome::Success,
                PollExit::Failed(kind) => Outcome::from(kind),
                PollExit::Cancelled => return,
            };
            record_and_persist(&health, store.as_ref(), &model_id, outcome).await;
        });
        jobs.insert(
            job_ref.clone(),
            Arc::new(TrackedJob {
                state: state_rx.clone(),
                cancel: cancel.clone(),
                task: Mutex::new(Some(task)),
            }),
        );
        Ok((job_ref, state_rx, cancel))
    }

    /// Spawn the worker that runs one group member: wait for a pool permit,
    /// submit, then hold the permit until the member is terminal.
    fn spawn_member(self: &Arc<Self>, group: &Arc<TaskGroup>, index: usize) {
        let this = Arc::clone(self);
        let group = Arc::clone(group);

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = group.cancel_token().cancelled() => return,
                permit = group.permits().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let (prompt, config) = match group.member_request(index) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(
                        group_id = %group.id(),
                        index,
                        error = %e,
                        "Invalid group member",
                    );
                    return;
                }
            };
            let spec = match this.catalog.get(group.model_id()) {
                Ok(spec) => spec.clone(),
                Err(e) => {
                    let failure = JobFailure::infrastructure(e.to_string());
                    group.set_member(index, Member::Rejected(failure));
                    this.settle_group(&group);
                    return;
                }
            };

            match this
                .submit_to(&spec, &prompt, config, Some(group.id()), group.cancel_token())
                .await
            {
                Ok((job, mut state, cancel)) => {
                    group.set_member(
                        index,
                        Member::Submitted {
                            job,
                            state: state.clone(),
                            cancel,
                        },
                    );
                    wait_until_terminal(&mut state, group.cancel_token()).await;
                }
                Err(e) => {
                    tracing::warn!(
                        group_id = %group.id(),
                        index,
                        error = %e,
                        "Group member rejected",
                    );
                    let failure = JobFailure::infrastructure(e.to_string());
                    group.set_member(index, Member::Rejected(failure));
                }
            }
            drop(permit);
            this.settle_group(&group);
        });
    }

    fn settle_group(&self, group: &TaskGroup) {
        if group.is_cancelled() || !group.try_settle() {
            return;
        }
        let status = group.aggregate_status();
        let progress = group.combined_progress();
        tracing::info!(group_id = %group.id(), status = %status, "Task group settled");
        self.events.publish(JobEvent::GroupSettled {
            group_id: group.id().to_string(),
            status,
            progress,
        });
    }
}

/// Block until the job is terminal, its poller exits, or `cancel` fires.
async fn wait_until_terminal(
    state: &mut watch::Receiver<GenerationJob>,
    cancel: &CancellationToken,
) {
    loop {
        if state.borrow_and_update().is_terminal() {
            return;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Health outcome of a rejected submission. Setup errors raised before
/// any network call say nothing about the model.
fn submission_outcome(e: &GenerationError) -> Option<Outcome> {
    match e {
        GenerationError::Transport { .. } | GenerationError::Provider { .. } => {
            Some(Outcome::Failure)
        }
        GenerationError::ContentPolicy { .. } => Some(Outcome::ContentPolicy),
        GenerationError::Configuration(_)
        | GenerationError::Core(_)
        | GenerationError::Cancelled => None,
    }
}

async fn record_and_persist(
    health: &HealthTracker,
    store: &dyn StateStore,
    model_id: &str,
    outcome: Outcome,
) -> HealthSnapshot {
    let snapshot = health.record(model_id, outcome);
    if !snapshot.healthy {
        tracing::warn!(
            model_id,
            consecutive_failures = snapshot.consecutive_failures,
            "Model marked unhealthy",
        );
    }
    if let Err(e) = store.save_health(&health.records()).await {
        tracing::warn!(error = %e, "Failed to persist model health");
    }
    snapshot
}

fn no_models(category: Category) -> GenerationError {
    GenerationError::Configuration(format!("No models available for category {category}"))
}
