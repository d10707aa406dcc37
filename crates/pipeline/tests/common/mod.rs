//! Shared fixtures for pipeline integration tests.
//!
//! [`ScriptedAdapter`] is an in-process `ProviderAdapter` whose status
//! responses are scripted per job id. Job ids are derived from the prompt
//! and a per-prompt submission counter (`"shot-a#1"`, `"shot-a#2"`, ...) so
//! scripts stay deterministic when members are submitted concurrently.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genflow_core::config::CanonicalConfig;
use genflow_core::error::GenerationError;
use genflow_core::job::{JobFailure, JobResult, JobStatus, StatusUpdate, SubmitResult};
use genflow_core::types::{Category, ProviderKind};
use genflow_events::{Envelope, JobEvent};
use genflow_pipeline::{
    Catalog, Credentials, MemoryStore, ModelSpec, Orchestrator, OrchestratorParts,
    PipelineConfig, PollSchedule, StateStore,
};
use genflow_providers::{ProgressCallback, ProviderAdapter, ProviderRegistry, SubmitRequest};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Scripted responses
// ---------------------------------------------------------------------------

pub type Step = Result<StatusUpdate, GenerationError>;

pub fn live(status: JobStatus, progress: Option<u8>) -> Step {
    Ok(StatusUpdate {
        status,
        progress,
        result: None,
        failure: None,
        native_status: status.as_str().to_string(),
    })
}

pub fn processing(progress: u8) -> Step {
    live(JobStatus::Processing, Some(progress))
}

pub fn completed(url: &str) -> Step {
    Ok(StatusUpdate {
        status: JobStatus::Completed,
        progress: Some(100),
        result: Some(JobResult {
            artifact_url: url.to_string(),
            violation: None,
        }),
        failure: None,
        native_status: "completed".to_string(),
    })
}

pub fn failed(message: &str) -> Step {
    Ok(StatusUpdate {
        status: JobStatus::Error,
        progress: None,
        result: None,
        failure: Some(JobFailure::infrastructure(message)),
        native_status: "failed".to_string(),
    })
}

pub fn content_policy(reason: &str) -> Step {
    Ok(StatusUpdate {
        status: JobStatus::Error,
        progress: None,
        result: None,
        failure: Some(JobFailure::content_policy(reason)),
        native_status: "failed".to_string(),
    })
}

pub fn transport_error(provider: ProviderKind) -> Step {
    Err(GenerationError::Transport {
        provider,
        message: "connection reset".to_string(),
    })
}

pub fn provider_error(provider: ProviderKind, status: u16) -> Step {
    Err(GenerationError::Provider {
        provider,
        status,
        body: "{\"error\":\"boom\"}".to_string(),
    })
}

// ---------------------------------------------------------------------------
// ScriptedAdapter
// ---------------------------------------------------------------------------

pub struct ScriptedAdapter {
    kind: ProviderKind,
    categories: &'static [Category],
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    failing_models: Mutex<HashSet<String>>,
    submissions: Mutex<HashMap<String, usize>>,
    submitted: Mutex<Vec<SubmitRequest>>,
    checks: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            categories: &[Category::Video, Category::Image],
            scripts: Mutex::new(HashMap::new()),
            failing_models: Mutex::new(HashSet::new()),
            submissions: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            checks: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Queue status responses for a job id. Once a script runs out the job
    /// reports `processing` without progress forever.
    pub fn script(&self, id: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .extend(steps);
    }

    /// Make every submission for `provider_model` fail with a 503.
    pub fn fail_submissions_for(&self, provider_model: &str) {
        self.failing_models
            .lock()
            .unwrap()
            .insert(provider_model.to_string());
    }

    pub fn submitted(&self) -> Vec<SubmitRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_checks(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn categories(&self) -> &'static [Category] {
        self.categories
    }

    fn transform_config(&self, config: &CanonicalConfig) -> serde_json::Value {
        serde_json::json!({ "ratio": config.aspect_ratio.as_str() })
    }

    async fn submit_task(
        &self,
        request: &SubmitRequest,
        _credential: &str,
    ) -> Result<SubmitResult, GenerationError> {
        self.submitted.lock().unwrap().push(request.clone());
        if self.failing_models.lock().unwrap().contains(&request.model) {
            return Err(GenerationError::Provider {
                provider: self.kind,
                status: 503,
                body: "overloaded".to_string(),
            });
        }
        let attempt = {
            let mut submissions = self.submissions.lock().unwrap();
            let count = submissions.entry(request.prompt.clone()).or_default();
            *count += 1;
            *count
        };
        Ok(SubmitResult {
            id: format!("{}#{attempt}", request.prompt),
            status: JobStatus::Queued,
            progress: 0,
            created_at: chrono::Utc::now(),
        })
    }

    async fn check_status(
        &self,
        id: &str,
        _credential: &str,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> Result<StatusUpdate, GenerationError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.checks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| live(JobStatus::Processing, None));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let (Ok(update), Some(callback)) = (&step, on_progress) {
            if let Some(percent) = update.progress {
                callback(percent);
            }
        }
        step
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const FAST_POLL: Duration = Duration::from_millis(2);

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        poll: PollSchedule::fixed(FAST_POLL),
        ..PipelineConfig::default()
    }
}

/// `alpha` runs on Sutu, `beta` on Dayu; both video.
pub fn two_model_catalog() -> Catalog {
    Catalog::new(vec![
        ModelSpec::new("alpha", Category::Video, ProviderKind::Sutu, "alpha-model"),
        ModelSpec::new("beta", Category::Video, ProviderKind::Dayu, "beta-model"),
    ])
    .unwrap()
}

pub fn default_credentials() -> Credentials {
    Credentials::new()
        .with(ProviderKind::Sutu, "sk-sutu")
        .with(ProviderKind::Dayu, "sk-dayu")
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub sutu: Arc<ScriptedAdapter>,
    pub dayu: Arc<ScriptedAdapter>,
    pub events: broadcast::Receiver<Envelope>,
}

pub async fn harness(config: PipelineConfig) -> Harness {
    harness_with(config, Arc::new(MemoryStore::new()), default_credentials()).await
}

pub async fn harness_with(
    config: PipelineConfig,
    store: Arc<dyn StateStore>,
    credentials: Credentials,
) -> Harness {
    let sutu = ScriptedAdapter::new(ProviderKind::Sutu);
    let dayu = ScriptedAdapter::new(ProviderKind::Dayu);
    let mut registry = ProviderRegistry::new();
    registry.register(sutu.clone());
    registry.register(dayu.clone());

    let events = Arc::new(genflow_events::EventBus::default());
    let receiver = events.subscribe();
    let orchestrator = Orchestrator::start(OrchestratorParts {
        config,
        registry,
        credentials,
        catalog: two_model_catalog(),
        store,
        events,
    })
    .await;

    Harness {
        orchestrator,
        sutu,
        dayu,
        events: receiver,
    }
}

/// Poll `check` until it holds, failing after a timeout. Health is recorded
/// by the polling task just after the job turns terminal, so tests that
/// inspect it wait here.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Receive events until `pred` matches one, failing after a timeout.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<Envelope>,
    pred: impl Fn(&JobEvent) -> bool,
) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = events.recv().await.expect("event bus closed");
            if pred(&envelope.event) {
                return envelope.event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the job reaches a terminal state.
pub async fn wait_terminal(
    orchestrator: &Orchestrator,
    job: &genflow_core::types::JobRef,
) -> genflow_core::job::GenerationJob {
    let mut rx = orchestrator.watch(job).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if rx.borrow_and_update().is_terminal() {
                return rx.borrow().clone();
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .expect("timed out waiting for a terminal state")
}
