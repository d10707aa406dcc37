//! `genflow-worker` -- command-line driver for the generation pipeline.
//!
//! Waits for the local proxy, submits one prompt (or a list of prompts as a
//! task group), logs progress as it arrives and prints the final job or
//! group state as JSON on stdout. Ctrl-C stops polling; the remote jobs are
//! left running.
//!
//! # Environment variables
//!
//! | Variable                      | Required | Default                 |
//! |-------------------------------|----------|-------------------------|
//! | `GENFLOW_PROXY_URL`           | no       | `http://localhost:3001` |
//! | `GENFLOW_<PROVIDER>_API_KEY`  | per provider used | --             |
//! | `GENFLOW_STATE_FILE`          | no       | in-memory               |
//! | `RUST_LOG`                    | no       | `genflow_worker=info,...` |
//!
//! See `PipelineConfig::from_env` for the polling and pool settings.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use genflow_core::config::{AspectRatio, CanonicalConfig, DEFAULT_DURATION_SECS};
use genflow_core::job::JobStatus;
use genflow_core::task_group::Segment;
use genflow_core::types::{Category, JobRef};
use genflow_events::{Envelope, EventBus, JobEvent};
use genflow_pipeline::{
    Catalog, Credentials, JsonFileStore, MemoryStore, Orchestrator, OrchestratorParts,
    PipelineConfig, StateStore,
};
use genflow_providers::http::{DEFAULT_READY_ATTEMPTS, DEFAULT_READY_INTERVAL};
use genflow_providers::{ProviderRegistry, ProxyClient};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for genflow-worker
#[derive(Parser, Debug)]
#[command(name = "genflow-worker")]
#[command(about = "Submit generation jobs through the local provider proxy")]
#[command(version)]
struct Args {
    /// Media category: image, text, audio or video
    #[arg(short, long, default_value = "video", value_parser = Category::parse)]
    category: Category,

    /// Use this catalog model instead of selecting one by priority and health
    #[arg(short, long, conflicts_with = "group")]
    model: Option<String>,

    /// Aspect ratio: 16:9, 9:16 or 1:1
    #[arg(long, default_value = "16:9", value_parser = AspectRatio::parse)]
    aspect_ratio: AspectRatio,

    /// Requested duration in seconds
    #[arg(long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u32,

    /// Ask for the provider's higher quality tier
    #[arg(long)]
    hd: bool,

    /// URL of a reference image shared by every prompt
    #[arg(long)]
    reference: Option<String>,

    /// Run the prompts as one task group, one segment per prompt
    #[arg(short, long)]
    group: bool,

    /// Prompt to generate (one per segment with --group)
    #[arg(required = true)]
    prompts: Vec<String>,
}

/// What the worker is following.
enum Target {
    Job(JobRef),
    Group(String),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "genflow_worker=info,genflow_pipeline=info,genflow_providers=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "genflow-worker failed");
            std::process::exit(1);
        }
    }
}

/// Returns whether the job (or every group member) completed.
async fn run(args: Args) -> anyhow::Result<bool> {
    if !args.group && args.prompts.len() > 1 {
        anyhow::bail!("Several prompts need --group");
    }

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let credentials = Credentials::from_env();
    tracing::info!(
        proxy_url = %config.proxy_url,
        credentials = ?credentials.configured(),
        "Starting genflow-worker",
    );

    let client = ProxyClient::new(config.proxy_url.clone(), config.request_timeout)?;
    if !client
        .wait_until_ready(DEFAULT_READY_ATTEMPTS, DEFAULT_READY_INTERVAL)
        .await
    {
        anyhow::bail!("Proxy at {} never became ready", config.proxy_url);
    }

    let store: Arc<dyn StateStore> = match &config.state_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using JSON state file");
            Arc::new(JsonFileStore::new(path))
        }
        None => Arc::new(MemoryStore::new()),
    };
    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();

    let orchestrator = Orchestrator::start(OrchestratorParts {
        config,
        registry: ProviderRegistry::with_defaults(client),
        credentials,
        catalog: Catalog::builtin(),
        store,
        events,
    })
    .await;

    let generation = CanonicalConfig {
        aspect_ratio: args.aspect_ratio,
        duration_secs: args.duration,
        hd: args.hd,
        reference_asset: args.reference.clone(),
    };

    let target = if args.group {
        let segments = args.prompts.iter().map(Segment::new).collect();
        let group = orchestrator
            .submit_group(args.category, segments, generation)
            .await
            .context("Task group submission failed")?;
        Target::Group(group.id().to_string())
    } else {
        let prompt = &args.prompts[0];
        let job = match &args.model {
            Some(model_id) => orchestrator.submit_with_model(model_id, prompt, generation).await,
            None => orchestrator.submit(args.category, prompt, generation).await,
        }
        .context("Submission failed")?;
        Target::Job(job)
    };

    let succeeded = tokio::select! {
        succeeded = follow(&mut rx, &target) => succeeded,
        () = shutdown_signal() => {
            let status = match &target {
                Target::Job(job) => orchestrator.cancel(job).await?,
                Target::Group(id) => orchestrator.cancel_group(id).await?,
            };
            tracing::info!(last_status = %status, "Stopped following; remote work continues");
            false
        }
    };

    let report = match &target {
        Target::Job(job) => serde_json::to_string_pretty(&orchestrator.get_status(job).await?)?,
        Target::Group(id) => serde_json::to_string_pretty(&orchestrator.group(id).await?.snapshot())?,
    };
    println!("{report}");

    orchestrator.shutdown().await;
    Ok(succeeded)
}

/// Log events for `target` until it settles.
async fn follow(rx: &mut broadcast::Receiver<Envelope>, target: &Target) -> bool {
    let mut members: Vec<JobRef> = Vec::new();

    loop {
        let envelope = match rx.recv().await {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        };

        let ours = match (target, &envelope.event) {
            (Target::Group(id), JobEvent::Submitted { job, group_id, .. })
                if group_id.as_deref() == Some(id.as_str()) =>
            {
                members.push(job.clone());
                true
            }
            (Target::Group(id), JobEvent::GroupSettled { group_id, .. }) => group_id == id,
            (Target::Group(_), event) => event.job().is_some_and(|job| members.contains(job)),
            (Target::Job(followed), event) => event.job() == Some(followed),
        };
        if !ours {
            continue;
        }

        match envelope.event {
            JobEvent::Submitted { job, model_id, .. } => {
                tracing::info!(job_id = %job, model_id = %model_id, "Submitted");
            }
            JobEvent::Progress { job, status, percent } => {
                tracing::info!(job_id = %job, status = %status, percent, "Progress");
            }
            JobEvent::Completed { job, result } => {
                tracing::info!(
                    job_id = %job,
                    artifact_url = %result.artifact_url,
                    flagged = result.violation.is_some(),
                    "Completed",
                );
                if matches!(target, Target::Job(_)) {
                    return true;
                }
            }
            JobEvent::Failed { job, failure } => {
                tracing::error!(job_id = %job, kind = ?failure.kind, error = %failure.message, "Failed");
                if matches!(target, Target::Job(_)) {
                    return false;
                }
            }
            JobEvent::Cancelled { job, last_status } => {
                tracing::info!(job_id = %job, last_status = %last_status, "Cancelled");
                if matches!(target, Target::Job(_)) {
                    return false;
                }
            }
            JobEvent::GroupSettled { group_id, status, progress } => {
                tracing::info!(group_id = %group_id, status = %status, progress, "Task group settled");
                return status == JobStatus::Completed;
            }
        }
    }
}

/// Resolve on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), stopping"),
        () = terminate => tracing::info!("Received SIGTERM, stopping"),
    }
}
