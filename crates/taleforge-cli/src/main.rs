//! Command-line driver for the Taleforge scene pipeline.
//!
//! Reads a story plan, creates (or resumes) its project, and produces the
//! plan's scenes one after another, appending each committed scene to the
//! manuscript. Optionally serves the observer API while it runs.
//!
//! # Architecture
//!
//! ```text
//! plan.yaml --> SceneOrchestrator --> RetryingGateway --> LlmBackend --> HTTP
//!                      |
//!                      +--> StoryMemoryStore (SQLite) --> manuscript.md
//! ```
//!
//! All configuration comes from environment variables; see
//! `CliConfig` and `GatewayConfig::from_env`.

mod config;
mod plan;

use std::sync::Arc;

use anyhow::Context;
use taleforge_gateway::{GatewayConfig, Provider, RetryingGateway, create_backend};
use taleforge_memory::{MemoryDb, MemoryError, StoryMemoryStore};
use taleforge_observer::{AppState, ServerConfig, start_server};
use taleforge_pipeline::{
    ControlRegistry, MarkdownManuscript, PipelineConfig, PromptEngine, SceneOrchestrator,
};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;
use crate::plan::StoryPlan;

/// Application entry point.
///
/// Initializes logging, loads configuration, wires the pipeline, and
/// produces every remaining scene of the plan.
///
/// # Errors
///
/// Returns an error if initialization fails or a scene cannot be produced.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::from_env()?;
    init_logging(cli.log_json);
    info!("taleforge starting");

    let plan = StoryPlan::from_file(&cli.plan)?;
    let pipeline_config = match &cli.pipeline_config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load pipeline config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let prompts = match &cli.templates_dir {
        Some(dir) => PromptEngine::with_overrides(dir)
            .with_context(|| format!("failed to load templates from {}", dir.display()))?,
        None => PromptEngine::builtin().context("built-in templates failed to load")?,
    };

    // Providers share one in-flight call limit.
    let gateway = GatewayConfig::from_env().context("invalid provider configuration")?;
    let permits = Arc::new(Semaphore::new(gateway.max_concurrent_calls));
    let writer = RetryingGateway::with_permits(
        create_backend(&gateway.writer),
        gateway.retry.clone(),
        Arc::clone(&permits),
    )
    .with_context_window(gateway.writer.context_tokens);
    let critic = RetryingGateway::with_permits(
        create_backend(&gateway.critic),
        gateway.retry,
        permits,
    )
    .with_context_window(gateway.critic.context_tokens);
    info!(
        writer = writer.name(),
        writer_model = gateway.writer.model,
        critic = critic.name(),
        critic_model = gateway.critic.model,
        max_concurrent_calls = gateway.max_concurrent_calls,
        "providers configured"
    );
    if cli.skip_health_check {
        warn!("provider health check skipped");
    } else {
        writer
            .health_check()
            .await
            .with_context(|| format!("writer provider {} is not reachable", writer.name()))?;
        critic
            .health_check()
            .await
            .with_context(|| format!("critic provider {} is not reachable", critic.name()))?;
        info!("providers reachable");
    }

    let store = Arc::new(match &cli.database_url {
        Some(url) => StoryMemoryStore::with_database(
            MemoryDb::open(url)
                .await
                .with_context(|| format!("failed to open story database {url}"))?,
        ),
        None => {
            warn!("TALEFORGE_DB not set, story memory will not survive this process");
            StoryMemoryStore::in_memory()
        }
    });

    let head = match store.read_snapshot(&plan.project).await {
        Ok(snapshot) => {
            info!(
                project = %plan.project,
                title = %snapshot.title,
                head = snapshot.head_sequence,
                planned = plan.scenes.len(),
                words = snapshot.total_words,
                "resuming project"
            );
            snapshot.head_sequence
        }
        Err(MemoryError::UnknownProject(_)) => {
            store
                .create_project(&plan.project, plan.seed.clone())
                .await
                .context("failed to create project")?;
            0
        }
        Err(e) => return Err(e).context("failed to read project"),
    };

    let controls = Arc::new(ControlRegistry::new());
    if let Some(addr) = cli.observer_addr {
        let server = ServerConfig { addr };
        let state = Arc::new(AppState::new(Arc::clone(&store), Arc::clone(&controls)));
        tokio::spawn(async move {
            if let Err(e) = start_server(&server, state).await {
                error!(error = %e, "observer server stopped");
            }
        });
    }

    let mut manuscript = MarkdownManuscript::new(&cli.manuscript);
    if let Some(dir) = &cli.scenes_dir {
        manuscript = manuscript.with_scene_files(dir);
    }
    let orchestrator = SceneOrchestrator::new(
        Arc::clone(&store),
        writer,
        critic,
        Arc::new(prompts),
        pipeline_config,
    )
    .with_controls(controls)
    .with_sink(Arc::new(manuscript));

    for (sequence, request) in plan.remaining(head) {
        info!(project = %plan.project, sequence, goal = %request.goal, "producing scene");
        if let Err(failure) = orchestrator.produce_scene(&plan.project, request).await {
            for (step, cause) in failure.error_chain.iter().enumerate() {
                error!(project = %plan.project, sequence, step, cause = %cause, "error chain");
            }
            return Err(failure).context("scene production stopped");
        }
    }

    let snapshot = store.read_snapshot(&plan.project).await?;
    info!(
        project = %plan.project,
        scenes = snapshot.head_sequence,
        words = snapshot.total_words,
        manuscript = %cli.manuscript.display(),
        "story plan complete"
    );

    if let Some(path) = &cli.export {
        let export = store.export_project(&plan.project).await?;
        std::fs::write(path, serde_json::to_string_pretty(&export)?)
            .with_context(|| format!("failed to write export {}", path.display()))?;
        info!(path = %path.display(), "project exported");
    }

    Ok(())
}

/// Structured logging: `RUST_LOG` filter (default `info`), optionally JSON.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
