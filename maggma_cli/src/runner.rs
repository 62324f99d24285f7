//! Wires a parsed [`Config`] to an actual run: loads the Builder description(s), connects a
//! [`maggma_reporter::Reporter`] if asked for one, and dispatches to the embedded
//! [`maggma_executor::Executor`], [`maggma_distributed`]'s Manager, or its Worker depending
//! on [`Mode`].

use crate::{
    builtins,
    config::{Config, Mode},
};
use maggma_bus::{MessageBus, TcpBus};
use maggma_core::{machine_id, BuilderError};
use maggma_distributed::{high_water_mark, run_manager, run_worker, ManagerConfig, WorkerConfig};
use maggma_executor::Executor;
use maggma_reporter::Reporter;
use observability_deps::tracing::{info, warn};
use snafu::{ResultExt, Snafu};
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid configuration: {message}"))]
    Config { message: String },

    #[snafu(display("failed to read builder description {}: {source}", path.display()))]
    ReadDescription { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("malformed builder description {}: {source}", path.display()))]
    ParseDescription { path: std::path::PathBuf, source: serde_json::Error },

    #[snafu(display("{source}"))]
    Builder { source: BuilderError },

    #[snafu(display("reporter setup failed: {source}"))]
    Reporter { source: maggma_core::ReporterError },

    #[snafu(display("bus error: {source}"))]
    Bus { source: maggma_bus::BusError },

    #[snafu(display("distributed manager requires exactly one builder description, got {count}"))]
    ManagerBuilderCount { count: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What the run produced, for `main` to turn into an exit code and a summary log line.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub chunks_failed: usize,
    pub item_errors: usize,
}

pub async fn run(config: Config) -> Result<RunSummary> {
    config.validate_profiling().map_err(|message| Error::Config { message })?;
    let mode = config.mode().map_err(|message| Error::Config { message })?;

    if config.memory_profiling {
        // Peak-RSS sampling belongs at the process level (e.g. a periodic `/proc/self/status`
        // read), not inside the Executor's own pipeline; left for the operator's process
        // supervisor to wire up against `--profiling-dir` until this binary does it itself.
        warn!(dir = ?config.profiling_dir, "memory profiling was requested but is not yet implemented");
    }

    let reporter = match &config.reporter {
        Some(path) => {
            let description = load_description(path)?;
            let sink = builtins::store_from_value(&description).context(BuilderSnafu)?;
            Some(Reporter::spawn(sink, 256).await.context(ReporterSnafu)?)
        }
        None => None,
    };
    let events = reporter.as_ref().map(Reporter::sender);

    let summary = match mode {
        Mode::Local => run_local(&config, events).await,
        Mode::Manager { bind_addr, num_chunks } => {
            if events.is_some() {
                warn!("--reporter is not yet wired up for distributed-manager mode; chunk events run on Workers are not shipped back over the bus");
            }
            run_manager_mode(&config, &bind_addr, num_chunks).await
        }
        Mode::Worker { manager_addr } => run_worker_mode(&config, &manager_addr).await,
    };

    if let Some(reporter) = reporter {
        reporter.shutdown().await;
    }

    summary
}

fn load_description(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).context(ReadDescriptionSnafu { path: path.to_path_buf() })?;
    serde_json::from_str(&raw).context(ParseDescriptionSnafu { path: path.to_path_buf() })
}

async fn run_local(config: &Config, events: Option<tokio::sync::mpsc::Sender<maggma_core::BuildEvent>>) -> Result<RunSummary> {
    let registry = builtins::registry();
    let executor = Executor::new(config.workers);
    let mut summary = RunSummary::default();

    for path in &config.builders {
        let description = load_description(path)?;
        let builder = registry.build(&description).context(BuilderSnafu)?;
        let name = builder.name().to_string();
        info!(builder = %name, path = %path.display(), "starting local run");
        let outcome = executor
            .run(builder, Uuid::new_v4(), events.clone(), CancellationToken::new())
            .await
            .context(BuilderSnafu)?;
        info!(builder = %name, errors = outcome.errors, warnings = outcome.warnings, duration = ?outcome.duration, "local run finished");
        summary.item_errors += outcome.errors;
    }

    Ok(summary)
}

async fn run_manager_mode(config: &Config, bind_addr: &str, num_chunks: usize) -> Result<RunSummary> {
    if config.builders.len() != 1 {
        return Err(Error::ManagerBuilderCount { count: config.builders.len() });
    }
    let description = load_description(&config.builders[0])?;
    let registry = builtins::registry();
    let builder = registry.build(&description).context(BuilderSnafu)?;

    let queue_capacity = high_water_mark(num_chunks, config.workers);
    let bus: Arc<dyn MessageBus> =
        Arc::new(TcpBus::bind("manager", bind_addr, queue_capacity).await.context(BusSnafu)?);
    info!(bind_addr, num_chunks, queue_capacity, "distributed manager listening");

    let outcome = run_manager(
        bus,
        builder,
        description,
        Uuid::new_v4(),
        ManagerConfig { num_chunks, ..Default::default() },
    )
    .await
    .context(BuilderSnafu)?;

    Ok(RunSummary { chunks_failed: outcome.chunks_failed, item_errors: outcome.item_errors })
}

async fn run_worker_mode(config: &Config, manager_addr: &str) -> Result<RunSummary> {
    let registry = Arc::new(builtins::registry());
    let self_id = machine_id();
    let queue_capacity = high_water_mark(config.num_chunks.unwrap_or(1), config.workers);
    let bus: Arc<dyn MessageBus> = Arc::new(
        TcpBus::connect(self_id, "manager", manager_addr, queue_capacity)
            .await
            .context(BusSnafu)?,
    );
    info!(manager_addr, queue_capacity, "distributed worker connected");

    run_worker(bus, "manager", registry, WorkerConfig { num_workers: config.workers, ..Default::default() }).await;

    Ok(RunSummary::default())
}
