//! The Worker role: announces readiness, runs whatever chunk the Manager dispatches through
//! an embedded single-process [`Executor`], and heartbeats while it works.

use crate::protocol::{apply_chunk, ControlMessage};
use maggma_bus::MessageBus;
use maggma_core::BuilderRegistry;
use maggma_executor::Executor;
use observability_deps::tracing::{error, info, warn};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Tuning knobs for one Worker's loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// The Executor's worker-pool size for each chunk this process runs.
    pub num_workers: usize,
    /// How often to send `HEARTBEAT` while a chunk is running.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Run the Worker loop until the Manager sends `EXIT`: `READY` → `CHUNK`/`EXIT` → (on
/// `CHUNK`) rehydrate a Builder via `registry`, run it through an embedded [`Executor`]
/// with [`Executor::run_chunk`] (finalize is the Manager's job, not any one chunk's), then
/// `DONE`/`FAILED` → loop.
pub async fn run_worker(
    bus: Arc<dyn MessageBus>,
    manager_id: &str,
    registry: Arc<BuilderRegistry>,
    config: WorkerConfig,
) {
    let executor = Executor::new(config.num_workers);

    loop {
        let ready = ControlMessage::Ready {
            num_workers: config.num_workers,
        };
        if let Err(err) = bus
            .send(
                manager_id,
                serde_json::to_value(&ready).expect("ControlMessage always serializes"),
            )
            .await
        {
            error!(%err, "failed to send READY, stopping worker loop");
            return;
        }

        let envelope = match bus.recv().await {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%err, "failed to receive from manager, stopping worker loop");
                return;
            }
        };
        let message: ControlMessage = match serde_json::from_value(envelope.payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed control message from manager");
                continue;
            }
        };

        let (build_id, chunk_index, builder_description, overrides) = match message {
            ControlMessage::Exit => {
                info!("manager sent EXIT, worker loop stopping");
                return;
            }
            ControlMessage::Chunk {
                build_id,
                chunk_index,
                builder,
                overrides,
                ..
            } => (build_id, chunk_index, builder, overrides),
            other => {
                warn!(?other, "unexpected message while awaiting a chunk, ignoring");
                continue;
            }
        };

        let description = apply_chunk(&builder_description, &overrides);
        let builder = match registry.build(&description) {
            Ok(builder) => builder,
            Err(err) => {
                report_failure(bus.as_ref(), manager_id, chunk_index, err.to_string()).await;
                continue;
            }
        };

        let cancel = CancellationToken::new();
        let heartbeat_bus = Arc::clone(&bus);
        let heartbeat_manager = manager_id.to_string();
        let heartbeat_cancel = cancel.clone();
        let heartbeat_interval = config.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = tokio::time::sleep(heartbeat_interval) => {
                        let message = ControlMessage::Heartbeat { chunk_index };
                        if heartbeat_bus
                            .send(
                                &heartbeat_manager,
                                serde_json::to_value(&message).expect("ControlMessage always serializes"),
                            )
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        let run_result = executor
            .run_chunk(builder, build_id, None, CancellationToken::new())
            .await;
        cancel.cancel();
        let _ = heartbeat_task.await;

        match run_result {
            Ok(outcome) => {
                let message = ControlMessage::Done {
                    chunk_index,
                    errors: outcome.errors,
                };
                if let Err(err) = bus
                    .send(manager_id, serde_json::to_value(&message).expect("serializes"))
                    .await
                {
                    error!(%err, chunk_index, "failed to report DONE, stopping worker loop");
                    return;
                }
            }
            Err(err) => {
                report_failure(bus.as_ref(), manager_id, chunk_index, err.to_string()).await;
            }
        }
    }
}

async fn report_failure(bus: &dyn MessageBus, manager_id: &str, chunk_index: usize, message: String) {
    let failed = ControlMessage::Failed { chunk_index, message };
    if let Err(err) = bus
        .send(manager_id, serde_json::to_value(&failed).expect("ControlMessage always serializes"))
        .await
    {
        error!(%err, chunk_index, "failed to report FAILED");
    }
}
