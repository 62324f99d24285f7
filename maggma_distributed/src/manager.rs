//! The Manager role: splits one Builder's work into chunks via `prechunk`, dispatches them
//! to Workers over a [`MessageBus`], and re-queues chunks whose Worker stops heartbeating.

use crate::{bus_retry::send_with_retry, protocol::ControlMessage};
use maggma_bus::MessageBus;
use maggma_core::{Builder, BuilderError, Chunk};
use observability_deps::tracing::{error, info, warn};
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};
use uuid::Uuid;

/// Tuning knobs for one Manager run.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Passed to `Builder::prechunk`. Ignored (a single chunk is used) if the Builder
    /// returns `None`, i.e. is non-distributable.
    pub num_chunks: usize,
    /// How long a chunk may go without a `HEARTBEAT` before its Worker is presumed dead
    /// and the chunk is re-queued.
    pub heartbeat_grace: Duration,
    /// How many times a single chunk may be re-dispatched after a `FAILED` report before
    /// it is counted as permanently failed.
    pub max_chunk_retries: usize,
    /// How many times a bus `send` is retried (with backoff) before the Manager treats the
    /// transport itself as fatal.
    pub bus_retry_budget: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            num_chunks: 1,
            heartbeat_grace: Duration::from_secs(30),
            max_chunk_retries: 2,
            bus_retry_budget: 5,
        }
    }
}

/// The outcome of one Manager-coordinated distributed run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributedOutcome {
    /// Total chunks the work was split into.
    pub chunks_total: usize,
    /// Chunks that exhausted their retry budget and never completed.
    pub chunks_failed: usize,
    /// Sum of `ItemError` counts reported across every successfully completed chunk.
    pub item_errors: usize,
}

struct InFlight {
    worker: String,
    last_heartbeat: Instant,
}

/// Drives one distributed run to completion: dispatch every chunk, track heartbeats,
/// re-queue on timeout or `FAILED`, then call `Builder::finalize()` once locally.
pub async fn run_manager(
    bus: Arc<dyn MessageBus>,
    mut builder: Box<dyn Builder>,
    builder_description: Value,
    build_id: Uuid,
    config: ManagerConfig,
) -> Result<DistributedOutcome, BuilderError> {
    let chunks: Vec<Chunk> = builder
        .prechunk(config.num_chunks)
        .unwrap_or_else(|| vec![Chunk::new()]);
    let total = chunks.len();
    info!(builder = builder.name(), total, "distributed run starting");

    let mut pending: VecDeque<usize> = (0..total).collect();
    let mut in_flight: HashMap<usize, InFlight> = HashMap::new();
    let mut retries: HashMap<usize, usize> = HashMap::new();
    let mut done: HashSet<usize> = HashSet::new();
    // Workers whose READY arrived while `pending` was empty. Held rather than answered with
    // EXIT immediately: a chunk still in flight elsewhere may yet be requeued (heartbeat
    // timeout or FAILED) and should go straight to one of these idle workers.
    let mut waiting_workers: VecDeque<String> = VecDeque::new();
    let mut item_errors = 0usize;
    let mut chunks_failed = 0usize;

    let mut sweep = tokio::time::interval((config.heartbeat_grace / 2).max(Duration::from_millis(1)));

    while done.len() < total {
        tokio::select! {
            _ = sweep.tick() => {
                let now = Instant::now();
                let stale: Vec<usize> = in_flight
                    .iter()
                    .filter(|(_, f)| now.duration_since(f.last_heartbeat) > config.heartbeat_grace)
                    .map(|(idx, _)| *idx)
                    .collect();
                for idx in stale {
                    let worker = in_flight.remove(&idx).map(|f| f.worker).unwrap_or_default();
                    warn!(chunk_index = idx, %worker, "worker heartbeat grace period elapsed, requeueing chunk");
                    pending.push_back(idx);
                }
                dispatch_to_waiting(
                    bus.as_ref(), &mut pending, &mut waiting_workers, &mut in_flight,
                    build_id, total, &builder_description, &chunks, config.bus_retry_budget,
                ).await;
            }
            received = bus.recv() => {
                let envelope = match received {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(%err, "bus recv failed, continuing");
                        continue;
                    }
                };
                let message: ControlMessage = match serde_json::from_value(envelope.payload) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(%err, from = %envelope.from, "dropping malformed control message");
                        continue;
                    }
                };

                match message {
                    ControlMessage::Ready { .. } => {
                        waiting_workers.push_back(envelope.from);
                        dispatch_to_waiting(
                            bus.as_ref(), &mut pending, &mut waiting_workers, &mut in_flight,
                            build_id, total, &builder_description, &chunks, config.bus_retry_budget,
                        ).await;
                    }
                    ControlMessage::Heartbeat { chunk_index } => {
                        if let Some(flight) = in_flight.get_mut(&chunk_index) {
                            flight.last_heartbeat = Instant::now();
                        }
                    }
                    ControlMessage::Done { chunk_index, errors } => {
                        in_flight.remove(&chunk_index);
                        item_errors += errors;
                        done.insert(chunk_index);
                    }
                    ControlMessage::Failed { chunk_index, message } => {
                        in_flight.remove(&chunk_index);
                        let attempts = retries.entry(chunk_index).or_insert(0);
                        *attempts += 1;
                        if *attempts > config.max_chunk_retries {
                            error!(chunk_index, %message, "chunk permanently failed");
                            chunks_failed += 1;
                            done.insert(chunk_index);
                        } else {
                            warn!(chunk_index, %message, attempt = *attempts, "chunk failed, requeueing");
                            pending.push_back(chunk_index);
                            dispatch_to_waiting(
                                bus.as_ref(), &mut pending, &mut waiting_workers, &mut in_flight,
                                build_id, total, &builder_description, &chunks, config.bus_retry_budget,
                            ).await;
                        }
                    }
                    ControlMessage::Chunk { .. } | ControlMessage::Exit => {
                        // Only a Worker ever receives these.
                    }
                }
            }
        }
    }

    for worker in waiting_workers.drain(..) {
        let payload = serde_json::to_value(&ControlMessage::Exit).expect("ControlMessage always serializes");
        let _ = send_with_retry(bus.as_ref(), &worker, payload, config.bus_retry_budget).await;
    }

    builder.finalize().await?;
    bus.broadcast(
        serde_json::to_value(&ControlMessage::Exit).expect("ControlMessage always serializes"),
    )
    .await
    .ok();

    Ok(DistributedOutcome {
        chunks_total: total,
        chunks_failed,
        item_errors,
    })
}

/// Pair off idle workers with newly available chunks, one-for-one, until either side runs
/// dry. A worker pulled off `waiting_workers` whose dispatch itself fails is dropped (not
/// re-queued as waiting): a `send` failure here means the bus considers it unreachable.
#[allow(clippy::too_many_arguments)]
async fn dispatch_to_waiting(
    bus: &dyn MessageBus,
    pending: &mut VecDeque<usize>,
    waiting_workers: &mut VecDeque<String>,
    in_flight: &mut HashMap<usize, InFlight>,
    build_id: Uuid,
    total_chunks: usize,
    builder_description: &Value,
    chunks: &[Chunk],
    bus_retry_budget: usize,
) {
    while let (Some(idx), Some(worker)) = (pending.front().copied(), waiting_workers.front().cloned()) {
        pending.pop_front();
        waiting_workers.pop_front();

        let chunk_message = ControlMessage::Chunk {
            build_id,
            chunk_index: idx,
            total_chunks,
            builder: builder_description.clone(),
            overrides: chunks[idx].clone(),
        };
        let payload = serde_json::to_value(&chunk_message).expect("ControlMessage always serializes");
        match send_with_retry(bus, &worker, payload, bus_retry_budget).await {
            Ok(()) => {
                in_flight.insert(idx, InFlight { worker, last_heartbeat: Instant::now() });
            }
            Err(err) => {
                warn!(%err, chunk_index = idx, %worker, "failed to dispatch chunk, requeueing");
                pending.push_front(idx);
            }
        }
    }
}
