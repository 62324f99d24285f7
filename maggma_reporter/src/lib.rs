//! Persists [`BuildEvent`] lifecycle records to a sink [`Store`], off the Executor's own
//! task: the Executor only ever does a non-blocking `try_send`, so a slow or unavailable
//! sink degrades to dropped events, never a stalled `run`.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use maggma_core::{BuildEvent, ReporterError};
use maggma_store::{Document, Store};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::{info, warn};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};

/// A running Reporter: holds the `Sender` half Executors are given, and the background
/// task's handle for a clean shutdown.
#[derive(Debug)]
pub struct Reporter {
    sender: mpsc::Sender<BuildEvent>,
    task: JoinHandle<()>,
}

impl Reporter {
    /// Connect `sink` and spawn the consuming task. `channel_capacity` should be sized the
    /// same way the Executor's own event channel is -- generous enough that a momentary
    /// sink stall doesn't cause drops under normal load.
    pub async fn spawn(sink: Arc<dyn Store>, channel_capacity: usize) -> Result<Self, ReporterError> {
        Self::spawn_with_registry(sink, channel_capacity, Arc::new(Registry::new())).await
    }

    /// As [`Self::spawn`], but recording into a caller-supplied [`Registry`] instead of a
    /// private one.
    pub async fn spawn_with_registry(
        sink: Arc<dyn Store>,
        channel_capacity: usize,
        metric_registry: Arc<Registry>,
    ) -> Result<Self, ReporterError> {
        sink.connect().await.map_err(|err| ReporterError {
            message: format!("failed to connect reporter sink: {err}"),
        })?;

        let events: Metric<U64Counter> =
            metric_registry.register_metric("maggma_reporter_events", "build events handled by the reporter, split by outcome");
        let persisted = events.recorder(&[("result", "persisted")][..]);
        let dropped = events.recorder(&[("result", "dropped")][..]);

        let (sender, receiver) = mpsc::channel(channel_capacity.max(1));
        let task = tokio::spawn(run(sink, receiver, persisted, dropped));
        Ok(Self { sender, task })
    }

    /// A clone-able, non-blocking sender: the Executor's `events` argument.
    pub fn sender(&self) -> mpsc::Sender<BuildEvent> {
        self.sender.clone()
    }

    /// Drop the sender (so the task's `recv` loop drains and exits) and wait for it to
    /// finish flushing whatever was already queued.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(err) = self.task.await {
            warn!(%err, "reporter task panicked");
        }
    }
}

async fn run(sink: Arc<dyn Store>, mut receiver: mpsc::Receiver<BuildEvent>, persisted: U64Counter, dropped: U64Counter) {
    while let Some(event) = receiver.recv().await {
        match to_document(&event, sink.key_field(), sink.last_updated_field()) {
            Ok(doc) => {
                if let Err(err) = sink.update(vec![doc], &[]).await {
                    warn!(%err, builder = %event.builder_name, "reporter failed to persist a build event");
                    dropped.inc();
                } else {
                    persisted.inc();
                }
            }
            Err(err) => {
                warn!(%err, "reporter could not encode a build event as a document");
                dropped.inc();
            }
        }
    }
    info!(persisted = persisted.fetch(), dropped = dropped.fetch(), "reporter task exiting");
}

/// Turn one event into a sink document: the whole event, serialized, plus the sink's own
/// key and last-updated fields set so `update` can upsert it like any other document.
fn to_document(event: &BuildEvent, key_field: &str, last_updated_field: &str) -> Result<Document, ReporterError> {
    let value = serde_json::to_value(event).map_err(|err| ReporterError {
        message: err.to_string(),
    })?;
    let mut doc = value.as_object().cloned().ok_or_else(|| ReporterError {
        message: "BuildEvent did not serialize to a JSON object".to_string(),
    })?;
    let key = format!("{}:{}:{}", event.build_id, event.machine_id, event.sequence);
    doc.insert(key_field.to_string(), serde_json::Value::String(key));
    doc.insert(
        last_updated_field.to_string(),
        serde_json::Value::String(event.at.to_rfc3339()),
    );
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maggma_core::BuildEventPayload;
    use maggma_store::{all, InMemoryStore};
    use maggma_time::Time;
    use uuid::Uuid;

    #[tokio::test]
    async fn persists_every_event_sent_to_the_sender() {
        let sink: Arc<dyn Store> = Arc::new(InMemoryStore::new("events", "_id"));
        let reporter = Reporter::spawn(Arc::clone(&sink), 16).await.unwrap();
        let sender = reporter.sender();

        for seq in 0..3u64 {
            sender
                .send(BuildEvent {
                    builder_name: "doubling".to_string(),
                    build_id: Uuid::nil(),
                    machine_id: "host-1".to_string(),
                    at: Time::epoch(),
                    sequence: seq,
                    payload: BuildEventPayload::Update { count: 1 },
                })
                .await
                .unwrap();
        }

        reporter.shutdown().await;

        let count = sink.count(&all()).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn persisted_documents_carry_the_sinks_own_key_and_timestamp_fields() {
        let sink: Arc<dyn Store> = Arc::new(InMemoryStore::new("events", "_id"));
        let reporter = Reporter::spawn(Arc::clone(&sink), 4).await.unwrap();
        let sender = reporter.sender();

        sender
            .send(BuildEvent {
                builder_name: "doubling".to_string(),
                build_id: Uuid::nil(),
                machine_id: "host-1".to_string(),
                at: Time::epoch(),
                sequence: 0,
                payload: BuildEventPayload::Started {
                    sources: vec!["source".to_string()],
                    targets: vec!["target".to_string()],
                    total: Some(9),
                },
            })
            .await
            .unwrap();

        reporter.shutdown().await;

        let doc = sink.query_one(&all()).await.unwrap().unwrap();
        assert_eq!(doc["_id"], serde_json::json!(format!("{}:host-1:0", Uuid::nil())));
        assert_eq!(doc["event"], serde_json::json!("STARTED"));
        assert_eq!(doc["total"], serde_json::json!(9));
    }

    #[tokio::test]
    async fn counts_persisted_and_dropped_events_in_the_given_registry() {
        let sink: Arc<dyn Store> = Arc::new(InMemoryStore::new("events", "_id"));
        let metric_registry = Arc::new(metric::Registry::new());
        let reporter = Reporter::spawn_with_registry(Arc::clone(&sink), 4, Arc::clone(&metric_registry))
            .await
            .unwrap();
        let sender = reporter.sender();

        sender
            .send(BuildEvent {
                builder_name: "doubling".to_string(),
                build_id: Uuid::nil(),
                machine_id: "host-1".to_string(),
                at: Time::epoch(),
                sequence: 0,
                payload: BuildEventPayload::Update { count: 1 },
            })
            .await
            .unwrap();

        reporter.shutdown().await;

        let events: Metric<U64Counter> = metric_registry.get_instrument("maggma_reporter_events").unwrap();
        let persisted = metric::Attributes::from([("result", "persisted")]);
        assert_eq!(events.get_observer(&persisted).unwrap().fetch(), 1);
    }
}
