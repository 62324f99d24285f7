//! The single-process Executor: drives one [`maggma_core::Builder`] through `connect`,
//! `get_items`, `process_item`, `update_targets`, `finalize`, as a three-stage pipeline of a
//! producer, a bounded pool of workers, and a consumer.
//!
//! The producer and the consumer are single-owner tasks -- only they ever touch the Builder's
//! Stores, matching the spec's requirement that Stores are not required to be safe to share
//! across concurrent callers. `process_item` is required to be pure and side-effect free, so
//! the worker pool calls it through a shared [`tokio::sync::RwLock`] read guard with no such
//! restriction.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod outcome;
mod pipeline;

pub use outcome::ExecutorOutcome;

use maggma_core::{machine_id, Builder, BuildEvent, BuildEventPayload, BuilderError, ProcessedItem};
use maggma_time::{SystemProvider, Time, TimeProvider};
use metric::{DurationHistogram, Metric, Registry, U64Counter};
use observability_deps::tracing::{debug_span, info, warn, Instrument};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Drives one Builder's `run` to completion.
#[derive(Debug, Clone)]
pub struct Executor {
    num_workers: usize,
    time_provider: Arc<dyn TimeProvider>,
    metric_registry: Arc<Registry>,
    items: Metric<U64Counter>,
    run_duration: Metric<DurationHistogram>,
}

impl Executor {
    /// Create an Executor with `num_workers` pool workers. `num_workers` is clamped to at
    /// least 1: a value of 1 degenerates to a strictly serial pipeline, not a special case --
    /// the same producer/worker/consumer code path runs regardless of worker count.
    pub fn new(num_workers: usize) -> Self {
        Self::new_with_registry(num_workers, Arc::new(Registry::new()))
    }

    /// As [`Self::new`], but recording into a caller-supplied [`Registry`] instead of a
    /// private one -- so a Runner can expose this Executor's counters alongside everything
    /// else it reports.
    pub fn new_with_registry(num_workers: usize, metric_registry: Arc<Registry>) -> Self {
        Self::new_with_time_provider_and_registry(num_workers, Arc::new(SystemProvider::new()), metric_registry)
    }

    /// As [`Self::new`], but with an injected [`TimeProvider`] for deterministic event
    /// timestamps in tests.
    pub fn new_with_time_provider(num_workers: usize, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self::new_with_time_provider_and_registry(num_workers, time_provider, Arc::new(Registry::new()))
    }

    /// As [`Self::new_with_time_provider`] and [`Self::new_with_registry`] combined.
    pub fn new_with_time_provider_and_registry(
        num_workers: usize,
        time_provider: Arc<dyn TimeProvider>,
        metric_registry: Arc<Registry>,
    ) -> Self {
        let items = metric_registry
            .register_metric("maggma_executor_items", "items processed by the executor, split by builder and outcome");
        let run_duration = metric_registry
            .register_metric("maggma_executor_run_duration", "wall-clock duration of a complete executor run, split by builder");
        Self {
            num_workers: num_workers.max(1),
            time_provider,
            metric_registry,
            items,
            run_duration,
        }
    }

    /// The [`Registry`] this Executor's counters are recorded into.
    pub fn metric_registry(&self) -> &Arc<Registry> {
        &self.metric_registry
    }

    /// Run `builder` to completion. `build_id` is fixed for the whole run (the Runner
    /// generates one per Builder it drives, or the Distributed Manager supplies one shared
    /// across a chunked run). `events` is an optional, non-blocking sink for lifecycle
    /// events; if the receiver is gone or full enough to fail a bounded send, events are
    /// dropped and a warning is logged, never a fatal error. `cancel` lets a caller (or the
    /// Distributed Worker, on a heartbeat-driven re-queue) abort the run early; the run still
    /// flushes whatever has already reached the consumer before returning.
    pub async fn run(
        &self,
        builder: Box<dyn Builder>,
        build_id: Uuid,
        events: Option<mpsc::Sender<BuildEvent>>,
        cancel: CancellationToken,
    ) -> Result<ExecutorOutcome, BuilderError> {
        self.run_inner(builder, build_id, events, cancel, true).await
    }

    /// As [`Self::run`], but skips the `finalize()` call: a Distributed Worker runs one
    /// chunk of the total work, so only the Manager's own unchunked Builder instance has
    /// the full source/target view `finalize` (e.g. orphan deletion) needs.
    pub async fn run_chunk(
        &self,
        builder: Box<dyn Builder>,
        build_id: Uuid,
        events: Option<mpsc::Sender<BuildEvent>>,
        cancel: CancellationToken,
    ) -> Result<ExecutorOutcome, BuilderError> {
        self.run_inner(builder, build_id, events, cancel, false).await
    }

    async fn run_inner(
        &self,
        mut builder: Box<dyn Builder>,
        build_id: Uuid,
        events: Option<mpsc::Sender<BuildEvent>>,
        cancel: CancellationToken,
        call_finalize: bool,
    ) -> Result<ExecutorOutcome, BuilderError> {
        let started_at = Instant::now();
        let sequence = Arc::new(AtomicU64::new(0));
        let builder_name = builder.name().to_string();

        builder
            .connect()
            .instrument(debug_span!("connect", builder = %builder_name))
            .await?;

        let builder = Arc::new(RwLock::new(builder));

        {
            let guard = builder.read().await;
            self.emit(
                &events,
                &sequence,
                &builder_name,
                build_id,
                BuildEventPayload::Started {
                    sources: guard.source_names(),
                    targets: guard.target_names(),
                    total: guard.total(),
                },
            )
            .await;
        }

        let (timeout, chunk_size) = {
            let guard = builder.read().await;
            (guard.timeout(), guard.chunk_size().max(1))
        };

        let stream = {
            let mut guard = builder.write().await;
            let _span = debug_span!("get_items", builder = %builder_name).entered();
            guard.get_items()
        };

        let fatal: Arc<Mutex<Option<BuilderError>>> = Arc::new(Mutex::new(None));
        let (item_tx, item_rx) = mpsc::channel(2 * self.num_workers);
        let item_rx = Arc::new(Mutex::new(item_rx));
        let (result_tx, mut result_rx) = mpsc::channel(2 * self.num_workers);

        let producer = tokio::spawn(pipeline::run_producer(
            stream,
            item_tx,
            Arc::clone(&fatal),
            cancel.clone(),
        ));

        let mut workers = Vec::with_capacity(self.num_workers);
        for _ in 0..self.num_workers {
            workers.push(tokio::spawn(pipeline::run_worker(
                Arc::clone(&item_rx),
                result_tx.clone(),
                Arc::clone(&builder),
                timeout,
            )));
        }
        // Drop the Executor's own sender so `result_rx` closes once every worker's clone
        // does, rather than once every worker *and this function* have dropped theirs.
        drop(result_tx);

        let mut errors = 0usize;
        let mut batch: Vec<ProcessedItem> = Vec::with_capacity(chunk_size);

        while let Some(outcome) = result_rx.recv().await {
            match outcome {
                Ok(item) => {
                    batch.push(item);
                    if batch.len() >= chunk_size {
                        let to_write = std::mem::replace(&mut batch, Vec::with_capacity(chunk_size));
                        if !self
                            .write_batch(&builder, &builder_name, to_write, &events, &sequence, build_id, &fatal)
                            .await
                        {
                            cancel.cancel();
                            // Workers may still be mid-send on a full `result_tx`; keep
                            // draining (discarding outcomes) so `worker.await` below doesn't
                            // hang waiting on a channel nobody reads anymore.
                            while result_rx.recv().await.is_some() {}
                            break;
                        }
                    }
                }
                Err(_item_err) => {
                    errors += 1;
                    self.items.recorder(&[("builder", builder_name.as_str()), ("result", "error")][..]).inc();
                }
            }
        }

        if !batch.is_empty() {
            self.write_batch(&builder, &builder_name, batch, &events, &sequence, build_id, &fatal)
                .await;
        }

        if let Err(join_err) = producer.await {
            warn!(%join_err, "producer task panicked");
        }
        for worker in workers {
            if let Err(join_err) = worker.await {
                warn!(%join_err, "worker task panicked");
            }
        }

        if call_finalize {
            let span = debug_span!("finalize", builder = %builder_name);
            if let Err(err) = builder.write().await.finalize().instrument(span).await {
                set_fatal(&fatal, err).await;
            }
        }

        let duration = started_at.elapsed();
        self.run_duration.recorder(&[("builder", builder_name.as_str())][..]).record(duration);
        self.emit(
            &events,
            &sequence,
            &builder_name,
            build_id,
            BuildEventPayload::Ended {
                errors,
                warnings: 0,
                duration,
            },
        )
        .await;

        match fatal.lock().await.take() {
            Some(err) => Err(err),
            None => {
                info!(builder = %builder_name, %errors, ?duration, "run complete");
                Ok(ExecutorOutcome {
                    errors,
                    warnings: 0,
                    duration,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_batch(
        &self,
        builder: &Arc<RwLock<Box<dyn Builder>>>,
        builder_name: &str,
        batch: Vec<ProcessedItem>,
        events: &Option<mpsc::Sender<BuildEvent>>,
        sequence: &Arc<AtomicU64>,
        build_id: Uuid,
        fatal: &Arc<Mutex<Option<BuilderError>>>,
    ) -> bool {
        let count = batch.len();
        let span = debug_span!("update_targets", builder = builder_name, count);
        match builder.write().await.update_targets(batch).instrument(span).await {
            Ok(()) => {
                self.items.recorder(&[("builder", builder_name), ("result", "ok")][..]).add(count as u64);
                self.emit(
                    events,
                    sequence,
                    builder_name,
                    build_id,
                    BuildEventPayload::Update { count },
                )
                .await;
                true
            }
            Err(err) => {
                set_fatal(fatal, err).await;
                false
            }
        }
    }

    async fn emit(
        &self,
        events: &Option<mpsc::Sender<BuildEvent>>,
        sequence: &Arc<AtomicU64>,
        builder_name: &str,
        build_id: Uuid,
        payload: BuildEventPayload,
    ) {
        let Some(tx) = events else { return };
        let event = BuildEvent {
            builder_name: builder_name.to_string(),
            build_id,
            machine_id: machine_id().to_string(),
            at: self.current_time(),
            sequence: sequence.fetch_add(1, Ordering::Relaxed),
            payload,
        };
        if tx.try_send(event).is_err() {
            warn!("event channel full or closed, dropping a build event");
        }
    }

    fn current_time(&self) -> Time {
        self.time_provider.now()
    }
}

async fn set_fatal(fatal: &Mutex<Option<BuilderError>>, err: BuilderError) {
    let mut guard = fatal.lock().await;
    if guard.is_none() {
        *guard = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};
    use maggma_core::{ItemError, WorkItem};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug)]
    struct DoublingBuilder {
        items: Vec<i64>,
        written: Arc<TokioMutex<Vec<i64>>>,
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Builder for DoublingBuilder {
        fn name(&self) -> &str {
            "doubling"
        }

        async fn connect(&mut self) -> Result<(), BuilderError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_items(&mut self) -> BoxStream<'static, Result<WorkItem, BuilderError>> {
            let items = std::mem::take(&mut self.items);
            stream::iter(items.into_iter().map(|n| Ok(serde_json::json!({ "n": n }))))
                .boxed()
        }

        fn process_item(&self, item: WorkItem) -> Result<serde_json::Value, ItemError> {
            let n = item["n"].as_i64().ok_or_else(|| ItemError::failed("missing n"))?;
            Ok(serde_json::json!({ "n": n * 2 }))
        }

        async fn update_targets(&mut self, batch: Vec<serde_json::Value>) -> Result<(), BuilderError> {
            let mut written = self.written.lock().await;
            for item in batch {
                written.push(item["n"].as_i64().unwrap());
            }
            Ok(())
        }

        fn chunk_size(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn doubles_every_item_with_multiple_workers() {
        let written = Arc::new(TokioMutex::new(Vec::new()));
        let builder = DoublingBuilder {
            items: (1..=9).collect(),
            written: Arc::clone(&written),
            connects: Arc::new(AtomicUsize::new(0)),
        };

        let executor = Executor::new(4);
        let outcome = executor
            .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.errors, 0);
        let mut got = written.lock().await.clone();
        got.sort_unstable();
        assert_eq!(got, vec![2, 4, 6, 8, 10, 12, 14, 16, 18]);

        let items: Metric<U64Counter> = executor.metric_registry().get_instrument("maggma_executor_items").unwrap();
        let attrs = metric::Attributes::from([("builder", "doubling"), ("result", "ok")]);
        assert_eq!(items.get_observer(&attrs).unwrap().fetch(), 9);
    }

    #[tokio::test]
    async fn single_worker_is_a_serial_degenerate_case() {
        let written = Arc::new(TokioMutex::new(Vec::new()));
        let builder = DoublingBuilder {
            items: vec![1, 2, 3],
            written: Arc::clone(&written),
            connects: Arc::new(AtomicUsize::new(0)),
        };

        let executor = Executor::new(1);
        let outcome = executor
            .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.errors, 0);
        let mut got = written.lock().await.clone();
        got.sort_unstable();
        assert_eq!(got, vec![2, 4, 6]);
    }

    #[derive(Debug)]
    struct FailingItemsBuilder;

    #[async_trait]
    impl Builder for FailingItemsBuilder {
        fn name(&self) -> &str {
            "failing_items"
        }

        async fn connect(&mut self) -> Result<(), BuilderError> {
            Ok(())
        }

        fn get_items(&mut self) -> BoxStream<'static, Result<WorkItem, BuilderError>> {
            stream::iter(vec![
                Ok(serde_json::json!({ "n": 1 })),
                Ok(serde_json::json!({ "bad": true })),
                Ok(serde_json::json!({ "n": 2 })),
            ])
            .boxed()
        }

        fn process_item(&self, item: WorkItem) -> Result<serde_json::Value, ItemError> {
            let n = item
                .get("n")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| ItemError::failed("missing n"))?;
            Ok(serde_json::json!({ "n": n }))
        }

        async fn update_targets(&mut self, _batch: Vec<serde_json::Value>) -> Result<(), BuilderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn item_errors_are_counted_not_fatal() {
        let executor = Executor::new(2);
        let outcome = executor
            .run(
                Box::new(FailingItemsBuilder),
                Uuid::nil(),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.errors, 1);

        let items: Metric<U64Counter> = executor.metric_registry().get_instrument("maggma_executor_items").unwrap();
        let attrs = metric::Attributes::from([("builder", "failing_items"), ("result", "error")]);
        assert_eq!(items.get_observer(&attrs).unwrap().fetch(), 1);
    }
}
