//! The producer and worker-pool halves of the pipeline. The consumer half lives directly in
//! [`crate::Executor::run`], since it is the same task that owns the Builder's write half.

use futures::stream::{BoxStream, StreamExt};
use maggma_core::{Builder, BuilderError, ItemError, ProcessedItem, WorkItem};
use observability_deps::tracing::{debug_span, error};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::set_fatal;

/// Drain `stream` into `item_tx`, stopping early on cancellation or a fatal [`BuilderError`]
/// from the stream itself. Closing `item_tx` (by returning) is how downstream workers learn
/// there is no more work.
pub(crate) async fn run_producer(
    mut stream: BoxStream<'static, Result<WorkItem, BuilderError>>,
    item_tx: mpsc::Sender<WorkItem>,
    fatal: Arc<Mutex<Option<BuilderError>>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = stream.next() => item,
        };
        let Some(item) = next else { break };
        match item {
            Ok(item) => {
                if item_tx.send(item).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                error!(%err, "get_items failed, cancelling run");
                set_fatal(&fatal, err).await;
                cancel.cancel();
                break;
            }
        }
    }
}

/// One pool worker: pulls items off the shared receiver, runs `process_item` on a blocking
/// thread (so a slow or CPU-heavy transform cannot stall the async runtime), and forwards the
/// outcome to the consumer. A per-item timeout races the blocking call; on expiry the worker
/// moves on and the blocking task is left to finish in the background, its result dropped --
/// Rust has no way to forcibly cancel a running OS thread, so detaching is the best available
/// approximation of cancellation.
pub(crate) async fn run_worker(
    item_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    result_tx: mpsc::Sender<Result<ProcessedItem, ItemError>>,
    builder: Arc<tokio::sync::RwLock<Box<dyn Builder>>>,
    timeout: Option<std::time::Duration>,
) {
    loop {
        let item = {
            let mut rx = item_rx.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        let blocking_builder = Arc::clone(&builder);
        let handle = tokio::task::spawn_blocking(move || {
            let _span = debug_span!("process_item").entered();
            blocking_builder.blocking_read().process_item(item)
        });

        let outcome = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    Err(ItemError::failed(format!("process_item panicked: {join_err}")))
                }
                Err(_elapsed) => Err(ItemError::timeout(deadline)),
            },
            None => match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    Err(ItemError::failed(format!("process_item panicked: {join_err}")))
                }
            },
        };

        if result_tx.send(outcome).await.is_err() {
            break;
        }
    }
}
