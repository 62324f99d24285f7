//! The Builder contract: the three-phase transformation interface the Executor drives.

use crate::error::{BuilderError, ItemError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::{fmt::Debug, time::Duration};

/// The opaque value produced by [`Builder::get_items`] and consumed by
/// [`Builder::process_item`]. No framework interpretation is imposed beyond being a
/// self-describing value, so it can cross worker-thread and (in distributed mode)
/// process boundaries uniformly.
pub type WorkItem = Value;

/// The value produced by [`Builder::process_item`] and batched into
/// [`Builder::update_targets`]. Template builders in `maggma_builders` impose a stricter
/// shape on top of this.
pub type ProcessedItem = Value;

/// A partial-work directive produced by [`Builder::prechunk`]: a map of attribute
/// overrides that, when applied to a freshly constructed Builder instance, restricts its
/// `get_items` to a disjoint subset of the total work. Disjointness across the `n` chunks
/// `prechunk` returns is the Builder implementation's responsibility.
pub type Chunk = Map<String, Value>;

/// A transformation unit with three phases (extract / transform / load) run over one or
/// more source and target Stores. See the module-level docs for the full lifecycle.
#[async_trait]
pub trait Builder: Debug + Send + Sync {
    /// A stable, human-readable name used in logs, [`crate::event::BuildEvent`], and the
    /// serialized-description registry.
    fn name(&self) -> &str;

    /// Open every attached Store. Must be idempotent: calling `connect` twice is a no-op
    /// the second time, not an error.
    async fn connect(&mut self) -> Result<(), BuilderError>;

    /// Compute `n` attribute-override chunks whose union covers the full intended work
    /// set. Returning `None` (the default) marks this Builder non-distributable; the
    /// Distributed Coordinator then falls back to running it as a single chunk.
    fn prechunk(&self, _n: usize) -> Option<Vec<Chunk>> {
        None
    }

    /// A lazy, finite sequence of [`WorkItem`]s. May perform I/O. Must be safe to consume
    /// exactly once per `run`.
    ///
    /// Returns an owned (`'static`) stream rather than one borrowing `self`: the Executor
    /// needs to drain it from a producer task while concurrently calling [`Self::process_item`]
    /// through a shared reference, which an `&mut self`-borrowing stream would make
    /// impossible to express safely. Implementations that need Store access should clone
    /// their `Arc<dyn Store>` handles into the returned stream rather than borrowing `self`.
    fn get_items(&mut self) -> BoxStream<'static, Result<WorkItem, BuilderError>>;

    /// Transform one item. Pure: no I/O, deterministic given its input, so that the
    /// Executor can safely retry or time it out. A domain error is returned as
    /// [`ItemError`], not raised through [`BuilderError`] -- it is counted and logged, and
    /// the pipeline continues.
    fn process_item(&self, item: WorkItem) -> Result<ProcessedItem, ItemError>;

    /// Write a batch of up to `chunk_size` processed items. May perform I/O. Should be
    /// idempotent with respect to the key(s) of each output document, so that re-queueing
    /// a chunk after a presumed-dead distributed Worker is always safe.
    async fn update_targets(&mut self, batch: Vec<ProcessedItem>) -> Result<(), BuilderError>;

    /// Invoked once after the last `update_targets` call of a `run`. Typical uses: index
    /// tune-down, summary writes. Default is a no-op.
    async fn finalize(&mut self) -> Result<(), BuilderError> {
        Ok(())
    }

    /// The total number of items this Builder expects to produce, if it can compute one
    /// cheaply (e.g. from a `count` query). Used only as the `STARTED` event's `total`
    /// hint; `None` means unknown.
    fn total(&self) -> Option<u64> {
        None
    }

    /// Names of the source Stores this Builder reads from, for the `STARTED` event.
    fn source_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of the target Stores this Builder writes to, for the `STARTED` event.
    fn target_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// A per-item deadline for `process_item`, or `None` for no timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// How many [`ProcessedItem`]s `update_targets` should receive per call.
    fn chunk_size(&self) -> usize {
        1000
    }
}
