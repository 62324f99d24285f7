//! The summary [`Executor::run`](crate::Executor::run) returns once a Builder's `run` is
//! complete.

use std::time::Duration;

/// Aggregate statistics for one Executor-driven `run`. Mirrors the `ENDED` event's payload,
/// since the caller that invoked [`crate::Executor::run`] directly usually wants the numbers
/// without having to also subscribe to the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOutcome {
    /// Number of items that ended in [`maggma_core::ItemError`].
    pub errors: usize,
    /// Number of non-fatal warnings logged during the run. Currently always zero; reserved
    /// for surfacing soft failures (e.g. a skipped orphan deletion) without aborting the run.
    pub warnings: usize,
    /// Wall-clock duration of the whole run, from `connect` through `finalize`.
    pub duration: Duration,
}
