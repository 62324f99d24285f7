//! The error taxonomy from the spec: per-item failures are contained and counted, everything
//! else is fatal to the current Builder's `run` and propagates to the Runner.

use snafu::Snafu;
use std::time::Duration;

/// Why a single `process_item` call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemErrorKind {
    /// `process_item` returned an error.
    Failed,
    /// The per-item deadline elapsed before `process_item` completed.
    Timeout,
}

/// A contained, per-item failure. Counted, logged at error level, and the offending item is
/// skipped (or marked failed, for template builders) -- it never aborts the pipeline.
#[derive(Debug, Clone)]
pub struct ItemError {
    /// Whether this was an outright failure or a timeout.
    pub kind: ItemErrorKind,
    /// A human-readable message, written into the target document's `error` field by
    /// template builders.
    pub message: String,
}

impl ItemError {
    /// Construct a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: ItemErrorKind::Failed,
            message: message.into(),
        }
    }

    /// Construct a timeout error for a deadline of `after`.
    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ItemErrorKind::Timeout,
            message: format!("process_item exceeded its {after:?} deadline"),
        }
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ItemError {}

/// Errors that terminate the current Builder's `run` and propagate to the Runner. ItemError
/// is deliberately not a variant here: it never escapes the Executor.
#[derive(Debug, Snafu)]
pub enum BuilderError {
    /// `get_items` failed -- an I/O or validation failure reading the source.
    #[snafu(display("source error in {builder}: {source}"))]
    Source {
        /// The failing Builder's name.
        builder: String,
        /// The underlying Store error.
        source: maggma_store::StoreError,
    },

    /// `update_targets` failed -- an I/O failure writing the target(s). The offending batch
    /// should already have been logged in full by the caller before this is constructed.
    #[snafu(display("sink error in {builder}: {source}"))]
    Sink {
        /// The failing Builder's name.
        builder: String,
        /// The underlying Store error.
        source: maggma_store::StoreError,
    },

    /// A serialized Builder/Store description was malformed, named an unregistered tag, or
    /// supplied an incompatible chunk override map.
    #[snafu(display("config error: {message}"))]
    Config {
        /// What was wrong.
        message: String,
    },

    /// The message bus transport failed. In Manager mode this is retried up to a budget
    /// before becoming fatal; in Worker mode it aborts the current chunk only.
    #[snafu(display("bus error: {message}"))]
    Bus {
        /// What went wrong at the transport layer.
        message: String,
    },
}

/// Reporter failures are logged and never fatal -- there is deliberately no `From` impl
/// wiring this into [`BuilderError`].
#[derive(Debug, Clone)]
pub struct ReporterError {
    /// What went wrong writing the event to the sink Store.
    pub message: String,
}

impl std::fmt::Display for ReporterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reporter error: {}", self.message)
    }
}

impl std::error::Error for ReporterError {}
