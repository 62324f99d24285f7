//! [`BusError`]: a boxed, kind-tagged error type shared by every bus dialect, so the
//! Distributed Coordinator can decide what's retryable without matching on a dialect-specific
//! error enum.

use std::fmt::{Display, Formatter};

/// Generic boxed error type used across bus dialects. The dynamic boxing makes it easy to
/// wrap whatever the underlying transport (a `TcpStream`, an in-process channel) returns
/// without inventing a new error enum per dialect.
#[derive(Debug)]
pub struct BusError {
    inner: Box<dyn std::error::Error + Sync + Send>,
    kind: BusErrorKind,
}

impl BusError {
    /// Construct an error of the given `kind` wrapping `e`.
    pub fn new(kind: BusErrorKind, e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self {
            inner: e.into(),
            kind,
        }
    }

    /// The peer named in a `send`/addressed call is not currently connected.
    pub fn disconnected(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(BusErrorKind::Disconnected, e)
    }

    /// A payload failed to serialize or deserialize crossing the wire.
    pub fn serialization(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(BusErrorKind::Serialization, e)
    }

    /// Transport-level I/O failure (connection reset, bind failure, ...).
    pub fn io(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(BusErrorKind::Io, e)
    }

    /// Returns the kind of error this was.
    pub fn kind(&self) -> BusErrorKind {
        self.kind
    }
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "bus error ({:?}): {}", self.kind, self.inner)
    }
}

impl std::error::Error for BusError {}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e)
    }
}

/// What kind of failure occurred at the bus layer. The Distributed Coordinator uses this to
/// decide whether to retry (e.g. [`BusErrorKind::Io`] up to a retry budget) or treat it as
/// fatal (e.g. [`BusErrorKind::Serialization`], which indicates a protocol mismatch, not a
/// transient condition).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusErrorKind {
    /// The named peer is not (or no longer) connected.
    Disconnected,
    /// A message failed to serialize or deserialize.
    Serialization,
    /// A transport-level I/O failure.
    Io,
    /// The bus was closed locally.
    Closed,
}
