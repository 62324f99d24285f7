//! Errors raised by Store capability implementations.

use snafu::Snafu;

/// Errors a [`crate::Store`] implementation may raise. These are the `SourceError`/`SinkError`
/// causes from the core error taxonomy -- the Store layer itself doesn't classify fatal vs.
/// item-level, that's the Builder/Executor's job.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The underlying connection could not be (re-)established.
    #[snafu(display("failed to connect to store {name}: {source}"))]
    Connect {
        /// The Store's name, for diagnostics.
        name: String,
        /// The underlying I/O or driver error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A query, count, or distinct operation failed.
    #[snafu(display("query against store {name} failed: {source}"))]
    Query {
        /// The Store's name, for diagnostics.
        name: String,
        /// The underlying I/O or driver error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An update (upsert) or remove operation failed.
    #[snafu(display("write to store {name} failed: {source}"))]
    Write {
        /// The Store's name, for diagnostics.
        name: String,
        /// The underlying I/O or driver error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The document being written is missing its designated key field.
    #[snafu(display("document is missing key field {key_field:?}"))]
    MissingKey {
        /// The configured key field name.
        key_field: String,
    },
}

/// A specialized `Result` for Store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
