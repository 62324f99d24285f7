//! Observability ecosystem dependencies for maggma, to ensure consistent versions and unified
//! updates.
//!
//! Other crates should depend on `tracing` via this crate rather than pulling it in directly, so
//! that the whole workspace moves to a new `tracing` release in one place.

pub use tracing;
