//! The Builder contract, `BuildEvent`, the tagged-union description registry, and the
//! error taxonomy shared by the executor, template builders, and distributed coordinator.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod builder;
pub mod error;
pub mod event;
pub mod registry;

pub use builder::{Builder, Chunk, ProcessedItem, WorkItem};
pub use error::{BuilderError, ItemError, ItemErrorKind, ReporterError};
pub use event::{machine_id, BuildEvent, BuildEventPayload};
pub use registry::{BuilderConstructor, BuilderRegistry};
