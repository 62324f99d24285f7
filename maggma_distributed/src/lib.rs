//! The Manager/Worker coordinator: splits a single Builder's work into chunks with
//! `Builder::prechunk` and drives them across a pool of Workers over a
//! [`maggma_bus::MessageBus`], falling back to a single unchunked run when a Builder reports
//! it cannot be split.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod bus_retry;
mod manager;
mod protocol;
mod worker;

pub use manager::{run_manager, DistributedOutcome, ManagerConfig};
pub use protocol::{apply_chunk, high_water_mark, ControlMessage};
pub use worker::{run_worker, WorkerConfig};
