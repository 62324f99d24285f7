//! The message bus abstraction the Distributed Coordinator speaks over: [`MessageBus`], with
//! an in-process dialect ([`LocalBus`]) and a TCP socket dialect ([`TcpBus`]).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod core;
mod error;
mod local;
mod tcp;

pub use crate::core::{Envelope, MessageBus};
pub use error::{BusError, BusErrorKind};
pub use local::{LocalBus, LocalBusHub};
pub use tcp::TcpBus;
