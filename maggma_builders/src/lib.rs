//! Execution templates built on top of [`maggma_core::Builder`]: [`MapBuilder`] (1:1) and
//! [`GroupBuilder`] (n:1). Both handle incremental selection, per-item/per-group error
//! containment, and output-document shaping, leaving only the transform itself to the
//! caller.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod group;
mod map;
mod output;

pub use group::{GroupBuilder, GroupBuilderOptions, NaryFunction};
pub use map::{MapBuilder, MapBuilderOptions, UnaryFunction};
