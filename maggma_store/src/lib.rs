//! The Store capability surface: a uniform, document-oriented access trait plus two
//! reference adapters (in-memory, file-backed NDJSON). Concrete production adapters
//! (document databases, object stores, compound/aliasing wrappers) are out of scope here;
//! this crate only defines the capability contract everything else in the workspace
//! depends on.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod document;
pub mod error;
pub mod file;
pub mod filter;
pub mod memory;
pub mod store;

pub use document::Document;
pub use error::StoreError;
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{all, Criteria, DocumentStream, QueryOptions, SortDirection, SortField, Store};
