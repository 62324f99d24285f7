//! The Store capability trait: a uniform, document-oriented access surface that every
//! concrete adapter (in-memory, on-disk, document DB, object store, compound wrapper, ...)
//! implements. Concrete adapters beyond the two reference ones in this crate are out of
//! scope here; core only ever depends on this trait.

use crate::{document::Document, error::Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use maggma_time::Time;
use serde_json::{Map, Value};
use std::fmt::Debug;

/// A simple equality-based filter: a document matches if, for every `(field, value)` pair
/// in the criteria, `document[field] == value`. This is the "self-describing nested map"
/// criteria contract the spec calls for, kept intentionally small -- a full query language
/// is explicitly out of scope (the spec treats concrete adapters, which is where a richer
/// query DSL would live, as external collaborators).
pub type Criteria = Map<String, Value>;

/// Build an empty [`Criteria`] matching every document.
pub fn all() -> Criteria {
    Criteria::new()
}

/// Sort direction for a `query`'s `sort` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order.
    Ascending,
    /// Descending order.
    Descending,
}

/// One field to sort by, and in which direction.
#[derive(Debug, Clone)]
pub struct SortField {
    /// The field name.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Arguments to [`Store::query`], gathered into one struct so call sites read as a single
/// intention rather than five positional arguments.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Field selection; `None` means "all fields". Implementations always include the
    /// Store's key and last-updated fields even if the caller omits them, per the
    /// `projection` contract in the spec.
    pub projection: Option<Vec<String>>,
    /// Sort order; empty means unspecified (implementation-defined, typically natural
    /// storage order).
    pub sort: Vec<SortField>,
    /// Number of matching documents to skip before the first returned document.
    pub skip: usize,
    /// Maximum number of documents to return; `None` means unbounded.
    pub limit: Option<usize>,
}

/// A lazy, finite, non-restartable sequence of documents produced by [`Store::query`].
pub type DocumentStream<'a> = BoxStream<'a, Result<Document>>;

/// The Store capability set every source, target, and auxiliary Store implements.
///
/// A Store is a named handle onto a collection of documents. Within one Store, `key` is
/// unique; every document either carries a last-updated timestamp or is treated as older
/// than any timestamped document (the epoch sentinel, see [`maggma_time::Time::epoch`]).
#[async_trait]
pub trait Store: Debug + Send + Sync {
    /// A human-readable name, used in logging and [`crate::Store::last_updated`] diagnostics.
    fn name(&self) -> &str;

    /// The field name that uniquely identifies a document within this Store.
    fn key_field(&self) -> &str;

    /// The field name holding a document's last-updated timestamp.
    fn last_updated_field(&self) -> &str;

    /// Open the underlying connection. Idempotent: calling `connect` on an
    /// already-connected Store is a no-op, not an error.
    async fn connect(&self) -> Result<()>;

    /// Release the underlying connection. Called on every exit path, including after a
    /// fatal error, so resources never leak past one `Builder::run`.
    async fn close(&self) -> Result<()>;

    /// A lazy, finite, non-restartable sequence of documents matching `criteria`.
    fn query<'a>(&'a self, criteria: &Criteria, options: &QueryOptions) -> DocumentStream<'a>;

    /// The first document matching `criteria`, or `None`.
    async fn query_one(&self, criteria: &Criteria) -> Result<Option<Document>>;

    /// The exact count of documents matching `criteria`.
    async fn count(&self, criteria: &Criteria) -> Result<usize>;

    /// The set of distinct scalar values of `field` among documents matching `criteria`.
    async fn distinct(&self, field: &str, criteria: &Criteria) -> Result<Vec<Value>>;

    /// Group documents by the tuple of values in `fields`, returning each group's key
    /// tuple alongside its members.
    async fn groupby(
        &self,
        fields: &[String],
        criteria: &Criteria,
    ) -> Result<Vec<(Vec<Value>, Vec<Document>)>>;

    /// Upsert `docs`, keyed by `key_fields` (or this Store's own key field if empty).
    /// Idempotent on the composite key: writing the same key twice leaves one document.
    async fn update(&self, docs: Vec<Document>, key_fields: &[String]) -> Result<()>;

    /// Delete every document matching `criteria`.
    async fn remove_docs(&self, criteria: &Criteria) -> Result<()>;

    /// Idempotently ensure an index exists on `field`.
    async fn ensure_index(&self, field: &str, unique: bool) -> Result<()>;

    /// The maximum last-updated timestamp across all documents, or [`maggma_time::Time::epoch`]
    /// if the Store is empty.
    async fn last_updated(&self) -> Result<Time>;

    /// The set of keys that are newer in `self` than in `other`.
    ///
    /// When `exhaustive` is `false`, this uses the max-timestamp shortcut: every key in
    /// `self` whose last-updated exceeds `other.last_updated()`. When `true`, it compares
    /// per key and is therefore a superset-safe subset of the shortcut's result.
    async fn newer_in(
        &self,
        other: &(dyn Store + Send + Sync),
        criteria: &Criteria,
        exhaustive: bool,
    ) -> Result<Vec<String>>;
}
