//! [`MapBuilder`]: the 1:1 execution template -- incremental selection, a per-item user
//! function, idempotent upsert output, and optional orphan deletion.

use crate::output::build_output;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use maggma_core::{
    error::{SinkSnafu, SourceSnafu},
    Builder, BuilderError, ItemError, ProcessedItem, WorkItem,
};
use maggma_store::{
    document::get_key_str,
    store::{Criteria, QueryOptions},
    Store,
};
use maggma_time::{SystemProvider, TimeProvider};
use snafu::ResultExt;
use std::{
    collections::HashSet,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// The per-item transform a [`MapBuilder`] runs. Domain errors are caught here, not
/// propagated as [`BuilderError`]: [`MapBuilder::process_item`] always returns `Ok`, turning
/// an `Err` into a `{"state": "failed"}` document so the item still reaches `update_targets`
/// (see the state machine in the spec's template-builder section).
pub type UnaryFunction = Arc<dyn Fn(WorkItem) -> Result<ProcessedItem, ItemError> + Send + Sync>;

/// The options table from the spec's MapBuilder section.
#[derive(Clone)]
pub struct MapBuilderOptions {
    /// Source fields to fetch; the key and last-updated fields are always included on top
    /// of whatever is listed here (enforced by every [`Store::query`] implementation).
    pub projection: Option<Vec<String>>,
    /// Delete target documents whose key is absent from the source, after the final batch.
    pub delete_orphans: bool,
    /// Per-item deadline; `None` for no timeout.
    pub timeout: Option<Duration>,
    /// Embed `process_item`'s wall-clock duration in the output document.
    pub store_process_time: bool,
    /// Re-include items previously written with `state: "failed"`.
    pub retry_failed: bool,
    /// Additional source criteria applied to every selection.
    pub query: Criteria,
    /// Items per `update_targets` batch.
    pub chunk_size: usize,
}

impl Default for MapBuilderOptions {
    fn default() -> Self {
        Self {
            projection: None,
            delete_orphans: false,
            timeout: None,
            store_process_time: false,
            retry_failed: false,
            query: Criteria::new(),
            chunk_size: 1000,
        }
    }
}

/// A 1:1 transform from one source Store to one target Store.
///
/// `get_items` yields every source document that is new, newer than its target counterpart
/// (per [`Store::newer_in`]'s shortcut comparison), or previously failed with
/// `retry_failed` set. `process_item` runs `unary_function` and always produces a document --
/// on a domain error that document is `{key, last_updated_field, _bt, error, state:
/// "failed"}` rather than being dropped, so a failed item still reaches `WRITTEN`. A hard
/// Executor-level timeout is the one terminal state that does *not* reach `WRITTEN`: by the
/// time the Executor gives up on a detached `process_item` call, there is no result to shape
/// into a document, only a contained, counted [`maggma_core::ItemErrorKind::Timeout`].
pub struct MapBuilder {
    name: String,
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    unary_function: UnaryFunction,
    options: MapBuilderOptions,
    build_tag: String,
    time_provider: Arc<dyn TimeProvider>,
}

impl MapBuilder {
    /// Construct a MapBuilder named `name`, running `unary_function` over every selected
    /// source document.
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn Store>,
        target: Arc<dyn Store>,
        unary_function: impl Fn(WorkItem) -> Result<ProcessedItem, ItemError> + Send + Sync + 'static,
        options: MapBuilderOptions,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            unary_function: Arc::new(unary_function),
            options,
            build_tag: "1".to_string(),
            time_provider: Arc::new(SystemProvider::new()),
        }
    }

    /// Override the build-version tag embedded in every output document's `_bt` field.
    pub fn with_build_tag(mut self, build_tag: impl Into<String>) -> Self {
        self.build_tag = build_tag.into();
        self
    }

    /// Inject a [`TimeProvider`], for deterministic `last_updated` values in tests.
    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }
}

impl fmt::Debug for MapBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapBuilder")
            .field("name", &self.name)
            .field("source", &self.source.name())
            .field("target", &self.target.name())
            .field("delete_orphans", &self.options.delete_orphans)
            .field("retry_failed", &self.options.retry_failed)
            .finish()
    }
}

#[async_trait]
impl Builder for MapBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<(), BuilderError> {
        self.source.connect().await.context(SourceSnafu {
            builder: self.name.clone(),
        })?;
        self.target.connect().await.context(SinkSnafu {
            builder: self.name.clone(),
        })?;
        Ok(())
    }

    fn get_items(&mut self) -> BoxStream<'static, Result<WorkItem, BuilderError>> {
        let builder_name = self.name.clone();
        let source = Arc::clone(&self.source);
        let target = Arc::clone(&self.target);
        let query = self.options.query.clone();
        let projection = self.options.projection.clone();
        let retry_failed = self.options.retry_failed;
        let key_field = source.key_field().to_string();

        let stream = try_stream! {
            let newer = source
                .newer_in(target.as_ref(), &query, false)
                .await
                .context(SourceSnafu { builder: builder_name.clone() })?
                .into_iter()
                .collect::<HashSet<_>>();

            let mut target_keys = HashSet::new();
            let target_key_projection = QueryOptions {
                projection: Some(vec![key_field.clone()]),
                ..Default::default()
            };
            let mut target_scan = target.query(&Criteria::new(), &target_key_projection);
            while let Some(doc) = target_scan.next().await {
                let doc = doc.context(SinkSnafu { builder: builder_name.clone() })?;
                if let Some(key) = get_key_str(&doc, &key_field) {
                    target_keys.insert(key);
                }
            }

            let mut retryable = HashSet::new();
            if retry_failed {
                let mut failed_criteria = Criteria::new();
                failed_criteria.insert("state".to_string(), serde_json::json!("failed"));
                let mut failed_scan = target.query(&failed_criteria, &target_key_projection);
                while let Some(doc) = failed_scan.next().await {
                    let doc = doc.context(SinkSnafu { builder: builder_name.clone() })?;
                    if let Some(key) = get_key_str(&doc, &key_field) {
                        retryable.insert(key);
                    }
                }
            }

            let options = QueryOptions {
                projection,
                ..Default::default()
            };
            let mut source_scan = source.query(&query, &options);
            while let Some(doc) = source_scan.next().await {
                let doc = doc.context(SourceSnafu { builder: builder_name.clone() })?;
                let Some(key) = get_key_str(&doc, &key_field) else { continue };
                let selected = !target_keys.contains(&key)
                    || newer.contains(&key)
                    || (retry_failed && retryable.contains(&key));
                if selected {
                    yield serde_json::Value::Object(doc);
                }
            }
        };

        Box::pin(stream)
    }

    fn process_item(&self, item: WorkItem) -> Result<ProcessedItem, ItemError> {
        let key_value = item
            .get(self.source.key_field())
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let start = self.options.store_process_time.then(Instant::now);
        let outcome = (self.unary_function)(item);
        Ok(build_output(
            self.target.key_field(),
            key_value,
            self.target.last_updated_field(),
            self.time_provider.now(),
            &self.build_tag,
            outcome,
            start.map(|s| s.elapsed()),
        ))
    }

    async fn update_targets(&mut self, batch: Vec<ProcessedItem>) -> Result<(), BuilderError> {
        let docs = batch
            .into_iter()
            .filter_map(|item| item.as_object().cloned())
            .collect();
        self.target
            .update(docs, &[])
            .await
            .context(SinkSnafu {
                builder: self.name.clone(),
            })
    }

    async fn finalize(&mut self) -> Result<(), BuilderError> {
        if !self.options.delete_orphans {
            return Ok(());
        }

        let key_field = self.source.key_field().to_string();
        let source_keys: HashSet<String> = self
            .source
            .distinct(&key_field, &self.options.query)
            .await
            .context(SourceSnafu {
                builder: self.name.clone(),
            })?
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        let options = QueryOptions {
            projection: Some(vec![key_field.clone()]),
            ..Default::default()
        };
        let mut orphans = Vec::new();
        {
            let mut scan = self.target.query(&self.options.query, &options);
            while let Some(doc) = scan.next().await {
                let doc = doc.context(SinkSnafu {
                    builder: self.name.clone(),
                })?;
                if let Some(raw) = doc.get(&key_field).cloned() {
                    if let Some(key) = get_key_str(&doc, &key_field) {
                        if !source_keys.contains(&key) {
                            orphans.push(raw);
                        }
                    }
                }
            }
        }

        for orphan_key in orphans {
            let mut criteria = Criteria::new();
            criteria.insert(key_field.clone(), orphan_key);
            self.target.remove_docs(&criteria).await.context(SinkSnafu {
                builder: self.name.clone(),
            })?;
        }

        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.options.timeout
    }

    fn chunk_size(&self) -> usize {
        self.options.chunk_size
    }

    fn source_names(&self) -> Vec<String> {
        vec![self.source.name().to_string()]
    }

    fn target_names(&self) -> Vec<String> {
        vec![self.target.name().to_string()]
    }
}
