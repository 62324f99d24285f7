//! [`GroupBuilder`]: the n:1 execution template -- items are keyed by a tuple of grouping
//! fields rather than the source's own key, and `nary_function` sees every member of a
//! group at once.

use crate::output::build_group_output;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use maggma_core::{
    error::{SinkSnafu, SourceSnafu},
    Builder, BuilderError, ItemError, ProcessedItem, WorkItem,
};
use maggma_store::{
    document::get_last_updated,
    store::{Criteria, QueryOptions},
    Store,
};
use maggma_time::{SystemProvider, TimeProvider};
use serde_json::Value;
use snafu::ResultExt;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// The per-group transform a [`GroupBuilder`] runs: the grouping key tuple (in
/// `grouping_properties` order) alongside every source document sharing it. Domain errors
/// are caught the same way as [`crate::map::UnaryFunction`]'s.
pub type NaryFunction =
    Arc<dyn Fn(Vec<Value>, Vec<WorkItem>) -> Result<ProcessedItem, ItemError> + Send + Sync>;

/// The options table from the spec's GroupBuilder section.
#[derive(Clone)]
pub struct GroupBuilderOptions {
    /// Fields whose value tuple defines a group, via [`Store::groupby`].
    pub grouping_properties: Vec<String>,
    /// Per-group deadline; `None` for no timeout.
    pub timeout: Option<Duration>,
    /// Embed `process_item`'s wall-clock duration in the output document.
    pub store_process_time: bool,
    /// Re-include groups previously written with `state: "failed"`.
    pub retry_failed: bool,
    /// Additional source criteria applied to every selection.
    pub query: Criteria,
    /// Groups per `update_targets` batch.
    pub chunk_size: usize,
}

impl Default for GroupBuilderOptions {
    fn default() -> Self {
        Self {
            grouping_properties: Vec::new(),
            timeout: None,
            store_process_time: false,
            retry_failed: false,
            query: Criteria::new(),
            chunk_size: 1000,
        }
    }
}

/// Build the equality [`Criteria`] identifying one group's target document: its
/// `grouping_properties` fields set to their scalar group values.
fn group_criteria(grouping_properties: &[String], group_values: &[Value]) -> Criteria {
    let mut criteria = Criteria::new();
    for (field, value) in grouping_properties.iter().zip(group_values.iter()) {
        criteria.insert(field.clone(), value.clone());
    }
    criteria
}

/// An n:1 transform: source documents are partitioned by [`GroupBuilderOptions::grouping_properties`]
/// and `nary_function` runs once per group. The output document carries the group tuple as
/// its own fields (e.g. grouping by `"type"` produces a document with a `"type"` field, not
/// a synthesized composite key) and a plural form of the source key field holding every
/// member's key value. Unlike [`crate::MapBuilder`], there is no orphan deletion: a group's
/// membership is derived structurally from the current source contents each run, so a group
/// that no longer has members simply stops being produced, and nothing here tracks that
/// disappearance against the target.
pub struct GroupBuilder {
    name: String,
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    nary_function: NaryFunction,
    options: GroupBuilderOptions,
    build_tag: String,
    time_provider: Arc<dyn TimeProvider>,
}

impl GroupBuilder {
    /// Construct a GroupBuilder named `name`, running `nary_function` over each group of
    /// source documents sharing a `grouping_properties` value tuple.
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn Store>,
        target: Arc<dyn Store>,
        nary_function: impl Fn(Vec<Value>, Vec<WorkItem>) -> Result<ProcessedItem, ItemError>
            + Send
            + Sync
            + 'static,
        options: GroupBuilderOptions,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            nary_function: Arc::new(nary_function),
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

impl fmt::Debug for GroupBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("name", &self.name)
            .field("source", &self.source.name())
            .field("target", &self.target.name())
            .field("grouping_properties", &self.options.grouping_properties)
            .field("retry_failed", &self.options.retry_failed)
            .finish()
    }
}

#[async_trait]
impl Builder for GroupBuilder {
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
        let grouping_properties = self.options.grouping_properties.clone();
        let retry_failed = self.options.retry_failed;
        let source_last_updated_field = source.last_updated_field().to_string();
        let target_last_updated_field = target.last_updated_field().to_string();

        let stream = try_stream! {
            let groups = source
                .groupby(&grouping_properties, &query)
                .await
                .context(SourceSnafu { builder: builder_name.clone() })?;

            for (group_values, members) in groups {
                let criteria = group_criteria(&grouping_properties, &group_values);
                let existing = target
                    .query_one(&criteria)
                    .await
                    .context(SinkSnafu { builder: builder_name.clone() })?;

                let selected = match &existing {
                    None => true,
                    Some(doc) => {
                        let target_updated = get_last_updated(doc, &target_last_updated_field);
                        let any_member_newer = members
                            .iter()
                            .any(|m| get_last_updated(m, &source_last_updated_field) > target_updated);
                        any_member_newer
                            || (retry_failed && doc.get("state").and_then(Value::as_str) == Some("failed"))
                    }
                };
                if !selected {
                    continue;
                }

                yield serde_json::json!({
                    "group_values": group_values,
                    "members": members,
                });
            }
        };

        Box::pin(stream)
    }

    fn process_item(&self, item: WorkItem) -> Result<ProcessedItem, ItemError> {
        let group_values: Vec<Value> = item
            .get("group_values")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let members: Vec<WorkItem> = item
            .get("members")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let member_keys = members
            .iter()
            .filter_map(|m| m.get(self.source.key_field()).cloned())
            .collect();

        let start = self.options.store_process_time.then(Instant::now);
        let outcome = (self.nary_function)(group_values.clone(), members);
        Ok(build_group_output(
            &self.options.grouping_properties,
            &group_values,
            self.source.key_field(),
            member_keys,
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
            .update(docs, &self.options.grouping_properties)
            .await
            .context(SinkSnafu {
                builder: self.name.clone(),
            })
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
