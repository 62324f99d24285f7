//! The fixed set of Builder and Store shapes this binary knows how to hydrate from JSON.
//!
//! [`maggma_core::BuilderRegistry`] is deliberately a registry of compiled-in constructors,
//! not a generic class loader: a `unary_function`/`nary_function` is code, and code can't
//! ride inside a serialized description. What *can* be described in JSON is which Stores to
//! connect and how to shape the template builders' bookkeeping, so this module offers a
//! small library of off-the-shelf transforms (an identity copy, a grouping passthrough) that
//! cover the common "stage documents from one Store into another" case, parameterized
//! entirely by `args`.

use maggma_builders::{GroupBuilder, GroupBuilderOptions, MapBuilder, MapBuilderOptions};
use maggma_core::{Builder, BuilderError, BuilderRegistry, ItemError};
use maggma_store::{store::Criteria, FileStore, InMemoryStore, Store};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

use crate::config::CREDENTIALS_ENV;

/// Register every builtin Builder constructor under its tag.
pub fn registry() -> BuilderRegistry {
    let mut registry = BuilderRegistry::new();
    registry.register("copy", copy_builder as maggma_core::BuilderConstructor);
    registry.register("group_copy", group_copy_builder as maggma_core::BuilderConstructor);
    registry
}

/// If the caller didn't supply its own `credentials` field, fill one in from
/// [`CREDENTIALS_ENV`] when it's set. Neither builtin Store needs credentials today; this
/// keeps the hook available for whatever Store constructor needs it next without every
/// description file having to repeat a secret.
pub fn apply_default_credentials(args: &mut Value) {
    if args.get("credentials").is_some() {
        return;
    }
    if let Ok(credentials) = std::env::var(CREDENTIALS_ENV) {
        if let Value::Object(map) = args {
            map.insert("credentials".to_string(), Value::String(credentials));
        }
    }
}

/// Hydrate a `{"type": "memory" | "file", "args": {...}}` description into a Store.
pub fn store_from_value(description: &Value) -> Result<Arc<dyn Store>, BuilderError> {
    let tag = description
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BuilderError::Config { message: "store description is missing a \"type\" tag".into() })?;
    let mut args = description.get("args").cloned().unwrap_or(Value::Null);
    apply_default_credentials(&mut args);

    let name = args.get("name").and_then(Value::as_str).unwrap_or(tag).to_string();
    let key_field = args.get("key_field").and_then(Value::as_str).unwrap_or("_id").to_string();

    match tag {
        "memory" => Ok(Arc::new(InMemoryStore::new(name, key_field))),
        "file" => {
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| BuilderError::Config { message: "file store requires an \"args.path\"".into() })?;
            Ok(Arc::new(FileStore::new(path, name, key_field)))
        }
        other => Err(BuilderError::Config { message: format!("no store registered for tag {other:?}") }),
    }
}

fn query_from_args(args: &Value) -> Criteria {
    args.get("query").and_then(Value::as_object).cloned().unwrap_or_default()
}

fn timeout_from_args(args: &Value) -> Option<Duration> {
    args.get("timeout_seconds").and_then(Value::as_f64).map(Duration::from_secs_f64)
}

fn chunk_size_from_args(args: &Value) -> usize {
    args.get("chunk_size").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(1000)
}

fn map_builder_options(args: &Value) -> MapBuilderOptions {
    MapBuilderOptions {
        projection: args.get("projection").and_then(Value::as_array).map(|fields| {
            fields.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }),
        delete_orphans: args.get("delete_orphans").and_then(Value::as_bool).unwrap_or(false),
        timeout: timeout_from_args(args),
        store_process_time: args.get("store_process_time").and_then(Value::as_bool).unwrap_or(false),
        retry_failed: args.get("retry_failed").and_then(Value::as_bool).unwrap_or(false),
        query: query_from_args(args),
        chunk_size: chunk_size_from_args(args),
    }
}

fn group_builder_options(args: &Value) -> GroupBuilderOptions {
    let grouping_properties = args
        .get("grouping_properties")
        .and_then(Value::as_array)
        .map(|fields| fields.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    GroupBuilderOptions {
        grouping_properties,
        timeout: timeout_from_args(args),
        store_process_time: args.get("store_process_time").and_then(Value::as_bool).unwrap_or(false),
        retry_failed: args.get("retry_failed").and_then(Value::as_bool).unwrap_or(false),
        query: query_from_args(args),
        chunk_size: chunk_size_from_args(args),
    }
}

/// `{"type": "copy", "args": {"name", "source": StoreDescription, "target": StoreDescription,
/// ...MapBuilderOptions}}` -- a 1:1 passthrough, every source document copied to the target
/// unchanged. Useful on its own for staging a source verbatim, and as a template for any
/// transform simple enough to not need its own tag.
fn copy_builder(args: Value) -> Result<Box<dyn Builder>, BuilderError> {
    let name = args.get("name").and_then(Value::as_str).unwrap_or("copy").to_string();
    let source = store_from_value(args.get("source").ok_or_else(|| BuilderError::Config {
        message: "copy builder requires \"args.source\"".into(),
    })?)?;
    let target = store_from_value(args.get("target").ok_or_else(|| BuilderError::Config {
        message: "copy builder requires \"args.target\"".into(),
    })?)?;
    let options = map_builder_options(&args);
    Ok(Box::new(MapBuilder::new(name, source, target, identity, options)))
}

fn identity(item: maggma_core::WorkItem) -> Result<maggma_core::ProcessedItem, ItemError> {
    Ok(item)
}

/// `{"type": "group_copy", "args": {"name", "source", "target", "grouping_properties": [...],
/// ...GroupBuilderOptions}}` -- each group's members are copied verbatim as an array under
/// `"items"`, alongside the grouping tuple's own fields.
fn group_copy_builder(args: Value) -> Result<Box<dyn Builder>, BuilderError> {
    let name = args.get("name").and_then(Value::as_str).unwrap_or("group_copy").to_string();
    let source = store_from_value(args.get("source").ok_or_else(|| BuilderError::Config {
        message: "group_copy builder requires \"args.source\"".into(),
    })?)?;
    let target = store_from_value(args.get("target").ok_or_else(|| BuilderError::Config {
        message: "group_copy builder requires \"args.target\"".into(),
    })?)?;
    let options = group_builder_options(&args);
    Ok(Box::new(GroupBuilder::new(name, source, target, collect_members, options)))
}

fn collect_members(
    _group: Vec<Value>,
    members: Vec<maggma_core::WorkItem>,
) -> Result<maggma_core::ProcessedItem, ItemError> {
    Ok(serde_json::json!({ "items": members }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn memory_store_description_round_trips_a_name_and_key_field() {
        let description = serde_json::json!({"type": "memory", "args": {"name": "foo", "key_field": "task_id"}});
        let store = store_from_value(&description).unwrap();
        assert_eq!(store.name(), "foo");
        assert_eq!(store.key_field(), "task_id");
    }

    #[test]
    fn unknown_store_tag_is_a_config_error() {
        let description = serde_json::json!({"type": "nonexistent"});
        let err = store_from_value(&description).unwrap_err();
        assert_matches!(err, BuilderError::Config { .. });
    }

    #[test]
    fn copy_builder_requires_a_source_and_target() {
        let description = serde_json::json!({"name": "missing-fields"});
        let err = copy_builder(description).unwrap_err();
        assert_matches!(err, BuilderError::Config { .. });
    }

    #[test]
    fn copy_builder_builds_from_a_full_description() {
        let description = serde_json::json!({
            "name": "stage",
            "source": {"type": "memory", "args": {"name": "src", "key_field": "_id"}},
            "target": {"type": "memory", "args": {"name": "dst", "key_field": "_id"}},
        });
        let builder = copy_builder(description).unwrap();
        assert_eq!(builder.name(), "stage");
    }

    #[test]
    fn default_credentials_only_fill_in_when_unset_and_present() {
        std::env::remove_var(CREDENTIALS_ENV);
        let mut args = serde_json::json!({});
        apply_default_credentials(&mut args);
        assert!(args.get("credentials").is_none());

        std::env::set_var(CREDENTIALS_ENV, "token-123");
        let mut args = serde_json::json!({});
        apply_default_credentials(&mut args);
        assert_eq!(args["credentials"], serde_json::json!("token-123"));

        let mut args = serde_json::json!({"credentials": "explicit"});
        apply_default_credentials(&mut args);
        assert_eq!(args["credentials"], serde_json::json!("explicit"));
        std::env::remove_var(CREDENTIALS_ENV);
    }
}
