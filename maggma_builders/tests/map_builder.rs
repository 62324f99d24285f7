//! End-to-end MapBuilder scenarios, driven through the real [`Executor`] pipeline rather
//! than by calling `Builder` methods directly, so these also exercise the producer/worker
//! pool/consumer wiring against a template builder.

use maggma_builders::{MapBuilder, MapBuilderOptions};
use maggma_core::ItemError;
use maggma_executor::Executor;
use maggma_store::{InMemoryStore, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn doc(key: i64, value: i64) -> serde_json::Map<String, serde_json::Value> {
    serde_json::json!({ "task_id": key, "value": value })
        .as_object()
        .unwrap()
        .clone()
}

#[tokio::test]
async fn doubles_every_source_document_into_the_target() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "task_id"));
    source.seed((1..=5).map(|n| doc(n, n)));

    let builder = MapBuilder::new(
        "doubler",
        source,
        Arc::clone(&target),
        |item| {
            let value = item["value"].as_i64().ok_or_else(|| ItemError::failed("missing value"))?;
            Ok(serde_json::json!({ "value": value * 2 }))
        },
        MapBuilderOptions::default(),
    );

    let executor = Executor::new(3);
    let outcome = executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.errors, 0);
    let mut written: Vec<i64> = target
        .all_docs()
        .into_iter()
        .map(|d| d["value"].as_i64().unwrap())
        .collect();
    written.sort_unstable();
    assert_eq!(written, vec![2, 4, 6, 8, 10]);
}

#[tokio::test]
async fn a_second_run_only_reprocesses_updated_source_documents() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "task_id"));
    source.seed(vec![doc(1, 10), doc(2, 20)]);

    let run_builder = || {
        MapBuilder::new(
            "doubler",
            Arc::clone(&source),
            Arc::clone(&target),
            |item| {
                let value = item["value"].as_i64().unwrap();
                Ok(serde_json::json!({ "value": value * 2 }))
            },
            MapBuilderOptions::default(),
        )
    };

    let executor = Executor::new(2);
    executor
        .run(Box::new(run_builder()), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    let mut written: Vec<i64> = target
        .all_docs()
        .into_iter()
        .map(|d| d["value"].as_i64().unwrap())
        .collect();
    written.sort_unstable();
    assert_eq!(written, vec![20, 40]);

    // Nothing changed upstream: a second run should select zero items, since every key
    // is already present and not newer than its target counterpart.
    let outcome = executor
        .run(Box::new(run_builder()), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.errors, 0);
}

#[tokio::test]
async fn failed_items_are_written_with_an_error_state_not_dropped() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "task_id"));
    source.seed(vec![doc(1, 10), doc(2, -1), doc(3, 30)]);

    let builder = MapBuilder::new(
        "validating",
        source,
        Arc::clone(&target),
        |item| {
            let value = item["value"].as_i64().unwrap();
            if value < 0 {
                return Err(ItemError::failed("negative value"));
            }
            Ok(serde_json::json!({ "value": value }))
        },
        MapBuilderOptions::default(),
    );

    let executor = Executor::new(2);
    let outcome = executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.errors, 0);
    let docs = target.all_docs();
    assert_eq!(docs.len(), 3);
    let failed = docs
        .iter()
        .find(|d| d["task_id"].as_i64() == Some(2))
        .unwrap();
    assert_eq!(failed["state"].as_str(), Some("failed"));
    assert!(failed["error"].as_str().unwrap().contains("negative"));
}

#[tokio::test]
async fn retry_failed_reselects_previously_failed_keys() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "task_id"));
    source.seed(vec![doc(1, 10)]);
    target.seed(vec![serde_json::json!({
        "task_id": 1,
        "last_updated": "2020-01-01T00:00:00Z",
        "state": "failed",
        "error": "boom",
    })
    .as_object()
    .unwrap()
    .clone()]);

    let mut options = MapBuilderOptions::default();
    options.retry_failed = true;
    let builder = MapBuilder::new(
        "retrying",
        source,
        Arc::clone(&target),
        |item| Ok(serde_json::json!({ "value": item["value"].clone() })),
        options,
    );

    let executor = Executor::new(1);
    let outcome = executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.errors, 0);
    let docs = target.all_docs();
    assert_eq!(docs.len(), 1);
    assert!(docs[0].get("state").is_none());
}

#[tokio::test]
async fn delete_orphans_removes_target_documents_missing_from_the_source() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "task_id"));
    source.seed(vec![doc(1, 10)]);
    target.seed(vec![
        doc(1, 10),
        doc(2, 20), // no longer present upstream
    ]);

    let mut options = MapBuilderOptions::default();
    options.delete_orphans = true;
    let builder = MapBuilder::new(
        "pruning",
        source,
        Arc::clone(&target),
        |item| Ok(serde_json::json!({ "value": item["value"].clone() })),
        options,
    );

    let executor = Executor::new(1);
    executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    let keys: Vec<i64> = target
        .all_docs()
        .into_iter()
        .map(|d| d["task_id"].as_i64().unwrap())
        .collect();
    assert_eq!(keys, vec![1]);
}
