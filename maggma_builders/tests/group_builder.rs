//! End-to-end GroupBuilder scenario, driven through the real [`Executor`] pipeline.

use maggma_builders::{GroupBuilder, GroupBuilderOptions};
use maggma_core::ItemError;
use maggma_executor::Executor;
use maggma_store::InMemoryStore;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn doc(key: i64, project: &str, value: i64) -> serde_json::Map<String, serde_json::Value> {
    serde_json::json!({ "task_id": key, "project": project, "value": value })
        .as_object()
        .unwrap()
        .clone()
}

fn doc_with_last_updated(
    key: i64,
    project: &str,
    value: i64,
    last_updated: &str,
) -> serde_json::Map<String, serde_json::Value> {
    serde_json::json!({
        "task_id": key,
        "project": project,
        "value": value,
        "last_updated": last_updated,
    })
    .as_object()
    .unwrap()
    .clone()
}

#[tokio::test]
async fn sums_values_per_project_group() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "group_id"));
    source.seed(vec![
        doc(1, "alpha", 10),
        doc(2, "alpha", 20),
        doc(3, "beta", 5),
    ]);

    let mut options = GroupBuilderOptions::default();
    options.grouping_properties = vec!["project".to_string()];
    let builder = GroupBuilder::new(
        "summing",
        source,
        Arc::clone(&target),
        |keys, members| {
            let total: i64 = members
                .iter()
                .map(|m| m["value"].as_i64().unwrap_or(0))
                .sum();
            Ok(serde_json::json!({ "project": keys[0], "total": total }))
        },
        options,
    );

    let executor = Executor::new(2);
    let outcome = executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.errors, 0);
    let mut totals: Vec<(String, i64)> = target
        .all_docs()
        .into_iter()
        .map(|d| {
            (
                d["project"].as_str().unwrap().to_string(),
                d["total"].as_i64().unwrap(),
            )
        })
        .collect();
    totals.sort();
    assert_eq!(
        totals,
        vec![("alpha".to_string(), 30), ("beta".to_string(), 5)]
    );
}

#[tokio::test]
async fn a_group_function_error_is_written_as_a_failed_document() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "group_id"));
    source.seed(vec![doc(1, "alpha", 10), doc(2, "beta", -5)]);

    let mut options = GroupBuilderOptions::default();
    options.grouping_properties = vec!["project".to_string()];
    let builder = GroupBuilder::new(
        "summing",
        source,
        Arc::clone(&target),
        |keys, members| {
            let total: i64 = members.iter().map(|m| m["value"].as_i64().unwrap_or(0)).sum();
            if total < 0 {
                return Err(ItemError::failed("negative group total"));
            }
            Ok(serde_json::json!({ "project": keys[0], "total": total }))
        },
        options,
    );

    let executor = Executor::new(1);
    let outcome = executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.errors, 0);
    let docs = target.all_docs();
    assert_eq!(docs.len(), 2);
    let failed = docs
        .iter()
        .find(|d| d["project"].as_str() == Some("beta"))
        .unwrap();
    assert_eq!(failed["state"].as_str(), Some("failed"));
    assert_eq!(failed["task_id"], serde_json::json!([2]));
}

#[tokio::test]
async fn reruns_only_the_group_whose_member_changed() {
    let source = Arc::new(InMemoryStore::new("source", "task_id"));
    let target = Arc::new(InMemoryStore::new("target", "group_id"));
    source.seed(vec![
        doc_with_last_updated(1, "alpha", 10, "2020-01-01T00:00:00Z"),
        doc_with_last_updated(2, "alpha", 20, "2020-01-01T00:00:00Z"),
        doc_with_last_updated(3, "beta", 5, "2020-01-01T00:00:00Z"),
    ]);

    let alpha_runs = Arc::new(AtomicUsize::new(0));
    let beta_runs = Arc::new(AtomicUsize::new(0));
    let make_builder = |source: Arc<InMemoryStore>, alpha_runs: Arc<AtomicUsize>, beta_runs: Arc<AtomicUsize>| {
        let mut options = GroupBuilderOptions::default();
        options.grouping_properties = vec!["project".to_string()];
        GroupBuilder::new(
            "summing",
            source,
            Arc::clone(&target),
            move |keys, members| {
                match keys[0].as_str().unwrap() {
                    "alpha" => alpha_runs.fetch_add(1, Ordering::SeqCst),
                    "beta" => beta_runs.fetch_add(1, Ordering::SeqCst),
                    _ => unreachable!(),
                };
                let total: i64 = members.iter().map(|m| m["value"].as_i64().unwrap_or(0)).sum();
                Ok(serde_json::json!({ "project": keys[0], "total": total }))
            },
            options,
        )
    };

    let builder = make_builder(Arc::clone(&source), Arc::clone(&alpha_runs), Arc::clone(&beta_runs));
    let executor = Executor::new(2);
    executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(alpha_runs.load(Ordering::SeqCst), 1);
    assert_eq!(beta_runs.load(Ordering::SeqCst), 1);

    // Only alpha's member 1 changes, with a last_updated newer than either target document's.
    source.seed(vec![doc_with_last_updated(
        1,
        "alpha",
        99,
        "2099-01-01T00:00:00Z",
    )]);

    let builder = make_builder(Arc::clone(&source), Arc::clone(&alpha_runs), Arc::clone(&beta_runs));
    executor
        .run(Box::new(builder), Uuid::nil(), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(alpha_runs.load(Ordering::SeqCst), 2, "changed group must rerun");
    assert_eq!(beta_runs.load(Ordering::SeqCst), 1, "untouched group must not rerun");

    let mut totals: Vec<(String, i64)> = target
        .all_docs()
        .into_iter()
        .map(|d| (d["project"].as_str().unwrap().to_string(), d["total"].as_i64().unwrap()))
        .collect();
    totals.sort();
    assert_eq!(
        totals,
        vec![("alpha".to_string(), 109), ("beta".to_string(), 5)]
    );
}
