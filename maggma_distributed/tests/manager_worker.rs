use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use maggma_bus::LocalBusHub;
use maggma_core::{Builder, BuilderError, BuilderRegistry, Chunk, ItemError, WorkItem};
use maggma_distributed::{run_manager, run_worker, ManagerConfig, WorkerConfig};
use serde_json::Value;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::Mutex;
use uuid::Uuid;

// Two independent statics, one per test: `BuilderConstructor` is a bare `fn` pointer with no
// captures, so the only way a registered constructor can reach shared state is a global --
// each test gets its own to stay independent of the other's timing and assertions.
static WRITTEN_FAST: OnceLock<Mutex<Vec<i64>>> = OnceLock::new();
static WRITTEN_SLOW: OnceLock<Mutex<Vec<i64>>> = OnceLock::new();

fn written_fast() -> &'static Mutex<Vec<i64>> {
    WRITTEN_FAST.get_or_init(|| Mutex::new(Vec::new()))
}

fn written_slow() -> &'static Mutex<Vec<i64>> {
    WRITTEN_SLOW.get_or_init(|| Mutex::new(Vec::new()))
}

#[derive(Debug)]
struct ShardBuilder {
    shard: i64,
    total_shards: i64,
    stall: Option<Duration>,
    slow: bool,
}

#[async_trait]
impl Builder for ShardBuilder {
    fn name(&self) -> &str {
        "shard_builder"
    }

    async fn connect(&mut self) -> Result<(), BuilderError> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }

    fn prechunk(&self, n: usize) -> Option<Vec<Chunk>> {
        Some(
            (0..n)
                .map(|i| {
                    let mut chunk = Chunk::new();
                    chunk.insert("shard".to_string(), serde_json::json!(i as i64));
                    chunk.insert("total_shards".to_string(), serde_json::json!(n as i64));
                    chunk
                })
                .collect(),
        )
    }

    fn get_items(&mut self) -> BoxStream<'static, Result<WorkItem, BuilderError>> {
        let shard = self.shard;
        let total = self.total_shards;
        stream::iter((0..12i64).filter(move |n| n % total == shard).map(|n| Ok(serde_json::json!({ "n": n }))))
            .boxed()
    }

    fn process_item(&self, item: WorkItem) -> Result<Value, ItemError> {
        let n = item["n"].as_i64().ok_or_else(|| ItemError::failed("missing n"))?;
        Ok(serde_json::json!({ "n": n * 2 }))
    }

    async fn update_targets(&mut self, batch: Vec<Value>) -> Result<(), BuilderError> {
        let sink = if self.slow { written_slow() } else { written_fast() };
        let mut w = sink.lock().await;
        for item in batch {
            w.push(item["n"].as_i64().unwrap());
        }
        Ok(())
    }
}

fn fast_ctor(args: Value) -> Result<Box<dyn Builder>, BuilderError> {
    let shard = args.get("shard").and_then(Value::as_i64).unwrap_or(0);
    let total_shards = args.get("total_shards").and_then(Value::as_i64).unwrap_or(1);
    Ok(Box::new(ShardBuilder {
        shard,
        total_shards,
        stall: None,
        slow: false,
    }))
}

fn slow_ctor(args: Value) -> Result<Box<dyn Builder>, BuilderError> {
    let shard = args.get("shard").and_then(Value::as_i64).unwrap_or(0);
    let total_shards = args.get("total_shards").and_then(Value::as_i64).unwrap_or(1);
    Ok(Box::new(ShardBuilder {
        shard,
        total_shards,
        stall: Some(Duration::from_millis(300)),
        slow: true,
    }))
}

#[tokio::test]
async fn three_workers_split_and_complete_every_chunk() {
    written_fast().lock().await.clear();

    let hub = LocalBusHub::new(16);
    let manager_bus = Arc::new(hub.connect("manager"));

    let mut registry = BuilderRegistry::new();
    registry.register("shard_builder", fast_ctor as maggma_core::BuilderConstructor);
    let registry = Arc::new(registry);

    let mut worker_handles = Vec::new();
    for i in 0..3 {
        let bus = Arc::new(hub.connect(format!("worker-{i}")));
        let registry = Arc::clone(&registry);
        worker_handles.push(tokio::spawn(async move {
            run_worker(bus, "manager", registry, WorkerConfig::default()).await;
        }));
    }

    let manager_builder = fast_ctor(Value::Null).unwrap();
    let description = serde_json::json!({ "type": "shard_builder" });
    let outcome = run_manager(
        manager_bus,
        manager_builder,
        description,
        Uuid::nil(),
        ManagerConfig {
            num_chunks: 3,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.chunks_total, 3);
    assert_eq!(outcome.chunks_failed, 0);

    for handle in worker_handles {
        handle.await.unwrap();
    }

    let mut got = written_fast().lock().await.clone();
    got.sort_unstable();
    assert_eq!(got, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 22]);
}

#[tokio::test]
async fn a_dead_worker_heartbeat_is_requeued_to_a_live_worker() {
    written_slow().lock().await.clear();

    let hub = LocalBusHub::new(16);
    let manager_bus = Arc::new(hub.connect("manager"));

    let mut registry = BuilderRegistry::new();
    registry.register("shard_builder", slow_ctor as maggma_core::BuilderConstructor);
    let registry = Arc::new(registry);

    // Worker "doomed" picks up the only chunk, then gets aborted before it can ever finish
    // `connect`'s artificial stall or send a HEARTBEAT -- simulating a crashed process.
    let doomed_bus = Arc::new(hub.connect("doomed"));
    let doomed_registry = Arc::clone(&registry);
    let doomed = tokio::spawn(async move {
        run_worker(doomed_bus, "manager", doomed_registry, WorkerConfig::default()).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    doomed.abort();

    let survivor_bus = Arc::new(hub.connect("survivor"));
    let survivor_registry = Arc::clone(&registry);
    let survivor = tokio::spawn(async move {
        run_worker(survivor_bus, "manager", survivor_registry, WorkerConfig::default()).await;
    });

    let manager_builder = slow_ctor(Value::Null).unwrap();
    let description = serde_json::json!({ "type": "shard_builder" });
    let outcome = run_manager(
        manager_bus,
        manager_builder,
        description,
        Uuid::nil(),
        ManagerConfig {
            num_chunks: 1,
            heartbeat_grace: Duration::from_millis(100),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.chunks_total, 1);
    assert_eq!(outcome.chunks_failed, 0);

    survivor.await.unwrap();

    let mut got = written_slow().lock().await.clone();
    got.sort_unstable();
    assert_eq!(got, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 22]);
}
