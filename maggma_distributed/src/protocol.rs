//! The wire protocol the Manager and Workers speak over a [`maggma_bus::MessageBus`]:
//! `READY` / `CHUNK` / `EXIT` / `HEARTBEAT` / `DONE` / `FAILED`.

use maggma_core::Chunk;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One control message, tagged by `type` on the wire (matching [`maggma_core::event::BuildEventPayload`]'s
/// tagging convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ControlMessage {
    /// A Worker announcing itself and its local concurrency.
    Ready {
        /// How many Executor pool workers this Worker process will run chunks with.
        num_workers: usize,
    },
    /// The Manager dispatching one unit of work.
    Chunk {
        /// Shared across every chunk of one coordinated run.
        build_id: Uuid,
        /// This chunk's position, for logging and heartbeat correlation.
        chunk_index: usize,
        /// Total number of chunks in this run.
        total_chunks: usize,
        /// The tagged-union Builder description (`{"type": ..., "args": ...}`), to be
        /// resolved through a [`maggma_core::BuilderRegistry`].
        builder: Value,
        /// The attribute overrides from `prechunk`, merged into `builder`'s `args` before
        /// construction.
        overrides: Chunk,
    },
    /// The Manager declining a `READY`: no chunks remain.
    Exit,
    /// A Worker reporting it is still alive on a chunk it was dispatched.
    Heartbeat {
        /// The chunk currently in flight.
        chunk_index: usize,
    },
    /// A Worker reporting a chunk finished successfully.
    Done {
        /// The chunk that finished.
        chunk_index: usize,
        /// The chunk's own `ItemError` count, folded into the Manager's final outcome.
        errors: usize,
    },
    /// A Worker reporting a chunk failed.
    Failed {
        /// The chunk that failed.
        chunk_index: usize,
        /// A human-readable description of the failure.
        message: String,
    },
}

/// Merge `overrides` into `description`'s `"args"` object, constructing one if absent.
/// `description` is expected to already have the `{"type": ..., "args": {...}}` shape a
/// [`maggma_core::BuilderRegistry`] resolves.
pub fn apply_chunk(description: &Value, overrides: &Chunk) -> Value {
    let mut merged = description.clone();
    if let Some(obj) = merged.as_object_mut() {
        let args = obj
            .entry("args")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(args_obj) = args.as_object_mut() {
            for (k, v) in overrides {
                args_obj.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

/// The spec's high-water-mark rule for bounded bus queues: large enough that neither a full
/// chunk backlog nor a full worker roster can make a `send` block indefinitely.
pub fn high_water_mark(num_chunks: usize, num_workers: usize) -> usize {
    num_chunks.max(num_workers).max(1) * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn apply_chunk_merges_into_args() {
        let description = serde_json::json!({"type": "my_builder", "args": {"base": 1}});
        let mut overrides = Chunk::new();
        overrides.insert("shard".to_string(), serde_json::json!(2));

        let merged = apply_chunk(&description, &overrides);
        assert_eq!(merged["args"]["base"], 1);
        assert_eq!(merged["args"]["shard"], 2);
        assert_eq!(merged["type"], "my_builder");
    }

    #[test]
    fn apply_chunk_creates_args_if_absent() {
        let description = serde_json::json!({"type": "my_builder"});
        let mut overrides = Chunk::new();
        overrides.insert("shard".to_string(), serde_json::json!(0));

        let merged = apply_chunk(&description, &overrides);
        assert_eq!(merged["args"]["shard"], 0);
    }

    #[test]
    fn high_water_mark_scales_with_the_larger_side() {
        assert_eq!(high_water_mark(3, 2), 6);
        assert_eq!(high_water_mark(1, 5), 10);
    }

    #[test]
    fn control_messages_round_trip_through_json() {
        let msg = ControlMessage::Heartbeat { chunk_index: 4 };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "HEARTBEAT");
        let back: ControlMessage = serde_json::from_value(value).unwrap();
        assert_matches!(back, ControlMessage::Heartbeat { chunk_index: 4 });
    }
}
