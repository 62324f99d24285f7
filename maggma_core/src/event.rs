//! [`BuildEvent`]: the lifecycle record the Executor emits and the Reporter optionally
//! persists.

use maggma_time::Time;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

static MACHINE_ID: OnceCell<String> = OnceCell::new();

/// A stable, anonymous identifier for this machine, derived from the hostname plus a random
/// suffix and cached for the life of the process. Not derived from any real hardware
/// identifier -- it only needs to be stable *within* one process's build_id lifetime.
pub fn machine_id() -> &'static str {
    MACHINE_ID.get_or_init(|| {
        let host = hostname_or_unknown();
        let suffix: u32 = rand::random();
        format!("{host}-{suffix:08x}")
    })
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// The three event kinds a single `run` emits, in strict order: exactly one `Started`,
/// zero or more `Update`, exactly one `Ended`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "UPPERCASE")]
pub enum BuildEventPayload {
    /// Emitted once, when the Executor starts driving a Builder.
    Started {
        /// Names of the Builder's source stores.
        sources: Vec<String>,
        /// Names of the Builder's target stores.
        targets: Vec<String>,
        /// The producer's size hint, if the Builder exposes one via `total()`.
        total: Option<u64>,
    },
    /// Emitted once per successful `update_targets` batch.
    Update {
        /// Number of items written in this batch.
        count: usize,
    },
    /// Emitted once, when the Executor finishes driving a Builder (successfully or not).
    Ended {
        /// Number of items that ended in `ItemError`/`ItemTimeout`.
        errors: usize,
        /// Number of non-fatal warnings logged during the run.
        warnings: usize,
        /// Wall-clock duration of the whole run.
        duration: Duration,
    },
}

/// A single lifecycle record: which Builder, which run, when, and what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// The name of the Builder this event is about.
    pub builder_name: String,
    /// Fixed for every event emitted by one `Builder::run` (or, in distributed mode, one
    /// Manager-coordinated run).
    pub build_id: Uuid,
    /// The stable, anonymous id of the machine that emitted this event. Not resequenced
    /// across machines in distributed mode -- each process emits its own totally-ordered
    /// stream.
    pub machine_id: String,
    /// When the event was emitted.
    pub at: Time,
    /// A per-machine, per-build monotonic sequence number, used to detect gaps/reordering
    /// without claiming a total order across machines.
    pub sequence: u64,
    /// The event-specific payload.
    #[serde(flatten)]
    pub payload: BuildEventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_id_is_stable_within_process() {
        assert_eq!(machine_id(), machine_id());
    }

    #[test]
    fn serializes_with_uppercase_event_tag() {
        let event = BuildEvent {
            builder_name: "multiply_by_two".into(),
            build_id: Uuid::nil(),
            machine_id: "host-1".into(),
            at: Time::epoch(),
            sequence: 0,
            payload: BuildEventPayload::Update { count: 3 },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"UPDATE\""));
        assert!(json.contains("\"count\":3"));
    }
}
