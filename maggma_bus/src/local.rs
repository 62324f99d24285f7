//! [`LocalBus`]: an in-process dialect backed by `tokio::sync::mpsc`, for single-host runs and
//! tests where a real socket would only add noise.

use crate::{
    core::{Envelope, MessageBus},
    error::BusError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::mpsc;

/// Shared registry every [`LocalBus`] endpoint connects through. Stands in for the broker a
/// real queue-based dialect would use: endpoints look each other up by id rather than holding
/// direct references to one another.
#[derive(Clone)]
pub struct LocalBusHub {
    registry: Arc<Mutex<HashMap<String, mpsc::Sender<Envelope>>>>,
    queue_capacity: usize,
}

impl LocalBusHub {
    /// Create a hub whose per-endpoint inboxes are bounded to `queue_capacity`. The spec's
    /// high-water-mark rule (`max(num_chunks, num_workers) * 2`) is the caller's
    /// responsibility to compute; the hub just enforces whatever bound it's given.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Mint a new endpoint under `id`, replacing any previous endpoint registered under the
    /// same id.
    pub fn connect(&self, id: impl Into<String>) -> LocalBus {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.registry.lock().insert(id.clone(), tx);
        LocalBus {
            self_id: id,
            registry: Arc::clone(&self.registry),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }
}

impl fmt::Debug for LocalBusHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBusHub")
            .field("peers", &self.registry.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One endpoint of an in-process bus, minted by [`LocalBusHub::connect`].
#[derive(Debug)]
pub struct LocalBus {
    self_id: String,
    registry: Arc<Mutex<HashMap<String, mpsc::Sender<Envelope>>>>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
}

#[async_trait]
impl MessageBus for LocalBus {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send(&self, to: &str, payload: Value) -> Result<(), BusError> {
        let sender = self
            .registry
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| BusError::disconnected(format!("no such peer: {to}")))?;
        sender
            .send(Envelope {
                from: self.self_id.clone(),
                payload,
            })
            .await
            .map_err(|e| BusError::disconnected(e.to_string()))
    }

    async fn recv(&self) -> Result<Envelope, BusError> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| BusError::disconnected("local bus endpoint closed"))
    }

    fn peers(&self) -> Vec<String> {
        self.registry
            .lock()
            .keys()
            .filter(|id| **id != self.self_id)
            .cloned()
            .collect()
    }

    async fn close(&self) -> Result<(), BusError> {
        self.registry.lock().remove(&self.self_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manager_and_worker_exchange_messages() {
        let hub = LocalBusHub::new(8);
        let manager = hub.connect("manager");
        let worker = hub.connect("worker-1");

        worker
            .send("manager", serde_json::json!({"type": "READY"}))
            .await
            .unwrap();
        let received = manager.recv().await.unwrap();
        assert_eq!(received.from, "worker-1");
        assert_eq!(received.payload["type"], "READY");

        manager
            .send("worker-1", serde_json::json!({"type": "EXIT"}))
            .await
            .unwrap();
        let received = worker.recv().await.unwrap();
        assert_eq!(received.payload["type"], "EXIT");
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_disconnected() {
        let hub = LocalBusHub::new(8);
        let manager = hub.connect("manager");
        let err = manager
            .send("ghost", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::BusErrorKind::Disconnected);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let hub = LocalBusHub::new(8);
        let manager = hub.connect("manager");
        let w1 = hub.connect("w1");
        let w2 = hub.connect("w2");

        manager
            .broadcast(serde_json::json!({"type": "EXIT"}))
            .await
            .unwrap();

        assert_eq!(w1.recv().await.unwrap().payload["type"], "EXIT");
        assert_eq!(w2.recv().await.unwrap().payload["type"], "EXIT");
    }
}
