//! [`MessageBus`]: the transport abstraction the Distributed Coordinator speaks over, agnostic
//! of whether the two ends are in the same process or on different hosts.

use crate::error::BusError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

/// One inbound message: who it's from, and its self-describing payload. The Coordinator
/// layers its own tagged-union protocol (`READY`/`CHUNK`/`HEARTBEAT`/`DONE`/`FAILED`/`EXIT`)
/// on top of `payload`; the bus itself has no opinion on its shape.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    /// The stable id of the peer that sent this message (a worker id, or the manager's id).
    pub from: String,
    /// The message payload.
    pub payload: Value,
}

/// A reliable, addressed message bus between one Manager and M Workers.
///
/// Two dialects are provided: [`crate::LocalBus`] (in-process, for tests and single-host
/// runs) and [`crate::TcpBus`] (a real point-to-multipoint socket transport). Both satisfy the
/// same contract: `send` is addressed (never broadcast implicitly), `recv` yields whatever
/// arrives next from any peer, and delivery is ordered per-peer but not ordered across peers.
#[async_trait]
pub trait MessageBus: Debug + Send + Sync + 'static {
    /// This endpoint's own stable id, as advertised to peers.
    fn self_id(&self) -> &str;

    /// Send `payload` to the peer named `to`. Returns [`crate::BusErrorKind::Disconnected`]
    /// if `to` has never been seen (no peer has announced itself under that id yet).
    async fn send(&self, to: &str, payload: Value) -> Result<(), BusError>;

    /// Block until the next message arrives from any peer.
    async fn recv(&self) -> Result<Envelope, BusError>;

    /// Ids of every peer this endpoint currently knows how to address. Best-effort: a peer
    /// that has disconnected may linger briefly before being removed.
    fn peers(&self) -> Vec<String>;

    /// Send `payload` to every currently known peer. The default Manager-side way to signal
    /// `EXIT` to all Workers on cancellation.
    async fn broadcast(&self, payload: Value) -> Result<(), BusError> {
        for peer in self.peers() {
            self.send(&peer, payload.clone()).await?;
        }
        Ok(())
    }

    /// Release any held resources (listener socket, background tasks). Idempotent.
    async fn close(&self) -> Result<(), BusError>;
}
