//! [`TcpBus`]: the point-to-multipoint socket dialect -- one Manager listener, one TCP
//! connection per Worker, length-delimited JSON frames.

use crate::{
    core::{Envelope, MessageBus},
    error::BusError,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use observability_deps::tracing::error;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// A TCP endpoint of the bus: either the Manager's listener (via [`TcpBus::bind`]) or one
/// Worker's dialed connection (via [`TcpBus::connect`]).
#[derive(Debug)]
pub struct TcpBus {
    self_id: String,
    peers: Arc<Mutex<HashMap<String, mpsc::Sender<Envelope>>>>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl TcpBus {
    /// Bind a listening socket and accept Worker connections as they arrive. Each accepted
    /// connection learns its peer id from the first envelope it sends (per the protocol,
    /// a Worker's first message is always `READY`).
    pub async fn bind(
        self_id: impl Into<String>,
        addr: impl ToSocketAddrs,
        queue_capacity: usize,
    ) -> Result<Self, BusError> {
        let queue_capacity = queue_capacity.max(1);
        let listener = TcpListener::bind(addr).await?;
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let (inbox_tx, inbox_rx) = mpsc::channel(queue_capacity);

        let accept_peers = Arc::clone(&peers);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _addr)) => {
                        tokio::spawn(run_connection(
                            socket,
                            Arc::clone(&accept_peers),
                            inbox_tx.clone(),
                            queue_capacity,
                            None,
                        ));
                    }
                    Err(err) => {
                        error!(%err, "bus accept loop stopped");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            self_id: self_id.into(),
            peers,
            inbox: tokio::sync::Mutex::new(inbox_rx),
            accept_task: Some(accept_task),
        })
    }

    /// Dial the Manager at `manager_addr`, known in advance as `manager_id`. Registers
    /// `manager_id` immediately, since a Worker must be able to send `READY` before it has
    /// received anything to learn the Manager's id from.
    pub async fn connect(
        self_id: impl Into<String>,
        manager_id: impl Into<String>,
        manager_addr: impl ToSocketAddrs,
        queue_capacity: usize,
    ) -> Result<Self, BusError> {
        let queue_capacity = queue_capacity.max(1);
        let socket = TcpStream::connect(manager_addr).await?;
        let peers = Arc::new(Mutex::new(HashMap::new()));
        let (inbox_tx, inbox_rx) = mpsc::channel(queue_capacity);

        tokio::spawn(run_connection(
            socket,
            Arc::clone(&peers),
            inbox_tx,
            queue_capacity,
            Some(manager_id.into()),
        ));

        Ok(Self {
            self_id: self_id.into(),
            peers,
            inbox: tokio::sync::Mutex::new(inbox_rx),
            accept_task: None,
        })
    }
}

/// Drive one socket: a writer task forwards outgoing [`Envelope`]s from a per-connection
/// channel onto the wire, while this loop decodes inbound frames and forwards them to the
/// shared inbox. `known_peer_id` is `Some` on the dialing side (the peer's identity is known
/// up front) and `None` on the accepting side (learned from the first inbound envelope).
async fn run_connection(
    stream: TcpStream,
    peers: Arc<Mutex<HashMap<String, mpsc::Sender<Envelope>>>>,
    inbox_tx: mpsc::Sender<Envelope>,
    queue_capacity: usize,
    known_peer_id: Option<String>,
) {
    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut incoming) = framed.split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<Envelope>(queue_capacity);

    let mut registered_as = known_peer_id.clone();
    if let Some(id) = &known_peer_id {
        peers.lock().insert(id.clone(), writer_tx.clone());
    }

    let writer = tokio::spawn(async move {
        while let Some(envelope) = writer_rx.recv().await {
            let encoded = match serde_json::to_vec(&envelope) {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!(%err, "failed to serialize bus envelope");
                    continue;
                }
            };
            if sink.send(encoded.into()).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = incoming.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                error!(%err, "bus connection read error");
                break;
            }
        };
        let envelope: Envelope = match serde_json::from_slice(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%err, "failed to deserialize bus frame, dropping it");
                continue;
            }
        };
        if registered_as.is_none() {
            peers.lock().insert(envelope.from.clone(), writer_tx.clone());
            registered_as = Some(envelope.from.clone());
        }
        if inbox_tx.send(envelope).await.is_err() {
            break;
        }
    }

    if let Some(id) = registered_as {
        peers.lock().remove(&id);
    }
    writer.abort();
}

#[async_trait]
impl MessageBus for TcpBus {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send(&self, to: &str, payload: Value) -> Result<(), BusError> {
        let sender = self
            .peers
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
            .ok_or_else(|| BusError::disconnected("tcp bus endpoint closed"))
    }

    fn peers(&self) -> Vec<String> {
        self.peers.lock().keys().cloned().collect()
    }

    async fn close(&self) -> Result<(), BusError> {
        if let Some(task) = &self.accept_task {
            task.abort();
        }
        Ok(())
    }
}
