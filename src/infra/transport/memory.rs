//! In-process ROUTER emulation.
//!
//! Peers get a fixed identity when they connect. Messages a peer sends reach
//! the router prefixed with that identity; replies the router sends are
//! routed by their first frame, which is stripped before delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{FrameTransport, Frames, TrySendError};
use crate::core::SchedulerError;

/// Identity to (connection number, reply channel).
type PeerTable = Arc<Mutex<HashMap<Vec<u8>, (u64, mpsc::UnboundedSender<Frames>)>>>;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(0);

/// Server side of the in-memory transport.
pub struct MemoryRouter {
    inbound: mpsc::UnboundedReceiver<Frames>,
    peers: PeerTable,
}

/// Hands out connected peers.
#[derive(Clone)]
pub struct MemoryConnector {
    inbound: mpsc::UnboundedSender<Frames>,
    peers: PeerTable,
}

/// Client side, comparable to a DEALER socket.
pub struct MemoryPeer {
    identity: Vec<u8>,
    connection: u64,
    outbound: mpsc::UnboundedSender<Frames>,
    replies: mpsc::UnboundedReceiver<Frames>,
    peers: PeerTable,
}

/// Create a router and the connector peers use to reach it.
#[must_use]
pub fn memory_router() -> (MemoryRouter, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));
    (
        MemoryRouter {
            inbound: rx,
            peers: Arc::clone(&peers),
        },
        MemoryConnector { inbound: tx, peers },
    )
}

impl MemoryConnector {
    /// Connect a peer under `identity`. An existing peer with the same
    /// identity is replaced.
    pub fn connect(&self, identity: impl Into<Vec<u8>>) -> MemoryPeer {
        let identity = identity.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().insert(identity.clone(), (connection, tx));
        MemoryPeer {
            identity,
            connection,
            outbound: self.inbound.clone(),
            replies: rx,
            peers: Arc::clone(&self.peers),
        }
    }
}

impl MemoryRouter {
    /// Connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl FrameTransport for MemoryRouter {
    async fn recv(&mut self) -> Result<Frames, SchedulerError> {
        self.inbound.recv().await.ok_or(SchedulerError::TransportClosed)
    }

    fn try_send(&mut self, mut frames: Frames) -> Result<(), TrySendError> {
        if frames.is_empty() {
            return Err(TrySendError::Failed(SchedulerError::Transport("empty message".into())));
        }
        let identity = frames.remove(0);
        let peer = self.peers.lock().get(&identity).map(|(_, tx)| tx.clone());
        let Some(peer) = peer else {
            warn!(identity = ?identity, "no route to peer");
            return Err(TrySendError::Failed(SchedulerError::Transport(
                "unroutable peer identity".into(),
            )));
        };
        peer.send(frames).map_err(|_| {
            TrySendError::Failed(SchedulerError::Transport("peer disconnected".into()))
        })?;
        debug!(identity = ?identity, "routed reply");
        Ok(())
    }
}

impl MemoryPeer {
    /// This peer's routing identity.
    #[must_use]
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Send a message; the router sees it prefixed with this peer's identity.
    ///
    /// # Errors
    ///
    /// `TransportClosed` if the router is gone.
    pub fn send(&self, frames: Frames) -> Result<(), SchedulerError> {
        let mut routed = Vec::with_capacity(frames.len() + 1);
        routed.push(self.identity.clone());
        routed.extend(frames);
        self.outbound
            .send(routed)
            .map_err(|_| SchedulerError::TransportClosed)
    }

    /// Wait for the next message routed to this peer. `None` once another
    /// peer has connected under the same identity.
    pub async fn recv(&mut self) -> Option<Frames> {
        self.replies.recv().await
    }
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        let mut peers = self.peers.lock();
        if peers
            .get(&self.identity)
            .is_some_and(|(connection, _)| *connection == self.connection)
        {
            peers.remove(&self.identity);
        }
    }
}
