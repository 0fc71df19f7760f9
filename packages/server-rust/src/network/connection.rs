//! Socket management: per-socket backpressure and the socket registry.
//!
//! Every WebSocket gets a bounded mpsc channel for outbound frames; the
//! receiver end lives in the socket's write loop, the sender end in a
//! [`SocketHandle`] tracked by the lock-free [`SocketRegistry`]. The
//! registry is also the synchronizer's [`Outbox`]: writes to closed or
//! congested sockets are dropped, never blocking a sync tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tilemud_core::Envelope;
use tokio::sync::mpsc;
use tracing::debug;

use crate::sync::Outbox;

use super::config::ConnectionConfig;

/// Unique identifier for a socket, assigned by the registry.
/// Ids start at 1; 0 is reserved as "no socket".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

/// Frame to be sent outbound on a socket.
#[derive(Debug)]
pub enum OutboundFrame {
    /// A JSON-encoded envelope.
    Text(String),
    /// A close frame with an optional reason.
    Close(Option<String>),
}

/// Handle to a single socket: the sender end of its outbound channel.
#[derive(Debug)]
pub struct SocketHandle {
    pub id: SocketId,
    pub tx: mpsc::Sender<OutboundFrame>,
    pub connected_at: Instant,
}

impl SocketHandle {
    /// Attempts to enqueue a frame without blocking. Returns `false` when
    /// the channel is full or the socket has been closed.
    #[must_use]
    pub fn try_send(&self, frame: OutboundFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Whether the write loop is still draining this socket.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Thread-safe registry of all open sockets.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    sockets: DashMap<SocketId, Arc<SocketHandle>>,
    next_id: AtomicU64,
}

impl SocketRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sockets: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new socket, returning its handle and the receiver for
    /// the write loop.
    pub fn register(
        &self,
        config: &ConnectionConfig,
    ) -> (Arc<SocketHandle>, mpsc::Receiver<OutboundFrame>) {
        let id = SocketId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);
        let handle = Arc::new(SocketHandle {
            id,
            tx,
            connected_at: Instant::now(),
        });
        self.sockets.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    /// Removes a socket, returning its handle if it was registered.
    pub fn remove(&self, id: SocketId) -> Option<Arc<SocketHandle>> {
        self.sockets.remove(&id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn get(&self, id: SocketId) -> Option<Arc<SocketHandle>> {
        self.sockets.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.sockets.len()
    }

    /// Sends an envelope to one socket, dropping it when the socket is
    /// gone or congested.
    pub fn send_envelope(&self, id: SocketId, envelope: &Envelope) {
        if let Some(handle) = self.get(id) {
            if !handle.try_send(OutboundFrame::Text(envelope.encode())) {
                debug!(socket = id.0, event = %envelope.event, "dropping frame for congested socket");
            }
        }
    }

    /// Removes and returns all sockets. Used during graceful shutdown.
    pub fn drain_all(&self) -> Vec<Arc<SocketHandle>> {
        let ids: Vec<SocketId> = self.sockets.iter().map(|entry| *entry.key()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.sockets.remove(&id) {
                handles.push(handle);
            }
        }
        handles
    }
}

impl Outbox for SocketRegistry {
    fn send(&self, socket: SocketId, envelope: &Envelope) {
        self.send_envelope(socket, envelope);
    }
}
