//! Live connection registry.
//!
//! Maps each connection to the bounded queue its writer task drains. Sends
//! never block: a full queue drops the frame and the caller decides how loud
//! to be about it.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::core::error::Result;
use crate::relay::protocol::{ConnectionId, OutboundFrame, ServerEvent};

/// Result of handing a frame to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the connection's writer
    Delivered,
    /// Queue full, frame dropped
    Dropped,
    /// Connection unknown or its writer is gone
    Closed,
}

struct ConnectionHandle {
    tx: mpsc::Sender<OutboundFrame>,
    drops: AtomicU64,
}

/// Tracks live connections and their outbound queues
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose per-connection queues hold `buffer` frames
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection, returning its id and the receiving end of its queue
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            ConnectionHandle {
                tx,
                drops: AtomicU64::new(0),
            },
        );
        (id, rx)
    }

    /// Remove a connection; returns whether it was registered
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Queue a pre-encoded frame for one connection
    pub fn send(&self, id: &ConnectionId, frame: OutboundFrame) -> SendOutcome {
        let Some(handle) = self.connections.get(id) else {
            return SendOutcome::Closed;
        };

        match handle.tx.try_send(frame) {
            Ok(()) => SendOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                handle.drops.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Encode and queue an event for one connection
    pub fn emit(&self, id: &ConnectionId, event: &ServerEvent) -> Result<SendOutcome> {
        Ok(self.send(id, event.encode()?))
    }

    /// Frames dropped for a connection because its queue was full
    pub fn drop_count(&self, id: &ConnectionId) -> u64 {
        self.connections
            .get(id)
            .map(|handle| handle.drops.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Check if a connection is registered
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when no connection is registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
