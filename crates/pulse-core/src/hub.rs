//! Broadcast hub for real-time connections
//!
//! Every WebSocket and event-stream client registers exactly one connection
//! and receives a [`Subscription`]. A broadcast snapshots the registry, then
//! pushes the message into each connection's bounded channel; the writer that
//! owns the subscription turns it into a frame or an event record.
//!
//! Delivery is best-effort. A closed channel or a send that does not complete
//! within the write timeout counts as a lost connection: it is removed from
//! the registry and the remaining deliveries carry on.

use crate::Error;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Per-connection send buffer
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Bound on a single connection write during a broadcast
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identifier of a registered connection
pub type ConnectionId = u64;

/// Broadcast payload, shared by every delivery of one fan-out
pub type Message = Arc<str>;

/// Transport a connection was opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    WebSocket,
    EventStream,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::WebSocket => "websocket",
            ConnectionKind::EventStream => "event-stream",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for one real-time client
#[derive(Debug)]
struct Connection {
    kind: ConnectionKind,
    tx: mpsc::Sender<Message>,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the message was handed to
    pub delivered: usize,
    /// Connections removed because the write failed or timed out
    pub dropped: usize,
}

/// Process-wide registry of real-time connections
///
/// Shared as `Arc<Hub>`; construct one per server (or per test).
pub struct Hub {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    write_timeout: Duration,
    buffer: usize,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WRITE_TIMEOUT, DEFAULT_CONNECTION_BUFFER)
    }

    /// Create a hub with a custom write timeout and per-connection buffer
    pub fn with_limits(write_timeout: Duration, buffer: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            write_timeout,
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection
    ///
    /// The connection stays registered until the returned subscription is
    /// dropped, a write to it fails, or the hub is closed. Registering on a
    /// closed hub yields a subscription that ends immediately.
    pub fn register(self: &Arc<Self>, kind: ConnectionKind) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let total = {
            let mut connections = self.connections.lock();
            // Checked under the lock so close() cannot miss this entry
            if self.is_closed() {
                drop(tx);
                None
            } else {
                connections.insert(id, Connection { kind, tx });
                Some(connections.len())
            }
        };

        match total {
            Some(total) => info!(connection = id, %kind, total, "connection registered"),
            None => debug!(connection = id, %kind, "hub closed, registration refused"),
        }

        Subscription {
            id,
            kind,
            rx,
            hub: Arc::clone(self),
        }
    }

    /// Remove a connection; returns whether it was registered
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut connections = self.connections.lock();
            let removed = connections.remove(&id);
            (removed, connections.len())
        };

        match removed {
            Some(conn) => {
                info!(connection = id, kind = %conn.kind, total, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Deliver `message` to every registered connection
    ///
    /// Works on a snapshot of the registry taken at call time; connections
    /// registered while the fan-out is in flight may or may not receive this
    /// message, but none receives it twice.
    pub async fn broadcast(&self, message: &str) -> Delivery {
        let message: Message = Arc::from(message);

        let targets: Vec<(ConnectionId, mpsc::Sender<Message>)> = self
            .connections
            .lock()
            .iter()
            .map(|(id, conn)| (*id, conn.tx.clone()))
            .collect();

        let sends = targets.into_iter().map(|(id, tx)| {
            let message = Arc::clone(&message);
            async move { (id, self.deliver(id, &tx, message).await) }
        });

        let mut delivery = Delivery::default();
        for (id, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    debug!(connection = id, error = %e, "dropping connection");
                    self.unregister(id);
                    delivery.dropped += 1;
                }
            }
        }

        debug!(
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "broadcast complete"
        );
        delivery
    }

    async fn deliver(
        &self,
        id: ConnectionId,
        tx: &mpsc::Sender<Message>,
        message: Message,
    ) -> crate::Result<()> {
        match tokio::time::timeout(self.write_timeout, tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(Error::ConnectionLost(id)),
        }
    }

    /// Close the hub
    ///
    /// Every registered connection is released, so each subscription sees the
    /// end of its stream and its transport shuts down.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut connections = self.connections.lock();
            self.closed.store(true, Ordering::SeqCst);
            connections.drain().collect()
        };
        info!(released = drained.len(), "hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered connections of one kind
    pub fn count(&self, kind: ConnectionKind) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|conn| conn.kind == kind)
            .count()
    }

    #[cfg(test)]
    fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.len())
            .field("closed", &self.is_closed())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// Receiving side of one registered connection
///
/// Dropping it unregisters the connection.
pub struct Subscription {
    id: ConnectionId,
    kind: ConnectionKind,
    rx: mpsc::Receiver<Message>,
    hub: Arc<Hub>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next broadcast
    ///
    /// Returns `None` once the connection has been removed from the hub and
    /// every pending message has been received.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
