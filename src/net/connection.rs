//! Connection registry and per-connection lifecycle signals.
//!
//! # Responsibilities
//! - Register every accepted connection (insert on accept, remove on close)
//! - Generate unique connection IDs for tracing
//! - Broadcast graceful-close and destroy requests during draining
//! - Report when the last connection has gone away

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::observability::metrics;

/// Using relaxed ordering is sufficient since we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the server currently wants from a connection. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Serving requests.
    Open,
    /// Finish in-flight work, then close.
    Closing,
    /// Drop the transport immediately.
    Destroyed,
}

struct Entry {
    peer: SocketAddr,
    state: watch::Sender<ConnectionState>,
}

struct RegistryInner {
    connections: DashMap<ConnectionId, Entry>,
    count: watch::Sender<usize>,
}

/// Live set of open transport connections, owned by the server.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                connections: DashMap::new(),
                count,
            }),
        }
    }

    /// Register a newly accepted connection. It stays registered until the
    /// returned guard is dropped.
    pub fn insert(&self, peer: SocketAddr) -> ConnectionGuard {
        let id = ConnectionId::new();
        let (state, receiver) = watch::channel(ConnectionState::Open);
        self.inner.connections.insert(id, Entry { peer, state });
        self.publish_count();
        tracing::trace!(connection_id = %id, peer_addr = %peer, "Connection registered");

        ConnectionGuard {
            id,
            peer,
            registry: self.clone(),
            state: receiver,
        }
    }

    /// Unregister a connection.
    pub fn remove(&self, id: ConnectionId) {
        if self.inner.connections.remove(&id).is_some() {
            self.publish_count();
            tracing::trace!(connection_id = %id, "Connection closed");
        }
    }

    /// Ask every registered connection to close gracefully.
    pub fn close_all(&self) -> usize {
        self.advance_all(ConnectionState::Closing)
    }

    /// Tear down every registered connection immediately.
    pub fn destroy_all(&self) -> usize {
        self.advance_all(ConnectionState::Destroyed)
    }

    /// Tear down a single connection.
    pub fn destroy(&self, id: ConnectionId) {
        if let Some(entry) = self.inner.connections.get(&id) {
            advance(&entry.state, ConnectionState::Destroyed);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Peers of the currently registered connections.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.connections.iter().map(|e| e.peer).collect()
    }

    /// Resolves once no connection is registered.
    pub async fn wait_empty(&self) {
        let mut count = self.inner.count.subscribe();
        let _ = count.wait_for(|n| *n == 0).await;
    }

    fn advance_all(&self, target: ConnectionState) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|entry| advance(&entry.state, target))
            .count()
    }

    fn publish_count(&self) {
        // Read the length under the watch lock so concurrent updates cannot
        // publish a stale count last.
        let connections = &self.inner.connections;
        self.inner.count.send_modify(|n| *n = connections.len());
        metrics::set_active_connections(connections.len());
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn advance(state: &watch::Sender<ConnectionState>, target: ConnectionState) -> bool {
    state.send_if_modified(|current| {
        if *current < target {
            *current = target;
            true
        } else {
            false
        }
    })
}

/// Membership of one connection in the registry. Removes it on drop.
pub struct ConnectionGuard {
    id: ConnectionId,
    peer: SocketAddr,
    registry: ConnectionRegistry,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver for state changes of this connection.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Resolves once a graceful close (or anything stronger) was requested.
    pub async fn closing(&self) {
        wait_until(self.state.clone(), ConnectionState::Closing).await;
    }

    /// Resolves once the connection must be torn down.
    pub async fn destroyed(&self) {
        wait_until(self.state.clone(), ConnectionState::Destroyed).await;
    }

    /// Tear down this connection.
    pub fn destroy(&self) {
        self.registry.destroy(self.id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

async fn wait_until(mut state: watch::Receiver<ConnectionState>, target: ConnectionState) {
    let _ = state.wait_for(|s| *s >= target).await;
}

/// Per-connection data attached to every request served on it.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    guard: Arc<ConnectionGuard>,
    secure: bool,
}

impl ConnectionContext {
    pub fn new(guard: Arc<ConnectionGuard>, secure: bool) -> Self {
        Self { guard, secure }
    }

    pub fn peer(&self) -> SocketAddr {
        self.guard.peer()
    }

    /// Whether the client reached us over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Shared registry membership; holding a clone keeps the connection
    /// registered, e.g. for the lifetime of an upgraded tunnel.
    pub fn guard(&self) -> Arc<ConnectionGuard> {
        Arc::clone(&self.guard)
    }

    /// Tear down the client connection without writing a response.
    pub fn destroy(&self) {
        self.guard.destroy();
    }
}
