//! Shutdown coordination for the proxy.
//!
//! # Draining
//! ```text
//! Running ──signal──▶ Draining ──all connections closed──▶ Terminated (exit 0)
//!                        │
//!                        └─grace elapsed─▶ destroy remaining ──▶ Terminated (exit 1)
//! ```

use std::process::ExitCode;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::ShutdownConfig;
use crate::net::ConnectionRegistry;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that long-running tasks and tests can use to
/// trigger or await shutdown.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Future that resolves once `trigger` is called.
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still waiting).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide lifecycle. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Terminated,
}

/// How long draining may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// Time after the signal before open connections are destroyed.
    pub grace: Duration,
    /// Time after the signal by which draining gives up.
    pub deadline: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            deadline: Duration::from_secs(10),
        }
    }
}

impl From<&ShutdownConfig> for DrainPolicy {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            grace: Duration::from_secs(config.grace_secs),
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }
}

/// How draining ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every connection closed on its own within the grace period.
    Graceful,
    /// Connections had to be destroyed, or the deadline elapsed.
    Forced,
}

impl Termination {
    pub fn exit_code(self) -> u8 {
        match self {
            Termination::Graceful => 0,
            Termination::Forced => 1,
        }
    }
}

impl From<Termination> for ExitCode {
    fn from(termination: Termination) -> Self {
        ExitCode::from(termination.exit_code())
    }
}

/// Drain every registered connection.
///
/// Idle connections close right away and busy ones after their in-flight
/// request. Whatever is still open when the grace period ends is destroyed.
pub async fn drain(registry: &ConnectionRegistry, policy: DrainPolicy) -> Termination {
    let deadline = Instant::now() + policy.deadline;

    let closing = registry.close_all();
    tracing::info!(
        connections = closing,
        grace = ?policy.grace,
        "Received kill signal, shutting down gracefully"
    );

    if timeout(policy.grace, registry.wait_empty()).await.is_ok() {
        tracing::info!("Closed out remaining connections");
        return Termination::Graceful;
    }

    let destroyed = registry.destroy_all();
    tracing::warn!(
        connections = destroyed,
        peers = ?registry.peers(),
        "Could not close connections in time, forcefully shutting down"
    );

    if timeout_at(deadline, registry.wait_empty()).await.is_err() {
        tracing::error!(
            remaining = registry.len(),
            "Shutdown deadline elapsed with connections still open"
        );
    }
    Termination::Forced
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn shutdown_signal_resolves_on_trigger() {
        let shutdown = Shutdown::new();
        let signal = tokio::spawn(shutdown.signal());
        assert_eq!(shutdown.receiver_count(), 1);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .expect("signal fired")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_drains_immediately() {
        let registry = ConnectionRegistry::new();
        let start = Instant::now();
        assert_eq!(drain(&registry, DrainPolicy::default()).await, Termination::Graceful);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_connections_drain_gracefully() {
        let registry = ConnectionRegistry::new();
        for i in 0..3 {
            let guard = registry.insert(peer(5000 + i));
            tokio::spawn(async move {
                guard.closing().await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                drop(guard);
            });
        }

        let termination = drain(&registry, DrainPolicy::default()).await;
        assert_eq!(termination, Termination::Graceful);
        assert_eq!(termination.exit_code(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_connection_is_destroyed_after_grace() {
        let registry = ConnectionRegistry::new();
        let guard = registry.insert(peer(6000));
        let holder = tokio::spawn(async move {
            guard.destroyed().await;
            drop(guard);
        });

        let start = Instant::now();
        let termination = drain(&registry, DrainPolicy::default()).await;
        assert_eq!(termination, Termination::Forced);
        assert_eq!(termination.exit_code(), 1);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(10));
        holder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_connection_hits_deadline() {
        let registry = ConnectionRegistry::new();
        let _stuck = registry.insert(peer(7000));

        let start = Instant::now();
        let policy = DrainPolicy {
            grace: Duration::from_secs(2),
            deadline: Duration::from_secs(4),
        };
        assert_eq!(drain(&registry, policy).await, Termination::Forced);
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
