//! Connection tracking & graceful draining utilities.
//!
//! Every accepted TCP connection is registered with a lightweight record and
//! removed when its relay task ends. During shutdown the tracker waits for
//! the remaining relays to finish, bounded by a timeout.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use scc::HashMap;
use tokio::time::sleep;

/// Unique identifier for a connection
pub type ConnectionId = u64;

/// Information about an active connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    /// Port of the listener that accepted it.
    pub local_port: u16,
    pub established_at: Instant,
}

impl ConnectionInfo {
    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}

/// Registration handle; dropping it unregisters the connection.
#[derive(Debug)]
pub struct TrackedConnection {
    id: ConnectionId,
    connections: Arc<HashMap<ConnectionId, ConnectionInfo>>,
}

impl TrackedConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        if let Some((_, info)) = self.connections.remove_sync(&self.id) {
            tracing::debug!(
                "Connection unregistered: id={}, age={:?}, total_connections={}",
                self.id,
                info.age(),
                self.connections.len()
            );
        }
    }
}

/// Tracks in-flight connections and provides graceful draining.
#[derive(Clone)]
pub struct ConnectionTracker {
    connections: Arc<HashMap<ConnectionId, ConnectionInfo>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(HashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new connection; keep the returned handle alive for its lifetime.
    pub fn register_connection(&self, remote_addr: SocketAddr, local_port: u16) -> TrackedConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = ConnectionInfo {
            id,
            remote_addr,
            local_port,
            established_at: Instant::now(),
        };
        let _ = self.connections.insert_sync(id, info);

        tracing::debug!(
            "Connection registered: id={}, remote_addr={}, total_connections={}",
            id,
            remote_addr,
            self.connections.len()
        );

        TrackedConnection {
            id,
            connections: self.connections.clone(),
        }
    }

    /// Lookup a connection info record by id.
    pub fn get_connection_info(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections
            .read_sync(&connection_id, |_, info| info.clone())
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Wait until no connection is registered or the timeout elapses.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut check_interval = Duration::from_millis(50);

        while start.elapsed() < timeout {
            if self.connections.is_empty() {
                tracing::info!("All connections drained successfully");
                return true;
            }

            tracing::debug!(
                "Waiting for connections to drain: {} remaining, elapsed: {:?}",
                self.connections.len(),
                start.elapsed()
            );

            sleep(check_interval).await;

            // Exponential backoff up to 1 second
            check_interval = std::cmp::min(check_interval * 2, Duration::from_secs(1));
        }

        if self.connections.is_empty() {
            return true;
        }

        tracing::warn!(
            "Drain timeout exceeded: {} connections still open after {:?}",
            self.connections.len(),
            timeout
        );
        false
    }

    /// Aggregate snapshot statistics.
    pub fn get_stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        self.connections.iter_sync(|_, info| {
            stats.total_connections += 1;
            stats.oldest_connection_age = stats.oldest_connection_age.max(info.age());
            true
        });
        stats
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about current connections
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub oldest_connection_age: Duration,
}
