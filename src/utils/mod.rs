pub mod connection_tracker;
pub mod graceful_shutdown;

pub use connection_tracker::{ConnectionInfo, ConnectionStats, ConnectionTracker, TrackedConnection};
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
