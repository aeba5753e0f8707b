pub mod config_providers;
pub mod dispatcher;
pub mod grpc_relay;
pub mod http_relay;
pub mod listener;
pub mod relay; // byte pump shared by both protocols

/// Re-export commonly used types from adapters
pub use config_providers::FileConfigProvider;
pub use dispatcher::ConnectionDispatcher;
pub use listener::ProxyServer;
pub use relay::{RelayStats, relay};
