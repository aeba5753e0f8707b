//! Switchyard - a raw-TCP reverse proxy for HTTP/1.x and gRPC.
//!
//! Switchyard accepts plain TCP connections, sniffs the first bytes to tell
//! HTTP/1.x from prior-knowledge HTTP/2 (gRPC), picks an upstream from a route
//! table and then relays bytes in both directions without terminating the
//! protocol. HTTP requests are routed by longest path prefix and have their
//! request-line path rewritten in place; gRPC calls are routed by proto
//! service, read far enough to learn the `:path`, and replayed untouched.
//!
//! # Features
//! - One or two listeners (HTTP and gRPC may share a port)
//! - Built-in health check answered without touching any upstream
//! - Per-route source IP allow-lists (exact IPs or CIDR networks)
//! - Per-service gRPC method allow / disallow policies
//! - Route hot-swap through `RouteEvent`s and config file watching
//! - Structured logging via `tracing`, graceful drain on SIGINT / SIGTERM
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchyard::{ConnectionDispatcher, ConnectionTracker, GatewayService, GracefulShutdown, ProxyServer};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = switchyard::config::load_config(Some("switchyard.yaml")).await?;
//! let gateway = Arc::new(GatewayService::new(&cfg)?);
//! let dispatcher = Arc::new(ConnectionDispatcher::new(gateway));
//! let tracker = Arc::new(ConnectionTracker::new());
//! let shutdown = GracefulShutdown::new();
//! let server = ProxyServer::bind(&cfg, dispatcher, tracker).await?;
//! server.run(shutdown.shutdown_token()).await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (socket and file
//! I/O) while keeping routing, sniffing and frame parsing inside `core`,
//! which never touches a socket.
//!
//! # Error Handling
//! Per-connection failures are `core::ProxyError` values that are logged and
//! never escape the connection task. Process-level code returns
//! `eyre::Result<T>` with `WrapErr` context.
//!
//! # Concurrency & Data Structures
//! The live route table is published through `arc_swap::ArcSwap`; connection
//! bookkeeping uses `scc::HashMap`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{ConnectionDispatcher, FileConfigProvider, ProxyServer},
    core::{GatewayService, RouteEvent},
    ports::ConfigProvider,
    utils::{ConnectionTracker, GracefulShutdown},
};
