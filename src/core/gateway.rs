//! Core gateway orchestration service.
//!
//! The `GatewayService` pairs the fixed proxy settings (timeouts, health URI,
//! forwarded-IP header) with the current [`RouteTable`]. The table sits behind
//! an `ArcSwap`: connection tasks take a snapshot per lookup, and route
//! updates build a complete new table and publish it in one atomic store, so
//! in-flight relays are never disturbed by a reload.
//!
//! This layer does no socket I/O and stays easily testable in isolation.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::{
    config::{GrpcMethodConfig, HttpRouteConfig, ServerConfig},
    core::route_table::{RouteTable, RouteTableError},
};

/// Settings that stay fixed for the lifetime of the listeners.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub health_uri: String,
    pub http_timeout: Duration,
    pub grpc_timeout: Duration,
    pub ip_forwarded_header: String,
}

impl ProxySettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            health_uri: config.http.health_uri.clone(),
            http_timeout: Duration::from_secs(config.http.timeout),
            grpc_timeout: Duration::from_secs(config.grpc.timeout),
            ip_forwarded_header: config.ip_forwarded_header.clone(),
        }
    }
}

/// Route change notification from a discovery source.
#[derive(Debug, Clone)]
pub enum RouteEvent {
    /// Add an HTTP route or replace the one with the same override path.
    UpsertHttp(HttpRouteConfig),
    /// Add a gRPC route or replace the one with the same proto service.
    UpsertGrpc(GrpcMethodConfig),
    RemoveHttp { override_path: String },
    RemoveGrpc { proto_service: String },
    /// Swap in a complete set of definitions (config file reload).
    Replace {
        http: Vec<HttpRouteConfig>,
        grpc: Vec<GrpcMethodConfig>,
    },
}

pub struct GatewayService {
    settings: ProxySettings,
    routes: ArcSwap<RouteTable>,
    /// Serializes writers; readers never take it.
    update_lock: Mutex<()>,
}

impl GatewayService {
    /// Build the service and its first route table.
    ///
    /// A duplicate override path or proto service is a configuration
    /// invariant violation and is returned to the caller, which must abort
    /// startup.
    pub fn new(config: &ServerConfig) -> Result<Self, RouteTableError> {
        let table = RouteTable::build(&config.http.route_maps, &config.grpc.method_maps)?;
        Ok(Self::with_table(ProxySettings::from_config(config), table))
    }

    pub fn with_table(settings: ProxySettings, table: RouteTable) -> Self {
        for prefix in table.sorted_prefixes() {
            tracing::debug!(override_path = %prefix, "registered http route");
        }
        Self {
            settings,
            routes: ArcSwap::from_pointee(table),
            update_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Current route table snapshot.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    /// Apply one route event. On failure the previous table stays live.
    pub fn apply(&self, event: RouteEvent) -> Result<(), RouteTableError> {
        let _guard = self
            .update_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.routes.load();
        let mut http = current.http_definitions().to_vec();
        let mut grpc = current.grpc_definitions().to_vec();

        match event {
            RouteEvent::UpsertHttp(route) => {
                match http
                    .iter_mut()
                    .find(|r| r.override_path == route.override_path)
                {
                    Some(existing) => *existing = route,
                    None => http.push(route),
                }
            }
            RouteEvent::UpsertGrpc(method) => {
                match grpc
                    .iter_mut()
                    .find(|m| m.proto_service == method.proto_service)
                {
                    Some(existing) => *existing = method,
                    None => grpc.push(method),
                }
            }
            RouteEvent::RemoveHttp { override_path } => {
                http.retain(|r| r.override_path != override_path);
            }
            RouteEvent::RemoveGrpc { proto_service } => {
                grpc.retain(|m| m.proto_service != proto_service);
            }
            RouteEvent::Replace {
                http: new_http,
                grpc: new_grpc,
            } => {
                http = new_http;
                grpc = new_grpc;
            }
        }

        let table = RouteTable::build(&http, &grpc)?;
        tracing::info!(
            http_routes = table.http_len(),
            grpc_routes = table.grpc_len(),
            "route table updated"
        );
        self.routes.store(Arc::new(table));
        Ok(())
    }

    /// Drain route events until every sender is dropped.
    pub async fn run_route_events(self: Arc<Self>, mut events: mpsc::Receiver<RouteEvent>) {
        tracing::info!("Route event consumer started.");
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "received route event");
            if let Err(e) = self.apply(event) {
                tracing::error!(error = %e, "Rejected route update. Keeping current routes.");
            }
        }
        tracing::info!("Route event consumer is shutting down.");
    }
}
