//! Immutable routing tables built from configuration.
//!
//! HTTP routes are keyed by override path and matched longest-prefix first;
//! gRPC routes are keyed by proto service and matched exactly. A table is
//! never mutated after [`RouteTable::build`]; reloads build a fresh table and
//! swap it in wholesale (see [`GatewayService`](crate::core::GatewayService)).
use std::{collections::HashMap, sync::Arc};

use crate::{
    config::{CorsConfig, GrpcMethodConfig, HttpRouteConfig},
    core::access::{IpFilter, MethodPolicy},
};

/// Configuration invariant violations detected while building a table.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("duplicate http override path '{path}'")]
    DuplicateOverridePath { path: String },

    #[error("duplicate grpc proto service '{service}'")]
    DuplicateProtoService { service: String },
}

#[derive(Debug)]
pub struct HttpRoute {
    pub name: String,
    pub host: String,
    pub override_path: String,
    pub upstream_path: String,
    pub ip_filter: IpFilter,
    pub plugins: Vec<String>,
    pub cors: Option<CorsConfig>,
}

impl HttpRoute {
    fn from_config(route: &HttpRouteConfig) -> Self {
        Self {
            name: route.name.clone(),
            host: route.host.clone(),
            override_path: route.override_path.clone(),
            upstream_path: route.upstream_path.clone(),
            ip_filter: IpFilter::new(route.ip_restriction.iter().cloned()),
            plugins: route.plugins.clone(),
            cors: route.cors.clone(),
        }
    }

    /// Replace the override prefix of `path` with the upstream prefix.
    pub fn rewrite_path(&self, path: &str) -> String {
        match path.strip_prefix(self.override_path.as_str()) {
            Some(rest) => {
                let rewritten = format!("{}{rest}", self.upstream_path);
                // A request line needs a non-empty target.
                if rewritten.is_empty() {
                    "/".to_string()
                } else {
                    rewritten
                }
            }
            None => path.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct GrpcRoute {
    pub name: String,
    pub host: String,
    pub proto_service: String,
    pub methods: MethodPolicy,
    pub ip_filter: IpFilter,
    pub plugins: Vec<String>,
}

impl GrpcRoute {
    fn from_config(method: &GrpcMethodConfig) -> Self {
        Self {
            name: method.name.clone(),
            host: method.host.clone(),
            proto_service: method.proto_service.clone(),
            methods: MethodPolicy::new(method.allow.iter().cloned(), method.disallow.iter().cloned()),
            ip_filter: IpFilter::new(method.ip_restriction.iter().cloned()),
            plugins: method.plugins.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RouteTable {
    http_routes: HashMap<String, Arc<HttpRoute>>,
    /// Override paths ordered longest first; equal lengths keep config order.
    sorted_prefixes: Vec<String>,
    grpc_routes: HashMap<String, Arc<GrpcRoute>>,
    http_definitions: Vec<HttpRouteConfig>,
    grpc_definitions: Vec<GrpcMethodConfig>,
}

impl RouteTable {
    pub fn build(
        http: &[HttpRouteConfig],
        grpc: &[GrpcMethodConfig],
    ) -> Result<Self, RouteTableError> {
        let mut http_routes = HashMap::with_capacity(http.len());
        let mut sorted_prefixes = Vec::with_capacity(http.len());

        for route in http {
            if http_routes.contains_key(&route.override_path) {
                return Err(RouteTableError::DuplicateOverridePath {
                    path: route.override_path.clone(),
                });
            }
            http_routes.insert(
                route.override_path.clone(),
                Arc::new(HttpRoute::from_config(route)),
            );
            sorted_prefixes.push(route.override_path.clone());
        }

        sorted_prefixes.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut grpc_routes = HashMap::with_capacity(grpc.len());
        for method in grpc {
            if grpc_routes.contains_key(&method.proto_service) {
                return Err(RouteTableError::DuplicateProtoService {
                    service: method.proto_service.clone(),
                });
            }
            grpc_routes.insert(
                method.proto_service.clone(),
                Arc::new(GrpcRoute::from_config(method)),
            );
        }

        Ok(Self {
            http_routes,
            sorted_prefixes,
            grpc_routes,
            http_definitions: http.to_vec(),
            grpc_definitions: grpc.to_vec(),
        })
    }

    /// Longest override path that prefixes `path`.
    pub fn match_http(&self, path: &str) -> Option<Arc<HttpRoute>> {
        self.sorted_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
            .and_then(|prefix| self.http_routes.get(prefix))
            .cloned()
    }

    pub fn grpc_route(&self, proto_service: &str) -> Option<Arc<GrpcRoute>> {
        self.grpc_routes.get(proto_service).cloned()
    }

    pub fn sorted_prefixes(&self) -> &[String] {
        &self.sorted_prefixes
    }

    pub fn http_len(&self) -> usize {
        self.http_routes.len()
    }

    pub fn grpc_len(&self) -> usize {
        self.grpc_routes.len()
    }

    /// Route definitions this table was built from, in configuration order.
    pub fn http_definitions(&self) -> &[HttpRouteConfig] {
        &self.http_definitions
    }

    pub fn grpc_definitions(&self) -> &[GrpcMethodConfig] {
        &self.grpc_definitions
    }
}
