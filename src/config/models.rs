//! Configuration data structures for Switchyard.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files and
//! to `SWITCHYARD__*` environment overrides. They are serde-friendly and carry
//! defaults so a minimal config only needs the routes.
use serde::{Deserialize, Serialize};

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Interface both listeners bind to.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub grpc: GrpcConfig,
    /// Header carrying the original client IP when running behind another proxy.
    #[serde(default)]
    pub ip_forwarded_header: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// How long in-flight relays may keep running after a shutdown signal.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            http: HttpConfig::default(),
            grpc: GrpcConfig::default(),
            ip_forwarded_header: String::new(),
            logging: LoggingConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Whether gRPC traffic shares the HTTP listener.
    pub fn shares_port(&self) -> bool {
        self.grpc.port == self.http.port
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    /// Upstream read deadline in seconds.
    pub timeout: u64,
    pub health_uri: String,
    pub route_maps: Vec<HttpRouteConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timeout: 30,
            health_uri: "/healthz".to_string(),
            route_maps: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct HttpRouteConfig {
    #[serde(default)]
    pub name: String,
    /// Upstream `host:port`.
    pub host: String,
    pub override_path: String,
    #[serde(default)]
    pub upstream_path: String,
    /// Reserved; plugins are carried but never executed.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Reserved; CORS policy is carried but not enforced.
    #[serde(default)]
    pub cors: Option<CorsConfig>,
    #[serde(default)]
    pub ip_restriction: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
    pub credentials: bool,
    pub preflight_continue: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GrpcConfig {
    pub port: u16,
    /// Reserved; parsed but has no effect on relaying.
    pub keep_connection: bool,
    /// Upstream read deadline in seconds.
    pub timeout: u64,
    pub method_maps: Vec<GrpcMethodConfig>,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            keep_connection: false,
            timeout: 30,
            method_maps: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct GrpcMethodConfig {
    #[serde(default)]
    pub name: String,
    /// Upstream `host:port`.
    pub host: String,
    /// Fully qualified service name, e.g. `pkg.Greeter`.
    pub proto_service: String,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub disallow: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub ip_restriction: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}
