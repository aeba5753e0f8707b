use std::{collections::HashSet, net::IpAddr};

use crate::{
    config::models::{GrpcMethodConfig, HttpRouteConfig, ServerConfig},
    core::access::IpNetwork,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the whole configuration, reporting every problem at once.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let errors = Self::collect_errors(config);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(&errors),
            })
        }
    }

    /// Every individual problem found in `config`.
    pub fn collect_errors(config: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        Self::validate_port(config.http.port, "http.port", &mut errors);
        Self::validate_port(config.grpc.port, "grpc.port", &mut errors);
        Self::validate_timeout(config.http.timeout, "http.timeout", &mut errors);
        Self::validate_timeout(config.grpc.timeout, "grpc.timeout", &mut errors);

        if !config.http.health_uri.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "http.health_uri".to_string(),
                message: format!("'{}' must start with '/'", config.http.health_uri),
            });
        }

        if config.listen_host.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "listen_host".to_string(),
            });
        }

        for route in &config.http.route_maps {
            Self::validate_http_route(route, &mut errors);
        }
        for method in &config.grpc.method_maps {
            Self::validate_grpc_method(method, &mut errors);
        }

        Self::check_route_conflicts(config, &mut errors);
        errors
    }

    fn validate_port(port: u16, field: &str, errors: &mut Vec<ValidationError>) {
        if port == 0 {
            errors.push(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Port must be non-zero".to_string(),
            });
        }
    }

    fn validate_timeout(secs: u64, field: &str, errors: &mut Vec<ValidationError>) {
        if secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: field.to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }
    }

    fn validate_http_route(route: &HttpRouteConfig, errors: &mut Vec<ValidationError>) {
        let ctx = format!("http route '{}'", route.override_path);

        if !route.override_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{ctx} override_path"),
                message: "Override paths must start with '/'".to_string(),
            });
        }
        if !route.upstream_path.is_empty() && !route.upstream_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{ctx} upstream_path"),
                message: "Upstream paths must be empty or start with '/'".to_string(),
            });
        }
        if let Err(e) = Self::validate_host(&route.host, &ctx) {
            errors.push(e);
        }
        Self::validate_ip_restriction(&route.ip_restriction, &ctx, errors);
    }

    fn validate_grpc_method(method: &GrpcMethodConfig, errors: &mut Vec<ValidationError>) {
        let ctx = format!("grpc service '{}'", method.proto_service);

        if method.proto_service.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("grpc method map '{}' proto_service", method.name),
            });
        }
        if let Err(e) = Self::validate_host(&method.host, &ctx) {
            errors.push(e);
        }
        Self::validate_ip_restriction(&method.ip_restriction, &ctx, errors);
    }

    /// Upstream hosts are dialed as-is, so they must be `host:port`.
    fn validate_host(host: &str, ctx: &str) -> ValidationResult<()> {
        let field = format!("{ctx} host");
        if host.is_empty() {
            return Err(ValidationError::MissingField { field });
        }
        if host.contains("://") {
            return Err(ValidationError::InvalidField {
                field,
                message: format!("'{host}' should not contain a scheme, use 'host:port'"),
            });
        }
        match host.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0) => {
                Ok(())
            }
            _ => Err(ValidationError::InvalidField {
                field,
                message: format!("'{host}' must be in 'host:port' form"),
            }),
        }
    }

    /// Entries are plain IP addresses or CIDR networks.
    fn validate_ip_restriction(entries: &[String], ctx: &str, errors: &mut Vec<ValidationError>) {
        for entry in entries {
            let valid = if entry.contains('/') {
                IpNetwork::parse(entry).is_ok()
            } else {
                entry.parse::<IpAddr>().is_ok()
            };
            if !valid {
                errors.push(ValidationError::InvalidField {
                    field: format!("{ctx} ip_restriction"),
                    message: format!("'{entry}' is not an IP address or CIDR network"),
                });
            }
        }
    }

    fn check_route_conflicts(config: &ServerConfig, errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for route in &config.http.route_maps {
            if !seen.insert(route.override_path.as_str()) {
                errors.push(ValidationError::RouteConflict {
                    message: format!("Duplicate override path '{}'", route.override_path),
                });
            }
        }

        let mut seen = HashSet::new();
        for method in &config.grpc.method_maps {
            if !seen.insert(method.proto_service.as_str()) {
                errors.push(ValidationError::RouteConflict {
                    message: format!("Duplicate proto service '{}'", method.proto_service),
                });
            }
        }
    }

    fn format_multiple_errors(errors: &[ValidationError]) -> String {
        if let [single] = errors {
            return single.to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
