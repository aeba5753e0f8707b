//! Per-connection error kinds.
//!
//! Every variant is local to the connection that produced it: the dispatcher
//! logs it, answers (HTTP only) or drops the socket, and moves on. Nothing in
//! here is ever fatal to the process; startup invariants live in
//! [`RouteTableError`](crate::core::route_table::RouteTableError).
use std::io;

/// Result alias used by the relay paths.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The initial bytes could not be parsed as a request line.
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// No override path or proto service matched.
    #[error("no route for '{target}'")]
    RouteNotFound { target: String },

    /// IP or method policy rejected the request.
    #[error("access denied for '{target}': {reason}")]
    AccessDenied { target: String, reason: String },

    #[error("upstream {host} unavailable: {source}")]
    UpstreamUnavailable {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Mid-stream I/O failure other than a productive timeout.
    #[error("relay failed: {source}")]
    RelayFailure {
        #[source]
        source: io::Error,
    },

    /// The HTTP/2 preamble ended or broke before a `:path` was seen.
    #[error("http/2 protocol error: {reason}")]
    ProtocolError { reason: String },
}

impl ProxyError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }

    pub fn not_found(target: impl Into<String>) -> Self {
        Self::RouteNotFound {
            target: target.into(),
        }
    }

    pub fn denied(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolError {
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => "malformed_request",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::AccessDenied { .. } => "access_denied",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::RelayFailure { .. } => "relay_failure",
            Self::ProtocolError { .. } => "protocol_error",
        }
    }
}
