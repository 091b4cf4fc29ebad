//! Error types for the proxy.
//!
//! Startup errors (`Config`, `Logging`, `Metrics`, `Listener`) end the
//! process. Everything else is scoped to a single connection and handled
//! inside that connection's task.

use thiserror::Error;

use crate::config::ConfigError;
use crate::http::request::ParseError;
use crate::http::response::ProxyResponse;
use crate::net::listener::ListenerError;
use crate::relay::RelayError;

/// Errors that can occur in the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics setup failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("bad request: {0}")]
    Parse(#[from] ParseError),

    #[error("upstream {upstream} unreachable: {reason}")]
    UpstreamUnreachable { upstream: String, reason: String },

    #[error("relay I/O error: {0}")]
    RelayIo(#[source] RelayError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// The response owed to the client for this error, if any.
    ///
    /// Only errors raised before any upstream bytes flow can be answered.
    pub fn response(&self) -> Option<ProxyResponse> {
        match self {
            ProxyError::Parse(_) => Some(ProxyResponse::BadRequest),
            ProxyError::UpstreamUnreachable { .. } => Some(ProxyResponse::BadGateway),
            _ => None,
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
