//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer sizes, connection limits)
//! - Check that addresses and log directives parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Forwarding rules are validated when the rule table is built, not here

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ProxyConfig;

/// Smallest relay buffer accepted.
pub const MIN_BUFFER_SIZE: usize = 512;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "timeouts.connect_ms").
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.listener.bind_address.parse::<SocketAddr>() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address: {}", config.listener.bind_address, e),
        ));
    }

    let max = config.listener.max_connections;
    if max == 0 || max > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::new(
            "listener.max_connections",
            format!("must be between 1 and {}", Semaphore::MAX_PERMITS),
        ));
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than 0"));
    }

    if config.timeouts.request_line_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_line_ms", "must be greater than 0"));
    }

    if config.relay.buffer_size < MIN_BUFFER_SIZE {
        errors.push(ValidationError::new(
            "relay.buffer_size",
            format!("must be at least {} bytes", MIN_BUFFER_SIZE),
        ));
    }

    if let Err(e) = EnvFilter::try_new(&config.observability.log_level) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("invalid filter directive: {}", e),
        ));
    }

    if let Some(addr) = &config.observability.metrics_address {
        if let Err(e) = addr.parse::<SocketAddr>() {
            errors.push(ValidationError::new(
                "observability.metrics_address",
                format!("'{}' is not a socket address: {}", addr, e),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
