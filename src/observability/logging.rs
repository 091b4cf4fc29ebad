//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Pick the log level from `RUST_LOG` or the configuration
//! - Select pretty or JSON output
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over the configured level

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Build the level filter: `RUST_LOG` if set and valid, otherwise the configured level.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_used() {
        let config = ObservabilityConfig {
            log_level: "dev_proxy=trace".into(),
            ..Default::default()
        };
        // RUST_LOG may be set by the test harness; only assert when it is absent.
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter(&config).to_string(), "dev_proxy=trace");
        }
    }

    #[test]
    fn invalid_level_falls_back_to_info() {
        let config = ObservabilityConfig {
            log_level: "dev_proxy=loud".into(),
            ..Default::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter(&config).to_string(), "info");
        }
    }
}
