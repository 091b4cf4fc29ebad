//! Configuration loading from disk and the command line.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::{ProxyConfig, RouteConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::UpstreamUrlError;

/// Startup-fatal configuration errors. The process must not start with any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("no forwarding rules configured")]
    EmptyRuleTable,

    #[error("invalid upstream '{upstream}' for prefix '{prefix}': {reason}")]
    InvalidUpstream {
        prefix: String,
        upstream: String,
        #[source]
        reason: UpstreamUrlError,
    },

    #[error("invalid route argument '{0}', expected PREFIX=URL")]
    InvalidRouteArg(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Parse a `PREFIX=URL` command-line route.
///
/// Only the first `=` separates the two halves, so upstream URLs may carry
/// query strings.
pub fn parse_route_arg(arg: &str) -> Result<RouteConfig, ConfigError> {
    match arg.split_once('=') {
        Some((prefix, upstream)) if !upstream.is_empty() => {
            Ok(RouteConfig::new(prefix, upstream))
        }
        _ => Err(ConfigError::InvalidRouteArg(arg.to_string())),
    }
}
