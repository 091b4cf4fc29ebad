//! Forwarding rules and the rule table.
//!
//! # Responsibilities
//! - Parse upstream URLs into connectable host/port targets
//! - Validate the rule set once at startup
//! - Keep rules in declaration order for tie-breaking
//!
//! # Design Decisions
//! - Immutable after construction (shared across connections without locks)
//! - Only plain-text schemes are accepted; TLS origination is not supported
//! - Upstream paths are ignored: request targets are relayed verbatim

use std::fmt;

use thiserror::Error;
use url::{Host, Url};

use crate::config::{ConfigError, RouteConfig};

/// Schemes whose traffic can be relayed as plain bytes.
const SUPPORTED_SCHEMES: &[&str] = &["http", "ws"];

/// Reasons an upstream URL is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamUrlError {
    #[error("missing scheme (expected e.g. http://host:port)")]
    MissingScheme,

    #[error("missing host")]
    MissingHost,

    #[error("no port given and scheme '{0}' has no default port")]
    MissingPort(String),

    #[error("unsupported scheme '{0}' (only http and ws are relayed)")]
    UnsupportedScheme(String),

    #[error("malformed URL: {0}")]
    Malformed(url::ParseError),
}

/// A connectable upstream target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    url: Url,
    host: String,
    port: u16,
}

impl Upstream {
    /// Parse and validate an upstream URL.
    pub fn parse(input: &str) -> Result<Self, UpstreamUrlError> {
        let url = Url::parse(input).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => UpstreamUrlError::MissingScheme,
            url::ParseError::EmptyHost => UpstreamUrlError::MissingHost,
            other => UpstreamUrlError::Malformed(other),
        })?;

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(UpstreamUrlError::MissingHost),
        };

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(UpstreamUrlError::UnsupportedScheme(url.scheme().to_string()));
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| UpstreamUrlError::MissingPort(url.scheme().to_string()))?;

        Ok(Self { url, host, port })
    }

    /// Host name or IP literal (IPv6 without brackets), suitable for connecting.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The URL as configured (after normalization).
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `(host, port)` pair accepted by `TcpStream::connect`.
    pub fn socket_target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A single path-prefix forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    path_prefix: String,
    upstream: Upstream,
}

impl Rule {
    pub fn new(path_prefix: impl Into<String>, upstream: Upstream) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            upstream,
        }
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Plain, case-sensitive prefix comparison with no segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }
}

/// Ordered, immutable set of forwarding rules.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Build the table from configured routes, preserving declaration order.
    ///
    /// Fails if the route list is empty or any upstream URL is invalid.
    pub fn load(routes: &[RouteConfig]) -> Result<Self, ConfigError> {
        if routes.is_empty() {
            return Err(ConfigError::EmptyRuleTable);
        }

        let rules = routes
            .iter()
            .map(|route| {
                let upstream =
                    Upstream::parse(&route.upstream).map_err(|reason| ConfigError::InvalidUpstream {
                        prefix: route.path_prefix.clone(),
                        upstream: route.upstream.clone(),
                        reason,
                    })?;

                if !route.path_prefix.is_empty() && !route.path_prefix.starts_with('/') {
                    tracing::warn!(
                        prefix = %route.path_prefix,
                        "Path prefix does not start with '/'; it will only match absolute-form targets"
                    );
                }
                if upstream.url().path() != "/" {
                    tracing::warn!(
                        prefix = %route.path_prefix,
                        upstream = %route.upstream,
                        "Upstream path is ignored; request targets are forwarded unchanged"
                    );
                }

                Ok(Rule::new(route.path_prefix.clone(), upstream))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { rules })
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
