//! Startup orchestration.
//!
//! # Responsibilities
//! - Load configuration from a file or defaults
//! - Layer command-line overrides on top
//! - Validate the result
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Validation runs after overrides so CLI values are checked too
//! - The rule table is built by the caller once logging is up, so its
//!   load-time warnings are visible

use std::path::Path;

use crate::config::{
    load_config, validate_config, ConfigError, LogFormat, ProxyConfig, RouteConfig,
};

/// Values from the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    /// Appended after the file's routes.
    pub routes: Vec<RouteConfig>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl Overrides {
    pub fn apply(self, config: &mut ProxyConfig) {
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        config.routes.extend(self.routes);
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
    }
}

/// Load, override, and validate the configuration.
pub fn prepare(config_path: Option<&Path>, overrides: Overrides) -> Result<ProxyConfig, ConfigError> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RuleTable;

    #[test]
    fn cli_routes_are_enough_without_a_file() {
        let overrides = Overrides {
            routes: vec![RouteConfig::new("/books", "http://127.0.0.1:5000/")],
            ..Default::default()
        };
        let config = prepare(None, overrides).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(RuleTable::load(&config.routes).unwrap().len(), 1);
    }

    #[test]
    fn no_routes_fails_when_building_the_rule_table() {
        let config = prepare(None, Overrides::default()).unwrap();
        assert!(matches!(
            RuleTable::load(&config.routes),
            Err(ConfigError::EmptyRuleTable)
        ));
    }

    #[test]
    fn overrides_replace_file_values_and_append_routes() {
        let mut config = ProxyConfig {
            routes: vec![RouteConfig::new("/a", "http://127.0.0.1:1")],
            ..Default::default()
        };
        Overrides {
            listen: Some("0.0.0.0:8080".into()),
            routes: vec![RouteConfig::new("/b", "http://127.0.0.1:2")],
            log_level: Some("debug".into()),
            log_format: Some(LogFormat::Json),
        }
        .apply(&mut config);

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, LogFormat::Json);
        let prefixes: Vec<_> = config.routes.iter().map(|r| r.path_prefix.as_str()).collect();
        assert_eq!(prefixes, ["/a", "/b"]);
    }

    #[test]
    fn invalid_listen_override_is_rejected() {
        let overrides = Overrides {
            listen: Some("not-an-address".into()),
            routes: vec![RouteConfig::new("/", "http://127.0.0.1:5000")],
            ..Default::default()
        };
        assert!(matches!(
            prepare(None, overrides),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = prepare(Some(Path::new("/nonexistent/dev-proxy.toml")), Overrides::default());
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
