//! dev-proxy: a development reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                     DEV PROXY                         │
//!                     │                                                       │
//!   Client ───────────┼─▶ net::listener ─▶ http::server ─▶ routing::matcher   │
//!                     │                        │                 │            │
//!                     │                        │ 400/404/502     │ match      │
//!                     │                        ▼                 ▼            │
//!   Client ◀──────────┼──────────── http::response      relay::connector ────┼──▶ Upstream
//!                     │                                   relay::pipe ◀──────┼──── Upstream
//!                     │                                                       │
//!                     │  config · lifecycle · observability (cross-cutting)   │
//!                     └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Startup Order
//! 1. Parse CLI, load config file, apply overrides, validate
//! 2. Initialize logging
//! 3. Build the rule table (its warnings need logging up)
//! 4. Start metrics (if configured) and bind the listener
//! 5. Serve until SIGINT/SIGTERM, then drain

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dev_proxy::config::{parse_route_arg, LogFormat, RouteConfig};
use dev_proxy::lifecycle::{prepare, wait_for_signal, Overrides, Shutdown};
use dev_proxy::net::Listener;
use dev_proxy::observability::{logging, metrics};
use dev_proxy::{ProxyError, ProxyServer, RuleTable};

#[derive(Parser)]
#[command(name = "dev-proxy")]
#[command(about = "Path-prefix reverse proxy for local development", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "DEV_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:3000
    #[arg(short, long, env = "DEV_PROXY_LISTEN")]
    listen: Option<String>,

    /// Forwarding rule PREFIX=URL, may be repeated
    #[arg(short, long = "route", value_name = "PREFIX=URL", value_parser = parse_route)]
    routes: Vec<RouteConfig>,

    /// Log filter, e.g. "debug" or "info,dev_proxy=trace"
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn overrides(self) -> (Option<PathBuf>, Overrides) {
        let overrides = Overrides {
            listen: self.listen,
            routes: self.routes,
            log_level: self.log_level,
            log_format: self.log_format,
        };
        (self.config, overrides)
    }
}

fn parse_route(arg: &str) -> Result<RouteConfig, String> {
    parse_route_arg(arg).map_err(|e| e.to_string())
}

fn parse_log_format(arg: &str) -> Result<LogFormat, String> {
    match arg {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{}', expected pretty or json", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dev-proxy: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ProxyError> {
    let (config_path, overrides) = cli.overrides();
    let config = prepare(config_path.as_deref(), overrides)?;

    logging::init(&config.observability)?;
    let rules = RuleTable::load(&config.routes)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dev-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        connect_ms = config.timeouts.connect_ms,
        idle_secs = config.timeouts.idle_secs,
        rules = rules.len(),
        "Configuration loaded"
    );

    if let Some(address) = &config.observability.metrics_address {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        metrics::init_metrics(addr)?;
    }

    let listener = Listener::bind(&config.listener).await?;
    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => tracing::info!(signal, "Signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for signals, shutting down"),
        }
        trigger.trigger();
    });

    let server = ProxyServer::new(rules, &config);
    server.run(listener, shutdown_rx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
