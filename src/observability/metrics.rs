//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter)
//! - `proxy_connections_active` (gauge)
//! - `proxy_outcomes_total` (counter): by `outcome`
//! - `proxy_responses_total` (counter): canned responses by `status`
//! - `proxy_relay_bytes_total` (counter): by `direction`
//! - `proxy_relay_duration_seconds` (histogram)
//! - `proxy_upstream_connect_failures_total` (counter)
//!
//! Without an installed exporter every call here is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::ConnectionOutcome;
use crate::relay::RelayStats;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened() {
    counter!("proxy_connections_accepted_total").increment(1);
    gauge!("proxy_connections_active").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("proxy_connections_active").decrement(1.0);
}

/// Record the terminal outcome of one connection.
pub fn record_outcome(outcome: &ConnectionOutcome) {
    counter!("proxy_outcomes_total", "outcome" => outcome.label()).increment(1);

    match outcome {
        ConnectionOutcome::Relayed(stats) => record_relay(stats),
        ConnectionOutcome::Rejected(status) => {
            counter!("proxy_responses_total", "status" => status.to_string()).increment(1);
        }
        ConnectionOutcome::ClosedOnError => {}
    }
}

/// Record the bytes and duration of a relay, whether it finished cleanly or not.
pub fn record_relay(stats: &RelayStats) {
    counter!("proxy_relay_bytes_total", "direction" => "to_upstream")
        .increment(stats.bytes_to_upstream);
    counter!("proxy_relay_bytes_total", "direction" => "to_client")
        .increment(stats.bytes_to_client);
    histogram!("proxy_relay_duration_seconds").record(stats.duration.as_secs_f64());
}

pub fn record_connect_failure() {
    counter!("proxy_upstream_connect_failures_total").increment(1);
}
