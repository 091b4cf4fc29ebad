//! Proxy server: accept loop and per-connection handling.
//!
//! # Responsibilities
//! - Accept connections until shutdown is signalled
//! - Read and parse the request line of each connection
//! - Dispatch to the matched upstream or answer 400 / 404 / 502
//! - Drain in-flight connections on shutdown
//! - Observability (per-connection span, outcome metrics)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::read_request_line;
use crate::http::response::{send_and_close, ProxyResponse};
use crate::net::{
    Connection, ConnectionOutcome, ConnectionPermit, ConnectionState, ConnectionTracker, Listener,
    ListenerError,
};
use crate::observability::metrics;
use crate::relay::{Relay, TcpConnector, UpstreamConnector};
use crate::routing::RuleTable;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Read-only state shared by every connection task.
struct ServerState<C> {
    rules: RuleTable,
    relay: Relay<C>,
    request_line_timeout: Duration,
    shutdown_grace: Duration,
    tracker: ConnectionTracker,
}

/// The reverse proxy server.
pub struct ProxyServer<C = TcpConnector> {
    state: Arc<ServerState<C>>,
}

impl ProxyServer<TcpConnector> {
    /// Create a server that reaches upstreams over plain TCP.
    pub fn new(rules: RuleTable, config: &ProxyConfig) -> Self {
        Self::with_connector(TcpConnector, rules, config)
    }
}

impl<C: UpstreamConnector> ProxyServer<C> {
    pub fn with_connector(connector: C, rules: RuleTable, config: &ProxyConfig) -> Self {
        Self {
            state: Arc::new(ServerState {
                rules,
                relay: Relay::with_connector(connector, config),
                request_line_timeout: config.timeouts.request_line(),
                shutdown_grace: config.timeouts.shutdown_grace(),
                tracker: ConnectionTracker::new(),
            }),
        }
    }

    /// Accept connections on `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProxyError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_connections = listener.max_connections(),
            rules = self.state.rules.len(),
            "Proxy server starting"
        );
        for rule in self.state.rules.rules() {
            tracing::info!(
                prefix = %rule.path_prefix(),
                upstream = %rule.upstream(),
                "Forwarding rule"
            );
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Closed) => return Err(ListenerError::Closed.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        self.drain().await;
        tracing::info!("Proxy server stopped");
        Ok(())
    }

    async fn drain(&self) {
        let active = self.state.tracker.active_count();
        if active == 0 {
            return;
        }

        tracing::info!(
            active,
            grace_secs = self.state.shutdown_grace.as_secs(),
            "Draining connections"
        );
        if !self.state.tracker.wait_for_idle(self.state.shutdown_grace).await {
            tracing::warn!(
                remaining = self.state.tracker.active_count(),
                "Grace period elapsed with connections still open"
            );
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let state = Arc::clone(&self.state);
        let guard = state.tracker.track();
        let mut conn = Connection::new(guard.id(), peer);
        let span = tracing::info_span!("connection", id = %conn.id(), peer = %conn.peer());

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;
                metrics::record_connection_opened();

                let outcome = handle_connection(&state, stream, &mut conn).await;
                log_outcome(&outcome);

                metrics::record_outcome(&outcome);
                metrics::record_connection_closed();
            }
            .instrument(span),
        );
    }
}

/// Run one connection to its terminal outcome.
async fn handle_connection<C: UpstreamConnector>(
    state: &ServerState<C>,
    stream: TcpStream,
    conn: &mut Connection,
) -> ConnectionOutcome {
    let mut reader = BufReader::new(stream);

    let received = match tokio::time::timeout(
        state.request_line_timeout,
        read_request_line(&mut reader),
    )
    .await
    {
        Ok(Ok(Some(received))) => received,
        Ok(Ok(None)) => {
            tracing::debug!("Client closed before sending a request line");
            return close_on_error(conn);
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to read request line");
            return close_on_error(conn);
        }
        Err(_) => {
            tracing::debug!(
                timeout_ms = state.request_line_timeout.as_millis() as u64,
                "Timed out waiting for request line"
            );
            return close_on_error(conn);
        }
    };

    let request = match received.parsed {
        Ok(request) => {
            conn.transition(ConnectionState::PathParsed);
            request
        }
        Err(e) => {
            conn.transition(ConnectionState::ParseError);
            tracing::warn!(error = %e, "Malformed request line");
            return reject_error(&mut reader, conn, e.into()).await;
        }
    };

    let Some(rule) = state.rules.lookup(request.path()) else {
        conn.transition(ConnectionState::Unmatched);
        tracing::info!(
            method = %request.method,
            path = %request.path(),
            "No forwarding rule matched"
        );
        return reject(&mut reader, conn, ProxyResponse::NotFound).await;
    };

    conn.transition(ConnectionState::Matched);
    tracing::debug!(
        method = %request.method,
        path = %request.path(),
        prefix = %rule.path_prefix(),
        upstream = %rule.upstream(),
        "Forwarding rule matched"
    );

    // Everything read so far goes to the upstream first.
    let mut preface = received.raw;
    preface.extend_from_slice(reader.buffer());
    let mut stream = reader.into_inner();

    let outbound = match state.relay.connect(rule.upstream()).await {
        Ok(outbound) => outbound,
        Err(e) => {
            metrics::record_connect_failure();
            tracing::warn!(error = %e, "Upstream unreachable");
            return reject_error(&mut stream, conn, e).await;
        }
    };

    conn.transition(ConnectionState::Relaying);
    let result = state.relay.forward(&mut stream, outbound, &preface).await;
    conn.transition(ConnectionState::Closed);

    match result {
        Ok(stats) => ConnectionOutcome::Relayed(stats),
        Err(ProxyError::RelayIo(e)) => {
            metrics::record_relay(&e.stats);
            tracing::debug!(
                error = %e,
                bytes_to_upstream = e.stats.bytes_to_upstream,
                bytes_to_client = e.stats.bytes_to_client,
                "Relay ended with error"
            );
            ConnectionOutcome::ClosedOnError
        }
        Err(e) => {
            tracing::debug!(error = %e, "Relay ended with error");
            ConnectionOutcome::ClosedOnError
        }
    }
}

/// Answer an error that still owes the client a response, or just close.
async fn reject_error<S>(stream: &mut S, conn: &mut Connection, err: ProxyError) -> ConnectionOutcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match err.response() {
        Some(response) => reject(stream, conn, response).await,
        None => {
            tracing::debug!(error = %err, "Closing without a response");
            close_on_error(conn)
        }
    }
}

/// Send a generated response and close.
async fn reject<S>(stream: &mut S, conn: &mut Connection, response: ProxyResponse) -> ConnectionOutcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match send_and_close(stream, response).await {
        Ok(()) => {
            conn.transition(ConnectionState::ResponseSent);
            conn.transition(ConnectionState::Closed);
            ConnectionOutcome::Rejected(response.status())
        }
        Err(e) => {
            tracing::debug!(error = %e, status = response.status(), "Failed to send response");
            close_on_error(conn)
        }
    }
}

fn close_on_error(conn: &mut Connection) -> ConnectionOutcome {
    conn.transition(ConnectionState::Closed);
    ConnectionOutcome::ClosedOnError
}

fn log_outcome(outcome: &ConnectionOutcome) {
    match outcome {
        ConnectionOutcome::Relayed(stats) => tracing::info!(
            bytes_to_upstream = stats.bytes_to_upstream,
            bytes_to_client = stats.bytes_to_client,
            duration_ms = stats.duration.as_millis() as u64,
            "Relay finished"
        ),
        ConnectionOutcome::Rejected(status) => {
            tracing::info!(status = *status, "Connection rejected")
        }
        ConnectionOutcome::ClosedOnError => tracing::debug!("Connection closed on error"),
    }
}
