//! Connection relay subsystem.
//!
//! # Data Flow
//! ```text
//! Matched rule + inbound stream
//!     → connector.rs (outbound connect, bounded by connect timeout)
//!         → failure: UpstreamUnreachable (caller answers 502)
//!     → pipe.rs (replay preface, copy both directions, half-close on EOF)
//!         → failure: RelayIo (both sides closed, no response)
//!     → RelayStats
//! ```

pub mod connector;
pub mod pipe;

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::routing::Upstream;

pub use connector::{connect_with_timeout, TcpConnector, UpstreamConnector};
pub use pipe::{pipe, RelayError, RelaySettings, RelayStats};

/// Connects to upstreams and pipes bytes for matched connections.
#[derive(Debug)]
pub struct Relay<C = TcpConnector> {
    connector: C,
    connect_timeout: Duration,
    settings: RelaySettings,
}

impl Relay<TcpConnector> {
    /// Relay using plain TCP and the configured timeouts.
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::with_connector(TcpConnector, config)
    }
}

impl<C: UpstreamConnector> Relay<C> {
    pub fn with_connector(connector: C, config: &ProxyConfig) -> Self {
        Self {
            connector,
            connect_timeout: config.timeouts.connect(),
            settings: RelaySettings {
                buffer_size: config.relay.buffer_size,
                idle_timeout: config.timeouts.idle(),
            },
        }
    }

    /// Open the outbound connection to `upstream`.
    pub async fn connect(&self, upstream: &Upstream) -> Result<C::Stream, ProxyError> {
        connect_with_timeout(&self.connector, upstream, self.connect_timeout).await
    }

    /// Pipe bytes between `inbound` and an already connected `outbound`.
    ///
    /// On failure the `RelayIo` error still carries the bytes moved so far.
    pub async fn forward<I>(
        &self,
        inbound: &mut I,
        outbound: C::Stream,
        preface: &[u8],
    ) -> Result<RelayStats, ProxyError>
    where
        I: AsyncRead + AsyncWrite + Unpin,
    {
        pipe(inbound, outbound, preface, &self.settings)
            .await
            .map_err(ProxyError::RelayIo)
    }

    /// Connect to `upstream` and pipe bytes until both directions finish.
    ///
    /// The inbound stream is borrowed so the caller can still answer on it
    /// when this fails with `UpstreamUnreachable`.
    pub async fn relay<I>(
        &self,
        inbound: &mut I,
        upstream: &Upstream,
        preface: &[u8],
    ) -> Result<RelayStats, ProxyError>
    where
        I: AsyncRead + AsyncWrite + Unpin,
    {
        let outbound = self.connect(upstream).await?;
        tracing::debug!(upstream = %upstream, "Upstream connected, relaying");
        self.forward(inbound, outbound, preface).await
    }
}
