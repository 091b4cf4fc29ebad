//! Outbound connection establishment.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::routing::Upstream;

/// Opens the outbound stream for a relay.
///
/// The production implementation is [`TcpConnector`]; tests substitute
/// connectors that record or stall connection attempts.
pub trait UpstreamConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, upstream: &Upstream) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP connector with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl UpstreamConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, upstream: &Upstream) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(upstream.socket_target()).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Connect through `connector`, failing with `UpstreamUnreachable` on error or timeout.
pub async fn connect_with_timeout<C>(
    connector: &C,
    upstream: &Upstream,
    timeout: Duration,
) -> Result<C::Stream, ProxyError>
where
    C: UpstreamConnector,
{
    match tokio::time::timeout(timeout, connector.connect(upstream)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamUnreachable {
            upstream: upstream.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamUnreachable {
            upstream: upstream.to_string(),
            reason: format!("connect timed out after {}ms", timeout.as_millis()),
        }),
    }
}
