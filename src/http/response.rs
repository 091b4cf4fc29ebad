//! Responses generated by the proxy itself.
//!
//! # Responsibilities
//! - Render the fixed 400 / 404 / 502 responses
//! - Write them and close the client connection cleanly
//!
//! # Design Decisions
//! - Bodies are fixed strings so responses are deterministic
//! - Every generated response carries `Connection: close`
//! - After writing, unread client input is drained briefly so the client
//!   sees the response rather than a connection reset

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on client bytes discarded while closing.
const DRAIN_LIMIT: u64 = 64 * 1024;

/// Upper bound on time spent draining while closing.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A response the proxy sends without contacting any upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyResponse {
    /// Malformed request line.
    BadRequest,
    /// No forwarding rule matches the request path.
    NotFound,
    /// The matched upstream could not be reached.
    BadGateway,
}

impl ProxyResponse {
    pub fn status(&self) -> u16 {
        match self {
            ProxyResponse::BadRequest => 400,
            ProxyResponse::NotFound => 404,
            ProxyResponse::BadGateway => 502,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ProxyResponse::BadRequest => "Bad Request",
            ProxyResponse::NotFound => "Not Found",
            ProxyResponse::BadGateway => "Bad Gateway",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            ProxyResponse::BadRequest => "Bad Request: malformed request line\n",
            ProxyResponse::NotFound => "Not Found: no forwarding rule matches this path\n",
            ProxyResponse::BadGateway => "Bad Gateway: upstream is unreachable\n",
        }
    }

    /// Full HTTP/1.1 message bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body();
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            self.status(),
            self.reason(),
            body.len(),
            body
        )
        .into_bytes()
    }
}

/// Write `response`, half-close, then drain what the client still sends.
///
/// Errors while draining are ignored; the response has already been written.
pub async fn send_and_close<S>(stream: &mut S, response: ProxyResponse) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&response.to_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    let mut unread = (&mut *stream).take(DRAIN_LIMIT);
    let mut sink = tokio::io::sink();
    let drain = tokio::io::copy(&mut unread, &mut sink);
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
    Ok(())
}
