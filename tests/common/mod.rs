//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dev_proxy::config::{ProxyConfig, RouteConfig};
use dev_proxy::lifecycle::Shutdown;
use dev_proxy::net::Listener;
use dev_proxy::relay::{TcpConnector, UpstreamConnector};
use dev_proxy::routing::{RuleTable, Upstream};
use dev_proxy::{ProxyError, ProxyServer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Upper bound for any single wait in the integration tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A running proxy bound to an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ProxyError>>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Defaults tightened for tests.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.connect_ms = 500;
    config.timeouts.request_line_ms = 5000;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

pub async fn start_proxy(routes: Vec<RouteConfig>) -> TestProxy {
    start_proxy_with(TcpConnector, test_config(), routes).await
}

pub async fn start_proxy_with<C: UpstreamConnector>(
    connector: C,
    mut config: ProxyConfig,
    routes: Vec<RouteConfig>,
) -> TestProxy {
    config.routes = routes;
    let rules = RuleTable::load(&config.routes).unwrap();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let server = ProxyServer::with_connector(connector, rules, &config);
    let handle = tokio::spawn(server.run(listener, rx));

    TestProxy {
        addr,
        shutdown,
        handle,
    }
}

/// A route to a local port.
pub fn route(prefix: &str, addr: SocketAddr) -> RouteConfig {
    RouteConfig::new(prefix, format!("http://{}", addr))
}

/// A port with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    probe.local_addr().unwrap()
}

/// Read up to and including the blank line that ends the request head.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R) -> Vec<u8> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if reader.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    head
}

fn content_length(head: &[u8]) -> usize {
    let head = String::from_utf8_lossy(head);
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0)
}

pub fn ok_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = socket.write_all(ok_response(body).as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Backend that reports every request it receives (head plus body) and
/// answers with `response` verbatim.
pub async fn start_capturing_backend(
    response: &'static [u8],
) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut request = read_head(&mut socket).await;
                let mut body = vec![0u8; content_length(&request)];
                socket.read_exact(&mut body).await.unwrap();
                request.extend_from_slice(&body);
                let _ = tx.send(request);

                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, rx)
}

/// Backend that answers with a chunked body, one chunk at a time.
///
/// The final chunk is held back until `release` receives a message, so a
/// test can prove earlier chunks reached the client first.
pub async fn start_streaming_backend(
    chunks: &'static [&'static str],
    mut release: mpsc::Receiver<()>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_head(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        for (i, chunk) in chunks.iter().enumerate() {
            if i + 1 == chunks.len() {
                let _ = release.recv().await;
            }
            let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
            socket.write_all(frame.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        let _ = socket.shutdown().await;
    });
    addr
}

/// Connector that counts attempts and then connects over TCP.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    attempts: Arc<AtomicUsize>,
}

impl RecordingConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl UpstreamConnector for RecordingConnector {
    type Stream = TcpStream;

    async fn connect(&self, upstream: &Upstream) -> io::Result<TcpStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        TcpConnector.connect(upstream).await
    }
}

/// Connector whose attempts never complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct StallingConnector;

impl UpstreamConnector for StallingConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _upstream: &Upstream) -> io::Result<DuplexStream> {
        std::future::pending().await
    }
}

/// Send raw bytes and read until the proxy closes the connection.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap()
}
