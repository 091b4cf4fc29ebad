//! Bidirectional byte pipe with half-close propagation.
//!
//! # Responsibilities
//! - Copy client → upstream and upstream → client concurrently
//! - Propagate end-of-stream as a write half-close on the opposite side
//! - End the whole relay on the first I/O error or idle timeout
//!
//! # Design Decisions
//! - Both directions are joined futures in one task: when one fails the
//!   other is dropped, and dropping the stream halves closes both sockets
//! - No payload inspection once piping starts
//! - Idle time counts traffic in either direction

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tuning for a single relay.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Copy buffer size per direction.
    pub buffer_size: usize,
    /// End the relay after this long without traffic in either direction.
    pub idle_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            idle_timeout: None,
        }
    }
}

/// Byte counts and duration of a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes written to the upstream, including the replayed preface.
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
    pub duration: Duration,
}

/// A relay that ended on an I/O error or idle timeout.
///
/// `stats` holds what had been written before the failure.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RelayError {
    pub stats: RelayStats,
    #[source]
    pub source: io::Error,
}

impl RelayError {
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// Last-activity clock and byte counters shared by both directions.
#[derive(Debug)]
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
    to_upstream: AtomicU64,
    to_client: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
            to_upstream: AtomicU64::new(0),
            to_client: AtomicU64::new(0),
        }
    }

    fn record(&self, counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }

    fn stats(&self) -> RelayStats {
        RelayStats {
            bytes_to_upstream: self.to_upstream.load(Ordering::Relaxed),
            bytes_to_client: self.to_client.load(Ordering::Relaxed),
            duration: self.origin.elapsed(),
        }
    }
}

/// Relay bytes between `inbound` and `outbound` until both directions finish.
///
/// `preface` is written to `outbound` before any inbound bytes; it carries the
/// bytes already consumed from the client while the request line was parsed.
pub async fn pipe<I, O>(
    inbound: I,
    outbound: O,
    preface: &[u8],
    settings: &RelaySettings,
) -> Result<RelayStats, RelayError>
where
    I: AsyncRead + AsyncWrite + Unpin,
    O: AsyncRead + AsyncWrite + Unpin,
{
    let activity = Activity::new();
    let (mut client_read, mut client_write) = tokio::io::split(inbound);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(outbound);

    let to_upstream = async {
        upstream_write.write_all(preface).await?;
        activity.record(&activity.to_upstream, preface.len());
        copy_then_half_close(
            &mut client_read,
            &mut upstream_write,
            settings.buffer_size,
            &activity,
            &activity.to_upstream,
        )
        .await
    };
    let to_client = copy_then_half_close(
        &mut upstream_read,
        &mut client_write,
        settings.buffer_size,
        &activity,
        &activity.to_client,
    );

    let both = async { tokio::try_join!(to_upstream, to_client).map(|_| ()) };
    let result = match settings.idle_timeout {
        Some(idle) => tokio::select! {
            done = both => done,
            err = idle_watchdog(&activity, idle) => Err(err),
        },
        None => both.await,
    };

    match result {
        Ok(()) => Ok(activity.stats()),
        Err(source) => Err(RelayError {
            stats: activity.stats(),
            source,
        }),
    }
}

/// Copy until `reader` hits EOF, then shut down `writer`'s write side.
///
/// Every write is added to `counter` as soon as it completes.
async fn copy_then_half_close<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    activity: &Activity,
    counter: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.record(counter, n);
    }

    match writer.shutdown().await {
        Ok(()) => Ok(()),
        // Peer already gone; nothing left to signal.
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolves once no traffic has moved for `idle`.
async fn idle_watchdog(activity: &Activity, idle: Duration) -> io::Error {
    loop {
        let idle_for = activity.idle_for();
        if idle_for >= idle {
            return io::Error::new(
                io::ErrorKind::TimedOut,
                format!("relay idle for {}s", idle.as_secs_f64()),
            );
        }
        tokio::time::sleep(idle - idle_for).await;
    }
}
