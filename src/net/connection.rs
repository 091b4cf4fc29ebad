//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track each connection through its handling states
//! - Record the single terminal outcome of every connection
//! - Count active connections for graceful shutdown

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::relay::RelayStats;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handling state of one inbound connection.
///
/// ```text
/// Accepted → PathParsed → Matched → Relaying → Closed
///                       → Unmatched → ResponseSent → Closed
///          → ParseError → ResponseSent → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    PathParsed,
    ParseError,
    Matched,
    Unmatched,
    Relaying,
    ResponseSent,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepted, PathParsed)
                | (Accepted, ParseError)
                | (PathParsed, Matched)
                | (PathParsed, Unmatched)
                | (Matched, Relaying)
                // Upstream unreachable: gateway error is sent instead of relaying.
                | (Matched, ResponseSent)
                | (Unmatched, ResponseSent)
                | (ParseError, ResponseSent)
                | (_, Closed)
        ) && self != Closed
    }
}

/// Terminal action taken for a connection. Exactly one per accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Bytes were relayed to an upstream until both directions finished.
    Relayed(RelayStats),
    /// The proxy answered with the given status and closed.
    Rejected(u16),
    /// Closed without a response (client vanished, relay I/O failure, timeout).
    ClosedOnError,
}

impl ConnectionOutcome {
    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionOutcome::Relayed(_) => "relayed",
            ConnectionOutcome::Rejected(_) => "rejected",
            ConnectionOutcome::ClosedOnError => "closed_on_error",
        }
    }
}

/// Per-connection bookkeeping carried through the handler.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: ConnectionState,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::Accepted,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, logging the transition.
    pub fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `grace` elapses.
    ///
    /// Returns `true` if every connection finished in time.
    pub async fn wait_for_idle(&self, grace: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_idle_respects_grace() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        assert!(!tracker.wait_for_idle(Duration::from_millis(100)).await);

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });
        assert!(tracker.wait_for_idle(Duration::from_secs(2)).await);
        releaser.await.unwrap();
    }

    #[test]
    fn state_machine_paths() {
        use ConnectionState::*;
        let relayed = [Accepted, PathParsed, Matched, Relaying, Closed];
        let unmatched = [Accepted, PathParsed, Unmatched, ResponseSent, Closed];
        let bad = [Accepted, ParseError, ResponseSent, Closed];
        let unreachable = [Accepted, PathParsed, Matched, ResponseSent, Closed];

        for path in [&relayed[..], &unmatched, &bad, &unreachable] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
            }
        }

        assert!(!Accepted.can_transition_to(Relaying));
        assert!(!Unmatched.can_transition_to(Relaying));
        assert!(!Closed.can_transition_to(Closed));
        assert!(Accepted.can_transition_to(Closed));
    }

    #[test]
    fn connection_starts_accepted() {
        let mut conn = Connection::new(ConnectionId::new(), "127.0.0.1:1".parse().unwrap());
        assert_eq!(conn.state(), ConnectionState::Accepted);
        conn.transition(ConnectionState::PathParsed);
        assert_eq!(conn.state(), ConnectionState::PathParsed);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(ConnectionOutcome::Rejected(404).label(), "rejected");
        assert_eq!(ConnectionOutcome::ClosedOnError.label(), "closed_on_error");
        assert_eq!(ConnectionOutcome::Relayed(RelayStats::default()).label(), "relayed");
    }
}
