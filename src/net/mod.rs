//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, state tracking, outcome)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{
    Connection, ConnectionGuard, ConnectionId, ConnectionOutcome, ConnectionState, ConnectionTracker,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
