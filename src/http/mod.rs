//! HTTP protocol handling subsystem.
//!
//! Only the request line is ever interpreted. Everything after it, in both
//! directions, is relayed as opaque bytes.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, per-connection state machine)
//!     → request.rs (read and parse the request line)
//!     → [routing decides the upstream]
//!         → match: relay subsystem takes over the stream
//!         → no match / bad line / unreachable: response.rs (404 / 400 / 502)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{read_request_line, ParseError, RequestLine};
pub use response::ProxyResponse;
pub use server::ProxyServer;
