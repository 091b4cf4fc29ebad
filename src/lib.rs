//! Development reverse proxy.
//!
//! Accepts HTTP/1.x connections, matches the request path against an ordered
//! table of prefix rules (longest prefix wins), and relays the connection's
//! bytes to the chosen upstream untouched.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use routing::RuleTable;
