//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path (from the request line)
//!     → matcher.rs (longest-prefix scan over the rule table)
//!     → Return: matched Rule or None
//!
//! Rule Compilation (at startup):
//!     RouteConfig[]
//!     → rule.rs (parse upstream URLs, validate)
//!     → Freeze as immutable RuleTable
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same rule
//! - Longest prefix wins; ties go to the first declared rule

pub mod matcher;
pub mod rule;

pub use matcher::match_rule;
pub use rule::{Rule, RuleTable, Upstream, UpstreamUrlError};
