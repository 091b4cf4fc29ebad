//! Route matching logic.
//!
//! # Responsibilities
//! - Select the rule whose prefix is the longest prefix of the request path
//! - Break ties by declaration order (first declared wins)
//!
//! # Design Decisions
//! - Path matching is case-sensitive and byte-wise
//! - Linear scan; rule tables are small and built once
//! - No regex to guarantee O(n) matching

use crate::routing::rule::{Rule, RuleTable};

/// Return the rule with the longest prefix of `path`, or `None` if no prefix matches.
pub fn match_rule<'a>(table: &'a RuleTable, path: &str) -> Option<&'a Rule> {
    let mut best: Option<&Rule> = None;
    for rule in table.rules() {
        if !rule.matches(path) {
            continue;
        }
        // Strictly greater keeps the earliest rule among equal-length prefixes.
        if best.map_or(true, |b| rule.path_prefix().len() > b.path_prefix().len()) {
            best = Some(rule);
        }
    }
    best
}

impl RuleTable {
    /// See [`match_rule`].
    pub fn lookup(&self, path: &str) -> Option<&Rule> {
        match_rule(self, path)
    }
}
