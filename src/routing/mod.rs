//! Route naming subsystem.
//!
//! # Data Flow
//! ```text
//! RouteSpec (as received, possibly percent-encoded)
//!     → alias.rs (decode → canonical spec → alias)
//!     → rule.rs (canonical spec → proxy rule expression)
//!     → keys.rs (alias + KeySchema → RouteKeys)
//! ```
//!
//! # Design Decisions
//! - Everything here is pure: same input, same output, no hidden state
//! - Canonical (decoded) specs are the only form used past `decode`
//! - Aliases are persisted, so the escaping scheme is part of the on-disk format
//! - Rule text is never escaped; specs that would need escaping are rejected

pub mod alias;
pub mod keys;
pub mod rule;

use thiserror::Error;

pub use alias::{decode, encode, to_alias};
pub use keys::{generate_route_keys, KeySchema, RouteKeys, Separator};
pub use rule::compile_rule;

/// A route spec that cannot be turned into a rule expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed route spec '{spec}': {reason}")]
pub struct MalformedRouteSpec {
    pub spec: String,
    pub reason: &'static str,
}

impl MalformedRouteSpec {
    pub(crate) fn new(spec: &str, reason: &'static str) -> Self {
        Self {
            spec: spec.to_string(),
            reason,
        }
    }
}
