//! Error types shared by every tier collaborator.
//!
//! "Not found" is deliberately absent: a miss is a normal read outcome and is
//! expressed as [`crate::Lookup::NotFound`].

use thiserror::Error;

/// Errors surfaced by tier reads, writes and change feeds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TierError {
    /// Timeout, throttling or contention. Safe to retry.
    #[error("Transient error from {tier} tier: {message}")]
    Transient { tier: String, message: String },

    /// Unreachable store, corruption, IO failure. Not retried.
    #[error("Fatal error from {tier} tier: {message}")]
    Fatal { tier: String, message: String },

    /// Required field missing or unparseable.
    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    /// Bad or inconsistent configuration. Requires operator intervention.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TierError {
    pub fn transient(tier: impl Into<String>, message: impl Into<String>) -> Self {
        TierError::Transient {
            tier: tier.into(),
            message: message.into(),
        }
    }

    pub fn fatal(tier: impl Into<String>, message: impl Into<String>) -> Self {
        TierError::Fatal {
            tier: tier.into(),
            message: message.into(),
        }
    }

    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        TierError::MalformedRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, TierError::Transient { .. })
    }
}
