//! Error types for record resolution.

use thiserror::Error;

use tier_types::TierError;

/// Errors returned by the resolver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Neither tier holds the record
    #[error("record not found: {id}")]
    NotFound { id: String },

    /// Request could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A tier read failed; carried through unchanged
    #[error(transparent)]
    Tier(#[from] TierError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}
