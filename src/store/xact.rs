//! Current/previous transaction marker.
//!
//! The atomicity primitive for every scope (shard or table): a small
//! JSON record at `<scope>/CURRENT` naming the authoritative generation
//! and the one pending reclamation. A commit flips the pair; a
//! transaction id already recorded as current must never commit again.

use serde::{Deserialize, Serialize};

use crate::error::{ArmorError, Result};

/// Marker file name inside a scope.
pub const CURRENT_MARKER: &str = "CURRENT";

/// The current/previous pointer pair for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMarker {
    pub current: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

impl TransactionMarker {
    pub fn new(current: impl Into<String>, previous: Option<String>) -> Self {
        Self {
            current: current.into(),
            previous,
        }
    }

    /// Guard against double-commit: a transaction id already recorded as
    /// current for this scope must not be reused.
    pub fn validate(&self, transaction: &str, scope: &str) -> Result<()> {
        if self.current.eq_ignore_ascii_case(transaction) {
            return Err(ArmorError::DuplicateTransaction {
                transaction: transaction.to_string(),
                scope: scope.to_string(),
            });
        }
        Ok(())
    }

    /// The marker to persist when `transaction` commits on top of
    /// `prior`: new current = this transaction, new previous = the old
    /// current (now pending reclamation).
    pub fn advance(prior: Option<&TransactionMarker>, transaction: &str) -> TransactionMarker {
        TransactionMarker::new(transaction, prior.map(|m| m.current.clone()))
    }
}
