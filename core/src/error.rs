use thiserror::Error;

use crate::types::{Points, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("User '{user_id}' not found")]
    NotFound { user_id: UserId },

    #[error("Invalid email '{email}'")]
    InvalidEmail { email: String },

    #[error("Invalid action '{name}'")]
    InvalidAction { name: String },

    #[error("Action '{action}' requires an external event id")]
    MissingExternalEventId { action: &'static str },

    #[error("Balance invariant violated for '{user_id}': balance {balance}, ledger sum {ledger_sum}")]
    InvariantViolation {
        user_id:    UserId,
        balance:    Points,
        ledger_sum: Points,
    },

    #[error("Could not allocate a unique referral code after {attempts} attempts")]
    ReferralCodeExhausted { attempts: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LedgerError {
    /// Transient failures: the unit of work rolled back and a retry is safe.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
