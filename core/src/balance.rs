//! Balance projector.
//!
//! RULE: `users.balance` is only ever changed here, and only in the same
//! unit of work as exactly one ledger append. After every change the
//! balance is checked against the ledger sum; a mismatch aborts the unit.

use crate::{
    error::{LedgerError, LedgerResult},
    store::{LedgerReader, UnitOfWork},
    types::Points,
};

pub struct BalanceProjector;

impl BalanceProjector {
    /// Apply `delta` and return the new balance.
    pub fn apply_delta(uow: &UnitOfWork<'_>, user_id: &str, delta: Points) -> LedgerResult<Points> {
        let balance = uow
            .add_to_balance(user_id, delta)?
            .ok_or_else(|| LedgerError::NotFound { user_id: user_id.to_string() })?;
        Self::verify(uow, user_id, balance)?;
        Ok(balance)
    }

    pub fn verify(reader: &impl LedgerReader, user_id: &str, balance: Points) -> LedgerResult<()> {
        let ledger_sum = reader.ledger_point_sum(user_id)?;
        if ledger_sum != balance {
            log::error!(
                "balance: invariant violated for {user_id}: balance={balance} ledger_sum={ledger_sum}"
            );
            return Err(LedgerError::InvariantViolation {
                user_id: user_id.to_string(),
                balance,
                ledger_sum,
            });
        }
        Ok(())
    }

    /// Recompute from the ledger and compare with the materialized value.
    pub fn audit(reader: &impl LedgerReader, user_id: &str) -> LedgerResult<Points> {
        let user = reader
            .user(user_id)?
            .ok_or_else(|| LedgerError::NotFound { user_id: user_id.to_string() })?;
        Self::verify(reader, user_id, user.balance)?;
        Ok(user.balance)
    }
}
