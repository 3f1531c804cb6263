//! Idempotency guard.
//!
//! Each scope maps to a concrete key stored on the ledger row, and
//! `(user_id, action, scope_key)` is unique at the storage layer. The guard
//! query below is a fast path that lets the award engine skip the insert;
//! the constraint is what actually prevents a double credit.

use crate::{
    catalog::{ActionType, Scope},
    clock::{utc_day_bucket, utc_day_start},
    error::{LedgerError, LedgerResult},
    store::{LedgerReader, UserRow},
};
use chrono::{DateTime, Utc};
use std::fmt;

/// A scope resolved against a concrete moment, event or cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKey {
    Lifetime,
    Day(String),
    Event(String),
    Cycle(i64),
}

impl ScopeKey {
    pub fn resolve(
        action: ActionType,
        now: DateTime<Utc>,
        external_event_id: Option<&str>,
        sequence: i64,
    ) -> LedgerResult<Self> {
        Ok(match action.scope() {
            Scope::Lifetime => Self::Lifetime,
            Scope::Daily => Self::Day(utc_day_bucket(now)),
            Scope::ExternalEvent => match external_event_id.map(str::trim) {
                Some(id) if !id.is_empty() => Self::Event(id.to_string()),
                _ => return Err(LedgerError::MissingExternalEventId { action: action.as_str() }),
            },
            Scope::Cycle => Self::Cycle(sequence),
        })
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Lifetime => Scope::Lifetime,
            Self::Day(_) => Scope::Daily,
            Self::Event(_) => Scope::ExternalEvent,
            Self::Cycle(_) => Scope::Cycle,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifetime => f.write_str("lifetime"),
            Self::Day(day) => write!(f, "day:{day}"),
            Self::Event(id) => write!(f, "event:{id}"),
            Self::Cycle(seq) => write!(f, "cycle:{seq}"),
        }
    }
}

pub struct IdempotencyGuard;

impl IdempotencyGuard {
    pub fn already_credited(
        reader: &impl LedgerReader,
        user: &UserRow,
        action: ActionType,
        key: &ScopeKey,
        now: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let user_id = user.user_id.as_str();
        match key {
            ScopeKey::Lifetime => {
                if Self::cached_flag(user, action) {
                    return Ok(true);
                }
                reader.has_entry(user_id, action)
            }
            ScopeKey::Day(_) => reader.has_entry_since(user_id, action, utc_day_start(now)),
            ScopeKey::Event(id) => reader.has_entry_for_event(user_id, action, id),
            ScopeKey::Cycle(_) => reader.has_entry_with_scope_key(user_id, action, &key.to_string()),
        }
    }

    /// Lifetime flags cached on the user row. Only ever set to true in the
    /// same unit of work as the matching ledger row, so a true flag is exact.
    fn cached_flag(user: &UserRow, action: ActionType) -> bool {
        match action {
            ActionType::SignupBonus => user.signup_bonus_awarded,
            ActionType::CompositeBonus => user.composite_bonus_awarded,
            _ => false,
        }
    }
}
