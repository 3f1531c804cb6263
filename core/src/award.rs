//! Award engine: "credit user U for action A", exactly once per scope.
//!
//! `credit` runs inside a caller-owned unit of work so that the progression
//! tracker and the achievement evaluator can compose it with their own
//! writes. The public, self-contained `award` lives on `PointsEngine`.
//!
//! Order inside the unit:
//!   1. resolve points and scope key from the catalog
//!   2. idempotency guard (fast path)
//!   3. ledger append (the unique key is the real guard)
//!   4. balance delta + ledger-sum verification
//!   5. lifetime flags and outbox events (points and commission axes)

use crate::{
    balance::BalanceProjector,
    catalog::{ActionCatalog, ActionType},
    clock::Clock,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    idempotency::{IdempotencyGuard, ScopeKey},
    store::{LedgerReader, NewEntry, UnitOfWork, UserFlag},
    types::{Cents, EntryId, Points},
};
use serde::Serialize;

/// One award to be credited.
#[derive(Debug, Clone)]
pub struct AwardRequest<'a> {
    pub user_id:           &'a str,
    pub action:            ActionType,
    pub external_event_id: Option<&'a str>,
    pub cents:             Cents,
    pub counterparty:      Option<&'a str>,
    pub note:              Option<String>,
}

impl<'a> AwardRequest<'a> {
    pub fn new(user_id: &'a str, action: ActionType) -> Self {
        Self {
            user_id,
            action,
            external_event_id: None,
            cents: 0,
            counterparty: None,
            note: None,
        }
    }

    pub fn external_event(mut self, external_event_id: &'a str) -> Self {
        self.external_event_id = Some(external_event_id);
        self
    }

    /// Commission on the cents axis, owed because of `counterparty`.
    pub fn commission(mut self, cents: Cents, counterparty: &'a str) -> Self {
        self.cents = cents;
        self.counterparty = Some(counterparty);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of an award. `credited == false` means "already credited in this
/// scope" and is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AwardOutcome {
    pub credited:    bool,
    pub new_balance: Points,
    pub entry_id:    Option<EntryId>,
    /// Set when this award completed the composite achievement.
    pub composite_unlocked: bool,
}

impl AwardOutcome {
    fn skipped(balance: Points) -> Self {
        Self { credited: false, new_balance: balance, entry_id: None, composite_unlocked: false }
    }
}

pub struct AwardEngine<'a> {
    catalog: &'a ActionCatalog,
    clock:   &'a dyn Clock,
}

impl<'a> AwardEngine<'a> {
    pub fn new(catalog: &'a ActionCatalog, clock: &'a dyn Clock) -> Self {
        Self { catalog, clock }
    }

    /// Credit inside `uow`. Never commits or rolls back.
    pub fn credit(&self, uow: &UnitOfWork<'_>, req: &AwardRequest<'_>) -> LedgerResult<AwardOutcome> {
        let spec = self.catalog.get(req.action)?;
        let user = uow
            .user(req.user_id)?
            .ok_or_else(|| LedgerError::NotFound { user_id: req.user_id.to_string() })?;

        let now = self.clock.now();
        let key = ScopeKey::resolve(req.action, now, req.external_event_id, user.sequence)?;

        if IdempotencyGuard::already_credited(uow, &user, req.action, &key, now)? {
            log::debug!("award: {} already credited to {} ({key})", req.action, user.user_id);
            return Ok(AwardOutcome::skipped(user.balance));
        }

        let scope_key = key.to_string();
        let note = req
            .note
            .clone()
            .unwrap_or_else(|| format!("{} ({scope_key})", req.action));
        let entry = NewEntry {
            user_id:           &user.user_id,
            action:            req.action,
            points:            spec.points,
            cents:             req.cents,
            scope_key:         &scope_key,
            external_event_id: req.external_event_id.map(str::trim),
            counterparty:      req.counterparty,
            note:              &note,
            created_at:        now,
        };

        let entry_id = match uow.append_entry(&entry)? {
            Some(id) => id,
            None => {
                log::debug!("award: {} for {} hit unique key {scope_key}", req.action, user.user_id);
                return Ok(AwardOutcome::skipped(user.balance));
            }
        };

        let new_balance = BalanceProjector::apply_delta(uow, &user.user_id, spec.points)?;

        match req.action {
            ActionType::SignupBonus => uow.set_flag(&user.user_id, UserFlag::SignupBonusAwarded)?,
            ActionType::CompositeBonus => {
                uow.set_flag(&user.user_id, UserFlag::CompositeBonusAwarded)?
            }
            _ => {}
        }

        if spec.points != 0 {
            uow.append_event(
                &LedgerEvent::PointsCredited {
                    user_id: user.user_id.clone(),
                    entry_id,
                    action: req.action,
                    points: spec.points,
                    new_balance,
                },
                now,
            )?;
        }
        if req.cents != 0 {
            uow.append_event(
                &LedgerEvent::CommissionCredited {
                    referrer_id: user.user_id.clone(),
                    entry_id,
                    buyer_email: req.counterparty.unwrap_or_default().to_string(),
                    session_id: req.external_event_id.unwrap_or_default().to_string(),
                    cents: req.cents,
                },
                now,
            )?;
        }

        log::info!(
            "award: {} +{} pts (+{}c) to {} [{scope_key}] balance={new_balance}",
            req.action,
            spec.points,
            req.cents,
            user.user_id
        );

        Ok(AwardOutcome {
            credited: true,
            new_balance,
            entry_id: Some(entry_id),
            composite_unlocked: false,
        })
    }
}
