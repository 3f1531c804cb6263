//! Composite achievement evaluator.
//!
//! The "full launch" bonus unlocks once a user has shared on every platform
//! and purchased, in any order. Prerequisites are re-derived from the
//! ledger's distinct action history on every evaluation, never from cached
//! flags, and evaluation runs in the same unit of work as the award that
//! may have completed the set.

use crate::{
    award::{AwardEngine, AwardRequest},
    catalog::ActionType,
    clock::Clock,
    error::LedgerResult,
    event::LedgerEvent,
    store::{LedgerReader, UnitOfWork},
};

pub const COMPOSITE_PREREQUISITES: [ActionType; 4] = [
    ActionType::ShareFacebook,
    ActionType::ShareX,
    ActionType::ShareInstagram,
    ActionType::Purchase,
];

/// Prerequisites not yet met, in declaration order.
pub fn missing_prerequisites(done: &[ActionType]) -> Vec<ActionType> {
    COMPOSITE_PREREQUISITES
        .iter()
        .copied()
        .filter(|a| !done.contains(a))
        .collect()
}

pub struct AchievementEvaluator<'a> {
    clock: &'a dyn Clock,
}

impl<'a> AchievementEvaluator<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self { clock }
    }

    /// Returns true only if this call credited the composite bonus.
    pub fn evaluate(
        &self,
        uow: &UnitOfWork<'_>,
        awards: &AwardEngine<'_>,
        user_id: &str,
    ) -> LedgerResult<bool> {
        let done = uow.distinct_actions(user_id)?;
        let missing = missing_prerequisites(&done);
        if !missing.is_empty() {
            log::debug!("achievement: {user_id} still missing {missing:?}");
            return Ok(false);
        }

        let outcome = awards.credit(
            uow,
            &AwardRequest::new(user_id, ActionType::CompositeBonus)
                .note("composite: shared on every platform and purchased"),
        )?;
        if !outcome.credited {
            return Ok(false);
        }

        uow.append_event(
            &LedgerEvent::AchievementUnlocked {
                user_id: user_id.to_string(),
                achievement: ActionType::CompositeBonus,
            },
            self.clock.now(),
        )?;
        log::info!("achievement: {user_id} unlocked composite bonus");
        Ok(true)
    }
}
