//! Progression tracker: "chase the target".
//!
//! Per-user state machine:
//!
//! ```text
//! Uninitialized ──first observation──▶ Chasing(target, 1)
//! Chasing(target, n) ──claim(n), balance >= target──▶ Chasing(target', n + 1)
//! ```
//!
//! The sequence number turns a claim into a compare-and-swap. A claim runs
//! in one unit of work holding the write lock: it re-reads the live row,
//! compares the caller's observed sequence, credits the cycle bonus and
//! advances the sequence. A second claim with the same observed sequence
//! sees the advanced value and is rejected as stale.

use crate::{
    award::{AwardEngine, AwardRequest},
    catalog::ActionType,
    clock::Clock,
    config::ProgressionConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    store::{LedgerReader, UnitOfWork, UserRow},
    types::Points,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProgressionState {
    Uninitialized,
    Chasing { target: Points, sequence: i64 },
}

impl ProgressionState {
    pub fn of(user: &UserRow) -> Self {
        match user.target {
            Some(target) if user.sequence > 0 => Self::Chasing { target, sequence: user.sequence },
            _ => Self::Uninitialized,
        }
    }
}

/// The smallest multiple of `rank_step` strictly above `points`.
pub fn next_rank_threshold(points: Points, rank_step: Points) -> Points {
    (points.max(0) / rank_step + 1) * rank_step
}

/// Gap after `catches` completed cycles.
pub fn gap_after(config: &ProgressionConfig, catches: i64) -> Points {
    config
        .initial_gap
        .saturating_add(config.gap_increment.saturating_mul(catches.max(0)))
        .min(config.max_gap)
}

/// Always strictly above `balance`.
pub fn compute_target(config: &ProgressionConfig, balance: Points, catches: i64) -> Points {
    next_rank_threshold(balance, config.rank_step).min(balance + gap_after(config, catches))
}

/// Outcome of a claim. Only `Caught` changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Caught {
        bonus:        Points,
        new_balance:  Points,
        new_target:   Points,
        new_sequence: i64,
    },
    /// The caller's view is out of date; re-fetch status and retry.
    /// `current_sequence` always differs from the observed one.
    Stale { current_sequence: i64 },
    NotYetEligible { balance: Points, target: Points, sequence: i64 },
}

impl ClaimOutcome {
    pub fn caught(&self) -> bool {
        matches!(self, Self::Caught { .. })
    }

    pub fn stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// Flat wire shape for collaborators.
    pub fn to_response(&self) -> ClaimResponse {
        match *self {
            Self::Caught { new_balance, new_target, new_sequence, .. } => ClaimResponse {
                caught: true,
                stale: false,
                new_balance: Some(new_balance),
                new_target: Some(new_target),
                new_sequence: Some(new_sequence),
            },
            Self::Stale { .. } => ClaimResponse { stale: true, ..ClaimResponse::default() },
            Self::NotYetEligible { .. } => ClaimResponse::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub caught: bool,
    pub stale:  bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<Points>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_target: Option<Points>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_sequence: Option<i64>,
}

/// Read-only view for progress-bar rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatus {
    pub balance:             Points,
    pub target:              Points,
    pub sequence:            i64,
    pub next_rank_threshold: Points,
}

pub struct ProgressionTracker<'a> {
    config: &'a ProgressionConfig,
    clock:  &'a dyn Clock,
}

impl<'a> ProgressionTracker<'a> {
    pub fn new(config: &'a ProgressionConfig, clock: &'a dyn Clock) -> Self {
        Self { config, clock }
    }

    /// Uninitialized → Chasing. Returns the (possibly re-read) row.
    pub fn ensure_initialized(&self, uow: &UnitOfWork<'_>, user: UserRow) -> LedgerResult<UserRow> {
        if let ProgressionState::Chasing { .. } = ProgressionState::of(&user) {
            return Ok(user);
        }
        let target = compute_target(self.config, user.balance, 0);
        if uow.initialize_progression(&user.user_id, target)? {
            log::debug!(
                "progression: initialized {} at target={target} (balance={})",
                user.user_id,
                user.balance
            );
        }
        uow.user(&user.user_id)?
            .ok_or(LedgerError::NotFound { user_id: user.user_id })
    }

    pub fn status_of(&self, user: &UserRow) -> Option<ProgressStatus> {
        match ProgressionState::of(user) {
            ProgressionState::Chasing { target, sequence } => Some(ProgressStatus {
                balance: user.balance,
                target,
                sequence,
                next_rank_threshold: next_rank_threshold(user.balance, self.config.rank_step),
            }),
            ProgressionState::Uninitialized => None,
        }
    }

    /// Validate and apply a claim inside `uow`. The caller commits only on
    /// `Caught`; every other outcome leaves nothing to keep.
    pub fn claim(
        &self,
        uow: &UnitOfWork<'_>,
        awards: &AwardEngine<'_>,
        user_id: &str,
        observed_sequence: i64,
    ) -> LedgerResult<ClaimOutcome> {
        let live = uow
            .user(user_id)?
            .ok_or_else(|| LedgerError::NotFound { user_id: user_id.to_string() })?;
        let live = self.ensure_initialized(uow, live)?;

        let (target, sequence) = match ProgressionState::of(&live) {
            ProgressionState::Chasing { target, sequence } => (target, sequence),
            ProgressionState::Uninitialized => {
                return Err(LedgerError::NotFound { user_id: user_id.to_string() })
            }
        };

        if sequence != observed_sequence {
            log::debug!(
                "progression: stale claim for {user_id} (observed={observed_sequence}, live={sequence})"
            );
            return Ok(ClaimOutcome::Stale { current_sequence: sequence });
        }
        if live.balance < target {
            return Ok(ClaimOutcome::NotYetEligible { balance: live.balance, target, sequence });
        }

        let bonus = awards.credit(uow, &AwardRequest::new(user_id, ActionType::ProgressionBonus))?;
        // Not credited means this cycle's bonus row already exists while the
        // sequence never moved on. That row is the payout for this catch;
        // advance without paying again.
        let (bonus_points, new_balance) = if bonus.credited {
            (bonus.new_balance - live.balance, bonus.new_balance)
        } else {
            log::warn!("progression: cycle {sequence} already paid for {user_id}, advancing");
            (0, live.balance)
        };

        let new_target = compute_target(self.config, new_balance, sequence);
        if !uow.advance_progression(user_id, sequence, new_target)? {
            // Unreachable while this unit holds the write lock.
            return Err(LedgerError::Other(anyhow::anyhow!(
                "progression: sequence for {user_id} moved under a held lock"
            )));
        }
        let new_sequence = sequence + 1;

        uow.append_event(
            &LedgerEvent::TargetCaught {
                user_id: user_id.to_string(),
                sequence,
                bonus: bonus_points,
                new_target,
                new_sequence,
            },
            self.clock.now(),
        )?;

        log::info!(
            "progression: {user_id} caught target {target} (seq {sequence} → {new_sequence}), \
             next target {new_target}"
        );

        Ok(ClaimOutcome::Caught {
            bonus: bonus_points,
            new_balance,
            new_target,
            new_sequence,
        })
    }
}
