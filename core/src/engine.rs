//! The points engine, the single entry point for collaborators.
//!
//! COMPONENTS (leaves first):
//!   1. Action catalog        (catalog.rs)
//!   2. Ledger store          (store/)
//!   3. Balance projector     (balance.rs)
//!   4. Idempotency guard     (idempotency.rs)
//!   5. Award engine          (award.rs)
//!   6. Progression tracker   (progression.rs)
//!   7. Achievement evaluator (achievement.rs)
//!   8. Payment adapter       (payment.rs)
//!
//! RULES:
//!   - Every public mutation is exactly one unit of work.
//!   - Every entry point resolves an initialized user first.
//!   - Only the award engine and progression tracker write balance or
//!     sequence.
//!   - Normal outcomes (already credited, stale, not yet eligible) are
//!     values, never errors.
//!
//! One engine owns one connection. For parallel workers, give each worker
//! its own engine via `reopen()`.

use crate::{
    achievement::AchievementEvaluator,
    award::{AwardEngine, AwardOutcome, AwardRequest},
    balance::BalanceProjector,
    catalog::{ActionCatalog, ActionType, Platform},
    clock::{from_millis, Clock, ManualClock},
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    identity::{get_or_create, normalize_email},
    progression::{ClaimOutcome, ProgressStatus, ProgressionState, ProgressionTracker},
    rng::{CodeRng, ReferralCodeGenerator},
    store::{LedgerReader, LedgerStore, UnitOfWork, UserRow},
    types::{Points, UserId},
};
use std::sync::Arc;

/// 2026-10-16T12:00:00Z, the fixed start of every test clock.
pub const TEST_EPOCH_MILLIS: i64 = 1_792_152_000_000;

pub struct PointsEngine {
    pub store: LedgerStore,
    config:    LedgerConfig,
    catalog:   ActionCatalog,
    clock:     Arc<dyn Clock>,
    codes:     ReferralCodeGenerator,
}

impl PointsEngine {
    pub fn new(store: LedgerStore, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        let codes = ReferralCodeGenerator::new(CodeRng::from_entropy(), config.referral.code_length);
        Self {
            catalog: ActionCatalog::from_config(&config),
            store,
            config,
            clock,
            codes,
        }
    }

    /// Use a reproducible referral code stream.
    pub fn with_code_rng(mut self, rng: CodeRng) -> Self {
        self.codes = ReferralCodeGenerator::new(rng, self.config.referral.code_length);
        self
    }

    /// In-memory engine with test config and a manual clock at
    /// `TEST_EPOCH_MILLIS`.
    pub fn build_test() -> LedgerResult<(Self, ManualClock)> {
        let store = LedgerStore::in_memory()?;
        store.migrate()?;
        Self::build_test_on(store)
    }

    /// Test config and manual clock over an already-migrated store.
    pub fn build_test_on(store: LedgerStore) -> LedgerResult<(Self, ManualClock)> {
        let clock = ManualClock::new(from_millis(TEST_EPOCH_MILLIS));
        let engine = Self::new(store, LedgerConfig::default_test(), Arc::new(clock.clone()));
        Ok((engine, clock))
    }

    /// A second engine on its own connection to the same database.
    pub fn reopen(&self) -> LedgerResult<Self> {
        Ok(Self::new(self.store.reopen()?, self.config.clone(), Arc::clone(&self.clock)))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn awards(&self) -> AwardEngine<'_> {
        AwardEngine::new(&self.catalog, self.clock.as_ref())
    }

    fn tracker(&self) -> ProgressionTracker<'_> {
        ProgressionTracker::new(&self.config.progression, self.clock.as_ref())
    }

    fn achievements(&self) -> AchievementEvaluator<'_> {
        AchievementEvaluator::new(self.clock.as_ref())
    }

    // ── Identity ──────────────────────────────────────────────────

    /// Resolve a user by email, creating it (with a fresh referral code and
    /// initialized progression) on first interaction.
    pub fn get_or_create_user(&self, email: &str) -> LedgerResult<UserRow> {
        let email = normalize_email(email)?;
        if let Some(user) = self.store.user_by_email(&email)? {
            if ProgressionState::of(&user) != ProgressionState::Uninitialized {
                return Ok(user);
            }
        }

        let uow = self.store.begin()?;
        let (user, created) = get_or_create(&uow, &self.codes, &email, self.clock.now())?;
        let user = self.tracker().ensure_initialized(&uow, user)?;
        if created {
            uow.append_event(
                &LedgerEvent::UserEnrolled {
                    user_id: user.user_id.clone(),
                    email: user.email.clone(),
                    referral_code: user.referral_code.clone(),
                },
                self.clock.now(),
            )?;
            log::info!("identity: created {} for {}", user.user_id, user.email);
        }
        uow.commit()?;
        Ok(user)
    }

    /// Ensure the user exists and its progression is initialized.
    pub fn get_or_initialize(&self, user_id: &str) -> LedgerResult<UserRow> {
        let user = self
            .store
            .user(user_id)?
            .ok_or_else(|| LedgerError::NotFound { user_id: user_id.to_string() })?;
        if ProgressionState::of(&user) != ProgressionState::Uninitialized {
            return Ok(user);
        }
        let uow = self.store.begin()?;
        let user = self.initialized_user(&uow, user_id)?;
        uow.commit()?;
        Ok(user)
    }

    fn initialized_user(&self, uow: &UnitOfWork<'_>, user_id: &str) -> LedgerResult<UserRow> {
        let user = uow
            .user(user_id)?
            .ok_or_else(|| LedgerError::NotFound { user_id: user_id.to_string() })?;
        self.tracker().ensure_initialized(uow, user)
    }

    /// First interaction: get-or-create plus the lifetime signup bonus.
    pub fn enroll(&self, email: &str) -> LedgerResult<(UserRow, AwardOutcome)> {
        let user = self.get_or_create_user(email)?;
        let outcome = self.award(&user.user_id, ActionType::SignupBonus, None)?;
        Ok((user, outcome))
    }

    // ── Awards ────────────────────────────────────────────────────

    /// Credit `user_id` for `action`, at most once per the action's scope.
    /// Internal actions (progression bonus, composite bonus, referral
    /// payout) are `InvalidAction` here; they are credited only by the
    /// claim, the achievement evaluator and the payment adapter.
    pub fn award(
        &self,
        user_id: &str,
        action: ActionType,
        external_event_id: Option<&str>,
    ) -> LedgerResult<AwardOutcome> {
        if action.is_internal() {
            log::warn!("award: rejected direct request for internal action {action}");
            return Err(LedgerError::InvalidAction { name: action.as_str().to_string() });
        }
        let mut req = AwardRequest::new(user_id, action);
        req.external_event_id = external_event_id;
        self.credit_in_own_unit(&req)
    }

    /// `award` by action name; unknown names are `InvalidAction`.
    pub fn award_named(
        &self,
        user_id: &str,
        action: &str,
        external_event_id: Option<&str>,
    ) -> LedgerResult<AwardOutcome> {
        self.award(user_id, action.parse()?, external_event_id)
    }

    /// One award in its own unit of work, followed by achievement
    /// evaluation when the action is a prerequisite.
    pub(crate) fn credit_in_own_unit(&self, req: &AwardRequest<'_>) -> LedgerResult<AwardOutcome> {
        let uow = self.store.begin()?;
        self.initialized_user(&uow, req.user_id)?;

        let awards = self.awards();
        let mut outcome = awards.credit(&uow, req)?;
        if !outcome.credited {
            uow.rollback()?;
            return Ok(outcome);
        }

        if req.action.is_composite_prerequisite()
            && self.achievements().evaluate(&uow, &awards, req.user_id)?
        {
            outcome.composite_unlocked = true;
            outcome.new_balance = uow
                .user(req.user_id)?
                .map(|u| u.balance)
                .unwrap_or(outcome.new_balance);
        }

        uow.commit()?;
        Ok(outcome)
    }

    /// Daily-capped social share.
    pub fn record_share(&self, user_id: &str, platform: Platform) -> LedgerResult<AwardOutcome> {
        self.award(user_id, platform.action(), None)
    }

    pub fn join_contest(&self, user_id: &str) -> LedgerResult<AwardOutcome> {
        self.award(user_id, ActionType::ContestJoin, None)
    }

    // ── Progression ───────────────────────────────────────────────

    /// Attempt to catch the current target. Commits only when caught.
    pub fn claim(&self, user_id: &str, observed_sequence: i64) -> LedgerResult<ClaimOutcome> {
        let uow = self.store.begin()?;
        let awards = self.awards();
        let outcome = self.tracker().claim(&uow, &awards, user_id, observed_sequence)?;
        if outcome.caught() {
            uow.commit()?;
        } else {
            uow.rollback()?;
        }
        Ok(outcome)
    }

    pub fn status(&self, user_id: &str) -> LedgerResult<ProgressStatus> {
        let user = self.get_or_initialize(user_id)?;
        self.tracker()
            .status_of(&user)
            .ok_or_else(|| LedgerError::NotFound { user_id: user_id.to_string() })
    }

    // ── Achievements ──────────────────────────────────────────────

    /// Re-evaluate the composite achievement outside of an award.
    pub fn evaluate_achievements(&self, user_id: &str) -> LedgerResult<bool> {
        let uow = self.store.begin()?;
        self.initialized_user(&uow, user_id)?;
        let credited = self.achievements().evaluate(&uow, &self.awards(), user_id)?;
        if credited {
            uow.commit()?;
        } else {
            uow.rollback()?;
        }
        Ok(credited)
    }

    // ── Audit ─────────────────────────────────────────────────────

    /// Balance, verified against the ledger sum.
    pub fn audit_user(&self, user_id: &str) -> LedgerResult<Points> {
        BalanceProjector::audit(&self.store, user_id)
    }

    /// Audit every user; returns the ids checked.
    pub fn audit_all(&self) -> LedgerResult<Vec<UserId>> {
        let ids = self.store.user_ids()?;
        for id in &ids {
            BalanceProjector::audit(&self.store, id)?;
        }
        Ok(ids)
    }
}
