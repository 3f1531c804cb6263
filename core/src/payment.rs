//! External event adapter for checkout notifications.
//!
//! A payment-completed notification becomes at most two awards, both keyed
//! by the checkout session id:
//!   - `purchase` to the buyer
//!   - `referral_payout` (points plus a cents commission) to the referrer,
//!     when a referral code is present and does not belong to the buyer
//!
//! Each award is its own unit of work. Replaying the notification, even
//! concurrently, credits nothing new.

use crate::{
    award::{AwardOutcome, AwardRequest},
    catalog::ActionType,
    config::ReferralConfig,
    engine::PointsEngine,
    error::LedgerResult,
    rng::normalize_code,
    store::{LedgerReader, ReferralCommission},
    types::{Cents, ExternalEventId, UserId},
};
use serde::{Deserialize, Serialize};

/// A checkout result as delivered by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub session_id:    ExternalEventId,
    pub buyer_email:   String,
    #[serde(default)]
    pub referral_code: Option<String>,
    pub paid:          bool,
    #[serde(default)]
    pub amount_cents:  Option<Cents>,
}

/// Commission owed to a referrer for one payment.
pub fn commission_for(config: &ReferralConfig, amount_cents: Option<Cents>) -> Cents {
    match amount_cents {
        Some(amount) if amount > 0 => amount.saturating_mul(config.commission_bps) / 10_000,
        _ => config.flat_commission_cents,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "referral", rename_all = "snake_case")]
pub enum ReferralOutcome {
    /// No code on the notification.
    None,
    UnknownCode { code: String },
    SelfReferral,
    Credited { referrer_id: UserId, commission_cents: Cents },
    AlreadyCredited { referrer_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    /// False for unpaid notifications; nothing was written.
    pub processed: bool,
    pub buyer_id:  Option<UserId>,
    pub purchase:  Option<AwardOutcome>,
    pub referral:  ReferralOutcome,
}

impl PaymentReceipt {
    fn ignored() -> Self {
        Self { processed: false, buyer_id: None, purchase: None, referral: ReferralOutcome::None }
    }
}

impl PointsEngine {
    pub fn on_payment_completed(&self, event: &PaymentCompleted) -> LedgerResult<PaymentReceipt> {
        if !event.paid {
            log::info!("payment: session {} not paid, ignoring", event.session_id);
            return Ok(PaymentReceipt::ignored());
        }

        let buyer = self.get_or_create_user(&event.buyer_email)?;
        let session_id = event.session_id.as_str();
        let purchase = self.credit_in_own_unit(
            &AwardRequest::new(&buyer.user_id, ActionType::Purchase)
                .external_event(session_id)
                .note(format!("checkout {}", session_id.trim())),
        )?;

        let referral = match event.referral_code.as_deref().map(normalize_code) {
            None => ReferralOutcome::None,
            Some(code) if code.is_empty() => ReferralOutcome::None,
            Some(code) => self.credit_referrer(&code, &buyer.user_id, &buyer.email, event)?,
        };

        Ok(PaymentReceipt {
            processed: true,
            buyer_id:  Some(buyer.user_id),
            purchase:  Some(purchase),
            referral,
        })
    }

    fn credit_referrer(
        &self,
        code: &str,
        buyer_id: &str,
        buyer_email: &str,
        event: &PaymentCompleted,
    ) -> LedgerResult<ReferralOutcome> {
        let referrer = match self.store.user_by_referral_code(code)? {
            Some(user) => user,
            None => {
                log::warn!("payment: unknown referral code {code} on session {}", event.session_id);
                return Ok(ReferralOutcome::UnknownCode { code: code.to_string() });
            }
        };
        if referrer.user_id == buyer_id {
            log::warn!("payment: self-referral by {buyer_id} on session {}", event.session_id);
            return Ok(ReferralOutcome::SelfReferral);
        }

        let commission = commission_for(&self.config().referral, event.amount_cents);
        let outcome = self.credit_in_own_unit(
            &AwardRequest::new(&referrer.user_id, ActionType::ReferralPayout)
                .external_event(&event.session_id)
                .commission(commission, buyer_email)
                .note(format!("referral commission for {buyer_email}")),
        )?;

        Ok(if outcome.credited {
            ReferralOutcome::Credited { referrer_id: referrer.user_id, commission_cents: commission }
        } else {
            ReferralOutcome::AlreadyCredited { referrer_id: referrer.user_id }
        })
    }

    /// Commission rows earned by `referrer_id`, oldest first.
    pub fn referral_commissions(&self, referrer_id: &str) -> LedgerResult<Vec<ReferralCommission>> {
        self.store.referral_commissions(referrer_id)
    }

    pub fn commission_total_cents(&self, referrer_id: &str) -> LedgerResult<Cents> {
        self.store.commission_total_cents(referrer_id)
    }
}
