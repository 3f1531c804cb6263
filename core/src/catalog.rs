//! Action catalog: what each action is worth and how often it may pay out.
//!
//! Scopes are intrinsic to the action and never configurable: a change of
//! scope changes the meaning of every existing ledger row. Point values come
//! from config.

use crate::{
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    types::Points,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};

/// Every point- or commission-earning action.
/// Variants are stored by `as_str()`. Never rename an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ShareFacebook,
    ShareX,
    ShareInstagram,
    ContestJoin,
    Purchase,
    SignupBonus,
    ReferralPayout,
    ProgressionBonus,
    CompositeBonus,
}

impl ActionType {
    pub const ALL: [ActionType; 9] = [
        Self::ShareFacebook,
        Self::ShareX,
        Self::ShareInstagram,
        Self::ContestJoin,
        Self::Purchase,
        Self::SignupBonus,
        Self::ReferralPayout,
        Self::ProgressionBonus,
        Self::CompositeBonus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShareFacebook    => "share_facebook",
            Self::ShareX           => "share_x",
            Self::ShareInstagram   => "share_instagram",
            Self::ContestJoin      => "contest_join",
            Self::Purchase         => "purchase",
            Self::SignupBonus      => "signup_bonus",
            Self::ReferralPayout   => "referral_payout",
            Self::ProgressionBonus => "progression_bonus",
            Self::CompositeBonus   => "composite_bonus",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::ShareFacebook | Self::ShareX | Self::ShareInstagram => Scope::Daily,
            Self::ContestJoin | Self::SignupBonus | Self::CompositeBonus => Scope::Lifetime,
            Self::Purchase | Self::ReferralPayout => Scope::ExternalEvent,
            Self::ProgressionBonus => Scope::Cycle,
        }
    }

    /// Actions that count toward the composite achievement.
    pub fn is_composite_prerequisite(&self) -> bool {
        matches!(
            self,
            Self::ShareFacebook | Self::ShareX | Self::ShareInstagram | Self::Purchase
        )
    }

    /// Credited only as a consequence of another operation (a claim, an
    /// unlock, a payment), never by a direct award request.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::ProgressionBonus | Self::CompositeBonus | Self::ReferralPayout)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| LedgerError::InvalidAction { name: s.to_string() })
    }
}

/// The rule used to decide whether an action has already been credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Once per user, ever.
    Lifetime,
    /// Once per user per UTC calendar day.
    Daily,
    /// Once per user per upstream event id.
    ExternalEvent,
    /// Once per progression sequence value.
    Cycle,
}

/// Social platforms with a daily share cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    X,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Self::Facebook, Self::X, Self::Instagram];

    pub fn action(&self) -> ActionType {
        match self {
            Self::Facebook  => ActionType::ShareFacebook,
            Self::X         => ActionType::ShareX,
            Self::Instagram => ActionType::ShareInstagram,
        }
    }
}

impl FromStr for Platform {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facebook" | "fb"      => Ok(Self::Facebook),
            "x" | "twitter"        => Ok(Self::X),
            "instagram" | "ig"     => Ok(Self::Instagram),
            other => Err(LedgerError::InvalidAction { name: format!("share_{other}") }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub action: ActionType,
    pub points: Points,
    pub scope:  Scope,
}

/// Resolved point values for every action.
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    entries: HashMap<ActionType, ActionSpec>,
}

impl ActionCatalog {
    pub fn from_config(config: &LedgerConfig) -> Self {
        let entries = config
            .action_points
            .iter()
            .map(|(action, points)| {
                (*action, ActionSpec { action: *action, points: *points, scope: action.scope() })
            })
            .collect();
        Self { entries }
    }

    /// Missing entries are a deployment error, not a user error.
    pub fn get(&self, action: ActionType) -> LedgerResult<ActionSpec> {
        self.entries
            .get(&action)
            .copied()
            .ok_or_else(|| LedgerError::InvalidAction { name: action.as_str().to_string() })
    }
}
