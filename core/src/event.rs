//! Ledger events: the outbox for downstream collaborators.
//!
//! RULE: An event is appended in the same unit of work as the mutation it
//! describes. If the mutation rolls back, so does the event.

use crate::{
    catalog::ActionType,
    types::{Cents, EntryId, Points, UserId},
};
use serde::{Deserialize, Serialize};

/// Every event the ledger emits.
/// Variants are added over time; never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    UserEnrolled {
        user_id:       UserId,
        email:         String,
        referral_code: String,
    },
    PointsCredited {
        user_id:     UserId,
        entry_id:    EntryId,
        action:      ActionType,
        points:      Points,
        new_balance: Points,
    },
    CommissionCredited {
        referrer_id: UserId,
        entry_id:    EntryId,
        buyer_email: String,
        session_id:  String,
        cents:       Cents,
    },
    TargetCaught {
        user_id:      UserId,
        sequence:     i64,
        bonus:        Points,
        new_target:   Points,
        new_sequence: i64,
    },
    AchievementUnlocked {
        user_id:     UserId,
        achievement: ActionType,
    },
}

impl LedgerEvent {
    /// Stable name for the event_type column.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserEnrolled { .. }        => "user_enrolled",
            Self::PointsCredited { .. }      => "points_credited",
            Self::CommissionCredited { .. }  => "commission_credited",
            Self::TargetCaught { .. }        => "target_caught",
            Self::AchievementUnlocked { .. } => "achievement_unlocked",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::UserEnrolled { user_id, .. }
            | Self::PointsCredited { user_id, .. }
            | Self::TargetCaught { user_id, .. }
            | Self::AchievementUnlocked { user_id, .. } => user_id,
            Self::CommissionCredited { referrer_id, .. } => referrer_id,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         i64,
    pub user_id:    UserId,
    pub event_type: String,
    pub payload:    String, // JSON-serialized LedgerEvent
    pub created_at: i64,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}
