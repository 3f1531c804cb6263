use super::UnitOfWork;
use crate::{
    clock::{from_millis, to_millis},
    error::LedgerResult,
    types::{Points, UserId},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRow {
    pub user_id:                 UserId,
    pub email:                   String,
    pub referral_code:           String,
    pub balance:                 Points,
    pub target:                  Option<Points>,
    pub sequence:                i64,
    pub signup_bonus_awarded:    bool,
    pub composite_bonus_awarded: bool,
    pub created_at:              DateTime<Utc>,
}

const USER_COLUMNS: &str = "user_id, email, referral_code, balance, target, sequence,
     signup_bonus_awarded, composite_bonus_awarded, created_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        user_id:                 row.get(0)?,
        email:                   row.get(1)?,
        referral_code:           row.get(2)?,
        balance:                 row.get(3)?,
        target:                  row.get(4)?,
        sequence:                row.get(5)?,
        signup_bonus_awarded:    row.get::<_, i64>(6)? != 0,
        composite_bonus_awarded: row.get::<_, i64>(7)? != 0,
        created_at:              from_millis(row.get(8)?),
    })
}

pub(super) fn user_by_id(conn: &Connection, user_id: &str) -> LedgerResult<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            map_user,
        )
        .optional()?;
    Ok(row)
}

pub(super) fn user_by_email(conn: &Connection, email: &str) -> LedgerResult<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            map_user,
        )
        .optional()?;
    Ok(row)
}

pub(super) fn user_by_referral_code(
    conn: &Connection,
    code: &str,
) -> LedgerResult<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE referral_code = ?1"),
            params![code],
            map_user,
        )
        .optional()?;
    Ok(row)
}

pub(super) fn all_user_ids(conn: &Connection) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY created_at, user_id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Lifetime-once flags cached on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFlag {
    SignupBonusAwarded,
    CompositeBonusAwarded,
}

impl UserFlag {
    fn column(&self) -> &'static str {
        match self {
            Self::SignupBonusAwarded    => "signup_bonus_awarded",
            Self::CompositeBonusAwarded => "composite_bonus_awarded",
        }
    }
}

impl UnitOfWork<'_> {
    // ── Identity ──────────────────────────────────────────────────

    /// Insert a user unless the email or referral code is already taken.
    /// Returns false on any uniqueness conflict; the caller decides which.
    pub fn insert_user_if_absent(
        &self,
        user_id: &str,
        email: &str,
        referral_code: &str,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let inserted = self.tx.execute(
            "INSERT INTO users (user_id, email, referral_code, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT DO NOTHING",
            params![user_id, email, referral_code, to_millis(created_at)],
        )?;
        Ok(inserted == 1)
    }

    // ── Balance ───────────────────────────────────────────────────

    /// Add `delta` to the materialized balance and return the new value.
    pub fn add_to_balance(&self, user_id: &str, delta: Points) -> LedgerResult<Option<Points>> {
        let balance = self
            .tx
            .query_row(
                "UPDATE users SET balance = balance + ?1 WHERE user_id = ?2 RETURNING balance",
                params![delta, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    pub fn set_flag(&self, user_id: &str, flag: UserFlag) -> LedgerResult<()> {
        self.tx.execute(
            &format!("UPDATE users SET {} = 1 WHERE user_id = ?1", flag.column()),
            params![user_id],
        )?;
        Ok(())
    }

    // ── Progression ───────────────────────────────────────────────

    /// Uninitialized → Chasing(target, 1). No-op if already initialized.
    pub fn initialize_progression(&self, user_id: &str, target: Points) -> LedgerResult<bool> {
        let updated = self.tx.execute(
            "UPDATE users SET target = ?1, sequence = 1
             WHERE user_id = ?2 AND sequence = 0",
            params![target, user_id],
        )?;
        Ok(updated == 1)
    }

    /// Compare-and-swap: move to the next cycle only if the stored sequence
    /// still equals `expected_sequence`.
    pub fn advance_progression(
        &self,
        user_id: &str,
        expected_sequence: i64,
        new_target: Points,
    ) -> LedgerResult<bool> {
        let updated = self.tx.execute(
            "UPDATE users SET target = ?1, sequence = sequence + 1
             WHERE user_id = ?2 AND sequence = ?3",
            params![new_target, user_id, expected_sequence],
        )?;
        Ok(updated == 1)
    }
}
