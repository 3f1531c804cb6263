use super::UnitOfWork;
use crate::{
    catalog::ActionType,
    clock::{from_millis, to_millis},
    error::LedgerResult,
    types::{Cents, EntryId, Points, UserId},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, OptionalExtension, Row, ToSql,
};

impl ToSql for ActionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ActionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub entry_id:          EntryId,
    pub user_id:           UserId,
    pub action:            ActionType,
    pub points:            Points,
    pub cents:             Cents,
    pub scope_key:         String,
    pub external_event_id: Option<String>,
    pub counterparty:      Option<String>,
    pub note:              String,
    pub created_at:        DateTime<Utc>,
}

/// A row about to be appended.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub user_id:           &'a str,
    pub action:            ActionType,
    pub points:            Points,
    pub cents:             Cents,
    pub scope_key:         &'a str,
    pub external_event_id: Option<&'a str>,
    pub counterparty:      Option<&'a str>,
    pub note:              &'a str,
    pub created_at:        DateTime<Utc>,
}

/// A referral-payout row seen through the `referral_commission` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralCommission {
    pub entry_id:         EntryId,
    pub referrer_id:      UserId,
    pub buyer_email:      Option<String>,
    pub session_id:       Option<String>,
    pub commission_cents: Cents,
    pub created_at:       DateTime<Utc>,
}

const ENTRY_COLUMNS: &str = "entry_id, user_id, action, points, cents, scope_key,
     external_event_id, counterparty, note, created_at";

fn map_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        entry_id:          row.get(0)?,
        user_id:           row.get(1)?,
        action:            row.get(2)?,
        points:            row.get(3)?,
        cents:             row.get(4)?,
        scope_key:         row.get(5)?,
        external_event_id: row.get(6)?,
        counterparty:      row.get(7)?,
        note:              row.get(8)?,
        created_at:        from_millis(row.get(9)?),
    })
}

pub(super) fn list_by_user(
    conn: &Connection,
    user_id: &str,
    action: Option<ActionType>,
) -> LedgerResult<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entry
         WHERE user_id = ?1 AND (?2 IS NULL OR action = ?2)
         ORDER BY entry_id ASC"
    ))?;
    let entries = stmt
        .query_map(params![user_id, action], map_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub(super) fn entry_by_id(conn: &Connection, entry_id: EntryId) -> LedgerResult<Option<LedgerEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entry WHERE entry_id = ?1"),
            params![entry_id],
            map_entry,
        )
        .optional()?;
    Ok(entry)
}

pub(super) fn point_sum(conn: &Connection, user_id: &str) -> LedgerResult<Points> {
    let sum = conn.query_row(
        "SELECT COALESCE(SUM(points), 0) FROM ledger_entry WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

pub(super) fn cents_sum(conn: &Connection, user_id: &str) -> LedgerResult<Cents> {
    let sum = conn.query_row(
        "SELECT COALESCE(SUM(cents), 0) FROM ledger_entry WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

pub(super) fn entry_count(conn: &Connection, user_id: &str, action: ActionType) -> LedgerResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM ledger_entry WHERE user_id = ?1 AND action = ?2",
        params![user_id, action],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub(super) fn has_entry(conn: &Connection, user_id: &str, action: ActionType) -> LedgerResult<bool> {
    let found = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM ledger_entry WHERE user_id = ?1 AND action = ?2)",
        params![user_id, action],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub(super) fn has_entry_since(
    conn: &Connection,
    user_id: &str,
    action: ActionType,
    since_millis: i64,
) -> LedgerResult<bool> {
    let found = conn.query_row(
        "SELECT EXISTS (
            SELECT 1 FROM ledger_entry
            WHERE user_id = ?1 AND action = ?2 AND created_at >= ?3
         )",
        params![user_id, action, since_millis],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub(super) fn has_entry_for_event(
    conn: &Connection,
    user_id: &str,
    action: ActionType,
    external_event_id: &str,
) -> LedgerResult<bool> {
    let found = conn.query_row(
        "SELECT EXISTS (
            SELECT 1 FROM ledger_entry
            WHERE user_id = ?1 AND action = ?2 AND external_event_id = ?3
         )",
        params![user_id, action, external_event_id],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub(super) fn has_entry_with_scope_key(
    conn: &Connection,
    user_id: &str,
    action: ActionType,
    scope_key: &str,
) -> LedgerResult<bool> {
    let found = conn.query_row(
        "SELECT EXISTS (
            SELECT 1 FROM ledger_entry
            WHERE user_id = ?1 AND action = ?2 AND scope_key = ?3
         )",
        params![user_id, action, scope_key],
        |row| row.get(0),
    )?;
    Ok(found)
}

pub(super) fn distinct_actions(conn: &Connection, user_id: &str) -> LedgerResult<Vec<ActionType>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT action FROM ledger_entry WHERE user_id = ?1 ORDER BY action",
    )?;
    let actions = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<Result<Vec<ActionType>, _>>()?;
    Ok(actions)
}

pub(super) fn referral_commissions(
    conn: &Connection,
    referrer_id: &str,
) -> LedgerResult<Vec<ReferralCommission>> {
    let mut stmt = conn.prepare(
        "SELECT entry_id, referrer_id, buyer_email, session_id, commission_cents, created_at
         FROM referral_commission
         WHERE referrer_id = ?1
         ORDER BY entry_id ASC",
    )?;
    let rows = stmt
        .query_map(params![referrer_id], |row| {
            Ok(ReferralCommission {
                entry_id:         row.get(0)?,
                referrer_id:      row.get(1)?,
                buyer_email:      row.get(2)?,
                session_id:       row.get(3)?,
                commission_cents: row.get(4)?,
                created_at:       from_millis(row.get(5)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl UnitOfWork<'_> {
    /// Append one ledger row.
    ///
    /// Returns `None` when `(user_id, action, scope_key)` already exists: the
    /// uniqueness constraint is the authoritative "already credited" signal.
    pub fn append_entry(&self, entry: &NewEntry<'_>) -> LedgerResult<Option<EntryId>> {
        let inserted = self.tx.execute(
            "INSERT INTO ledger_entry (
                user_id, action, points, cents, scope_key,
                external_event_id, counterparty, note, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (user_id, action, scope_key) DO NOTHING",
            params![
                entry.user_id,
                entry.action,
                entry.points,
                entry.cents,
                entry.scope_key,
                entry.external_event_id,
                entry.counterparty,
                entry.note,
                to_millis(entry.created_at),
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(self.tx.last_insert_rowid()))
    }
}
