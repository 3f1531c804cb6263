//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Engine components call store methods and never execute SQL directly.
//!
//! Every mutation runs inside a [`UnitOfWork`], which is a `BEGIN IMMEDIATE`
//! transaction: the write lock is taken up front, so two units of work on
//! the same database are strictly serialized and a read inside one is never
//! invalidated by a concurrent commit. Dropping a unit of work without
//! calling [`UnitOfWork::commit`] rolls it back.

mod event_log;
mod ledger;
mod user;

pub use ledger::{LedgerEntry, NewEntry, ReferralCommission};
pub use user::{UserFlag, UserRow};

use crate::{
    catalog::ActionType,
    clock::to_millis,
    error::LedgerResult,
    types::{Cents, EntryId, Points},
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Duration;

/// How long a writer waits for the database lock before reporting
/// `StorageUnavailable`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl LedgerStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> LedgerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to run on every open.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_event_log.sql"))?;
        Ok(())
    }

    /// Start an atomic unit of work holding the database write lock.
    pub fn begin(&self) -> LedgerResult<UnitOfWork<'_>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        Ok(UnitOfWork { tx })
    }
}

/// One atomic, serialized transaction. All balance, ledger, progression and
/// outbox writes happen through this type.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl UnitOfWork<'_> {
    pub fn commit(self) -> LedgerResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Explicit rollback; equivalent to dropping the unit of work.
    pub fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

mod sealed {
    /// Raw connection access stays inside the store.
    pub trait Sealed {
        fn conn(&self) -> &rusqlite::Connection;
    }
}

/// Read queries shared by the store (autocommit reads, used for display)
/// and by a unit of work (reads that must see the locked snapshot).
pub trait LedgerReader: sealed::Sealed {
    fn user(&self, user_id: &str) -> LedgerResult<Option<UserRow>> {
        user::user_by_id(self.conn(), user_id)
    }

    fn user_by_email(&self, normalized_email: &str) -> LedgerResult<Option<UserRow>> {
        user::user_by_email(self.conn(), normalized_email)
    }

    fn user_by_referral_code(&self, code: &str) -> LedgerResult<Option<UserRow>> {
        user::user_by_referral_code(self.conn(), code)
    }

    fn user_ids(&self) -> LedgerResult<Vec<String>> {
        user::all_user_ids(self.conn())
    }

    /// Entries for a user in insertion order, optionally filtered by action.
    fn list_by_user(
        &self,
        user_id: &str,
        action: Option<ActionType>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        ledger::list_by_user(self.conn(), user_id, action)
    }

    fn ledger_point_sum(&self, user_id: &str) -> LedgerResult<Points> {
        ledger::point_sum(self.conn(), user_id)
    }

    fn commission_total_cents(&self, user_id: &str) -> LedgerResult<Cents> {
        ledger::cents_sum(self.conn(), user_id)
    }

    fn entry_count(&self, user_id: &str, action: ActionType) -> LedgerResult<i64> {
        ledger::entry_count(self.conn(), user_id, action)
    }

    /// Any entry of this action for this user, ever.
    fn has_entry(&self, user_id: &str, action: ActionType) -> LedgerResult<bool> {
        ledger::has_entry(self.conn(), user_id, action)
    }

    /// Any entry of this action created at or after `since`.
    fn has_entry_since(
        &self,
        user_id: &str,
        action: ActionType,
        since: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        ledger::has_entry_since(self.conn(), user_id, action, to_millis(since))
    }

    /// Any entry of this action keyed by exactly this external event id.
    fn has_entry_for_event(
        &self,
        user_id: &str,
        action: ActionType,
        external_event_id: &str,
    ) -> LedgerResult<bool> {
        ledger::has_entry_for_event(self.conn(), user_id, action, external_event_id)
    }

    fn has_entry_with_scope_key(
        &self,
        user_id: &str,
        action: ActionType,
        scope_key: &str,
    ) -> LedgerResult<bool> {
        ledger::has_entry_with_scope_key(self.conn(), user_id, action, scope_key)
    }

    /// The distinct actions this user has ever been credited for.
    fn distinct_actions(&self, user_id: &str) -> LedgerResult<Vec<ActionType>> {
        ledger::distinct_actions(self.conn(), user_id)
    }

    fn referral_commissions(&self, referrer_id: &str) -> LedgerResult<Vec<ReferralCommission>> {
        ledger::referral_commissions(self.conn(), referrer_id)
    }

    fn entry(&self, entry_id: EntryId) -> LedgerResult<Option<LedgerEntry>> {
        ledger::entry_by_id(self.conn(), entry_id)
    }
}

impl sealed::Sealed for LedgerStore {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl sealed::Sealed for UnitOfWork<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }
}

impl LedgerReader for LedgerStore {}
impl LedgerReader for UnitOfWork<'_> {}
