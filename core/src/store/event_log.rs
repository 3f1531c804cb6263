use super::{LedgerStore, UnitOfWork};
use crate::{
    clock::to_millis,
    error::LedgerResult,
    event::{EventLogEntry, LedgerEvent},
};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl UnitOfWork<'_> {
    pub fn append_event(&self, event: &LedgerEvent, at: DateTime<Utc>) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO event_log (user_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.user_id(),
                event.event_type(),
                serde_json::to_string(event)?,
                to_millis(at),
            ],
        )?;
        Ok(())
    }
}

impl LedgerStore {
    // ── Outbox ────────────────────────────────────────────────────

    /// Undispatched events, oldest first.
    pub fn pending_events(&self, limit: usize) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, event_type, payload, created_at
             FROM event_log WHERE dispatched_at IS NULL
             ORDER BY id ASC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(EventLogEntry {
                    id:         row.get(0)?,
                    user_id:    row.get(1)?,
                    event_type: row.get(2)?,
                    payload:    row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn pending_event_count(&self) -> LedgerResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE dispatched_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark events as delivered. Already-acknowledged ids are ignored.
    pub fn acknowledge_events(&self, ids: &[i64], at: DateTime<Utc>) -> LedgerResult<usize> {
        let uow = self.begin()?;
        let mut acknowledged = 0;
        for id in ids {
            acknowledged += uow.tx.execute(
                "UPDATE event_log SET dispatched_at = ?1
                 WHERE id = ?2 AND dispatched_at IS NULL",
                params![to_millis(at), id],
            )?;
        }
        uow.commit()?;
        Ok(acknowledged)
    }

    /// Every event for one user, oldest first (tests and support tooling).
    pub fn events_for_user(&self, user_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, event_type, payload, created_at
             FROM event_log WHERE user_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(EventLogEntry {
                    id:         row.get(0)?,
                    user_id:    row.get(1)?,
                    event_type: row.get(2)?,
                    payload:    row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
