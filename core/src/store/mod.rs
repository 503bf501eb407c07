//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Engines reach it through the SharedDocument trait and never
//! execute SQL directly.

use crate::{
    error::TimerResult,
    event::EventLogEntry,
    types::{Revision, Timestamp},
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct FlagStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or shared-cache URI
}

impl FlagStore {
    pub fn open(path: &str) -> TimerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> TimerResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based or shared-cache databases, this opens the same data.
    pub fn reopen(&self) -> TimerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> TimerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Flags ──────────────────────────────────────────────────

    pub fn set_flag(
        &self,
        encounter_id: &str,
        key: &str,
        value_json: &str,
        revision: Revision,
        now: Timestamp,
    ) -> TimerResult<()> {
        self.conn.execute(
            "INSERT INTO encounter_flag (encounter_id, flag_key, value_json, revision, write_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT (encounter_id, flag_key) DO UPDATE SET
                value_json  = excluded.value_json,
                revision    = excluded.revision,
                write_count = encounter_flag.write_count + 1,
                updated_at  = excluded.updated_at",
            params![encounter_id, key, value_json, revision as i64, now],
        )?;
        Ok(())
    }

    pub fn get_flag(&self, encounter_id: &str, key: &str) -> TimerResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value_json FROM encounter_flag
                 WHERE encounter_id = ?1 AND flag_key = ?2",
                params![encounter_id, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn unset_flag(&self, encounter_id: &str, key: &str) -> TimerResult<()> {
        self.conn.execute(
            "DELETE FROM encounter_flag WHERE encounter_id = ?1 AND flag_key = ?2",
            params![encounter_id, key],
        )?;
        Ok(())
    }

    /// How many times a flag has been written since it was last created.
    pub fn flag_write_count(&self, encounter_id: &str, key: &str) -> TimerResult<u64> {
        let count = self
            .conn
            .query_row(
                "SELECT write_count FROM encounter_flag
                 WHERE encounter_id = ?1 AND flag_key = ?2",
                params![encounter_id, key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u64)
    }

    /// The revision stored alongside a flag, readable even when its JSON is not.
    pub fn flag_revision(&self, encounter_id: &str, key: &str) -> TimerResult<Option<Revision>> {
        let revision = self
            .conn
            .query_row(
                "SELECT revision FROM encounter_flag
                 WHERE encounter_id = ?1 AND flag_key = ?2",
                params![encounter_id, key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(revision.map(|r| r as u64))
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> TimerResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (encounter_id, revision, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.encounter_id,
                entry.revision as i64,
                entry.event_type,
                entry.payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_encounter(&self, encounter_id: &str) -> TimerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, encounter_id, revision, event_type, payload, created_at
             FROM event_log WHERE encounter_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![encounter_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    encounter_id: row.get(1)?,
                    revision: row.get::<_, i64>(2)? as u64,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, encounter_id: &str, event_type: &str) -> TimerResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE encounter_id = ?1 AND event_type = ?2",
            params![encounter_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FlagStore {
        let store = FlagStore::in_memory().expect("in-memory store");
        store.migrate().expect("migration");
        store
    }

    #[test]
    fn flags_upsert_and_count_writes() {
        let s = store();
        s.set_flag("enc", "state", "{\"a\":1}", 1, 10).expect("first write");
        s.set_flag("enc", "state", "{\"a\":2}", 2, 20).expect("second write");
        assert_eq!(s.get_flag("enc", "state").expect("read").as_deref(), Some("{\"a\":2}"));
        assert_eq!(s.flag_write_count("enc", "state").expect("count"), 2);
        assert_eq!(s.flag_revision("enc", "state").expect("revision"), Some(2));
    }

    #[test]
    fn unset_removes_flag() {
        let s = store();
        s.set_flag("enc", "startPaused", "true", 0, 0).expect("write");
        s.unset_flag("enc", "startPaused").expect("unset");
        assert!(s.get_flag("enc", "startPaused").expect("read").is_none());
        assert_eq!(s.flag_write_count("enc", "startPaused").expect("count"), 0);
    }

    #[test]
    fn events_come_back_in_append_order() {
        let s = store();
        for (i, kind) in ["turn_started", "warning", "expired"].iter().enumerate() {
            s.append_event(&EventLogEntry {
                id: None,
                encounter_id: "enc".into(),
                revision: i as u64,
                event_type: kind.to_string(),
                payload: "{}".into(),
                created_at: i as i64,
            })
            .expect("append");
        }
        let kinds: Vec<_> = s
            .events_for_encounter("enc")
            .expect("read")
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(kinds, vec!["turn_started", "warning", "expired"]);
        assert_eq!(s.event_count("enc", "warning").expect("count"), 1);
    }
}
