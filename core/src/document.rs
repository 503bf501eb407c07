//! The shared encounter document: a replicated key/value attribute
//! owned by the host application.
//!
//! RULE: Only the host role writes flags. Everything persisted about a
//! running clock lives under two flags on the encounter document.

use crate::{
    error::{TimerError, TimerResult},
    event::EventLogEntry,
    snapshot::{read_snapshot, PersistedClock, SnapshotView, START_PAUSED_FLAG, STATE_FLAG},
    store::FlagStore,
    types::{Revision, Timestamp},
};
use serde_json::Value;

pub trait SharedDocument: Send {
    fn set_flag(
        &mut self,
        encounter_id: &str,
        key: &str,
        value: &Value,
        revision: Revision,
        now: Timestamp,
    ) -> TimerResult<()>;

    fn get_flag(&self, encounter_id: &str, key: &str) -> TimerResult<Option<Value>>;

    fn unset_flag(&mut self, encounter_id: &str, key: &str) -> TimerResult<()>;

    /// The revision last written under `key`, when the document tracks one.
    fn flag_revision(&self, _encounter_id: &str, _key: &str) -> TimerResult<Option<Revision>> {
        Ok(None)
    }

    /// Append to the audit trail, if the document keeps one.
    fn record_event(&mut self, _entry: &EventLogEntry) -> TimerResult<()> {
        Ok(())
    }
}

impl SharedDocument for FlagStore {
    fn set_flag(
        &mut self,
        encounter_id: &str,
        key: &str,
        value: &Value,
        revision: Revision,
        now: Timestamp,
    ) -> TimerResult<()> {
        let json = serde_json::to_string(value)?;
        FlagStore::set_flag(self, encounter_id, key, &json, revision, now)
    }

    fn get_flag(&self, encounter_id: &str, key: &str) -> TimerResult<Option<Value>> {
        match FlagStore::get_flag(self, encounter_id, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn unset_flag(&mut self, encounter_id: &str, key: &str) -> TimerResult<()> {
        FlagStore::unset_flag(self, encounter_id, key)
    }

    fn flag_revision(&self, encounter_id: &str, key: &str) -> TimerResult<Option<Revision>> {
        FlagStore::flag_revision(self, encounter_id, key)
    }

    fn record_event(&mut self, entry: &EventLogEntry) -> TimerResult<()> {
        self.append_event(entry)
    }
}

/// Persist the clock record under the `state` flag.
pub fn write_clock(
    doc: &mut dyn SharedDocument,
    encounter_id: &str,
    record: &PersistedClock,
    now: Timestamp,
) -> TimerResult<()> {
    let value = serde_json::to_value(record)?;
    doc.set_flag(encounter_id, STATE_FLAG, &value, record.clock.revision, now)
}

/// Read the clock record. Malformed or unreadable JSON is "no state yet".
pub fn read_clock(
    doc: &dyn SharedDocument,
    encounter_id: &str,
) -> TimerResult<Option<SnapshotView>> {
    let value = match doc.get_flag(encounter_id, STATE_FLAG) {
        Ok(Some(v)) => v,
        Ok(None) => return Ok(None),
        Err(TimerError::Serialization(e)) => {
            log::warn!("encounter={encounter_id} unreadable clock record: {e}");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let view = read_snapshot(&value);
    if view.is_none() {
        log::warn!("encounter={encounter_id} malformed clock record ignored");
    }
    Ok(view)
}

pub fn clear_clock(doc: &mut dyn SharedDocument, encounter_id: &str) -> TimerResult<()> {
    doc.unset_flag(encounter_id, STATE_FLAG)
}

pub fn set_start_paused(
    doc: &mut dyn SharedDocument,
    encounter_id: &str,
    now: Timestamp,
) -> TimerResult<()> {
    doc.set_flag(encounter_id, START_PAUSED_FLAG, &Value::Bool(true), 0, now)
}

/// Read and clear the start-paused flag in one step.
pub fn take_start_paused(doc: &mut dyn SharedDocument, encounter_id: &str) -> TimerResult<bool> {
    let flagged = matches!(
        doc.get_flag(encounter_id, START_PAUSED_FLAG)?,
        Some(Value::Bool(true))
    );
    if flagged {
        doc.unset_flag(encounter_id, START_PAUSED_FLAG)?;
    }
    Ok(flagged)
}

pub fn clear_start_paused(doc: &mut dyn SharedDocument, encounter_id: &str) -> TimerResult<()> {
    doc.unset_flag(encounter_id, START_PAUSED_FLAG)
}
