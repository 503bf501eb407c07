//! Snapshot serialization: the persisted clock record to/from JSON.
//!
//! The host writes a PersistedClock under the `state` flag of the
//! encounter document. Replicas read the same shape from the
//! `snapshotChanged` broadcast.
//!
//! Reading is lenient: a field that is missing keeps the mirror's
//! previous value; a record that is not an object, or has a field of
//! the wrong type, is treated as "no state yet".

use crate::{
    clock::ClockState,
    encounter::TurnMarker,
    types::{Revision, Timestamp},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATE_FLAG: &str = "state";
pub const START_PAUSED_FLAG: &str = "startPaused";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedClock {
    pub marker: TurnMarker,
    pub clock:  ClockState,
}

/// A possibly partial clock record, as read from the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockPatch {
    pub running:                   Option<bool>,
    pub end_at:                    Option<Timestamp>,
    pub paused:                    Option<bool>,
    pub paused_remaining_seconds:  Option<u32>,
    pub paused_by_system:          Option<bool>,
    pub players_pool_remaining_ms: Option<u64>,
    pub players_pool_total_ms:     Option<u64>,
    pub npc_pool_remaining_ms:     Option<u64>,
    pub npc_pool_total_ms:         Option<u64>,
    pub revision:                  Option<Revision>,
    pub last_updated_at:           Option<Timestamp>,
}

impl ClockPatch {
    /// Overlay onto `state`. Booleans default to false when absent;
    /// everything else keeps the previous value.
    pub fn apply_to(&self, state: &mut ClockState) {
        state.running = self.running.unwrap_or(false);
        state.paused = self.paused.unwrap_or(false);
        state.paused_by_system = self.paused_by_system.unwrap_or(false);
        if let Some(v) = self.end_at { state.end_at = v; }
        if let Some(v) = self.paused_remaining_seconds { state.paused_remaining_seconds = v; }
        if let Some(v) = self.players_pool_remaining_ms { state.players_pool_remaining_ms = v; }
        if let Some(v) = self.players_pool_total_ms { state.players_pool_total_ms = v; }
        if let Some(v) = self.npc_pool_remaining_ms { state.npc_pool_remaining_ms = v; }
        if let Some(v) = self.npc_pool_total_ms { state.npc_pool_total_ms = v; }
        if let Some(v) = self.revision { state.revision = v; }
        if let Some(v) = self.last_updated_at { state.last_updated_at = v; }
    }
}

impl From<&ClockState> for ClockPatch {
    fn from(s: &ClockState) -> Self {
        Self {
            running:                   Some(s.running),
            end_at:                    Some(s.end_at),
            paused:                    Some(s.paused),
            paused_remaining_seconds:  Some(s.paused_remaining_seconds),
            paused_by_system:          Some(s.paused_by_system),
            players_pool_remaining_ms: Some(s.players_pool_remaining_ms),
            players_pool_total_ms:     Some(s.players_pool_total_ms),
            npc_pool_remaining_ms:     Some(s.npc_pool_remaining_ms),
            npc_pool_total_ms:         Some(s.npc_pool_total_ms),
            revision:                  Some(s.revision),
            last_updated_at:           Some(s.last_updated_at),
        }
    }
}

/// A lenient view of a persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotView {
    pub marker: Option<TurnMarker>,
    pub patch:  ClockPatch,
}

impl SnapshotView {
    pub fn revision(&self) -> Revision {
        self.patch.revision.unwrap_or(0)
    }
}

impl From<&PersistedClock> for SnapshotView {
    fn from(p: &PersistedClock) -> Self {
        Self { marker: Some(p.marker), patch: ClockPatch::from(&p.clock) }
    }
}

/// Parse the value stored under the `state` flag.
///
/// Accepts both the full `{marker, clock}` record and a bare clock
/// object. Returns None for anything malformed.
pub fn read_snapshot(value: &Value) -> Option<SnapshotView> {
    let obj = value.as_object()?;
    let (marker, clock) = match obj.get("clock") {
        Some(clock) => {
            let marker = match obj.get("marker") {
                Some(m) => Some(serde_json::from_value::<TurnMarker>(m.clone()).ok()?),
                None => None,
            };
            (marker, clock)
        }
        None => (None, value),
    };
    if !clock.is_object() {
        return None;
    }
    let patch = serde_json::from_value::<ClockPatch>(clock.clone()).ok()?;
    Some(SnapshotView { marker, patch })
}
