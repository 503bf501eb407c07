//! Clock state: the authoritative timer snapshot.
//!
//! RULE: Only the host engine mutates a ClockState that is persisted.
//! Replicas hold a mirror and adopt host snapshots verbatim.
//!
//! Field names serialize in camelCase; the persisted document and the
//! snapshot broadcast use exactly these names.

use crate::{
    policy::ParticipantClass,
    types::{Revision, Timestamp},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub running:                  bool,
    /// Deadline of the current turn; 0 when unset. Ignored while paused.
    pub end_at:                   Timestamp,
    pub paused:                   bool,
    /// Captured when pausing; meaningless while running.
    pub paused_remaining_seconds: u32,
    pub paused_by_system:         bool,
    pub players_pool_remaining_ms: u64,
    pub players_pool_total_ms:    u64,
    pub npc_pool_remaining_ms:    u64,
    pub npc_pool_total_ms:        u64,
    pub revision:                 Revision,
    pub last_updated_at:          Timestamp,
}

impl ClockState {
    /// A zero-valued clock that continues an existing revision sequence.
    pub fn cleared(revision: Revision) -> Self {
        Self { revision, ..Self::default() }
    }

    pub fn pool_remaining_ms(&self, class: ParticipantClass) -> u64 {
        match class {
            ParticipantClass::Primary   => self.players_pool_remaining_ms,
            ParticipantClass::Secondary => self.npc_pool_remaining_ms,
        }
    }

    pub fn pool_total_ms(&self, class: ParticipantClass) -> u64 {
        match class {
            ParticipantClass::Primary   => self.players_pool_total_ms,
            ParticipantClass::Secondary => self.npc_pool_total_ms,
        }
    }

    pub fn pools_initialized(&self) -> bool {
        self.players_pool_total_ms > 0 && self.npc_pool_total_ms > 0
    }

    /// Set both pools to fresh totals.
    pub fn fill_pools(&mut self, players_total_ms: u64, npc_total_ms: u64) {
        self.players_pool_total_ms = players_total_ms;
        self.players_pool_remaining_ms = players_total_ms;
        self.npc_pool_total_ms = npc_total_ms;
        self.npc_pool_remaining_ms = npc_total_ms;
    }

    /// Restore one pool to its total.
    pub fn refill_pool(&mut self, class: ParticipantClass) {
        match class {
            ParticipantClass::Primary => {
                self.players_pool_remaining_ms = self.players_pool_total_ms;
            }
            ParticipantClass::Secondary => {
                self.npc_pool_remaining_ms = self.npc_pool_total_ms;
            }
        }
    }

    /// Drain one pool, clamping at zero. Returns the new balance.
    pub fn drain_pool(&mut self, class: ParticipantClass, delta_ms: u64) -> u64 {
        let pool = match class {
            ParticipantClass::Primary   => &mut self.players_pool_remaining_ms,
            ParticipantClass::Secondary => &mut self.npc_pool_remaining_ms,
        };
        *pool = pool.saturating_sub(delta_ms);
        *pool
    }

    /// Milliseconds until `end_at`, clamped at zero.
    pub fn ms_until_end(&self, now: Timestamp) -> u64 {
        u64::try_from(self.end_at.saturating_sub(now)).unwrap_or(0)
    }

    /// Whole seconds until `end_at`, rounded up. This is what a pause captures.
    pub fn seconds_until_end(&self, now: Timestamp) -> u32 {
        ceil_seconds(self.ms_until_end(now))
    }

    /// Record a state change: bump the revision and stamp the time.
    pub fn stamp(&mut self, now: Timestamp) {
        self.revision += 1;
        self.last_updated_at = now;
    }
}

/// Milliseconds to whole seconds, rounding up.
pub fn ceil_seconds(ms: u64) -> u32 {
    u32::try_from(ms.div_ceil(1000)).unwrap_or(u32::MAX)
}
