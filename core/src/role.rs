//! Timer roles: the host writer and the display-only replica.
//!
//! RULE: A session runs exactly one host. The role is chosen once, when
//! the service is constructed, and never changes afterwards.

use crate::{
    clock::ClockState,
    encounter::Encounter,
    error::TimerResult,
    event::TimerEvent,
    presenter::HudUpdate,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Host,
    Replica,
}

/// Where the local clock sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Expired,
}

impl Phase {
    pub fn of(state: &ClockState, expired: bool) -> Self {
        if !state.running {
            Phase::Idle
        } else if expired {
            Phase::Expired
        } else if state.paused {
            Phase::Paused
        } else {
            Phase::Running
        }
    }
}

/// User-triggered controls. Only Reset is meaningful on a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Reset,
    Pause,
    Resume,
    TogglePause,
    Advance,
    Retreat,
}

pub trait TimerRole: Send {
    fn kind(&self) -> RoleKind;

    /// The clock this role is displaying (authoritative on the host).
    fn clock(&self) -> &ClockState;

    fn phase(&self) -> Phase;

    /// What the presenter is currently showing, if visible.
    fn displayed(&self) -> Option<&HudUpdate>;

    /// Attach to an encounter already in progress (late join, reconnect).
    fn join(&mut self, encounter: &Encounter) -> TimerResult<()>;

    fn on_encounter_start(&mut self, encounter: &Encounter) -> TimerResult<()>;

    fn on_turn_change(&mut self, encounter: &Encounter) -> TimerResult<()>;

    fn on_round_change(&mut self, encounter: &Encounter) -> TimerResult<()>;

    fn on_participants_changed(&mut self, encounter: &Encounter) -> TimerResult<()>;

    fn on_encounter_end(&mut self, encounter: &Encounter) -> TimerResult<()>;

    /// The session-wide pause toggled.
    fn on_session_pause(&mut self, paused: bool) -> TimerResult<()>;

    fn handle_intent(&mut self, intent: Intent, encounter: &mut Encounter) -> TimerResult<()>;

    /// Push a HUD style to every client. Host-only.
    fn force_style(&mut self, file: Option<String>) -> TimerResult<()>;

    /// Drain the inbox, run a due tick, and service pending writes.
    fn pump(&mut self, encounter: &mut Encounter) -> TimerResult<()>;

    /// Stop the tick loop. Idempotent.
    fn stop(&mut self);

    /// Stop and hide the HUD after an unrecoverable failure.
    fn degrade(&mut self);

    fn drain_events(&mut self) -> Vec<TimerEvent>;
}
