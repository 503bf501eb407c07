//! TimerService: the one timer instance a participant process runs.
//!
//! RULES:
//!   - Constructed once per process as either host or replica.
//!   - The error boundary: failures inside a role are logged, the HUD
//!     is hidden, and nothing propagates to the host application.
//!   - After dispose() every notification is ignored.

use std::sync::Arc;

use crate::{
    channel::MessageChannel,
    clock::ClockState,
    config::TimerConfig,
    document::SharedDocument,
    encounter::{Encounter, Roster},
    error::TimerResult,
    event::TimerEvent,
    host::SyncEngine,
    presenter::{HudUpdate, Presenter},
    replica::ReplicaEngine,
    role::{Intent, Phase, RoleKind, TimerRole},
    time::TimeSource,
};

pub struct TimerService {
    role:     Box<dyn TimerRole>,
    disposed: bool,
    failures: u64,
}

impl TimerService {
    /// The session's single writer.
    pub fn host(
        config: TimerConfig,
        document: Box<dyn SharedDocument>,
        channel: Box<dyn MessageChannel>,
        presenter: Box<dyn Presenter>,
        time: Arc<dyn TimeSource>,
        roster: Roster,
    ) -> Self {
        log::info!("timer service starting as host ({})", channel.local_user());
        let engine = SyncEngine::new(config, document, channel, presenter, time, roster);
        Self::with_role(Box::new(engine))
    }

    pub fn replica(
        config: TimerConfig,
        channel: Box<dyn MessageChannel>,
        presenter: Box<dyn Presenter>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        log::info!("timer service starting as replica ({})", channel.local_user());
        let engine = ReplicaEngine::new(config, channel, presenter, time);
        Self::with_role(Box::new(engine))
    }

    pub fn with_role(role: Box<dyn TimerRole>) -> Self {
        Self { role, disposed: false, failures: 0 }
    }

    pub fn kind(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn clock(&self) -> &ClockState {
        self.role.clock()
    }

    pub fn phase(&self) -> Phase {
        self.role.phase()
    }

    pub fn displayed(&self) -> Option<&HudUpdate> {
        self.role.displayed()
    }

    /// How many failures the boundary has absorbed.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ── Host-application notifications ─────────────────────────

    pub fn encounter_started(&mut self, encounter: &Encounter) {
        self.guard("encounter start", |r| r.on_encounter_start(encounter));
    }

    pub fn turn_changed(&mut self, encounter: &Encounter) {
        self.guard("turn change", |r| r.on_turn_change(encounter));
    }

    pub fn round_changed(&mut self, encounter: &Encounter) {
        self.guard("round change", |r| r.on_round_change(encounter));
    }

    pub fn participants_changed(&mut self, encounter: &Encounter) {
        self.guard("participants change", |r| r.on_participants_changed(encounter));
    }

    pub fn encounter_ended(&mut self, encounter: &Encounter) {
        self.guard("encounter end", |r| r.on_encounter_end(encounter));
    }

    pub fn session_paused(&mut self, paused: bool) {
        self.guard("session pause", |r| r.on_session_pause(paused));
    }

    /// Late join or reconnect to an encounter already in progress.
    pub fn join(&mut self, encounter: &Encounter) {
        self.guard("join", |r| r.join(encounter));
    }

    pub fn intent(&mut self, intent: Intent, encounter: &mut Encounter) {
        self.guard("intent", |r| r.handle_intent(intent, encounter));
    }

    pub fn force_style(&mut self, file: Option<String>) {
        self.guard("style", |r| r.force_style(file));
    }

    /// Drive the role: deliver messages, run a due tick, land pending writes.
    pub fn pump(&mut self, encounter: &mut Encounter) {
        self.guard("pump", |r| r.pump(encounter));
    }

    pub fn drain_events(&mut self) -> Vec<TimerEvent> {
        self.role.drain_events()
    }

    /// Stop ticking and hide the HUD for good.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.role.degrade();
        self.disposed = true;
        log::info!("timer service disposed");
    }

    fn guard<F>(&mut self, what: &str, f: F)
    where
        F: FnOnce(&mut dyn TimerRole) -> TimerResult<()>,
    {
        if self.disposed {
            return;
        }
        if let Err(e) = f(&mut *self.role) {
            self.failures += 1;
            log::error!("timer {what} failed; hiding HUD: {e}");
            self.role.degrade();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encounter::Participant,
        error::TimerError,
        policy::ParticipantClass,
        presenter::RecordingPresenter,
    };

    /// A role whose turn changes always fail.
    struct Broken(ClockState);

    impl TimerRole for Broken {
        fn kind(&self) -> RoleKind { RoleKind::Replica }
        fn clock(&self) -> &ClockState { &self.0 }
        fn phase(&self) -> Phase { Phase::Idle }
        fn displayed(&self) -> Option<&HudUpdate> { None }
        fn join(&mut self, _: &Encounter) -> TimerResult<()> { Ok(()) }
        fn on_encounter_start(&mut self, _: &Encounter) -> TimerResult<()> { Ok(()) }
        fn on_turn_change(&mut self, _: &Encounter) -> TimerResult<()> {
            Err(TimerError::NoActiveParticipant)
        }
        fn on_round_change(&mut self, _: &Encounter) -> TimerResult<()> { Ok(()) }
        fn on_participants_changed(&mut self, _: &Encounter) -> TimerResult<()> { Ok(()) }
        fn on_encounter_end(&mut self, _: &Encounter) -> TimerResult<()> { Ok(()) }
        fn on_session_pause(&mut self, _: bool) -> TimerResult<()> { Ok(()) }
        fn handle_intent(&mut self, _: Intent, _: &mut Encounter) -> TimerResult<()> { Ok(()) }
        fn force_style(&mut self, _: Option<String>) -> TimerResult<()> { Ok(()) }
        fn pump(&mut self, _: &mut Encounter) -> TimerResult<()> { Ok(()) }
        fn stop(&mut self) {}
        fn degrade(&mut self) {}
        fn drain_events(&mut self) -> Vec<TimerEvent> { Vec::new() }
    }

    #[test]
    fn failures_are_absorbed_at_the_boundary() {
        let mut service = TimerService::with_role(Box::new(Broken(ClockState::default())));
        let encounter = Encounter::new("enc", vec![Participant::new("a", "A", ParticipantClass::Primary)]);
        service.turn_changed(&encounter);
        service.turn_changed(&encounter);
        assert_eq!(service.failures(), 2);
    }

    #[test]
    fn dispose_hides_and_silences() {
        let presenter = RecordingPresenter::new();
        let bus = crate::channel::LocalBus::new("gm");
        let mut service = TimerService::replica(
            TimerConfig::default(),
            Box::new(bus.endpoint("p1")),
            Box::new(presenter.clone()),
            Arc::new(crate::time::ManualTimeSource::new(0)),
        );
        let mut encounter = Encounter::new("enc", vec![Participant::new("a", "A", ParticipantClass::Primary)]);
        encounter.begin();
        service.dispose();
        service.dispose();
        service.encounter_started(&encounter);
        assert!(service.is_disposed());
        assert!(presenter.calls().is_empty(), "a disposed service never draws");
    }
}
