//! SyncEngine: the host's authoritative turn clock.
//!
//! RULES:
//!   - The host is the only writer of the persisted clock record.
//!   - Every mutation bumps the revision and stamps lastUpdatedAt.
//!   - Transitions persist immediately; per-tick pool drains go through
//!     the write throttle.
//!   - Every successful write is announced with snapshotChanged.
//!   - Only the host advances the encounter turn on expiry.

use std::sync::Arc;

use crate::{
    channel::{ChannelMessage, Envelope, MessageChannel, Recipient},
    clock::ClockState,
    config::TimerConfig,
    display::{self, Display, Frame, PoolView},
    document::{self, SharedDocument},
    encounter::{Encounter, Participant, Roster, TurnMarker},
    error::{TimerError, TimerResult},
    event::{EventLogEntry, TimerEvent},
    policy::{ParticipantClass, TimerMode, TurnDurationPolicy},
    presenter::{HudDriver, HudUpdate, Presenter},
    role::{Intent, Phase, RoleKind, TimerRole},
    snapshot::{PersistedClock, STATE_FLAG},
    throttle::{WriteDecision, WriteThrottle},
    tick_loop::TickLoop,
    time::TimeSource,
    types::{EncounterId, Timestamp},
};

const CLASSES: [ParticipantClass; 2] = [ParticipantClass::Primary, ParticipantClass::Secondary];

/// The turn the clock is currently counting.
#[derive(Debug, Clone)]
struct ActiveTurn {
    marker:      TurnMarker,
    participant: Participant,
}

impl ActiveTurn {
    fn of(encounter: &Encounter, participant: &Participant) -> Self {
        Self { marker: encounter.marker(), participant: participant.clone() }
    }

    fn same_as(&self, other: &ActiveTurn) -> bool {
        self.marker == other.marker && self.participant.id == other.participant.id
    }
}

pub struct SyncEngine {
    config:               TimerConfig,
    policy:               TurnDurationPolicy,
    state:                ClockState,
    document:             Box<dyn SharedDocument>,
    channel:              Box<dyn MessageChannel>,
    hud:                  HudDriver,
    time:                 Arc<dyn TimeSource>,
    roster:               Roster,
    tick_loop:            TickLoop,
    throttle:             WriteThrottle,
    encounter_id:         Option<EncounterId>,
    current:              Option<ActiveTurn>,
    warned:               bool,
    expired:              bool,
    session_paused:       bool,
    start_paused_pending: bool,
    refilled_round:       Option<u32>,
    dirty:                bool,
    events:               Vec<TimerEvent>,
}

impl SyncEngine {
    pub fn new(
        config: TimerConfig,
        document: Box<dyn SharedDocument>,
        channel: Box<dyn MessageChannel>,
        presenter: Box<dyn Presenter>,
        time: Arc<dyn TimeSource>,
        roster: Roster,
    ) -> Self {
        Self {
            policy:               TurnDurationPolicy::from_config(&config),
            tick_loop:            TickLoop::new(config.tick_interval_ms),
            throttle:             WriteThrottle::new(config.write_throttle_ms),
            config,
            state:                ClockState::default(),
            document,
            channel,
            hud:                  HudDriver::new(presenter),
            time,
            roster,
            encounter_id:         None,
            current:              None,
            warned:               false,
            expired:              false,
            session_paused:       false,
            start_paused_pending: false,
            refilled_round:       None,
            dirty:                false,
            events:               Vec::new(),
        }
    }

    pub fn state(&self) -> &ClockState {
        &self.state
    }

    pub fn policy(&self) -> &TurnDurationPolicy {
        &self.policy
    }

    /// A routine write is waiting for its trailing deadline.
    pub fn has_pending_write(&self) -> bool {
        self.dirty
    }

    fn now(&self) -> Timestamp {
        self.time.now_ms()
    }

    /// Track `encounter`; switching encounters forgets the previous turn.
    fn bind(&mut self, encounter: &Encounter) {
        if self.encounter_id.as_deref() != Some(encounter.id.as_str()) {
            self.encounter_id = Some(encounter.id.clone());
            self.current = None;
            self.refilled_round = None;
        }
    }

    fn fill_pools(&mut self) {
        self.state.fill_pools(
            self.config.pool_total_ms(ParticipantClass::Primary),
            self.config.pool_total_ms(ParticipantClass::Secondary),
        );
    }

    /// The instant this turn's countdown ends if it ran from `now`.
    fn turn_end_from(&self, class: ParticipantClass, now: Timestamp) -> Timestamp {
        match self.policy.mode_for(class) {
            TimerMode::Shared => now + self.state.pool_remaining_ms(class) as i64,
            _ => now + i64::from(self.policy.per_turn_seconds(class)) * 1000,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Adopt the persisted record after a host restart.
    ///
    /// Returns false when the document holds no usable record.
    pub fn resume_from_document(&mut self, encounter: &Encounter) -> TimerResult<bool> {
        let Some(view) = document::read_clock(&*self.document, &encounter.id)? else {
            // An unreadable record still carries its revision; never reuse one.
            if let Some(revision) = self.document.flag_revision(&encounter.id, STATE_FLAG)? {
                self.state.revision = self.state.revision.max(revision);
            }
            return Ok(false);
        };
        self.bind(encounter);
        view.patch.apply_to(&mut self.state);
        self.current = match (view.marker, encounter.active_participant()) {
            (Some(marker), Some(active)) if marker == encounter.marker() => {
                Some(ActiveTurn::of(encounter, active))
            }
            _ => None,
        };
        log::info!(
            "encounter={} resumed from persisted clock at revision {}",
            encounter.id,
            self.state.revision
        );
        if !encounter.started || !self.state.running {
            return Ok(true);
        }
        match self.current {
            Some(_) => {
                let now = self.now();
                self.tick_loop.start(now);
                self.render(now);
            }
            // The document lags the encounter; start the turn it is on now.
            None => self.on_turn_advance(encounter)?,
        }
        Ok(true)
    }

    pub fn on_encounter_start(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        self.current = None;
        self.expired = false;
        self.fill_pools();
        self.refilled_round = Some(encounter.round);
        if self.config.start_combat_paused {
            self.start_paused_pending = true;
            let now = self.now();
            if let Err(e) = document::set_start_paused(&mut *self.document, &encounter.id, now) {
                log::warn!("encounter={} could not persist start-paused flag: {e}", encounter.id);
            }
        }
        log::info!("encounter={} started with {} participants", encounter.id, encounter.participants.len());
        if encounter.is_empty() {
            self.hud.hide();
            return Ok(());
        }
        self.on_turn_advance(encounter)
    }

    /// Start the countdown for the encounter's active participant.
    pub fn on_turn_advance(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        if !encounter.started {
            self.tick_loop.stop();
            return Ok(());
        }
        let Some(active) = encounter.active_participant() else {
            return self.go_idle();
        };
        let turn = ActiveTurn::of(encounter, active);
        if self.state.running && !self.expired && self.current.as_ref().is_some_and(|c| c.same_as(&turn)) {
            log::debug!("encounter={} turn {:?} already running", encounter.id, turn.marker);
            return Ok(());
        }

        let now = self.now();
        let class = active.class;
        if !self.state.pools_initialized() {
            self.fill_pools();
        }
        self.state.end_at = self.turn_end_from(class, now);

        let flagged = self.consume_start_paused(&encounter.id);
        let start_paused = std::mem::take(&mut self.start_paused_pending) || flagged;
        // A start pause is held like a session pause: lifting either starts the clock.
        if start_paused || self.session_paused {
            self.state.paused = true;
            self.state.paused_by_system = true;
            self.state.paused_remaining_seconds = self.state.seconds_until_end(now);
        } else {
            self.state.paused = false;
            self.state.paused_by_system = false;
            self.state.paused_remaining_seconds = 0;
        }
        self.state.running = true;
        self.state.stamp(now);
        self.warned = false;
        self.expired = false;

        log::info!(
            "encounter={} round={} turn={} started for {} ({}){}",
            encounter.id,
            turn.marker.round,
            turn.marker.turn,
            active.name,
            class.name(),
            if self.state.paused { " paused" } else { "" }
        );
        self.emit(TimerEvent::TurnStarted {
            marker:         turn.marker,
            participant_id: active.id.clone(),
            class,
            paused:         self.state.paused,
        });
        self.current = Some(turn);
        self.write_now(now);
        self.render(now);
        self.tick_loop.start(now);
        Ok(())
    }

    pub fn on_round_change(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        if !self.config.refill_pools_each_round || self.refilled_round == Some(encounter.round) {
            return Ok(());
        }
        self.refilled_round = Some(encounter.round);
        let mut refilled = false;
        for class in CLASSES {
            if self.policy.is_shared(class) {
                self.state.refill_pool(class);
                refilled = true;
            }
        }
        if refilled {
            let now = self.now();
            self.state.stamp(now);
            log::debug!("encounter={} round {} refilled shared pools", encounter.id, encounter.round);
            self.persist_routine(now);
        }
        Ok(())
    }

    pub fn on_participants_changed(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        if !encounter.started {
            return Ok(());
        }
        if encounter.is_empty() {
            return self.go_idle();
        }
        // Re-announcing the running turn is a no-op; a shifted pointer or
        // a first participant in an empty encounter starts a turn.
        self.on_turn_advance(encounter)
    }

    pub fn on_encounter_end(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.tick_loop.stop();
        self.hud.hide();
        self.throttle.cancel();
        self.dirty = false;

        let doc = &mut *self.document;
        if let Err(e) = document::clear_clock(doc, &encounter.id) {
            log::warn!("encounter={} could not clear clock record: {e}", encounter.id);
        }
        if let Err(e) = document::clear_start_paused(doc, &encounter.id) {
            log::warn!("encounter={} could not clear start-paused flag: {e}", encounter.id);
        }

        let now = self.now();
        self.state = ClockState::cleared(self.state.revision);
        self.state.stamp(now);
        self.current = None;
        self.warned = false;
        self.expired = false;
        self.start_paused_pending = false;
        self.refilled_round = None;

        self.encounter_id = Some(encounter.id.clone());
        self.emit(TimerEvent::EncounterEnded { encounter_id: encounter.id.clone() });
        self.encounter_id = None;
        log::info!("encounter={} ended; timer idle", encounter.id);
        Ok(())
    }

    fn go_idle(&mut self) -> TimerResult<()> {
        self.tick_loop.stop();
        self.hud.hide();
        self.current = None;
        if self.state.running {
            let now = self.now();
            self.state.running = false;
            self.state.paused = false;
            self.state.paused_by_system = false;
            self.state.paused_remaining_seconds = 0;
            self.state.stamp(now);
            log::info!("timer idle: no participants remain");
            self.write_now(now);
        }
        Ok(())
    }

    // ── Controls ───────────────────────────────────────────────

    pub fn on_reset(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        let Some(active) = encounter.active_participant() else {
            log::debug!("encounter={} reset ignored: no active participant", encounter.id);
            return Ok(());
        };
        let now = self.now();
        let class = active.class;
        if !self.state.pools_initialized() {
            self.fill_pools();
        }
        for c in CLASSES {
            if self.policy.is_shared(c) {
                self.state.refill_pool(c);
            }
        }
        self.state.end_at = self.turn_end_from(class, now);
        self.state.running = true;
        self.state.paused = false;
        self.state.paused_by_system = false;
        self.state.paused_remaining_seconds = 0;
        self.state.stamp(now);
        self.warned = false;
        self.expired = false;

        let turn = ActiveTurn::of(encounter, active);
        log::info!("encounter={} turn {:?} reset", encounter.id, turn.marker);
        self.emit(TimerEvent::Reset { marker: turn.marker });
        self.current = Some(turn);
        self.write_now(now);
        self.render(now);
        if !self.tick_loop.is_active() {
            self.tick_loop.start(now);
        }
        Ok(())
    }

    /// `Some(true)` pauses, `Some(false)` resumes, `None` toggles.
    pub fn on_toggle_pause(&mut self, force: Option<bool>) -> TimerResult<()> {
        if !self.state.running {
            log::debug!("pause toggle ignored: clock is idle");
            return Ok(());
        }
        let now = self.now();
        let pause = force.unwrap_or(!self.state.paused);
        match (pause, self.state.paused) {
            (true, false) => self.pause_at(now, false),
            (false, true) => self.resume_at(now),
            // A manual pause takes ownership of a system pause.
            (true, true) if self.state.paused_by_system => {
                self.state.paused_by_system = false;
                self.state.stamp(now);
                self.write_now(now);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn on_system_pause(&mut self) -> TimerResult<()> {
        self.session_paused = true;
        if self.state.running && !self.state.paused {
            let now = self.now();
            self.pause_at(now, true);
        }
        Ok(())
    }

    pub fn on_system_resume(&mut self) -> TimerResult<()> {
        self.session_paused = false;
        if self.state.running && self.state.paused && self.state.paused_by_system {
            let now = self.now();
            self.resume_at(now);
        }
        Ok(())
    }

    fn pause_at(&mut self, now: Timestamp, by_system: bool) {
        let remaining = self.state.seconds_until_end(now);
        self.state.paused = true;
        self.state.paused_by_system = by_system;
        self.state.paused_remaining_seconds = remaining;
        self.state.stamp(now);
        self.emit(TimerEvent::Paused { remaining_seconds: remaining, by_system });
        self.write_now(now);
        self.render(now);
    }

    fn resume_at(&mut self, now: Timestamp) {
        let remaining = self.state.paused_remaining_seconds;
        self.state.end_at = now + i64::from(remaining) * 1000;
        self.state.paused = false;
        self.state.paused_by_system = false;
        self.state.paused_remaining_seconds = 0;
        self.state.stamp(now);
        self.emit(TimerEvent::Resumed { remaining_seconds: remaining });
        self.write_now(now);
        self.render(now);
    }

    pub fn handle_intent(&mut self, intent: Intent, encounter: &mut Encounter) -> TimerResult<()> {
        match intent {
            Intent::Reset       => self.on_reset(encounter),
            Intent::Pause       => self.on_toggle_pause(Some(true)),
            Intent::Resume      => self.on_toggle_pause(Some(false)),
            Intent::TogglePause => self.on_toggle_pause(None),
            Intent::Advance     => match encounter.next_turn() {
                Some(_) => self.enter_turn(encounter),
                None => Ok(()),
            },
            Intent::Retreat     => match encounter.previous_turn() {
                Some(_) => self.enter_turn(encounter),
                None => Ok(()),
            },
        }
    }

    /// After the host itself moved the turn pointer.
    fn enter_turn(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.on_round_change(encounter)?;
        self.on_turn_advance(encounter)
    }

    /// Tell every client which HUD style to use.
    pub fn broadcast_style(&mut self, file: Option<String>) -> TimerResult<()> {
        self.hud.apply_style(file.as_deref());
        self.channel.emit(Recipient::Broadcast, ChannelMessage::ForceStyle { file })
    }

    // ── Requests ───────────────────────────────────────────────

    pub fn handle_request(&mut self, envelope: Envelope, encounter: &Encounter) -> TimerResult<()> {
        match envelope.message {
            ChannelMessage::RequestReset { encounter_id, turn_index, requester_id } => {
                match self.authorize_reset(&envelope.from, &encounter_id, turn_index, &requester_id, encounter) {
                    Ok(()) => {
                        log::info!("encounter={encounter_id} reset requested by {requester_id}");
                        self.on_reset(encounter)
                    }
                    Err(e) => {
                        log::debug!("dropped reset request from {requester_id}: {e}");
                        self.emit(TimerEvent::RequestDropped { requester_id, reason: e.to_string() });
                        Ok(())
                    }
                }
            }
            ChannelMessage::RequestSnapshot { encounter_id } => {
                self.answer_snapshot(&envelope.from, &encounter_id)
            }
            other => {
                log::debug!("host ignores {other:?} from {}", envelope.from);
                Ok(())
            }
        }
    }

    /// A reset may come from an admin or an owner of the active participant,
    /// for the turn that is current right now.
    fn authorize_reset(
        &self,
        sender: &str,
        encounter_id: &str,
        turn_index: usize,
        requester_id: &str,
        encounter: &Encounter,
    ) -> TimerResult<()> {
        if encounter_id != encounter.id || !encounter.started {
            return Err(TimerError::UnknownEncounter { encounter_id: encounter_id.to_string() });
        }
        if turn_index != encounter.turn {
            return Err(TimerError::StaleTurn { requested: turn_index, current: encounter.turn });
        }
        let active = encounter.active_participant().ok_or(TimerError::NoActiveParticipant)?;
        let unauthorized = || TimerError::Unauthorized { user_id: requester_id.to_string() };
        if sender != requester_id {
            return Err(unauthorized());
        }
        let user = self.roster.get(requester_id).ok_or_else(unauthorized)?;
        if user.is_admin || active.is_owned_by(requester_id) {
            Ok(())
        } else {
            Err(unauthorized())
        }
    }

    fn answer_snapshot(&mut self, to: &str, encounter_id: &str) -> TimerResult<()> {
        let Some(view) = document::read_clock(&*self.document, encounter_id)? else {
            log::debug!("encounter={encounter_id} has no persisted clock for {to}");
            return Ok(());
        };
        let mut clock = ClockState::default();
        view.patch.apply_to(&mut clock);
        let message = ChannelMessage::SnapshotChanged {
            encounter_id: encounter_id.to_string(),
            marker:       view.marker.unwrap_or_default(),
            clock,
        };
        self.channel.emit(Recipient::User(to.to_string()), message)
    }

    // ── Ticking ────────────────────────────────────────────────

    pub fn tick(&mut self, encounter: &mut Encounter) -> TimerResult<()> {
        let now = self.now();
        let delta = self.tick_loop.take_delta(now);
        if self.encounter_id.as_deref() != Some(encounter.id.as_str()) || !encounter.started {
            self.tick_loop.stop();
            return Ok(());
        }
        let Some(active) = encounter.active_participant() else {
            return self.go_idle();
        };
        let class = active.class;
        if !self.current.as_ref().is_some_and(|c| c.same_as(&ActiveTurn::of(encounter, active))) {
            // The turn moved without a notification reaching us yet.
            return self.on_turn_advance(encounter);
        }

        let mut drained = false;
        if self.state.running && !self.state.paused && self.policy.is_shared(class) && delta > 0 {
            let before = self.state.pool_remaining_ms(class);
            if self.state.drain_pool(class, delta) != before {
                self.state.stamp(now);
                drained = true;
            }
        }

        let Some(frame) = self.render(now) else {
            return Ok(());
        };
        if !self.warned && frame.in_warning(&self.policy) {
            self.warned = true;
            self.emit(TimerEvent::Warning {
                marker:            encounter.marker(),
                class,
                remaining_seconds: frame.remaining_seconds,
            });
        }
        if frame.expired {
            return self.expire(encounter, class, now);
        }
        if drained {
            self.persist_routine(now);
        }
        Ok(())
    }

    fn expire(&mut self, encounter: &mut Encounter, class: ParticipantClass, now: Timestamp) -> TimerResult<()> {
        self.expired = true;
        self.tick_loop.stop();
        let marker = encounter.marker();
        log::info!(
            "encounter={} round={} turn={} expired ({})",
            encounter.id,
            marker.round,
            marker.turn,
            class.name()
        );
        self.emit(TimerEvent::Expired { marker, class });
        self.state.stamp(now);
        self.write_now(now);
        match encounter.next_turn() {
            Some(_) => self.enter_turn(encounter),
            None => self.go_idle(),
        }
    }

    fn render(&mut self, now: Timestamp) -> Option<Frame> {
        let Some(turn) = &self.current else {
            self.hud.hide();
            return None;
        };
        let class = turn.participant.class;
        match display::derive(&self.state, &self.policy, class, now, PoolView::Authoritative) {
            Display::Hidden => {
                self.hud.hide();
                None
            }
            Display::Shown(frame) => {
                self.hud.render(frame.to_hud(&turn.participant, self.config.portrait_mode));
                Some(frame)
            }
        }
    }

    pub fn pump(&mut self, encounter: &mut Encounter) -> TimerResult<()> {
        for envelope in self.channel.drain() {
            if let Err(e) = self.handle_request(envelope, encounter) {
                log::warn!("host request handling failed: {e}");
            }
        }
        if self.tick_loop.is_due(self.now()) {
            self.tick(encounter)?;
        }
        self.service_pending_writes();
        Ok(())
    }

    // ── Persistence ────────────────────────────────────────────

    fn persist_routine(&mut self, now: Timestamp) {
        match self.throttle.routine(now) {
            WriteDecision::Now => self.write_now(now),
            WriteDecision::Deferred { until } => {
                self.dirty = true;
                log::debug!("routine write deferred until {until}");
            }
        }
    }

    /// Land a deferred or failed write once its deadline passes.
    pub fn service_pending_writes(&mut self) {
        let now = self.now();
        if self.dirty && self.throttle.trailing_due(now) {
            self.write_now(now);
        }
    }

    fn write_now(&mut self, now: Timestamp) {
        let Some(encounter_id) = self.encounter_id.clone() else {
            return;
        };
        let record = PersistedClock {
            marker: self.current.as_ref().map(|t| t.marker).unwrap_or_default(),
            clock:  self.state.clone(),
        };
        match document::write_clock(&mut *self.document, &encounter_id, &record, now) {
            Ok(()) => {
                self.throttle.record_write(now);
                self.dirty = false;
                let message = ChannelMessage::SnapshotChanged {
                    encounter_id: encounter_id.clone(),
                    marker:       record.marker,
                    clock:        record.clock,
                };
                if let Err(e) = self.channel.emit(Recipient::Broadcast, message) {
                    log::warn!("encounter={encounter_id} snapshot broadcast failed: {e}");
                }
            }
            Err(e) => {
                log::warn!(
                    "encounter={encounter_id} persist failed at revision {}: {e}",
                    record.clock.revision
                );
                self.throttle.retry_later(now);
                self.dirty = true;
                self.emit(TimerEvent::PersistFailed {
                    revision: record.clock.revision,
                    error:    e.to_string(),
                });
            }
        }
    }

    fn consume_start_paused(&mut self, encounter_id: &str) -> bool {
        document::take_start_paused(&mut *self.document, encounter_id).unwrap_or_else(|e| {
            log::warn!("encounter={encounter_id} could not read start-paused flag: {e}");
            false
        })
    }

    /// Record an event in the audit trail and queue it for the caller.
    fn emit(&mut self, event: TimerEvent) {
        if let Some(encounter_id) = &self.encounter_id {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let entry = EventLogEntry {
                        id:           None,
                        encounter_id: encounter_id.clone(),
                        revision:     self.state.revision,
                        event_type:   event.type_name().to_string(),
                        payload,
                        created_at:   self.time.now_ms(),
                    };
                    if let Err(e) = self.document.record_event(&entry) {
                        log::debug!("event log append failed: {e}");
                    }
                }
                Err(e) => log::debug!("event not serializable: {e}"),
            }
        }
        self.events.push(event);
    }
}

impl TimerRole for SyncEngine {
    fn kind(&self) -> RoleKind {
        RoleKind::Host
    }

    fn clock(&self) -> &ClockState {
        &self.state
    }

    fn phase(&self) -> Phase {
        Phase::of(&self.state, self.expired)
    }

    fn displayed(&self) -> Option<&HudUpdate> {
        self.hud.last().filter(|_| self.hud.is_visible())
    }

    fn join(&mut self, encounter: &Encounter) -> TimerResult<()> {
        if !self.resume_from_document(encounter)? && encounter.started {
            self.on_turn_advance(encounter)?;
        }
        Ok(())
    }

    fn on_encounter_start(&mut self, encounter: &Encounter) -> TimerResult<()> {
        SyncEngine::on_encounter_start(self, encounter)
    }

    fn on_turn_change(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.on_turn_advance(encounter)
    }

    fn on_round_change(&mut self, encounter: &Encounter) -> TimerResult<()> {
        SyncEngine::on_round_change(self, encounter)
    }

    fn on_participants_changed(&mut self, encounter: &Encounter) -> TimerResult<()> {
        SyncEngine::on_participants_changed(self, encounter)
    }

    fn on_encounter_end(&mut self, encounter: &Encounter) -> TimerResult<()> {
        SyncEngine::on_encounter_end(self, encounter)
    }

    fn on_session_pause(&mut self, paused: bool) -> TimerResult<()> {
        if paused {
            self.on_system_pause()
        } else {
            self.on_system_resume()
        }
    }

    fn handle_intent(&mut self, intent: Intent, encounter: &mut Encounter) -> TimerResult<()> {
        SyncEngine::handle_intent(self, intent, encounter)
    }

    fn force_style(&mut self, file: Option<String>) -> TimerResult<()> {
        self.broadcast_style(file)
    }

    fn pump(&mut self, encounter: &mut Encounter) -> TimerResult<()> {
        SyncEngine::pump(self, encounter)
    }

    fn stop(&mut self) {
        self.tick_loop.stop();
    }

    fn degrade(&mut self) {
        self.tick_loop.stop();
        self.hud.hide();
    }

    fn drain_events(&mut self) -> Vec<TimerEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::LocalBus,
        encounter::SessionUser,
        presenter::RecordingPresenter,
        store::FlagStore,
        time::ManualTimeSource,
    };

    struct Rig {
        engine:    SyncEngine,
        time:      ManualTimeSource,
        encounter: Encounter,
    }

    fn rig(config: TimerConfig) -> Rig {
        let store = FlagStore::in_memory().expect("store");
        store.migrate().expect("migrate");
        let bus = LocalBus::new("gm");
        let time = ManualTimeSource::new(1_000);
        let mut roster = Roster::new();
        roster.insert(SessionUser { id: "gm".into(), is_admin: true });
        let engine = SyncEngine::new(
            config,
            Box::new(store),
            Box::new(bus.endpoint("gm")),
            Box::new(RecordingPresenter::new()),
            Arc::new(time.clone()),
            roster,
        );
        let encounter = Encounter::new(
            "enc",
            vec![
                Participant::new("a", "Aria", ParticipantClass::Primary),
                Participant::new("g", "Goblin", ParticipantClass::Secondary),
            ],
        );
        Rig { engine, time, encounter }
    }

    fn unpaused() -> TimerConfig {
        TimerConfig { start_combat_paused: false, ..TimerConfig::default() }
    }

    #[test]
    fn turn_start_sets_end_at_from_policy() {
        let mut r = rig(unpaused());
        r.encounter.begin();
        r.engine.on_encounter_start(&r.encounter).expect("start");
        assert!(r.engine.state().running);
        assert_eq!(r.engine.state().end_at, 1_000 + 30_000);
        assert_eq!(r.engine.phase(), Phase::Running);
    }

    #[test]
    fn start_pause_is_lifted_by_a_system_resume() {
        let mut r = rig(TimerConfig::default());
        r.encounter.begin();
        r.engine.on_encounter_start(&r.encounter).expect("start");
        let s = r.engine.state();
        assert!(s.paused);
        assert!(s.paused_by_system);
        assert_eq!(s.paused_remaining_seconds, 30);

        r.engine.on_system_resume().expect("system resume");
        assert!(!r.engine.state().paused);
        assert_eq!(r.engine.state().end_at, r.time.now_ms() + 30_000);
    }

    #[test]
    fn reannouncing_the_running_turn_is_a_no_op() {
        let mut r = rig(unpaused());
        r.encounter.begin();
        r.engine.on_encounter_start(&r.encounter).expect("start");
        let revision = r.engine.state().revision;
        r.time.advance(500);
        r.engine.on_turn_advance(&r.encounter).expect("re-announce");
        assert_eq!(r.engine.state().revision, revision);
    }

    #[test]
    fn manual_pause_takes_over_a_system_pause() {
        let mut r = rig(unpaused());
        r.encounter.begin();
        r.engine.on_encounter_start(&r.encounter).expect("start");
        r.engine.on_system_pause().expect("system pause");
        assert!(r.engine.state().paused_by_system);
        r.engine.on_toggle_pause(Some(true)).expect("manual pause");
        assert!(!r.engine.state().paused_by_system);
        r.engine.on_system_resume().expect("system resume");
        assert!(r.engine.state().paused);
    }

    #[test]
    fn retreat_restarts_the_previous_turn() {
        let mut r = rig(unpaused());
        r.encounter.begin();
        r.engine.on_encounter_start(&r.encounter).expect("start");
        r.engine.handle_intent(Intent::Advance, &mut r.encounter).expect("advance");
        assert_eq!(r.encounter.turn, 1);
        assert_eq!(r.engine.state().end_at, 1_000 + 15_000);
        r.time.advance(2_000);
        r.engine.handle_intent(Intent::Retreat, &mut r.encounter).expect("retreat");
        assert_eq!(r.encounter.turn, 0);
        assert_eq!(r.engine.state().end_at, 3_000 + 30_000);
    }

    #[test]
    fn encounter_end_clears_state_but_keeps_revision_climbing() {
        let mut r = rig(unpaused());
        r.encounter.begin();
        r.engine.on_encounter_start(&r.encounter).expect("start");
        let before = r.engine.state().revision;
        r.encounter.end();
        r.engine.on_encounter_end(&r.encounter).expect("end");
        let s = r.engine.state();
        assert!(!s.running);
        assert!(s.revision > before);
        assert_eq!(r.engine.phase(), Phase::Idle);
        assert!(r.engine.displayed().is_none());
    }
}
