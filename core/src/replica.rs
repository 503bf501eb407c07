//! ReplicaEngine: a display-only mirror of the host's clock.
//!
//! RULES:
//!   - Replicas never persist anything. The only state they write is the
//!     local mirror, and only from host snapshots or the provisional
//!     fallback after a snapshot wait times out.
//!   - Snapshots are adopted verbatim. A revision not above the mirror's
//!     is a stale duplicate, unless it answers an open wait.
//!   - Local expiry signals and stops. The host advances the turn.

use std::sync::Arc;

use crate::{
    channel::{ChannelMessage, MessageChannel, Recipient},
    clock::ClockState,
    config::TimerConfig,
    display::{self, Display, PoolView},
    encounter::{Encounter, Participant, TurnMarker},
    error::TimerResult,
    event::TimerEvent,
    policy::{ParticipantClass, TimerMode, TurnDurationPolicy},
    presenter::{HudDriver, HudUpdate, Presenter},
    role::{Intent, Phase, RoleKind, TimerRole},
    tick_loop::TickLoop,
    time::TimeSource,
    types::{EncounterId, Timestamp},
    wait::{AwaitFirst, WaitStatus},
};

#[derive(Debug, Clone)]
struct Followed {
    marker:      TurnMarker,
    participant: Participant,
}

pub struct ReplicaEngine {
    config:          TimerConfig,
    policy:          TurnDurationPolicy,
    mirror:          ClockState,
    channel:         Box<dyn MessageChannel>,
    hud:             HudDriver,
    time:            Arc<dyn TimeSource>,
    tick_loop:       TickLoop,
    encounter_id:    Option<EncounterId>,
    following:       Option<Followed>,
    snapshot_marker: Option<TurnMarker>,
    wait:            Option<AwaitFirst<TurnMarker>>,
    provisional:     bool,
    warned:          bool,
    expired:         bool,
    events:          Vec<TimerEvent>,
}

impl ReplicaEngine {
    pub fn new(
        config: TimerConfig,
        channel: Box<dyn MessageChannel>,
        presenter: Box<dyn Presenter>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            policy:          TurnDurationPolicy::from_config(&config),
            tick_loop:       TickLoop::new(config.tick_interval_ms),
            config,
            mirror:          ClockState::default(),
            channel,
            hud:             HudDriver::new(presenter),
            time,
            encounter_id:    None,
            following:       None,
            snapshot_marker: None,
            wait:            None,
            provisional:     false,
            warned:          false,
            expired:         false,
            events:          Vec::new(),
        }
    }

    pub fn mirror(&self) -> &ClockState {
        &self.mirror
    }

    /// Counting from policy defaults because no host snapshot arrived.
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn is_waiting(&self) -> bool {
        self.wait.is_some()
    }

    fn now(&self) -> Timestamp {
        self.time.now_ms()
    }

    fn bind(&mut self, encounter: &Encounter) {
        if self.encounter_id.as_deref() != Some(encounter.id.as_str()) {
            self.encounter_id = Some(encounter.id.clone());
            self.forget();
        }
    }

    /// Drop everything learned about the previous encounter.
    fn forget(&mut self) {
        self.mirror = ClockState::default();
        self.following = None;
        self.snapshot_marker = None;
        self.wait = None;
        self.provisional = false;
    }

    // ── Following turns ────────────────────────────────────────

    /// Display the encounter's current turn, waiting for the host's
    /// snapshot of it when we don't have one yet.
    fn follow(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        self.drain_inbox();
        let Some(active) = encounter.active_participant() else {
            self.go_idle();
            return Ok(());
        };
        let marker = encounter.marker();
        if self
            .following
            .as_ref()
            .is_some_and(|f| f.marker == marker && f.participant.id == active.id)
        {
            return Ok(());
        }
        self.following = Some(Followed { marker, participant: active.clone() });
        self.warned = false;
        self.expired = false;

        let now = self.now();
        if self.snapshot_marker == Some(marker) && self.mirror.running {
            self.wait = None;
            self.start_display(now);
        } else {
            self.await_snapshot(&encounter.id, marker, now);
        }
        Ok(())
    }

    fn await_snapshot(&mut self, encounter_id: &str, marker: TurnMarker, now: Timestamp) {
        self.tick_loop.stop();
        // The previous countdown no longer applies; show nothing until the wait settles.
        self.hud.hide();
        let request = ChannelMessage::RequestSnapshot { encounter_id: encounter_id.to_string() };
        if let Err(e) = self.channel.emit(Recipient::Host, request) {
            log::warn!("encounter={encounter_id} snapshot request failed: {e}");
        }
        let deadline = now + self.config.snapshot_wait_ms as i64;
        log::debug!("encounter={encounter_id} awaiting snapshot for {marker:?} until {deadline}");
        self.wait = Some(AwaitFirst::new(marker, deadline));
    }

    fn poll_wait(&mut self, now: Timestamp) {
        let Some(wait) = self.wait.as_mut() else {
            return;
        };
        match wait.poll(now) {
            WaitStatus::Pending => {}
            WaitStatus::Matched | WaitStatus::Settled => {
                self.wait = None;
                self.start_display(now);
            }
            WaitStatus::TimedOut => {
                self.wait = None;
                self.go_provisional(now);
            }
        }
    }

    /// The single fallback when the host stays silent: count this turn
    /// from policy defaults until a real snapshot replaces it.
    fn go_provisional(&mut self, now: Timestamp) {
        let Some(class) = self.following.as_ref().map(|f| f.participant.class) else {
            return;
        };
        log::info!(
            "no host snapshot within {} ms; counting provisionally",
            self.config.snapshot_wait_ms
        );
        if !self.mirror.pools_initialized() {
            self.mirror.fill_pools(
                self.config.pool_total_ms(ParticipantClass::Primary),
                self.config.pool_total_ms(ParticipantClass::Secondary),
            );
        }
        self.mirror.end_at = match self.policy.mode_for(class) {
            TimerMode::Shared => now + self.mirror.pool_remaining_ms(class) as i64,
            _ => now + i64::from(self.policy.per_turn_seconds(class)) * 1000,
        };
        self.mirror.running = true;
        self.mirror.paused = false;
        self.mirror.paused_by_system = false;
        self.mirror.paused_remaining_seconds = 0;
        self.mirror.last_updated_at = now;
        self.provisional = true;
        self.start_display(now);
    }

    fn start_display(&mut self, now: Timestamp) {
        self.tick_loop.start(now);
        self.render(now);
    }

    fn go_idle(&mut self) {
        self.tick_loop.stop();
        self.hud.hide();
        self.following = None;
        self.wait = None;
    }

    // ── Inbox ──────────────────────────────────────────────────

    fn drain_inbox(&mut self) {
        for envelope in self.channel.drain() {
            match envelope.message {
                ChannelMessage::SnapshotChanged { encounter_id, marker, clock } => {
                    self.on_snapshot(&encounter_id, marker, clock);
                }
                ChannelMessage::ForceStyle { file } => self.hud.apply_style(file.as_deref()),
                other => log::debug!("replica ignores {other:?} from {}", envelope.from),
            }
        }
    }

    fn on_snapshot(&mut self, encounter_id: &str, marker: TurnMarker, clock: ClockState) {
        if self.encounter_id.as_deref() != Some(encounter_id) {
            log::debug!("snapshot for encounter={encounter_id} ignored: not following it");
            return;
        }
        let answers_wait = self.wait.as_ref().is_some_and(|w| *w.key() == marker);
        let stale = clock.revision < self.mirror.revision
            || (clock.revision == self.mirror.revision && !answers_wait);
        if stale {
            log::debug!(
                "encounter={encounter_id} stale snapshot at revision {} (mirror {})",
                clock.revision,
                self.mirror.revision
            );
            return;
        }
        if self.provisional {
            log::info!("encounter={encounter_id} host snapshot replaces provisional countdown");
            self.provisional = false;
        }
        self.mirror = clock;
        self.snapshot_marker = Some(marker);

        if let Some(wait) = self.wait.as_mut() {
            wait.offer(&marker);
            return;
        }
        if self.following.as_ref().is_some_and(|f| f.marker == marker) {
            let now = self.now();
            if !self.mirror.running {
                self.tick_loop.stop();
                self.hud.hide();
                return;
            }
            // A fresh snapshot of the displayed turn may un-expire it (reset).
            if !self.tick_loop.is_active() {
                self.tick_loop.start(now);
            }
            self.render(now);
        }
    }

    // ── Ticking ────────────────────────────────────────────────

    pub fn tick(&mut self, encounter: &Encounter) -> TimerResult<()> {
        let now = self.now();
        self.tick_loop.take_delta(now);
        if self.encounter_id.as_deref() != Some(encounter.id.as_str()) || !encounter.started {
            self.tick_loop.stop();
            return Ok(());
        }
        let Some((marker, class)) = self.following.as_ref().map(|f| (f.marker, f.participant.class)) else {
            self.tick_loop.stop();
            return Ok(());
        };
        if marker != encounter.marker() {
            return self.follow(encounter);
        }

        match self.render(now) {
            Display::Hidden => {}
            Display::Shown(frame) => {
                if !self.warned && frame.in_warning(&self.policy) {
                    self.warned = true;
                    self.events.push(TimerEvent::Warning {
                        marker,
                        class,
                        remaining_seconds: frame.remaining_seconds,
                    });
                }
                if frame.expired {
                    if !self.expired {
                        log::debug!("turn {marker:?} expired locally; waiting for host");
                        self.events.push(TimerEvent::Expired { marker, class });
                    }
                    self.expired = true;
                    self.tick_loop.stop();
                } else {
                    self.expired = false;
                }
            }
        }
        Ok(())
    }

    fn render(&mut self, now: Timestamp) -> Display {
        let Some(followed) = &self.following else {
            self.hud.hide();
            return Display::Hidden;
        };
        let class = followed.participant.class;
        let display = display::derive(&self.mirror, &self.policy, class, now, PoolView::Projected);
        match display {
            Display::Hidden => self.hud.hide(),
            Display::Shown(frame) => {
                self.hud.render(frame.to_hud(&followed.participant, self.config.portrait_mode));
            }
        }
        display
    }

    /// Ask the host to reset the current turn on our behalf.
    fn request_reset(&mut self, encounter: &Encounter) {
        let request = ChannelMessage::RequestReset {
            encounter_id: encounter.id.clone(),
            turn_index:   encounter.turn,
            requester_id: self.channel.local_user().to_string(),
        };
        match self.channel.emit(Recipient::Host, request) {
            Ok(()) => log::info!("encounter={} reset requested for turn {}", encounter.id, encounter.turn),
            Err(e) => log::warn!("encounter={} reset request not sent: {e}", encounter.id),
        }
    }
}

impl TimerRole for ReplicaEngine {
    fn kind(&self) -> RoleKind {
        RoleKind::Replica
    }

    fn clock(&self) -> &ClockState {
        &self.mirror
    }

    fn phase(&self) -> Phase {
        Phase::of(&self.mirror, self.expired)
    }

    /// Nothing settled is displayed while a snapshot wait is open.
    fn displayed(&self) -> Option<&HudUpdate> {
        if self.wait.is_some() {
            return None;
        }
        self.hud.last().filter(|_| self.hud.is_visible())
    }

    fn join(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.bind(encounter);
        // Whatever we mirrored before the gap may be out of date.
        self.following = None;
        self.snapshot_marker = None;
        self.follow(encounter)
    }

    fn on_encounter_start(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.follow(encounter)
    }

    fn on_turn_change(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.follow(encounter)
    }

    fn on_round_change(&mut self, _encounter: &Encounter) -> TimerResult<()> {
        Ok(())
    }

    fn on_participants_changed(&mut self, encounter: &Encounter) -> TimerResult<()> {
        if encounter.is_empty() {
            self.go_idle();
            return Ok(());
        }
        self.follow(encounter)
    }

    fn on_encounter_end(&mut self, encounter: &Encounter) -> TimerResult<()> {
        self.go_idle();
        self.forget();
        self.encounter_id = None;
        log::debug!("encounter={} ended; mirror cleared", encounter.id);
        Ok(())
    }

    fn on_session_pause(&mut self, _paused: bool) -> TimerResult<()> {
        // The host pauses and broadcasts the result.
        Ok(())
    }

    fn handle_intent(&mut self, intent: Intent, encounter: &mut Encounter) -> TimerResult<()> {
        match intent {
            Intent::Reset => self.request_reset(encounter),
            other => log::debug!("{other:?} is host-only; ignored on replica"),
        }
        Ok(())
    }

    fn force_style(&mut self, _file: Option<String>) -> TimerResult<()> {
        log::debug!("style changes come from the host; ignored on replica");
        Ok(())
    }

    fn pump(&mut self, encounter: &mut Encounter) -> TimerResult<()> {
        self.drain_inbox();
        let now = self.now();
        self.poll_wait(now);
        if self.tick_loop.is_due(now) {
            self.tick(encounter)?;
        }
        Ok(())
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
