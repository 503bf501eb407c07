//! SessionHarness: a whole session in one process.
//!
//! One host service, any number of replica services, an in-process bus
//! and a clock that is either stepped by hand or the wall clock. Plays
//! the host application's part: it owns the encounter, forwards its
//! notifications, and pumps every participant.
//! Used by the integration tests and the runner.

use std::{sync::Arc, thread, time::Duration};

use crate::{
    channel::{BusStats, LocalBus},
    config::TimerConfig,
    document::SharedDocument,
    encounter::{Encounter, Participant, Roster, SessionUser, TurnMarker},
    error::TimerResult,
    event::{AudioCue, TimerEvent},
    presenter::RecordingPresenter,
    role::Intent,
    service::TimerService,
    store::FlagStore,
    time::{ManualTimeSource, SystemTimeSource, TimeSource},
    types::{Timestamp, UserId},
};

/// How `advance` moves time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pacing {
    /// A manual clock stepped tick by tick; runs as fast as it can.
    #[default]
    Stepped,
    /// The system clock; `advance` sleeps between pumps.
    Realtime,
}

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub config:    TimerConfig,
    pub host_user: UserId,
    /// SQLite path or URI. None uses a private shared-cache memory database.
    pub db_path:   Option<String>,
    /// `(seed, drop rate)` for the lossy bus.
    pub loss:      Option<(u64, f64)>,
    /// Start of the stepped clock. Ignored for realtime pacing.
    pub start_at:  Timestamp,
    pub pacing:    Pacing,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config:    TimerConfig::default(),
            host_user: "gm".to_string(),
            db_path:   None,
            loss:      None,
            start_at:  1_000_000,
            pacing:    Pacing::Stepped,
        }
    }
}

pub struct ReplicaSlot {
    pub user:      SessionUser,
    pub service:   TimerService,
    pub presenter: RecordingPresenter,
}

pub struct SessionHarness {
    pub encounter:  Encounter,
    options:        HarnessOptions,
    time:           Arc<dyn TimeSource>,
    /// Present when the clock is stepped by hand.
    manual:         Option<ManualTimeSource>,
    bus:            LocalBus,
    roster:         Roster,
    host:           TimerService,
    host_presenter: RecordingPresenter,
    inspector:      Option<FlagStore>,
    replicas:       Vec<ReplicaSlot>,
    last_marker:    TurnMarker,
    events:         Vec<(UserId, TimerEvent)>,
    cues:           Vec<(UserId, AudioCue)>,
}

impl SessionHarness {
    /// A session backed by a SQLite flag store.
    pub fn new(options: HarnessOptions, encounter: Encounter, users: Vec<SessionUser>) -> TimerResult<Self> {
        let store = open_store(&options)?;
        let inspector = store.reopen()?;
        let mut harness = Self::build(options, encounter, users, Box::new(store));
        harness.inspector = Some(inspector);
        Ok(harness)
    }

    /// A session whose host writes to a caller-supplied document.
    pub fn with_document(
        options: HarnessOptions,
        encounter: Encounter,
        users: Vec<SessionUser>,
        document: Box<dyn SharedDocument>,
    ) -> Self {
        Self::build(options, encounter, users, document)
    }

    fn build(
        options: HarnessOptions,
        encounter: Encounter,
        users: Vec<SessionUser>,
        document: Box<dyn SharedDocument>,
    ) -> Self {
        let manual = match options.pacing {
            Pacing::Stepped => Some(ManualTimeSource::new(options.start_at)),
            Pacing::Realtime => None,
        };
        let time: Arc<dyn TimeSource> = match &manual {
            Some(clock) => Arc::new(clock.clone()),
            None => Arc::new(SystemTimeSource),
        };
        let bus = match options.loss {
            Some((seed, rate)) => LocalBus::new(options.host_user.clone()).with_loss(seed, rate),
            None => LocalBus::new(options.host_user.clone()),
        };
        let mut roster = Roster::new();
        roster.insert(SessionUser { id: options.host_user.clone(), is_admin: true });
        for user in &users {
            roster.insert(user.clone());
        }

        let host_presenter = RecordingPresenter::labelled(options.host_user.clone());
        let host = TimerService::host(
            options.config.clone(),
            document,
            Box::new(bus.endpoint(options.host_user.clone())),
            Box::new(host_presenter.clone()),
            time.clone(),
            roster.clone(),
        );

        let mut harness = Self {
            last_marker: encounter.marker(),
            encounter,
            options,
            time,
            manual,
            bus,
            roster,
            host,
            host_presenter,
            inspector: None,
            replicas: Vec::new(),
            events: Vec::new(),
            cues: Vec::new(),
        };
        for user in users {
            harness.add_replica(user);
        }
        harness
    }

    fn add_replica(&mut self, user: SessionUser) -> usize {
        let presenter = RecordingPresenter::labelled(user.id.clone());
        let service = TimerService::replica(
            self.options.config.clone(),
            Box::new(self.bus.endpoint(user.id.clone())),
            Box::new(presenter.clone()),
            self.time.clone(),
        );
        self.replicas.push(ReplicaSlot { user, service, presenter });
        self.replicas.len() - 1
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn now(&self) -> Timestamp {
        self.time.now_ms()
    }

    pub fn host(&self) -> &TimerService {
        &self.host
    }

    pub fn host_user(&self) -> &str {
        &self.options.host_user
    }

    pub fn host_presenter(&self) -> &RecordingPresenter {
        &self.host_presenter
    }

    pub fn replica(&self, index: usize) -> &TimerService {
        &self.replicas[index].service
    }

    pub fn replica_presenter(&self, index: usize) -> &RecordingPresenter {
        &self.replicas[index].presenter
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// A second connection to the host's store, when it has one.
    pub fn inspector(&self) -> Option<&FlagStore> {
        self.inspector.as_ref()
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    pub fn events(&self) -> &[(UserId, TimerEvent)] {
        &self.events
    }

    /// Sounds requested so far, by the participant that would play them.
    pub fn cues(&self) -> &[(UserId, AudioCue)] {
        &self.cues
    }

    /// Events raised by one participant, in order.
    pub fn events_of(&self, user: &str) -> Vec<TimerEvent> {
        self.events
            .iter()
            .filter(|(u, _)| u == user)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn count_events(&self, user: &str, type_name: &str) -> usize {
        self.events
            .iter()
            .filter(|(u, e)| u == user && e.type_name() == type_name)
            .count()
    }

    /// Largest gap in displayed seconds between the host and any visible replica.
    pub fn divergence(&self) -> u32 {
        let Some(host) = self.host.displayed() else {
            return 0;
        };
        self.replicas
            .iter()
            .filter_map(|r| r.service.displayed())
            .map(|d| d.remaining_seconds.abs_diff(host.remaining_seconds))
            .max()
            .unwrap_or(0)
    }

    // ── Host-application side ──────────────────────────────────

    pub fn start_encounter(&mut self) {
        self.encounter.begin();
        self.last_marker = self.encounter.marker();
        self.host.encounter_started(&self.encounter);
        for r in &mut self.replicas {
            r.service.encounter_started(&self.encounter);
        }
        self.collect_events();
        self.settle();
    }

    pub fn end_encounter(&mut self) {
        self.encounter.end();
        self.host.encounter_ended(&self.encounter);
        for r in &mut self.replicas {
            r.service.encounter_ended(&self.encounter);
        }
        self.collect_events();
    }

    pub fn pause_session(&mut self, paused: bool) {
        self.host.session_paused(paused);
        for r in &mut self.replicas {
            r.service.session_paused(paused);
        }
        self.collect_events();
        self.settle();
    }

    pub fn add_participant(&mut self, participant: Participant) {
        self.encounter.add_participant(participant);
        self.participants_changed();
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        let removed = self.encounter.remove_participant(id);
        self.participants_changed();
        removed
    }

    fn participants_changed(&mut self) {
        self.last_marker = self.encounter.marker();
        self.host.participants_changed(&self.encounter);
        for r in &mut self.replicas {
            r.service.participants_changed(&self.encounter);
        }
        self.collect_events();
        self.settle();
    }

    pub fn host_intent(&mut self, intent: Intent) {
        self.host.intent(intent, &mut self.encounter);
        self.announce_turn_changes();
        self.collect_events();
        self.settle();
    }

    pub fn replica_intent(&mut self, index: usize, intent: Intent) {
        self.replicas[index].service.intent(intent, &mut self.encounter);
        self.collect_events();
        self.settle();
    }

    /// The GM picks a HUD style for everyone.
    pub fn force_style(&mut self, file: Option<String>) {
        self.host.force_style(file);
        self.settle();
    }

    /// A new participant process attaches mid-encounter.
    pub fn join_replica(&mut self, user: SessionUser) -> usize {
        let index = self.add_replica(user);
        self.replicas[index].service.join(&self.encounter);
        self.collect_events();
        index
    }

    pub fn disconnect(&mut self, index: usize) {
        self.bus.detach(&self.replicas[index].user.id);
    }

    pub fn reconnect(&mut self, index: usize) {
        self.bus.attach(&self.replicas[index].user.id);
        self.replicas[index].service.join(&self.encounter);
        self.collect_events();
    }

    /// Replace the host process, keeping its store.
    pub fn restart_host(&mut self) -> TimerResult<()> {
        let Some(inspector) = &self.inspector else {
            return Err(anyhow::anyhow!("restart needs a store-backed harness").into());
        };
        let store = inspector.reopen()?;
        self.host_presenter = RecordingPresenter::labelled(self.options.host_user.clone());
        self.host = TimerService::host(
            self.options.config.clone(),
            Box::new(store),
            Box::new(self.bus.endpoint(self.options.host_user.clone())),
            Box::new(self.host_presenter.clone()),
            self.time.clone(),
            self.roster.clone(),
        );
        self.host.join(&self.encounter);
        self.collect_events();
        Ok(())
    }

    // ── Driving time ───────────────────────────────────────────

    /// Advance the clock in tick-sized steps, pumping everyone after each.
    pub fn advance(&mut self, ms: i64) {
        let step = self.options.config.tick_interval_ms.max(1) as i64;
        let mut left = ms;
        while left > 0 {
            let dt = step.min(left);
            match &self.manual {
                Some(clock) => {
                    clock.advance(dt);
                }
                None => thread::sleep(Duration::from_millis(dt as u64)),
            }
            self.pump_all();
            left -= dt;
        }
    }

    /// Deliver in-flight messages without moving the clock.
    pub fn settle(&mut self) {
        for _ in 0..2 {
            self.pump_all();
        }
    }

    fn pump_all(&mut self) {
        self.host.pump(&mut self.encounter);
        self.announce_turn_changes();
        for r in &mut self.replicas {
            r.service.pump(&mut self.encounter);
        }
        self.collect_events();
    }

    /// Tell everyone when the host moved the turn pointer.
    fn announce_turn_changes(&mut self) {
        let marker = self.encounter.marker();
        if marker == self.last_marker {
            return;
        }
        let new_round = marker.round != self.last_marker.round;
        self.last_marker = marker;
        if new_round {
            self.host.round_changed(&self.encounter);
            for r in &mut self.replicas {
                r.service.round_changed(&self.encounter);
            }
        }
        self.host.turn_changed(&self.encounter);
        for r in &mut self.replicas {
            r.service.turn_changed(&self.encounter);
        }
    }

    fn collect_events(&mut self) {
        let mut drained = vec![(self.options.host_user.clone(), self.host.drain_events())];
        for r in &mut self.replicas {
            drained.push((r.user.id.clone(), r.service.drain_events()));
        }
        for (user, events) in drained {
            for event in events {
                if let Some(cue) = event.audio_cue(&self.options.config.sounds) {
                    log::info!("[{user}] play {} at volume {:.1}", cue.src, cue.volume);
                    self.cues.push((user.clone(), cue));
                }
                self.events.push((user.clone(), event));
            }
        }
    }
}

fn open_store(options: &HarnessOptions) -> TimerResult<FlagStore> {
    let path = match &options.db_path {
        Some(p) => p.clone(),
        None => format!("file:timer-{}?mode=memory&cache=shared", uuid::Uuid::new_v4().simple()),
    };
    let store = FlagStore::open(&path)?;
    store.migrate()?;
    Ok(store)
}
