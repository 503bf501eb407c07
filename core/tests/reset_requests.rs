//! Reset requests sent from replicas to the host, and the host's
//! authorization of them.

use turn_timer_core::{
    channel::{ChannelMessage, MessageChannel, Recipient},
    config::TimerConfig,
    encounter::{Encounter, Participant, SessionUser},
    harness::{HarnessOptions, SessionHarness},
    policy::ParticipantClass,
    snapshot::STATE_FLAG,
    Intent,
};

const T0: i64 = 1_000_000;
const ENC: &str = "enc-reset";

const P1: usize = 0;
const P2: usize = 1;
const ADMIN: usize = 2;

fn session() -> SessionHarness {
    let encounter = Encounter::new(
        ENC,
        vec![
            Participant::new("aria", "Aria", ParticipantClass::Primary).owned_by("p1"),
            Participant::new("gob", "Goblin", ParticipantClass::Secondary),
        ],
    );
    let options = HarnessOptions {
        config: TimerConfig { start_combat_paused: false, ..TimerConfig::default() },
        start_at: T0,
        ..HarnessOptions::default()
    };
    let users = vec![
        SessionUser { id: "p1".into(), is_admin: false },
        SessionUser { id: "p2".into(), is_admin: false },
        SessionUser { id: "a1".into(), is_admin: true },
    ];
    let mut s = SessionHarness::new(options, encounter, users).expect("harness");
    s.start_encounter();
    s
}

fn reset(encounter_id: &str, turn_index: usize, requester_id: &str) -> ChannelMessage {
    ChannelMessage::RequestReset {
        encounter_id: encounter_id.into(),
        turn_index,
        requester_id: requester_id.into(),
    }
}

fn state_writes(s: &SessionHarness) -> u64 {
    s.inspector()
        .expect("store-backed harness")
        .flag_write_count(ENC, STATE_FLAG)
        .expect("write count")
}

#[test]
fn owner_reset_restarts_the_turn() {
    let mut s = session();
    s.advance(5_000);
    s.replica_intent(P1, Intent::Reset);

    assert_eq!(s.host().clock().end_at, s.now() + 30_000);
    assert_eq!(s.count_events("gm", "reset"), 1);
    assert_eq!(s.replica(P1).clock(), s.host().clock(), "replica adopts the reset snapshot");
    assert_eq!(s.replica(P1).displayed().map(|h| h.remaining_seconds), Some(30));
}

#[test]
fn admin_may_reset_any_turn_and_reset_unpauses() {
    let mut s = session();
    s.host_intent(Intent::Advance);
    s.advance(4_000);
    s.host_intent(Intent::Pause);

    s.replica_intent(ADMIN, Intent::Reset);
    let clock = s.host().clock();
    assert!(!clock.paused);
    assert_eq!(clock.end_at, s.now() + 15_000);
    assert_eq!(s.count_events("gm", "reset"), 1);
}

#[test]
fn ownership_follows_the_active_participant() {
    let mut s = session();
    s.host_intent(Intent::Advance);
    s.advance(3_000);
    let end_at = s.host().clock().end_at;

    s.replica_intent(P1, Intent::Reset);
    assert_eq!(s.host().clock().end_at, end_at, "p1 does not own the goblin");
    assert_eq!(s.count_events("gm", "request_dropped"), 1);
}

#[test]
fn invalid_requests_are_dropped_without_touching_state() {
    let mut s = session();
    s.advance(5_000);
    let clock = s.host().clock().clone();
    let writes = state_writes(&s);

    let p1 = s.bus().endpoint("p1");
    let p2 = s.bus().endpoint("p2");
    let stranger = s.bus().endpoint("stranger");
    p1.emit(Recipient::Host, reset(ENC, 1, "p1")).expect("stale turn");
    p1.emit(Recipient::Host, reset("enc-other", 0, "p1")).expect("unknown encounter");
    p2.emit(Recipient::Host, reset(ENC, 0, "p2")).expect("not an owner");
    p2.emit(Recipient::Host, reset(ENC, 0, "p1")).expect("spoofed requester");
    stranger.emit(Recipient::Host, reset(ENC, 0, "stranger")).expect("not in the session");
    s.settle();

    assert_eq!(s.host().clock(), &clock);
    assert_eq!(state_writes(&s), writes, "a dropped request never writes");
    assert_eq!(s.count_events("gm", "request_dropped"), 5);
    assert_eq!(s.count_events("gm", "reset"), 0);

    let logged = s
        .inspector()
        .expect("store-backed harness")
        .event_count(ENC, "request_dropped")
        .expect("event count");
    assert_eq!(logged, 5);
}

#[test]
fn request_for_an_ended_encounter_is_dropped() {
    let mut s = session();
    let p1 = s.bus().endpoint("p1");
    s.end_encounter();
    p1.emit(Recipient::Host, reset(ENC, 0, "p1")).expect("send");
    s.settle();
    assert_eq!(s.count_events("gm", "reset"), 0);
    assert!(!s.host().clock().running);
}

#[test]
fn non_owner_replica_request_is_refused() {
    let mut s = session();
    s.advance(2_000);
    let end_at = s.host().clock().end_at;
    s.replica_intent(P2, Intent::Reset);
    assert_eq!(s.host().clock().end_at, end_at);
    assert_eq!(s.count_events("gm", "request_dropped"), 1);
}
