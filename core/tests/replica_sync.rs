//! Replicas mirroring the host: steady state, lossy links, late joins,
//! silent hosts, host restarts and forced styles.

use turn_timer_core::{
    config::TimerConfig,
    encounter::{Encounter, Participant, SessionUser},
    harness::{HarnessOptions, SessionHarness},
    policy::ParticipantClass,
    presenter::PresenterCall,
    Intent, Phase,
};

const T0: i64 = 1_000_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn players(n: usize) -> Vec<SessionUser> {
    (1..=n).map(|i| SessionUser { id: format!("p{i}"), is_admin: false }).collect()
}

fn encounter() -> Encounter {
    Encounter::new(
        "enc-sync",
        vec![
            Participant::new("aria", "Aria", ParticipantClass::Primary).owned_by("p1"),
            Participant::new("bran", "Bran", ParticipantClass::Primary).owned_by("p2"),
            Participant::new("gob", "Goblin", ParticipantClass::Secondary),
        ],
    )
}

fn options() -> HarnessOptions {
    HarnessOptions {
        config: TimerConfig { start_combat_paused: false, ..TimerConfig::default() },
        start_at: T0,
        ..HarnessOptions::default()
    }
}

fn session(users: usize) -> SessionHarness {
    let mut s = SessionHarness::new(options(), encounter(), players(users)).expect("harness");
    s.start_encounter();
    s
}

#[test]
fn replicas_track_the_host_exactly_on_a_clean_link() {
    let mut s = session(2);
    for second in 0..75 {
        s.advance(1_000);
        assert_eq!(s.divergence(), 0, "diverged at second {second}");
    }
    assert!(s.count_events("gm", "expired") >= 2);
    for i in 0..s.replica_count() {
        assert_eq!(s.replica(i).clock(), s.host().clock(), "replica {i} mirror");
    }
}

#[test]
fn lossy_link_keeps_replicas_within_a_second() {
    init_logging();
    let opts = HarnessOptions { loss: Some((7, 0.5)), ..options() };
    let mut s = SessionHarness::new(opts, encounter(), players(4)).expect("harness");
    s.start_encounter();
    for second in 0..90 {
        s.advance(1_000);
        let gap = s.divergence();
        assert!(gap <= 1, "replicas {gap}s apart at second {second}");
    }
    assert!(s.bus_stats().dropped > 0, "the lossy link should have dropped something");
    assert!(s.encounter.round >= 2);
}

#[test]
fn late_joiner_adopts_the_host_clock() {
    let mut s = session(1);
    s.advance(7_000);
    let index = s.join_replica(SessionUser { id: "p9".into(), is_admin: false });
    assert!(s.replica(index).displayed().is_none(), "nothing shown until the snapshot lands");

    s.settle();
    assert_eq!(s.replica(index).clock(), s.host().clock());
    assert_eq!(s.replica(index).displayed().map(|h| h.remaining_seconds), Some(23));
    assert_eq!(s.divergence(), 0);
}

#[test]
fn silent_host_falls_back_to_a_provisional_countdown() {
    init_logging();
    let mut s = session(1);
    s.advance(2_000);
    s.disconnect(0);
    s.host_intent(Intent::Advance);
    let turn_start = s.now();
    assert!(s.replica(0).displayed().is_none());

    s.advance(800);
    assert!(s.replica(0).displayed().is_none(), "still inside the snapshot wait");
    s.advance(200);
    assert_eq!(s.replica(0).clock().end_at, turn_start + 1_000 + 30_000);
    assert_eq!(s.replica(0).displayed().map(|h| h.remaining_seconds), Some(30));
    assert_eq!(s.host().displayed().map(|h| h.remaining_seconds), Some(29));

    s.reconnect(0);
    s.settle();
    assert_eq!(s.replica(0).clock(), s.host().clock(), "real snapshot replaces the provisional one");
    assert_eq!(s.divergence(), 0);
}

#[test]
fn replica_hides_the_old_countdown_while_awaiting_a_snapshot() {
    let mut s = session(1);
    s.advance(1_000);
    s.disconnect(0);
    s.host_intent(Intent::Advance);
    s.advance(600);

    assert_eq!(s.host().displayed().map(|h| h.participant_name.as_str()), Some("Bran"));
    assert!(s.replica(0).displayed().is_none());
    assert_eq!(
        s.replica_presenter(0).calls().last(),
        Some(&PresenterCall::Hide),
        "the previous participant's countdown must not stay on screen"
    );

    s.advance(400);
    let shown = s.replica_presenter(0).last_update().expect("provisional countdown");
    assert_eq!(shown.participant_name, "Bran");
}

#[test]
fn replica_expiry_signals_but_never_advances() {
    let mut s = session(1);
    s.advance(10_000);
    s.disconnect(0);
    // The pause never reaches the replica, which keeps counting.
    s.host_intent(Intent::Pause);
    s.advance(19_800);
    assert_eq!(s.count_events("p1", "expired"), 0);
    s.advance(200);
    assert_eq!(s.count_events("p1", "expired"), 1);
    assert_eq!(s.replica(0).phase(), Phase::Expired);

    s.advance(5_000);
    assert_eq!(s.count_events("p1", "expired"), 1, "signalled once");
    assert_eq!(s.count_events("gm", "expired"), 0);
    assert_eq!(s.encounter.turn, 0, "only the host advances turns");

    s.reconnect(0);
    s.settle();
    assert_eq!(s.replica(0).phase(), Phase::Paused);
    assert_eq!(s.replica(0).displayed().map(|h| (h.remaining_seconds, h.paused)), Some((20, true)));
}

#[test]
fn restarted_host_resumes_the_persisted_clock() {
    let mut s = session(1);
    s.advance(5_000);
    let before = s.host().clock().clone();

    s.restart_host().expect("restart");
    assert_eq!(s.host().clock().revision, before.revision);
    assert_eq!(s.host().clock().end_at, before.end_at);
    assert_eq!(s.host().phase(), Phase::Running);
    assert_eq!(s.host().displayed().map(|h| h.remaining_seconds), Some(25));

    s.advance(25_000);
    assert_eq!(s.count_events("gm", "expired"), 1);
    assert_eq!(s.encounter.turn, 1);
    assert_eq!(s.divergence(), 0);
}

#[test]
fn forced_style_reaches_every_client() {
    let mut s = session(2);
    s.force_style(Some("styles/compact.css".into()));
    let style = PresenterCall::Style(Some("styles/compact.css".into()));
    assert!(s.host_presenter().calls().contains(&style));
    for i in 0..s.replica_count() {
        assert!(s.replica_presenter(i).calls().contains(&style), "replica {i} missed the style");
    }

    s.force_style(None);
    assert!(s.replica_presenter(0).calls().contains(&PresenterCall::Style(None)));
}

#[test]
fn replicas_cannot_move_the_turn() {
    let mut s = session(1);
    s.host_intent(Intent::Advance);
    s.replica_intent(0, Intent::Retreat);
    s.replica_intent(0, Intent::Advance);
    assert_eq!(s.encounter.turn, 1);
}
