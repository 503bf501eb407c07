//! Shared-pool mode: one balance drains across every turn of a class.

use turn_timer_core::{
    config::TimerConfig,
    encounter::{Encounter, Participant, SessionUser},
    harness::{HarnessOptions, SessionHarness},
    policy::{ParticipantClass, TimerMode},
    Intent,
};

const T0: i64 = 1_000_000;

fn shared_npcs() -> TimerConfig {
    TimerConfig {
        secondary_mode: TimerMode::Shared,
        start_combat_paused: false,
        ..TimerConfig::default()
    }
}

fn session(config: TimerConfig) -> SessionHarness {
    let encounter = Encounter::new(
        "enc-pool",
        vec![
            Participant::new("aria", "Aria", ParticipantClass::Primary).owned_by("p1"),
            Participant::new("gob", "Goblin", ParticipantClass::Secondary),
        ],
    );
    let options = HarnessOptions { config, start_at: T0, ..HarnessOptions::default() };
    let mut s = SessionHarness::new(options, encounter, vec![SessionUser { id: "p1".into(), is_admin: false }])
        .expect("harness");
    s.start_encounter();
    s
}

fn npc_pool(s: &SessionHarness) -> u64 {
    s.host().clock().npc_pool_remaining_ms
}

#[test]
fn shared_turn_runs_on_the_pool_not_the_per_turn_allotment() {
    let mut s = session(shared_npcs());
    s.host_intent(Intent::Advance);
    assert_eq!(s.encounter.turn, 1);
    assert_eq!(s.host().clock().end_at, T0 + 60_000);
    let hud = s.host().displayed().expect("hud").clone();
    assert_eq!((hud.remaining_seconds, hud.total_seconds), (60, 60));

    s.advance(15_000);
    assert_eq!(s.count_events("gm", "expired"), 0, "15s per-turn setting does not apply");

    s.advance(44_800);
    assert_eq!(s.count_events("gm", "expired"), 0);
    assert_eq!(s.count_events("gm", "warning"), 1, "warning at 20% of the pool");

    s.advance(200);
    assert_eq!(s.count_events("gm", "expired"), 1);
    assert_eq!(npc_pool(&s), 0);
    assert_eq!((s.encounter.round, s.encounter.turn), (2, 0));
}

#[test]
fn pool_only_drains_and_reset_refills_it() {
    let mut s = session(shared_npcs());
    s.host_intent(Intent::Advance);
    let mut last = npc_pool(&s);
    assert_eq!(last, 60_000);
    for _ in 0..10 {
        s.advance(1_000);
        let pool = npc_pool(&s);
        assert!(pool <= last, "pool went up from {last} to {pool}");
        last = pool;
    }
    assert_eq!(last, 50_000);
    assert_eq!(s.host().clock().players_pool_remaining_ms, 60_000, "other class untouched");

    s.host_intent(Intent::Reset);
    assert_eq!(npc_pool(&s), 60_000);
    assert_eq!(s.host().clock().end_at, s.now() + 60_000);
}

#[test]
fn pool_carries_across_turns_and_rounds() {
    let mut s = session(shared_npcs());
    for _ in 0..3 {
        s.host_intent(Intent::Advance);
        assert_eq!(s.encounter.turn, 1);
        s.advance(10_000);
        s.host_intent(Intent::Advance);
        assert_eq!(s.encounter.turn, 0);
    }
    assert_eq!(s.encounter.round, 4);
    assert_eq!(npc_pool(&s), 30_000);
    assert_eq!(s.replica(0).clock().npc_pool_remaining_ms, 30_000, "replica mirrors the balance");

    s.host_intent(Intent::Advance);
    assert_eq!(s.host().clock().end_at, s.now() + 30_000);
    s.host_intent(Intent::Reset);
    assert_eq!(npc_pool(&s), 60_000);
}

#[test]
fn refill_each_round_restores_the_pool() {
    let config = TimerConfig { refill_pools_each_round: true, ..shared_npcs() };
    let mut s = session(config);
    s.host_intent(Intent::Advance);
    s.advance(20_000);
    assert_eq!(npc_pool(&s), 40_000);

    s.host_intent(Intent::Advance);
    assert_eq!(s.encounter.round, 2);
    assert_eq!(npc_pool(&s), 60_000);
}

#[test]
fn pools_persist_between_rounds_by_default() {
    let mut s = session(shared_npcs());
    s.host_intent(Intent::Advance);
    s.advance(20_000);
    s.host_intent(Intent::Advance);
    assert_eq!(s.encounter.round, 2);
    assert_eq!(npc_pool(&s), 40_000);
}

#[test]
fn replicas_project_the_pool_between_snapshots() {
    let mut s = session(shared_npcs());
    s.host_intent(Intent::Advance);
    for _ in 0..12 {
        s.advance(1_000);
        assert_eq!(s.divergence(), 0);
        let host = s.host().displayed().map(|h| h.remaining_seconds);
        assert_eq!(s.replica(0).displayed().map(|h| h.remaining_seconds), host);
    }
    assert_eq!(s.host().displayed().map(|h| h.remaining_seconds), Some(48));
}
