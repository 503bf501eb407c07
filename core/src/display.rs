//! Display derivation: what the HUD shows, computed from a ClockState.
//!
//! Both roles use the same derivation. The host reads its authoritative
//! state as-is; replicas project the shared pool forward from the host's
//! last update so the countdown stays smooth between snapshots.

use crate::{
    clock::{ceil_seconds, ClockState},
    encounter::Participant,
    policy::{ParticipantClass, TimerMode, TurnDurationPolicy},
    presenter::{participant_image, HudUpdate, PortraitMode},
    types::Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub remaining_seconds: u32,
    pub total_seconds:     u32,
    pub class:             ParticipantClass,
    pub paused:            bool,
    pub expired:           bool,
}

impl Frame {
    /// Inside the warning window but not yet expired.
    pub fn in_warning(&self, policy: &TurnDurationPolicy) -> bool {
        self.remaining_seconds > 0 && self.remaining_seconds <= policy.warning_at(self.total_seconds)
    }

    pub fn to_hud(&self, participant: &Participant, portraits: PortraitMode) -> HudUpdate {
        HudUpdate {
            remaining_seconds: self.remaining_seconds,
            total_seconds:     self.total_seconds,
            participant_name:  participant.name.clone(),
            participant_image: participant_image(participant, portraits),
            paused:            self.paused,
            participant_class: self.class,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Hidden,
    Shown(Frame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolView {
    /// Use the pool balance exactly as stored.
    Authoritative,
    /// Subtract time elapsed since `last_updated_at` while running.
    Projected,
}

pub fn derive(
    state: &ClockState,
    policy: &TurnDurationPolicy,
    class: ParticipantClass,
    now: Timestamp,
    pool_view: PoolView,
) -> Display {
    if !state.running {
        return Display::Hidden;
    }
    let total_seconds = policy.display_total(class, state);
    match policy.mode_for(class) {
        TimerMode::Disabled => Display::Hidden,
        TimerMode::Shared => {
            let mut pool = state.pool_remaining_ms(class);
            if pool_view == PoolView::Projected && !state.paused {
                let elapsed = u64::try_from(now.saturating_sub(state.last_updated_at)).unwrap_or(0);
                pool = pool.saturating_sub(elapsed);
            }
            Display::Shown(Frame {
                remaining_seconds: ceil_seconds(pool),
                total_seconds,
                class,
                paused:            state.paused,
                expired:           !state.paused && pool == 0,
            })
        }
        TimerMode::Normal => {
            let (remaining, expired) = if state.paused {
                (state.paused_remaining_seconds, false)
            } else {
                (state.seconds_until_end(now), state.end_at <= now)
            };
            Display::Shown(Frame {
                remaining_seconds: remaining,
                total_seconds,
                class,
                paused:            state.paused,
                expired,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: TimerMode) -> TurnDurationPolicy {
        TurnDurationPolicy::new(30, 15, mode, mode, 20)
    }

    fn frame(d: Display) -> Frame {
        match d {
            Display::Shown(f) => f,
            Display::Hidden => panic!("expected a shown frame"),
        }
    }

    #[test]
    fn normal_mode_counts_down_to_end_at() {
        let state = ClockState { running: true, end_at: 30_000, ..ClockState::default() };
        let f = frame(derive(&state, &policy(TimerMode::Normal), ParticipantClass::Primary, 25_000, PoolView::Authoritative));
        assert_eq!((f.remaining_seconds, f.total_seconds, f.expired), (5, 30, false));
        let f = frame(derive(&state, &policy(TimerMode::Normal), ParticipantClass::Primary, 30_000, PoolView::Authoritative));
        assert!(f.expired);
    }

    #[test]
    fn paused_normal_shows_captured_seconds() {
        let state = ClockState {
            running: true,
            paused: true,
            paused_remaining_seconds: 12,
            end_at: 1,
            ..ClockState::default()
        };
        let f = frame(derive(&state, &policy(TimerMode::Normal), ParticipantClass::Primary, 99_999, PoolView::Authoritative));
        assert_eq!(f.remaining_seconds, 12);
        assert!(!f.expired, "a paused clock never expires");
    }

    #[test]
    fn disabled_and_idle_are_hidden() {
        let running = ClockState { running: true, ..ClockState::default() };
        assert_eq!(
            derive(&running, &policy(TimerMode::Disabled), ParticipantClass::Secondary, 0, PoolView::Authoritative),
            Display::Hidden
        );
        assert_eq!(
            derive(&ClockState::default(), &policy(TimerMode::Normal), ParticipantClass::Primary, 0, PoolView::Authoritative),
            Display::Hidden
        );
    }

    #[test]
    fn replicas_project_the_pool_between_snapshots() {
        let mut state = ClockState { running: true, last_updated_at: 1_000, ..ClockState::default() };
        state.fill_pools(60_000, 60_000);
        let p = policy(TimerMode::Shared);
        let host = frame(derive(&state, &p, ParticipantClass::Primary, 3_000, PoolView::Authoritative));
        let replica = frame(derive(&state, &p, ParticipantClass::Primary, 3_000, PoolView::Projected));
        assert_eq!(host.remaining_seconds, 60);
        assert_eq!(replica.remaining_seconds, 58);
        assert_eq!(replica.total_seconds, 60);
    }

    #[test]
    fn empty_pool_expires_only_while_running() {
        let mut state = ClockState { running: true, ..ClockState::default() };
        state.fill_pools(60_000, 0);
        state.drain_pool(ParticipantClass::Primary, 60_000);
        let p = policy(TimerMode::Shared);
        assert!(frame(derive(&state, &p, ParticipantClass::Primary, 0, PoolView::Authoritative)).expired);
        state.paused = true;
        assert!(!frame(derive(&state, &p, ParticipantClass::Primary, 0, PoolView::Authoritative)).expired);
    }

    #[test]
    fn warning_window_excludes_zero() {
        let p = policy(TimerMode::Normal);
        let f = |remaining_seconds| Frame {
            remaining_seconds,
            total_seconds: 30,
            class: ParticipantClass::Primary,
            paused: false,
            expired: false,
        };
        assert!(!f(7).in_warning(&p));
        assert!(f(6).in_warning(&p));
        assert!(!f(0).in_warning(&p));
    }
}
