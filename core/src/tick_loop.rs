//! The local tick loop: one periodic cadence per participant.
//!
//! RULE: Stopping is idempotent and leaves nothing scheduled.
//! A stopped loop is never due, so no callback can fire after stop().

use crate::types::Timestamp;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct TickLoop {
    interval_ms: u64,
    active:      bool,
    last_tick:   Timestamp,
    next_due:    Timestamp,
}

impl TickLoop {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            active: false,
            last_tick: 0,
            next_due: 0,
        }
    }

    /// (Re)start the cadence from `now`.
    pub fn start(&mut self, now: Timestamp) {
        self.active = true;
        self.last_tick = now;
        self.next_due = now + self.interval_ms as i64;
    }

    /// Returns true if the loop was running.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.active && now >= self.next_due
    }

    /// Consume one tick: wall-clock milliseconds since the previous one.
    pub fn take_delta(&mut self, now: Timestamp) -> u64 {
        let delta = u64::try_from(now - self.last_tick).unwrap_or(0);
        self.last_tick = now;
        while self.next_due <= now {
            self.next_due += self.interval_ms as i64;
        }
        delta
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent_and_never_due() {
        let mut l = TickLoop::default();
        l.start(0);
        assert!(l.stop());
        assert!(!l.stop());
        assert!(!l.is_due(10_000));
    }

    #[test]
    fn due_every_interval() {
        let mut l = TickLoop::new(200);
        l.start(1_000);
        assert!(!l.is_due(1_199));
        assert!(l.is_due(1_200));
        assert_eq!(l.take_delta(1_200), 200);
        assert!(!l.is_due(1_399));
    }

    #[test]
    fn late_tick_reports_full_gap_and_skips_missed_slots() {
        let mut l = TickLoop::new(200);
        l.start(0);
        assert_eq!(l.take_delta(1_050), 1_050);
        assert!(!l.is_due(1_100));
        assert!(l.is_due(1_200));
    }
}
