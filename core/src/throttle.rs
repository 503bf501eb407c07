//! Write throttle for routine persistence.
//!
//! RULE: State transitions write immediately. Routine per-tick changes
//! write at most once per interval, and a skipped write leaves a
//! trailing deadline so the latest state lands even if ticking stops.

use crate::types::Timestamp;

pub const DEFAULT_WRITE_THROTTLE_MS: u64 = 800;

/// Slack added to the trailing deadline so it lands past the window.
const TRAILING_SLACK_MS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    Now,
    Deferred { until: Timestamp },
}

#[derive(Debug, Clone)]
pub struct WriteThrottle {
    interval_ms:   i64,
    last_write_at: Option<Timestamp>,
    trailing_at:   Option<Timestamp>,
}

impl WriteThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms as i64,
            last_write_at: None,
            trailing_at: None,
        }
    }

    /// Decide whether a routine write may go out now.
    pub fn routine(&mut self, now: Timestamp) -> WriteDecision {
        let since = match self.last_write_at {
            Some(at) => now - at,
            None => return WriteDecision::Now,
        };
        if since >= self.interval_ms {
            return WriteDecision::Now;
        }
        let until = now + (self.interval_ms - since) + TRAILING_SLACK_MS;
        self.trailing_at = Some(until);
        WriteDecision::Deferred { until }
    }

    /// A write succeeded; any trailing write is superseded.
    pub fn record_write(&mut self, now: Timestamp) {
        self.last_write_at = Some(now);
        self.trailing_at = None;
    }

    /// A write failed; try again on the next throttled cycle.
    pub fn retry_later(&mut self, now: Timestamp) {
        self.trailing_at = Some(now + self.interval_ms);
    }

    pub fn trailing_due(&self, now: Timestamp) -> bool {
        matches!(self.trailing_at, Some(at) if now >= at)
    }

    pub fn pending(&self) -> Option<Timestamp> {
        self.trailing_at
    }

    pub fn cancel(&mut self) {
        self.trailing_at = None;
    }
}

impl Default for WriteThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_THROTTLE_MS)
    }
}
