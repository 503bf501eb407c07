//! Await-first-or-timeout: a bounded wait for one matching notification.
//!
//! A wait settles exactly once: either a matching key is offered before
//! the deadline, or the deadline passes and the caller runs its single
//! fallback. Offers and polls after settling are ignored.

use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Pending,
    Matched,
    TimedOut,
    /// Already reported as Matched or TimedOut.
    Settled,
}

#[derive(Debug, Clone)]
pub struct AwaitFirst<K: PartialEq> {
    key:      K,
    deadline: Timestamp,
    matched:  bool,
    settled:  bool,
}

impl<K: PartialEq> AwaitFirst<K> {
    pub fn new(key: K, deadline: Timestamp) -> Self {
        Self { key, deadline, matched: false, settled: false }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Offer a notification key. Returns true if it satisfies the wait.
    pub fn offer(&mut self, key: &K) -> bool {
        if self.settled || self.matched || *key != self.key {
            return false;
        }
        self.matched = true;
        true
    }

    pub fn poll(&mut self, now: Timestamp) -> WaitStatus {
        if self.settled {
            return WaitStatus::Settled;
        }
        if self.matched {
            self.settled = true;
            return WaitStatus::Matched;
        }
        if now >= self.deadline {
            self.settled = true;
            return WaitStatus::TimedOut;
        }
        WaitStatus::Pending
    }
}
