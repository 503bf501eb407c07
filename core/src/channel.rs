//! Message channel: topic-scoped pub/sub between session participants.
//!
//! RULE: Delivery is fire-and-forget. Messages may be delayed or
//! dropped; the engines tolerate loss because the next broadcast
//! re-synchronizes every replica.

use crate::{
    clock::ClockState,
    encounter::TurnMarker,
    error::{TimerError, TimerResult},
    rng::DeliveryRng,
    types::{EncounterId, UserId},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Variants are appended over time; never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ChannelMessage {
    /// Replica → host: reset the current turn.
    #[serde(rename_all = "camelCase")]
    RequestReset {
        encounter_id: EncounterId,
        turn_index:   usize,
        requester_id: UserId,
    },
    /// Host → all: a GM-chosen HUD style. Presentation only.
    #[serde(rename_all = "camelCase")]
    ForceStyle {
        file: Option<String>,
    },
    /// Replica → host: send me the persisted clock record.
    #[serde(rename_all = "camelCase")]
    RequestSnapshot {
        encounter_id: EncounterId,
    },
    /// Host → all: the persisted clock record changed.
    #[serde(rename_all = "camelCase")]
    SnapshotChanged {
        encounter_id: EncounterId,
        marker:       TurnMarker,
        clock:        ClockState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Host,
    Broadcast,
    User(UserId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from:    UserId,
    pub message: ChannelMessage,
}

pub trait MessageChannel: Send {
    /// The user this endpoint sends as.
    fn local_user(&self) -> &str;

    fn emit(&self, to: Recipient, message: ChannelMessage) -> TimerResult<()>;

    /// Take every message delivered to this endpoint so far.
    fn drain(&self) -> Vec<Envelope>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub delivered: u64,
    pub dropped:   u64,
}

struct LossModel {
    rate:  f64,
    links: HashMap<UserId, DeliveryRng>,
    seed:  u64,
}

struct BusInner {
    host:     UserId,
    inboxes:  HashMap<UserId, VecDeque<Envelope>>,
    order:    Vec<UserId>,
    detached: HashSet<UserId>,
    loss:     Option<LossModel>,
    stats:    BusStats,
}

impl BusInner {
    fn deliver(&mut self, to: &UserId, envelope: Envelope) {
        if self.detached.contains(to) {
            self.stats.dropped += 1;
            return;
        }
        if let Some(loss) = self.loss.as_mut() {
            let index = self.order.iter().position(|u| u == to).unwrap_or(0) as u64;
            let (seed, rate) = (loss.seed, loss.rate);
            let rng = loss
                .links
                .entry(to.clone())
                .or_insert_with(|| DeliveryRng::new(seed, index));
            if rng.chance(rate) {
                self.stats.dropped += 1;
                return;
            }
        }
        if let Some(inbox) = self.inboxes.get_mut(to) {
            inbox.push_back(envelope);
            self.stats.delivered += 1;
        }
    }
}

/// An in-process bus. Clones share the same topic.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LocalBus {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                host: host.into(),
                inboxes: HashMap::new(),
                order: Vec::new(),
                detached: HashSet::new(),
                loss: None,
                stats: BusStats::default(),
            })),
        }
    }

    /// Drop each delivery with probability `rate`, reproducibly from `seed`.
    pub fn with_loss(self, seed: u64, rate: f64) -> Self {
        self.lock().loss = Some(LossModel {
            rate: rate.clamp(0.0, 1.0),
            links: HashMap::new(),
            seed,
        });
        self
    }

    pub fn endpoint(&self, user: impl Into<String>) -> BusEndpoint {
        let user = user.into();
        let mut inner = self.lock();
        if !inner.inboxes.contains_key(&user) {
            inner.inboxes.insert(user.clone(), VecDeque::new());
            inner.order.push(user.clone());
        }
        BusEndpoint { bus: self.clone(), user }
    }

    /// Simulate a disconnect: pending and future messages to `user` are lost.
    pub fn detach(&self, user: &str) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.detached.insert(user.to_string());
        if let Some(inbox) = inner.inboxes.get_mut(user) {
            let lost = inbox.len() as u64;
            inbox.clear();
            inner.stats.dropped += lost;
        }
    }

    pub fn attach(&self, user: &str) {
        self.lock().detached.remove(user);
    }

    pub fn stats(&self) -> BusStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct BusEndpoint {
    bus:  LocalBus,
    user: UserId,
}

impl MessageChannel for BusEndpoint {
    fn local_user(&self) -> &str {
        &self.user
    }

    fn emit(&self, to: Recipient, message: ChannelMessage) -> TimerResult<()> {
        let mut inner = self.bus.lock();
        if inner.detached.contains(&self.user) {
            return Err(TimerError::Other(anyhow::anyhow!(
                "channel disconnected for user '{}'",
                self.user
            )));
        }
        let targets: Vec<UserId> = match to {
            Recipient::Host => vec![inner.host.clone()],
            Recipient::User(u) => vec![u],
            Recipient::Broadcast => inner.order.clone(),
        };
        for target in targets.into_iter().filter(|t| *t != self.user) {
            let envelope = Envelope { from: self.user.clone(), message: message.clone() };
            inner.deliver(&target, envelope);
        }
        Ok(())
    }

    fn drain(&self) -> Vec<Envelope> {
        let mut inner = self.bus.lock();
        match inner.inboxes.get_mut(&self.user) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_request() -> ChannelMessage {
        ChannelMessage::RequestReset {
            encounter_id: "enc".into(),
            turn_index: 1,
            requester_id: "p1".into(),
        }
    }

    #[test]
    fn wire_format_uses_action_tag_and_camel_case() {
        let json = serde_json::to_value(reset_request()).expect("serialize");
        assert_eq!(json["action"], "requestReset");
        assert_eq!(json["encounterId"], "enc");
        assert_eq!(json["turnIndex"], 1);
        assert_eq!(json["requesterId"], "p1");
    }

    #[test]
    fn broadcast_skips_sender() {
        let bus = LocalBus::new("gm");
        let gm = bus.endpoint("gm");
        let p1 = bus.endpoint("p1");
        let p2 = bus.endpoint("p2");
        gm.emit(Recipient::Broadcast, ChannelMessage::ForceStyle { file: None }).expect("emit");
        assert!(gm.drain().is_empty());
        assert_eq!(p1.drain().len(), 1);
        assert_eq!(p2.drain().len(), 1);
    }

    #[test]
    fn host_recipient_reaches_only_host() {
        let bus = LocalBus::new("gm");
        let gm = bus.endpoint("gm");
        let p1 = bus.endpoint("p1");
        let p2 = bus.endpoint("p2");
        p1.emit(Recipient::Host, reset_request()).expect("emit");
        let got = gm.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].from, "p1");
        assert!(p2.drain().is_empty());
    }

    #[test]
    fn detached_users_lose_messages_and_cannot_send() {
        let bus = LocalBus::new("gm");
        let gm = bus.endpoint("gm");
        let p1 = bus.endpoint("p1");
        bus.detach("p1");
        gm.emit(Recipient::Broadcast, ChannelMessage::ForceStyle { file: None }).expect("emit");
        assert!(p1.emit(Recipient::Host, reset_request()).is_err());
        bus.attach("p1");
        assert!(p1.drain().is_empty(), "messages sent while detached are gone");
        assert_eq!(bus.stats().dropped, 1);
    }

    #[test]
    fn full_loss_drops_everything() {
        let bus = LocalBus::new("gm").with_loss(1, 1.0);
        let gm = bus.endpoint("gm");
        let p1 = bus.endpoint("p1");
        for _ in 0..5 {
            gm.emit(Recipient::Broadcast, ChannelMessage::ForceStyle { file: None }).expect("emit");
        }
        assert!(p1.drain().is_empty());
        assert_eq!(bus.stats(), BusStats { delivered: 0, dropped: 5 });
    }
}
