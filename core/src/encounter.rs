//! Encounter model: the host-owned, turn-structured combat document.
//!
//! The host application owns encounters; the engines read them and only
//! the host role ever advances the turn.

use crate::{
    policy::ParticipantClass,
    types::{EncounterId, ParticipantId, UserId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one turn of one encounter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TurnMarker {
    pub round: u32,
    pub turn:  usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id:             ParticipantId,
    pub name:           String,
    pub class:          ParticipantClass,
    #[serde(default)]
    pub token_image:    Option<String>,
    #[serde(default)]
    pub portrait_image: Option<String>,
    /// Users allowed to control this participant.
    #[serde(default)]
    pub owners:         Vec<UserId>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, class: ParticipantClass) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            class,
            token_image: None,
            portrait_image: None,
            owners: Vec::new(),
        }
    }

    pub fn owned_by(mut self, user: impl Into<String>) -> Self {
        self.owners.push(user.into());
        self
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owners.iter().any(|o| o == user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encounter {
    pub id:           EncounterId,
    pub started:      bool,
    pub round:        u32,
    pub turn:         usize,
    pub participants: Vec<Participant>,
}

impl Encounter {
    pub fn new(id: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            id: id.into(),
            started: false,
            round: 0,
            turn: 0,
            participants,
        }
    }

    /// Mark started at round 1, turn 0.
    pub fn begin(&mut self) {
        self.started = true;
        self.round = 1;
        self.turn = 0;
    }

    pub fn end(&mut self) {
        self.started = false;
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn marker(&self) -> TurnMarker {
        TurnMarker { round: self.round, turn: self.turn }
    }

    pub fn active_participant(&self) -> Option<&Participant> {
        if !self.started {
            return None;
        }
        self.participants.get(self.turn)
    }

    /// Advance to the next participant, wrapping into the next round.
    pub fn next_turn(&mut self) -> Option<TurnMarker> {
        if !self.started || self.is_empty() {
            return None;
        }
        self.turn += 1;
        if self.turn >= self.participants.len() {
            self.turn = 0;
            self.round += 1;
        }
        Some(self.marker())
    }

    /// Step back one participant, wrapping into the previous round.
    /// Never goes back past the first turn of round 1.
    pub fn previous_turn(&mut self) -> Option<TurnMarker> {
        if !self.started || self.is_empty() {
            return None;
        }
        if self.turn == 0 {
            if self.round <= 1 {
                return Some(self.marker());
            }
            self.round -= 1;
            self.turn = self.participants.len() - 1;
        } else {
            self.turn -= 1;
        }
        Some(self.marker())
    }

    pub fn add_participant(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    /// Remove a participant, keeping the turn pointer on a valid entry.
    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.id == id)?;
        let removed = self.participants.remove(idx);
        if idx < self.turn {
            self.turn -= 1;
        }
        if self.turn >= self.participants.len() {
            self.turn = 0;
        }
        Some(removed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub id:       UserId,
    pub is_admin: bool,
}

/// Every user known to the session.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    users: HashMap<UserId, SessionUser>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user: SessionUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &str) -> Option<&SessionUser> {
        self.users.get(id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
