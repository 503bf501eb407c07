//! Timer events: everything the engine tells the outside world.
//!
//! RULE: Collaborators (audio, HUD chrome, tooling) react to events.
//! They never inspect engine internals.

use crate::{
    config::SoundConfig,
    encounter::TurnMarker,
    policy::ParticipantClass,
    types::{EncounterId, Revision, Timestamp, UserId},
};
use serde::{Deserialize, Serialize};

/// Variants are appended over time; never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    // ── Turn lifecycle ─────────────────────────────
    TurnStarted {
        marker:         TurnMarker,
        participant_id: String,
        class:          ParticipantClass,
        paused:         bool,
    },
    Warning {
        marker:            TurnMarker,
        class:             ParticipantClass,
        remaining_seconds: u32,
    },
    Expired {
        marker: TurnMarker,
        class:  ParticipantClass,
    },
    EncounterEnded {
        encounter_id: EncounterId,
    },

    // ── Clock control ──────────────────────────────
    Paused {
        remaining_seconds: u32,
        by_system:         bool,
    },
    Resumed {
        remaining_seconds: u32,
    },
    Reset {
        marker: TurnMarker,
    },

    // ── Host bookkeeping ───────────────────────────
    RequestDropped {
        requester_id: UserId,
        reason:       String,
    },
    PersistFailed {
        revision: Revision,
        error:    String,
    },
}

impl TimerEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. }    => "turn_started",
            Self::Warning { .. }        => "warning",
            Self::Expired { .. }        => "expired",
            Self::EncounterEnded { .. } => "encounter_ended",
            Self::Paused { .. }         => "paused",
            Self::Resumed { .. }        => "resumed",
            Self::Reset { .. }          => "reset",
            Self::RequestDropped { .. } => "request_dropped",
            Self::PersistFailed { .. }  => "persist_failed",
        }
    }

    /// The sound to play for this event, if one is configured.
    pub fn audio_cue(&self, sounds: &SoundConfig) -> Option<AudioCue> {
        match self {
            Self::Warning { class, .. } => sounds.warning_for(*class).map(|src| AudioCue {
                src: src.to_string(),
                volume: 0.6,
            }),
            Self::Expired { class, .. } => sounds.timeout_for(*class).map(|src| AudioCue {
                src: src.to_string(),
                volume: 0.8,
            }),
            _ => None,
        }
    }
}

/// A one-shot sound request for the external audio collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioCue {
    pub src:    String,
    pub volume: f32,
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:           Option<i64>,
    pub encounter_id: EncounterId,
    pub revision:     Revision,
    pub event_type:   String,
    pub payload:      String, // JSON-serialized TimerEvent
    pub created_at:   Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_uses_per_class_timeout_sound() {
        let sounds = SoundConfig::default();
        let cue = TimerEvent::Expired {
            marker: TurnMarker::default(),
            class: ParticipantClass::Secondary,
        }
        .audio_cue(&sounds)
        .expect("default secondary timeout sound");
        assert_eq!(cue.src, "sounds/skip.wav");
        assert!((cue.volume - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn warning_without_sound_has_no_cue() {
        let sounds = SoundConfig::default();
        let event = TimerEvent::Warning {
            marker: TurnMarker::default(),
            class: ParticipantClass::Primary,
            remaining_seconds: 5,
        };
        assert!(event.audio_cue(&sounds).is_none());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = TimerEvent::Resumed { remaining_seconds: 12 };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "resumed");
        assert_eq!(event.type_name(), "resumed");
    }
}
