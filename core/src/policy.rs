//! Turn duration policy: how long a participant's turn lasts.
//!
//! RULE: The policy is a pure function of configuration.
//! It knows per-turn seconds and modes; pool balances live in ClockState
//! and are managed only by the host engine.

use crate::{
    clock::{ceil_seconds, ClockState},
    config::TimerConfig,
};
use serde::{Deserialize, Serialize};

/// The two participant classes the timer distinguishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantClass {
    /// Player-controlled participant.
    Primary,
    /// Non-player participant.
    Secondary,
}

impl ParticipantClass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary   => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// How the timer behaves for one participant class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// No timer is shown and nothing expires.
    Disabled,
    /// Independent per-turn countdown.
    #[default]
    Normal,
    /// The class draws from one pool that drains across all of its turns.
    Shared,
}

impl TimerMode {
    /// Parse a settings string; anything unrecognised is `Normal`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" => Self::Disabled,
            "shared"   => Self::Shared,
            _          => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnDurationPolicy {
    primary_seconds:       u32,
    secondary_seconds:     u32,
    primary_mode:          TimerMode,
    secondary_mode:        TimerMode,
    warning_threshold_pct: u32,
}

impl TurnDurationPolicy {
    pub fn new(
        primary_seconds: u32,
        secondary_seconds: u32,
        primary_mode: TimerMode,
        secondary_mode: TimerMode,
        warning_threshold_pct: u32,
    ) -> Self {
        Self {
            primary_seconds,
            secondary_seconds,
            primary_mode,
            secondary_mode,
            warning_threshold_pct,
        }
    }

    pub fn from_config(config: &TimerConfig) -> Self {
        Self::new(
            config.primary_seconds,
            config.secondary_seconds,
            config.primary_mode,
            config.secondary_mode,
            config.warning_threshold_pct,
        )
    }

    pub fn mode_for(&self, class: ParticipantClass) -> TimerMode {
        match class {
            ParticipantClass::Primary   => self.primary_mode,
            ParticipantClass::Secondary => self.secondary_mode,
        }
    }

    pub fn is_shared(&self, class: ParticipantClass) -> bool {
        self.mode_for(class) == TimerMode::Shared
    }

    /// Seconds allotted to one `normal` turn of this class (at least 1).
    pub fn per_turn_seconds(&self, class: ParticipantClass) -> u32 {
        let secs = match class {
            ParticipantClass::Primary   => self.primary_seconds,
            ParticipantClass::Secondary => self.secondary_seconds,
        };
        secs.max(1)
    }

    /// Seconds the HUD treats as the whole turn: the pool size for
    /// `shared`, the per-turn allotment otherwise.
    pub fn display_total(&self, class: ParticipantClass, state: &ClockState) -> u32 {
        match (self.mode_for(class), state.pool_total_ms(class)) {
            (TimerMode::Shared, total_ms) if total_ms > 0 => ceil_seconds(total_ms).max(1),
            _ => self.per_turn_seconds(class),
        }
    }

    /// Remaining seconds at or below which the one-shot warning fires.
    pub fn warning_at(&self, total_seconds: u32) -> u32 {
        let pct = u64::from(self.warning_threshold_pct);
        let scaled = (u64::from(total_seconds) * pct).div_ceil(100);
        u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
    }
}
