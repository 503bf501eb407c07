use crate::{
    policy::{ParticipantClass, TimerMode},
    presenter::PortraitMode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audio cue paths per participant class. Playback is external.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SoundConfig {
    pub primary_warning:   Option<String>,
    pub secondary_warning: Option<String>,
    pub primary_timeout:   Option<String>,
    pub secondary_timeout: Option<String>,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            primary_warning:   None,
            secondary_warning: None,
            primary_timeout:   Some("sounds/clock.wav".into()),
            secondary_timeout: Some("sounds/skip.wav".into()),
        }
    }
}

impl SoundConfig {
    pub fn warning_for(&self, class: ParticipantClass) -> Option<&str> {
        match class {
            ParticipantClass::Primary   => self.primary_warning.as_deref(),
            ParticipantClass::Secondary => self.secondary_warning.as_deref(),
        }
    }

    pub fn timeout_for(&self, class: ParticipantClass) -> Option<&str> {
        match class {
            ParticipantClass::Primary   => self.primary_timeout.as_deref(),
            ParticipantClass::Secondary => self.secondary_timeout.as_deref(),
        }
    }
}

/// Policy inputs and engine cadences.
///
/// Supplied by the host application; the engine never validates these
/// beyond numeric coercion with fallback defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    pub primary_seconds:         u32,
    pub secondary_seconds:       u32,
    pub primary_mode:            TimerMode,
    pub secondary_mode:          TimerMode,
    pub primary_pool_seconds:    u32,
    pub secondary_pool_seconds:  u32,
    /// Percentage of the turn total at which the warning fires.
    pub warning_threshold_pct:   u32,
    /// New encounters begin with the first turn paused.
    pub start_combat_paused:     bool,
    pub portrait_mode:           PortraitMode,
    /// Refill shared pools whenever a new round begins.
    pub refill_pools_each_round: bool,
    pub tick_interval_ms:        u64,
    pub write_throttle_ms:       u64,
    /// How long a replica waits for a host snapshot before going provisional.
    pub snapshot_wait_ms:        u64,
    pub sounds:                  SoundConfig,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            primary_seconds:         30,
            secondary_seconds:       15,
            primary_mode:            TimerMode::Normal,
            secondary_mode:          TimerMode::Normal,
            primary_pool_seconds:    60,
            secondary_pool_seconds:  60,
            warning_threshold_pct:   20,
            start_combat_paused:     true,
            portrait_mode:           PortraitMode::Token,
            refill_pools_each_round: false,
            tick_interval_ms:        200,
            write_throttle_ms:       800,
            snapshot_wait_ms:        1_000,
            sounds:                  SoundConfig::default(),
        }
    }
}

impl TimerConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let raw: Value = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(Self::from_settings(&raw))
    }

    /// Build from loosely typed host settings.
    ///
    /// Numbers may arrive as strings; zero, negative and non-numeric
    /// values fall back to the default for that key.
    pub fn from_settings(raw: &Value) -> Self {
        let d = Self::default();
        let get = |key: &str| raw.get(key);

        let sounds = match get("sounds") {
            Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
            None => d.sounds.clone(),
        };

        Self {
            primary_seconds:        coerce_u32(get("primary_seconds"), d.primary_seconds),
            secondary_seconds:      coerce_u32(get("secondary_seconds"), d.secondary_seconds),
            primary_mode:           coerce_mode(get("primary_mode"), d.primary_mode),
            secondary_mode:         coerce_mode(get("secondary_mode"), d.secondary_mode),
            primary_pool_seconds:   coerce_u32(get("primary_pool_seconds"), d.primary_pool_seconds),
            secondary_pool_seconds: coerce_u32(
                get("secondary_pool_seconds"),
                d.secondary_pool_seconds,
            ),
            warning_threshold_pct:  coerce_u32(get("warning_threshold_pct"), d.warning_threshold_pct),
            start_combat_paused:    coerce_bool(get("start_combat_paused"), d.start_combat_paused),
            portrait_mode:          get("portrait_mode")
                .and_then(Value::as_str)
                .map(PortraitMode::parse_lenient)
                .unwrap_or(d.portrait_mode),
            refill_pools_each_round: coerce_bool(
                get("refill_pools_each_round"),
                d.refill_pools_each_round,
            ),
            tick_interval_ms:       u64::from(coerce_u32(get("tick_interval_ms"), 200)),
            write_throttle_ms:      u64::from(coerce_u32(get("write_throttle_ms"), 800)),
            snapshot_wait_ms:       u64::from(coerce_u32(get("snapshot_wait_ms"), 1_000)),
            sounds,
        }
    }

    pub fn pool_total_ms(&self, class: ParticipantClass) -> u64 {
        let secs = match class {
            ParticipantClass::Primary   => self.primary_pool_seconds,
            ParticipantClass::Secondary => self.secondary_pool_seconds,
        };
        u64::from(secs) * 1000
    }
}

fn coerce_u32(value: Option<&Value>, fallback: u32) -> u32 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && n >= 1.0 && n <= f64::from(u32::MAX) => n.round() as u32,
        _ => fallback,
    }
}

fn coerce_bool(value: Option<&Value>, fallback: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim() {
            "true" => true,
            "false" => false,
            _ => fallback,
        },
        _ => fallback,
    }
}

fn coerce_mode(value: Option<&Value>, fallback: TimerMode) -> TimerMode {
    value
        .and_then(Value::as_str)
        .map(TimerMode::parse_lenient)
        .unwrap_or(fallback)
}
