//! Presenter contract: how the engine talks to whatever draws the HUD.
//!
//! RULE: The engine calls the presenter only when the displayed state
//! changes. Presenters may batch or animate but must not block.

use crate::{encounter::Participant, policy::ParticipantClass};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

pub const FALLBACK_IMAGE: &str = "icons/svg/mystery-man.svg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HudUpdate {
    pub remaining_seconds: u32,
    pub total_seconds:     u32,
    pub participant_name:  String,
    pub participant_image: Option<String>,
    pub paused:            bool,
    pub participant_class: ParticipantClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HudTone {
    Normal,
    Warn,
    Danger,
}

impl HudUpdate {
    /// Percentage of the turn already used, in [0, 100].
    pub fn elapsed_pct(&self) -> f64 {
        if self.total_seconds == 0 {
            return 0.0;
        }
        let total = f64::from(self.total_seconds);
        let used = total - f64::from(self.remaining_seconds);
        (used / total * 100.0).clamp(0.0, 100.0)
    }

    pub fn tone(&self) -> HudTone {
        let total = self.total_seconds;
        let warn_at = total.div_ceil(4).max(3);
        let danger_at = total.div_ceil(10).max(1);
        if self.remaining_seconds <= danger_at {
            HudTone::Danger
        } else if self.remaining_seconds <= warn_at {
            HudTone::Warn
        } else {
            HudTone::Normal
        }
    }
}

/// Which artwork represents the active participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PortraitMode {
    None,
    Portrait,
    #[default]
    Token,
}

impl PortraitMode {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none"     => Self::None,
            "portrait" => Self::Portrait,
            _          => Self::Token,
        }
    }
}

/// Pick the participant's image for the HUD.
pub fn participant_image(participant: &Participant, mode: PortraitMode) -> Option<String> {
    let pick = match mode {
        PortraitMode::None => return None,
        PortraitMode::Token => participant
            .token_image
            .as_ref()
            .or(participant.portrait_image.as_ref()),
        PortraitMode::Portrait => participant
            .portrait_image
            .as_ref()
            .or(participant.token_image.as_ref()),
    };
    Some(pick.cloned().unwrap_or_else(|| FALLBACK_IMAGE.to_string()))
}

pub trait Presenter: Send {
    fn update(&mut self, hud: &HudUpdate);
    fn hide(&mut self);
    fn show(&mut self);

    /// A GM-forced HUD style. Presentation-only; ignored by default.
    fn apply_style(&mut self, _file: Option<&str>) {}
}

/// Tracks what the presenter currently shows and forwards only changes.
pub struct HudDriver {
    presenter: Box<dyn Presenter>,
    visible:   bool,
    last:      Option<HudUpdate>,
}

impl HudDriver {
    pub fn new(presenter: Box<dyn Presenter>) -> Self {
        Self { presenter, visible: false, last: None }
    }

    pub fn render(&mut self, hud: HudUpdate) {
        if self.last.as_ref() != Some(&hud) {
            self.presenter.update(&hud);
            self.last = Some(hud);
        }
        if !self.visible {
            self.presenter.show();
            self.visible = true;
        }
    }

    pub fn hide(&mut self) {
        if self.visible {
            self.presenter.hide();
            self.visible = false;
        }
    }

    pub fn apply_style(&mut self, file: Option<&str>) {
        self.presenter.apply_style(file);
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn last(&self) -> Option<&HudUpdate> {
        self.last.as_ref()
    }
}

/// Writes HUD changes to the log.
#[derive(Debug, Clone, Default)]
pub struct LogPresenter {
    label: String,
}

impl LogPresenter {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl Presenter for LogPresenter {
    fn update(&mut self, hud: &HudUpdate) {
        log::debug!(
            "[{}] {} {}/{}s{} ({:?})",
            self.label,
            hud.participant_name,
            hud.remaining_seconds,
            hud.total_seconds,
            if hud.paused { " paused" } else { "" },
            hud.tone()
        );
    }

    fn hide(&mut self) {
        log::debug!("[{}] hud hidden", self.label);
    }

    fn show(&mut self) {
        log::debug!("[{}] hud shown", self.label);
    }

    fn apply_style(&mut self, file: Option<&str>) {
        log::info!("[{}] style forced: {}", self.label, file.unwrap_or("<own>"));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterCall {
    Update(HudUpdate),
    Hide,
    Show,
    Style(Option<String>),
}

/// Records every call. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    calls: Arc<Mutex<Vec<PresenterCall>>>,
    echo:  Option<LogPresenter>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records and also writes each call to the log under `label`.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self { calls: Arc::default(), echo: Some(LogPresenter::new(label)) }
    }

    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_update(&self) -> Option<HudUpdate> {
        self.calls().into_iter().rev().find_map(|c| match c {
            PresenterCall::Update(u) => Some(u),
            _ => None,
        })
    }

    fn push(&self, call: PresenterCall) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

impl Presenter for RecordingPresenter {
    fn update(&mut self, hud: &HudUpdate) {
        if let Some(echo) = self.echo.as_mut() {
            echo.update(hud);
        }
        self.push(PresenterCall::Update(hud.clone()));
    }

    fn hide(&mut self) {
        if let Some(echo) = self.echo.as_mut() {
            echo.hide();
        }
        self.push(PresenterCall::Hide);
    }

    fn show(&mut self) {
        if let Some(echo) = self.echo.as_mut() {
            echo.show();
        }
        self.push(PresenterCall::Show);
    }

    fn apply_style(&mut self, file: Option<&str>) {
        if let Some(echo) = self.echo.as_mut() {
            echo.apply_style(file);
        }
        self.push(PresenterCall::Style(file.map(str::to_string)));
    }
}
