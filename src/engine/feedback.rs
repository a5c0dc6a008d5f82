//! Mapping from device state to LED and speaker commands.

use super::escalation::{AlertPhase, Cause};
use super::evaluator::PlantCondition;
use crate::supervisor::PowerMode;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Green,
    Yellow,
    Red,
    /// Safe mode / sensor error.
    Magenta,
    /// Battery emergency.
    Orange,
}

impl Color {
    pub fn rgb(self) -> u32 {
        match self {
            Color::Green => 0x00FF00,
            Color::Yellow => 0xFFFF00,
            Color::Red => 0xFF0000,
            Color::Magenta => 0xFF00FF,
            Color::Orange => 0xFFA500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Animation {
    Solid,
    Blink,
    FastBlink,
    ErrorFlash,
    Fade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    // Ordered by priority, lowest first.
    Reject,
    Happy,
    Warning,
    WaterNeeded,
    LightNeeded,
    Error,
    LowBattery,
}

impl Sound {
    pub fn frequency_hz(self) -> u16 {
        match self {
            Sound::Happy => 800,
            Sound::WaterNeeded => 400,
            Sound::LightNeeded => 600,
            Sound::Error => 200,
            Sound::Reject => 250,
            Sound::LowBattery => 300,
            Sound::Warning => 1000,
        }
    }

    fn allowed_in(self, mode: PowerMode) -> bool {
        match mode {
            PowerMode::Normal => true,
            PowerMode::PowerSave => !matches!(self, Sound::Happy | Sound::Reject),
            PowerMode::Emergency => self == Sound::LowBattery,
        }
    }
}

/// A write to the LED ring and speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedbackCommand {
    pub color: Color,
    pub animation: Animation,
    pub brightness: u8,
    pub sound: Option<Sound>,
}

/// One-shot feedback requests that are not implied by the rendered state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Notify(Cause),
    Solved,
    SensorDegraded,
    LowBattery,
    ConfigRejected,
}

impl Cue {
    fn sound(self) -> Sound {
        match self {
            Cue::Notify(Cause::NeedsWater) => Sound::WaterNeeded,
            Cue::Notify(Cause::NeedsLight) => Sound::LightNeeded,
            Cue::Notify(Cause::Critical) => Sound::Error,
            Cue::Solved => Sound::Happy,
            Cue::SensorDegraded => Sound::Warning,
            Cue::LowBattery => Sound::LowBattery,
            Cue::ConfigRejected => Sound::Reject,
        }
    }
}

fn brightness(mode: PowerMode) -> u8 {
    match mode {
        PowerMode::Normal => 255,
        PowerMode::PowerSave => 128,
        PowerMode::Emergency => 16,
    }
}

/// Total lookup from state to command. The sound is the one played when the
/// device transitions into this state.
pub fn render(condition: PlantCondition, phase: AlertPhase, mode: PowerMode) -> FeedbackCommand {
    let brightness = brightness(mode);

    if mode == PowerMode::Emergency {
        return FeedbackCommand {
            color: Color::Orange,
            animation: Animation::Fade,
            brightness,
            sound: Some(Sound::LowBattery),
        };
    }

    let active = phase == AlertPhase::Active;
    let (color, animation, sound) = match condition {
        PlantCondition::Healthy => (Color::Green, Animation::Solid, None),
        PlantCondition::NeedsWater => (
            Color::Yellow,
            if active { Animation::FastBlink } else { Animation::Blink },
            active.then_some(Sound::WaterNeeded),
        ),
        PlantCondition::NeedsLight => (
            Color::Red,
            if active { Animation::FastBlink } else { Animation::Blink },
            active.then_some(Sound::LightNeeded),
        ),
        PlantCondition::Critical => (
            Color::Magenta,
            Animation::ErrorFlash,
            (phase != AlertPhase::Acknowledged).then_some(Sound::Error),
        ),
    };

    FeedbackCommand {
        color,
        animation,
        brightness,
        sound: sound.filter(|s| s.allowed_in(mode)),
    }
}

/// Owns the feedback hardware state. Remembers the last rendered command
/// so unchanged state is not rewritten and its sound is not replayed.
#[derive(Debug, Default)]
pub struct FeedbackEmitter {
    last: Option<FeedbackCommand>,
}

impl FeedbackEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the command to write, or `None` when nothing changed and no
    /// cue asked for a sound.
    pub fn update(
        &mut self,
        condition: PlantCondition,
        phase: AlertPhase,
        mode: PowerMode,
        cues: &[Cue],
    ) -> Option<FeedbackCommand> {
        let rendered = render(condition, phase, mode);
        let transition = self.last != Some(rendered);

        let cue_sound = cues
            .iter()
            .map(|c| c.sound())
            .filter(|s| s.allowed_in(mode))
            .max();
        let edge_sound = if transition { rendered.sound } else { None };
        let sound = edge_sound.max(cue_sound);

        if !transition && sound.is_none() {
            return None;
        }

        self.last = Some(rendered);
        Some(FeedbackCommand { sound, ..rendered })
    }
}

/// Feedback hardware.
pub trait FeedbackSink: Send {
    fn write(&mut self, command: &FeedbackCommand);
}

/// Logs commands instead of driving hardware.
#[derive(Debug, Default)]
pub struct LogSink;

impl FeedbackSink for LogSink {
    fn write(&mut self, command: &FeedbackCommand) {
        tracing::info!(
            "Feedback: color=#{:06X} animation={:?} brightness={} sound={:?}",
            command.color.rgb(),
            command.animation,
            command.brightness,
            command.sound.map(|s| (s, s.frequency_hz()))
        );
    }
}
