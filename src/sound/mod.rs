//! Sound orchestration.
//!
//! - `SoundKind`: built-in cues, ranked notification < alert < warning < alarm < emergency
//! - `CustomSound`: user-registered payloads bound to `SoundTrigger`s (owned by the store)
//! - `ActiveSound`: runtime playback record with explicit state transitions
//! - `SoundOrchestrator`: the single shared registry; bounded, priority-preemptive
//!
//! The orchestrator never decodes audio. Payloads go to an `AudioSink` as-is.

mod active;
mod orchestrator;

use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::policy::SoundDirective;
use crate::Severity;

pub use active::{ActiveSound, Fade, PlaybackState, SoundSource};
pub use orchestrator::{OrchestratorConfig, SharedOrchestrator, SoundOrchestrator};

/// Handle for one playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SoundId(pub u64);

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snd-{}", self.0)
    }
}

// -------------------- Built-in kinds --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundKind {
    Notification,
    Alert,
    Warning,
    Alarm,
    Emergency,
}

/// Playback defaults for a built-in kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoundProfile {
    pub rank: u8,
    pub default_volume: f32,
    /// Volume this kind never drops below.
    pub volume_floor: f32,
    pub looping: bool,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    /// Length of one pass, used to retire the sound when the sink never reports
    /// completion.
    pub pass_ms: u64,
}

impl SoundKind {
    pub const ALL: [SoundKind; 5] = [
        SoundKind::Notification,
        SoundKind::Alert,
        SoundKind::Warning,
        SoundKind::Alarm,
        SoundKind::Emergency,
    ];

    pub fn profile(&self) -> SoundProfile {
        match self {
            SoundKind::Notification => SoundProfile {
                rank: 1,
                default_volume: 0.5,
                volume_floor: 0.0,
                looping: false,
                fade_in_ms: 0,
                fade_out_ms: 200,
                pass_ms: 1_500,
            },
            SoundKind::Alert => SoundProfile {
                rank: 2,
                default_volume: 0.7,
                volume_floor: 0.1,
                looping: false,
                fade_in_ms: 100,
                fade_out_ms: 300,
                pass_ms: 2_500,
            },
            SoundKind::Warning => SoundProfile {
                rank: 3,
                default_volume: 0.8,
                volume_floor: 0.3,
                looping: false,
                fade_in_ms: 0,
                fade_out_ms: 300,
                pass_ms: 3_000,
            },
            SoundKind::Alarm => SoundProfile {
                rank: 4,
                default_volume: 1.0,
                volume_floor: 0.5,
                looping: true,
                fade_in_ms: 0,
                fade_out_ms: 500,
                pass_ms: 4_000,
            },
            SoundKind::Emergency => SoundProfile {
                rank: 5,
                default_volume: 1.0,
                volume_floor: 1.0,
                looping: true,
                fade_in_ms: 0,
                fade_out_ms: 0,
                pass_ms: 4_000,
            },
        }
    }

    /// Rank on the scale shared with custom priorities (1..=10).
    pub fn priority(&self) -> u8 {
        self.profile().rank * 2
    }

    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info | Severity::Low => SoundKind::Notification,
            Severity::Medium => SoundKind::Alert,
            Severity::High => SoundKind::Warning,
            Severity::Critical => SoundKind::Emergency,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SoundKind::Notification => "notification",
            SoundKind::Alert => "alert",
            SoundKind::Warning => "warning",
            SoundKind::Alarm => "alarm",
            SoundKind::Emergency => "emergency",
        }
    }
}

impl FromStr for SoundKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        SoundKind::ALL
            .into_iter()
            .find(|k| k.as_str() == value.trim().to_lowercase())
            .ok_or_else(|| anyhow!("unknown sound kind '{}'", value.trim()))
    }
}

pub fn severity_multiplier(severity: Severity) -> f32 {
    match severity {
        Severity::Info => 0.5,
        Severity::Low => 0.7,
        Severity::Medium => 0.85,
        Severity::High | Severity::Critical => 1.0,
    }
}

// -------------------- Triggers & custom sounds --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundTrigger {
    PersonDetected,
    PetDetected,
    ObjectFound,
    MotionDetected,
    AudioDetected,
    InactivityAlert,
    Emergency,
    Custom,
}

impl SoundTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundTrigger::PersonDetected => "person_detected",
            SoundTrigger::PetDetected => "pet_detected",
            SoundTrigger::ObjectFound => "object_found",
            SoundTrigger::MotionDetected => "motion_detected",
            SoundTrigger::AudioDetected => "audio_detected",
            SoundTrigger::InactivityAlert => "inactivity_alert",
            SoundTrigger::Emergency => "emergency",
            SoundTrigger::Custom => "custom",
        }
    }
}

/// A user-registered sound. The store owns the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomSound {
    pub id: String,
    pub name: String,
    /// Opaque encoded audio.
    #[serde(skip)]
    pub payload: Vec<u8>,
    /// 0..=100.
    pub volume: u8,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub repeat_count: u32,
    pub repeat_delay_ms: u64,
    pub triggers: BTreeSet<SoundTrigger>,
    /// Length of one pass when known; the orchestrator default applies otherwise.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// 1..=10.
    pub priority: u8,
    pub enabled: bool,
    pub play_count: u64,
    pub last_played_at_ms: Option<u64>,
}

impl CustomSound {
    pub fn new(name: &str, payload: Vec<u8>, triggers: &[SoundTrigger]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            volume: 80,
            looping: false,
            repeat_count: 0,
            repeat_delay_ms: 0,
            triggers: triggers.iter().copied().collect(),
            duration_ms: None,
            priority: 5,
            enabled: true,
            play_count: 0,
            last_played_at_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self.clamped()
    }

    pub fn clamped(mut self) -> Self {
        self.volume = self.volume.min(100);
        self.priority = self.priority.clamp(1, 10);
        self
    }

    pub fn plays_on(&self, trigger: SoundTrigger) -> bool {
        self.triggers.contains(&trigger)
    }

    /// Sounds bound to `emergency` are never muted.
    pub fn mute_exempt(&self) -> bool {
        self.plays_on(SoundTrigger::Emergency)
    }
}

// -------------------- Sink & options --------------------

/// What the sink should render.
#[derive(Clone, Copy, Debug)]
pub enum SoundPayload<'a> {
    BuiltIn(SoundKind),
    Custom { sound_id: &'a str, bytes: &'a [u8] },
}

/// Speaker output. Completion is reported back through
/// `SoundOrchestrator::on_playback_complete`; sounds from sinks that never report
/// it are retired by `SoundOrchestrator::tick` once their pass length elapses.
pub trait AudioSink: Send {
    fn start(&mut self, id: SoundId, payload: SoundPayload<'_>, volume: f32, looping: bool)
        -> Result<()>;

    fn set_volume(&mut self, id: SoundId, volume: f32) -> Result<()>;

    fn stop(&mut self, id: SoundId) -> Result<()>;
}

/// Sink that renders nothing.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn start(&mut self, _: SoundId, _: SoundPayload<'_>, _: f32, _: bool) -> Result<()> {
        Ok(())
    }

    fn set_volume(&mut self, _: SoundId, _: f32) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, _: SoundId) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayOptions {
    /// Overrides the sound's own volume (0..=1).
    pub volume: Option<f32>,
    pub looping: Option<bool>,
    pub repeat_count: u32,
    pub repeat_delay_ms: u64,
    pub fade_in_ms: Option<u64>,
    pub severity: Option<Severity>,
    /// Quiet-hours attenuation, 0..=1.
    pub volume_factor: f32,
    pub bypass_mute: bool,
    /// Play at `volume` as given, skipping master volume, severity and floor.
    pub fixed_volume: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            volume: None,
            looping: None,
            repeat_count: 0,
            repeat_delay_ms: 0,
            fade_in_ms: None,
            severity: None,
            volume_factor: 1.0,
            bypass_mute: false,
            fixed_volume: false,
        }
    }
}

impl PlayOptions {
    pub fn for_directive(directive: &SoundDirective, severity: Severity) -> Self {
        Self {
            severity: Some(severity),
            volume_factor: directive.volume_factor,
            bypass_mute: directive.bypass_mute,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ranks_are_ordered() {
        let ranks: Vec<u8> = SoundKind::ALL.iter().map(|k| k.profile().rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        assert_eq!(SoundKind::Alarm.priority(), 8);
        assert!(SoundKind::Notification < SoundKind::Emergency);
    }

    #[test]
    fn severity_selects_kind() {
        assert_eq!(SoundKind::for_severity(Severity::Low), SoundKind::Notification);
        assert_eq!(SoundKind::for_severity(Severity::Critical), SoundKind::Emergency);
    }

    #[test]
    fn custom_sound_clamps_priority_and_volume() {
        let mut sound = CustomSound::new("bell", vec![1, 2, 3], &[SoundTrigger::PetDetected]);
        sound.volume = 250;
        let sound = sound.with_priority(0);
        assert_eq!(sound.priority, 1);
        assert_eq!(sound.volume, 100);
        assert!(!sound.mute_exempt());
    }

    #[test]
    fn sound_kind_parses() -> Result<()> {
        assert_eq!("Alarm".parse::<SoundKind>()?, SoundKind::Alarm);
        assert!("kazoo".parse::<SoundKind>().is_err());
        Ok(())
    }
}
