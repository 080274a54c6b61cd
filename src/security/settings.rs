use serde::{Deserialize, Serialize};

/// Warnings spoken when no custom message is configured.
pub const DEFAULT_WARNING_PHRASES: &[&str] = &[
    "Warning. You are being recorded.",
    "Intruder detected. The owner has been notified.",
    "Leave the premises immediately.",
];

/// How loudly a trigger announces itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    /// Looping siren plus spoken warnings on a cadence.
    #[default]
    Extreme,
    /// One warning chime.
    Normal,
    /// Frames are recorded; nothing is played.
    Silent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Persons tolerated in view before a trigger.
    pub allowed_persons: u32,
    pub arming_countdown_secs: u32,
    pub trigger_cooldown_ms: u64,
    pub alert_mode: AlertMode,
    /// 0..=100.
    pub siren_volume: u8,
    pub tts_enabled: bool,
    pub tts_phrases: Vec<String>,
    /// Replaces the phrase list when set.
    pub tts_custom_message: Option<String>,
    pub tts_repeat_interval_secs: u32,
    pub max_intrusion_frames: usize,
    pub intrusion_retention_hours: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            allowed_persons: 0,
            arming_countdown_secs: 30,
            trigger_cooldown_ms: 30_000,
            alert_mode: AlertMode::Extreme,
            siren_volume: 100,
            tts_enabled: true,
            tts_phrases: DEFAULT_WARNING_PHRASES.iter().map(|p| p.to_string()).collect(),
            tts_custom_message: None,
            tts_repeat_interval_secs: 10,
            max_intrusion_frames: 50,
            intrusion_retention_hours: 72,
        }
    }
}

impl SecuritySettings {
    pub fn clamped(mut self) -> Self {
        self.siren_volume = self.siren_volume.min(100);
        self.arming_countdown_secs = self.arming_countdown_secs.min(600);
        self.tts_repeat_interval_secs = self.tts_repeat_interval_secs.clamp(1, 300);
        self.max_intrusion_frames = self.max_intrusion_frames.clamp(1, 1_000);
        self.intrusion_retention_hours = self.intrusion_retention_hours.max(1);
        self.tts_phrases.retain(|p| !p.trim().is_empty());
        if self
            .tts_custom_message
            .as_deref()
            .is_some_and(|m| m.trim().is_empty())
        {
            self.tts_custom_message = None;
        }
        self
    }

    /// Phrases to cycle through while triggered.
    pub fn warning_phrases(&self) -> Vec<String> {
        if let Some(message) = &self.tts_custom_message {
            return vec![message.clone()];
        }
        if self.tts_phrases.is_empty() {
            return DEFAULT_WARNING_PHRASES.iter().map(|p| p.to_string()).collect();
        }
        self.tts_phrases.clone()
    }

    pub fn siren_volume_unit(&self) -> f32 {
        self.siren_volume.min(100) as f32 / 100.0
    }

    pub fn retention_ms(&self) -> u64 {
        self.intrusion_retention_hours as u64 * 3_600_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_message_replaces_presets() {
        let mut settings = SecuritySettings::default();
        assert_eq!(settings.warning_phrases().len(), DEFAULT_WARNING_PHRASES.len());
        settings.tts_custom_message = Some("Go away".to_string());
        assert_eq!(settings.warning_phrases(), vec!["Go away".to_string()]);
    }

    #[test]
    fn clamps_and_drops_blank_message() {
        let settings = SecuritySettings {
            siren_volume: 200,
            tts_repeat_interval_secs: 0,
            tts_custom_message: Some("  ".to_string()),
            tts_phrases: vec![String::new()],
            ..SecuritySettings::default()
        }
        .clamped();
        assert_eq!(settings.siren_volume, 100);
        assert_eq!(settings.tts_repeat_interval_secs, 1);
        assert!(settings.tts_custom_message.is_none());
        assert_eq!(settings.warning_phrases().len(), DEFAULT_WARNING_PHRASES.len());
    }
}
