//! Policy settings.
//!
//! Every field is clamped into range on load rather than rejected: a bad value
//! typed into a settings screen must not stop the detection loop.

use anyhow::{anyhow, Result};
use chrono::{Datelike, Local, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

use crate::analysis::motion::sensitivity_to_threshold;
use crate::analysis::MotionThresholds;
use crate::{Scenario, Severity};

const MINUTES_PER_DAY: u32 = 24 * 60;
const MAX_COOLDOWN_SECS: i64 = 24 * 60 * 60;

// ----------------------------------------------------------------------------
// Cooldowns
// ----------------------------------------------------------------------------

/// Per-severity cooldown, seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownSettings {
    pub info_secs: i64,
    pub low_secs: i64,
    pub medium_secs: i64,
    pub high_secs: i64,
    pub critical_secs: i64,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            info_secs: 300,
            low_secs: 120,
            medium_secs: 60,
            high_secs: 30,
            critical_secs: 0,
        }
    }
}

impl CooldownSettings {
    pub fn secs_for(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Info => self.info_secs,
            Severity::Low => self.low_secs,
            Severity::Medium => self.medium_secs,
            Severity::High => self.high_secs,
            Severity::Critical => self.critical_secs,
        }
    }

    pub fn millis_for(&self, severity: Severity) -> u64 {
        self.secs_for(severity).clamp(0, MAX_COOLDOWN_SECS) as u64 * 1000
    }

    fn clamped(mut self) -> Self {
        for secs in [
            &mut self.info_secs,
            &mut self.low_secs,
            &mut self.medium_secs,
            &mut self.high_secs,
            &mut self.critical_secs,
        ] {
            *secs = (*secs).clamp(0, MAX_COOLDOWN_SECS);
        }
        self
    }
}

// ----------------------------------------------------------------------------
// Quiet hours
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuietMode {
    /// Record, never sound.
    #[default]
    Silent,
    /// Sound at `reduced_volume_percent`.
    Reduced,
    /// Only critical alerts sound.
    EmergencyOnly,
}

/// A local-time `[start, end)` window. `start > end` wraps past midnight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHours {
    pub enabled: bool,
    /// Minutes after local midnight.
    pub start_minute: u32,
    pub end_minute: u32,
    /// Bit 0 = Monday .. bit 6 = Sunday. A wrapping window belongs to the day it
    /// starts on.
    pub weekday_mask: u8,
    pub mode: QuietMode,
    pub reduced_volume_percent: u8,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_minute: 22 * 60,
            end_minute: 7 * 60,
            weekday_mask: 0x7f,
            mode: QuietMode::Silent,
            reduced_volume_percent: 30,
        }
    }
}

impl QuietHours {
    /// Parse `HH:MM-HH:MM` into an enabled window, keeping other fields.
    pub fn with_window(mut self, window: &str) -> Result<Self> {
        let (start, end) = window
            .split_once('-')
            .ok_or_else(|| anyhow!("quiet hours must look like HH:MM-HH:MM"))?;
        self.start_minute = parse_hhmm(start)?;
        self.end_minute = parse_hhmm(end)?;
        self.enabled = true;
        Ok(self)
    }

    pub fn clamped(mut self) -> Self {
        self.start_minute = self.start_minute.min(MINUTES_PER_DAY - 1);
        self.end_minute = self.end_minute.min(MINUTES_PER_DAY - 1);
        self.weekday_mask &= 0x7f;
        self.reduced_volume_percent = self.reduced_volume_percent.min(100);
        self
    }

    /// Quiet hours in effect at `now_ms`, evaluated in the device's local time.
    pub fn is_active(&self, now_ms: u64) -> bool {
        match Local.timestamp_millis_opt(now_ms as i64).single() {
            Some(local) => self.is_active_at(local.naive_local()),
            None => false,
        }
    }

    pub fn is_active_at(&self, local: NaiveDateTime) -> bool {
        if !self.enabled || self.start_minute == self.end_minute {
            return false;
        }
        let minute = local.hour() * 60 + local.minute();
        let today = local.weekday().num_days_from_monday();

        if self.start_minute < self.end_minute {
            minute >= self.start_minute && minute < self.end_minute && self.day_enabled(today)
        } else if minute >= self.start_minute {
            self.day_enabled(today)
        } else if minute < self.end_minute {
            // Early-morning tail of yesterday's window.
            self.day_enabled((today + 6) % 7)
        } else {
            false
        }
    }

    fn day_enabled(&self, days_from_monday: u32) -> bool {
        self.weekday_mask & (1 << days_from_monday) != 0
    }
}

fn parse_hhmm(value: &str) -> Result<u32> {
    let (h, m) = value
        .trim()
        .split_once(':')
        .ok_or_else(|| anyhow!("time '{}' must be HH:MM", value.trim()))?;
    let h: u32 = h.parse().map_err(|_| anyhow!("invalid hour in '{}'", value.trim()))?;
    let m: u32 = m.parse().map_err(|_| anyhow!("invalid minute in '{}'", value.trim()))?;
    if h > 23 || m > 59 {
        return Err(anyhow!("time '{}' out of range", value.trim()));
    }
    Ok(h * 60 + m)
}

// ----------------------------------------------------------------------------
// PolicySettings
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub scenario: Scenario,
    /// 1..=100, higher is more sensitive.
    pub motion_sensitivity: i32,
    /// Detector events below this confidence are ignored.
    pub detection_min_confidence: f32,
    pub cooldowns: CooldownSettings,
    pub quiet_hours: QuietHours,
    pub inactivity_enabled: bool,
    pub inactivity_alert_minutes: i64,
    pub inactivity_severity: Severity,
    pub emergency_escalation_delay_secs: i64,
    pub alert_on_motion: bool,
    pub alert_on_audio: bool,
    pub alert_on_detections: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self::for_scenario(Scenario::General)
    }
}

impl PolicySettings {
    pub fn for_scenario(scenario: Scenario) -> Self {
        let thresholds = MotionThresholds::for_scenario(scenario);
        Self {
            scenario,
            motion_sensitivity: thresholds.sensitivity,
            detection_min_confidence: 0.5,
            cooldowns: CooldownSettings::default(),
            quiet_hours: QuietHours::default(),
            inactivity_enabled: scenario == Scenario::Elderly,
            inactivity_alert_minutes: match scenario {
                Scenario::Elderly => 120,
                _ => 60,
            },
            inactivity_severity: Severity::Medium,
            emergency_escalation_delay_secs: 120,
            alert_on_motion: true,
            alert_on_audio: true,
            alert_on_detections: true,
        }
    }

    /// Clamp every field into range. Never fails.
    pub fn clamped(mut self) -> Self {
        self.motion_sensitivity = self.motion_sensitivity.clamp(1, 100);
        self.detection_min_confidence = if self.detection_min_confidence.is_finite() {
            self.detection_min_confidence.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.cooldowns = self.cooldowns.clamped();
        self.quiet_hours = self.quiet_hours.clamped();
        self.inactivity_alert_minutes = self.inactivity_alert_minutes.clamp(1, 24 * 60);
        self.emergency_escalation_delay_secs = self.emergency_escalation_delay_secs.clamp(0, 60 * 60);
        self
    }

    pub fn overall_motion_threshold(&self) -> f32 {
        sensitivity_to_threshold(self.motion_sensitivity)
    }

    /// Scenario thresholds with the user's sensitivity applied.
    pub fn motion_thresholds(&self) -> MotionThresholds {
        MotionThresholds::for_scenario(self.scenario).with_sensitivity(self.motion_sensitivity)
    }

    pub fn inactivity_threshold_ms(&self) -> u64 {
        self.inactivity_alert_minutes.clamp(1, 24 * 60) as u64 * 60_000
    }

    pub fn escalation_delay_ms(&self) -> u64 {
        self.emergency_escalation_delay_secs.clamp(0, 60 * 60) as u64 * 1000
    }
}
