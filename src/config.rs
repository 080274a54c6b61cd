use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::policy::{CooldownSettings, PolicySettings, QuietHours, QuietMode};
use crate::security::SecuritySettings;
use crate::sound::OrchestratorConfig;
use crate::{Scenario, Severity};

const DEFAULT_DB_PATH: &str = "monitor.db";
const DEFAULT_STREAM_ID: &str = "camera_1";
const DEFAULT_TICK_MS: u64 = 100;
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_FFT_SIZE: usize = 2048;

#[derive(Debug, Deserialize, Default)]
struct MonitordConfigFile {
    db_path: Option<String>,
    stream_id: Option<String>,
    scenario: Option<String>,
    tick_ms: Option<u64>,
    capture: Option<CaptureConfigFile>,
    policy: Option<PolicyConfigFile>,
    sound: Option<SoundConfigFile>,
    security: Option<SecuritySettings>,
    retention: Option<RetentionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    sample_rate: Option<u32>,
    fft_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct PolicyConfigFile {
    motion_sensitivity: Option<i32>,
    detection_min_confidence: Option<f32>,
    cooldowns: Option<CooldownSettings>,
    /// `HH:MM-HH:MM`, or `off`.
    quiet_hours: Option<String>,
    quiet_mode: Option<QuietMode>,
    inactivity_minutes: Option<i64>,
    inactivity_severity: Option<String>,
    escalation_delay_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct SoundConfigFile {
    max_concurrent: Option<usize>,
    user_volume: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MonitordConfig {
    pub db_path: String,
    pub stream_id: String,
    pub scenario: Scenario,
    pub tick: Duration,
    pub capture: CaptureSettings,
    /// Built from the scenario defaults plus overrides during `validate`.
    pub policy: PolicySettings,
    pub sound: OrchestratorConfig,
    /// Present when the file carries a `security` section or the scenario is security.
    pub security: Option<SecuritySettings>,
    pub retention: Duration,
    policy_overrides: PolicyConfigFile,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl MonitordConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MONITOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Re-derive scenario settings after a command-line override.
    pub fn with_scenario(mut self, scenario: Scenario) -> Result<Self> {
        self.scenario = scenario;
        self.validate()?;
        Ok(self)
    }

    fn from_file(file: MonitordConfigFile) -> Result<Self> {
        let scenario = match file.scenario.as_deref() {
            Some(value) => value.parse()?,
            None => Scenario::General,
        };
        let capture = CaptureSettings {
            width: file
                .capture
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .capture
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_HEIGHT),
            sample_rate: file
                .capture
                .as_ref()
                .and_then(|c| c.sample_rate)
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            fft_size: file
                .capture
                .as_ref()
                .and_then(|c| c.fft_size)
                .unwrap_or(DEFAULT_FFT_SIZE),
        };
        let defaults = OrchestratorConfig::default();
        let sound = OrchestratorConfig {
            max_concurrent: file
                .sound
                .as_ref()
                .and_then(|s| s.max_concurrent)
                .unwrap_or(defaults.max_concurrent),
            user_volume: file
                .sound
                .as_ref()
                .and_then(|s| s.user_volume)
                .unwrap_or(defaults.user_volume),
            ..defaults
        };
        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            stream_id: file
                .stream_id
                .unwrap_or_else(|| DEFAULT_STREAM_ID.to_string()),
            scenario,
            tick: Duration::from_millis(file.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            capture,
            policy: PolicySettings::for_scenario(scenario),
            sound,
            security: file.security,
            retention: Duration::from_secs(
                file.retention
                    .and_then(|r| r.seconds)
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
            policy_overrides: file.policy.unwrap_or_default(),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("MONITOR_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(stream_id) = std::env::var("MONITOR_STREAM_ID") {
            if !stream_id.trim().is_empty() {
                self.stream_id = stream_id.trim().to_string();
            }
        }
        if let Ok(scenario) = std::env::var("MONITOR_SCENARIO") {
            if !scenario.trim().is_empty() {
                self.scenario = scenario
                    .parse()
                    .map_err(|e| anyhow!("MONITOR_SCENARIO: {}", e))?;
            }
        }
        if let Ok(tick) = std::env::var("MONITOR_TICK_MS") {
            let ms: u64 = tick
                .trim()
                .parse()
                .map_err(|_| anyhow!("MONITOR_TICK_MS must be an integer number of milliseconds"))?;
            self.tick = Duration::from_millis(ms);
        }
        if let Ok(sensitivity) = std::env::var("MONITOR_MOTION_SENSITIVITY") {
            let value: i32 = sensitivity
                .trim()
                .parse()
                .map_err(|_| anyhow!("MONITOR_MOTION_SENSITIVITY must be an integer 1-100"))?;
            self.policy_overrides.motion_sensitivity = Some(value);
        }
        if let Ok(window) = std::env::var("MONITOR_QUIET_HOURS") {
            if !window.trim().is_empty() {
                self.policy_overrides.quiet_hours = Some(window.trim().to_string());
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        crate::validate_stream_id(&self.stream_id)?;
        if self.tick.is_zero() {
            return Err(anyhow!("tick interval must be greater than zero"));
        }
        if self.retention.as_secs() == 0 {
            return Err(anyhow!("retention must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        if !self.capture.fft_size.is_power_of_two() {
            return Err(anyhow!("capture fft_size must be a power of two"));
        }

        self.policy = build_policy(self.scenario, &self.policy_overrides)?;
        if self.security.is_none() && self.scenario == Scenario::Security {
            self.security = Some(SecuritySettings::default());
        }
        self.security = self.security.take().map(SecuritySettings::clamped);
        Ok(())
    }
}

fn build_policy(scenario: Scenario, overrides: &PolicyConfigFile) -> Result<PolicySettings> {
    let mut policy = PolicySettings::for_scenario(scenario);
    if let Some(sensitivity) = overrides.motion_sensitivity {
        policy.motion_sensitivity = sensitivity;
    }
    if let Some(confidence) = overrides.detection_min_confidence {
        policy.detection_min_confidence = confidence;
    }
    if let Some(cooldowns) = &overrides.cooldowns {
        policy.cooldowns = cooldowns.clone();
    }
    if let Some(window) = overrides.quiet_hours.as_deref() {
        policy.quiet_hours = if window.eq_ignore_ascii_case("off") {
            QuietHours::default()
        } else {
            QuietHours::default().with_window(window)?
        };
    }
    if let Some(mode) = overrides.quiet_mode {
        policy.quiet_hours.mode = mode;
    }
    if let Some(minutes) = overrides.inactivity_minutes {
        policy.inactivity_enabled = minutes > 0;
        policy.inactivity_alert_minutes = minutes;
    }
    if let Some(severity) = overrides.inactivity_severity.as_deref() {
        policy.inactivity_severity = severity.parse::<Severity>()?;
    }
    if let Some(delay) = overrides.escalation_delay_secs {
        policy.emergency_escalation_delay_secs = delay;
    }

    let clamped = policy.clone().clamped();
    if clamped != policy {
        log::warn!("policy settings out of range; clamped");
    }
    Ok(clamped)
}

fn read_config_file(path: &Path) -> Result<MonitordConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
