//! Monitor Kernel
//!
//! This crate implements the detection-to-alert pipeline of an on-device monitor
//! (pet, baby, elderly and security scenarios).
//!
//! # Architecture
//!
//! Data flows strictly upward, leaves first:
//!
//! 1. **Capture** (`ingest`): frames and audio spectra from an external source.
//! 2. **Analysis** (`analysis`): motion scores, audio levels, frequency bands, cry patterns.
//! 3. **Detection** (`detect`): the ML inference boundary (person/animal presence).
//! 4. **Policy** (`policy`): severity, cooldown, quiet hours, inactivity, escalation.
//! 5. **Sound** (`sound`): priority-preemptive playback of built-in and custom cues.
//! 6. **Security** (`security`): arm/disarm/trigger lifecycle on person counts.
//!
//! `monitor` wires one stream through all of the above, one tick at a time.
//!
//! # Module Structure
//!
//! - `frame`: Ephemeral raw media (Frame, AudioSample)
//! - `storage`: Persistent store boundary (settings, custom sounds, history)
//! - Core types: Severity, Scenario, PolicyViolation

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod analysis;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod policy;
pub mod security;
pub mod sound;
pub mod storage;

pub use analysis::{
    AudioAnalyzer, AudioReading, CryAnalysis, CryDetector, CryPattern, FrequencyBands,
    MotionAnalyzer, MotionReading, MotionRegion, MotionThresholds, SignalSmoother,
};
pub use detect::{
    BackendHealth, BackendRegistry, DetectedObject, DetectionEvent, DetectorBackend, StubBackend,
};
pub use frame::{AudioSample, Frame, PixelFormat};
pub use ingest::{CaptureSource, SyntheticConfig, SyntheticSource};
pub use monitor::{MonitorRunner, MonitorSession, TickInput, TickOutcome};
pub use policy::{
    Alert, AlertDecision, AlertEngine, AlertHistory, AlertKind, AlertSink, PolicySettings,
    QuietHours, QuietMode, SoundDirective,
};
pub use security::{
    AlertMode, ArmingState, IntrusionFrame, SecuritySettings, SecurityStateMachine, SpeechSink,
};
pub use sound::{
    AudioSink, CustomSound, PlayOptions, SharedOrchestrator, SoundId, SoundKind,
    SoundOrchestrator, SoundSource, SoundTrigger,
};
pub use storage::{InMemoryMonitorStore, MonitorStore, SharedStore, SqliteMonitorStore};

/// Wall-clock milliseconds since the Unix epoch.
///
/// Every time-dependent operation in the kernel takes `now_ms` explicitly; this is
/// only the default source used by binaries and the runner.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// -------------------- Severity --------------------

/// Ordinal alert importance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// One level up, saturating at `Critical`.
    pub fn raised(self) -> Self {
        match self {
            Severity::Info => Severity::Low,
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(anyhow!("unknown severity '{other}'")),
        }
    }
}

// -------------------- Scenario --------------------

/// Monitoring scenario. Selects threshold tables and severity mapping.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Pet,
    Baby,
    Elderly,
    Security,
    #[default]
    General,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Pet => "pet",
            Scenario::Baby => "baby",
            Scenario::Elderly => "elderly",
            Scenario::Security => "security",
            Scenario::General => "general",
        }
    }
}

impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "pet" => Ok(Scenario::Pet),
            "baby" => Ok(Scenario::Baby),
            "elderly" => Ok(Scenario::Elderly),
            "security" => Ok(Scenario::Security),
            "general" | "default" => Ok(Scenario::General),
            other => Err(anyhow!("unknown scenario '{other}'")),
        }
    }
}

// -------------------- Stream ID Discipline --------------------

/// Stream ids are local identifiers: `[a-z0-9_-]{1,64}`.
pub fn validate_stream_id(stream_id: &str) -> Result<()> {
    static STREAM_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = match STREAM_ID_RE.get() {
        Some(re) => re,
        None => {
            let compiled = regex::Regex::new(r"^[a-z0-9_-]{1,64}$")?;
            STREAM_ID_RE.get_or_init(|| compiled)
        }
    };

    if !re.is_match(stream_id) {
        return Err(anyhow!("stream_id must match ^[a-z0-9_-]{{1,64}}$"));
    }
    Ok(())
}

// -------------------- Policy Violations --------------------

/// Synchronous rejection of an operation the current state forbids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyViolation {
    pub code: &'static str,
    pub message: String,
}

impl PolicyViolation {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
impl std::error::Error for PolicyViolation {}
