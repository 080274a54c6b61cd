//! Alert policy engine.
//!
//! Turns one tick's analyzer readings and detector events into alert decisions:
//! - severity from the event kind and scenario
//! - per-severity cooldown
//! - quiet hours (sound only; alerts are always recorded)
//! - inactivity and emergency escalation
//!
//! The engine never plays anything. Each decision carries a `SoundDirective` the
//! caller hands to the sound orchestrator.

mod history;
mod settings;
mod timers;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::analysis::{AudioReading, AudioThresholds, CryPattern, MotionReading, SoundCategory};
use crate::detect::{DetectionEvent, DetectionKind};
use crate::sound::SoundTrigger;
use crate::{Scenario, Severity};

pub use history::{AlertHistory, ALERT_HISTORY_CAP};
pub use settings::{CooldownSettings, PolicySettings, QuietHours, QuietMode};
pub use timers::{CooldownTracker, EscalationTracker, InactivityMonitor};

// -------------------- Alert --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Motion,
    SuddenMotion,
    Sound,
    SuddenSound,
    Crying,
    Distress,
    Person,
    Animal,
    Inactivity,
    Emergency,
    Escalation,
    Intrusion,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Motion => "motion",
            AlertKind::SuddenMotion => "sudden_motion",
            AlertKind::Sound => "sound",
            AlertKind::SuddenSound => "sudden_sound",
            AlertKind::Crying => "crying",
            AlertKind::Distress => "distress",
            AlertKind::Person => "person",
            AlertKind::Animal => "animal",
            AlertKind::Inactivity => "inactivity",
            AlertKind::Emergency => "emergency",
            AlertKind::Escalation => "escalation",
            AlertKind::Intrusion => "intrusion",
        }
    }

    /// Custom-sound trigger this kind of alert fires.
    pub fn trigger(&self) -> SoundTrigger {
        match self {
            AlertKind::Motion | AlertKind::SuddenMotion => SoundTrigger::MotionDetected,
            AlertKind::Sound | AlertKind::SuddenSound | AlertKind::Crying | AlertKind::Distress => {
                SoundTrigger::AudioDetected
            }
            AlertKind::Person | AlertKind::Intrusion => SoundTrigger::PersonDetected,
            AlertKind::Animal => SoundTrigger::PetDetected,
            AlertKind::Inactivity => SoundTrigger::InactivityAlert,
            AlertKind::Emergency | AlertKind::Escalation => SoundTrigger::Emergency,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub stream_id: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub created_at_ms: u64,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        stream_id: &str,
        kind: AlertKind,
        severity: Severity,
        message: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            kind,
            severity,
            message: message.into(),
            created_at_ms,
            acknowledged: false,
        }
    }
}

/// How the orchestrator should voice a decision.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoundDirective {
    pub play: bool,
    /// Multiplier on the user volume, 0..=1.
    pub volume_factor: f32,
    pub bypass_mute: bool,
}

impl SoundDirective {
    pub fn normal(bypass_mute: bool) -> Self {
        Self {
            play: true,
            volume_factor: 1.0,
            bypass_mute,
        }
    }

    pub fn silent() -> Self {
        Self {
            play: false,
            volume_factor: 0.0,
            bypass_mute: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertDecision {
    pub alert: Alert,
    pub trigger: SoundTrigger,
    pub sound: SoundDirective,
}

/// Notification surface. Presentation belongs to the implementor.
pub trait AlertSink: Send {
    fn publish(&mut self, alert: &Alert) -> Result<()>;
}

/// One tick's inputs, analysis already complete.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyInput<'a> {
    pub motion: Option<&'a MotionReading>,
    pub audio: Option<&'a AudioReading>,
    pub detections: &'a [DetectionEvent],
}

// -------------------- Engine --------------------

struct Candidate {
    kind: AlertKind,
    severity: Severity,
    message: String,
}

pub struct AlertEngine {
    stream_id: String,
    settings: PolicySettings,
    audio_thresholds: AudioThresholds,
    cooldowns: CooldownTracker,
    inactivity: InactivityMonitor,
    escalation: EscalationTracker,
    history: AlertHistory,
}

impl AlertEngine {
    pub fn new(stream_id: &str, settings: PolicySettings, now_ms: u64) -> Self {
        let settings = settings.clamped();
        Self {
            stream_id: stream_id.to_string(),
            audio_thresholds: AudioThresholds::for_scenario(settings.scenario),
            settings,
            cooldowns: CooldownTracker::new(),
            inactivity: InactivityMonitor::new(now_ms),
            escalation: EscalationTracker::new(),
            history: AlertHistory::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Replace settings. Out-of-range values are clamped, not rejected.
    pub fn update_settings(&mut self, settings: PolicySettings) {
        let clamped = settings.clone().clamped();
        if clamped != settings {
            log::warn!("policy settings for {} clamped into range", self.stream_id);
        }
        self.audio_thresholds = AudioThresholds::for_scenario(clamped.scenario);
        self.settings = clamped;
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn emergency_active(&self) -> bool {
        self.escalation.emergency_active()
    }

    /// Evaluate one tick. Decisions come out highest severity first.
    pub fn evaluate(&mut self, input: &PolicyInput<'_>, now_ms: u64) -> Vec<AlertDecision> {
        let mut candidates = Vec::new();
        let mut activity = false;

        if let Some(motion) = input.motion {
            activity |= self.motion_candidates(motion, &mut candidates);
        }
        if let Some(audio) = input.audio {
            activity |= self.audio_candidates(audio, &mut candidates);
        }
        activity |= self.detection_candidates(input.detections, &mut candidates);

        if activity {
            self.inactivity.record_activity(now_ms);
        } else if self.settings.inactivity_enabled
            && self
                .inactivity
                .check(now_ms, self.settings.inactivity_threshold_ms())
        {
            candidates.push(Candidate {
                kind: AlertKind::Inactivity,
                severity: self.settings.inactivity_severity,
                message: format!(
                    "No activity for {} minutes",
                    self.inactivity.idle_ms(now_ms) / 60_000
                ),
            });
        }

        candidates.sort_by(|a, b| b.severity.cmp(&a.severity));
        let mut decisions: Vec<AlertDecision> = candidates
            .into_iter()
            .filter_map(|c| self.fire(c.kind, c.severity, c.message, now_ms))
            .collect();

        if self
            .escalation
            .due(now_ms, self.settings.escalation_delay_ms())
        {
            log::warn!("{}: unresolved condition escalated to emergency", self.stream_id);
            if let Some(decision) = self.fire(
                AlertKind::Escalation,
                Severity::Critical,
                "Unresolved alert escalated to emergency".to_string(),
                now_ms,
            ) {
                decisions.insert(0, decision);
            }
        }
        decisions
    }

    /// Explicit emergency (panic button, fall detected upstream).
    pub fn trigger_emergency(&mut self, message: &str, now_ms: u64) -> Option<AlertDecision> {
        self.fire(AlertKind::Emergency, Severity::Critical, message.to_string(), now_ms)
    }

    /// Record an alert raised elsewhere (security triggers) under the same gates.
    pub fn raise(
        &mut self,
        kind: AlertKind,
        severity: Severity,
        message: &str,
        now_ms: u64,
    ) -> Option<AlertDecision> {
        self.fire(kind, severity, message.to_string(), now_ms)
    }

    /// Acknowledging a high or critical alert resolves a pending escalation.
    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        match self.history.acknowledge(alert_id) {
            Some(alert) => {
                if alert.severity >= Severity::High {
                    self.escalation.resolve();
                }
                true
            }
            None => false,
        }
    }

    pub fn resolve_emergency(&mut self) {
        self.escalation.resolve();
    }

    /// Drop timers and gates for a new session. History is kept.
    pub fn reset(&mut self, now_ms: u64) {
        self.cooldowns.reset();
        self.inactivity.reset(now_ms);
        self.escalation.resolve();
    }

    /// Sound behaviour for a severity at `now_ms`.
    pub fn sound_directive(&self, severity: Severity, now_ms: u64) -> SoundDirective {
        if self.escalation.emergency_active() {
            return SoundDirective::normal(true);
        }
        let critical = severity == Severity::Critical;
        let quiet = &self.settings.quiet_hours;
        if !quiet.is_active(now_ms) {
            return SoundDirective::normal(critical);
        }
        match quiet.mode {
            QuietMode::Silent => SoundDirective::silent(),
            QuietMode::Reduced => SoundDirective {
                play: true,
                volume_factor: if critical {
                    1.0
                } else {
                    quiet.reduced_volume_percent as f32 / 100.0
                },
                bypass_mute: critical,
            },
            QuietMode::EmergencyOnly if critical => SoundDirective::normal(true),
            QuietMode::EmergencyOnly => SoundDirective::silent(),
        }
    }

    fn fire(
        &mut self,
        kind: AlertKind,
        severity: Severity,
        message: String,
        now_ms: u64,
    ) -> Option<AlertDecision> {
        let cooldown_ms = self.settings.cooldowns.millis_for(severity);
        if !self.cooldowns.try_fire(severity, now_ms, cooldown_ms) {
            log::debug!(
                "{}: {} alert suppressed by {} cooldown",
                self.stream_id,
                kind.as_str(),
                severity.as_str()
            );
            return None;
        }
        if severity >= Severity::High {
            self.escalation.note(now_ms);
        }

        let alert = Alert::new(&self.stream_id, kind, severity, message, now_ms);
        let sound = self.sound_directive(severity, now_ms);
        log::info!(
            "alert {} [{}] {}: {}",
            alert.id,
            severity.as_str(),
            kind.as_str(),
            alert.message
        );
        self.history.push(alert.clone());
        Some(AlertDecision {
            trigger: kind.trigger(),
            sound,
            alert,
        })
    }

    // ---- event → severity ----

    fn motion_candidates(&self, motion: &MotionReading, out: &mut Vec<Candidate>) -> bool {
        let threshold = self.settings.overall_motion_threshold();
        if !(motion.score > threshold) {
            return false;
        }
        if self.settings.alert_on_motion {
            let base = match self.settings.scenario {
                Scenario::Baby => Severity::Medium,
                _ => Severity::Low,
            };
            let (kind, severity) = if motion.sudden {
                (AlertKind::SuddenMotion, base.raised())
            } else {
                (AlertKind::Motion, base)
            };
            out.push(Candidate {
                kind,
                severity,
                message: format!("Motion detected ({:.1}% of frame)", motion.score * 100.0),
            });
        }
        true
    }

    fn audio_candidates(&self, audio: &AudioReading, out: &mut Vec<Candidate>) -> bool {
        let activity = audio.smoothed > self.audio_thresholds.level_threshold || audio.cry.is_crying;
        if !self.settings.alert_on_audio {
            return activity;
        }

        if audio.cry.is_crying {
            let severity = match audio.cry.pattern {
                CryPattern::Scream => Severity::High,
                CryPattern::Cry => Severity::Medium,
                CryPattern::Whimper | CryPattern::None => Severity::Low,
            };
            out.push(Candidate {
                kind: AlertKind::Crying,
                severity,
                message: format!(
                    "Baby crying ({:?}, {:.0}% confidence)",
                    audio.cry.pattern,
                    audio.cry.confidence * 100.0
                )
                .to_lowercase(),
            });
        }

        if let Some((category, confidence)) = audio.category {
            let severity = match (self.settings.scenario, category) {
                (_, SoundCategory::Distress) => Some(Severity::High),
                (_, SoundCategory::Call) => Some(Severity::Medium),
                (Scenario::Pet, SoundCategory::Whine) => Some(Severity::Medium),
                (Scenario::Pet, SoundCategory::Bark) => Some(Severity::Low),
                _ => None,
            };
            if let Some(severity) = severity {
                let kind = if category == SoundCategory::Distress {
                    AlertKind::Distress
                } else {
                    AlertKind::Sound
                };
                out.push(Candidate {
                    kind,
                    severity,
                    message: format!(
                        "Sound classified as {} ({:.0}% confidence)",
                        category.as_str(),
                        confidence * 100.0
                    ),
                });
            }
        }

        if audio.sudden {
            out.push(Candidate {
                kind: AlertKind::SuddenSound,
                severity: Severity::Low,
                message: format!("Sudden sound (level {:.2})", audio.level),
            });
        }
        activity
    }

    fn detection_candidates(&self, detections: &[DetectionEvent], out: &mut Vec<Candidate>) -> bool {
        let min = self.settings.detection_min_confidence;
        let confident = |kind| {
            detections
                .iter()
                .filter(|d| d.kind == kind && d.confidence >= min)
                .count()
        };
        let people = confident(DetectionKind::Person);
        let animals = confident(DetectionKind::Animal);
        if people == 0 && animals == 0 {
            return false;
        }
        if !self.settings.alert_on_detections {
            return true;
        }

        if people > 0 {
            let severity = match self.settings.scenario {
                Scenario::Baby | Scenario::Elderly | Scenario::Security => Severity::High,
                Scenario::Pet | Scenario::General => Severity::Medium,
            };
            out.push(Candidate {
                kind: AlertKind::Person,
                severity,
                message: format!("{} person(s) detected", people),
            });
        }
        if animals > 0 {
            let severity = match self.settings.scenario {
                Scenario::Pet => Severity::Medium,
                _ => Severity::Low,
            };
            out.push(Candidate {
                kind: AlertKind::Animal,
                severity,
                message: format!("{} animal(s) detected", animals),
            });
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn motion(score: f32) -> MotionReading {
        MotionReading {
            score,
            smoothed: score,
            ..MotionReading::default()
        }
    }

    fn engine(scenario: Scenario) -> AlertEngine {
        AlertEngine::new("cam", PolicySettings::for_scenario(scenario), 0)
    }

    fn local_ms(h: u32, m: u32) -> u64 {
        Local
            .with_ymd_and_hms(2026, 3, 4, h, m, 0)
            .single()
            .expect("unambiguous local time")
            .timestamp_millis() as u64
    }

    #[test]
    fn baby_motion_above_threshold_is_medium() {
        let mut engine = engine(Scenario::Baby);
        let reading = motion(0.04);
        let decisions = engine.evaluate(
            &PolicyInput {
                motion: Some(&reading),
                ..PolicyInput::default()
            },
            1_000,
        );
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].alert.severity, Severity::Medium);
        assert_eq!(decisions[0].trigger, SoundTrigger::MotionDetected);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn motion_below_threshold_is_ignored() {
        let mut engine = engine(Scenario::Baby);
        let reading = motion(0.02);
        let input = PolicyInput {
            motion: Some(&reading),
            ..PolicyInput::default()
        };
        assert!(engine.evaluate(&input, 1_000).is_empty());
    }

    #[test]
    fn same_severity_within_cooldown_fires_once() {
        let mut engine = engine(Scenario::Baby);
        let reading = motion(0.2);
        let input = PolicyInput {
            motion: Some(&reading),
            ..PolicyInput::default()
        };
        assert_eq!(engine.evaluate(&input, 0).len(), 1);
        assert!(engine.evaluate(&input, 30_000).is_empty());
        // Medium cooldown is 60 s.
        assert_eq!(engine.evaluate(&input, 60_000).len(), 1);
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn sudden_motion_raises_severity() {
        let mut engine = engine(Scenario::General);
        let reading = MotionReading {
            sudden: true,
            ..motion(0.3)
        };
        let decisions = engine.evaluate(
            &PolicyInput {
                motion: Some(&reading),
                ..PolicyInput::default()
            },
            0,
        );
        assert_eq!(decisions[0].alert.kind, AlertKind::SuddenMotion);
        assert_eq!(decisions[0].alert.severity, Severity::Medium);
    }

    #[test]
    fn person_severity_depends_on_scenario() {
        let people = [DetectionEvent::person(0.9)];
        let input = PolicyInput {
            detections: &people,
            ..PolicyInput::default()
        };
        let high = engine(Scenario::Elderly).evaluate(&input, 0);
        assert_eq!(high[0].alert.severity, Severity::High);
        let medium = engine(Scenario::Pet).evaluate(&input, 0);
        assert_eq!(medium[0].alert.severity, Severity::Medium);

        let weak = [DetectionEvent::person(0.1)];
        let input = PolicyInput {
            detections: &weak,
            ..PolicyInput::default()
        };
        assert!(engine(Scenario::Elderly).evaluate(&input, 0).is_empty());
    }

    #[test]
    fn cry_pattern_sets_severity() {
        let mut engine = engine(Scenario::Baby);
        let reading = AudioReading {
            cry: crate::analysis::CryAnalysis {
                is_crying: true,
                confidence: 0.8,
                pattern: CryPattern::Scream,
                duration_ms: 2_000,
            },
            ..AudioReading::default()
        };
        let decisions = engine.evaluate(
            &PolicyInput {
                audio: Some(&reading),
                ..PolicyInput::default()
            },
            0,
        );
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].alert.kind, AlertKind::Crying);
        assert_eq!(decisions[0].alert.severity, Severity::High);
    }

    #[test]
    fn inactivity_alerts_once_and_rearms() {
        let mut settings = PolicySettings::for_scenario(Scenario::Elderly);
        settings.inactivity_alert_minutes = 1;
        let mut engine = AlertEngine::new("cam", settings, 0);
        let idle = PolicyInput::default();

        assert!(engine.evaluate(&idle, 30_000).is_empty());
        let decisions = engine.evaluate(&idle, 61_000);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].alert.kind, AlertKind::Inactivity);
        assert_eq!(decisions[0].alert.severity, Severity::Medium);
        assert_eq!(decisions[0].trigger, SoundTrigger::InactivityAlert);
        // An unacknowledged idle alert stays an alert; it does not escalate.
        assert!(engine.evaluate(&idle, 400_000).is_empty());
        assert!(!engine.emergency_active());

        let moving = motion(0.5);
        engine.evaluate(
            &PolicyInput {
                motion: Some(&moving),
                ..PolicyInput::default()
            },
            500_000,
        );
        let again = engine.evaluate(&idle, 561_000);
        assert!(again.iter().any(|d| d.alert.kind == AlertKind::Inactivity));
    }

    #[test]
    fn history_keeps_newest_hundred_alerts() {
        let mut settings = PolicySettings::for_scenario(Scenario::General);
        settings.cooldowns.low_secs = 0;
        let mut engine = AlertEngine::new("cam", settings, 0);
        let reading = motion(0.5);
        let input = PolicyInput {
            motion: Some(&reading),
            ..PolicyInput::default()
        };

        let mut ids = Vec::new();
        for t in 1..=105u64 {
            let decisions = engine.evaluate(&input, t);
            assert_eq!(decisions.len(), 1);
            ids.push(decisions[0].alert.id.clone());
        }
        assert_eq!(engine.history().len(), 100);
        assert!(engine.history().get(&ids[4]).is_none());
        assert!(engine.history().get(&ids[5]).is_some());
        assert_eq!(engine.history().unacknowledged().len(), 100);
        assert!(engine.acknowledge(&ids[104]));
        assert_eq!(engine.history().unacknowledged().len(), 99);
    }

    #[test]
    fn unresolved_high_alert_escalates_until_acknowledged() {
        let mut settings = PolicySettings::for_scenario(Scenario::Security);
        settings.emergency_escalation_delay_secs = 60;
        let mut engine = AlertEngine::new("cam", settings, 0);
        let people = [DetectionEvent::person(0.95)];
        let input = PolicyInput {
            detections: &people,
            ..PolicyInput::default()
        };

        let first = engine.evaluate(&input, 0);
        let person_alert = first[0].alert.id.clone();
        assert!(!engine.emergency_active());

        let later = engine.evaluate(&PolicyInput::default(), 61_000);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].alert.kind, AlertKind::Escalation);
        assert_eq!(later[0].alert.severity, Severity::Critical);
        assert!(engine.emergency_active());
        assert!(later[0].sound.bypass_mute);

        assert!(engine.acknowledge(&person_alert));
        assert!(!engine.emergency_active());
    }

    #[test]
    fn explicit_emergency_is_critical() {
        let mut engine = engine(Scenario::Elderly);
        let decision = engine
            .trigger_emergency("Help button pressed", 5)
            .expect("critical has no cooldown");
        assert_eq!(decision.alert.severity, Severity::Critical);
        assert_eq!(decision.trigger, SoundTrigger::Emergency);
        assert!(decision.sound.play && decision.sound.bypass_mute);
        assert!(engine.trigger_emergency("again", 6).is_some());
    }

    #[test]
    fn quiet_hours_shape_sound_not_recording() -> anyhow::Result<()> {
        let mut settings = PolicySettings::for_scenario(Scenario::Baby);
        settings.quiet_hours = QuietHours {
            mode: QuietMode::Reduced,
            reduced_volume_percent: 25,
            ..QuietHours::default()
        }
        .with_window("22:00-07:00")?;
        let mut engine = AlertEngine::new("cam", settings, 0);
        let night = local_ms(23, 0);
        let reading = motion(0.2);

        let decisions = engine.evaluate(
            &PolicyInput {
                motion: Some(&reading),
                ..PolicyInput::default()
            },
            night,
        );
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].sound.play);
        assert!((decisions[0].sound.volume_factor - 0.25).abs() < 1e-6);
        assert_eq!(engine.sound_directive(Severity::Critical, night).volume_factor, 1.0);

        let mut silent = engine.settings().clone();
        silent.quiet_hours.mode = QuietMode::EmergencyOnly;
        engine.update_settings(silent);
        assert!(!engine.sound_directive(Severity::High, night).play);
        assert!(engine.sound_directive(Severity::Critical, night).play);
        assert!(engine.sound_directive(Severity::High, local_ms(12, 0)).play);
        Ok(())
    }
}
