//! Security arming lifecycle.
//!
//! `Disarmed → Arming → Armed → Triggered`, with `disarm()` valid from every
//! state. Triggers fire on person-count excess while armed, subject to a
//! cooldown, and record an `IntrusionFrame` each time.
//!
//! Settings are locked outside `Disarmed`: changing them mid-arm could mask or
//! fabricate an intrusion.

mod settings;

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionEvent;
use crate::sound::{PlayOptions, SharedOrchestrator, SoundId, SoundKind};
use crate::storage::SharedStore;
use crate::PolicyViolation;

pub use settings::{AlertMode, SecuritySettings, DEFAULT_WARNING_PHRASES};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmingState {
    #[default]
    Disarmed,
    Arming,
    Armed,
    Triggered,
}

impl ArmingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmingState::Disarmed => "disarmed",
            ArmingState::Arming => "arming",
            ArmingState::Armed => "armed",
            ArmingState::Triggered => "triggered",
        }
    }
}

/// Snapshot recorded once per trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrusionFrame {
    pub id: String,
    /// Opaque reference to the captured frame.
    pub frame_ref: Option<String>,
    pub timestamp_ms: u64,
    pub person_count: u32,
    pub allowed_count: u32,
    pub detections: Vec<DetectionEvent>,
    pub acknowledged: bool,
    pub exported: bool,
    pub notes: Option<String>,
}

/// Text-to-speech output.
pub trait SpeechSink: Send {
    fn speak(&mut self, text: &str) -> Result<()>;

    /// Cut off anything still being spoken.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct SecurityStateMachine {
    settings: SecuritySettings,
    state: ArmingState,
    arming_deadline_ms: Option<u64>,
    person_count: u32,
    last_trigger_ms: Option<u64>,
    total_triggers: u64,
    intrusions: VecDeque<IntrusionFrame>,
    orchestrator: Option<SharedOrchestrator>,
    speech: Option<Box<dyn SpeechSink>>,
    store: Option<SharedStore>,
    siren: Option<SoundId>,
    next_warning_at_ms: Option<u64>,
    phrase_index: usize,
}

impl SecurityStateMachine {
    pub fn new(settings: SecuritySettings) -> Self {
        Self {
            settings: settings.clamped(),
            state: ArmingState::Disarmed,
            arming_deadline_ms: None,
            person_count: 0,
            last_trigger_ms: None,
            total_triggers: 0,
            intrusions: VecDeque::new(),
            orchestrator: None,
            speech: None,
            store: None,
            siren: None,
            next_warning_at_ms: None,
            phrase_index: 0,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: SharedOrchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_speech(mut self, speech: Box<dyn SpeechSink>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn state(&self) -> ArmingState {
        self.state
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    pub fn person_count(&self) -> u32 {
        self.person_count
    }

    pub fn total_triggers(&self) -> u64 {
        self.total_triggers
    }

    /// Newest last.
    pub fn intrusions(&self) -> impl Iterator<Item = &IntrusionFrame> {
        self.intrusions.iter()
    }

    pub fn intrusion(&self, id: &str) -> Option<&IntrusionFrame> {
        self.intrusions.iter().find(|f| f.id == id)
    }

    /// Remaining arming countdown, `None` unless arming.
    pub fn countdown_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match (self.state, self.arming_deadline_ms) {
            (ArmingState::Arming, Some(deadline)) => Some(deadline.saturating_sub(now_ms)),
            _ => None,
        }
    }

    // -------------------- transitions --------------------

    pub fn arm(&mut self, now_ms: u64) -> Result<()> {
        if self.state != ArmingState::Disarmed {
            return Err(PolicyViolation::new(
                "SECURITY_NOT_DISARMED",
                format!("cannot arm while {}", self.state.as_str()),
            )
            .into());
        }
        let countdown_ms = self.settings.arming_countdown_secs as u64 * 1_000;
        if countdown_ms == 0 {
            self.state = ArmingState::Armed;
            log::info!("security armed");
        } else {
            self.state = ArmingState::Arming;
            self.arming_deadline_ms = Some(now_ms + countdown_ms);
            log::info!(
                "security arming, countdown {}s",
                self.settings.arming_countdown_secs
            );
        }
        Ok(())
    }

    /// Valid from every state. Stops the siren and any speech.
    pub fn disarm(&mut self) {
        if self.state != ArmingState::Disarmed {
            log::info!("security disarmed from {}", self.state.as_str());
        }
        self.state = ArmingState::Disarmed;
        self.arming_deadline_ms = None;
        self.person_count = 0;
        self.last_trigger_ms = None;
        self.next_warning_at_ms = None;
        self.phrase_index = 0;
        self.silence();
    }

    /// Advance the arming countdown and the spoken-warning cadence.
    pub fn tick(&mut self, now_ms: u64) -> ArmingState {
        match self.state {
            ArmingState::Arming => {
                if self.arming_deadline_ms.is_some_and(|d| now_ms >= d) {
                    self.arming_deadline_ms = None;
                    self.state = ArmingState::Armed;
                    log::info!("security armed");
                }
            }
            ArmingState::Triggered => {
                if self.next_warning_at_ms.is_some_and(|t| now_ms >= t) {
                    self.speak_next_warning(now_ms);
                }
            }
            ArmingState::Disarmed | ArmingState::Armed => {}
        }
        self.state
    }

    /// Feed one detection tick's person count.
    ///
    /// Returns the recorded frame when this observation triggered.
    pub fn observe_persons(
        &mut self,
        person_count: u32,
        frame_ref: Option<&str>,
        detections: &[DetectionEvent],
        now_ms: u64,
    ) -> Option<IntrusionFrame> {
        self.person_count = person_count;
        if !matches!(self.state, ArmingState::Armed | ArmingState::Triggered) {
            return None;
        }
        if person_count <= self.settings.allowed_persons {
            return None;
        }
        if let Some(last) = self.last_trigger_ms {
            if now_ms.saturating_sub(last) < self.settings.trigger_cooldown_ms {
                log::debug!("intrusion within trigger cooldown; not re-firing");
                return None;
            }
        }

        let first = self.state == ArmingState::Armed;
        self.state = ArmingState::Triggered;
        self.last_trigger_ms = Some(now_ms);
        self.total_triggers += 1;

        let frame = IntrusionFrame {
            id: uuid::Uuid::new_v4().to_string(),
            frame_ref: frame_ref.map(str::to_string),
            timestamp_ms: now_ms,
            person_count,
            allowed_count: self.settings.allowed_persons,
            detections: detections.to_vec(),
            acknowledged: false,
            exported: false,
            notes: None,
        };
        log::warn!(
            "security triggered: {} persons (allowed {}), trigger #{}",
            person_count,
            self.settings.allowed_persons,
            self.total_triggers
        );
        self.record_intrusion(frame.clone(), now_ms);
        self.announce(first, now_ms);
        Some(frame)
    }

    // -------------------- settings --------------------

    /// Rejected with `SECURITY_SETTINGS_LOCKED` unless disarmed.
    pub fn update_settings(&mut self, settings: SecuritySettings) -> Result<()> {
        if self.state != ArmingState::Disarmed {
            log::warn!(
                "security settings change rejected while {}",
                self.state.as_str()
            );
            return Err(PolicyViolation::new(
                "SECURITY_SETTINGS_LOCKED",
                format!(
                    "settings are editable only while disarmed (currently {})",
                    self.state.as_str()
                ),
            )
            .into());
        }
        self.settings = settings.clamped();
        if let Some(store) = &self.store {
            let result = match store.lock() {
                Ok(mut guard) => guard.save_security_settings(&self.settings),
                Err(_) => Err(anyhow!("store lock poisoned")),
            };
            if let Err(err) = result {
                log::warn!("failed to persist security settings: {}", err);
            }
        }
        Ok(())
    }

    // -------------------- intrusion history --------------------

    pub fn acknowledge_intrusion(&mut self, id: &str) -> bool {
        self.edit_intrusion(id, |f| f.acknowledged = true)
    }

    pub fn annotate_intrusion(&mut self, id: &str, notes: &str) -> bool {
        let notes = notes.trim();
        self.edit_intrusion(id, |f| {
            f.notes = (!notes.is_empty()).then(|| notes.to_string());
        })
    }

    pub fn mark_exported(&mut self, id: &str) -> bool {
        self.edit_intrusion(id, |f| f.exported = true)
    }

    /// Drop frames past the retention window.
    pub fn prune_intrusions(&mut self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.settings.retention_ms());
        let before = self.intrusions.len();
        self.intrusions.retain(|f| f.timestamp_ms >= cutoff);
        before - self.intrusions.len()
    }

    fn edit_intrusion(&mut self, id: &str, edit: impl FnOnce(&mut IntrusionFrame)) -> bool {
        let Some(frame) = self.intrusions.iter_mut().find(|f| f.id == id) else {
            return false;
        };
        edit(frame);
        let frame = frame.clone();
        self.persist(|store| store.update_intrusion(&frame));
        true
    }

    fn record_intrusion(&mut self, frame: IntrusionFrame, now_ms: u64) {
        self.persist(|store| store.append_intrusion(&frame));
        self.intrusions.push_back(frame);
        self.prune_intrusions(now_ms);
        while self.intrusions.len() > self.settings.max_intrusion_frames {
            self.intrusions.pop_front();
        }
    }

    fn persist(&self, write: impl FnOnce(&mut dyn crate::storage::MonitorStore) -> Result<()>) {
        let Some(store) = &self.store else {
            return;
        };
        let result = match store.lock() {
            Ok(mut guard) => write(&mut *guard),
            Err(_) => Err(anyhow!("store lock poisoned")),
        };
        if let Err(err) = result {
            log::warn!("failed to persist intrusion frame: {}", err);
        }
    }

    // -------------------- side effects --------------------

    fn announce(&mut self, first: bool, now_ms: u64) {
        match self.settings.alert_mode {
            AlertMode::Silent => {}
            AlertMode::Normal => {
                if first {
                    self.play(SoundKind::Warning, false, now_ms);
                }
            }
            AlertMode::Extreme => {
                let siren_running = match (self.siren, &self.orchestrator) {
                    (Some(id), Some(orch)) => orch
                        .lock()
                        .map(|o| o.active(id).is_some())
                        .unwrap_or(false),
                    _ => false,
                };
                if !siren_running {
                    self.siren = self.play(SoundKind::Alarm, true, now_ms);
                }
                if first && self.settings.tts_enabled {
                    self.phrase_index = 0;
                    self.speak_next_warning(now_ms);
                }
            }
        }
    }

    fn play(&mut self, kind: SoundKind, looping: bool, now_ms: u64) -> Option<SoundId> {
        let orchestrator = self.orchestrator.as_ref()?;
        let options = PlayOptions {
            volume: Some(self.settings.siren_volume_unit()),
            looping: Some(looping),
            bypass_mute: true,
            fixed_volume: true,
            ..PlayOptions::default()
        };
        match orchestrator.lock() {
            Ok(mut orch) => orch.play(kind, &options, now_ms),
            Err(_) => {
                log::warn!("orchestrator lock poisoned; {} not played", kind.as_str());
                None
            }
        }
    }

    fn speak_next_warning(&mut self, now_ms: u64) {
        let phrases = self.settings.warning_phrases();
        self.next_warning_at_ms =
            Some(now_ms + self.settings.tts_repeat_interval_secs as u64 * 1_000);
        let Some(speech) = self.speech.as_mut() else {
            return;
        };
        let Some(phrase) = phrases.get(self.phrase_index % phrases.len().max(1)) else {
            return;
        };
        self.phrase_index += 1;
        if let Err(err) = speech.speak(phrase) {
            log::warn!("speech sink failed: {}", err);
        }
    }

    fn silence(&mut self) {
        if let (Some(id), Some(orch)) = (self.siren.take(), &self.orchestrator) {
            match orch.lock() {
                Ok(mut orch) => {
                    orch.stop(id);
                }
                Err(_) => log::warn!("orchestrator lock poisoned; siren {} not stopped", id),
            }
        }
        if let Some(speech) = self.speech.as_mut() {
            if let Err(err) = speech.stop() {
                log::debug!("speech sink stop failed: {}", err);
            }
        }
    }
}
