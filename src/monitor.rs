//! One stream through the whole pipeline.
//!
//! `MonitorSession::tick` is the unit of work: analysis completes before policy
//! evaluation, policy completes before any sound or security side effect.
//! `MonitorRunner` drives a session on a worker thread and skips ticks that
//! arrive while the previous one is still being processed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::analysis::{AudioAnalyzer, AudioReading, MotionAnalyzer, MotionReading};
use crate::detect::{BackendHealth, BackendRegistry, DetectionEvent, DetectionKind};
use crate::frame::{AudioSample, Frame};
use crate::policy::{AlertDecision, AlertEngine, AlertKind, AlertSink, PolicyInput, PolicySettings};
use crate::security::{ArmingState, IntrusionFrame, SecurityStateMachine};
use crate::sound::{SharedOrchestrator, SoundId, SoundOrchestrator};
use crate::storage::SharedStore;
use crate::{Scenario, Severity};

/// Captured media for one tick.
#[derive(Debug, Default)]
pub struct TickInput {
    pub frame: Option<Frame>,
    pub audio: Option<AudioSample>,
    pub now_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct TickOutcome {
    pub motion: Option<MotionReading>,
    pub audio: Option<AudioReading>,
    pub detections: Vec<DetectionEvent>,
    /// Set when the detector was unavailable and the tick fell back to motion and audio.
    pub detector_error: Option<String>,
    pub decisions: Vec<AlertDecision>,
    pub sounds: Vec<SoundId>,
    pub intrusion: Option<IntrusionFrame>,
    pub security_state: Option<ArmingState>,
}

pub struct MonitorSession {
    motion: MotionAnalyzer,
    audio: AudioAnalyzer,
    detectors: BackendRegistry,
    engine: AlertEngine,
    orchestrator: SharedOrchestrator,
    security: Option<SecurityStateMachine>,
    store: Option<SharedStore>,
    sinks: Vec<Box<dyn AlertSink>>,
    running: bool,
    ticks: u64,
}

impl MonitorSession {
    pub fn new(
        stream_id: &str,
        settings: PolicySettings,
        orchestrator: SharedOrchestrator,
        now_ms: u64,
    ) -> Result<Self> {
        crate::validate_stream_id(stream_id)?;
        let engine = AlertEngine::new(stream_id, settings, now_ms);
        let settings = engine.settings();
        Ok(Self {
            motion: MotionAnalyzer::new(settings.motion_thresholds()),
            audio: AudioAnalyzer::for_scenario(settings.scenario),
            detectors: BackendRegistry::new(),
            engine,
            orchestrator,
            security: None,
            store: None,
            sinks: Vec::new(),
            running: true,
            ticks: 0,
        })
    }

    pub fn with_detectors(mut self, detectors: BackendRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn with_security(mut self, security: SecurityStateMachine) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn stream_id(&self) -> &str {
        self.engine.stream_id()
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub fn orchestrator(&self) -> SharedOrchestrator {
        self.orchestrator.clone()
    }

    pub fn security(&self) -> Option<&SecurityStateMachine> {
        self.security.as_ref()
    }

    pub fn security_mut(&mut self) -> Option<&mut SecurityStateMachine> {
        self.security.as_mut()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn detector_health(&self) -> Vec<BackendHealth> {
        self.detectors.health()
    }

    // -------------------- settings --------------------

    /// Apply new policy settings. A scenario change resets analyzer buffers.
    pub fn update_settings(&mut self, settings: PolicySettings) {
        let previous = self.engine.settings().scenario;
        self.engine.update_settings(settings);
        let settings = self.engine.settings().clone();
        self.motion.set_thresholds(settings.motion_thresholds());
        if settings.scenario != previous {
            self.audio.set_scenario(settings.scenario);
        }
        if let Some(store) = &self.store {
            let result = match store.lock() {
                Ok(mut guard) => guard.save_policy_settings(self.engine.stream_id(), &settings),
                Err(_) => Err(anyhow!("store lock poisoned")),
            };
            if let Err(err) = result {
                log::warn!("failed to persist policy settings: {}", err);
            }
        }
    }

    /// Switch scenario, keeping the user's quiet hours and cooldowns.
    pub fn set_scenario(&mut self, scenario: Scenario) {
        let current = self.engine.settings();
        let settings = PolicySettings {
            cooldowns: current.cooldowns.clone(),
            quiet_hours: current.quiet_hours.clone(),
            ..PolicySettings::for_scenario(scenario)
        };
        log::info!("{}: scenario -> {}", self.stream_id(), scenario.as_str());
        self.update_settings(settings);
    }

    // -------------------- lifecycle --------------------

    /// Resume after `stop`.
    pub fn start(&mut self, now_ms: u64) {
        if self.running {
            return;
        }
        self.engine.reset(now_ms);
        self.running = true;
        log::info!("{}: monitoring started", self.stream_id());
    }

    /// Stop every sound at once and drop per-session buffers.
    pub fn stop(&mut self, now_ms: u64) {
        self.running = false;
        self.with_orchestrator(|orch| {
            orch.set_emergency_mode(false);
            orch.stop_all();
        });
        self.motion.reset();
        self.audio.reset();
        self.engine.reset(now_ms);
        log::info!("{}: monitoring stopped after {} ticks", self.stream_id(), self.ticks);
    }

    // -------------------- alerts --------------------

    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        if !self.engine.acknowledge(alert_id) {
            return false;
        }
        if let Some(store) = &self.store {
            let result = match store.lock() {
                Ok(mut guard) => guard.acknowledge_alert(alert_id),
                Err(_) => Err(anyhow!("store lock poisoned")),
            };
            if let Err(err) = result {
                log::warn!("failed to persist acknowledgement of {}: {}", alert_id, err);
            }
        }
        self.sync_emergency_mode();
        true
    }

    /// Raise an emergency now (panic button).
    pub fn trigger_emergency(&mut self, message: &str, now_ms: u64) -> Option<AlertDecision> {
        let decision = self.engine.trigger_emergency(message, now_ms)?;
        self.dispatch(&decision, true, now_ms);
        Some(decision)
    }

    // -------------------- tick --------------------

    pub fn tick(&mut self, input: TickInput) -> TickOutcome {
        let now_ms = input.now_ms;
        let mut outcome = TickOutcome::default();
        if !self.running {
            log::debug!("{}: tick ignored while stopped", self.stream_id());
            return outcome;
        }
        self.ticks += 1;
        self.with_orchestrator(|orch| {
            orch.begin_tick();
            orch.tick(now_ms);
        });

        // Analysis.
        if let Some(frame) = input.frame.as_ref() {
            outcome.motion = Some(self.motion.analyze(frame));
        }
        if let Some(sample) = input.audio.as_ref() {
            outcome.audio = Some(self.audio.analyze(sample, now_ms));
        }
        if let Some(frame) = input.frame.as_ref() {
            match self.detect(frame) {
                Ok(events) => outcome.detections = events,
                Err(err) => {
                    log::warn!(
                        "{}: detector unavailable, using motion and audio only: {}",
                        self.stream_id(),
                        err
                    );
                    outcome.detector_error = Some(err.to_string());
                }
            }
        }

        // Security.
        if let Some(security) = self.security.as_mut() {
            security.tick(now_ms);
            if input.frame.is_some() && outcome.detector_error.is_none() {
                let persons: Vec<DetectionEvent> = outcome
                    .detections
                    .iter()
                    .filter(|d| d.kind == DetectionKind::Person)
                    .cloned()
                    .collect();
                let frame_ref = input.frame.as_ref().map(Frame::frame_ref);
                outcome.intrusion = security.observe_persons(
                    persons.len() as u32,
                    frame_ref.as_deref(),
                    &persons,
                    now_ms,
                );
            }
            outcome.security_state = Some(security.state());
        }

        // Policy.
        let mut decisions = self.engine.evaluate(
            &PolicyInput {
                motion: outcome.motion.as_ref(),
                audio: outcome.audio.as_ref(),
                detections: &outcome.detections,
            },
            now_ms,
        );
        if let Some(frame) = &outcome.intrusion {
            let message = format!(
                "Intrusion: {} person(s) in view, {} allowed",
                frame.person_count, frame.allowed_count
            );
            if let Some(decision) =
                self.engine
                    .raise(AlertKind::Intrusion, Severity::Critical, &message, now_ms)
            {
                decisions.insert(0, decision);
            }
        }
        self.sync_emergency_mode();

        // Side effects.
        for decision in &decisions {
            // The security machine voices its own trigger.
            let play = decision.alert.kind != AlertKind::Intrusion;
            outcome.sounds.extend(self.dispatch(decision, play, now_ms));
        }
        outcome.decisions = decisions;
        log::debug!(
            "{}: tick {} motion={:?} audio={:?} detections={} decisions={}",
            self.stream_id(),
            self.ticks,
            outcome.motion.as_ref().map(|m| m.score),
            outcome.audio.as_ref().map(|a| a.level),
            outcome.detections.len(),
            outcome.decisions.len()
        );
        outcome
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionEvent>> {
        if self.detectors.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.detectors.detect_objects(&frame.inference_view())?;
        Ok(result.events(self.engine.settings().detection_min_confidence))
    }

    /// Persist, publish and voice one decision. Failures are logged only.
    fn dispatch(&mut self, decision: &AlertDecision, play: bool, now_ms: u64) -> Vec<SoundId> {
        if let Some(store) = &self.store {
            let result = match store.lock() {
                Ok(mut guard) => guard.append_alert(&decision.alert),
                Err(_) => Err(anyhow!("store lock poisoned")),
            };
            if let Err(err) = result {
                log::warn!("failed to persist alert {}: {}", decision.alert.id, err);
            }
        }
        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.publish(&decision.alert) {
                log::warn!("alert sink failed for {}: {}", decision.alert.id, err);
            }
        }
        if !play {
            return Vec::new();
        }
        self.with_orchestrator(|orch| orch.play_decision(decision, now_ms))
            .unwrap_or_default()
    }

    /// The orchestrator mirrors the engine's emergency state.
    fn sync_emergency_mode(&self) {
        let emergency = self.engine.emergency_active();
        self.with_orchestrator(|orch| orch.set_emergency_mode(emergency));
    }

    fn with_orchestrator<T>(&self, f: impl FnOnce(&mut SoundOrchestrator) -> T) -> Option<T> {
        match self.orchestrator.lock() {
            Ok(mut guard) => Some(f(&mut guard)),
            Err(_) => {
                log::error!("sound orchestrator lock poisoned");
                None
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Runner
// ----------------------------------------------------------------------------

/// Drives a session on a worker thread.
///
/// At most one tick is in flight. A tick submitted while the previous one is
/// still processing is dropped and counted.
pub struct MonitorRunner {
    session: Arc<Mutex<MonitorSession>>,
    sender: Option<SyncSender<TickInput>>,
    processing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    skipped: AtomicU64,
    join: Option<JoinHandle<()>>,
}

impl MonitorRunner {
    pub fn spawn(session: MonitorSession) -> Result<Self> {
        let session = Arc::new(Mutex::new(session));
        let (sender, receiver) = mpsc::sync_channel::<TickInput>(1);
        let processing = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicU64::new(0));

        let worker_session = session.clone();
        let worker_processing = processing.clone();
        let worker_shutdown = shutdown.clone();
        let worker_processed = processed.clone();
        let join = std::thread::Builder::new()
            .name("monitor-tick".to_string())
            .spawn(move || loop {
                if worker_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match receiver.recv_timeout(Duration::from_millis(50)) {
                    Ok(input) => {
                        let ticked = match worker_session.lock() {
                            Ok(mut session) => {
                                session.tick(input);
                                true
                            }
                            Err(_) => false,
                        };
                        worker_processing.store(false, Ordering::SeqCst);
                        worker_processed.fetch_add(1, Ordering::SeqCst);
                        if !ticked {
                            log::error!("monitor session lock poisoned; worker exiting");
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| anyhow!("failed to spawn monitor worker: {}", e))?;

        Ok(Self {
            session,
            sender: Some(sender),
            processing,
            shutdown,
            processed,
            skipped: AtomicU64::new(0),
            join: Some(join),
        })
    }

    /// Hand one tick to the worker. Returns false when it was skipped.
    pub fn submit(&self, input: TickInput) -> bool {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let skipped = self.skipped.fetch_add(1, Ordering::SeqCst) + 1;
            log::debug!("tick skipped; previous tick still processing ({} skipped)", skipped);
            return false;
        }
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.try_send(input).is_ok());
        if !sent {
            self.processing.store(false, Ordering::SeqCst);
            log::warn!("monitor worker not accepting ticks");
        }
        sent
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Arc<Mutex<MonitorSession>> {
        self.session.clone()
    }

    /// Join the worker, then stop the session.
    pub fn stop(mut self, now_ms: u64) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("monitor worker thread panicked"))?;
        }
        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("monitor session lock poisoned"))?;
        session.stop(now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectedObject, DetectionResult, StubBackend};
    use crate::frame::PixelFormat;
    use crate::sound::{NullSink, OrchestratorConfig};
    use crate::storage::{InMemoryMonitorStore, MonitorStore};

    fn orchestrator() -> SharedOrchestrator {
        let mut orch = SoundOrchestrator::new(Box::new(NullSink), OrchestratorConfig::default());
        orch.initialize().unwrap();
        orch.shared()
    }

    fn gray(value: u8, at: u64) -> Frame {
        Frame::new(vec![value; 64 * 48], 64, 48, PixelFormat::Gray8, at, at).unwrap()
    }

    #[derive(Clone, Default)]
    struct CollectingSink {
        alerts: Arc<Mutex<Vec<String>>>,
    }

    impl AlertSink for CollectingSink {
        fn publish(&mut self, alert: &crate::policy::Alert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.kind.as_str().to_string());
            Ok(())
        }
    }

    #[test]
    fn detector_failure_falls_back_to_motion() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::unavailable());
        let mut session = MonitorSession::new(
            "nursery",
            PolicySettings::for_scenario(Scenario::Baby),
            orchestrator(),
            0,
        )?
        .with_detectors(registry);

        session.tick(TickInput {
            frame: Some(gray(0, 0)),
            ..TickInput::default()
        });
        let outcome = session.tick(TickInput {
            frame: Some(gray(200, 100)),
            now_ms: 100,
            ..TickInput::default()
        });
        assert!(outcome.detector_error.is_some());
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].alert.kind, AlertKind::Motion);
        Ok(())
    }

    #[test]
    fn alerts_are_persisted_and_published() -> Result<()> {
        let store = InMemoryMonitorStore::new().shared();
        let sink = CollectingSink::default();
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::scripted(vec![DetectionResult::new(vec![
            DetectedObject::new("dog", 0.9, BoundingBox::default()),
        ])]));
        let mut session = MonitorSession::new(
            "yard",
            PolicySettings::for_scenario(Scenario::Pet),
            orchestrator(),
            0,
        )?
        .with_detectors(registry)
        .with_store(store.clone())
        .with_alert_sink(Box::new(sink.clone()));

        let outcome = session.tick(TickInput {
            frame: Some(gray(10, 0)),
            ..TickInput::default()
        });
        assert_eq!(outcome.detections.len(), 1);
        assert_eq!(*sink.alerts.lock().unwrap(), vec!["animal".to_string()]);

        let stored = store.lock().unwrap().recent_alerts(10)?;
        assert_eq!(stored.len(), 1);
        assert!(session.acknowledge(&stored[0].id));
        assert!(store.lock().unwrap().recent_alerts(1)?[0].acknowledged);
        Ok(())
    }

    #[test]
    fn stop_silences_and_ignores_ticks() -> Result<()> {
        let orch = orchestrator();
        let mut session = MonitorSession::new(
            "hall",
            PolicySettings::for_scenario(Scenario::General),
            orch.clone(),
            0,
        )?;
        session.trigger_emergency("panic button", 10);
        assert!(orch.lock().unwrap().active_count() > 0);

        session.stop(20);
        assert_eq!(orch.lock().unwrap().active_count(), 0);
        assert!(!session.is_running());
        let outcome = session.tick(TickInput {
            frame: Some(gray(0, 30)),
            now_ms: 30,
            ..TickInput::default()
        });
        assert!(outcome.motion.is_none());
        assert_eq!(session.ticks(), 0);

        session.start(40);
        session.tick(TickInput {
            frame: Some(gray(0, 50)),
            now_ms: 50,
            ..TickInput::default()
        });
        assert_eq!(session.ticks(), 1);
        Ok(())
    }

    #[test]
    fn scenario_switch_keeps_quiet_hours() -> Result<()> {
        let mut settings = PolicySettings::for_scenario(Scenario::Pet);
        settings.quiet_hours = settings.quiet_hours.with_window("23:00-06:00")?;
        let mut session = MonitorSession::new("den", settings, orchestrator(), 0)?;
        session.set_scenario(Scenario::Elderly);
        let current = session.engine().settings();
        assert_eq!(current.scenario, Scenario::Elderly);
        assert!(current.quiet_hours.enabled);
        assert!(current.inactivity_enabled);
        Ok(())
    }

    #[test]
    fn runner_skips_ticks_while_busy() -> Result<()> {
        let session = MonitorSession::new(
            "porch",
            PolicySettings::for_scenario(Scenario::General),
            orchestrator(),
            0,
        )?;
        let runner = MonitorRunner::spawn(session)?;
        let shared = runner.session();

        {
            // Hold the session so the worker cannot finish the first tick.
            let _held = shared.lock().unwrap();
            assert!(runner.submit(TickInput::default()));
            assert!(!runner.submit(TickInput::default()));
            assert_eq!(runner.skipped(), 1);
        }

        let mut waited = 0;
        while runner.processed() < 1 && waited < 200 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(runner.processed(), 1);
        assert!(!runner.is_processing());
        assert!(runner.submit(TickInput::default()));

        runner.stop(1_000)?;
        assert!(!shared.lock().unwrap().is_running());
        Ok(())
    }
}
