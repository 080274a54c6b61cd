use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::policy::AlertDecision;
use crate::storage::SharedStore;
use crate::Severity;

use super::{
    severity_multiplier, ActiveSound, AudioSink, CustomSound, Fade, PlayOptions, PlaybackState,
    SoundId, SoundKind, SoundSource, SoundTrigger,
};

/// The orchestrator is shared by the policy path, the security path and manual
/// test calls. Every registry mutation goes through this one lock.
pub type SharedOrchestrator = Arc<Mutex<SoundOrchestrator>>;

#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub fade_steps: u32,
    /// Master volume, 0..=1.
    pub user_volume: f32,
    /// Pass length for custom sounds that do not declare one.
    pub custom_pass_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            fade_steps: 20,
            user_volume: 0.8,
            custom_pass_ms: 5_000,
        }
    }
}

/// Everything needed to start one playback.
struct StartRequest {
    source: SoundSource,
    priority: u8,
    looping: bool,
    repeat_count: u32,
    repeat_delay_ms: u64,
    pass_ms: u64,
    fade_in_ms: u64,
    volume: f32,
    fixed_volume: bool,
    mute_exempt: bool,
}

pub struct SoundOrchestrator {
    sink: Box<dyn AudioSink>,
    store: Option<SharedStore>,
    config: OrchestratorConfig,
    active: BTreeMap<SoundId, ActiveSound>,
    next_id: u64,
    muted: bool,
    emergency_mode: bool,
    initialized: bool,
    trigger_cache: HashMap<SoundTrigger, Vec<CustomSound>>,
}

impl SoundOrchestrator {
    pub fn new(sink: Box<dyn AudioSink>, config: OrchestratorConfig) -> Self {
        let mut config = config;
        config.max_concurrent = config.max_concurrent.max(1);
        config.fade_steps = config.fade_steps.max(1);
        config.user_volume = clamp_unit(config.user_volume);
        Self {
            sink,
            store: None,
            config,
            active: BTreeMap::new(),
            next_id: 1,
            muted: false,
            emergency_mode: false,
            initialized: false,
            trigger_cache: HashMap::new(),
        }
    }

    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(Mutex::new(self))
    }

    // ---- lifecycle ----

    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        log::info!(
            "sound orchestrator initialized (max_concurrent={}, volume={:.2})",
            self.config.max_concurrent,
            self.config.user_volume
        );
        Ok(())
    }

    /// Stop everything and release cached sound records.
    pub fn dispose(&mut self) {
        self.stop_all();
        self.trigger_cache.clear();
        self.emergency_mode = false;
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Start a new tick: custom sounds are re-read from the store at most once
    /// per trigger per tick.
    pub fn begin_tick(&mut self) {
        self.trigger_cache.clear();
    }

    // ---- global state ----

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if muted {
            let silenced: Vec<SoundId> = self
                .active
                .values()
                .filter(|s| !s.mute_exempt && !self.emergency_mode)
                .map(|s| s.id)
                .collect();
            for id in silenced {
                self.stop(id);
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_user_volume(&mut self, volume: f32) {
        let volume = clamp_unit(volume);
        let previous = self.config.user_volume;
        self.config.user_volume = volume;
        if previous <= f32::EPSILON {
            return;
        }
        let ratio = volume / previous;
        let ids: Vec<SoundId> = self.active.keys().copied().collect();
        for id in ids {
            if let Some(sound) = self.active.get_mut(&id) {
                if sound.fixed_volume {
                    continue;
                }
                sound.target_volume = clamp_unit(sound.target_volume * ratio);
            }
            self.apply_volume(id);
        }
    }

    pub fn user_volume(&self) -> f32 {
        self.config.user_volume
    }

    /// Emergency mode forces every active and new sound to full volume, unmuted.
    pub fn set_emergency_mode(&mut self, on: bool) {
        if self.emergency_mode == on {
            return;
        }
        self.emergency_mode = on;
        log::warn!("sound emergency mode {}", if on { "ON" } else { "off" });
        let ids: Vec<SoundId> = self.active.keys().copied().collect();
        for id in ids {
            if on {
                if let Some(sound) = self.active.get_mut(&id) {
                    // Fade-ins would undercut the override.
                    if sound.fade.is_some_and(|f| !f.stop_at_end) {
                        sound.fade = None;
                    }
                }
            }
            self.apply_volume(id);
        }
    }

    pub fn is_emergency_mode(&self) -> bool {
        self.emergency_mode
    }

    // ---- queries ----

    pub fn active_sounds(&self) -> Vec<&ActiveSound> {
        self.active.values().collect()
    }

    pub fn active(&self, id: SoundId) -> Option<&ActiveSound> {
        self.active.get(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.values().filter(|s| !s.is_finished()).count()
    }

    // ---- playback ----

    pub fn play(&mut self, kind: SoundKind, options: &PlayOptions, now_ms: u64) -> Option<SoundId> {
        let profile = kind.profile();
        let base = options.volume.map(clamp_unit).unwrap_or(profile.default_volume);
        let multiplier = options.severity.map(severity_multiplier).unwrap_or(1.0);
        let volume = if options.fixed_volume {
            base
        } else {
            self.effective_volume(base, multiplier, options.volume_factor, profile.volume_floor)
        };
        self.start(
            StartRequest {
                source: SoundSource::BuiltIn(kind),
                priority: kind.priority(),
                looping: options.looping.unwrap_or(profile.looping),
                repeat_count: options.repeat_count,
                repeat_delay_ms: options.repeat_delay_ms,
                pass_ms: profile.pass_ms,
                fade_in_ms: options.fade_in_ms.unwrap_or(profile.fade_in_ms),
                volume,
                fixed_volume: options.fixed_volume,
                mute_exempt: kind == SoundKind::Emergency || options.bypass_mute,
            },
            now_ms,
        )
    }

    pub fn play_for_severity(
        &mut self,
        severity: Severity,
        options: &PlayOptions,
        now_ms: u64,
    ) -> Option<SoundId> {
        let options = PlayOptions {
            severity: Some(severity),
            ..options.clone()
        };
        self.play(SoundKind::for_severity(severity), &options, now_ms)
    }

    /// Play every enabled custom sound bound to `trigger`, highest priority first.
    pub fn play_for_trigger(
        &mut self,
        trigger: SoundTrigger,
        options: &PlayOptions,
        now_ms: u64,
    ) -> Vec<SoundId> {
        let sounds = self.custom_sounds_for(trigger);
        let mut started = Vec::new();
        for sound in sounds {
            if let Some(id) = self.play_custom(&sound, options, now_ms) {
                started.push(id);
            }
        }
        started
    }

    /// Voice a policy decision: custom sounds for its trigger, else the built-in
    /// for its severity.
    pub fn play_decision(&mut self, decision: &AlertDecision, now_ms: u64) -> Vec<SoundId> {
        if !decision.sound.play {
            return Vec::new();
        }
        let options = PlayOptions::for_directive(&decision.sound, decision.alert.severity);
        let custom = self.play_for_trigger(decision.trigger, &options, now_ms);
        if !custom.is_empty() {
            return custom;
        }
        self.play_for_severity(decision.alert.severity, &options, now_ms)
            .into_iter()
            .collect()
    }

    /// Manual preview from a settings screen. Ignores quiet hours.
    pub fn test_sound(&mut self, kind: SoundKind, now_ms: u64) -> Option<SoundId> {
        let options = PlayOptions {
            looping: Some(false),
            ..PlayOptions::default()
        };
        self.play(kind, &options, now_ms)
    }

    fn play_custom(&mut self, sound: &CustomSound, options: &PlayOptions, now_ms: u64) -> Option<SoundId> {
        let base = options
            .volume
            .map(clamp_unit)
            .unwrap_or(sound.volume.min(100) as f32 / 100.0);
        let multiplier = options.severity.map(severity_multiplier).unwrap_or(1.0);
        let priority = sound.priority.clamp(1, 10);
        let floor = custom_volume_floor(priority);
        let volume = if options.fixed_volume {
            base
        } else {
            self.effective_volume(base, multiplier, options.volume_factor, floor)
        };

        let id = self.start(
            StartRequest {
                source: SoundSource::Custom {
                    sound_id: sound.id.clone(),
                    payload: Arc::from(sound.payload.as_slice()),
                },
                priority,
                looping: sound.looping,
                repeat_count: sound.repeat_count,
                repeat_delay_ms: sound.repeat_delay_ms,
                pass_ms: sound.duration_ms.unwrap_or(self.config.custom_pass_ms),
                fade_in_ms: options.fade_in_ms.unwrap_or(0),
                volume,
                fixed_volume: options.fixed_volume,
                mute_exempt: sound.mute_exempt() || options.bypass_mute,
            },
            now_ms,
        )?;
        self.record_play(&sound.id, now_ms);
        Some(id)
    }

    fn start(&mut self, request: StartRequest, now_ms: u64) -> Option<SoundId> {
        let label = request.source.label();
        if !self.initialized {
            log::warn!("sound {} requested before orchestrator initialize", label);
            return None;
        }
        if self.muted && !request.mute_exempt && !self.emergency_mode {
            log::debug!("sound {} muted", label);
            return None;
        }

        if self.active_count() >= self.config.max_concurrent {
            match self.preemption_victim(request.priority) {
                Some(victim) => {
                    log::info!(
                        "sound {} preempted by {} (priority {})",
                        victim,
                        label,
                        request.priority
                    );
                    self.stop(victim);
                }
                None => {
                    log::warn!(
                        "sound {} dropped: {} active sounds at equal or higher priority",
                        label,
                        self.config.max_concurrent
                    );
                    return None;
                }
            }
        }

        let id = SoundId(self.next_id);
        self.next_id += 1;

        let fade = Fade::new(0.0, request.volume, request.fade_in_ms, self.config.fade_steps, now_ms, false);
        let initial = match (&fade, self.emergency_mode) {
            (_, true) => 1.0,
            (Some(_), false) => 0.0,
            (None, false) => request.volume,
        };
        if let Err(err) = self
            .sink
            .start(id, request.source.payload(), initial, request.looping)
        {
            log::warn!("sound {} failed to start: {}", label, err);
            return None;
        }

        log::debug!("sound {} started as {} at volume {:.2}", label, id, initial);
        let mut sound = ActiveSound {
            id,
            source: request.source,
            priority: request.priority,
            started_at_ms: now_ms,
            looping: request.looping,
            // Looping ignores the repeat count.
            repeats_remaining: if request.looping { 0 } else { request.repeat_count },
            repeat_delay_ms: request.repeat_delay_ms,
            pass_ms: request.pass_ms,
            pass_ends_at_ms: None,
            target_volume: request.volume,
            current_volume: initial,
            fixed_volume: request.fixed_volume,
            mute_exempt: request.mute_exempt,
            fade: if self.emergency_mode { None } else { fade },
            state: PlaybackState::Playing,
        };
        sound.begin_pass(now_ms);
        self.active.insert(id, sound);
        Some(id)
    }

    /// Lowest-priority active sound strictly below `priority`; oldest on ties.
    fn preemption_victim(&self, priority: u8) -> Option<SoundId> {
        self.active
            .values()
            .filter(|s| !s.is_finished() && s.priority < priority)
            .min_by_key(|s| (s.priority, s.started_at_ms, s.id))
            .map(|s| s.id)
    }

    /// Stop immediately, no fade. Returns whether the sound was active.
    pub fn stop(&mut self, id: SoundId) -> bool {
        let Some(mut sound) = self.active.remove(&id) else {
            return false;
        };
        sound.finish();
        if let Err(err) = self.sink.stop(id) {
            log::warn!("sink failed to stop {}: {}", id, err);
        }
        true
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<SoundId> = self.active.keys().copied().collect();
        for id in ids {
            self.stop(id);
        }
    }

    /// Ramp to silence over `duration_ms`, then stop.
    pub fn fade_out(&mut self, id: SoundId, duration_ms: u64, now_ms: u64) -> bool {
        let steps = self.config.fade_steps;
        let Some(sound) = self.active.get_mut(&id) else {
            return false;
        };
        match Fade::new(sound.current_volume, 0.0, duration_ms, steps, now_ms, true) {
            Some(fade) => {
                sound.fade = Some(fade);
                true
            }
            None => self.stop(id),
        }
    }

    /// The sink finished one pass of `id`.
    pub fn on_playback_complete(&mut self, id: SoundId, now_ms: u64) {
        let Some(sound) = self.active.get_mut(&id) else {
            return;
        };
        match sound.on_complete(now_ms) {
            PlaybackState::Finished => {
                log::debug!("sound {} finished", id);
                self.active.remove(&id);
            }
            PlaybackState::PausedForRepeatDelay { resume_at_ms } if resume_at_ms <= now_ms => {
                self.tick(now_ms);
            }
            PlaybackState::Playing => {
                // Sinks normally loop on their own; restart if this one did not.
                if let Err(err) = self.restart(id, now_ms) {
                    log::warn!("failed to restart looping {}: {}", id, err);
                    self.stop(id);
                }
            }
            PlaybackState::PausedForRepeatDelay { .. } => {}
        }
    }

    /// Advance fades and repeat gaps, and retire one-shot passes that have run
    /// their length.
    pub fn tick(&mut self, now_ms: u64) {
        let ids: Vec<SoundId> = self.active.keys().copied().collect();
        let emergency = self.emergency_mode;
        for id in ids {
            let mut resume = false;
            let mut stop = false;
            let mut volume = None;
            if let Some(sound) = self.active.get_mut(&id) {
                if sound.pass_elapsed(now_ms) && sound.on_complete(now_ms) == PlaybackState::Finished {
                    log::debug!("sound {} finished", id);
                    stop = true;
                }
            }
            if stop {
                self.stop(id);
                continue;
            }
            if let Some(sound) = self.active.get_mut(&id) {
                resume = sound.resume_if_due(now_ms);
                if let Some(fade) = sound.fade.as_mut() {
                    volume = fade.advance(now_ms);
                    if fade.is_done() {
                        stop = fade.stop_at_end;
                        sound.fade = None;
                    }
                }
                if let (Some(v), false) = (volume, emergency) {
                    sound.current_volume = v;
                }
            }

            if stop {
                self.stop(id);
                continue;
            }
            if resume {
                if let Err(err) = self.restart(id, now_ms) {
                    log::warn!("failed to resume {} after repeat delay: {}", id, err);
                    self.stop(id);
                    continue;
                }
            }
            if volume.is_some() && !emergency {
                self.push_volume(id);
            }
        }
    }

    fn restart(&mut self, id: SoundId, now_ms: u64) -> Result<()> {
        let emergency = self.emergency_mode;
        let sound = self
            .active
            .get_mut(&id)
            .ok_or_else(|| anyhow!("{} not active", id))?;
        let volume = if emergency { 1.0 } else { sound.current_volume };
        self.sink
            .start(id, sound.source.payload(), volume, sound.looping)?;
        sound.begin_pass(now_ms);
        Ok(())
    }

    // ---- volume ----

    /// `max(user × sound × severity × quiet factor, floor)`, clamped to 0..=1.
    fn effective_volume(&self, base: f32, multiplier: f32, factor: f32, floor: f32) -> f32 {
        let factor = if factor.is_finite() { factor.clamp(0.0, 1.0) } else { 1.0 };
        let volume = self.config.user_volume * base * multiplier * factor;
        clamp_unit(volume.max(floor))
    }

    /// Recompute and push the output volume for `id`.
    fn apply_volume(&mut self, id: SoundId) {
        let emergency = self.emergency_mode;
        if let Some(sound) = self.active.get_mut(&id) {
            if sound.fade.is_some() && !emergency {
                return;
            }
            sound.current_volume = if emergency { 1.0 } else { sound.target_volume };
        }
        self.push_volume(id);
    }

    fn push_volume(&mut self, id: SoundId) {
        let Some(volume) = self.active.get(&id).map(|s| s.current_volume) else {
            return;
        };
        if let Err(err) = self.sink.set_volume(id, volume) {
            log::debug!("sink rejected volume for {}: {}", id, err);
        }
    }

    // ---- store ----

    fn custom_sounds_for(&mut self, trigger: SoundTrigger) -> Vec<CustomSound> {
        if let Some(cached) = self.trigger_cache.get(&trigger) {
            return cached.clone();
        }
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        let loaded = match store.lock() {
            Ok(mut guard) => guard.custom_sounds_for_trigger(trigger),
            Err(_) => Err(anyhow!("store lock poisoned")),
        };
        let mut sounds = match loaded {
            Ok(sounds) => sounds,
            Err(err) => {
                log::warn!("custom sounds for {} unavailable: {}", trigger.as_str(), err);
                Vec::new()
            }
        };
        sounds.retain(|s| s.enabled && s.plays_on(trigger));
        sounds.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.trigger_cache.insert(trigger, sounds.clone());
        sounds
    }

    /// Fire-and-forget play accounting.
    fn record_play(&mut self, sound_id: &str, now_ms: u64) {
        for cached in self.trigger_cache.values_mut() {
            for sound in cached.iter_mut().filter(|s| s.id == sound_id) {
                sound.play_count += 1;
                sound.last_played_at_ms = Some(now_ms);
            }
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let result = match store.lock() {
            Ok(mut guard) => guard.record_sound_play(sound_id, now_ms),
            Err(_) => Err(anyhow!("store lock poisoned")),
        };
        if let Err(err) = result {
            log::warn!("failed to record play of {}: {}", sound_id, err);
        }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Custom priorities 1..=10 map to floors 0.0..=0.45.
fn custom_volume_floor(priority: u8) -> f32 {
    0.05 * (priority.clamp(1, 10) - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::SoundPayload;
    use crate::storage::{InMemoryMonitorStore, MonitorStore};

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Start(SoundId, String, f32, bool),
        Volume(SoundId, f32),
        Stop(SoundId),
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_start: bool,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl AudioSink for RecordingSink {
        fn start(&mut self, id: SoundId, payload: SoundPayload<'_>, volume: f32, looping: bool) -> Result<()> {
            if self.fail_start {
                return Err(anyhow!("device busy"));
            }
            let label = match payload {
                SoundPayload::BuiltIn(kind) => kind.as_str().to_string(),
                SoundPayload::Custom { sound_id, .. } => sound_id.to_string(),
            };
            self.calls.lock().unwrap().push(Call::Start(id, label, volume, looping));
            Ok(())
        }

        fn set_volume(&mut self, id: SoundId, volume: f32) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Volume(id, volume));
            Ok(())
        }

        fn stop(&mut self, id: SoundId) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Stop(id));
            Ok(())
        }
    }

    fn orchestrator() -> (SoundOrchestrator, RecordingSink) {
        let sink = RecordingSink::default();
        let mut orch = SoundOrchestrator::new(Box::new(sink.clone()), OrchestratorConfig::default());
        orch.initialize().unwrap();
        (orch, sink)
    }

    fn no_fade() -> PlayOptions {
        PlayOptions {
            fade_in_ms: Some(0),
            ..PlayOptions::default()
        }
    }

    #[test]
    fn play_requires_initialize() {
        let mut orch = SoundOrchestrator::new(Box::new(RecordingSink::default()), OrchestratorConfig::default());
        assert!(orch.play(SoundKind::Alert, &no_fade(), 0).is_none());
        orch.initialize().unwrap();
        assert!(orch.play(SoundKind::Alert, &no_fade(), 0).is_some());
        orch.dispose();
        assert_eq!(orch.active_count(), 0);
    }

    #[test]
    fn higher_priority_preempts_lowest() {
        let (mut orch, sink) = orchestrator();
        let p1 = orch.play(SoundKind::Notification, &no_fade(), 0).unwrap();
        let p2 = orch.play(SoundKind::Alert, &no_fade(), 1).unwrap();
        let p3 = orch.play(SoundKind::Warning, &no_fade(), 2).unwrap();
        let p4 = orch.play(SoundKind::Alarm, &no_fade(), 3).unwrap();

        assert!(orch.active(p1).is_none());
        for id in [p2, p3, p4] {
            assert!(orch.active(id).is_some());
        }
        let stops: Vec<Call> = sink.calls().into_iter().filter(|c| matches!(c, Call::Stop(_))).collect();
        assert_eq!(stops, vec![Call::Stop(p1)]);
    }

    #[test]
    fn saturated_with_higher_priority_drops_new_sound() {
        let (mut orch, _sink) = orchestrator();
        for t in 0..3 {
            orch.play(SoundKind::Alarm, &no_fade(), t).unwrap();
        }
        assert!(orch.play(SoundKind::Warning, &no_fade(), 10).is_none());
        // Equal priority does not displace either.
        assert!(orch.play(SoundKind::Alarm, &no_fade(), 11).is_none());
        assert_eq!(orch.active_count(), 3);
    }

    #[test]
    fn below_bound_plays_alongside() {
        let (mut orch, _sink) = orchestrator();
        orch.play(SoundKind::Alarm, &no_fade(), 0).unwrap();
        assert!(orch.play(SoundKind::Notification, &no_fade(), 1).is_some());
        assert_eq!(orch.active_count(), 2);
    }

    #[test]
    fn emergency_plays_full_volume_through_mute() {
        let sink = RecordingSink::default();
        let mut orch = SoundOrchestrator::new(
            Box::new(sink.clone()),
            OrchestratorConfig {
                user_volume: 0.0,
                ..OrchestratorConfig::default()
            },
        );
        orch.initialize().unwrap();
        orch.set_muted(true);

        assert!(orch.play(SoundKind::Alert, &no_fade(), 0).is_none());
        let id = orch.play(SoundKind::Emergency, &no_fade(), 0).unwrap();
        assert_eq!(orch.active(id).map(|s| s.current_volume), Some(1.0));
        assert_eq!(
            sink.calls(),
            vec![Call::Start(id, "emergency".to_string(), 1.0, true)]
        );
    }

    #[test]
    fn emergency_mode_overrides_active_volumes() {
        let (mut orch, sink) = orchestrator();
        let id = orch.play(SoundKind::Notification, &no_fade(), 0).unwrap();
        assert!(orch.active(id).unwrap().current_volume < 1.0);

        orch.set_emergency_mode(true);
        assert_eq!(orch.active(id).unwrap().current_volume, 1.0);
        assert!(sink.calls().contains(&Call::Volume(id, 1.0)));

        orch.set_muted(true);
        assert!(orch.active(id).is_some());
        let later = orch.play(SoundKind::Alert, &no_fade(), 5).unwrap();
        assert_eq!(orch.active(later).unwrap().current_volume, 1.0);

        orch.set_emergency_mode(false);
        assert!(orch.active(id).unwrap().current_volume < 1.0);
    }

    #[test]
    fn mute_stops_non_exempt_sounds() {
        let (mut orch, _sink) = orchestrator();
        let alert = orch.play(SoundKind::Alert, &no_fade(), 0).unwrap();
        let emergency = orch.play(SoundKind::Emergency, &no_fade(), 0).unwrap();
        orch.set_muted(true);
        assert!(orch.active(alert).is_none());
        assert!(orch.active(emergency).is_some());
    }

    #[test]
    fn volume_has_priority_floor() {
        let sink = RecordingSink::default();
        let mut orch = SoundOrchestrator::new(
            Box::new(sink),
            OrchestratorConfig {
                user_volume: 0.1,
                ..OrchestratorConfig::default()
            },
        );
        orch.initialize().unwrap();
        let warning = orch.play(SoundKind::Warning, &no_fade(), 0).unwrap();
        assert!((orch.active(warning).unwrap().current_volume - 0.3).abs() < 1e-6);
        let note = orch.play(SoundKind::Notification, &no_fade(), 0).unwrap();
        assert!((orch.active(note).unwrap().current_volume - 0.05).abs() < 1e-6);
    }

    #[test]
    fn fade_in_ramps_in_twenty_steps() {
        let (mut orch, sink) = orchestrator();
        let options = PlayOptions {
            fade_in_ms: Some(2_000),
            volume: Some(1.0),
            ..PlayOptions::default()
        };
        let id = orch.play(SoundKind::Alert, &options, 0).unwrap();
        assert_eq!(orch.active(id).unwrap().current_volume, 0.0);
        for t in (100..=2_000).step_by(100) {
            orch.tick(t);
        }
        let volumes: Vec<f32> = sink
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Volume(_, v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(volumes.len(), 20);
        assert!((volumes[19] - 0.8).abs() < 1e-6);
        assert!(orch.active(id).unwrap().fade.is_none());
    }

    #[test]
    fn fade_out_stops_at_end() {
        let (mut orch, _sink) = orchestrator();
        let id = orch.play(SoundKind::Alarm, &no_fade(), 0).unwrap();
        assert!(orch.fade_out(id, 1_000, 0));
        orch.tick(500);
        assert!(orch.active(id).is_some());
        orch.tick(1_000);
        assert!(orch.active(id).is_none());
    }

    #[test]
    fn repeats_with_delay_then_retires() {
        let (mut orch, sink) = orchestrator();
        let options = PlayOptions {
            repeat_count: 1,
            repeat_delay_ms: 300,
            ..no_fade()
        };
        let id = orch.play(SoundKind::Alert, &options, 0).unwrap();
        orch.on_playback_complete(id, 1_000);
        assert_eq!(
            orch.active(id).map(|s| s.state),
            Some(PlaybackState::PausedForRepeatDelay { resume_at_ms: 1_300 })
        );
        orch.tick(1_300);
        assert_eq!(orch.active(id).map(|s| s.state), Some(PlaybackState::Playing));
        orch.on_playback_complete(id, 2_300);
        assert!(orch.active(id).is_none());

        let starts = sink.calls().into_iter().filter(|c| matches!(c, Call::Start(..))).count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn silent_sink_one_shots_retire_after_their_pass() {
        let (mut orch, sink) = orchestrator();
        for t in 0..3 {
            orch.play(SoundKind::Notification, &no_fade(), t).unwrap();
        }
        let siren = orch.play(SoundKind::Alarm, &no_fade(), 3).unwrap();
        assert_eq!(orch.active_count(), 3);

        orch.begin_tick();
        orch.tick(1_000);
        assert_eq!(orch.active_count(), 3);

        orch.tick(86_400_000);
        assert_eq!(orch.active_count(), 1);
        assert!(orch.active(siren).is_some());
        let stops = sink.calls().into_iter().filter(|c| matches!(c, Call::Stop(_))).count();
        // One preempted notification, two retired.
        assert_eq!(stops, 3);
        assert!(orch.play(SoundKind::Notification, &no_fade(), 86_400_001).is_some());
    }

    #[test]
    fn retired_pass_still_honours_repeats() {
        let (mut orch, sink) = orchestrator();
        let options = PlayOptions {
            repeat_count: 1,
            repeat_delay_ms: 500,
            ..no_fade()
        };
        let id = orch.play(SoundKind::Notification, &options, 0).unwrap();
        orch.tick(1_500);
        assert_eq!(
            orch.active(id).map(|s| s.state),
            Some(PlaybackState::PausedForRepeatDelay { resume_at_ms: 2_000 })
        );
        orch.tick(2_000);
        assert_eq!(orch.active(id).map(|s| s.state), Some(PlaybackState::Playing));
        orch.tick(3_499);
        assert!(orch.active(id).is_some());
        orch.tick(3_500);
        assert!(orch.active(id).is_none());
        let starts = sink.calls().into_iter().filter(|c| matches!(c, Call::Start(..))).count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn custom_sound_uses_declared_duration() -> Result<()> {
        let mut store = InMemoryMonitorStore::new();
        let mut chime = CustomSound::new("chime", vec![7], &[SoundTrigger::MotionDetected]);
        chime.duration_ms = Some(800);
        store.save_custom_sound(&chime)?;
        let mut orch = SoundOrchestrator::new(Box::new(RecordingSink::default()), OrchestratorConfig::default())
            .with_store(Arc::new(Mutex::new(store)));
        orch.initialize()?;

        let ids = orch.play_for_trigger(SoundTrigger::MotionDetected, &PlayOptions::default(), 0);
        assert_eq!(ids.len(), 1);
        orch.tick(799);
        assert!(orch.active(ids[0]).is_some());
        orch.tick(800);
        assert!(orch.active(ids[0]).is_none());
        Ok(())
    }

    #[test]
    fn user_volume_rescales_active_sounds() {
        let (mut orch, sink) = orchestrator();
        let id = orch.play(SoundKind::Notification, &no_fade(), 0).unwrap();
        assert!((orch.active(id).unwrap().current_volume - 0.4).abs() < 1e-6);

        orch.set_user_volume(0.4);
        assert!((orch.user_volume() - 0.4).abs() < 1e-6);
        let sound = orch.active(id).unwrap();
        assert!((sound.target_volume - 0.2).abs() < 1e-6);
        assert!((sound.current_volume - 0.2).abs() < 1e-6);
        let pushed = sink.calls().into_iter().any(|c| match c {
            Call::Volume(v_id, v) => v_id == id && (v - 0.2).abs() < 1e-6,
            _ => false,
        });
        assert!(pushed);

        // New sounds pick up the new master volume too.
        let next = orch.play(SoundKind::Notification, &no_fade(), 1).unwrap();
        assert!((orch.active(next).unwrap().current_volume - 0.2).abs() < 1e-6);
    }

    #[test]
    fn fixed_volume_skips_master_and_floor() {
        let (mut orch, sink) = orchestrator();
        let loud = PlayOptions {
            volume: Some(1.0),
            fixed_volume: true,
            ..no_fade()
        };
        let id = orch.play(SoundKind::Alarm, &loud, 0).unwrap();
        assert_eq!(sink.calls(), vec![Call::Start(id, "alarm".to_string(), 1.0, true)]);

        let soft = PlayOptions {
            volume: Some(0.2),
            ..loud
        };
        let id = orch.play(SoundKind::Alarm, &soft, 1).unwrap();
        // Below the alarm floor of 0.5, as configured.
        assert!((orch.active(id).unwrap().current_volume - 0.2).abs() < 1e-6);

        orch.set_user_volume(0.4);
        assert!((orch.active(id).unwrap().current_volume - 0.2).abs() < 1e-6);
    }

    #[test]
    fn sink_failure_is_recoverable() {
        let sink = RecordingSink {
            fail_start: true,
            ..RecordingSink::default()
        };
        let mut orch = SoundOrchestrator::new(Box::new(sink), OrchestratorConfig::default());
        orch.initialize().unwrap();
        assert!(orch.play(SoundKind::Alarm, &no_fade(), 0).is_none());
        assert_eq!(orch.active_count(), 0);
    }

    #[test]
    fn custom_sounds_play_by_priority_and_count_plays() -> Result<()> {
        let mut store = InMemoryMonitorStore::new();
        let low = CustomSound::new("chirp", vec![1], &[SoundTrigger::PetDetected]).with_priority(2);
        let high = CustomSound::new("bark", vec![2], &[SoundTrigger::PetDetected]).with_priority(9);
        let mut disabled = CustomSound::new("off", vec![3], &[SoundTrigger::PetDetected]);
        disabled.enabled = false;
        for s in [&low, &high, &disabled] {
            store.save_custom_sound(s)?;
        }
        let store: SharedStore = Arc::new(Mutex::new(store));

        let sink = RecordingSink::default();
        let mut orch = SoundOrchestrator::new(Box::new(sink.clone()), OrchestratorConfig::default())
            .with_store(store.clone());
        orch.initialize()?;
        orch.begin_tick();

        let ids = orch.play_for_trigger(SoundTrigger::PetDetected, &PlayOptions::default(), 42);
        assert_eq!(ids.len(), 2);
        let order: Vec<String> = sink
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(_, label, _, _) => Some(label),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![high.id.clone(), low.id.clone()]);

        let stored = store.lock().unwrap().custom_sounds_for_trigger(SoundTrigger::PetDetected)?;
        let bark = stored.iter().find(|s| s.id == high.id).unwrap();
        assert_eq!(bark.play_count, 1);
        assert_eq!(bark.last_played_at_ms, Some(42));

        assert!(orch.play_for_trigger(SoundTrigger::Emergency, &PlayOptions::default(), 43).is_empty());
        Ok(())
    }
}
