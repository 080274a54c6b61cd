use std::sync::Arc;

use super::{SoundId, SoundKind, SoundPayload};

#[derive(Clone, Debug, PartialEq)]
pub enum SoundSource {
    BuiltIn(SoundKind),
    /// Payload borrowed from the store for the life of the playback.
    Custom { sound_id: String, payload: Arc<[u8]> },
}

impl SoundSource {
    pub fn payload(&self) -> SoundPayload<'_> {
        match self {
            SoundSource::BuiltIn(kind) => SoundPayload::BuiltIn(*kind),
            SoundSource::Custom { sound_id, payload } => SoundPayload::Custom {
                sound_id,
                bytes: payload,
            },
        }
    }

    pub fn label(&self) -> String {
        match self {
            SoundSource::BuiltIn(kind) => kind.as_str().to_string(),
            SoundSource::Custom { sound_id, .. } => format!("custom:{}", sound_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    /// Silent gap between repeats.
    PausedForRepeatDelay { resume_at_ms: u64 },
    Finished,
}

/// Linear ramp in discrete steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fade {
    pub from: f32,
    pub to: f32,
    pub steps: u32,
    pub step: u32,
    pub step_ms: u64,
    pub next_step_at_ms: u64,
    /// Stop the sound once the ramp completes (fade-out).
    pub stop_at_end: bool,
}

impl Fade {
    /// `None` when there is nothing to ramp.
    pub fn new(from: f32, to: f32, duration_ms: u64, steps: u32, now_ms: u64, stop_at_end: bool) -> Option<Self> {
        let steps = steps.max(1);
        if duration_ms == 0 {
            return None;
        }
        let step_ms = (duration_ms / steps as u64).max(1);
        Some(Self {
            from,
            to,
            steps,
            step: 0,
            step_ms,
            next_step_at_ms: now_ms + step_ms,
            stop_at_end,
        })
    }

    pub fn volume(&self) -> f32 {
        self.from + (self.to - self.from) * (self.step as f32 / self.steps as f32)
    }

    pub fn is_done(&self) -> bool {
        self.step >= self.steps
    }

    /// Advance every step due by `now_ms`. Returns the new volume if it moved.
    pub fn advance(&mut self, now_ms: u64) -> Option<f32> {
        let mut moved = false;
        while !self.is_done() && now_ms >= self.next_step_at_ms {
            self.step += 1;
            self.next_step_at_ms += self.step_ms;
            moved = true;
        }
        moved.then(|| self.volume())
    }
}

/// Runtime record of one playback. Never persisted.
#[derive(Clone, Debug)]
pub struct ActiveSound {
    pub id: SoundId,
    pub source: SoundSource,
    /// Common scale: built-in rank × 2, custom priority as-is.
    pub priority: u8,
    pub started_at_ms: u64,
    pub looping: bool,
    pub repeats_remaining: u32,
    pub repeat_delay_ms: u64,
    pub pass_ms: u64,
    /// End of the current pass. Unset for looping sounds.
    pub pass_ends_at_ms: Option<u64>,
    /// Volume from policy, before any emergency override.
    pub target_volume: f32,
    /// Volume last sent to the sink.
    pub current_volume: f32,
    /// Exempt from master volume changes.
    pub fixed_volume: bool,
    pub mute_exempt: bool,
    pub fade: Option<Fade>,
    pub state: PlaybackState,
}

impl ActiveSound {
    pub fn is_finished(&self) -> bool {
        self.state == PlaybackState::Finished
    }

    /// The sink finished one pass.
    ///
    /// Looping sounds restart, sounds with repeats left pause for the repeat
    /// delay, everything else finishes.
    pub fn on_complete(&mut self, now_ms: u64) -> PlaybackState {
        self.pass_ends_at_ms = None;
        self.state = match self.state {
            PlaybackState::Finished => PlaybackState::Finished,
            _ if self.looping => PlaybackState::Playing,
            _ if self.repeats_remaining > 0 => {
                self.repeats_remaining -= 1;
                PlaybackState::PausedForRepeatDelay {
                    resume_at_ms: now_ms + self.repeat_delay_ms,
                }
            }
            _ => PlaybackState::Finished,
        };
        self.state
    }

    /// Start timing a new pass at `now_ms`.
    pub fn begin_pass(&mut self, now_ms: u64) {
        self.pass_ends_at_ms = (!self.looping).then(|| now_ms.saturating_add(self.pass_ms));
    }

    /// A non-looping pass has outlived its length.
    pub fn pass_elapsed(&self, now_ms: u64) -> bool {
        self.state == PlaybackState::Playing
            && !self.looping
            && self.pass_ends_at_ms.is_some_and(|end| now_ms >= end)
    }

    /// Leave the repeat gap once it has elapsed. Returns true when resumed.
    pub fn resume_if_due(&mut self, now_ms: u64) -> bool {
        match self.state {
            PlaybackState::PausedForRepeatDelay { resume_at_ms } if now_ms >= resume_at_ms => {
                self.state = PlaybackState::Playing;
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) {
        self.state = PlaybackState::Finished;
        self.fade = None;
    }
}
