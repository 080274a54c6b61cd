//! Signal analysis: per-stream motion and audio analyzers.
//!
//! Analyzers are plain owned state. One instance per monitored stream; nothing is
//! shared between streams.

pub mod audio;
pub mod motion;
pub mod smoothing;

pub use audio::{
    classify_elderly_sound, classify_pet_sound, detect_crying_pattern, detect_sudden_sound,
    get_audio_level, get_frequency_levels, AudioAnalyzer, AudioReading, AudioThresholds,
    CryAnalysis, CryDetector, CryPattern, FrequencyBands, SoundCategory,
};
pub use motion::{
    calculate_motion_score, detect_motion, detect_motion_regions, sensitivity_to_threshold,
    MotionAnalyzer, MotionReading, MotionRegion, MotionThresholds,
};
pub use smoothing::{detect_sudden_change, SignalSmoother};
