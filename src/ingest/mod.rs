//! Capture sources.
//!
//! The kernel never pulls from hardware directly. A `CaptureSource` supplies frames
//! and audio analyser windows at the configured interval:
//! - Synthetic source (testing, demos)
//! - Platform capture (camera/microphone) lives outside the kernel and implements
//!   the same trait
//!
//! Capture sources MUST NOT:
//! - Store raw frames to disk
//! - Retain frames beyond handoff to the monitor session

pub(crate) mod normalize;
pub mod synthetic;

use anyhow::Result;

use crate::frame::{AudioSample, Frame};

pub use synthetic::{cry_spectrum, quiet_spectrum, SyntheticConfig, SyntheticSource};

#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub audio_windows: u64,
    pub source: String,
}

/// Supplier of frames and audio windows for one monitored stream.
pub trait CaptureSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Next frame, or `None` when video is not available this tick.
    fn next_frame(&mut self, now_ms: u64) -> Result<Option<Frame>>;

    /// Next audio window, or `None` when audio is not available this tick.
    fn next_audio(&mut self, now_ms: u64) -> Result<Option<AudioSample>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> CaptureStats;
}
