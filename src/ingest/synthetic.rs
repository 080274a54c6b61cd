//! Synthetic capture source for tests and demos.
//!
//! Simulates a mostly static scene:
//! - Every `motion_every_frames` frames a bright block moves across the frame
//! - Every `cry_every_windows` audio windows a cry-shaped spectrum is emitted for a
//!   few consecutive windows

use anyhow::Result;
use rand::Rng;

use crate::frame::{AudioSample, Frame, PixelFormat};

use super::{CaptureSource, CaptureStats};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub fft_size: usize,
    /// 0 disables synthetic motion.
    pub motion_every_frames: u64,
    /// 0 disables synthetic crying.
    pub cry_every_windows: u64,
    pub cry_windows: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic://nursery".to_string(),
            width: 160,
            height: 120,
            sample_rate: 44_100,
            fft_size: 2048,
            motion_every_frames: 50,
            cry_every_windows: 200,
            cry_windows: 30,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    audio_count: u64,
    block_x: u32,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!("SyntheticSource: connected to {}", config.name);
        Self {
            config,
            frame_count: 0,
            audio_count: 0,
            block_x: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width;
        let height = self.config.height;
        let mut pixels = vec![40u8; (width * height) as usize];

        let moving = self.config.motion_every_frames > 0
            && self.frame_count % self.config.motion_every_frames < 5;
        if moving {
            self.block_x = (self.block_x + width / 8).min(width.saturating_sub(width / 4));
            if self.block_x + width / 4 >= width {
                self.block_x = 0;
            }
        }

        let block_w = (width / 4).max(1);
        let block_h = (height / 4).max(1);
        let top = height / 2 - block_h / 2;
        for y in top..(top + block_h).min(height) {
            for x in self.block_x..(self.block_x + block_w).min(width) {
                pixels[(y * width + x) as usize] = 220;
            }
        }
        pixels
    }
}

impl CaptureSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn next_frame(&mut self, now_ms: u64) -> Result<Option<Frame>> {
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Gray8,
            now_ms,
            self.frame_count,
        )?;
        Ok(Some(frame))
    }

    fn next_audio(&mut self, now_ms: u64) -> Result<Option<AudioSample>> {
        self.audio_count += 1;
        let crying = self.config.cry_every_windows > 0
            && self.audio_count % self.config.cry_every_windows < self.config.cry_windows;
        let spectrum = if crying {
            cry_spectrum(self.config.sample_rate, self.config.fft_size)
        } else {
            quiet_spectrum(self.config.fft_size)
        };
        Ok(Some(AudioSample::new(
            spectrum,
            self.config.sample_rate,
            self.config.fft_size,
            now_ms,
        )))
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            audio_windows: self.audio_count,
            source: self.config.name.clone(),
        }
    }
}

/// Low-level room noise.
pub fn quiet_spectrum(fft_size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..fft_size / 2).map(|_| rng.gen_range(0..12u8)).collect()
}

/// A harmonically structured spectrum with its fundamental at 450 Hz.
pub fn cry_spectrum(sample_rate: u32, fft_size: usize) -> Vec<u8> {
    let bins = fft_size / 2;
    let mut spectrum = vec![8u8; bins];
    if sample_rate == 0 || fft_size == 0 {
        return spectrum;
    }
    let bin_width = sample_rate as f32 / fft_size as f32;
    let mut place = |hz: f32, magnitude: u8| {
        let idx = (hz / bin_width).round() as usize;
        if idx < bins {
            spectrum[idx] = magnitude;
        }
    };
    for hz in [320.0, 360.0, 400.0, 500.0, 540.0, 580.0] {
        place(hz, 150);
    }
    place(450.0, 200);
    place(900.0, 100);
    place(1350.0, 70);
    spectrum
}
