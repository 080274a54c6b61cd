//! Raw media isolation layer.
//!
//! - `Frame`: Opaque container for raw pixel data. Bytes are private.
//! - `InferenceView`: Restricted view handed to detector backends.
//! - `AudioSample`: One analyser window of frequency-bin magnitudes.
//!
//! Frames are ephemeral: they are owned by the tick that processes them and are
//! zeroized on drop. The motion analyzer keeps a derived luminance plane for one
//! comparison, never the frame itself.

use anyhow::Result;
use zeroize::Zeroize;

use crate::detect::{DetectionResult, DetectorBackend};
use crate::ingest::normalize::{expected_len, luminance_plane};

/// Maximum accepted frame edge, in pixels.
pub const MAX_FRAME_EDGE: u32 = 4096;

/// Pixel layout of a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Gray8,
    Nv12,
}

// ----------------------------------------------------------------------------
// Frame: Opaque raw media container
// ----------------------------------------------------------------------------

/// Opaque raw frame. There is no `.as_bytes()`, no `Clone`, no `Serialize`.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Capture time, milliseconds since the Unix epoch.
    pub captured_at_ms: u64,

    /// Per-source sequence number.
    pub sequence: u64,
}

impl Frame {
    /// Wrap captured pixels. Fails when the buffer does not match the dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at_ms: u64,
        sequence: u64,
    ) -> Result<Self> {
        if width == 0 || height == 0 || width > MAX_FRAME_EDGE || height > MAX_FRAME_EDGE {
            anyhow::bail!("frame dimensions {}x{} out of range", width, height);
        }
        let expected = expected_len(width, height, format)?;
        if data.len() != expected {
            anyhow::bail!(
                "frame length mismatch: expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                format,
                data.len()
            );
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            captured_at_ms,
            sequence,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Per-pixel luminance (0.299R + 0.587G + 0.114B), row-major.
    pub fn luminance(&self) -> Vec<f32> {
        // Length was validated at construction.
        luminance_plane(&self.data, self.width, self.height, self.format).unwrap_or_default()
    }

    /// Opaque reference recorded in intrusion history.
    pub fn frame_ref(&self) -> String {
        format!("frame:{}:{}", self.captured_at_ms, self.sequence)
    }

    /// Detector backends get a restricted view, not the frame.
    pub fn inference_view(&self) -> InferenceView<'_> {
        InferenceView { frame: self }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("captured_at_ms", &self.captured_at_ms)
            .field("sequence", &self.sequence)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// InferenceView: Restricted interface for detector backends
// ----------------------------------------------------------------------------

/// Restricted view of a frame for inference.
///
/// Pixels flow into the backend; only detections flow out.
pub struct InferenceView<'a> {
    frame: &'a Frame,
}

impl<'a> InferenceView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn format(&self) -> PixelFormat {
        self.frame.format
    }

    pub fn run_detector(&self, backend: &mut dyn DetectorBackend) -> Result<DetectionResult> {
        backend.detect(
            &self.frame.data,
            self.frame.width,
            self.frame.height,
            self.frame.format,
        )
    }
}

// ----------------------------------------------------------------------------
// AudioSample
// ----------------------------------------------------------------------------

/// One analyser window: byte magnitudes (0..=255) for `fft_size / 2` bins.
#[derive(Clone, Debug)]
pub struct AudioSample {
    pub spectrum: Vec<u8>,
    pub sample_rate: u32,
    pub fft_size: usize,
    pub captured_at_ms: u64,
}

impl AudioSample {
    pub fn new(spectrum: Vec<u8>, sample_rate: u32, fft_size: usize, captured_at_ms: u64) -> Self {
        Self {
            spectrum,
            sample_rate,
            fft_size,
            captured_at_ms,
        }
    }

    /// Hz covered by one bin. Zero when the window is malformed.
    pub fn bin_width(&self) -> f32 {
        if self.fft_size == 0 {
            return 0.0;
        }
        self.sample_rate as f32 / self.fft_size as f32
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_length_mismatch() {
        assert!(Frame::new(vec![0u8; 11], 2, 2, PixelFormat::Rgb24, 0, 0).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24, 0, 0).is_ok());
    }

    #[test]
    fn frame_rejects_zero_dimensions() {
        assert!(Frame::new(Vec::new(), 0, 4, PixelFormat::Gray8, 0, 0).is_err());
    }

    #[test]
    fn luminance_uses_weighted_sum() -> Result<()> {
        let frame = Frame::new(vec![255, 0, 0, 0, 255, 0], 2, 1, PixelFormat::Rgb24, 0, 0)?;
        let luma = frame.luminance();
        assert!((luma[0] - 0.299 * 255.0).abs() < 1e-3);
        assert!((luma[1] - 0.587 * 255.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn frame_ref_is_stable_for_a_frame() -> Result<()> {
        let frame = Frame::new(vec![0u8; 4], 2, 2, PixelFormat::Gray8, 1_000, 7)?;
        assert_eq!(frame.frame_ref(), "frame:1000:7");
        Ok(())
    }

    #[test]
    fn bin_width_handles_zero_fft() {
        let sample = AudioSample::new(vec![0; 4], 44_100, 0, 0);
        assert_eq!(sample.bin_width(), 0.0);
        let sample = AudioSample::new(vec![0; 1024], 44_100, 2048, 0);
        assert!((sample.bin_width() - 21.533).abs() < 0.01);
    }
}
