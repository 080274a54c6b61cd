use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::PixelFormat;

/// Person/animal detector behind the inference boundary.
///
/// Implementations must not keep pixels past `detect`, write to disk, or reach the
/// network. A backend whose model has not finished loading reports `is_ready() ==
/// false` or returns `Err`; the monitor then runs that tick on motion and audio alone.
pub trait DetectorBackend: Send {
    fn name(&self) -> &'static str;

    fn is_ready(&self) -> bool {
        true
    }

    /// Labelled boxes for one frame. The pixel slice is read-only and ephemeral.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<DetectionResult>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
