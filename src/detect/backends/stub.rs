use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectedObject, DetectionResult};
use crate::frame::PixelFormat;

/// Scripted backend for tests and the daemon's no-model mode.
///
/// Replays scripted results in order, then repeats the last one. With no script it
/// detects nothing.
pub struct StubBackend {
    name: &'static str,
    script: VecDeque<DetectionResult>,
    last: DetectionResult,
    loaded: bool,
    fails: bool,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            name: "stub",
            script: VecDeque::new(),
            last: DetectionResult::default(),
            loaded: true,
            fails: false,
            calls: 0,
        }
    }

    pub fn scripted(results: Vec<DetectionResult>) -> Self {
        Self {
            script: results.into(),
            ..Self::new()
        }
    }

    /// Always reports `count` people side by side at the given confidence.
    pub fn people(count: usize, confidence: f32) -> Self {
        let objects = (0..count)
            .map(|i| {
                let x = (i as f32 * 0.2).min(0.8);
                DetectedObject::new(
                    "person",
                    confidence,
                    BoundingBox {
                        x,
                        y: 0.2,
                        w: 0.15,
                        h: 0.6,
                    },
                )
            })
            .collect();
        Self {
            last: DetectionResult::new(objects),
            ..Self::new()
        }
    }

    /// A model that never finished loading.
    pub fn unavailable() -> Self {
        Self {
            loaded: false,
            fails: true,
            ..Self::new()
        }
    }

    /// Loaded, but every inference call errors.
    pub fn failing() -> Self {
        Self {
            fails: true,
            ..Self::new()
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_ready(&self) -> bool {
        self.loaded
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        _format: PixelFormat,
    ) -> Result<DetectionResult> {
        self.calls += 1;
        if !self.loaded {
            return Err(anyhow!("{}: model not loaded", self.name));
        }
        if self.fails {
            return Err(anyhow!("{}: inference failed", self.name));
        }
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_results_replay_then_repeat() -> Result<()> {
        let mut backend = StubBackend::scripted(vec![
            DetectionResult::default(),
            DetectionResult::new(vec![DetectedObject::new("dog", 0.8, BoundingBox::default())]),
        ]);
        assert!(backend.detect(&[], 1, 1, PixelFormat::Gray8)?.objects.is_empty());
        assert_eq!(backend.detect(&[], 1, 1, PixelFormat::Gray8)?.objects.len(), 1);
        assert_eq!(backend.detect(&[], 1, 1, PixelFormat::Gray8)?.objects.len(), 1);
        assert_eq!(backend.calls(), 3);
        Ok(())
    }

    #[test]
    fn unavailable_backend_is_not_ready_and_errors() {
        let mut backend = StubBackend::unavailable();
        assert!(!backend.is_ready());
        assert!(backend.detect(&[], 1, 1, PixelFormat::Gray8).is_err());
        assert!(StubBackend::failing().is_ready());
    }
}
