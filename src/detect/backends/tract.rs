#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectedObject, DetectionResult};
use crate::frame::PixelFormat;

/// Values per output row: x, y, w, h, score, class index.
const ROW_LEN: usize = 6;

/// Tract-based backend for ONNX object detection.
///
/// Expects a model taking `1x3xHxW` RGB in 0..1 and producing rows of
/// `[x, y, w, h, score, class]` with normalized boxes. `labels` maps class indices
/// to names. No network I/O, no writes beyond model loading.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            width,
            height,
            confidence_threshold: 0.4,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }
        let stride = match format {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
            other => return Err(anyhow!("tract backend needs RGB input, got {:?}", other)),
        };

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * stride + channel;
                pixels.get(idx).copied().unwrap_or(0) as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_objects(&self, outputs: TVec<TValue>) -> Result<Vec<DetectedObject>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();

        let objects = flat
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[4] >= self.confidence_threshold)
            .filter_map(|row| {
                let class = row[5].max(0.0) as usize;
                let name = self.labels.get(class)?;
                Some(DetectedObject::new(
                    name.clone(),
                    row[4].min(1.0),
                    BoundingBox {
                        x: row[0],
                        y: row[1],
                        w: row[2],
                        h: row[3],
                    },
                ))
            })
            .collect();
        Ok(objects)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<DetectionResult> {
        let input = self.build_input(pixels, width, height, format)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionResult::new(self.extract_objects(outputs)?))
    }
}
