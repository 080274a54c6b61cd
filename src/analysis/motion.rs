//! Frame-difference motion scoring.
//!
//! Scores are fractions of pixels whose luminance moved by more than the scenario's
//! pixel-difference threshold. Only the previous frame's luminance plane is kept;
//! frames themselves are dropped (and zeroized) by the caller after `analyze`.

use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::Scenario;

use super::smoothing::{detect_sudden_change, SignalSmoother};

/// Noise floor for per-cell region scores.
pub const REGION_NOISE_FLOOR: f32 = 0.01;

const MIN_OVERALL_THRESHOLD: f32 = 0.005;
const MAX_OVERALL_THRESHOLD: f32 = 0.5;

// ----------------------------------------------------------------------------
// Thresholds
// ----------------------------------------------------------------------------

/// Per-scenario motion parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionThresholds {
    /// Luminance delta (0..255) above which a pixel counts as changed.
    pub pixel_difference_threshold: f32,
    /// Score above which motion is considered significant.
    pub overall_motion_threshold: f32,
    /// Sensitivity (1..=100) the overall threshold was derived from.
    pub sensitivity: i32,
    pub center_weight: f32,
    pub spike_threshold: f32,
    pub min_baseline: f32,
    pub smoothing_window: usize,
    /// Region grid edge. 0 disables region scoring.
    pub region_grid: usize,
}

impl MotionThresholds {
    /// The single threshold table.
    pub fn for_scenario(scenario: Scenario) -> Self {
        let (pixel_difference_threshold, sensitivity, center_weight, spike_threshold) =
            match scenario {
                Scenario::Baby => (15.0, 94, 1.0, 2.5),
                Scenario::Elderly => (25.0, 90, 0.5, 3.0),
                Scenario::Pet => (30.0, 80, 0.5, 3.0),
                Scenario::Security => (30.0, 84, 0.25, 3.0),
                Scenario::General => (30.0, 80, 0.5, 3.0),
            };
        Self {
            pixel_difference_threshold,
            overall_motion_threshold: sensitivity_to_threshold(sensitivity),
            sensitivity,
            center_weight,
            spike_threshold,
            min_baseline: 0.005,
            smoothing_window: 5,
            region_grid: 4,
        }
    }

    /// Re-derive the overall threshold from a user sensitivity.
    pub fn with_sensitivity(mut self, sensitivity: i32) -> Self {
        self.sensitivity = sensitivity.clamp(1, 100);
        self.overall_motion_threshold = sensitivity_to_threshold(sensitivity);
        self
    }

    /// Clamp every field into its valid range.
    pub fn clamped(mut self) -> Self {
        self.pixel_difference_threshold = finite_or(self.pixel_difference_threshold, 30.0)
            .clamp(0.0, 255.0);
        self.overall_motion_threshold = finite_or(self.overall_motion_threshold, 0.1)
            .clamp(MIN_OVERALL_THRESHOLD, MAX_OVERALL_THRESHOLD);
        self.sensitivity = self.sensitivity.clamp(1, 100);
        self.center_weight = finite_or(self.center_weight, 0.0).clamp(0.0, 10.0);
        self.spike_threshold = finite_or(self.spike_threshold, 3.0).max(1.0);
        self.min_baseline = finite_or(self.min_baseline, 0.0).max(0.0);
        self.smoothing_window = self.smoothing_window.clamp(1, 300);
        self.region_grid = self.region_grid.min(16);
        self
    }
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self::for_scenario(Scenario::General)
    }
}

/// Linear map from sensitivity (1..=100) onto the overall threshold.
///
/// 100 is most sensitive. Out-of-range input is clamped.
pub fn sensitivity_to_threshold(sensitivity: i32) -> f32 {
    let s = sensitivity.clamp(1, 100) as f32;
    (0.5 * (100.0 - s) / 100.0).clamp(MIN_OVERALL_THRESHOLD, MAX_OVERALL_THRESHOLD)
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

// ----------------------------------------------------------------------------
// Scoring
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub score: f32,
}

/// A luminance plane retained between ticks.
#[derive(Clone, Debug)]
struct LumaPlane {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl LumaPlane {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            values: frame.luminance(),
        }
    }

    fn comparable(&self, other: &LumaPlane) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.values.len() == other.values.len()
            && !self.values.is_empty()
    }
}

/// Fraction of changed pixels. Mismatched dimensions score 0.
pub fn detect_motion(prev: &Frame, curr: &Frame, thresholds: &MotionThresholds) -> f32 {
    if !prev.same_dimensions(curr) {
        return 0.0;
    }
    plane_score(
        &LumaPlane::from_frame(prev),
        &LumaPlane::from_frame(curr),
        thresholds.pixel_difference_threshold,
    )
}

/// Changed-pixel fraction with pixels weighted toward the frame center.
pub fn calculate_motion_score(prev: &Frame, curr: &Frame, thresholds: &MotionThresholds) -> f32 {
    if !prev.same_dimensions(curr) {
        return 0.0;
    }
    weighted_plane_score(
        &LumaPlane::from_frame(prev),
        &LumaPlane::from_frame(curr),
        thresholds.pixel_difference_threshold,
        thresholds.center_weight,
    )
}

/// Per-cell scores on a `grid`×`grid` partition, noise-floored, highest first.
pub fn detect_motion_regions(
    prev: &Frame,
    curr: &Frame,
    thresholds: &MotionThresholds,
    grid: usize,
) -> Vec<MotionRegion> {
    if !prev.same_dimensions(curr) {
        return Vec::new();
    }
    plane_regions(
        &LumaPlane::from_frame(prev),
        &LumaPlane::from_frame(curr),
        thresholds.pixel_difference_threshold,
        grid,
    )
}

fn changed(a: f32, b: f32, threshold: f32) -> bool {
    (a - b).abs() > threshold
}

fn plane_score(prev: &LumaPlane, curr: &LumaPlane, threshold: f32) -> f32 {
    if !prev.comparable(curr) {
        return 0.0;
    }
    let changed_count = prev
        .values
        .iter()
        .zip(&curr.values)
        .filter(|(a, b)| changed(**a, **b, threshold))
        .count();
    changed_count as f32 / prev.values.len() as f32
}

fn weighted_plane_score(
    prev: &LumaPlane,
    curr: &LumaPlane,
    threshold: f32,
    center_weight: f32,
) -> f32 {
    if !prev.comparable(curr) {
        return 0.0;
    }
    let width = prev.width as usize;
    let cx = prev.width as f32 / 2.0;
    let cy = prev.height as f32 / 2.0;
    let half_diagonal = (cx * cx + cy * cy).sqrt().max(f32::EPSILON);

    let mut total = 0.0f32;
    let mut moved = 0.0f32;
    for (idx, (a, b)) in prev.values.iter().zip(&curr.values).enumerate() {
        let x = (idx % width) as f32 + 0.5;
        let y = (idx / width) as f32 + 0.5;
        let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() / half_diagonal;
        let w = 1.0 / (1.0 + center_weight * d.min(1.0));
        total += w;
        if changed(*a, *b, threshold) {
            moved += w;
        }
    }
    if total <= 0.0 {
        return 0.0;
    }
    (moved / total).clamp(0.0, 1.0)
}

fn plane_regions(prev: &LumaPlane, curr: &LumaPlane, threshold: f32, grid: usize) -> Vec<MotionRegion> {
    if !prev.comparable(curr) || grid == 0 {
        return Vec::new();
    }
    let width = prev.width;
    let height = prev.height;
    let grid = (grid as u32).min(width).min(height).max(1);
    let cell_w = width / grid;
    let cell_h = height / grid;

    let mut regions = Vec::new();
    for gy in 0..grid {
        for gx in 0..grid {
            let x0 = gx * cell_w;
            let y0 = gy * cell_h;
            // The last row/column absorbs the remainder.
            let x1 = if gx + 1 == grid { width } else { x0 + cell_w };
            let y1 = if gy + 1 == grid { height } else { y0 + cell_h };

            let mut count = 0usize;
            let mut moved = 0usize;
            for y in y0..y1 {
                let row = (y * width) as usize;
                for x in x0..x1 {
                    let idx = row + x as usize;
                    count += 1;
                    if changed(prev.values[idx], curr.values[idx], threshold) {
                        moved += 1;
                    }
                }
            }
            if count == 0 {
                continue;
            }
            let score = moved as f32 / count as f32;
            if score > REGION_NOISE_FLOOR {
                regions.push(MotionRegion {
                    x: x0,
                    y: y0,
                    w: x1 - x0,
                    h: y1 - y0,
                    score,
                });
            }
        }
    }
    regions.sort_by(|a, b| b.score.total_cmp(&a.score));
    regions
}

// ----------------------------------------------------------------------------
// Per-stream analyzer
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MotionReading {
    /// Raw changed-pixel fraction against the previous frame.
    pub score: f32,
    /// Center-weighted variant of `score`.
    pub weighted_score: f32,
    /// Running average over the smoothing window.
    pub smoothed: f32,
    pub regions: Vec<MotionRegion>,
    /// Latest score spiked over the recent baseline.
    pub sudden: bool,
}

/// Owns the previous luminance plane and smoothing history for one stream.
pub struct MotionAnalyzer {
    thresholds: MotionThresholds,
    previous: Option<LumaPlane>,
    smoother: SignalSmoother,
}

impl MotionAnalyzer {
    pub fn new(thresholds: MotionThresholds) -> Self {
        let thresholds = thresholds.clamped();
        let smoother = SignalSmoother::new(thresholds.smoothing_window);
        Self {
            thresholds,
            previous: None,
            smoother,
        }
    }

    pub fn thresholds(&self) -> &MotionThresholds {
        &self.thresholds
    }

    /// Replace thresholds. History is dropped since it was scored differently.
    pub fn set_thresholds(&mut self, thresholds: MotionThresholds) {
        self.thresholds = thresholds.clamped();
        self.smoother = SignalSmoother::new(self.thresholds.smoothing_window);
        self.previous = None;
    }

    /// Score `frame` against the previous one, then retain its luminance plane.
    ///
    /// The first frame (and any frame whose dimensions differ from the previous one)
    /// scores 0.
    pub fn analyze(&mut self, frame: &Frame) -> MotionReading {
        let current = LumaPlane::from_frame(frame);
        let t = &self.thresholds;

        let (score, weighted_score, regions) = match &self.previous {
            Some(prev) if prev.comparable(&current) => (
                plane_score(prev, &current, t.pixel_difference_threshold),
                weighted_plane_score(prev, &current, t.pixel_difference_threshold, t.center_weight),
                plane_regions(prev, &current, t.pixel_difference_threshold, t.region_grid),
            ),
            Some(_) => {
                log::debug!(
                    "motion: frame {}x{} not comparable with previous, scoring 0",
                    frame.width,
                    frame.height
                );
                (0.0, 0.0, Vec::new())
            }
            None => (0.0, 0.0, Vec::new()),
        };

        let smoothed = self.smoother.add(score);
        let sudden = detect_sudden_change(
            &self.smoother.history(),
            self.thresholds.spike_threshold,
            self.thresholds.min_baseline,
        );
        self.previous = Some(current);

        MotionReading {
            score,
            weighted_score,
            smoothed,
            regions,
            sudden,
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.smoother.reset();
    }
}
