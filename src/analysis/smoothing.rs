use std::collections::VecDeque;

/// Minimum history length before a spike can be judged.
pub const MIN_SPIKE_HISTORY: usize = 5;

/// Fixed-window running average.
///
/// Used by both analyzers: motion scores and audio levels are noisy from one tick
/// to the next, and alerting on the raw value would flap.
#[derive(Clone, Debug)]
pub struct SignalSmoother {
    window: usize,
    values: VecDeque<f32>,
}

impl SignalSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            values: VecDeque::with_capacity(window),
        }
    }

    /// Push a sample and return the running average over the window.
    pub fn add(&mut self, value: f32) -> f32 {
        let value = if value.is_finite() { value } else { 0.0 };
        if self.values.len() == self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.average()
    }

    pub fn average(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    /// Samples currently in the window, oldest first.
    pub fn history(&self) -> Vec<f32> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

/// Spike over baseline.
///
/// The last sample is compared against the mean of every sample before it. A
/// baseline at or below `min_baseline` never yields a spike: multiplying near-zero
/// noise is not a signal.
pub fn detect_sudden_change(history: &[f32], spike_threshold: f32, min_baseline: f32) -> bool {
    if history.len() < MIN_SPIKE_HISTORY {
        return false;
    }
    let (last, prior) = match history.split_last() {
        Some(split) => split,
        None => return false,
    };
    let baseline = prior.iter().sum::<f32>() / prior.len() as f32;
    baseline > min_baseline && *last > spike_threshold * baseline
}
