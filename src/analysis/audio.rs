//! Spectrum analysis: level, band energies, cry detection, distress classifiers.
//!
//! Input is one analyser window of byte magnitudes (0..=255), `fft_size / 2` bins.
//! Level is always the frequency-domain RMS so that it lives on the same scale as
//! the band energies.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::frame::AudioSample;
use crate::Scenario;

use super::smoothing::{detect_sudden_change, SignalSmoother};

const MAX_MAGNITUDE: f32 = 255.0;

pub const CRY_BUFFER_LEN: usize = 20;
/// Positive share of a full buffer needed to assert crying, in percent.
pub const CRY_POSITIVE_PERCENT: usize = 60;

const CRY_BAND_HZ: (f32, f32) = (300.0, 600.0);
const CRY_BAND_RATIO: f32 = 1.5;
const HARMONIC_MIN_RATIO: f32 = 0.2;
const HARMONIC_MAX_RATIO: f32 = 0.8;
/// Fundamentals quieter than this are room noise.
const MIN_FUNDAMENTAL: u8 = 40;

// -------------------- Level & Bands --------------------

/// RMS of bin magnitudes, normalized to [0, 1].
pub fn get_audio_level(spectrum: &[u8]) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = spectrum.iter().map(|&m| (m as f64) * (m as f64)).sum();
    let rms = (sum_sq / spectrum.len() as f64).sqrt() as f32;
    (rms / MAX_MAGNITUDE).clamp(0.0, 1.0)
}

/// Band energies, each the mean bin magnitude in its range over 255.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBands {
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub high: f32,
}

impl FrequencyBands {
    pub const BASS_HZ: (f32, f32) = (20.0, 250.0);
    pub const LOW_MID_HZ: (f32, f32) = (250.0, 500.0);
    pub const MID_HZ: (f32, f32) = (500.0, 2000.0);
    pub const HIGH_MID_HZ: (f32, f32) = (2000.0, 4000.0);
    pub const HIGH_HZ: (f32, f32) = (4000.0, 20000.0);
}

pub fn get_frequency_levels(spectrum: &[u8], sample_rate: u32, fft_size: usize) -> FrequencyBands {
    let Some(bin_width) = bin_width(sample_rate, fft_size) else {
        return FrequencyBands::default();
    };
    let band = |range: (f32, f32)| band_average(spectrum, bin_width, range) / MAX_MAGNITUDE;
    FrequencyBands {
        bass: band(FrequencyBands::BASS_HZ),
        low_mid: band(FrequencyBands::LOW_MID_HZ),
        mid: band(FrequencyBands::MID_HZ),
        high_mid: band(FrequencyBands::HIGH_MID_HZ),
        high: band(FrequencyBands::HIGH_HZ),
    }
}

fn bin_width(sample_rate: u32, fft_size: usize) -> Option<f32> {
    if sample_rate == 0 || fft_size == 0 {
        return None;
    }
    Some(sample_rate as f32 / fft_size as f32)
}

fn in_range(idx: usize, bin_width: f32, (lo, hi): (f32, f32)) -> bool {
    let hz = idx as f32 * bin_width;
    hz >= lo && hz < hi
}

/// Mean raw magnitude over bins whose frequency falls in `[lo, hi)`.
fn band_average(spectrum: &[u8], bin_width: f32, range: (f32, f32)) -> f32 {
    let (sum, count) = spectrum
        .iter()
        .enumerate()
        .filter(|(idx, _)| in_range(*idx, bin_width, range))
        .fold((0.0f32, 0usize), |(s, c), (_, &m)| (s + m as f32, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

// -------------------- Cry Pattern --------------------

/// Energy concentrated in 300–600 Hz with a harmonic series above it.
pub fn detect_crying_pattern(spectrum: &[u8], sample_rate: u32, fft_size: usize) -> bool {
    let Some(bin_width) = bin_width(sample_rate, fft_size) else {
        return false;
    };

    let mut inside = (0.0f32, 0usize);
    let mut outside = (0.0f32, 0usize);
    let mut fundamental: Option<(usize, u8)> = None;
    for (idx, &m) in spectrum.iter().enumerate() {
        if in_range(idx, bin_width, CRY_BAND_HZ) {
            inside = (inside.0 + m as f32, inside.1 + 1);
            if fundamental.map_or(true, |(_, peak)| m > peak) {
                fundamental = Some((idx, m));
            }
        } else {
            outside = (outside.0 + m as f32, outside.1 + 1);
        }
    }

    let Some((f_idx, f_mag)) = fundamental else {
        return false;
    };
    if f_mag < MIN_FUNDAMENTAL || inside.1 == 0 {
        return false;
    }

    let inside_avg = inside.0 / inside.1 as f32;
    let outside_avg = if outside.1 == 0 {
        0.0
    } else {
        outside.0 / outside.1 as f32
    };
    // A silent remainder counts as dominance.
    let dominant = outside_avg <= f32::EPSILON || inside_avg / outside_avg > CRY_BAND_RATIO;
    dominant && has_harmonic(spectrum, f_idx, f_mag)
}

fn has_harmonic(spectrum: &[u8], fundamental_idx: usize, fundamental_mag: u8) -> bool {
    [2usize, 3].iter().any(|&n| {
        let center = fundamental_idx * n;
        if center >= spectrum.len() {
            return false;
        }
        let lo = center.saturating_sub(1);
        let hi = (center + 1).min(spectrum.len() - 1);
        let peak = spectrum[lo..=hi].iter().copied().max().unwrap_or(0);
        let ratio = peak as f32 / fundamental_mag as f32;
        (HARMONIC_MIN_RATIO..=HARMONIC_MAX_RATIO).contains(&ratio)
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryPattern {
    #[default]
    None,
    Whimper,
    Cry,
    Scream,
}

impl CryPattern {
    /// Bucket a level once crying is asserted.
    pub fn from_level(level: f32) -> Self {
        if level < 0.3 {
            CryPattern::Whimper
        } else if level < 0.6 {
            CryPattern::Cry
        } else {
            CryPattern::Scream
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CryAnalysis {
    pub is_crying: bool,
    pub confidence: f32,
    pub pattern: CryPattern,
    pub duration_ms: u64,
}

/// Debounces per-window cry flags over a rolling buffer.
///
/// Owned per stream. Must be reset when the scenario changes.
#[derive(Clone, Debug)]
pub struct CryDetector {
    flags: VecDeque<bool>,
    crying_since: Option<u64>,
}

impl CryDetector {
    pub fn new() -> Self {
        Self {
            flags: VecDeque::with_capacity(CRY_BUFFER_LEN),
            crying_since: None,
        }
    }

    /// Record one window's flag and report whether crying is sustained.
    pub fn push(&mut self, is_cry_window: bool) -> bool {
        if self.flags.len() == CRY_BUFFER_LEN {
            self.flags.pop_front();
        }
        self.flags.push_back(is_cry_window);
        self.sustained()
    }

    fn sustained(&self) -> bool {
        if self.flags.len() < CRY_BUFFER_LEN {
            return false;
        }
        let positives = self.flags.iter().filter(|f| **f).count();
        positives * 100 >= CRY_POSITIVE_PERCENT * CRY_BUFFER_LEN
    }

    pub fn analyze(&mut self, sample: &AudioSample, now_ms: u64) -> CryAnalysis {
        let flag = detect_crying_pattern(&sample.spectrum, sample.sample_rate, sample.fft_size);
        if !self.push(flag) {
            self.crying_since = None;
            return CryAnalysis::default();
        }

        let since = *self.crying_since.get_or_insert(now_ms);
        let level = get_audio_level(&sample.spectrum);
        let bands = get_frequency_levels(&sample.spectrum, sample.sample_rate, sample.fft_size);
        CryAnalysis {
            is_crying: true,
            confidence: cry_confidence(&bands),
            pattern: CryPattern::from_level(level),
            duration_ms: now_ms.saturating_sub(since),
        }
    }

    pub fn reset(&mut self) {
        self.flags.clear();
        self.crying_since = None;
    }
}

impl Default for CryDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn cry_confidence(bands: &FrequencyBands) -> f32 {
    let denominator = bands.bass + bands.high;
    if denominator <= f32::EPSILON {
        return if bands.mid > 0.0 { 1.0 } else { 0.0 };
    }
    (bands.mid / denominator).min(1.0)
}

// -------------------- Distress Classifiers --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCategory {
    Quiet,
    Bark,
    Whine,
    Speech,
    Call,
    Distress,
}

impl SoundCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundCategory::Quiet => "quiet",
            SoundCategory::Bark => "bark",
            SoundCategory::Whine => "whine",
            SoundCategory::Speech => "speech",
            SoundCategory::Call => "call",
            SoundCategory::Distress => "distress",
        }
    }
}

fn ratio(num: f32, den: f32) -> f32 {
    if den <= f32::EPSILON {
        if num > 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (num / den).min(1.0)
    }
}

/// Pet vocalisations: bark is loud and low, whine is narrow and high.
pub fn classify_pet_sound(level: f32, bands: &FrequencyBands) -> (SoundCategory, f32) {
    let low = bands.bass + bands.low_mid;
    let upper = bands.high_mid + bands.high;
    if level < 0.1 {
        return (SoundCategory::Quiet, 1.0 - level * 10.0);
    }
    if level > 0.7 && upper > bands.mid {
        return (SoundCategory::Distress, level.min(1.0));
    }
    if level > 0.4 && low > bands.mid + bands.high {
        return (SoundCategory::Bark, ratio(low, low + bands.mid + bands.high).max(0.5));
    }
    if level > 0.2 && bands.mid + bands.high_mid > low {
        return (SoundCategory::Whine, ratio(bands.mid + bands.high_mid, low + upper + bands.mid));
    }
    (SoundCategory::Quiet, 0.3)
}

/// Elderly room: conversation, a raised voice calling out, or distress.
pub fn classify_elderly_sound(level: f32, bands: &FrequencyBands) -> (SoundCategory, f32) {
    if level < 0.1 {
        return (SoundCategory::Quiet, 1.0 - level * 10.0);
    }
    if level > 0.7 && bands.high_mid > bands.mid * 0.8 {
        return (SoundCategory::Distress, level.min(1.0));
    }
    let voiced = bands.mid > bands.bass && bands.mid > bands.high;
    if level > 0.45 && voiced {
        return (SoundCategory::Call, ratio(bands.mid, bands.bass + bands.high));
    }
    if voiced {
        return (SoundCategory::Speech, ratio(bands.mid, bands.bass + bands.mid + bands.high));
    }
    (SoundCategory::Quiet, 0.3)
}

/// Spike-over-baseline on an audio level history.
pub fn detect_sudden_sound(history: &[f32], spike_threshold: f32, min_baseline: f32) -> bool {
    detect_sudden_change(history, spike_threshold, min_baseline)
}

// -------------------- Per-stream analyzer --------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioThresholds {
    /// Smoothed level above which audio counts as activity.
    pub level_threshold: f32,
    pub spike_threshold: f32,
    pub min_baseline: f32,
    pub smoothing_window: usize,
}

impl AudioThresholds {
    pub fn for_scenario(scenario: Scenario) -> Self {
        let level_threshold = match scenario {
            Scenario::Baby => 0.05,
            Scenario::Elderly => 0.1,
            Scenario::Pet => 0.15,
            Scenario::Security => 0.2,
            Scenario::General => 0.2,
        };
        Self {
            level_threshold,
            spike_threshold: 3.0,
            min_baseline: 0.02,
            smoothing_window: 5,
        }
    }

    pub fn clamped(mut self) -> Self {
        if !self.level_threshold.is_finite() {
            self.level_threshold = 0.2;
        }
        self.level_threshold = self.level_threshold.clamp(0.0, 1.0);
        if !self.spike_threshold.is_finite() {
            self.spike_threshold = 3.0;
        }
        self.spike_threshold = self.spike_threshold.max(1.0);
        if !self.min_baseline.is_finite() {
            self.min_baseline = 0.0;
        }
        self.min_baseline = self.min_baseline.max(0.0);
        self.smoothing_window = self.smoothing_window.clamp(1, 300);
        self
    }
}

impl Default for AudioThresholds {
    fn default() -> Self {
        Self::for_scenario(Scenario::General)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AudioReading {
    pub level: f32,
    pub smoothed: f32,
    pub bands: FrequencyBands,
    pub cry: CryAnalysis,
    pub sudden: bool,
    /// Scenario classifier output, when the scenario has one.
    pub category: Option<(SoundCategory, f32)>,
}

/// Owns the level history and cry buffer for one stream.
pub struct AudioAnalyzer {
    scenario: Scenario,
    thresholds: AudioThresholds,
    smoother: SignalSmoother,
    cry: CryDetector,
}

impl AudioAnalyzer {
    pub fn new(scenario: Scenario, thresholds: AudioThresholds) -> Self {
        let thresholds = thresholds.clamped();
        Self {
            scenario,
            smoother: SignalSmoother::new(thresholds.smoothing_window),
            thresholds,
            cry: CryDetector::new(),
        }
    }

    pub fn for_scenario(scenario: Scenario) -> Self {
        Self::new(scenario, AudioThresholds::for_scenario(scenario))
    }

    pub fn thresholds(&self) -> &AudioThresholds {
        &self.thresholds
    }

    pub fn analyze(&mut self, sample: &AudioSample, now_ms: u64) -> AudioReading {
        let level = get_audio_level(&sample.spectrum);
        let bands = get_frequency_levels(&sample.spectrum, sample.sample_rate, sample.fft_size);
        let smoothed = self.smoother.add(level);
        let sudden = detect_sudden_sound(
            &self.smoother.history(),
            self.thresholds.spike_threshold,
            self.thresholds.min_baseline,
        );

        let cry = if self.scenario == Scenario::Baby {
            self.cry.analyze(sample, now_ms)
        } else {
            CryAnalysis::default()
        };
        let category = match self.scenario {
            Scenario::Pet => Some(classify_pet_sound(level, &bands)),
            Scenario::Elderly => Some(classify_elderly_sound(level, &bands)),
            _ => None,
        };

        AudioReading {
            level,
            smoothed,
            bands,
            cry,
            sudden,
            category,
        }
    }

    /// Switch scenario. Buffers are cleared so stale history cannot fire.
    pub fn set_scenario(&mut self, scenario: Scenario) {
        self.scenario = scenario;
        self.thresholds = AudioThresholds::for_scenario(scenario);
        self.smoother = SignalSmoother::new(self.thresholds.smoothing_window);
        self.cry.reset();
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.cry.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{cry_spectrum, quiet_spectrum};

    const RATE: u32 = 44_100;
    const FFT: usize = 2048;

    fn cry_sample(at: u64) -> AudioSample {
        AudioSample::new(cry_spectrum(RATE, FFT), RATE, FFT, at)
    }

    fn quiet_sample(at: u64) -> AudioSample {
        AudioSample::new(quiet_spectrum(FFT), RATE, FFT, at)
    }

    #[test]
    fn level_is_normalized_rms() {
        assert_eq!(get_audio_level(&[]), 0.0);
        assert_eq!(get_audio_level(&[255; 16]), 1.0);
        let level = get_audio_level(&[0, 255]);
        assert!((level - (0.5f32).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn bands_partition_by_hz() {
        // 1000 Hz / 10 bins: one bin per 100 Hz.
        let mut spectrum = vec![0u8; 60];
        spectrum[1] = 255; // 100 Hz: bass
        spectrum[45] = 255; // 4500 Hz: high
        let bands = get_frequency_levels(&spectrum, 1_000, 10);
        assert!((bands.bass - 0.5).abs() < 1e-6);
        assert_eq!(bands.mid, 0.0);
        assert!(bands.high > 0.0);
    }

    #[test]
    fn zero_fft_yields_silent_bands() {
        assert_eq!(get_frequency_levels(&[200; 64], RATE, 0), FrequencyBands::default());
        assert!(!detect_crying_pattern(&[200; 64], 0, FFT));
    }

    #[test]
    fn cry_pattern_needs_harmonics() {
        let spectrum = cry_spectrum(RATE, FFT);
        assert!(detect_crying_pattern(&spectrum, RATE, FFT));

        // Same band energy, harmonics removed.
        let mut flat = spectrum.clone();
        for idx in 30..flat.len() {
            flat[idx] = 8;
        }
        assert!(!detect_crying_pattern(&flat, RATE, FFT));

        assert!(!detect_crying_pattern(&quiet_spectrum(FFT), RATE, FFT));
    }

    #[test]
    fn debounce_below_sixty_percent_never_asserts() {
        let mut detector = CryDetector::new();
        // 11 of every 20 windows are cry-shaped.
        for i in 0..200u64 {
            let sample = if i % 20 < 11 {
                cry_sample(i * 100)
            } else {
                quiet_sample(i * 100)
            };
            assert!(!detector.analyze(&sample, i * 100).is_crying);
        }
    }

    #[test]
    fn debounce_at_sixty_percent_asserts() {
        let mut detector = CryDetector::new();
        let mut asserted = false;
        for i in 0..40u64 {
            let sample = if i % 20 < 12 {
                cry_sample(i * 100)
            } else {
                quiet_sample(i * 100)
            };
            asserted |= detector.analyze(&sample, i * 100).is_crying;
        }
        assert!(asserted);
    }

    #[test]
    fn sustained_cry_reports_pattern_and_duration() {
        let mut detector = CryDetector::new();
        let mut last = CryAnalysis::default();
        for i in 0..25u64 {
            last = detector.analyze(&cry_sample(i * 100), i * 100);
        }
        assert!(last.is_crying);
        assert_eq!(last.pattern, CryPattern::Whimper);
        // Asserted first at the 20th window (t=1900).
        assert_eq!(last.duration_ms, 500);
        assert!(last.confidence > 0.0 && last.confidence <= 1.0);

        detector.reset();
        assert!(!detector.analyze(&cry_sample(9_000), 9_000).is_crying);
    }

    #[test]
    fn pattern_buckets_by_level() {
        assert_eq!(CryPattern::from_level(0.1), CryPattern::Whimper);
        assert_eq!(CryPattern::from_level(0.3), CryPattern::Cry);
        assert_eq!(CryPattern::from_level(0.9), CryPattern::Scream);
    }

    #[test]
    fn pet_classifier_buckets() {
        let bark = FrequencyBands {
            bass: 0.8,
            low_mid: 0.6,
            mid: 0.2,
            high_mid: 0.1,
            high: 0.05,
        };
        assert_eq!(classify_pet_sound(0.5, &bark).0, SoundCategory::Bark);
        assert_eq!(classify_pet_sound(0.01, &bark).0, SoundCategory::Quiet);

        let yelp = FrequencyBands {
            bass: 0.1,
            low_mid: 0.1,
            mid: 0.3,
            high_mid: 0.6,
            high: 0.4,
        };
        assert_eq!(classify_pet_sound(0.8, &yelp).0, SoundCategory::Distress);
        assert_eq!(classify_pet_sound(0.3, &yelp).0, SoundCategory::Whine);
    }

    #[test]
    fn elderly_classifier_buckets() {
        let voice = FrequencyBands {
            bass: 0.1,
            low_mid: 0.3,
            mid: 0.6,
            high_mid: 0.2,
            high: 0.1,
        };
        assert_eq!(classify_elderly_sound(0.3, &voice).0, SoundCategory::Speech);
        assert_eq!(classify_elderly_sound(0.5, &voice).0, SoundCategory::Call);

        let scream = FrequencyBands {
            high_mid: 0.7,
            ..voice
        };
        let (category, confidence) = classify_elderly_sound(0.9, &scream);
        assert_eq!(category, SoundCategory::Distress);
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn sudden_sound_needs_history_baseline_and_ratio() {
        let mut history = vec![0.1; 5];
        history.push(0.5);
        assert!(detect_sudden_sound(&history, 3.0, 0.02));
        // 0.25 is under 3x the 0.1 baseline.
        *history.last_mut().unwrap() = 0.25;
        assert!(!detect_sudden_sound(&history, 3.0, 0.02));
        assert!(!detect_sudden_sound(&[0.1, 0.1, 0.9], 3.0, 0.02));
        let near_silence = [0.01, 0.01, 0.01, 0.01, 0.9];
        assert!(!detect_sudden_sound(&near_silence, 3.0, 0.02));
    }

    #[test]
    fn analyzer_flags_a_bang_over_steady_noise() {
        let mut analyzer = AudioAnalyzer::for_scenario(Scenario::General);
        let hum = |at| AudioSample::new(vec![25; FFT / 2], RATE, FFT, at);
        for i in 0..5u64 {
            assert!(!analyzer.analyze(&hum(i * 100), i * 100).sudden);
        }
        let bang = AudioSample::new(vec![255; FFT / 2], RATE, FFT, 500);
        let reading = analyzer.analyze(&bang, 500);
        assert!(reading.sudden);
        assert_eq!(reading.level, 1.0);
    }

    #[test]
    fn scenario_change_clears_cry_buffer() {
        let mut analyzer = AudioAnalyzer::for_scenario(Scenario::Baby);
        for i in 0..19u64 {
            analyzer.analyze(&cry_sample(i * 100), i * 100);
        }
        analyzer.set_scenario(Scenario::Elderly);
        analyzer.set_scenario(Scenario::Baby);
        // One more cry window would have completed the old buffer.
        assert!(!analyzer.analyze(&cry_sample(2_000), 2_000).cry.is_crying);
    }
}
