//! Realtime viseme classification from live audio.
//!
//! [`AudioClassifier`] consumes one time-domain block and one magnitude
//! spectrum per animation tick and emits a [`VisemeFrame`]. The spectrum is
//! one magnitude per bin, bins evenly covering `0..sample_rate / 2`. Any
//! non-negative scale works: [`SpectrumAnalyzer`] produces `[0, 1]`, byte
//! spectra reach 255. Band ratios and the centroid are scale-free, and flux
//! is divided by the larger of 1 and the peak magnitude of the two frames.

use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ClassifierConfig, ThresholdPreset},
    viseme::VisemeCode,
    Result, RigError,
};

/// Band edges in Hz; five bands between consecutive edges.
const BAND_EDGES: [f32; 6] = [0.0, 300.0, 800.0, 2000.0, 5000.0, 10000.0];

/// Levels below this snap to zero once the target is silent.
const LEVEL_EPSILON: f32 = 1e-4;

/// Borrowed view of the audio the host captured for this tick.
#[derive(Debug, Clone, Copy)]
pub struct AudioSnapshot<'a> {
    pub time_domain: &'a [f32],
    pub magnitudes: &'a [f32],
    pub sample_rate: f32,
}

/// Features extracted from the latest snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureFrame {
    pub rms: f32,
    /// Mean magnitude per band, normalized so the five values sum to one.
    pub bands: [f32; 5],
    pub low: f32,
    pub mid: f32,
    pub high: f32,
    pub centroid_hz: f32,
    pub flux: f32,
}

/// Classifier output for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VisemeFrame {
    pub code: VisemeCode,
    pub intensity: f32,
}

struct VowelThresholds {
    open_low: f32,
    open_centroid: f32,
    round_mid: f32,
    round_centroid: f32,
    mid_front_centroid: f32,
    close_front_centroid: f32,
}

impl VowelThresholds {
    fn for_preset(preset: ThresholdPreset) -> Self {
        match preset {
            ThresholdPreset::Simple => Self {
                open_low: 0.45,
                open_centroid: 1100.0,
                round_mid: 0.30,
                round_centroid: 1400.0,
                mid_front_centroid: 2000.0,
                close_front_centroid: 2600.0,
            },
            ThresholdPreset::Refined => Self {
                open_low: 0.48,
                open_centroid: 1100.0,
                round_mid: 0.40,
                round_centroid: 1600.0,
                mid_front_centroid: 2100.0,
                close_front_centroid: 2800.0,
            },
        }
    }
}

/// Heuristic audio-to-viseme classifier with attack/release smoothing.
#[derive(Debug, Clone)]
pub struct AudioClassifier {
    config: ClassifierConfig,
    level: f32,
    previous: Vec<f32>,
    features: AudioFeatureFrame,
    last: VisemeFrame,
}

impl AudioClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            level: 0.0,
            previous: Vec::new(),
            features: AudioFeatureFrame::default(),
            last: VisemeFrame::default(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Smoothed activation, in `[0, 1]` once clamped for output.
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn features(&self) -> &AudioFeatureFrame {
        &self.features
    }

    pub fn last_frame(&self) -> VisemeFrame {
        self.last
    }

    pub fn set_preset(&mut self, preset: ThresholdPreset) {
        self.config.preset = preset;
    }

    /// Drops all smoothing and flux history.
    pub fn reset(&mut self) {
        self.level = 0.0;
        self.previous.clear();
        self.features = AudioFeatureFrame::default();
        self.last = VisemeFrame::default();
    }

    /// Advances by `dt` seconds. A missing snapshot is treated as silence so
    /// a stalled source decays to `sil`.
    pub fn update(&mut self, dt: f32, snapshot: Option<&AudioSnapshot<'_>>) -> VisemeFrame {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        self.features = match snapshot {
            Some(snapshot) => self.extract(snapshot),
            None => {
                self.previous.clear();
                AudioFeatureFrame::default()
            }
        };

        self.smooth_level(dt);

        let code = if self.level > self.config.activation_floor {
            self.classify()
        } else {
            VisemeCode::Sil
        };

        self.last = VisemeFrame {
            code,
            intensity: self.level.clamp(0.0, 1.0),
        };
        tracing::trace!(
            code = %self.last.code,
            intensity = self.last.intensity,
            rms = self.features.rms,
            centroid = self.features.centroid_hz,
            flux = self.features.flux,
            "classified audio frame"
        );
        self.last
    }

    pub fn update_silent(&mut self, dt: f32) -> VisemeFrame {
        self.update(dt, None)
    }

    fn smooth_level(&mut self, dt: f32) {
        let config = &self.config;
        let target = ((self.features.rms - config.silence_floor) / config.activation_range.max(1e-6))
            .max(0.0);
        let tau = if target > self.level {
            config.attack
        } else {
            config.release
        };
        self.level += (target - self.level) * (1.0 - (-dt / tau.max(1e-3)).exp());

        if target == 0.0 && self.level < LEVEL_EPSILON {
            self.level = 0.0;
        }
    }

    fn classify(&self) -> VisemeCode {
        let features = &self.features;
        let config = &self.config;
        let thresholds = VowelThresholds::for_preset(config.preset);
        let centroid = features.centroid_hz;

        let vowel = if features.low > thresholds.open_low && centroid < thresholds.open_centroid {
            VisemeCode::Aa
        } else if features.mid > thresholds.round_mid && centroid < thresholds.round_centroid {
            VisemeCode::O
        } else if centroid < thresholds.mid_front_centroid {
            VisemeCode::E
        } else if centroid < thresholds.close_front_centroid {
            VisemeCode::I
        } else {
            VisemeCode::E
        };

        if features.high > config.sibilant_high_ratio
            && centroid > config.sibilant_centroid_hz
            && features.flux > config.sibilant_flux
            && self.level > config.sibilant_min_level
        {
            VisemeCode::SS
        } else if features.flux > config.labiodental_flux && features.low < 0.3 && centroid < 1600.0 {
            VisemeCode::FF
        } else if features.mid > 0.38
            && centroid > 1500.0
            && centroid < 2400.0
            && features.flux > 0.08
        {
            VisemeCode::TH
        } else {
            vowel
        }
    }

    fn extract(&mut self, snapshot: &AudioSnapshot<'_>) -> AudioFeatureFrame {
        let magnitudes = snapshot.magnitudes;
        let rms = compute_rms(snapshot.time_domain);

        let bins = magnitudes.len();
        if bins == 0 {
            self.previous.clear();
            return AudioFeatureFrame {
                rms,
                ..Default::default()
            };
        }

        let sample_rate = if snapshot.sample_rate.is_finite() && snapshot.sample_rate > 0.0 {
            snapshot.sample_rate
        } else {
            48_000.0
        };
        let hz_per_bin = sample_rate / (2.0 * bins as f32);

        let mut bands = [0.0_f32; 5];
        for (band, edges) in bands.iter_mut().zip(BAND_EDGES.windows(2)) {
            *band = band_mean(magnitudes, edges[0], edges[1], hz_per_bin);
        }
        let total: f32 = bands.iter().sum();
        if total > f32::EPSILON {
            for band in &mut bands {
                *band /= total;
            }
        }

        let mut weighted = 0.0;
        let mut energy = 0.0;
        for (index, magnitude) in magnitudes.iter().enumerate() {
            weighted += index as f32 * hz_per_bin * magnitude;
            energy += magnitude;
        }
        let centroid_hz = if energy > f32::EPSILON {
            weighted / energy
        } else {
            0.0
        };

        let flux = if self.previous.len() == bins {
            let rise: f32 = magnitudes
                .iter()
                .zip(&self.previous)
                .map(|(current, previous)| (current - previous).max(0.0))
                .sum();
            let peak = magnitudes
                .iter()
                .chain(&self.previous)
                .copied()
                .filter(|magnitude| magnitude.is_finite())
                .fold(1.0, f32::max);
            (rise / (bins as f32 * peak)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.previous.clear();
        self.previous.extend_from_slice(magnitudes);

        AudioFeatureFrame {
            rms,
            bands,
            low: bands[0] + bands[1],
            mid: bands[2],
            high: bands[3] + bands[4],
            centroid_hz,
            flux,
        }
    }
}

impl Default for AudioClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

fn band_mean(magnitudes: &[f32], low_hz: f32, high_hz: f32, hz_per_bin: f32) -> f32 {
    let last = magnitudes.len() - 1;
    let low = (low_hz / hz_per_bin).floor() as usize;
    let high = ((high_hz / hz_per_bin).floor() as usize).min(last);
    if low > high {
        return 0.0;
    }
    let sum: f32 = magnitudes[low..=high].iter().sum();
    sum / (high - low + 1) as f32
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .filter(|sample| sample.is_finite())
        .map(|sample| sample * sample)
        .sum();
    (sum / samples.len() as f32).sqrt()
}

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Turns PCM blocks into the normalized magnitude spectrum the classifier
/// reads. Magnitudes are mapped from `[-100, -30]` dBFS onto `[0, 1]`.
pub struct SpectrumAnalyzer {
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Computes `samples.len() / 2` normalized magnitudes. The returned slice
    /// is reused by the next call.
    pub fn process(&mut self, samples: &[f32]) -> Result<&[f32]> {
        if samples.len() < 2 {
            return Err(RigError::InvalidInput(
                "spectrum analysis requires blocks with at least two samples",
            ));
        }

        let len = samples.len();
        let fft = self.prepare_fft(len)?;

        for (index, value) in samples.iter().enumerate() {
            let value = if value.is_finite() { *value } else { 0.0 };
            fft.input[index] = value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 2.0 / len as f32;
        for (magnitude, bin) in fft.magnitudes.iter_mut().zip(&fft.spectrum) {
            let decibels = 20.0 * (bin.norm() * scale).max(1e-12).log10();
            *magnitude =
                ((decibels - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0);
        }

        Ok(fft.magnitudes.as_slice())
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            let plan = self.fft_planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            tracing::debug!(size, "planned spectrum fft");
            self.fft = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
                magnitudes: vec![0.0; size / 2],
            });
        }

        self.fft
            .as_mut()
            .ok_or_else(|| RigError::msg("fft resources unavailable"))
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
    magnitudes: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
