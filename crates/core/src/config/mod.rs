use serde::{Deserialize, Serialize};

use crate::{mapping::AliasDescriptor, Result};

/// Top-level configuration structure for the rig.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub classifier: ClassifierConfig,
    pub idle: IdleConfig,
    /// Extra alias entries layered over the built-in table.
    pub aliases: Vec<AliasDescriptor>,
}

impl RigConfig {
    /// Decodes a (possibly partial) JSON document; missing fields keep their
    /// defaults.
    pub fn from_json_str(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

/// Limits applied by the viseme engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for the dedicated jaw channel weight.
    pub max_jaw_weight: f32,
    /// Upper bound for the jaw joint rotation, in radians.
    pub max_jaw_rotation: f32,
    /// Blend layers at or below this weight are skipped.
    pub blend_epsilon: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_jaw_weight: 0.8,
            max_jaw_rotation: 0.2,
            blend_epsilon: 0.01,
        }
    }
}

/// How the scheduler moves between consecutive visemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    /// Ease each event inside its own window, with a decaying tail of the
    /// previous event.
    #[default]
    Windowed,
    /// Track an explicit current/target pair and cross-fade at a fixed rate.
    Smooth,
    /// Attack, hold and release envelope per event; one code at a time.
    Ramp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub mode: TransitionMode,
    /// Seconds a smooth transition takes to complete.
    pub blend_duration: f32,
    /// Peak weight of the previous event during coarticulation.
    pub coarticulation: f32,
    /// Length of the silence appended after the last event, in seconds.
    pub tail_silence: f32,
    pub time_scale: f32,
    /// Envelope peak in ramp mode.
    pub ramp_peak: f32,
    /// Envelope peak for `PP` and `FF` in ramp mode.
    pub ramp_closure_peak: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: TransitionMode::Windowed,
            blend_duration: 0.08,
            coarticulation: 0.35,
            tail_silence: 0.12,
            time_scale: 1.0,
            ramp_peak: 0.8,
            ramp_closure_peak: 0.9,
        }
    }
}

/// Threshold family used by the classifier's vowel stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPreset {
    #[default]
    Simple,
    Refined,
}

/// Configuration specific to the realtime audio classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// RMS below which the signal counts as silence.
    pub silence_floor: f32,
    /// RMS span above the floor that maps to full activation.
    pub activation_range: f32,
    /// Attack time constant in seconds.
    pub attack: f32,
    /// Release time constant in seconds; longer than `attack`.
    pub release: f32,
    /// Activation below which the output is always silence.
    pub activation_floor: f32,
    pub sibilant_centroid_hz: f32,
    pub sibilant_high_ratio: f32,
    pub sibilant_flux: f32,
    pub sibilant_min_level: f32,
    pub labiodental_flux: f32,
    pub preset: ThresholdPreset,
    pub fft_size: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            silence_floor: 0.025,
            activation_range: 0.25,
            attack: 0.18,
            release: 0.28,
            activation_floor: 0.01,
            sibilant_centroid_hz: 3000.0,
            sibilant_high_ratio: 0.40,
            sibilant_flux: 0.12,
            sibilant_min_level: 0.08,
            labiodental_flux: 0.18,
            preset: ThresholdPreset::Simple,
            fft_size: 2048,
        }
    }
}

/// Idle micro-expressions layered under the lip-sync drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub enabled: bool,
    pub brow_up_max: f32,
    pub brow_down_max: f32,
    pub squint_max: f32,
    pub smile_max: f32,
    pub press_max: f32,
    pub jaw_open_max: f32,
    /// Exponential approach rate towards the targets, per second.
    pub smoothing: f32,
    /// Seconds between target changes, drawn uniformly from this range.
    pub min_interval: f32,
    pub max_interval: f32,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brow_up_max: 0.45,
            brow_down_max: 0.22,
            squint_max: 0.22,
            smile_max: 0.45,
            press_max: 0.18,
            jaw_open_max: 0.18,
            smoothing: 3.0,
            min_interval: 1.4,
            max_interval: 3.2,
            seed: None,
        }
    }
}
