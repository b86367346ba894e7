//! Core library for driving facial lip-sync rigs.
//!
//! Viseme codes are mapped onto whatever blend-shape channels and jaw joint a
//! face asset exposes. Two drivers feed the [`engine::VisemeEngine`]: the
//! [`timeline::Scheduler`] playing a timed [`timeline::Sequence`], and the
//! [`analysis::AudioClassifier`] reading live audio. [`rig::LipSyncRig`]
//! ties them to a single face and keeps only one of them active at a time,
//! with an optional [`idle::IdleLayer`] underneath.

pub mod adapters;
pub mod analysis;
pub mod assets;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod idle;
pub mod mapping;
pub mod rig;
pub mod timeline;
pub mod viseme;

pub use adapters::{parse_external_timing, symbol_to_viseme, TimingCue};
pub use analysis::{AudioClassifier, AudioFeatureFrame, AudioSnapshot, SpectrumAnalyzer, VisemeFrame};
pub use assets::{pick_face_asset, FaceAsset, JawAxis, JawJoint};
pub use channels::{ChannelId, ChannelResolver, ChannelSet, Namespace};
pub use config::{
    ClassifierConfig, EngineConfig, IdleConfig, RigConfig, SchedulerConfig, ThresholdPreset,
    TransitionMode,
};
pub use engine::{CompatibilityReport, VisemeEngine};
pub use error::{Result, RigError};
pub use idle::{IdleLayer, IdlePose};
pub use mapping::{AliasDescriptor, AliasTable};
pub use rig::{Driver, Emotion, LipSyncRig, RigStatus, SpeakOptions};
pub use timeline::{PlaybackPhase, PlaybackState, Scheduler, Sequence, VisemeEvent};
pub use viseme::{ProfileTable, VisemeCode, VisemeProfile};
