//! Per-face lip-sync controller.
//!
//! [`LipSyncRig`] owns one face together with the engine, scheduler and
//! classifier that drive it. At most one [`Driver`] feeds the engine at a
//! time; every switch zeroes the face before returning.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    adapters::parse_external_timing,
    analysis::{AudioClassifier, AudioSnapshot, VisemeFrame},
    assets::FaceAsset,
    config::{IdleConfig, RigConfig, ThresholdPreset, TransitionMode},
    engine::{CompatibilityReport, VisemeEngine},
    idle::IdleLayer,
    mapping::AliasTable,
    timeline::{PlaybackPhase, PlaybackState, Scheduler, Sequence, Transition},
    viseme::ProfileTable,
    RigError,
};

const SPEED_RANGE: (f32, f32) = (0.1, 3.0);
const INTENSITY_RANGE: (f32, f32) = (0.1, 2.0);

/// Source currently feeding the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    None,
    Sequence,
    Audio,
}

/// Speaking style applied to a `speak` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Whisper,
    Excited,
}

/// Multipliers an [`Emotion`] applies to speed and intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmotionPreset {
    pub speed: f32,
    pub emphasis: f32,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Whisper,
        Emotion::Excited,
    ];

    pub fn preset(self) -> EmotionPreset {
        let (speed, emphasis) = match self {
            Emotion::Neutral => (1.0, 1.0),
            Emotion::Happy => (1.1, 1.2),
            Emotion::Sad => (0.8, 0.9),
            Emotion::Angry => (1.3, 1.4),
            Emotion::Surprised => (1.2, 1.3),
            Emotion::Whisper => (0.7, 0.6),
            Emotion::Excited => (1.4, 1.5),
        };
        EmotionPreset { speed, emphasis }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Whisper => "whisper",
            Emotion::Excited => "excited",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = RigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let folded = value.trim().to_ascii_lowercase();
        Emotion::ALL
            .into_iter()
            .find(|emotion| emotion.as_str() == folded)
            .ok_or_else(|| RigError::msg(format!("unknown emotion `{value}`")))
    }
}

/// Per-call overrides for [`LipSyncRig::speak`]; unset fields use the rig's
/// current settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeakOptions {
    pub emotion: Option<Emotion>,
    pub speed: Option<f32>,
    pub intensity: Option<f32>,
}

/// What a `speak` call queued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeakSummary {
    pub duration: f32,
    pub viseme_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RigStatus {
    pub face: String,
    pub jaw_joint: Option<String>,
    pub driver: Driver,
    pub phase: PlaybackPhase,
    pub emotion: Emotion,
    pub speed: f32,
    pub intensity: f32,
    pub smooth_transitions: bool,
    pub mode: TransitionMode,
    pub idle: bool,
    pub duration: f32,
    pub playback: PlaybackState,
    pub audio: VisemeFrame,
}

pub struct LipSyncRig {
    face: FaceAsset,
    engine: VisemeEngine,
    scheduler: Scheduler,
    classifier: AudioClassifier,
    driver: Driver,
    emotion: Emotion,
    speed: f32,
    intensity: f32,
    /// Preset of the sequence currently loaded.
    active: EmotionPreset,
    blend_duration: f32,
    audio_transition: Transition,
    idle_config: IdleConfig,
    idle: Option<IdleLayer>,
}

impl LipSyncRig {
    pub fn new(config: &RigConfig, face: FaceAsset) -> Self {
        let aliases = AliasTable::standard().with_aliases(&config.aliases);
        let engine = VisemeEngine::new(
            Arc::new(aliases),
            Arc::new(ProfileTable::standard()),
            config.engine.clone(),
        );

        let report = engine.analyze(&face);
        tracing::debug!(
            face = %face.name,
            compatible = report.compatible,
            jaw = ?report.jaw.target,
            "attached lip-sync rig"
        );

        Self {
            face,
            engine,
            scheduler: Scheduler::new(config.scheduler.clone()),
            classifier: AudioClassifier::new(config.classifier.clone()),
            driver: Driver::None,
            emotion: Emotion::Neutral,
            speed: 1.0,
            intensity: 1.0,
            active: Emotion::Neutral.preset(),
            blend_duration: config.scheduler.blend_duration,
            audio_transition: Transition::default(),
            idle_config: config.idle.clone(),
            idle: config
                .idle
                .enabled
                .then(|| IdleLayer::new(config.idle.clone())),
        }
    }

    pub fn face(&self) -> &FaceAsset {
        &self.face
    }

    /// Mutable access for channels the rig does not drive, such as blinks.
    pub fn face_mut(&mut self) -> &mut FaceAsset {
        &mut self.face
    }

    pub fn engine(&self) -> &VisemeEngine {
        &self.engine
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn analyze(&self) -> CompatibilityReport {
        self.engine.analyze(&self.face)
    }

    /// Switches the active driver. The face is zeroed and both drivers are
    /// reset before this returns; selecting the current driver is a no-op.
    pub fn use_driver(&mut self, driver: Driver) {
        if self.driver == driver {
            return;
        }
        self.quiesce();
        tracing::debug!(from = ?self.driver, to = ?driver, "switched lip-sync driver");
        self.driver = driver;
    }

    /// Loads `sequence` and starts playing it, replacing whatever was playing.
    pub fn speak(&mut self, sequence: &Sequence, options: SpeakOptions) -> SpeakSummary {
        self.use_driver(Driver::Sequence);
        self.scheduler.stop(&self.engine, &mut self.face);

        let emotion = options.emotion.unwrap_or(self.emotion);
        let speed = options
            .speed
            .map(|speed| clamp_or(speed, SPEED_RANGE, self.speed))
            .unwrap_or(self.speed);
        let intensity = options
            .intensity
            .map(|intensity| clamp_or(intensity, INTENSITY_RANGE, self.intensity))
            .unwrap_or(self.intensity);

        self.active = emotion.preset();
        self.scheduler
            .load(sequence, 1.0 / (speed * self.active.speed));
        self.scheduler.set_intensity(intensity * self.active.emphasis);
        self.scheduler.play();

        tracing::debug!(%emotion, speed, intensity, events = sequence.len(), "speaking sequence");
        SpeakSummary {
            duration: self.scheduler.duration(),
            viseme_count: sequence.len(),
        }
    }

    /// Parses external timing data and speaks it with the current settings.
    pub fn play_external_timing(&mut self, input: &str) -> SpeakSummary {
        let sequence = parse_external_timing(input);
        self.speak(&sequence, SpeakOptions::default())
    }

    /// Hands the face to the audio classifier.
    pub fn start_audio(&mut self) {
        self.use_driver(Driver::Audio);
    }

    /// Advances the active driver, then the idle layer, by `dt` seconds.
    /// `audio` is only read while the audio driver is active; `None` counts
    /// as silence.
    pub fn tick(&mut self, dt: f32, audio: Option<&AudioSnapshot<'_>>) {
        self.tick_driver(dt, audio);

        if let Some(idle) = self.idle.as_mut() {
            let mouth = self.driver == Driver::None;
            idle.update(dt, &mut self.face, self.engine.resolver(), mouth);
        }
    }

    fn tick_driver(&mut self, dt: f32, audio: Option<&AudioSnapshot<'_>>) {
        match self.driver {
            Driver::None => {}
            Driver::Sequence => {
                let phase = self.scheduler.update(dt, &self.engine, &mut self.face);
                if phase == PlaybackPhase::Idle {
                    tracing::debug!("sequence driver released");
                    self.driver = Driver::None;
                }
            }
            Driver::Audio => {
                let frame = self.classifier.update(dt, audio);
                let intensity = frame.intensity * self.intensity;
                match self.scheduler.mode() {
                    TransitionMode::Windowed | TransitionMode::Ramp => {
                        self.engine
                            .apply_viseme(&mut self.face, frame.code, intensity);
                    }
                    TransitionMode::Smooth => {
                        self.audio_transition.retarget(frame.code);
                        let progress = self.audio_transition.advance(dt, self.blend_duration);
                        self.engine.blend_viseme(
                            &mut self.face,
                            self.audio_transition.current,
                            self.audio_transition.target,
                            progress,
                            intensity,
                        );
                    }
                }
            }
        }
    }

    /// Starts the loaded sequence, or resumes it when paused. A seek made
    /// while stopped sets where playback starts.
    pub fn play(&mut self) {
        let start = self.scheduler.state().playhead;
        self.use_driver(Driver::Sequence);
        if self.scheduler.phase() == PlaybackPhase::Idle && start > 0.0 {
            self.scheduler.seek_to(start);
        }
        self.scheduler.play();
    }

    pub fn pause(&mut self) {
        self.scheduler.pause();
    }

    pub fn resume(&mut self) {
        if self.driver == Driver::Sequence {
            self.scheduler.resume();
        }
    }

    /// Stops every driver and zeroes the face. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.quiesce();
        self.driver = Driver::None;
    }

    pub fn seek_to(&mut self, time: f32) {
        self.scheduler.seek_to(time);
    }

    /// Speaking speed, clamped to `0.1..=3.0`. Applies to the loaded
    /// sequence immediately.
    pub fn set_speed(&mut self, speed: f32) {
        self.speed = clamp_or(speed, SPEED_RANGE, self.speed);
        self.scheduler
            .set_time_scale(1.0 / (self.speed * self.active.speed));
    }

    /// Weight multiplier, clamped to `0.1..=2.0`.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = clamp_or(intensity, INTENSITY_RANGE, self.intensity);
        self.scheduler
            .set_intensity(self.intensity * self.active.emphasis);
    }

    /// Emotion used by subsequent `speak` calls.
    pub fn set_emotion(&mut self, emotion: Emotion) {
        self.emotion = emotion;
    }

    /// Switches between smooth cross-fades and windowed easing.
    pub fn set_smooth_transitions(&mut self, enabled: bool) {
        let mode = if enabled {
            TransitionMode::Smooth
        } else {
            TransitionMode::Windowed
        };
        self.set_transition_mode(mode);
    }

    pub fn set_transition_mode(&mut self, mode: TransitionMode) {
        self.scheduler.set_mode(mode);
        self.audio_transition = Transition::settled(self.classifier.last_frame().code);
    }

    /// Threshold family used by the audio classifier from the next tick on.
    pub fn set_threshold_preset(&mut self, preset: ThresholdPreset) {
        self.classifier.set_preset(preset);
    }

    /// Turns the idle micro-expression layer on or off. Disabling leaves brows
    /// and squints at their last idle weights.
    pub fn set_idle_enabled(&mut self, enabled: bool) {
        match (enabled, self.idle.is_some()) {
            (true, false) => self.idle = Some(IdleLayer::new(self.idle_config.clone())),
            (false, true) => self.idle = None,
            _ => {}
        }
        tracing::debug!(enabled, "idle layer toggled");
    }

    pub fn status(&self) -> RigStatus {
        RigStatus {
            face: self.face.name.clone(),
            jaw_joint: self.face.jaw.as_ref().map(|jaw| jaw.name.clone()),
            driver: self.driver,
            phase: self.scheduler.phase(),
            emotion: self.emotion,
            speed: self.speed,
            intensity: self.intensity,
            smooth_transitions: self.scheduler.mode() == TransitionMode::Smooth,
            mode: self.scheduler.mode(),
            idle: self.idle.is_some(),
            duration: self.scheduler.duration(),
            playback: *self.scheduler.state(),
            audio: self.classifier.last_frame(),
        }
    }

    fn quiesce(&mut self) {
        self.scheduler.stop(&self.engine, &mut self.face);
        self.classifier.reset();
        self.audio_transition = Transition::default();
        self.engine.reset(&mut self.face);
        if let Some(idle) = self.idle.as_mut() {
            idle.settle_mouth();
        }
    }
}

impl fmt::Debug for LipSyncRig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LipSyncRig")
            .field("face", &self.face.name)
            .field("driver", &self.driver)
            .field("phase", &self.scheduler.phase())
            .field("emotion", &self.emotion)
            .field("speed", &self.speed)
            .field("intensity", &self.intensity)
            .finish()
    }
}

fn clamp_or(value: f32, (min, max): (f32, f32), fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channels::ChannelSet,
        config::SchedulerConfig,
        timeline::VisemeEvent,
        viseme::VisemeCode,
    };

    const FACE: &[&str] = &["V_Open", "V_Explosive", "V_Wide", "Jaw_Open", "Eye_Blink_L"];

    fn rig() -> LipSyncRig {
        LipSyncRig::new(
            &RigConfig::default(),
            FaceAsset::new("CC_Base_Body", ChannelSet::new(FACE.iter().copied())),
        )
    }

    fn weight(rig: &LipSyncRig, name: &str) -> f32 {
        rig.face().channels.weight_of(name).unwrap()
    }

    fn mouth_is_closed(rig: &LipSyncRig) -> bool {
        ["V_Open", "V_Explosive", "V_Wide", "Jaw_Open"]
            .iter()
            .all(|name| weight(rig, name) == 0.0)
    }

    fn open_vowel() -> Sequence {
        Sequence::new(vec![
            VisemeEvent::new(VisemeCode::Aa, 0.0, 0.3),
            VisemeEvent::new(VisemeCode::PP, 0.3, 0.2),
        ])
    }

    fn loud_snapshot<'a>(time_domain: &'a [f32], magnitudes: &'a [f32]) -> AudioSnapshot<'a> {
        AudioSnapshot {
            time_domain,
            magnitudes,
            sample_rate: 8_000.0,
        }
    }

    #[test]
    fn emotions_parse_case_insensitively() {
        assert_eq!("Happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert!("bored".parse::<Emotion>().is_err());
        assert_eq!(Emotion::Whisper.preset().emphasis, 0.6);
    }

    #[test]
    fn speak_drives_the_face_and_releases_when_done() {
        let mut rig = rig();
        let summary = rig.speak(&open_vowel(), SpeakOptions::default());

        assert_eq!(summary.viseme_count, 2);
        assert!((summary.duration - 0.62).abs() < 1e-5);
        assert_eq!(rig.driver(), Driver::Sequence);

        rig.tick(0.1, None);
        assert!(weight(&rig, "V_Open") > 0.0);

        for _ in 0..10 {
            rig.tick(0.1, None);
        }
        assert_eq!(rig.driver(), Driver::None);
        assert!(mouth_is_closed(&rig));
    }

    #[test]
    fn emotion_scales_speed_and_emphasis() {
        let mut rig = rig();
        let summary = rig.speak(
            &open_vowel(),
            SpeakOptions {
                emotion: Some(Emotion::Sad),
                ..SpeakOptions::default()
            },
        );

        assert!((summary.duration - (0.5 / 0.8 + 0.12)).abs() < 1e-5);
        assert!((rig.scheduler.intensity() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn speed_is_clamped_and_rescales_playback() {
        let mut rig = rig();
        rig.speak(&open_vowel(), SpeakOptions::default());

        rig.set_speed(10.0);
        assert_eq!(rig.status().speed, 3.0);
        assert!((rig.scheduler.time_scale() - 1.0 / 3.0).abs() < 1e-6);

        rig.set_speed(f32::NAN);
        assert_eq!(rig.status().speed, 3.0);

        rig.set_intensity(0.0);
        assert_eq!(rig.status().intensity, 0.1);
    }

    #[test]
    fn starting_audio_silences_the_sequence_immediately() {
        let mut rig = rig();
        rig.speak(&open_vowel(), SpeakOptions::default());
        rig.tick(0.1, None);
        assert!(weight(&rig, "V_Open") > 0.0);

        rig.start_audio();

        assert_eq!(rig.driver(), Driver::Audio);
        assert_eq!(rig.status().phase, PlaybackPhase::Idle);
        assert!(mouth_is_closed(&rig));
    }

    #[test]
    fn audio_driver_ignores_the_scheduler() {
        let mut rig = rig();
        rig.start_audio();

        let time_domain = vec![0.5; 64];
        let magnitudes: Vec<f32> = (0..40).map(|bin| if bin < 5 { 1.0 } else { 0.0 }).collect();
        rig.tick(0.1, Some(&loud_snapshot(&time_domain, &magnitudes)));

        assert_eq!(rig.status().audio.code, VisemeCode::Aa);
        assert!(weight(&rig, "V_Open") > 0.0);

        rig.play();
        assert_eq!(rig.driver(), Driver::Sequence);
        assert!(mouth_is_closed(&rig));
        assert_eq!(rig.status().audio, VisemeFrame::default());
    }

    #[test]
    fn stop_is_synchronous_and_idempotent() {
        let mut rig = rig();
        rig.speak(&open_vowel(), SpeakOptions::default());
        rig.tick(0.1, None);

        rig.stop();
        assert!(mouth_is_closed(&rig));
        assert_eq!(rig.driver(), Driver::None);

        rig.stop();
        assert!(mouth_is_closed(&rig));
        rig.tick(0.1, None);
        assert!(mouth_is_closed(&rig));
    }

    #[test]
    fn speaking_again_replaces_the_previous_sequence() {
        let mut rig = rig();
        rig.speak(&open_vowel(), SpeakOptions::default());
        rig.tick(0.2, None);

        rig.speak(&Sequence::silence(0.2), SpeakOptions::default());

        assert_eq!(rig.status().playback.playhead, 0.0);
        assert!(mouth_is_closed(&rig));
        assert_eq!(rig.status().duration, 0.2 + 0.12);
    }

    #[test]
    fn smooth_transitions_apply_to_audio_too() {
        let mut rig = LipSyncRig::new(
            &RigConfig {
                scheduler: SchedulerConfig {
                    mode: TransitionMode::Smooth,
                    ..SchedulerConfig::default()
                },
                ..RigConfig::default()
            },
            FaceAsset::new("face", ChannelSet::new(FACE.iter().copied())),
        );
        rig.start_audio();

        let time_domain = vec![0.5; 64];
        let magnitudes: Vec<f32> = (0..40).map(|bin| if bin < 5 { 1.0 } else { 0.0 }).collect();
        rig.tick(0.04, Some(&loud_snapshot(&time_domain, &magnitudes)));

        assert!(rig.status().smooth_transitions);
        let partial = weight(&rig, "V_Open");
        assert!(partial > 0.0);

        rig.tick(0.1, Some(&loud_snapshot(&time_domain, &magnitudes)));
        assert!(weight(&rig, "V_Open") > partial);
    }

    #[test]
    fn external_timing_plays_through_the_adapter() {
        let mut rig = rig();
        let summary = rig.play_external_timing("0,0.2,A\n0.2,0.4,M");

        assert_eq!(summary.viseme_count, 2);
        rig.tick(0.1, None);
        assert!(weight(&rig, "V_Open") > 0.0);
    }

    #[test]
    fn seek_while_stopped_sets_where_play_starts() {
        let mut rig = rig();
        rig.speak(&open_vowel(), SpeakOptions::default());
        for _ in 0..10 {
            rig.tick(0.1, None);
        }
        assert_eq!(rig.driver(), Driver::None);

        rig.seek_to(0.35);
        rig.play();
        rig.tick(0.01, None);

        let playback = rig.status().playback;
        assert_eq!(playback.current_code, VisemeCode::PP);
        assert!((playback.playhead - 0.36).abs() < 1e-5);
        assert!(weight(&rig, "V_Explosive") > 0.0);
    }

    #[test]
    fn host_channels_outlive_driver_switches() {
        let mut rig = rig();
        let blink = rig.face().channels.find_exact("Eye_Blink_L").unwrap();
        rig.face_mut().channels.set_weight(blink, 0.7);

        rig.speak(&open_vowel(), SpeakOptions::default());
        rig.tick(0.1, None);
        rig.start_audio();
        rig.stop();

        assert_eq!(weight(&rig, "Eye_Blink_L"), 0.7);
        assert!(mouth_is_closed(&rig));
    }

    #[test]
    fn threshold_preset_reaches_the_classifier() {
        let mut rig = rig();
        rig.set_threshold_preset(ThresholdPreset::Refined);
        rig.start_audio();

        let time_domain = vec![0.5; 64];
        let magnitudes: Vec<f32> = (0..40)
            .map(|bin| if (12..19).contains(&bin) { 1.0 } else { 0.0 })
            .collect();
        rig.tick(0.1, Some(&loud_snapshot(&time_domain, &magnitudes)));

        assert_eq!(rig.status().audio.code, VisemeCode::O);
    }

    #[test]
    fn ramp_mode_plays_sequences() {
        let mut rig = rig();
        rig.set_transition_mode(TransitionMode::Ramp);
        rig.speak(&open_vowel(), SpeakOptions::default());
        rig.tick(0.025, None);

        let status = rig.status();
        assert_eq!(status.mode, TransitionMode::Ramp);
        assert!(!status.smooth_transitions);
        assert!((weight(&rig, "V_Open") - 0.8 * 0.8).abs() < 1e-6);
    }

    #[test]
    fn idle_layer_yields_the_mouth_to_drivers() {
        let mut names = FACE.to_vec();
        names.push("browInnerUp");
        let config = RigConfig {
            idle: IdleConfig {
                enabled: true,
                seed: Some(1),
                ..IdleConfig::default()
            },
            ..RigConfig::default()
        };
        let mut rig = LipSyncRig::new(&config, FaceAsset::new("face", ChannelSet::new(names)));
        assert!(rig.status().idle);

        rig.tick(0.1, None);
        assert!(weight(&rig, "Jaw_Open") > 0.0);
        assert!(weight(&rig, "browInnerUp") > 0.0);

        rig.start_audio();
        rig.tick(0.1, None);
        assert_eq!(weight(&rig, "Jaw_Open"), 0.0);
        assert!(weight(&rig, "browInnerUp") > 0.0);

        rig.stop();
        rig.tick(0.1, None);
        assert!(weight(&rig, "Jaw_Open") > 0.0);

        rig.set_idle_enabled(false);
        assert!(!rig.status().idle);
    }

    #[test]
    fn configured_aliases_reach_the_engine() {
        let config = RigConfig::from_json_str(
            r#"{ "aliases": [ { "semantic": "jawOpen", "candidates": ["Rig_Mandible"] } ] }"#,
        )
        .unwrap();
        let rig = LipSyncRig::new(
            &config,
            FaceAsset::new("face", ChannelSet::new(["Rig_Mandible"])),
        );

        assert!(rig.analyze().compatible);
    }
}
