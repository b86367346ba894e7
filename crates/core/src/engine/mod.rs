//! Applies viseme codes to a [`FaceAsset`].
//!
//! Every public entry point starts from a clean slate: mouth, jaw, tongue and
//! viseme channels are zeroed and the jaw joint is closed before any shape is
//! written. Combined shapes (blends, coarticulation) are built by layering
//! codes on top of one reset; later layers overwrite shared channels while
//! the jaw keeps the widest aperture requested in the frame.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    assets::FaceAsset,
    channels::{clamp_unit, ChannelResolver, ChannelSet},
    config::EngineConfig,
    mapping::{AliasTable, JAW_CHANNEL},
    viseme::{Fallback, ProfileTable, VisemeCode},
};

/// Where the jaw aperture of a layer ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JawTarget {
    Channel,
    Joint,
    None,
}

#[derive(Debug, Clone)]
pub struct VisemeEngine {
    resolver: ChannelResolver,
    profiles: Arc<ProfileTable>,
    config: EngineConfig,
}

impl VisemeEngine {
    pub fn new(aliases: Arc<AliasTable>, profiles: Arc<ProfileTable>, config: EngineConfig) -> Self {
        Self {
            resolver: ChannelResolver::new(aliases),
            profiles,
            config,
        }
    }

    pub fn standard() -> Self {
        Self::new(
            Arc::new(AliasTable::standard()),
            Arc::new(ProfileTable::standard()),
            EngineConfig::default(),
        )
    }

    pub fn resolver(&self) -> &ChannelResolver {
        &self.resolver
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Zeroes all articulator channels and closes the jaw joint.
    pub fn reset(&self, face: &mut FaceAsset) {
        self.resolver.reset_channels(&mut face.channels);
        if let Some(jaw) = face.jaw.as_mut() {
            jaw.reset();
        }
    }

    /// Resets the face and applies `code` at `intensity` (clamped to
    /// `[0, 1]`). Returns whether any channel was written, which is `false`
    /// for assets that expose none of the shapes this code knows about.
    pub fn apply_viseme(&self, face: &mut FaceAsset, code: VisemeCode, intensity: f32) -> bool {
        self.reset(face);
        self.layer(face, code, intensity)
    }

    /// Cross-fades `from` into `to`. `progress` and `intensity` are clamped
    /// to `[0, 1]`; layers weighing less than the blend epsilon are skipped.
    pub fn blend_viseme(
        &self,
        face: &mut FaceAsset,
        from: VisemeCode,
        to: VisemeCode,
        progress: f32,
        intensity: f32,
    ) -> bool {
        let progress = clamp_unit(progress);
        let intensity = clamp_unit(intensity);
        let from_weight = self.profiles.baseline(from) * (1.0 - progress) * intensity;
        let to_weight = self.profiles.baseline(to) * progress * intensity;

        self.reset(face);

        let mut applied = false;
        if from_weight > self.config.blend_epsilon {
            applied |= self.layer(face, from, from_weight);
        }
        if to_weight > self.config.blend_epsilon {
            applied |= self.layer(face, to, to_weight);
        }
        applied
    }

    /// Writes `code` on top of whatever the current frame already holds.
    pub(crate) fn layer(&self, face: &mut FaceAsset, code: VisemeCode, intensity: f32) -> bool {
        let intensity = clamp_unit(intensity);
        let profile = self.profiles.get(code);
        let amount = profile.baseline * intensity;

        let mut primary = false;
        for name in profile.primary {
            primary |= self.drive(&mut face.channels, name, amount);
        }

        let mut fallback = false;
        let mut jaw_floor = 0.0_f32;
        if !primary {
            for heuristic in profile.fallbacks {
                match *heuristic {
                    Fallback::Channel { name, amount } => {
                        let value = amount.resolve(profile.baseline, intensity);
                        fallback |= self.drive(&mut face.channels, name, value);
                    }
                    Fallback::MinJawAperture(factor) => {
                        jaw_floor = jaw_floor.max(factor * intensity);
                    }
                }
            }
        }

        let aperture = (profile.jaw_coefficient * intensity).max(jaw_floor);
        let jaw = self.open_jaw(face, aperture);

        tracing::trace!(%code, intensity, primary, fallback, ?jaw, "layered viseme");
        primary || fallback || jaw == JawTarget::Channel
    }

    /// Writes through the resolver and marks the channel so later resets
    /// clear it even when its name is not mouth-like.
    fn drive(&self, channels: &mut ChannelSet, semantic: &str, value: f32) -> bool {
        match self.resolver.resolve(channels, semantic) {
            Some(id) => {
                channels.set_weight(id, value);
                channels.mark_driven(id);
                true
            }
            None => false,
        }
    }

    /// Opens the jaw to `aperture` in `[0, 1]`, preferring a dedicated
    /// channel over the joint. Never narrows what an earlier layer opened.
    fn open_jaw(&self, face: &mut FaceAsset, aperture: f32) -> JawTarget {
        let aperture = clamp_unit(aperture);

        if let Some(id) = self.resolver.resolve(&face.channels, JAW_CHANNEL) {
            let weight = aperture.min(self.config.max_jaw_weight);
            let current = face.channels.weight(id);
            face.channels.set_weight(id, weight.max(current));
            face.channels.mark_driven(id);
            return JawTarget::Channel;
        }

        if let Some(jaw) = face.jaw.as_mut() {
            let max_rotation = self.config.max_jaw_rotation;
            let rotation = (aperture * max_rotation).min(max_rotation);
            jaw.set_rotation(rotation.max(jaw.rotation()));
            return JawTarget::Joint;
        }

        JawTarget::None
    }

    /// Reports which codes this face can show and how.
    pub fn analyze(&self, face: &FaceAsset) -> CompatibilityReport {
        let channels = &face.channels;
        let codes: Vec<CodeSupport> = self
            .profiles
            .iter()
            .map(|profile| CodeSupport {
                code: profile.code,
                primary: self.resolve_all(channels, profile.primary.iter().copied()),
                fallback: self.resolve_all(
                    channels,
                    profile.fallbacks.iter().filter_map(|heuristic| match heuristic {
                        Fallback::Channel { name, .. } => Some(*name),
                        Fallback::MinJawAperture(_) => None,
                    }),
                ),
            })
            .collect();

        let jaw = if let Some(name) = self.resolver.resolve_name(channels, JAW_CHANNEL) {
            JawSupport {
                target: JawTarget::Channel,
                name: Some(name.to_string()),
            }
        } else if let Some(joint) = &face.jaw {
            JawSupport {
                target: JawTarget::Joint,
                name: Some(joint.name.clone()),
            }
        } else {
            JawSupport {
                target: JawTarget::None,
                name: None,
            }
        };

        let compatible = jaw.target == JawTarget::Channel
            || codes
                .iter()
                .filter(|support| support.code != VisemeCode::Sil)
                .any(CodeSupport::is_supported);

        if !compatible {
            tracing::warn!(face = %face.name, "face exposes no usable mouth channels");
        }

        CompatibilityReport {
            face: face.name.clone(),
            compatible,
            jaw,
            codes,
        }
    }

    fn resolve_all<'n>(
        &self,
        channels: &ChannelSet,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();
        for name in names {
            if let Some(physical) = self.resolver.resolve_name(channels, name) {
                if !resolved.iter().any(|existing| existing == physical) {
                    resolved.push(physical.to_string());
                }
            }
        }
        resolved
    }
}

impl Default for VisemeEngine {
    fn default() -> Self {
        Self::standard()
    }
}

/// Channels a single code resolves to on a given face.
#[derive(Debug, Clone, Serialize)]
pub struct CodeSupport {
    pub code: VisemeCode,
    pub primary: Vec<String>,
    pub fallback: Vec<String>,
}

impl CodeSupport {
    pub fn is_supported(&self) -> bool {
        !self.primary.is_empty() || !self.fallback.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JawSupport {
    pub target: JawTarget,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityReport {
    pub face: String,
    pub compatible: bool,
    pub jaw: JawSupport,
    pub codes: Vec<CodeSupport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{JawAxis, JawJoint},
        channels::{ChannelId, Namespace, ARTICULATORS},
    };

    const CC_FACE: &[&str] = &[
        "V_None",
        "V_Open",
        "V_Wide",
        "V_Tight_O",
        "V_Tight",
        "V_Explosive",
        "V_Dental_Lip",
        "V_Affricate",
        "V_Tongue_Out",
        "V_Tongue_up",
        "V_Tongue_Raise",
        "Mouth_Smile_L",
        "Mouth_Smile_R",
        "Jaw_Open",
        "Eye_Blink_L",
    ];

    const ARKIT_FACE: &[&str] = &[
        "jawOpen",
        "mouthClose",
        "mouthPressLeft",
        "mouthPressRight",
        "mouthSmileLeft",
        "mouthSmileRight",
        "mouthStretchLeft",
        "mouthStretchRight",
        "mouthPucker",
        "mouthFunnel",
        "eyeBlinkLeft",
    ];

    fn face(names: &[&str]) -> FaceAsset {
        FaceAsset::new("face", ChannelSet::new(names.iter().copied()))
    }

    fn weight(face: &FaceAsset, name: &str) -> f32 {
        face.channels.weight_of(name).unwrap()
    }

    fn articulators_are_zero(face: &FaceAsset) -> bool {
        let channels = &face.channels;
        channels.names().enumerate().all(|(index, _)| {
            let id = ChannelId(index);
            let namespace = channels.namespace(id).unwrap_or(Namespace::Other);
            !ARTICULATORS.contains(&namespace) || channels.weight(id) == 0.0
        })
    }

    fn snapshot(face: &FaceAsset) -> Vec<f32> {
        face.channels.weights().to_vec()
    }

    #[test]
    fn applies_primary_group_at_baseline() {
        let engine = VisemeEngine::standard();
        let mut face = face(CC_FACE);

        assert!(engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0));
        assert!((weight(&face, "V_Open") - 0.8).abs() < 1e-6);
        assert!((weight(&face, "Jaw_Open") - 0.8).abs() < 1e-6);
    }

    #[test]
    fn previous_code_never_lingers() {
        let engine = VisemeEngine::standard();
        let mut face = face(CC_FACE);

        engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0);
        engine.apply_viseme(&mut face, VisemeCode::PP, 1.0);

        assert_eq!(weight(&face, "V_Open"), 0.0);
        assert!((weight(&face, "V_Explosive") - 0.9).abs() < 1e-6);
        assert_eq!(weight(&face, "Jaw_Open"), 0.0);
    }

    #[test]
    fn zero_intensity_clears_every_articulator() {
        let engine = VisemeEngine::standard();
        for names in [CC_FACE, ARKIT_FACE] {
            let mut face = face(names);
            for code in VisemeCode::ALL {
                engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0);
                engine.apply_viseme(&mut face, code, 0.0);
                assert!(articulators_are_zero(&face), "{code} left a channel active");
            }
        }
    }

    #[test]
    fn leaves_non_mouth_channels_untouched() {
        let engine = VisemeEngine::standard();
        let mut face = face(CC_FACE);
        let blink = face.channels.find_exact("Eye_Blink_L").unwrap();
        face.channels.set_weight(blink, 0.5);

        engine.apply_viseme(&mut face, VisemeCode::O, 1.0);

        assert_eq!(face.channels.weight(blink), 0.5);
    }

    #[test]
    fn falls_back_to_generic_channels() {
        let engine = VisemeEngine::standard();
        let mut face = face(ARKIT_FACE);

        assert!(engine.apply_viseme(&mut face, VisemeCode::O, 1.0));
        assert!((weight(&face, "mouthPucker") - 0.9 * 0.7).abs() < 1e-6);
        assert!((weight(&face, "mouthFunnel") - 0.7 * 0.7).abs() < 1e-6);

        assert!(engine.apply_viseme(&mut face, VisemeCode::PP, 1.0));
        assert!((weight(&face, "mouthClose") - 0.85).abs() < 1e-6);
        assert!((weight(&face, "mouthPressLeft") - 0.7).abs() < 1e-6);
        assert_eq!(weight(&face, "mouthPucker"), 0.0);
    }

    #[test]
    fn fricatives_keep_the_mouth_slightly_open() {
        let engine = VisemeEngine::standard();
        let mut face = face(ARKIT_FACE);

        engine.apply_viseme(&mut face, VisemeCode::SS, 1.0);
        assert!(weight(&face, "jawOpen") >= 0.1 - 1e-6);

        engine.apply_viseme(&mut face, VisemeCode::FF, 0.5);
        assert!(weight(&face, "jawOpen") >= 0.05 - 1e-6);
    }

    #[test]
    fn rhotic_funnels_without_closing() {
        let engine = VisemeEngine::standard();
        let mut face = face(ARKIT_FACE);

        engine.apply_viseme(&mut face, VisemeCode::RR, 1.0);

        assert!(weight(&face, "mouthFunnel") > 0.0);
        assert_eq!(weight(&face, "mouthClose"), 0.0);
        assert!(weight(&face, "jawOpen") > 0.0);
    }

    #[test]
    fn jaw_channel_is_capped() {
        let engine = VisemeEngine::standard();
        let mut face = face(&["jawOpen"]);

        engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0);

        assert!(weight(&face, "jawOpen") <= engine.config().max_jaw_weight + 1e-6);
    }

    #[test]
    fn rotates_jaw_joint_when_no_channel_exists() {
        let engine = VisemeEngine::standard();
        let mut face = face(&["V_Open"]).with_jaw(JawJoint::new("CC_Base_JawRoot", JawAxis::X));

        engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0);
        let rotation = face.jaw_rotation();
        assert!(rotation > 0.0);
        assert!(rotation <= engine.config().max_jaw_rotation + 1e-6);

        engine.apply_viseme(&mut face, VisemeCode::Sil, 1.0);
        assert_eq!(face.jaw_rotation(), 0.0);
    }

    #[test]
    fn incompatible_faces_report_no_application() {
        let engine = VisemeEngine::standard();
        let mut face = face(&["eyeBlinkLeft", "browInnerUp"]);

        for code in VisemeCode::ALL {
            assert!(!engine.apply_viseme(&mut face, code, 1.0));
        }
        assert!(!engine.analyze(&face).compatible);
    }

    #[test]
    fn out_of_range_intensity_is_clamped() {
        let engine = VisemeEngine::standard();
        let mut face = face(CC_FACE);

        engine.apply_viseme(&mut face, VisemeCode::Aa, 7.5);
        let loud = snapshot(&face);
        engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0);
        assert_eq!(loud, snapshot(&face));

        engine.apply_viseme(&mut face, VisemeCode::Aa, f32::NAN);
        assert!(articulators_are_zero(&face));
    }

    #[test]
    fn blend_boundaries_match_single_application() {
        let engine = VisemeEngine::standard();
        let baseline = |code| engine.profiles().baseline(code);

        for names in [CC_FACE, ARKIT_FACE] {
            let mut blended = face(names);
            let mut single = face(names);

            engine.blend_viseme(&mut blended, VisemeCode::Aa, VisemeCode::O, 0.0, 1.0);
            engine.apply_viseme(&mut single, VisemeCode::Aa, baseline(VisemeCode::Aa));
            assert_eq!(snapshot(&blended), snapshot(&single));

            engine.blend_viseme(&mut blended, VisemeCode::Aa, VisemeCode::O, 1.0, 0.6);
            engine.apply_viseme(&mut single, VisemeCode::O, baseline(VisemeCode::O) * 0.6);
            assert_eq!(snapshot(&blended), snapshot(&single));
        }
    }

    #[test]
    fn blend_midpoint_shows_both_shapes() {
        let engine = VisemeEngine::standard();
        let mut face = face(CC_FACE);

        assert!(engine.blend_viseme(&mut face, VisemeCode::Aa, VisemeCode::PP, 0.5, 1.0));

        assert!(weight(&face, "V_Open") > 0.0);
        assert!(weight(&face, "V_Explosive") > 0.0);
    }

    #[test]
    fn blend_clamps_progress() {
        let engine = VisemeEngine::standard();
        let mut over = face(CC_FACE);
        let mut edge = face(CC_FACE);

        engine.blend_viseme(&mut over, VisemeCode::Aa, VisemeCode::O, 3.0, 1.0);
        engine.blend_viseme(&mut edge, VisemeCode::Aa, VisemeCode::O, 1.0, 1.0);

        assert_eq!(snapshot(&over), snapshot(&edge));
    }

    #[test]
    fn resets_aliased_channels_outside_mouth_namespaces() {
        let aliases = AliasTable::standard().with_aliases(&[crate::mapping::AliasDescriptor {
            semantic: JAW_CHANNEL.to_string(),
            candidates: vec!["Rig_Mandible".to_string()],
        }]);
        let engine = VisemeEngine::new(
            Arc::new(aliases),
            Arc::new(ProfileTable::standard()),
            EngineConfig::default(),
        );
        let mut face = face(&["Rig_Mandible", "V_Open"]);

        engine.apply_viseme(&mut face, VisemeCode::Aa, 1.0);
        assert!(weight(&face, "Rig_Mandible") > 0.0);

        engine.apply_viseme(&mut face, VisemeCode::PP, 1.0);
        assert_eq!(weight(&face, "Rig_Mandible"), 0.0);
    }

    #[test]
    fn analyze_lists_resolved_channels() {
        let engine = VisemeEngine::standard();
        let report = engine.analyze(&face(CC_FACE));

        assert!(report.compatible);
        assert_eq!(report.jaw.target, JawTarget::Channel);
        assert_eq!(report.jaw.name.as_deref(), Some("Jaw_Open"));
        let aa = report
            .codes
            .iter()
            .find(|support| support.code == VisemeCode::Aa)
            .unwrap();
        assert_eq!(aa.primary, vec!["V_Open".to_string()]);
    }
}
