use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    channels::{ChannelSet, Namespace},
    mapping::{AliasTable, JAW_CHANNEL},
    viseme::ProfileTable,
};

/// Joint names commonly used for the jaw bone by popular rigs.
pub const JAW_JOINT_NAMES: [&str; 5] = [
    "CC_Base_Jaw",
    "CC_Base_JawRoot",
    "Jaw",
    "LowerJaw",
    "mixamorig:Jaw",
];

/// Local axis the jaw joint opens around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JawAxis {
    #[default]
    X,
    Y,
    Z,
}

/// A rotatable jaw joint with a single opening axis. The host engine copies
/// [`JawJoint::rotation`] onto its bone after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JawJoint {
    pub name: String,
    pub axis: JawAxis,
    rotation: f32,
}

impl JawJoint {
    pub fn new(name: impl Into<String>, axis: JawAxis) -> Self {
        Self {
            name: name.into(),
            axis,
            rotation: 0.0,
        }
    }

    /// Picks the first bone whose name matches a known jaw joint name.
    pub fn find<'a, I>(bone_names: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        bone_names
            .into_iter()
            .find(|name| JAW_JOINT_NAMES.contains(name))
            .map(|name| Self::new(name, JawAxis::X))
    }

    /// Opening angle in radians around [`JawJoint::axis`].
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn set_rotation(&mut self, radians: f32) {
        self.rotation = if radians.is_finite() { radians.max(0.0) } else { 0.0 };
    }

    pub fn reset(&mut self) {
        self.rotation = 0.0;
    }
}

/// The writable surface of a facial asset: its blend-shape channels and an
/// optional jaw joint.
#[derive(Debug, Clone, Default)]
pub struct FaceAsset {
    pub name: String,
    pub channels: ChannelSet,
    pub jaw: Option<JawJoint>,
}

impl FaceAsset {
    pub fn new(name: impl Into<String>, channels: ChannelSet) -> Self {
        Self {
            name: name.into(),
            channels,
            jaw: None,
        }
    }

    pub fn with_jaw(mut self, jaw: JawJoint) -> Self {
        self.jaw = Some(jaw);
        self
    }

    pub fn jaw_rotation(&self) -> f32 {
        self.jaw.as_ref().map(JawJoint::rotation).unwrap_or(0.0)
    }
}

const EXTRA_WANTED: [&str; 12] = [
    "jawOpen",
    "mouthOpen",
    "mouthClose",
    "mouthSmile",
    "mouthFrown",
    "Mouth_Close",
    "viseme_sil",
    "viseme_aa",
    "viseme_E",
    "viseme_I",
    "viseme_O",
    "viseme_U",
];
const MOUTH_KEYS: [&str; 5] = ["mouth_", "mouth", "lip", "jaw", "viseme_"];
const PREFERRED_NAMES: [&str; 4] = ["face", "head", "teeth", "mouth"];
const PENALIZED_NAMES: [&str; 4] = ["brow", "eyebrow", "lash", "lid"];

/// Score used by [`pick_face_asset`]; higher is more likely the talking face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceScore {
    pub score: f32,
    pub name_score: i32,
    pub mouth_count: usize,
}

pub fn score_face_asset(
    asset: &FaceAsset,
    profiles: &ProfileTable,
    aliases: &AliasTable,
) -> FaceScore {
    let channels = &asset.channels;

    // Profiles share primary names (V_Affricate, Mouth_Smile_L); count each once.
    let wanted: HashSet<&str> = profiles
        .iter()
        .flat_map(|profile| profile.primary.iter().copied())
        .chain(aliases.candidates(JAW_CHANNEL).iter().map(String::as_str))
        .chain(EXTRA_WANTED)
        .collect();
    let mut score = wanted
        .iter()
        .filter(|name| channels.find_exact(name).is_some())
        .count() as f32;

    let folded: Vec<String> = channels.names().map(str::to_lowercase).collect();
    let mouth_count = folded
        .iter()
        .filter(|name| MOUTH_KEYS.iter().any(|key| name.contains(key)))
        .count();
    score += mouth_count.min(20) as f32 * 0.25;

    let eye_like = folded
        .iter()
        .filter(|name| ["eye", "brow"].iter().any(|prefix| name.starts_with(prefix)))
        .count();
    let articulators = channels.count_in(Namespace::Mouth)
        + channels.count_in(Namespace::Jaw)
        + channels.count_in(Namespace::Viseme);
    if eye_like >= 6 && articulators < 3 {
        score -= 4.0;
    }
    score += channels.len() as f32 * 0.01;

    let asset_name = asset.name.to_lowercase();
    let mut name_score = 0;
    if PREFERRED_NAMES.iter().any(|key| asset_name.contains(key)) {
        name_score += 2;
    }
    if PENALIZED_NAMES.iter().any(|key| asset_name.contains(key)) {
        name_score -= 2;
    }

    FaceScore {
        score,
        name_score,
        mouth_count,
    }
}

/// Picks the candidate most likely to be the talking face. Ties on score go
/// to the better name score, then to the earlier candidate.
pub fn pick_face_asset(
    candidates: &[FaceAsset],
    profiles: &ProfileTable,
    aliases: &AliasTable,
) -> Option<usize> {
    let mut best: Option<(usize, FaceScore)> = None;

    for (index, asset) in candidates.iter().enumerate() {
        let score = score_face_asset(asset, profiles, aliases);
        let better = match &best {
            None => true,
            Some((_, current)) => {
                score.score > current.score
                    || (score.score == current.score && score.name_score > current.name_score)
            }
        };
        if better {
            best = Some((index, score));
        }
    }

    if let Some((index, score)) = &best {
        tracing::debug!(
            face = %candidates[*index].name,
            score = score.score,
            mouth_count = score.mouth_count,
            "picked face asset"
        );
    }

    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, channels: &[&str]) -> FaceAsset {
        FaceAsset::new(name, ChannelSet::new(channels.iter().copied()))
    }

    #[test]
    fn finds_known_jaw_joints() {
        let joint = JawJoint::find(["Hips", "Spine", "CC_Base_JawRoot", "Head"]).unwrap();
        assert_eq!(joint.name, "CC_Base_JawRoot");
        assert!(JawJoint::find(["Hips", "Head"]).is_none());
    }

    #[test]
    fn jaw_rotation_never_goes_negative() {
        let mut joint = JawJoint::new("Jaw", JawAxis::X);
        joint.set_rotation(-0.4);
        assert_eq!(joint.rotation(), 0.0);
        joint.set_rotation(f32::NAN);
        assert_eq!(joint.rotation(), 0.0);
        joint.set_rotation(0.15);
        assert_eq!(joint.rotation(), 0.15);
    }

    #[test]
    fn picks_mouth_mesh_over_eye_mesh() {
        let candidates = vec![
            asset(
                "Eyelashes",
                &[
                    "eyeBlinkLeft",
                    "eyeBlinkRight",
                    "eyeLookUpLeft",
                    "eyeLookUpRight",
                    "eyeWideLeft",
                    "eyeWideRight",
                    "browInnerUp",
                ],
            ),
            asset(
                "CC_Base_Body",
                &["V_Open", "V_Wide", "V_Explosive", "Jaw_Open", "Mouth_Close"],
            ),
        ];

        let index = pick_face_asset(
            &candidates,
            &ProfileTable::standard(),
            &AliasTable::standard(),
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn name_breaks_score_ties() {
        let candidates = vec![
            asset("Brow_Mesh", &["jawOpen"]),
            asset("Head_Mesh", &["jawOpen"]),
        ];

        let index = pick_face_asset(
            &candidates,
            &ProfileTable::standard(),
            &AliasTable::standard(),
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn shared_primary_names_score_once() {
        let score = score_face_asset(
            &asset("Body", &["V_Affricate"]),
            &ProfileTable::standard(),
            &AliasTable::standard(),
        );

        assert!((score.score - 1.01).abs() < 1e-6);
    }

    #[test]
    fn empty_candidate_list_picks_nothing() {
        assert_eq!(
            pick_face_asset(&[], &ProfileTable::standard(), &AliasTable::standard()),
            None
        );
    }
}
