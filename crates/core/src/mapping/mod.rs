use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Semantic name of the dedicated jaw-aperture channel.
pub const JAW_CHANNEL: &str = "jawOpen";

/// Describes one entry of the alias table: a semantic channel name and the
/// physical names it may appear under, most specific first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasDescriptor {
    pub semantic: String,
    pub candidates: Vec<String>,
}

/// A family of semantic names whose fuzzy matches must stay inside a set of
/// physical prefixes, e.g. an `eye*` lookup may only land on `eye*`,
/// `eyelid*` or `eyelash*` channels and never on `eyebrow*` ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedCategory {
    pub semantic_prefix: String,
    pub physical_prefixes: Vec<String>,
    /// Prefixes rejected even when a physical prefix matches.
    #[serde(default)]
    pub excluded_prefixes: Vec<String>,
}

impl ReservedCategory {
    pub fn new(semantic_prefix: &str, physical_prefixes: &[&str]) -> Self {
        Self {
            semantic_prefix: semantic_prefix.to_ascii_lowercase(),
            physical_prefixes: fold_all(physical_prefixes),
            excluded_prefixes: Vec::new(),
        }
    }

    pub fn excluding(mut self, prefixes: &[&str]) -> Self {
        self.excluded_prefixes.extend(fold_all(prefixes));
        self
    }

    /// Both arguments are expected to be lower-cased already.
    pub fn claims(&self, folded_semantic: &str) -> bool {
        folded_semantic.starts_with(&self.semantic_prefix)
    }

    pub fn admits(&self, folded_physical: &str) -> bool {
        let starts = |prefix: &String| folded_physical.starts_with(prefix.as_str());
        self.physical_prefixes.iter().any(starts) && !self.excluded_prefixes.iter().any(starts)
    }
}

fn fold_all(prefixes: &[&str]) -> Vec<String> {
    prefixes
        .iter()
        .map(|prefix| prefix.to_ascii_lowercase())
        .collect()
}

/// Read-only lookup from semantic channel names to physical candidates.
///
/// Built once and shared between resolvers. Lookups are exact first and
/// case-insensitive second.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, Vec<String>>,
    folded: HashMap<String, String>,
    categories: Vec<ReservedCategory>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias table covering ARKit, Character Creator, Oculus viseme and a
    /// handful of ad-hoc naming schemes.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for (semantic, candidates) in STANDARD_ALIASES {
            table.insert(semantic, candidates.iter().copied());
        }
        table.categories.push(
            ReservedCategory::new("eye", &["eye", "eyelid", "eyelash"]).excluding(&["eyebrow"]),
        );
        table
            .categories
            .push(ReservedCategory::new("brow", &["brow", "eyebrow"]));
        table
    }

    /// Adds or replaces the candidates of a semantic name.
    pub fn insert<I, S>(&mut self, semantic: &str, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.folded
            .insert(semantic.to_lowercase(), semantic.to_string());
        self.entries.insert(
            semantic.to_string(),
            candidates.into_iter().map(Into::into).collect(),
        );
    }

    /// Merges user supplied descriptors on top of the current entries.
    pub fn extend(&mut self, descriptors: &[AliasDescriptor]) {
        for descriptor in descriptors {
            self.insert(&descriptor.semantic, descriptor.candidates.iter().cloned());
        }
    }

    pub fn with_aliases(mut self, descriptors: &[AliasDescriptor]) -> Self {
        self.extend(descriptors);
        self
    }

    /// Candidates for `semantic`, or an empty slice when the name is unknown.
    pub fn candidates(&self, semantic: &str) -> &[String] {
        if let Some(candidates) = self.entries.get(semantic) {
            return candidates;
        }

        self.folded
            .get(&semantic.to_lowercase())
            .and_then(|key| self.entries.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Category constraining fuzzy matches of an already lower-cased name.
    pub fn category_for(&self, folded_semantic: &str) -> Option<&ReservedCategory> {
        self.categories
            .iter()
            .find(|category| category.claims(folded_semantic))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const STANDARD_ALIASES: &[(&str, &[&str])] = &[
    (
        "eyeBlinkLeft",
        &[
            "eyeBlinkLeft",
            "BlinkLeft",
            "blink_L",
            "EyelidClose_L",
            "EyeBlink_L",
            "Eye_Blink_L",
            "Eyelid_Inner_Down_L",
            "Eyelid_Outer_Down_L",
            "Eyelash_Upper_Down_L",
            "Eyelash_Lower_Up_L",
        ],
    ),
    (
        "eyeBlinkRight",
        &[
            "eyeBlinkRight",
            "BlinkRight",
            "blink_R",
            "EyelidClose_R",
            "EyeBlink_R",
            "Eye_Blink_R",
            "Eyelid_Inner_Down_R",
            "Eyelid_Outer_Down_R",
            "Eyelash_Upper_Down_R",
            "Eyelash_Lower_Up_R",
        ],
    ),
    ("eyeLookUpLeft", &["eyeLookUpLeft", "lookUp_L", "EyeUp_L"]),
    ("eyeLookUpRight", &["eyeLookUpRight", "lookUp_R", "EyeUp_R"]),
    ("eyeLookDownLeft", &["eyeLookDownLeft", "lookDown_L", "EyeDown_L"]),
    ("eyeLookDownRight", &["eyeLookDownRight", "lookDown_R", "EyeDown_R"]),
    ("eyeLookInLeft", &["eyeLookInLeft", "lookIn_L", "EyeIn_L"]),
    ("eyeLookInRight", &["eyeLookInRight", "lookIn_R", "EyeIn_R"]),
    ("eyeLookOutLeft", &["eyeLookOutLeft", "lookOut_L", "EyeOut_L"]),
    ("eyeLookOutRight", &["eyeLookOutRight", "lookOut_R", "EyeOut_R"]),
    ("eyeSquintLeft", &["eyeSquintLeft", "EyeSquint_L", "squint_L"]),
    ("eyeSquintRight", &["eyeSquintRight", "EyeSquint_R", "squint_R"]),
    ("eyeWideLeft", &["eyeWideLeft", "EyeWide_L", "wide_L"]),
    ("eyeWideRight", &["eyeWideRight", "EyeWide_R", "wide_R"]),
    (
        "browInnerUp",
        &["browInnerUp", "BrowsUpCenter", "InnerBrowUp", "BrowInnerUp"],
    ),
    ("browDownLeft", &["browDownLeft", "BrowsDownLeft", "BrowDown_L"]),
    ("browDownRight", &["browDownRight", "BrowsDownRight", "BrowDown_R"]),
    ("browOuterUpLeft", &["browOuterUpLeft", "BrowsUpLeft", "BrowUp_L"]),
    ("browOuterUpRight", &["browOuterUpRight", "BrowsUpRight", "BrowUp_R"]),
    (
        JAW_CHANNEL,
        &[
            "jawOpen",
            "JawOpen",
            "Jaw_Open",
            "CC_Base_JawOpen",
            "CC_Base_Jaw",
            "Mouth_Open",
            "mouthOpen",
            "Open_Mouth",
            "MouthOpen",
        ],
    ),
    (
        "mouthClose",
        &["mouthClose", "Mouth_Close", "MouthClose", "Close_Mouth"],
    ),
    (
        "mouthPressLeft",
        &[
            "mouthPressLeft",
            "Mouth_Press_L",
            "Press_L",
            "MouthPress_L",
            "mouthCloseLeft",
        ],
    ),
    (
        "mouthPressRight",
        &[
            "mouthPressRight",
            "Mouth_Press_R",
            "Press_R",
            "MouthPress_R",
            "mouthCloseRight",
        ],
    ),
    (
        "mouthStretchLeft",
        &[
            "mouthStretchLeft",
            "Mouth_Stretch_L",
            "StretchLeft",
            "mouthWideLeft",
        ],
    ),
    (
        "mouthStretchRight",
        &[
            "mouthStretchRight",
            "Mouth_Stretch_R",
            "StretchRight",
            "mouthWideRight",
        ],
    ),
    (
        "mouthSmileLeft",
        &["mouthSmileLeft", "Mouth_Smile_L", "SmileLeft", "smile_L"],
    ),
    (
        "mouthSmileRight",
        &["mouthSmileRight", "Mouth_Smile_R", "SmileRight", "smile_R"],
    ),
    (
        "mouthPucker",
        &["mouthPucker", "Mouth_Pucker", "Pucker", "Mouth_Pucker_C"],
    ),
    (
        "mouthFunnel",
        &["mouthFunnel", "Mouth_Funnel", "Funnel", "Mouth_Funnel_C"],
    ),
    ("tongueOut", &["tongueOut", "Tongue_Out", "V_Tongue_Out"]),
    (
        "tongueUp",
        &[
            "tongueUp",
            "Tongue_Up",
            "V_Tongue_up",
            "V_Tongue_Up",
            "V_Tongue_Raise",
        ],
    ),
    // Character Creator visemes also ship under Oculus names on some exports.
    ("V_None", &["V_None", "viseme_sil"]),
    ("V_Open", &["V_Open", "viseme_aa"]),
    ("V_Wide", &["V_Wide", "viseme_E", "viseme_I"]),
    ("V_Tight_O", &["V_Tight_O", "viseme_O"]),
    ("V_Tight", &["V_Tight", "viseme_U"]),
    ("V_Explosive", &["V_Explosive", "viseme_PP"]),
    ("V_Dental_Lip", &["V_Dental_Lip", "viseme_FF"]),
    ("V_Tongue_Out", &["V_Tongue_Out", "viseme_TH"]),
    (
        "V_Affricate",
        &["V_Affricate", "viseme_SS", "viseme_DD", "viseme_CH"],
    ),
    ("V_Tongue_Raise", &["V_Tongue_Raise", "viseme_kk"]),
    ("V_Tongue_up", &["V_Tongue_up", "viseme_nn"]),
    ("V_RR", &["V_RR", "viseme_RR"]),
];
