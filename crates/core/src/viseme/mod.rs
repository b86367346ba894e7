//! Viseme codes and the static per-code profile data.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{channels::clamp_unit, RigError};

/// Closed set of mouth shapes, following the Oculus viseme naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VisemeCode {
    /// Mouth at rest.
    #[default]
    #[serde(rename = "sil")]
    Sil,
    /// Open vowel.
    #[serde(rename = "aa")]
    Aa,
    /// Mid front vowel.
    E,
    /// Close front vowel.
    I,
    /// Rounded mid vowel.
    O,
    /// Rounded close vowel.
    U,
    /// Bilabial stop (p, b, m).
    PP,
    /// Labiodental fricative (f, v).
    FF,
    /// Dental fricative.
    TH,
    /// Alveolar sibilant (s, z).
    SS,
    /// Alveolar stop (t, d).
    DD,
    /// Velar stop (k, g).
    #[serde(rename = "kk")]
    Kk,
    /// Nasal and lateral (n, l).
    #[serde(rename = "nn")]
    Nn,
    /// Rhotic.
    RR,
    /// Postalveolar affricate.
    CH,
}

impl VisemeCode {
    pub const ALL: [VisemeCode; 15] = [
        VisemeCode::Sil,
        VisemeCode::Aa,
        VisemeCode::E,
        VisemeCode::I,
        VisemeCode::O,
        VisemeCode::U,
        VisemeCode::PP,
        VisemeCode::FF,
        VisemeCode::TH,
        VisemeCode::SS,
        VisemeCode::DD,
        VisemeCode::Kk,
        VisemeCode::Nn,
        VisemeCode::RR,
        VisemeCode::CH,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VisemeCode::Sil => "sil",
            VisemeCode::Aa => "aa",
            VisemeCode::E => "E",
            VisemeCode::I => "I",
            VisemeCode::O => "O",
            VisemeCode::U => "U",
            VisemeCode::PP => "PP",
            VisemeCode::FF => "FF",
            VisemeCode::TH => "TH",
            VisemeCode::SS => "SS",
            VisemeCode::DD => "DD",
            VisemeCode::Kk => "kk",
            VisemeCode::Nn => "nn",
            VisemeCode::RR => "RR",
            VisemeCode::CH => "CH",
        }
    }

    /// Parses a code label, treating anything unknown as silence.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(VisemeCode::Sil)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for VisemeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisemeCode {
    type Err = RigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        VisemeCode::ALL
            .into_iter()
            .find(|code| code.as_str() == value)
            .ok_or_else(|| RigError::msg(format!("unknown viseme code `{value}`")))
    }
}

/// How a fallback heuristic derives its amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FallbackAmount {
    /// `factor × baseline × intensity`.
    Scaled(f32),
    /// `factor × intensity`, ignoring the baseline.
    Direct(f32),
}

impl FallbackAmount {
    pub fn resolve(self, baseline: f32, intensity: f32) -> f32 {
        match self {
            FallbackAmount::Scaled(factor) => clamp_unit(factor * baseline * intensity),
            FallbackAmount::Direct(factor) => clamp_unit(factor * intensity),
        }
    }
}

/// Generic shape used when a profile's primary channels are missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    /// Drive a generic semantic channel.
    Channel {
        name: &'static str,
        amount: FallbackAmount,
    },
    /// Keep the jaw at least `factor × intensity` open.
    MinJawAperture(f32),
}

/// Static description of how one viseme code drives a face.
#[derive(Debug, Clone, PartialEq)]
pub struct VisemeProfile {
    pub code: VisemeCode,
    /// Semantic channels set at `baseline × intensity`; every one that
    /// resolves is written.
    pub primary: &'static [&'static str],
    pub baseline: f32,
    pub jaw_coefficient: f32,
    /// Applied in order when nothing in `primary` resolves.
    pub fallbacks: &'static [Fallback],
}

/// One profile per [`VisemeCode`], indexed by code.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: Vec<VisemeProfile>,
}

impl ProfileTable {
    pub fn standard() -> Self {
        let profiles = VisemeCode::ALL
            .into_iter()
            .map(standard_profile)
            .collect();
        Self { profiles }
    }

    pub fn get(&self, code: VisemeCode) -> &VisemeProfile {
        &self.profiles[code.index()]
    }

    pub fn baseline(&self, code: VisemeCode) -> f32 {
        self.get(code).baseline
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisemeProfile> {
        self.profiles.iter()
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::standard()
    }
}

const OPEN: &[&str] = &["V_Open", "V_Lip_Open"];
const WIDE: &[&str] = &[
    "V_Wide",
    "Mouth_Smile_L",
    "Mouth_Smile_R",
    "Mouth_Stretch_L",
    "Mouth_Stretch_R",
];
const TIGHT_O: &[&str] = &[
    "V_Tight_O",
    "Mouth_Pucker_Up_L",
    "Mouth_Pucker_Up_R",
    "Mouth_Pucker_Down_L",
    "Mouth_Pucker_Down_R",
];
const TIGHT: &[&str] = &["V_Tight", "Mouth_Pucker_Up_L", "Mouth_Pucker_Up_R"];
const EXPLOSIVE: &[&str] = &["V_Explosive", "Mouth_Press_L", "Mouth_Press_R"];
const DENTAL_LIP: &[&str] = &[
    "V_Dental_Lip",
    "Mouth_Funnel_Up_L",
    "Mouth_Funnel_Up_R",
    "Mouth_Funnel_Down_L",
    "Mouth_Funnel_Down_R",
];
const AFFRICATE: &[&str] = &["V_Affricate", "Mouth_Tighten_L", "Mouth_Tighten_R"];
const TONGUE_OUT: &[&str] = &["V_Tongue_Out"];
const TONGUE_RAISE: &[&str] = &["V_Tongue_Raise", "V_Tongue_Up"];
const TONGUE_UP: &[&str] = &["V_Tongue_up", "V_Tongue_Raise"];
const RHOTIC: &[&str] = &["V_RR", "Mouth_Funnel_Up_L", "Mouth_Funnel_Up_R"];
const POSTALVEOLAR: &[&str] = &["Mouth_Tighten_L", "Mouth_Tighten_R", "V_Affricate"];
const REST: &[&str] = &["V_None"];

const NO_FALLBACK: &[Fallback] = &[];

const fn channel(name: &'static str, amount: FallbackAmount) -> Fallback {
    Fallback::Channel { name, amount }
}

const OPEN_FALLBACK: &[Fallback] = &[
    channel("mouthStretchLeft", FallbackAmount::Scaled(0.6)),
    channel("mouthStretchRight", FallbackAmount::Scaled(0.6)),
    channel("mouthSmileLeft", FallbackAmount::Scaled(0.36)),
    channel("mouthSmileRight", FallbackAmount::Scaled(0.36)),
];
const FRONT_FALLBACK: &[Fallback] = &[
    channel("mouthStretchLeft", FallbackAmount::Scaled(0.8)),
    channel("mouthStretchRight", FallbackAmount::Scaled(0.8)),
    channel("mouthSmileLeft", FallbackAmount::Scaled(0.48)),
    channel("mouthSmileRight", FallbackAmount::Scaled(0.48)),
];
const ROUND_FALLBACK: &[Fallback] = &[
    channel("mouthPucker", FallbackAmount::Scaled(0.9)),
    channel("mouthFunnel", FallbackAmount::Scaled(0.7)),
];
const BILABIAL_FALLBACK: &[Fallback] = &[
    channel("mouthClose", FallbackAmount::Direct(0.85)),
    channel("mouthPressLeft", FallbackAmount::Direct(0.7)),
    channel("mouthPressRight", FallbackAmount::Direct(0.7)),
];
const FRICATIVE_FALLBACK: &[Fallback] = &[Fallback::MinJawAperture(0.1)];
const RHOTIC_FALLBACK: &[Fallback] = &[channel("mouthFunnel", FallbackAmount::Scaled(0.4))];

fn standard_profile(code: VisemeCode) -> VisemeProfile {
    let (primary, baseline, jaw_coefficient, fallbacks) =
        match code {
            VisemeCode::Sil => (REST, 0.0, 0.0, NO_FALLBACK),
            VisemeCode::Aa => (OPEN, 0.8, 0.8, OPEN_FALLBACK),
            VisemeCode::E => (WIDE, 0.6, 0.4, FRONT_FALLBACK),
            VisemeCode::I => (WIDE, 0.5, 0.2, FRONT_FALLBACK),
            VisemeCode::O => (TIGHT_O, 0.7, 0.5, ROUND_FALLBACK),
            VisemeCode::U => (TIGHT, 0.6, 0.3, ROUND_FALLBACK),
            VisemeCode::PP => (EXPLOSIVE, 0.9, 0.0, BILABIAL_FALLBACK),
            VisemeCode::FF => (DENTAL_LIP, 0.7, 0.1, FRICATIVE_FALLBACK),
            VisemeCode::TH => (TONGUE_OUT, 0.5, 0.2, FRICATIVE_FALLBACK),
            VisemeCode::SS => (AFFRICATE, 0.7, 0.1, FRICATIVE_FALLBACK),
            VisemeCode::DD => (AFFRICATE, 0.8, 0.3, NO_FALLBACK),
            VisemeCode::Kk => (TONGUE_RAISE, 0.8, 0.2, NO_FALLBACK),
            VisemeCode::Nn => (TONGUE_UP, 0.6, 0.2, NO_FALLBACK),
            VisemeCode::RR => (RHOTIC, 0.6, 0.3, RHOTIC_FALLBACK),
            VisemeCode::CH => (POSTALVEOLAR, 0.8, 0.2, NO_FALLBACK),
        };

    VisemeProfile {
        code,
        primary,
        baseline,
        jaw_coefficient,
        fallbacks,
    }
}
