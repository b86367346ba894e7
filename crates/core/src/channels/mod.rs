//! Physical blend-shape channels of a facial asset and the resolver that maps
//! semantic names onto them.
//!
//! A [`ChannelSet`] is indexed once when the asset is loaded: exact names,
//! lower-cased names and a namespace class per channel. The per-frame path
//! only performs hash lookups, plus a linear scan for fuzzy matches when
//! every cheaper strategy misses.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::mapping::AliasTable;

/// Position of a physical channel inside its [`ChannelSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

/// Coarse classification of a physical channel, computed from its name when
/// the set is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Dedicated viseme shapes (`V_*`, `viseme_*`).
    Viseme,
    Mouth,
    Jaw,
    Tongue,
    Other,
}

/// Namespaces cleared before every viseme application.
pub const ARTICULATORS: [Namespace; 4] = [
    Namespace::Viseme,
    Namespace::Mouth,
    Namespace::Jaw,
    Namespace::Tongue,
];

const VENDOR_PREFIXES: [&str; 2] = ["cc_base_", "mixamorig:"];

impl Namespace {
    pub fn classify(name: &str) -> Self {
        let folded = name.to_ascii_lowercase();
        let stem = VENDOR_PREFIXES
            .iter()
            .find_map(|prefix| folded.strip_prefix(prefix))
            .unwrap_or(folded.as_str());

        if stem.starts_with("v_") || stem.starts_with("viseme") {
            Namespace::Viseme
        } else if stem.starts_with("mouth") || stem.starts_with("lip") {
            Namespace::Mouth
        } else if stem.starts_with("jaw") {
            Namespace::Jaw
        } else if stem.starts_with("tongue") {
            Namespace::Tongue
        } else {
            Namespace::Other
        }
    }

    pub fn is_articulator(self) -> bool {
        self != Namespace::Other
    }
}

/// Flat mapping from physical channel names to weights in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    names: Vec<String>,
    folded_names: Vec<String>,
    namespaces: Vec<Namespace>,
    weights: Vec<f32>,
    driven: Vec<bool>,
    exact: HashMap<String, ChannelId>,
    folded: HashMap<String, ChannelId>,
}

impl ChannelSet {
    /// Indexes the provided physical names. Duplicate names keep the first
    /// position for lookups.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for name in names {
            let name = name.into();
            let id = ChannelId(set.names.len());
            let folded = name.to_lowercase();

            set.exact.entry(name.clone()).or_insert(id);
            set.folded.entry(folded.clone()).or_insert(id);
            set.namespaces.push(Namespace::classify(&name));
            set.folded_names.push(folded);
            set.names.push(name);
            set.weights.push(0.0);
            set.driven.push(false);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn name(&self, id: ChannelId) -> Option<&str> {
        self.names.get(id.0).map(String::as_str)
    }

    pub fn namespace(&self, id: ChannelId) -> Option<Namespace> {
        self.namespaces.get(id.0).copied()
    }

    pub fn weight(&self, id: ChannelId) -> f32 {
        self.weights.get(id.0).copied().unwrap_or(0.0)
    }

    /// Weight of a channel by its exact physical name.
    pub fn weight_of(&self, name: &str) -> Option<f32> {
        self.find_exact(name).map(|id| self.weight(id))
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
    }

    /// Channels currently carrying a non-zero weight.
    pub fn active(&self) -> impl Iterator<Item = (&str, f32)> {
        self.iter().filter(|(_, weight)| *weight > 0.0)
    }

    pub fn find_exact(&self, name: &str) -> Option<ChannelId> {
        self.exact.get(name).copied()
    }

    pub fn find_folded(&self, name: &str) -> Option<ChannelId> {
        self.folded.get(&name.to_lowercase()).copied()
    }

    pub(crate) fn folded_names(&self) -> impl Iterator<Item = (ChannelId, &str)> {
        self.folded_names
            .iter()
            .enumerate()
            .map(|(index, name)| (ChannelId(index), name.as_str()))
    }

    /// Writes a weight, clamped to `[0, 1]`. Non-finite values write zero.
    pub fn set_weight(&mut self, id: ChannelId, value: f32) {
        if let Some(slot) = self.weights.get_mut(id.0) {
            *slot = clamp_unit(value);
        }
    }

    /// Zeroes every channel whose namespace is listed.
    pub fn reset_namespaces(&mut self, namespaces: &[Namespace]) {
        for (weight, namespace) in self.weights.iter_mut().zip(&self.namespaces) {
            if namespaces.contains(namespace) {
                *weight = 0.0;
            }
        }
    }

    /// Flags a channel so [`ChannelSet::reset_driven`] zeroes it whatever
    /// its namespace.
    pub fn mark_driven(&mut self, id: ChannelId) {
        if let Some(flag) = self.driven.get_mut(id.0) {
            *flag = true;
        }
    }

    pub fn reset_driven(&mut self) {
        for (weight, driven) in self.weights.iter_mut().zip(&self.driven) {
            if *driven {
                *weight = 0.0;
            }
        }
    }

    pub fn reset_all(&mut self) {
        self.weights.iter_mut().for_each(|weight| *weight = 0.0);
    }

    pub fn count_in(&self, namespace: Namespace) -> usize {
        self.namespaces
            .iter()
            .filter(|candidate| **candidate == namespace)
            .count()
    }
}

/// Clamps to `[0, 1]`, mapping NaN and infinities to zero.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Maps semantic channel names onto the physical names of a [`ChannelSet`].
///
/// Resolution order, first hit wins:
/// 1. exact name,
/// 2. case-insensitive name,
/// 3. alias candidates in priority order, each tried as 1 then 2,
/// 4. the same name with a `Left`/`Right` suffix swapped, tried as 1 to 3,
/// 5. substring match, constrained by the alias table's reserved categories.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    aliases: Arc<AliasTable>,
}

impl ChannelResolver {
    pub fn new(aliases: Arc<AliasTable>) -> Self {
        Self { aliases }
    }

    pub fn standard() -> Self {
        Self::new(Arc::new(AliasTable::standard()))
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn resolve(&self, channels: &ChannelSet, semantic: &str) -> Option<ChannelId> {
        if semantic.is_empty() || channels.is_empty() {
            return None;
        }

        self.resolve_direct(channels, semantic)
            .or_else(|| {
                mirrored(semantic).and_then(|swapped| self.resolve_direct(channels, &swapped))
            })
            .or_else(|| self.resolve_fuzzy(channels, semantic))
    }

    /// Physical name `semantic` resolves to, if any.
    pub fn resolve_name<'a>(&self, channels: &'a ChannelSet, semantic: &str) -> Option<&'a str> {
        self.resolve(channels, semantic)
            .and_then(|id| channels.name(id))
    }

    /// Resolves and writes `value` clamped to `[0, 1]`. Returns whether a
    /// channel was written.
    pub fn set_channel(&self, channels: &mut ChannelSet, semantic: &str, value: f32) -> bool {
        match self.resolve(channels, semantic) {
            Some(id) => {
                channels.set_weight(id, value);
                true
            }
            None => false,
        }
    }

    /// Zeroes every mouth, jaw, tongue and viseme channel, plus any channel
    /// previously marked as driven.
    pub fn reset_channels(&self, channels: &mut ChannelSet) {
        channels.reset_namespaces(&ARTICULATORS);
        channels.reset_driven();
    }

    fn resolve_direct(&self, channels: &ChannelSet, name: &str) -> Option<ChannelId> {
        match_name(channels, name).or_else(|| {
            self.aliases
                .candidates(name)
                .iter()
                .find_map(|candidate| match_name(channels, candidate))
        })
    }

    fn resolve_fuzzy(&self, channels: &ChannelSet, semantic: &str) -> Option<ChannelId> {
        let needle = semantic.to_lowercase();
        let category = self.aliases.category_for(&needle);

        channels.folded_names().find_map(|(id, physical)| {
            if let Some(category) = category {
                if !category.admits(physical) {
                    return None;
                }
            }
            physical.contains(&needle).then_some(id)
        })
    }
}

fn match_name(channels: &ChannelSet, name: &str) -> Option<ChannelId> {
    channels
        .find_exact(name)
        .or_else(|| channels.find_folded(name))
}

/// Swaps a trailing `Left`/`Right` (any case) for its counterpart.
fn mirrored(name: &str) -> Option<String> {
    let folded = name.to_ascii_lowercase();
    if folded.ends_with("left") {
        Some(format!("{}Right", &name[..name.len() - 4]))
    } else if folded.ends_with("right") {
        Some(format!("{}Left", &name[..name.len() - 5]))
    } else {
        None
    }
}
