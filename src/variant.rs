//! Variant identity: arena handles, variation keys, breadcrumbs.
//!
//! A variant is identified by its module plus the ordered sequence of
//! `(mutator, variation)` pairs it has been split along. Handles are arena
//! indices so cloning a module is cheap and the graph stays cycle-free.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Arena handle for a logical module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub(crate) u32);

/// Arena handle for one variant of a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantId(pub(crate) u32);

impl ModuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl VariantId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One step of a variant's breadcrumb: the mutator that split the module and
/// the variation it chose for this sibling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variation {
    pub mutator: String,
    pub variation: String,
}

impl Variation {
    pub fn new(mutator: impl Into<String>, variation: impl Into<String>) -> Self {
        Self {
            mutator: mutator.into(),
            variation: variation.into(),
        }
    }
}

/// Axis-to-value view of a breadcrumb, used for variant matching.
pub(crate) type VariationMap = BTreeMap<String, String>;

pub(crate) fn to_map(variations: &[Variation]) -> VariationMap {
    variations
        .iter()
        .map(|v| (v.mutator.clone(), v.variation.clone()))
        .collect()
}

/// Overlays explicit variation requests on top of a base map. Explicit axes
/// win over inherited ones.
pub(crate) fn overlay(base: &VariationMap, explicit: &VariationMap) -> VariationMap {
    let mut merged = base.clone();
    for (axis, value) in explicit {
        merged.insert(axis.clone(), value.clone());
    }
    merged
}
