//! The module contract consumed by the engine, and the kernel-owned common
//! property block attached to every variant.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::bottom_up::BottomUpContext;

/// A build module: a named node carrying typed properties.
///
/// Implementations hold the domain property bundles. The engine drives the
/// two deps hooks through the built-in bottom-up mutators and clones the
/// module whenever it is split into variants. Identity, breadcrumbs, and
/// dependency edges are owned by the graph, not by the implementation.
pub trait Module: Any + Send + Sync {
    /// Disabled modules are skipped by the built-in deps mutators but remain
    /// in the graph.
    fn enabled(&self) -> bool {
        true
    }

    /// Invoked by the built-in `component-deps` mutator, just before `deps`,
    /// so component references can be added while prebuilt renaming is still
    /// pending.
    fn component_deps_mutator(&mut self, _ctx: &mut BottomUpContext<'_>) {}

    /// Invoked by the built-in `deps` mutator to declare static dependencies
    /// by name.
    fn deps_mutator(&mut self, _ctx: &mut BottomUpContext<'_>) {}

    /// Clones the property bundles for a newly created sibling variant.
    fn clone_variant(&self) -> Box<dyn Module>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Debug breadcrumbs and conversion records, written only by the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CommonProperties {
    /// Current name of the module, tracking renames as they are requested
    /// (graph lookups see the new name only at the next pass).
    pub debug_name: String,
    /// Names of the mutators that split this variant, in order.
    pub debug_mutators: Vec<String>,
    /// Variation chosen at each split, parallel to `debug_mutators`.
    pub debug_variations: Vec<String>,
    /// Conversion descriptors recorded by the conversion pipeline.
    pub conversion_info: Vec<ConversionDescriptor>,
}

/// One emitted conversion target, attached to a module by the terminal
/// conversion mutator for the external emission step to consume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionDescriptor {
    /// Rule class of the emitted target.
    pub rule_class: String,
    /// Name of the emitted target.
    pub target_name: String,
    /// Attribute bundle, already shaped for the external system.
    pub attrs: serde_json::Value,
    /// Optional platform restriction attribute. When present, the target is
    /// only buildable where the attribute holds.
    pub restriction: Option<serde_json::Value>,
}
