//! Graph kernel: the module-variant arena and its mutation primitives.
//!
//! Stores logical modules, their variants, and tagged dependency edges.
//! Variants are arena slots addressed by [`VariantId`]; a retired variant
//! (one that has been split) keeps its slot so older handles stay valid.
//! None of the primitives here are user-facing; the drivers in
//! `bottom_up`, `top_down`, and `transition` wrap them.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use serde_json::json;

use crate::error::EngineError;
use crate::module::{CommonProperties, ConversionDescriptor, Module};
use crate::name::check_module_name;
use crate::provider::{downcast, ProviderKey, ProviderValue};
use crate::tag::TagRef;
use crate::variant::{overlay, to_map, ModuleId, VariantId, Variation, VariationMap};

mod resolve;

pub(crate) use resolve::{PendingReplace, PendingReverse, ReplacePredicate};

/// A dependency edge, owned by its source variant.
#[derive(Clone)]
pub(crate) struct DepEdge {
    pub(crate) tag: TagRef,
    pub(crate) target: DepTarget,
}

/// Edge target: concrete once a variant has been chosen, dangling while the
/// target module is known only by name. Dangling edges must be resolved by
/// the end of the pass that created them.
#[derive(Clone)]
pub(crate) enum DepTarget {
    Concrete(VariantId),
    Dangling {
        name: String,
        explicit: VariationMap,
        far: bool,
    },
}

/// Named re-target from a pre-split identity to one of the split's children.
pub(crate) struct AliasEntry {
    pub(crate) from: Vec<Variation>,
    pub(crate) to: VariantId,
}

/// The most recent split of a module, kept for the duration of one pass so
/// aliasing and provider writes can refer to the children.
pub(crate) struct SplitRecord {
    pub(crate) mutator: String,
    pub(crate) children: Vec<VariantId>,
}

pub(crate) struct LogicalModule {
    name: String,
    pending_rename: Option<String>,
    variants: Vec<VariantId>,
    aliases: Vec<AliasEntry>,
    pub(crate) last_split: Option<SplitRecord>,
}

/// One variant of a module.
pub struct Variant {
    id: VariantId,
    module: ModuleId,
    variations: Vec<Variation>,
    local_variations: Vec<Variation>,
    pub(crate) logic: Option<Box<dyn Module>>,
    pub(crate) common: CommonProperties,
    pub(crate) deps: Vec<DepEdge>,
    pub(crate) default_variation: Option<String>,
    alive: bool,
    /// Children that replaced this variant when it was split.
    replaced_by: Vec<VariantId>,
}

impl Variant {
    pub fn id(&self) -> VariantId {
        self.id
    }

    pub fn module_id(&self) -> ModuleId {
        self.module
    }

    pub fn variations(&self) -> &[Variation] {
        &self.variations
    }

    pub fn local_variations(&self) -> &[Variation] {
        &self.local_variations
    }

    pub fn common(&self) -> &CommonProperties {
        &self.common
    }

    /// Value of this variant on the named axis, if it has been split there.
    pub fn variation_of(&self, axis: &str) -> Option<&str> {
        self.variations
            .iter()
            .chain(self.local_variations.iter())
            .find(|v| v.mutator == axis)
            .map(|v| v.variation.as_str())
    }

    /// Downcast access to the module's property bundles.
    pub fn logic_as<T: 'static>(&self) -> Option<&T> {
        self.logic.as_ref().and_then(|m| m.as_any().downcast_ref())
    }

    /// Concrete outgoing edges, in declaration order.
    pub fn concrete_deps(&self) -> impl Iterator<Item = (&TagRef, VariantId)> + '_ {
        self.deps.iter().filter_map(|e| match e.target {
            DepTarget::Concrete(t) => Some((&e.tag, t)),
            DepTarget::Dangling { .. } => None,
        })
    }

    pub(crate) fn variation_map(&self) -> VariationMap {
        to_map(&self.variations)
    }
}

/// How incoming edges are treated when a variant is split.
pub(crate) enum Repoint {
    /// Breadcrumb matching, then the source's default variation, then the
    /// edge degrades to dangling. Used by `create_variations`.
    Matching,
    /// All incoming edges follow the first child. Local splits do not
    /// participate in matching, so the identity in non-local space is
    /// unchanged. Used by `create_local_variations`.
    FirstChild,
    /// Leave incoming edges alone; the caller rewrites every edge itself.
    /// Used by the transition driver.
    Untouched,
}

/// Result of an edge addition.
pub(crate) enum AddedDep {
    Resolved(VariantId),
    Deferred,
}

/// The module-variant graph for one build invocation.
#[derive(Default)]
pub struct ModuleGraph {
    modules: Vec<LogicalModule>,
    variants: Vec<Variant>,
    names: HashMap<String, ModuleId>,
    providers: HashMap<(VariantId, u64), ProviderValue>,
    pub(crate) pending_reverse: Vec<PendingReverse>,
    pub(crate) pending_replace: Vec<PendingReplace>,
    pub(crate) pending_modules: Vec<(String, Box<dyn Module>)>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level module with an empty breadcrumb. Used by the loader
    /// before phase 1 and by the barrier that materializes `create_module`
    /// requests.
    pub fn add_module(
        &mut self,
        name: impl Into<String>,
        logic: Box<dyn Module>,
    ) -> Result<ModuleId, EngineError> {
        let name = name.into();
        check_module_name(&name)?;
        if self.names.contains_key(&name) {
            return Err(EngineError::DuplicateModuleName(name));
        }
        let mid = ModuleId(self.modules.len() as u32);
        let vid = VariantId(self.variants.len() as u32);
        self.variants.push(Variant {
            id: vid,
            module: mid,
            variations: Vec::new(),
            local_variations: Vec::new(),
            logic: Some(logic),
            common: CommonProperties {
                debug_name: name.clone(),
                ..CommonProperties::default()
            },
            deps: Vec::new(),
            default_variation: None,
            alive: true,
            replaced_by: Vec::new(),
        });
        self.modules.push(LogicalModule {
            name: name.clone(),
            pending_rename: None,
            variants: vec![vid],
            aliases: Vec::new(),
            last_split: None,
        });
        self.names.insert(name, mid);
        Ok(mid)
    }

    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    pub fn module_name(&self, id: ModuleId) -> &str {
        &self.modules[id.index()].name
    }

    pub fn variant(&self, id: VariantId) -> &Variant {
        &self.variants[id.index()]
    }

    pub fn variant_module_name(&self, id: VariantId) -> &str {
        self.module_name(self.variants[id.index()].module)
    }

    /// Live variants of a module, in creation order.
    pub fn variants_of(&self, name: &str) -> Vec<&Variant> {
        match self.names.get(name) {
            Some(mid) => self.modules[mid.index()]
                .variants
                .iter()
                .map(|v| &self.variants[v.index()])
                .filter(|v| v.alive)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn live_variants(&self) -> impl Iterator<Item = &Variant> + '_ {
        self.variants.iter().filter(|v| v.alive)
    }

    /// Exact lookup of a live variant by its non-local breadcrumb.
    pub fn find_variant(&self, name: &str, variations: &[(&str, &str)]) -> Option<VariantId> {
        let mid = self.names.get(name)?;
        let want: VariationMap = variations
            .iter()
            .map(|(a, v)| (a.to_string(), v.to_string()))
            .collect();
        self.modules[mid.index()]
            .variants
            .iter()
            .map(|v| &self.variants[v.index()])
            .find(|v| v.alive && v.variation_map() == want)
            .map(|v| v.id)
    }

    pub fn provider<T: 'static + Send + Sync>(
        &self,
        variant: VariantId,
        key: ProviderKey<T>,
    ) -> Option<&T> {
        self.providers
            .get(&(variant, key.raw()))
            .and_then(downcast::<T>)
    }

    pub(crate) fn set_provider_raw(
        &mut self,
        variant: VariantId,
        key: u64,
        value: ProviderValue,
    ) -> Result<(), EngineError> {
        use std::collections::hash_map::Entry;
        match self.providers.entry((variant, key)) {
            Entry::Occupied(_) => Err(EngineError::ProviderRewrite {
                module: self.variant_module_name(variant).to_string(),
                variant: describe_variations(&self.variants[variant.index()].variations),
            }),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    pub(crate) fn is_live(&self, v: VariantId) -> bool {
        self.variants[v.index()].alive
    }

    pub(crate) fn push_conversion_info(&mut self, v: VariantId, descriptor: ConversionDescriptor) {
        self.variants[v.index()]
            .common
            .conversion_info
            .push(descriptor);
    }

    pub(crate) fn take_logic(&mut self, v: VariantId) -> Option<Box<dyn Module>> {
        self.variants[v.index()].logic.take()
    }

    pub(crate) fn return_logic(&mut self, v: VariantId, logic: Box<dyn Module>) {
        debug_assert!(self.variants[v.index()].logic.is_none());
        self.variants[v.index()].logic = Some(logic);
    }

    pub(crate) fn logic_ref(&self, v: VariantId) -> Option<&dyn Module> {
        self.variants[v.index()].logic.as_deref()
    }

    pub(crate) fn module_of(&self, v: VariantId) -> ModuleId {
        self.variants[v.index()].module
    }

    pub(crate) fn concrete_deps_of(&self, v: VariantId) -> Vec<VariantId> {
        let mut deps: Vec<VariantId> = self.variants[v.index()]
            .deps
            .iter()
            .filter_map(|e| match e.target {
                DepTarget::Concrete(t) => Some(t),
                DepTarget::Dangling { .. } => None,
            })
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Concrete edges with their indices, for the transition driver's
    /// wholesale rewrite.
    pub(crate) fn concrete_edges_of(&self, v: VariantId) -> Vec<(usize, TagRef, VariantId)> {
        self.variants[v.index()]
            .deps
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e.target {
                DepTarget::Concrete(t) => Some((i, e.tag.clone(), t)),
                DepTarget::Dangling { .. } => None,
            })
            .collect()
    }

    pub(crate) fn set_edge_target(&mut self, v: VariantId, edge: usize, target: VariantId) {
        self.variants[v.index()].deps[edge].target = DepTarget::Concrete(target);
    }

    /// Follows split chains from a possibly retired variant to the live
    /// variant standing in its place.
    pub(crate) fn current_descendant(&self, v: VariantId) -> VariantId {
        let mut cur = v;
        while !self.variants[cur.index()].alive {
            match self.variants[cur.index()].replaced_by.first() {
                Some(child) => cur = *child,
                None => break,
            }
        }
        cur
    }

    // ---- splits ----

    /// Splits a variant into one sibling per name. The first child takes
    /// over the parent's slot in spirit: the caller is expected to hand it
    /// the checked-out module logic. Remaining children clone from `seed`.
    pub(crate) fn split_variant(
        &mut self,
        v: VariantId,
        mutator: &str,
        names: &[String],
        local: bool,
        seed: &dyn Module,
        record_debug: bool,
        repoint: Repoint,
    ) -> Vec<VariantId> {
        let mid = self.variants[v.index()].module;
        let parent_variations = self.variants[v.index()].variations.clone();

        // An alias survives only until the next split of its module that
        // does not refresh it.
        self.modules[mid.index()]
            .aliases
            .retain(|a| a.from != parent_variations);

        let mut children = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let (mut variations, mut local_variations, mut common, deps, default_variation) = {
                let parent = &self.variants[v.index()];
                (
                    parent.variations.clone(),
                    parent.local_variations.clone(),
                    parent.common.clone(),
                    parent.deps.clone(),
                    parent.default_variation.clone(),
                )
            };
            if local {
                local_variations.push(Variation::new(mutator, name.clone()));
            } else {
                variations.push(Variation::new(mutator, name.clone()));
            }
            if record_debug {
                common.debug_mutators.push(mutator.to_string());
                common.debug_variations.push(name.clone());
            }
            let child = VariantId(self.variants.len() as u32);
            self.variants.push(Variant {
                id: child,
                module: mid,
                variations,
                local_variations,
                logic: if i == 0 {
                    None
                } else {
                    Some(seed.clone_variant())
                },
                common,
                deps,
                default_variation,
                alive: true,
                replaced_by: Vec::new(),
            });
            self.modules[mid.index()].variants.push(child);
            children.push(child);
        }

        {
            let parent = &mut self.variants[v.index()];
            parent.alive = false;
            parent.logic = None;
            parent.deps.clear();
            parent.replaced_by = children.clone();
        }

        match repoint {
            Repoint::Matching => self.repoint_incoming(v, mid, mutator, names, &children),
            Repoint::FirstChild => self.repoint_incoming_to(v, children[0]),
            Repoint::Untouched => {}
        }

        self.modules[mid.index()].last_split = Some(SplitRecord {
            mutator: mutator.to_string(),
            children: children.clone(),
        });
        children
    }

    /// Splits for the transition driver: the parent's stored logic seeds the
    /// clones and the first child receives the original box. Incoming edges
    /// are left for the driver's wholesale rewrite.
    pub(crate) fn split_variant_transition(
        &mut self,
        v: VariantId,
        mutator: &str,
        names: &[String],
    ) -> Vec<VariantId> {
        let logic = self
            .take_logic(v)
            .expect("transition split requires the module logic to be checked in");
        let children =
            self.split_variant(v, mutator, names, false, &*logic, true, Repoint::Untouched);
        self.return_logic(children[0], logic);
        children
    }

    /// Breadcrumb-matching re-point of edges that used to target `old`.
    fn repoint_incoming(
        &mut self,
        old: VariantId,
        old_module: ModuleId,
        mutator: &str,
        names: &[String],
        children: &[VariantId],
    ) {
        let module_name = self.modules[old_module.index()].name.clone();
        let child_of = |variation: &str| {
            names
                .iter()
                .position(|n| n == variation)
                .map(|i| children[i])
        };
        for u in 0..self.variants.len() {
            if !self.variants[u].alive {
                continue;
            }
            let source_value = self.variants[u].variation_of(mutator).map(str::to_string);
            let source_default = self.variants[u].default_variation.clone();
            for e in 0..self.variants[u].deps.len() {
                let DepTarget::Concrete(t) = self.variants[u].deps[e].target else {
                    continue;
                };
                if t != old {
                    continue;
                }
                let new_target = match source_value.as_deref().and_then(&child_of) {
                    Some(child) => DepTarget::Concrete(child),
                    None => match source_default.as_deref().and_then(&child_of) {
                        Some(child) => DepTarget::Concrete(child),
                        None => DepTarget::Dangling {
                            name: module_name.clone(),
                            explicit: VariationMap::new(),
                            far: false,
                        },
                    },
                };
                self.variants[u].deps[e].target = new_target;
            }
        }
    }

    fn repoint_incoming_to(&mut self, old: VariantId, new: VariantId) {
        for u in 0..self.variants.len() {
            if !self.variants[u].alive {
                continue;
            }
            for e in 0..self.variants[u].deps.len() {
                if let DepTarget::Concrete(t) = self.variants[u].deps[e].target {
                    if t == old {
                        self.variants[u].deps[e].target = DepTarget::Concrete(new);
                    }
                }
            }
        }
    }

    // ---- edges ----

    /// Adds a dependency edge from `from` to the named module. The edge is
    /// resolved immediately when a matching variant (or alias) exists;
    /// otherwise it is recorded dangling and retried at the pass barrier.
    pub(crate) fn add_edge(
        &mut self,
        from: VariantId,
        name: &str,
        explicit: VariationMap,
        far: bool,
        tag: TagRef,
    ) -> AddedDep {
        let requested = if far {
            explicit.clone()
        } else {
            overlay(&self.variants[from.index()].variation_map(), &explicit)
        };
        let resolved = self
            .names
            .get(name)
            .copied()
            .and_then(|mid| self.find_matching(mid, &requested, &explicit, far));
        match resolved {
            Some(target) => {
                self.variants[from.index()].deps.push(DepEdge {
                    tag,
                    target: DepTarget::Concrete(target),
                });
                AddedDep::Resolved(target)
            }
            None => {
                self.variants[from.index()].deps.push(DepEdge {
                    tag,
                    target: DepTarget::Dangling {
                        name: name.to_string(),
                        explicit,
                        far,
                    },
                });
                AddedDep::Deferred
            }
        }
    }

    pub(crate) fn add_edge_concrete(&mut self, from: VariantId, to: VariantId, tag: TagRef) {
        self.variants[from.index()].deps.push(DepEdge {
            tag,
            target: DepTarget::Concrete(to),
        });
    }

    /// Finds the variant of `mid` satisfying a request, consulting aliases
    /// before real variants so a pre-split identity keeps resolving after
    /// its module has been split.
    pub(crate) fn find_matching(
        &self,
        mid: ModuleId,
        requested: &VariationMap,
        explicit: &VariationMap,
        far: bool,
    ) -> Option<VariantId> {
        let module = &self.modules[mid.index()];
        for alias in &module.aliases {
            if variations_match(&alias.from, &[], requested, explicit, far)
                && self.variants[alias.to.index()].alive
            {
                return Some(alias.to);
            }
        }
        module
            .variants
            .iter()
            .map(|v| &self.variants[v.index()])
            .find(|v| {
                v.alive
                    && variations_match(&v.variations, &v.local_variations, requested, explicit, far)
            })
            .map(|v| v.id)
    }

    // ---- per-pass bookkeeping ----

    pub(crate) fn schedule_rename(
        &mut self,
        mid: ModuleId,
        new_name: &str,
    ) -> Result<(), EngineError> {
        check_module_name(new_name)?;
        let module = &mut self.modules[mid.index()];
        if module.pending_rename.is_some() {
            return Err(EngineError::DuplicateRename {
                module: module.name.clone(),
            });
        }
        module.pending_rename = Some(new_name.to_string());
        // The breadcrumb name tracks the rename immediately; lookups do not.
        for v in module.variants.clone() {
            self.variants[v.index()].common.debug_name = new_name.to_string();
        }
        Ok(())
    }

    pub(crate) fn set_default_variation(&mut self, v: VariantId, variation: Option<String>) {
        self.variants[v.index()].default_variation = variation;
    }

    /// Forces every dangling edge of `v` to the named variation on the given
    /// axis, overriding the default-variation fallback.
    pub(crate) fn set_dependency_variation(&mut self, v: VariantId, axis: &str, variation: &str) {
        for edge in &mut self.variants[v.index()].deps {
            if let DepTarget::Dangling { explicit, .. } = &mut edge.target {
                explicit.insert(axis.to_string(), variation.to_string());
            }
        }
    }

    /// Records an alias from the pre-split identity of the module's last
    /// split to the child carrying `variation`.
    pub(crate) fn alias_last_split(
        &mut self,
        mid: ModuleId,
        variation: &str,
    ) -> Result<(), EngineError> {
        let (child, from) = {
            let module = &self.modules[mid.index()];
            let split = module.last_split.as_ref().ok_or_else(|| {
                EngineError::UnknownVariation {
                    from: module.name.clone(),
                    module: module.name.clone(),
                    requested: variation.to_string(),
                }
            })?;
            let child = split
                .children
                .iter()
                .copied()
                .find(|c| self.variants[c.index()].variation_of(&split.mutator) == Some(variation))
                .ok_or_else(|| EngineError::UnknownVariation {
                    from: module.name.clone(),
                    module: module.name.clone(),
                    requested: variation.to_string(),
                })?;
            // The pre-split identity is the child's breadcrumb minus the
            // split the module just went through.
            let mut from = self.variants[child.index()].variations.clone();
            from.pop();
            (child, from)
        };
        self.modules[mid.index()].aliases.push(AliasEntry {
            from,
            to: child,
        });
        Ok(())
    }

    /// Synthesizes a named alias `from` resolving to the child carrying
    /// `to`, both on the axis of the module's last split.
    pub(crate) fn create_alias_last_split(
        &mut self,
        mid: ModuleId,
        from: &str,
        to: &str,
    ) -> Result<(), EngineError> {
        let (child, alias_from) = {
            let module = &self.modules[mid.index()];
            let split = module.last_split.as_ref().ok_or_else(|| {
                EngineError::UnknownVariation {
                    from: module.name.clone(),
                    module: module.name.clone(),
                    requested: to.to_string(),
                }
            })?;
            let child = split
                .children
                .iter()
                .copied()
                .find(|c| self.variants[c.index()].variation_of(&split.mutator) == Some(to))
                .ok_or_else(|| EngineError::UnknownVariation {
                    from: module.name.clone(),
                    module: module.name.clone(),
                    requested: to.to_string(),
                })?;
            let mut alias_from = self.variants[child.index()].variations.clone();
            alias_from.pop();
            alias_from.push(Variation::new(split.mutator.clone(), from));
            (child, alias_from)
        };
        self.modules[mid.index()].aliases.push(AliasEntry {
            from: alias_from,
            to: child,
        });
        Ok(())
    }

    pub(crate) fn last_split_children(&self, mid: ModuleId) -> Option<&[VariantId]> {
        self.modules[mid.index()]
            .last_split
            .as_ref()
            .map(|s| s.children.as_slice())
    }

    pub(crate) fn clear_split_records(&mut self) {
        for module in &mut self.modules {
            module.last_split = None;
        }
    }

    // ---- traversal ----

    /// Reverse-topological order: dependencies before dependents, ties
    /// broken by module name and variant creation order.
    pub fn bottom_up_order(&self) -> Result<Vec<VariantId>, EngineError> {
        let mut nodes: Vec<VariantId> = self.live_variants().map(|v| v.id).collect();
        nodes.sort_by(|a, b| self.order_key(*a).cmp(&self.order_key(*b)));

        let mut sorted = Vec::with_capacity(nodes.len());
        let mut visited = vec![false; self.variants.len()];
        let mut in_progress = vec![false; self.variants.len()];
        for node in &nodes {
            if !visited[node.index()] {
                self.visit_node(*node, &mut visited, &mut in_progress, &mut sorted)?;
            }
        }
        Ok(sorted)
    }

    /// Topological order: dependents before dependencies.
    pub fn top_down_order(&self) -> Result<Vec<VariantId>, EngineError> {
        let mut order = self.bottom_up_order()?;
        order.reverse();
        Ok(order)
    }

    fn order_key(&self, v: VariantId) -> (&str, VariantId) {
        (self.variant_module_name(v), v)
    }

    fn visit_node(
        &self,
        node: VariantId,
        visited: &mut [bool],
        in_progress: &mut [bool],
        sorted: &mut Vec<VariantId>,
    ) -> Result<(), EngineError> {
        if in_progress[node.index()] {
            return Err(EngineError::CycleDetected(
                self.variant_module_name(node).to_string(),
            ));
        }
        if visited[node.index()] {
            return Ok(());
        }
        in_progress[node.index()] = true;
        let mut deps = self.concrete_deps_of(node);
        deps.sort_by(|a, b| self.order_key(*a).cmp(&self.order_key(*b)));
        for dep in deps {
            if self.variants[dep.index()].alive {
                self.visit_node(dep, visited, in_progress, sorted)?;
            }
        }
        in_progress[node.index()] = false;
        visited[node.index()] = true;
        sorted.push(node);
        Ok(())
    }

    /// Pre-run structural check: the dependency graph must be a DAG.
    pub fn validate_acyclic(&self) -> Result<(), EngineError> {
        let mut dag: DiGraphMap<u32, ()> = DiGraphMap::new();
        for v in self.live_variants() {
            dag.add_node(v.id.0);
        }
        for v in self.live_variants() {
            for (_, t) in v.concrete_deps() {
                if self.variants[t.index()].alive {
                    dag.add_edge(v.id.0, t.0, ());
                }
            }
        }
        if is_cyclic_directed(&dag) {
            // Re-run the ordering DFS to name a module on the cycle.
            return Err(self
                .bottom_up_order()
                .err()
                .unwrap_or(EngineError::CycleDetected("<unknown>".to_string())));
        }
        Ok(())
    }

    /// Deterministic JSON rendering of the live graph, for debugging and
    /// for comparing runs in tests.
    pub fn debug_snapshot(&self) -> serde_json::Value {
        let mut variants: Vec<serde_json::Value> = Vec::new();
        let mut order: Vec<VariantId> = self.live_variants().map(|v| v.id).collect();
        order.sort_by(|a, b| self.order_key(*a).cmp(&self.order_key(*b)));
        for id in order {
            let v = self.variant(id);
            let deps: Vec<serde_json::Value> = v
                .deps
                .iter()
                .map(|e| match &e.target {
                    DepTarget::Concrete(t) => json!({
                        "tag": format!("{:?}", e.tag),
                        "module": self.variant_module_name(*t),
                        "variations": describe_variations(&self.variant(*t).variations),
                    }),
                    DepTarget::Dangling { name, explicit, .. } => json!({
                        "tag": format!("{:?}", e.tag),
                        "module": name,
                        "dangling": true,
                        "explicit": explicit,
                    }),
                })
                .collect();
            variants.push(json!({
                "module": self.variant_module_name(id),
                "variations": describe_variations(&v.variations),
                "locals": describe_variations(&v.local_variations),
                "deps": deps,
            }));
        }
        json!({ "variants": variants })
    }
}

/// Matching rule shared by immediate and pass-end resolution.
///
/// Near matching: every axis the target has been split on must be satisfied
/// by the request. Far matching: every requested axis must be present on the
/// target, unspecified axes fall back to the first live variant. Local axes
/// never participate unless the request names them explicitly.
pub(crate) fn variations_match(
    variations: &[Variation],
    locals: &[Variation],
    requested: &VariationMap,
    explicit: &VariationMap,
    far: bool,
) -> bool {
    let satisfied = if far {
        requested.iter().all(|(axis, value)| {
            variations
                .iter()
                .any(|v| &v.mutator == axis && &v.variation == value)
                || locals
                    .iter()
                    .any(|v| &v.mutator == axis && &v.variation == value)
        })
    } else {
        variations
            .iter()
            .all(|v| requested.get(&v.mutator) == Some(&v.variation))
    };
    if !satisfied {
        return false;
    }
    // An explicitly named local axis must match the exact local variant.
    explicit.iter().all(|(axis, value)| {
        match locals.iter().find(|v| &v.mutator == axis) {
            Some(local) => &local.variation == value,
            None => far || variations.iter().any(|v| &v.mutator == axis),
        }
    })
}

pub(crate) fn describe_variations(variations: &[Variation]) -> String {
    if variations.is_empty() {
        return String::new();
    }
    variations
        .iter()
        .map(|v| format!("{}:{}", v.mutator, v.variation))
        .collect::<Vec<_>>()
        .join(",")
}
