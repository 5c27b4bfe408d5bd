//! Bottom-up pass driver.
//!
//! Visits variants in reverse topological order, dependencies first. Each
//! visit checks the module logic out of the graph, hands the mutator a
//! context over it, and checks it back in afterwards, so user callbacks
//! never run while the graph lock is held.

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::graph::{AddedDep, ModuleGraph, Repoint};
use crate::module::Module;
use crate::name::check_variation_name;
use crate::parallel::{self, ExecTracker};
use crate::provider::ProviderKey;
use crate::tag::TagRef;
use crate::variant::{to_map, VariantId, Variation, VariationMap};

pub(crate) struct PassRunner<'a> {
    pub(crate) graph: &'a Mutex<ModuleGraph>,
    pub(crate) errors: &'a Mutex<Vec<EngineError>>,
    pub(crate) f: &'a (dyn Fn(&mut BottomUpContext<'_>) + Send + Sync),
    pub(crate) mutator: &'a str,
    pub(crate) final_phase: bool,
    pub(crate) raw: bool,
    pub(crate) parallel: bool,
    pub(crate) tracker: ExecTracker,
}

impl<'a> PassRunner<'a> {
    /// Runs the mutator on one variant. Safe to call from any worker; the
    /// caller must hold the claim for `v`.
    pub(crate) fn process(&self, v: VariantId) {
        let logic = {
            let mut g = self.graph.lock();
            if !g.is_live(v) {
                drop(g);
                self.tracker.mark_done(v);
                return;
            }
            g.take_logic(v)
        };
        let Some(logic) = logic else {
            self.tracker.mark_done(v);
            return;
        };
        let mut ctx = BottomUpContext {
            runner: self,
            current: v,
            logic: Some(logic),
        };
        (self.f)(&mut ctx);
        let BottomUpContext { current, logic, .. } = ctx;
        if let Some(logic) = logic {
            self.graph.lock().return_logic(current, logic);
        }
        self.tracker.mark_done(v);
    }

    /// Suspension point: returns once `v` has been through the current
    /// mutator, running it inline when no other worker has started it.
    /// Serial passes need no coordination, so this is a no-op there.
    pub(crate) fn ensure_processed(&self, v: VariantId) {
        if !self.parallel {
            return;
        }
        if self.tracker.claim_or_wait(v) {
            let deps = self.graph.lock().concrete_deps_of(v);
            for dep in deps {
                self.ensure_processed(dep);
            }
            self.process(v);
        }
    }
}

/// Drives one bottom-up mutator pass over the whole graph.
pub(crate) fn run_bottom_up(
    graph: &Mutex<ModuleGraph>,
    errors: &Mutex<Vec<EngineError>>,
    name: &str,
    f: &(dyn Fn(&mut BottomUpContext<'_>) + Send + Sync),
    raw: bool,
    parallel: bool,
    final_phase: bool,
) {
    let order = match graph.lock().bottom_up_order() {
        Ok(order) => order,
        Err(err) => {
            errors.lock().push(err);
            return;
        }
    };
    let runner = PassRunner {
        graph,
        errors,
        f,
        mutator: name,
        final_phase,
        raw,
        parallel,
        tracker: ExecTracker::new(&order),
    };
    if parallel {
        parallel::run_waves(&runner, &order);
    } else {
        for v in &order {
            if runner.tracker.try_claim(*v) {
                runner.process(*v);
            }
        }
    }
}

/// The capability set handed to bottom-up mutators.
///
/// One surface for every mutator; phase restrictions are enforced
/// dynamically rather than by splitting the type.
pub struct BottomUpContext<'a> {
    runner: &'a PassRunner<'a>,
    current: VariantId,
    logic: Option<Box<dyn Module>>,
}

impl<'a> BottomUpContext<'a> {
    /// Name this mutator was registered with.
    pub fn mutator_name(&self) -> &str {
        self.runner.mutator
    }

    /// Variant currently being mutated. After `create_variations` this
    /// follows the first child.
    pub fn current_variant(&self) -> VariantId {
        self.current
    }

    pub fn module_name(&self) -> String {
        self.runner
            .graph
            .lock()
            .variant_module_name(self.current)
            .to_string()
    }

    pub fn module(&mut self) -> &mut dyn Module {
        self.logic
            .as_deref_mut()
            .expect("module logic is checked out to a deps hook")
    }

    pub fn module_ref(&self) -> &dyn Module {
        self.logic
            .as_deref()
            .expect("module logic is checked out to a deps hook")
    }

    pub fn module_enabled(&self) -> bool {
        self.logic.as_deref().map(|m| m.enabled()).unwrap_or(false)
    }

    /// Non-local breadcrumb of the current variant.
    pub fn variations(&self) -> Vec<Variation> {
        self.runner
            .graph
            .lock()
            .variant(self.current)
            .variations()
            .to_vec()
    }

    /// This variant's value on the named axis.
    pub fn variation_of(&self, axis: &str) -> Option<String> {
        self.runner
            .graph
            .lock()
            .variant(self.current)
            .variation_of(axis)
            .map(str::to_string)
    }

    /// Whether a module with this name is visible to the current pass.
    pub fn module_exists(&self, name: &str) -> bool {
        self.runner.graph.lock().module_id(name).is_some()
    }

    /// Visits the current variant's resolved direct dependencies in
    /// declaration order.
    pub fn visit_direct_deps(&self, mut f: impl FnMut(VariantId, &TagRef)) {
        let deps: Vec<(TagRef, VariantId)> = {
            let g = self.runner.graph.lock();
            g.variant(self.current)
                .concrete_deps()
                .map(|(tag, t)| (tag.clone(), t))
                .collect()
        };
        for (tag, target) in &deps {
            f(*target, tag);
        }
    }

    /// Renames all variants of the current module. The new name is not
    /// visible to lookups until this pass completes.
    pub fn rename(&mut self, name: &str) {
        let result = {
            let mut g = self.runner.graph.lock();
            let mid = g.module_of(self.current);
            g.schedule_rename(mid, name)
        };
        if let Err(err) = result {
            self.push_error(err);
        }
    }

    /// Records an arbitrary fatal failure against the current module,
    /// reported at the pass barrier.
    pub fn record_error(&mut self, err: anyhow::Error) {
        let module = self.module_name();
        self.push_error(EngineError::Mutator {
            module,
            source: err,
        });
    }

    // ---- dependencies ----

    /// Adds dependencies on the named modules. Returns the resolved variant
    /// for each name, or `None` where resolution was deferred to the pass
    /// barrier. In a parallel pass the call suspends until each resolved
    /// target has been through the current mutator.
    pub fn add_dependency(&mut self, tag: &TagRef, names: &[&str]) -> Vec<Option<VariantId>> {
        self.add_deps(VariationMap::new(), false, tag, names)
    }

    /// Like `add_dependency`, but selects the dependency variant matching
    /// the current module's variations overlaid with `variations`.
    pub fn add_variation_dependencies(
        &mut self,
        variations: &[Variation],
        tag: &TagRef,
        names: &[&str],
    ) -> Vec<Option<VariantId>> {
        self.add_deps(to_map(variations), false, tag, names)
    }

    /// Like `add_variation_dependencies`, but the current module's own
    /// variations are ignored; unspecified axes fall back to the first
    /// variant.
    pub fn add_far_variation_dependencies(
        &mut self,
        variations: &[Variation],
        tag: &TagRef,
        names: &[&str],
    ) -> Vec<Option<VariantId>> {
        self.add_deps(to_map(variations), true, tag, names)
    }

    fn add_deps(
        &mut self,
        explicit: VariationMap,
        far: bool,
        tag: &TagRef,
        names: &[&str],
    ) -> Vec<Option<VariantId>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let added = self.runner.graph.lock().add_edge(
                self.current,
                name,
                explicit.clone(),
                far,
                tag.clone(),
            );
            match added {
                AddedDep::Resolved(target) => {
                    self.runner.ensure_processed(target);
                    out.push(Some(target));
                }
                AddedDep::Deferred => out.push(None),
            }
        }
        out
    }

    /// Buffers an edge from the named destination module onto the current
    /// variant. Applied at the pass barrier, sorted for determinism.
    pub fn add_reverse_dependency(&mut self, tag: &TagRef, name: &str) {
        let mut g = self.runner.graph.lock();
        let target = self.current;
        g.pending_reverse.push(crate::graph::PendingReverse {
            dest: name.to_string(),
            target,
            tag: tag.clone(),
        });
    }

    /// Adds an edge between two variants of the current module, typically
    /// two siblings returned by `create_variations`.
    pub fn add_inter_variant_dependency(&mut self, tag: &TagRef, from: VariantId, to: VariantId) {
        let mismatch = {
            let g = self.runner.graph.lock();
            let mid = g.module_of(self.current);
            g.module_of(from) != mid || g.module_of(to) != mid
        };
        if mismatch {
            self.record_error(anyhow!(
                "inter-variant dependencies must stay within one module"
            ));
            return;
        }
        self.runner
            .graph
            .lock()
            .add_edge_concrete(from, to, tag.clone());
    }

    // ---- variants ----

    /// Splits the current module into one variant per name. Incoming edges
    /// follow the breadcrumb-matching rule, then the source's default
    /// variation, then degrade to dangling for pass-end resolution.
    pub fn create_variations(&mut self, names: &[&str]) -> Vec<VariantId> {
        self.create_variations_inner(names, false)
    }

    /// Splits without participating in automatic matching: dependencies on
    /// a locally split module must name the exact local variant.
    pub fn create_local_variations(&mut self, names: &[&str]) -> Vec<VariantId> {
        self.create_variations_inner(names, true)
    }

    fn create_variations_inner(&mut self, names: &[&str], local: bool) -> Vec<VariantId> {
        if self.runner.final_phase {
            let module = self.module_name();
            self.push_error(EngineError::PhaseViolation {
                mutator: self.runner.mutator.to_string(),
                module,
            });
            return Vec::new();
        }
        if names.is_empty() {
            return Vec::new();
        }
        let mut owned = Vec::with_capacity(names.len());
        for name in names {
            if let Err(err) = check_variation_name(name) {
                self.push_error(err);
                return Vec::new();
            }
            owned.push(name.to_string());
        }
        let Some(seed) = self.logic.as_deref() else {
            let module = self.module_name();
            self.push_error(EngineError::Mutator {
                module,
                source: anyhow!("variations cannot be created from inside a deps hook"),
            });
            return Vec::new();
        };
        let children = self.runner.graph.lock().split_variant(
            self.current,
            self.runner.mutator,
            &owned,
            local,
            seed,
            !self.runner.raw,
            if local {
                Repoint::FirstChild
            } else {
                Repoint::Matching
            },
        );
        self.current = children[0];
        children
    }

    /// Forces the current module's dangling dependencies to the named
    /// variation on this mutator's axis, bypassing the default variation.
    pub fn set_dependency_variation(&mut self, variation: &str) {
        self.runner.graph.lock().set_dependency_variation(
            self.current,
            self.runner.mutator,
            variation,
        );
    }

    /// Sets the variation used when a dangling reference from this module
    /// is re-pointed by a later split of the dependency. `None` resets it.
    pub fn set_default_dependency_variation(&mut self, variation: Option<&str>) {
        self.runner
            .graph
            .lock()
            .set_default_variation(self.current, variation.map(str::to_string));
    }

    // ---- aliases and replacement ----

    /// Re-points the pre-split identity of this module at the child of the
    /// last split carrying `variation`.
    pub fn alias_variation(&mut self, variation: &str) {
        let result = {
            let mut g = self.runner.graph.lock();
            let mid = g.module_of(self.current);
            g.alias_last_split(mid, variation)
        };
        if let Err(err) = result {
            self.push_error(err);
        }
    }

    /// Synthesizes an alias named `from` resolving to the last split's
    /// child carrying `to`.
    pub fn create_alias_variation(&mut self, from: &str, to: &str) {
        let result = {
            let mut g = self.runner.graph.lock();
            let mid = g.module_of(self.current);
            g.create_alias_last_split(mid, from, to)
        };
        if let Err(err) = result {
            self.push_error(err);
        }
    }

    /// Schedules every dependency on the identical variant of the named
    /// module to be re-targeted at the current variant. Takes effect at the
    /// pass barrier.
    pub fn replace_dependencies(&mut self, name: &str) {
        self.runner
            .graph
            .lock()
            .pending_replace
            .push(crate::graph::PendingReplace {
                name: name.to_string(),
                with: self.current,
                predicate: None,
            });
    }

    /// Conditional form of `replace_dependencies`. The predicate sees the
    /// edge's tag, source variant, and current target variant.
    pub fn replace_dependencies_if(
        &mut self,
        name: &str,
        predicate: impl Fn(&TagRef, VariantId, VariantId) -> bool + Send + Sync + 'static,
    ) {
        self.runner
            .graph
            .lock()
            .pending_replace
            .push(crate::graph::PendingReplace {
                name: name.to_string(),
                with: self.current,
                predicate: Some(Box::new(predicate)),
            });
    }

    // ---- providers and sibling access ----

    /// Attaches a provider value to a newly created variant of the current
    /// module. Write-once; a second write to the same slot is fatal.
    pub fn set_variation_provider<T: Send + Sync + 'static>(
        &mut self,
        variant: VariantId,
        key: ProviderKey<T>,
        value: T,
    ) {
        let result = {
            let mut g = self.runner.graph.lock();
            let mid = g.module_of(self.current);
            let is_new_child = g
                .last_split_children(mid)
                .map_or(false, |children| children.contains(&variant));
            assert!(
                is_new_child,
                "set_variation_provider must target a variant created by the current mutator"
            );
            g.set_provider_raw(variant, key.raw(), Box::new(value))
        };
        if let Err(err) = result {
            self.push_error(err);
        }
    }

    /// Runs a closure over another variant's module logic, typically a
    /// sibling returned by `create_variations`.
    pub fn with_module<R>(
        &mut self,
        variant: VariantId,
        f: impl FnOnce(&mut dyn Module) -> R,
    ) -> Option<R> {
        if variant == self.current {
            return self.logic.as_deref_mut().map(f);
        }
        let logic = self.runner.graph.lock().take_logic(variant);
        let mut logic = logic?;
        let result = f(&mut *logic);
        self.runner.graph.lock().return_logic(variant, logic);
        Some(result)
    }

    // ---- built-in hook dispatch ----

    pub(crate) fn dispatch_component_deps(&mut self) {
        if let Some(mut logic) = self.logic.take() {
            logic.component_deps_mutator(self);
            self.logic = Some(logic);
        }
    }

    pub(crate) fn dispatch_deps(&mut self) {
        if let Some(mut logic) = self.logic.take() {
            logic.deps_mutator(self);
            self.logic = Some(logic);
        }
    }

    fn push_error(&self, err: EngineError) {
        self.runner.errors.lock().push(err);
    }
}
