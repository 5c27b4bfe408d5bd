//! Transition mutators.
//!
//! A transition mutator replaces bottom-up variant creation with a four-step
//! negotiation across every dependency edge: `split` declares the variants a
//! module has by itself, `outgoing_transition` is the dependent's request,
//! `incoming_transition` is the dependency's final say, and `mutate` is the
//! only step allowed to change module state. The driver materializes every
//! variation step 3 returns, so a transition pass cannot leave dangling
//! edges or raise a missing-variation error absent a bug inside a step.
//!
//! The effective variation of B when depended on by A is
//! `incoming(B, outgoing(A, edge, A.variation))`. A transition mutator only
//! affects its own axis; the other axes of an edge are preserved.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::bottom_up::{BottomUpContext, PassRunner};
use crate::error::EngineError;
use crate::graph::ModuleGraph;
use crate::module::Module;
use crate::parallel::ExecTracker;
use crate::tag::TagRef;
use crate::variant::{VariantId, Variation};

pub trait TransitionMutator: Send + Sync {
    /// Variations this module has on its own, computed purely from its
    /// properties. An empty list means the module keeps its single identity
    /// unless a dependent demands otherwise. Must not mutate the module.
    fn split(&self, ctx: &SplitContext<'_>) -> Vec<String>;

    /// The dependent's request: which variation it wants the dependency in.
    /// Sees the depending module and the edge tag, never the dependency.
    fn outgoing_transition(&self, ctx: &OutgoingContext<'_>, source_variation: &str) -> String;

    /// The dependency's final say; may map, clamp, or substitute the
    /// request. Sees the dependency, never the depending module.
    fn incoming_transition(&self, ctx: &IncomingContext<'_>, incoming_variation: &str) -> String;

    /// Invoked on each variant once all splits and edge decisions are
    /// committed. The only step allowed to mutate module state.
    fn mutate(&self, ctx: &mut BottomUpContext<'_>, variation: &str);
}

/// Read-only view of one variant for the `split` step.
pub struct SplitContext<'a> {
    graph: &'a ModuleGraph,
    variant: VariantId,
}

impl<'a> SplitContext<'a> {
    pub fn module_name(&self) -> &str {
        self.graph.variant_module_name(self.variant)
    }

    pub fn variations(&self) -> &[Variation] {
        self.graph.variant(self.variant).variations()
    }

    pub fn module(&self) -> &dyn Module {
        self.graph
            .logic_ref(self.variant)
            .expect("split runs with module logic checked in")
    }

    pub fn module_as<T: 'static>(&self) -> Option<&T> {
        self.graph.variant(self.variant).logic_as()
    }
}

/// The dependent side of an edge, for `outgoing_transition`.
pub struct OutgoingContext<'a> {
    graph: &'a ModuleGraph,
    source: VariantId,
    tag: &'a TagRef,
}

impl<'a> OutgoingContext<'a> {
    pub fn module_name(&self) -> &str {
        self.graph.variant_module_name(self.source)
    }

    pub fn module(&self) -> &dyn Module {
        self.graph
            .logic_ref(self.source)
            .expect("outgoing transition runs with module logic checked in")
    }

    pub fn module_as<T: 'static>(&self) -> Option<&T> {
        self.graph.variant(self.source).logic_as()
    }

    /// Tag of the dependency edge being transitioned.
    pub fn dep_tag(&self) -> &TagRef {
        self.tag
    }
}

/// The dependency side of an edge, for `incoming_transition`.
pub struct IncomingContext<'a> {
    graph: &'a ModuleGraph,
    target: VariantId,
}

impl<'a> IncomingContext<'a> {
    pub fn module_name(&self) -> &str {
        self.graph.variant_module_name(self.target)
    }

    pub fn module(&self) -> &dyn Module {
        self.graph
            .logic_ref(self.target)
            .expect("incoming transition runs with module logic checked in")
    }

    pub fn module_as<T: 'static>(&self) -> Option<&T> {
        self.graph.variant(self.target).logic_as()
    }
}

fn is_identity(set: &[String]) -> bool {
    set.len() == 1 && set[0].is_empty()
}

pub(crate) fn run_transition(
    graph: &Mutex<ModuleGraph>,
    errors: &Mutex<Vec<EngineError>>,
    name: &str,
    mutator: &dyn TransitionMutator,
    final_phase: bool,
) {
    let td_order = match graph.lock().top_down_order() {
        Ok(order) => order,
        Err(err) => {
            errors.lock().push(err);
            return;
        }
    };

    // Step 1: splits. Pure by contract, so computed data-parallel.
    let splits: Vec<(VariantId, Vec<String>)> = {
        let guard = graph.lock();
        let g = &*guard;
        td_order
            .par_iter()
            .map(|v| {
                let ctx = SplitContext {
                    graph: g,
                    variant: *v,
                };
                let mut names = mutator.split(&ctx);
                if names.is_empty() {
                    names.push(String::new());
                }
                (*v, names)
            })
            .collect()
    };
    let mut variations: HashMap<VariantId, Vec<String>> = splits.into_iter().collect();

    // Steps 2 and 3: walk dependents before dependencies so a module's
    // variation set is final by the time its own outgoing edges are
    // considered. Every `actual` a dependency returns is added to its set.
    let mut decisions: HashMap<(VariantId, usize, String), (VariantId, String)> = HashMap::new();
    let mut demanded: HashSet<(VariantId, String)> = HashSet::new();
    {
        let g = graph.lock();
        for src in &td_order {
            let src_variations = variations
                .get(src)
                .cloned()
                .unwrap_or_else(|| vec![String::new()]);
            let edges = g.concrete_edges_of(*src);
            for s in &src_variations {
                for (idx, tag, dst) in &edges {
                    let requested = mutator.outgoing_transition(
                        &OutgoingContext {
                            graph: &g,
                            source: *src,
                            tag,
                        },
                        s,
                    );
                    let actual = mutator.incoming_transition(
                        &IncomingContext {
                            graph: &g,
                            target: *dst,
                        },
                        &requested,
                    );
                    if let Some(set) = variations.get_mut(dst) {
                        if !set.contains(&actual) {
                            if is_identity(set)
                                && !actual.is_empty()
                                && !demanded.contains(&(*dst, String::new()))
                            {
                                set[0] = actual.clone();
                            } else {
                                set.push(actual.clone());
                            }
                        }
                    }
                    demanded.insert((*dst, actual.clone()));
                    decisions.insert((*src, *idx, s.clone()), (*dst, actual));
                }
            }
        }
    }

    if final_phase {
        let offenders: Vec<String> = {
            let g = graph.lock();
            td_order
                .iter()
                .filter(|v| !is_identity(&variations[*v]))
                .map(|v| g.variant_module_name(*v).to_string())
                .collect()
        };
        if !offenders.is_empty() {
            let mut errs = errors.lock();
            for module in offenders {
                errs.push(EngineError::PhaseViolation {
                    mutator: name.to_string(),
                    module,
                });
            }
            return;
        }
    }

    // Materialize splits, then rewrite every edge to the negotiated child.
    {
        let mut g = graph.lock();
        let mut child_of: HashMap<(VariantId, String), VariantId> = HashMap::new();
        for v in &td_order {
            let set = variations[v].clone();
            if is_identity(&set) {
                child_of.insert((*v, String::new()), *v);
            } else {
                let children = g.split_variant_transition(*v, name, &set);
                for (s, c) in set.iter().zip(children) {
                    child_of.insert((*v, s.clone()), c);
                }
            }
        }
        for v in &td_order {
            for s in variations[v].clone() {
                let child = child_of[&(*v, s.clone())];
                for (idx, _, _) in g.concrete_edges_of(child) {
                    let Some((dst, actual)) = decisions.get(&(*v, idx, s.clone())) else {
                        continue;
                    };
                    let new_target = child_of[&(*dst, actual.clone())];
                    g.set_edge_target(child, idx, new_target);
                }
            }
        }
    }

    // Step 4: mutate, dependencies first.
    let order = match graph.lock().bottom_up_order() {
        Ok(order) => order,
        Err(err) => {
            errors.lock().push(err);
            return;
        }
    };
    let mutate_fn = |ctx: &mut BottomUpContext<'_>| {
        let variation = ctx.variation_of(ctx.mutator_name()).unwrap_or_default();
        mutator.mutate(ctx, &variation);
    };
    let runner = PassRunner {
        graph,
        errors,
        f: &mutate_fn,
        mutator: name,
        final_phase,
        raw: false,
        parallel: false,
        tracker: ExecTracker::new(&order),
    };
    for v in &order {
        if runner.tracker.try_claim(*v) {
            runner.process(*v);
        }
    }
}
