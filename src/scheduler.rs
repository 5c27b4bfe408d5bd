//! Pass scheduler.
//!
//! Executes the collated mutator list in order with a global barrier after
//! every pass: dangling edges are resolved, buffered replacements and
//! reverse edges land, renames and synthesized modules become visible, and
//! accumulated errors are flushed. A flush with errors aborts the run;
//! later passes never observe a partial graph.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bottom_up::run_bottom_up;
use crate::error::{EngineError, Errors};
use crate::graph::ModuleGraph;
use crate::registry::{ConversionFilter, Mutator, MutatorKind, Pipeline, RegisterMutatorFn};
use crate::top_down::{run_top_down, TopDownContext};
use crate::transition::run_transition;

impl Pipeline {
    /// Runs the four-phase sequence over the graph:
    /// pre-arch, pre-deps, the built-in deps mutators, post-deps, final-deps.
    pub fn run(&self, graph: &mut ModuleGraph) -> Result<(), Errors> {
        let mutators = self.collate().map_err(|err| Errors(vec![err]))?;
        execute(graph, &mutators)
    }

    /// Alternate entry point for external conversion: the conversion
    /// prelude, the caller's pre-arch mutators, the built-in deps mutator,
    /// and a terminal top-down conversion mutator. Every mutator name is
    /// suffixed so this universe cannot collide with the normal one.
    pub fn run_conversion(
        &self,
        graph: &mut ModuleGraph,
        pre_arch: &[RegisterMutatorFn],
        terminal: impl Fn(&mut TopDownContext<'_>) + Send + Sync + 'static,
    ) -> Result<(), Errors> {
        let mutators = self
            .collate_conversion(pre_arch, Arc::new(terminal), None)
            .map_err(|err| Errors(vec![err]))?;
        execute(graph, &mutators)
    }

    /// Conversion restricted to the modules accepted by `filter`.
    pub fn run_conversion_filtered(
        &self,
        graph: &mut ModuleGraph,
        pre_arch: &[RegisterMutatorFn],
        filter: ConversionFilter,
        terminal: impl Fn(&mut TopDownContext<'_>) + Send + Sync + 'static,
    ) -> Result<(), Errors> {
        let mutators = self
            .collate_conversion(pre_arch, Arc::new(terminal), Some(filter))
            .map_err(|err| Errors(vec![err]))?;
        execute(graph, &mutators)
    }
}

fn execute(graph: &mut ModuleGraph, mutators: &[Mutator]) -> Result<(), Errors> {
    if let Err(err) = graph.validate_acyclic() {
        return Err(Errors(vec![err]));
    }
    let shared = Mutex::new(std::mem::take(graph));
    let errors: Mutex<Vec<EngineError>> = Mutex::new(Vec::new());
    let mut failed = None;

    for m in mutators {
        debug!(mutator = %m.name, "running mutator pass");
        match &m.kind {
            MutatorKind::BottomUp { f, raw } => run_bottom_up(
                &shared,
                &errors,
                &m.name,
                f.as_ref(),
                *raw,
                m.parallel,
                m.final_phase,
            ),
            MutatorKind::TopDown(f) => run_top_down(
                &shared,
                &errors,
                &m.name,
                f.as_ref(),
                m.parallel,
                m.conversion,
            ),
            MutatorKind::Transition(t) => {
                run_transition(&shared, &errors, &m.name, t.as_ref(), m.final_phase)
            }
        }

        {
            let mut g = shared.lock();
            let mut errs = errors.lock();
            g.finish_pass(&mut errs);
        }
        let flushed = std::mem::take(&mut *errors.lock());
        if !flushed.is_empty() {
            warn!(mutator = %m.name, count = flushed.len(), "aborting at pass barrier");
            failed = Some(flushed);
            break;
        }
    }

    *graph = shared.into_inner();
    match failed {
        Some(errs) => Err(Errors(errs)),
        None => Ok(()),
    }
}
