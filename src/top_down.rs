//! Top-down pass driver.
//!
//! Visits variants in topological order, dependents first. Top-down
//! mutators cannot create variations; they can rename, synthesize new
//! top-level modules, and in conversion mode record conversion targets.

use std::collections::HashMap;

use anyhow::anyhow;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::error::EngineError;
use crate::graph::ModuleGraph;
use crate::module::{ConversionDescriptor, Module};
use crate::parallel::partition_waves;
use crate::variant::{VariantId, Variation};

pub(crate) struct TopDownRunner<'a> {
    pub(crate) graph: &'a Mutex<ModuleGraph>,
    pub(crate) errors: &'a Mutex<Vec<EngineError>>,
    pub(crate) f: &'a (dyn Fn(&mut TopDownContext<'_>) + Send + Sync),
    pub(crate) mutator: &'a str,
    pub(crate) conversion: bool,
}

impl<'a> TopDownRunner<'a> {
    fn process(&self, v: VariantId) {
        let logic = {
            let mut g = self.graph.lock();
            if !g.is_live(v) {
                return;
            }
            g.take_logic(v)
        };
        let Some(logic) = logic else { return };
        let mut ctx = TopDownContext {
            runner: self,
            current: v,
            logic: Some(logic),
        };
        (self.f)(&mut ctx);
        if let Some(logic) = ctx.logic.take() {
            self.graph.lock().return_logic(v, logic);
        }
    }
}

pub(crate) fn run_top_down(
    graph: &Mutex<ModuleGraph>,
    errors: &Mutex<Vec<EngineError>>,
    name: &str,
    f: &(dyn Fn(&mut TopDownContext<'_>) + Send + Sync),
    parallel: bool,
    conversion: bool,
) {
    let order = match graph.lock().top_down_order() {
        Ok(order) => order,
        Err(err) => {
            errors.lock().push(err);
            return;
        }
    };
    let runner = TopDownRunner {
        graph,
        errors,
        f,
        mutator: name,
        conversion,
    };
    if parallel {
        // Dependents first means the wave relation is the reverse edge set.
        let rdeps: HashMap<VariantId, Vec<VariantId>> = {
            let g = graph.lock();
            let mut rdeps: HashMap<VariantId, Vec<VariantId>> =
                order.iter().map(|v| (*v, Vec::new())).collect();
            for v in &order {
                for dep in g.concrete_deps_of(*v) {
                    rdeps.entry(dep).or_default().push(*v);
                }
            }
            rdeps
        };
        for wave in partition_waves(&order, &rdeps) {
            wave.par_iter().for_each(|v| runner.process(*v));
        }
    } else {
        for v in &order {
            runner.process(*v);
        }
    }
}

/// The capability set handed to top-down mutators.
pub struct TopDownContext<'a> {
    runner: &'a TopDownRunner<'a>,
    current: VariantId,
    logic: Option<Box<dyn Module>>,
}

impl<'a> TopDownContext<'a> {
    pub fn mutator_name(&self) -> &str {
        self.runner.mutator
    }

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
        self.logic.as_deref_mut().expect("module logic present")
    }

    pub fn module_ref(&self) -> &dyn Module {
        self.logic.as_deref().expect("module logic present")
    }

    pub fn module_enabled(&self) -> bool {
        self.logic.as_deref().map(|m| m.enabled()).unwrap_or(false)
    }

    pub fn variations(&self) -> Vec<Variation> {
        self.runner
            .graph
            .lock()
            .variant(self.current)
            .variations()
            .to_vec()
    }

    pub fn module_exists(&self, name: &str) -> bool {
        self.runner.graph.lock().module_id(name).is_some()
    }

    /// Renames all variants of the current module, visible next pass.
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

    /// Synthesizes a new top-level module. It becomes visible to name
    /// lookups, and to mutators, in the next pass.
    pub fn create_module(&mut self, name: &str, logic: Box<dyn Module>) {
        if let Err(err) = crate::name::check_module_name(name) {
            self.push_error(err);
            return;
        }
        self.runner
            .graph
            .lock()
            .pending_modules
            .push((name.to_string(), logic));
    }

    /// Records a conversion target against the current module for the
    /// terminal emission step. Conversion mode only.
    pub fn create_conversion_target(&mut self, descriptor: ConversionDescriptor) {
        self.create_conversion_target_inner(descriptor, None);
    }

    /// Like `create_conversion_target`, restricted to platforms where the
    /// given attribute holds.
    pub fn create_conversion_target_with_restrictions(
        &mut self,
        descriptor: ConversionDescriptor,
        restriction: serde_json::Value,
    ) {
        self.create_conversion_target_inner(descriptor, Some(restriction));
    }

    fn create_conversion_target_inner(
        &mut self,
        mut descriptor: ConversionDescriptor,
        restriction: Option<serde_json::Value>,
    ) {
        if !self.runner.conversion {
            let module = self.module_name();
            self.push_error(EngineError::Mutator {
                module,
                source: anyhow!("conversion targets can only be recorded by the conversion pipeline"),
            });
            return;
        }
        if let Some(restriction) = restriction {
            descriptor.restriction = Some(restriction);
        }
        self.runner
            .graph
            .lock()
            .push_conversion_info(self.current, descriptor);
    }

    pub fn record_error(&mut self, err: anyhow::Error) {
        let module = self.module_name();
        self.push_error(EngineError::Mutator {
            module,
            source: err,
        });
    }

    fn push_error(&self, err: EngineError) {
        self.runner.errors.lock().push(err);
    }
}
