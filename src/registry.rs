//! Mutator registry.
//!
//! Domain code appends registration callbacks to one of four ordered phase
//! lists. Collation runs the callbacks in phase order against a single
//! registration context, producing the flat mutator list the scheduler
//! executes. The conversion pipeline is an alternate collation over the
//! same context with every name suffixed so the two universes cannot
//! collide.

use std::collections::HashSet;
use std::sync::Arc;

use crate::bottom_up::BottomUpContext;
use crate::error::EngineError;
use crate::top_down::TopDownContext;
use crate::transition::TransitionMutator;

/// A registration callback appended to one of the phase lists.
pub type RegisterMutatorFn = Box<dyn Fn(&mut RegisterContext)>;

pub(crate) type BottomUpFn = Arc<dyn Fn(&mut BottomUpContext<'_>) + Send + Sync>;
pub(crate) type TopDownFn = Arc<dyn Fn(&mut TopDownContext<'_>) + Send + Sync>;

/// Restricts which modules the terminal conversion mutator emits for.
pub type ConversionFilter = Arc<dyn Fn(&TopDownContext<'_>) -> bool + Send + Sync>;

pub(crate) enum MutatorKind {
    BottomUp { f: BottomUpFn, raw: bool },
    TopDown(TopDownFn),
    Transition(Arc<dyn TransitionMutator>),
}

pub(crate) struct Mutator {
    pub(crate) name: String,
    pub(crate) kind: MutatorKind,
    pub(crate) parallel: bool,
    pub(crate) final_phase: bool,
    pub(crate) conversion: bool,
}

/// Handle returned by the registration operations.
pub struct MutatorHandle<'a>(&'a mut Mutator);

impl MutatorHandle<'_> {
    /// Allows the driver to invoke this mutator on independent modules
    /// concurrently.
    pub fn parallel(self) -> Self {
        self.0.parallel = true;
        self
    }
}

/// The context handed to registration callbacks.
pub struct RegisterContext {
    mutators: Vec<Mutator>,
    names: HashSet<String>,
    errors: Vec<EngineError>,
    final_phase: bool,
    conversion_mode: bool,
}

impl RegisterContext {
    fn new(conversion_mode: bool) -> Self {
        Self {
            mutators: Vec::new(),
            names: HashSet::new(),
            errors: Vec::new(),
            final_phase: false,
            conversion_mode,
        }
    }

    pub fn is_conversion_mode(&self) -> bool {
        self.conversion_mode
    }

    fn mutator_name(&self, name: &str) -> String {
        if self.conversion_mode {
            format!("{name}_conv")
        } else {
            name.to_string()
        }
    }

    fn push(&mut self, name: String, kind: MutatorKind) -> MutatorHandle<'_> {
        if !self.names.insert(name.clone()) {
            self.errors.push(EngineError::DuplicateMutatorName(name.clone()));
        }
        self.mutators.push(Mutator {
            name,
            kind,
            parallel: false,
            final_phase: self.final_phase,
            conversion: self.conversion_mode,
        });
        MutatorHandle(self.mutators.last_mut().expect("just pushed"))
    }

    /// Registers a bottom-up mutator dispatched with the module-wrapping
    /// context, including debug breadcrumb bookkeeping on splits.
    pub fn bottom_up(
        &mut self,
        name: &str,
        f: impl Fn(&mut BottomUpContext<'_>) + Send + Sync + 'static,
    ) -> MutatorHandle<'_> {
        let name = self.mutator_name(name);
        self.push(
            name,
            MutatorKind::BottomUp {
                f: Arc::new(f),
                raw: false,
            },
        )
    }

    /// Registers a raw bottom-up mutator: no breadcrumb bookkeeping on its
    /// splits, and its name is never suffixed for the conversion universe.
    pub fn bottom_up_raw(
        &mut self,
        name: &str,
        f: impl Fn(&mut BottomUpContext<'_>) + Send + Sync + 'static,
    ) -> MutatorHandle<'_> {
        self.push(
            name.to_string(),
            MutatorKind::BottomUp {
                f: Arc::new(f),
                raw: true,
            },
        )
    }

    pub fn top_down(
        &mut self,
        name: &str,
        f: impl Fn(&mut TopDownContext<'_>) + Send + Sync + 'static,
    ) -> MutatorHandle<'_> {
        let name = self.mutator_name(name);
        self.push(name, MutatorKind::TopDown(Arc::new(f)))
    }

    pub fn transition(&mut self, name: &str, m: impl TransitionMutator + 'static) {
        let name = self.mutator_name(name);
        self.push(name, MutatorKind::Transition(Arc::new(m)));
    }

    fn finish(mut self) -> Result<Vec<Mutator>, EngineError> {
        if self.errors.is_empty() {
            Ok(self.mutators)
        } else {
            Err(self.errors.remove(0))
        }
    }
}

/// The four fixed phases plus the conversion prelude.
///
/// Collation order is `pre-arch, pre-deps, component-deps, deps, post-deps,
/// final-deps`; the final-deps group is collated with the flag that makes
/// variant creation fatal.
#[derive(Default)]
pub struct Pipeline {
    pre_arch: Vec<RegisterMutatorFn>,
    pre_deps: Vec<RegisterMutatorFn>,
    post_deps: Vec<RegisterMutatorFn>,
    final_deps: Vec<RegisterMutatorFn>,
    conversion_prelude: Vec<RegisterMutatorFn>,
    conversion_pre_arch: Vec<RegisterMutatorFn>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_arch_mutators(&mut self, f: impl Fn(&mut RegisterContext) + 'static) -> &mut Self {
        self.pre_arch.push(Box::new(f));
        self
    }

    pub fn pre_deps_mutators(&mut self, f: impl Fn(&mut RegisterContext) + 'static) -> &mut Self {
        self.pre_deps.push(Box::new(f));
        self
    }

    pub fn post_deps_mutators(&mut self, f: impl Fn(&mut RegisterContext) + 'static) -> &mut Self {
        self.post_deps.push(Box::new(f));
        self
    }

    pub fn final_deps_mutators(&mut self, f: impl Fn(&mut RegisterContext) + 'static) -> &mut Self {
        self.final_deps.push(Box::new(f));
        self
    }

    /// Registrations that run at the head of every conversion collation,
    /// before the caller-supplied pre-arch mutators.
    pub fn conversion_prelude_mutators(
        &mut self,
        f: impl Fn(&mut RegisterContext) + 'static,
    ) -> &mut Self {
        self.conversion_prelude.push(Box::new(f));
        self
    }

    /// Pre-arch registrations for the conversion universe only. They run
    /// after the prelude and before any pre-arch mutators handed directly
    /// to the conversion entry point.
    pub fn pre_arch_conversion_mutators(
        &mut self,
        f: impl Fn(&mut RegisterContext) + 'static,
    ) -> &mut Self {
        self.conversion_pre_arch.push(Box::new(f));
        self
    }

    /// Names in collation order, mostly useful for tests and debugging.
    pub fn mutator_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.collate()?.iter().map(|m| m.name.clone()).collect())
    }

    pub(crate) fn collate(&self) -> Result<Vec<Mutator>, EngineError> {
        let mut ctx = RegisterContext::new(false);
        for f in &self.pre_arch {
            f(&mut ctx);
        }
        for f in &self.pre_deps {
            f(&mut ctx);
        }
        register_component_deps(&mut ctx);
        register_deps(&mut ctx);
        for f in &self.post_deps {
            f(&mut ctx);
        }
        ctx.final_phase = true;
        for f in &self.final_deps {
            f(&mut ctx);
        }
        ctx.finish()
    }

    pub(crate) fn collate_conversion(
        &self,
        pre_arch: &[RegisterMutatorFn],
        terminal: TopDownFn,
        filter: Option<ConversionFilter>,
    ) -> Result<Vec<Mutator>, EngineError> {
        let mut ctx = RegisterContext::new(true);
        for f in &self.conversion_prelude {
            f(&mut ctx);
        }
        for f in self.conversion_pre_arch.iter().chain(pre_arch) {
            f(&mut ctx);
        }
        register_deps(&mut ctx);
        ctx.top_down("conversion", move |tctx| {
            if let Some(filter) = &filter {
                if !(**filter)(tctx) {
                    return;
                }
            }
            (*terminal)(tctx);
        });
        ctx.finish()
    }
}

/// Built-in mutator invoking `component_deps_mutator` on enabled modules,
/// ahead of `deps` so component references resolve within the deps pass.
fn register_component_deps(ctx: &mut RegisterContext) {
    ctx.bottom_up("component-deps", |c| {
        if c.module_enabled() {
            c.dispatch_component_deps();
        }
    })
    .parallel();
}

/// Built-in mutator invoking `deps_mutator` on enabled modules.
fn register_deps(ctx: &mut RegisterContext) {
    ctx.bottom_up("deps", |c| {
        if c.module_enabled() {
            c.dispatch_deps();
        }
    })
    .parallel();
}
