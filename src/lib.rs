//! Module mutation pipeline for declarative build graphs.
//!
//! Ingests a set of named modules with typed properties and, before build
//! actions are generated, repeatedly transforms the module graph: splitting
//! modules into per-configuration variants, rewriting dependency edges
//! between variants, renaming, and injecting synthesized modules.
//!
//! Mutators are registered into four fixed phases and executed with a
//! global barrier between passes:
//!
//! ```text
//! pre-arch -> pre-deps -> (built-in deps) -> post-deps -> final-deps
//! ```
//!
//! Variant creation is forbidden in the final-deps phase. An alternate
//! registration sequence drives conversion to an external build system
//! over the same kernel.

pub mod bottom_up;
pub mod error;
pub mod graph;
pub mod module;
pub mod name;
mod parallel;
pub mod provider;
pub mod registry;
mod scheduler;
pub mod tag;
pub mod top_down;
pub mod transition;
pub mod variant;

pub use bottom_up::BottomUpContext;
pub use error::{EngineError, Errors};
pub use graph::{ModuleGraph, Variant};
pub use module::{CommonProperties, ConversionDescriptor, Module};
pub use provider::ProviderKey;
pub use registry::{
    ConversionFilter, MutatorHandle, Pipeline, RegisterContext, RegisterMutatorFn,
};
pub use tag::{tag_eq, DependencyTag, SimpleTag, TagRef};
pub use top_down::TopDownContext;
pub use transition::{IncomingContext, OutgoingContext, SplitContext, TransitionMutator};
pub use variant::{ModuleId, VariantId, Variation};
