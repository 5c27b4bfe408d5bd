//! Engine errors.
//!
//! Everything here is fatal to the build. Errors raised inside a pass are
//! accumulated where that is cheap and flushed at the pass barrier, so
//! independent problems are reported together.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("mutator `{mutator}` may not create variations of `{module}` in the final-deps phase")]
    PhaseViolation { mutator: String, module: String },

    #[error("dependency from `{from}` targets unknown variation [{requested}] of module `{module}`")]
    UnknownVariation {
        from: String,
        module: String,
        requested: String,
    },

    #[error("mutator name `{0}` is already registered in this universe")]
    DuplicateMutatorName(String),

    #[error("provider value for variant `{variant}` of `{module}` was already set")]
    ProviderRewrite { module: String, variant: String },

    #[error("module `{name}`, depended on by `{from}`, does not exist")]
    ModuleNotFound { name: String, from: String },

    #[error("module dependency graph contains a cycle at `{0}`")]
    CycleDetected(String),

    #[error("module `{module}` was renamed more than once in a single pass")]
    DuplicateRename { module: String },

    #[error("module name `{0}` is already in use")]
    DuplicateModuleName(String),

    #[error("`{0}` is not a valid module or variation name")]
    InvalidName(String),

    #[error("mutator failure on module `{module}`: {source}")]
    Mutator {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

/// All errors accumulated up to a pass barrier.
#[derive(Debug)]
pub struct Errors(pub Vec<EngineError>);

impl Errors {
    pub fn iter(&self) -> impl Iterator<Item = &EngineError> + '_ {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s) during graph mutation:", self.0.len())?;
        for err in &self.0 {
            writeln!(f, "  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}
