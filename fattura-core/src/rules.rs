//! Business-rule validation with Schematron rule sets.
//!
//! A rule document goes through two fixed stages: the meta-transform turns it
//! into validating-transform source, which the engine then compiles. The
//! compiler caches the result per rule-set reference.
use crate::config::Config;
use crate::transform::{CommandEngine, TransformError, TransformSource, Transformer};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use tracing::{debug, info};

pub mod execute;

pub use execute::{Finding, Findings, RuleExecutionError, RuleExecutor, Severity};

pub(crate) const SCHEMATRON_COMPILE_XSL: &[u8] =
    include_bytes!("../assets/xslt/schematron-compile.xsl");
pub(crate) const SVRL_TO_FINDINGS_XSL: &[u8] = include_bytes!("../assets/xslt/svrl-to-findings.xsl");

/// Identifies a rule set by the path of its source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleSetRef(PathBuf);

impl RuleSetRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for RuleSetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&Path> for RuleSetRef {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for RuleSetRef {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&str> for RuleSetRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Errors raised while compiling a rule set. None of them are cached.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("failed to read rule set '{reference}': {source}")]
    Io {
        reference: RuleSetRef,
        #[source]
        source: std::io::Error,
    },
    #[error("rule set '{reference}' is malformed: {source}")]
    Malformed {
        reference: RuleSetRef,
        #[source]
        source: TransformError,
    },
    #[error("rule set '{reference}' produced no validating transform")]
    Empty { reference: RuleSetRef },
    #[error("validating transform for '{reference}' does not compile: {source}")]
    Generated {
        reference: RuleSetRef,
        #[source]
        source: TransformError,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// The validating transform generated from one rule set.
///
/// Cheap to clone; clones share the generated source and its per-thread
/// execution contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRuleSet {
    reference: RuleSetRef,
    transform: TransformSource,
}

impl CompiledRuleSet {
    pub fn reference(&self) -> &RuleSetRef {
        &self.reference
    }

    /// Generated XSLT source.
    pub fn source(&self) -> &[u8] {
        self.transform.bytes()
    }

    pub(crate) fn transform(&self) -> &TransformSource {
        &self.transform
    }
}

type Slot = Arc<Mutex<Option<CompiledRuleSet>>>;

/// Compiles rule sets and caches them by reference.
///
/// Compilation runs at most once per reference, also when first requests race:
/// later callers wait on the reference's slot and get the cached result.
///
/// # Examples
/// ```rust,no_run
/// use fattura_core::rules::{RuleExecutor, RuleSetCompiler};
/// use fattura_core::config::Config;
///
/// let config = Config::default();
/// let compiler = RuleSetCompiler::from_config(&config)?;
/// let executor = RuleExecutor::from_config(&config)?;
/// let compiled = compiler.compile("rules/fattura.sch")?;
/// let findings = executor.execute(&std::fs::read("fattura.xml")?, &compiled)?;
/// println!("{} failures", findings.failures().count());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RuleSetCompiler {
    transformer: Transformer,
    meta: TransformSource,
    cache: Mutex<HashMap<RuleSetRef, Slot>>,
}

impl fmt::Debug for RuleSetCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSetCompiler")
            .field("meta", &self.meta.name())
            .field("cached", &self.len())
            .finish()
    }
}

impl RuleSetCompiler {
    pub fn new(transformer: Transformer, meta: TransformSource) -> Self {
        Self {
            transformer,
            meta,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Compiler using the built-in Schematron meta-transform.
    pub fn with_builtin(transformer: Transformer) -> Self {
        Self::new(
            transformer,
            TransformSource::new("schematron-compile.xsl", SCHEMATRON_COMPILE_XSL),
        )
    }

    /// Compiler driving the configured transform command, with the configured
    /// meta-transform if there is one.
    pub fn from_config(config: &Config) -> Result<Self, RuleSetError> {
        let transformer = Transformer::new(CommandEngine::new(config.transform_command()));
        let compiler = match config.meta_transform() {
            Some(path) => Self::new(transformer, TransformSource::from_file(path)?),
            None => Self::with_builtin(transformer),
        };
        compiler.transformer.prepare(&compiler.meta)?;
        Ok(compiler)
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    /// Compile the rule set at `reference`, or return the cached result.
    ///
    /// # Errors
    /// Returns [`RuleSetError`] when the rule document cannot be read, is not a
    /// rule set the meta-transform accepts, or yields a transform that does not
    /// compile.
    pub fn compile(&self, reference: impl Into<RuleSetRef>) -> Result<CompiledRuleSet, RuleSetError> {
        let reference = reference.into();
        let slot = self.slots().entry(reference.clone()).or_default().clone();
        let mut compiled = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = compiled.as_ref() {
            debug!(rules = %reference, "rule set cache hit");
            return Ok(cached.clone());
        }

        match self.build(&reference) {
            Ok(built) => {
                *compiled = Some(built.clone());
                // a failed racer may have dropped the slot from the map
                self.slots().entry(reference).or_insert(slot.clone());
                Ok(built)
            }
            Err(err) => {
                let mut slots = self.slots();
                if slots.get(&reference).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    slots.remove(&reference);
                }
                Err(err)
            }
        }
    }

    /// Drop the cached compilation of `reference`. Returns whether one existed.
    pub fn evict(&self, reference: impl Into<RuleSetRef>) -> bool {
        let reference = reference.into();
        let evicted = self.slots().remove(&reference).is_some();
        if evicted {
            debug!(rules = %reference, "evicted rule set");
        }
        evicted
    }

    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Number of rule sets in the cache.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<RuleSetRef, Slot>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, reference: &RuleSetRef) -> Result<CompiledRuleSet, RuleSetError> {
        let rules = std::fs::read(reference.path()).map_err(|e| RuleSetError::Io {
            reference: reference.clone(),
            source: e,
        })?;
        let generated = self
            .transformer
            .apply(&self.meta, &rules, &[])
            .map_err(|e| RuleSetError::Malformed {
                reference: reference.clone(),
                source: e,
            })?;
        if generated.iter().all(u8::is_ascii_whitespace) {
            return Err(RuleSetError::Empty {
                reference: reference.clone(),
            });
        }

        let transform = TransformSource::new(format!("rules:{reference}"), generated);
        self.transformer
            .prepare(&transform)
            .map_err(|e| RuleSetError::Generated {
                reference: reference.clone(),
                source: e,
            })?;
        info!(rules = %reference, bytes = transform.bytes().len(), "compiled rule set");
        Ok(CompiledRuleSet {
            reference: reference.clone(),
            transform,
        })
    }
}
