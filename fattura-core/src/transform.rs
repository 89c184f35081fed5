//! Seam to the external XSLT engine.
//!
//! A [`TransformSource`] is the immutable, shareable definition of a transform.
//! Engines turn it into a [`Transform`], which is an execution context that may
//! hold engine state and is never shared: [`Transformer`] keeps one per thread
//! and source, checked out for the duration of a single application.
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error;
use tracing::debug;

pub mod command;

pub use command::CommandEngine;

/// Errors raised by transform engines.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to compile transform '{name}': {message}")]
    Compile { name: String, message: String },
    #[error("transform '{name}' could not parse its input: {message}")]
    Input { name: String, message: String },
    #[error("transform '{name}' failed: {message}")]
    Execute { name: String, message: String },
    #[error("failed to read transform source '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A compiled transform ready to be applied.
pub trait Transform {
    fn apply(&mut self, input: &[u8], params: &[(&str, &str)]) -> Result<Vec<u8>, TransformError>;
}

/// Compiles transform source into executable transforms.
pub trait TransformEngine: Send + Sync {
    fn compile(&self, name: &str, source: &[u8]) -> Result<Box<dyn Transform>, TransformError>;
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TRANSFORMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct SourceInner {
    id: u64,
    name: String,
    bytes: Vec<u8>,
}

/// Immutable transform definition, cheap to clone and share across threads.
#[derive(Debug, Clone)]
pub struct TransformSource {
    inner: Arc<SourceInner>,
}

impl TransformSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                bytes: bytes.into(),
            }),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TransformError> {
        let bytes = std::fs::read(path).map_err(|e| TransformError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::new(path.display().to_string(), bytes))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    fn id(&self) -> u64 {
        self.inner.id
    }
}

impl PartialEq for TransformSource {
    fn eq(&self, other: &Self) -> bool {
        self.inner.bytes == other.inner.bytes
    }
}

impl Eq for TransformSource {}

/// (transformer id, source id)
type ContextKey = (u64, u64);

struct ExecutionContext {
    owner: Weak<SourceInner>,
    engine: Weak<dyn TransformEngine>,
    transform: Box<dyn Transform>,
}

impl ExecutionContext {
    fn is_live(&self) -> bool {
        self.owner.strong_count() > 0 && self.engine.strong_count() > 0
    }
}

thread_local! {
    static EXECUTION_CONTEXTS: RefCell<HashMap<ContextKey, ExecutionContext>> =
        RefCell::new(HashMap::new());
}

/// Applies [`TransformSource`]s through an engine using per-thread contexts.
///
/// Clones share the engine and the contexts; separately constructed
/// transformers never do, even over the same engine.
///
/// # Examples
/// ```rust,no_run
/// use fattura_core::transform::{CommandEngine, TransformSource, Transformer};
///
/// let transformer = Transformer::new(CommandEngine::default());
/// let source = TransformSource::from_file("identity.xsl".as_ref())?;
/// let output = transformer.apply(&source, b"<a/>", &[])?;
/// # let _ = output;
/// # Ok::<(), fattura_core::transform::TransformError>(())
/// ```
#[derive(Clone)]
pub struct Transformer {
    id: u64,
    engine: Arc<dyn TransformEngine>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn new(engine: impl TransformEngine + 'static) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    pub fn from_arc(engine: Arc<dyn TransformEngine>) -> Self {
        Self {
            id: NEXT_TRANSFORMER_ID.fetch_add(1, Ordering::Relaxed),
            engine,
        }
    }

    /// Compile `source` for the current thread unless it already is.
    pub fn prepare(&self, source: &TransformSource) -> Result<(), TransformError> {
        let key = self.key(source);
        let ready = EXECUTION_CONTEXTS.with(|cell| cell.borrow().contains_key(&key));
        if !ready {
            let transform = self.compile(source)?;
            self.checkin(key, source, transform);
        }
        Ok(())
    }

    /// Apply `source` to `input`.
    pub fn apply(
        &self,
        source: &TransformSource,
        input: &[u8],
        params: &[(&str, &str)],
    ) -> Result<Vec<u8>, TransformError> {
        let key = self.key(source);
        let checked_out = EXECUTION_CONTEXTS.with(|cell| cell.borrow_mut().remove(&key));
        let mut transform = match checked_out {
            Some(context) => context.transform,
            None => self.compile(source)?,
        };
        let output = transform.apply(input, params);
        self.checkin(key, source, transform);
        output
    }

    fn compile(&self, source: &TransformSource) -> Result<Box<dyn Transform>, TransformError> {
        debug!(transform = source.name(), "compiling execution context");
        self.engine.compile(source.name(), source.bytes())
    }

    fn key(&self, source: &TransformSource) -> ContextKey {
        (self.id, source.id())
    }

    fn checkin(&self, key: ContextKey, source: &TransformSource, transform: Box<dyn Transform>) {
        EXECUTION_CONTEXTS.with(|cell| {
            let mut contexts = cell.borrow_mut();
            contexts.retain(|_, context| context.is_live());
            contexts.insert(
                key,
                ExecutionContext {
                    owner: Arc::downgrade(&source.inner),
                    engine: Arc::downgrade(&self.engine),
                    transform,
                },
            );
        });
    }
}
