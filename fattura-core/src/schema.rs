//! Structural (XSD) validation with one validator per document version.
//!
//! libxml2 validation contexts are not shareable between threads. The registry
//! reads each XSD once and keeps its bytes; each thread compiles its own context
//! from that in-memory copy the first time it validates against a schema, so
//! later changes to the file on disk are never observed.
use crate::config::{Config, property_suffix};
use crate::version::DocumentVersion;
use libxml::{
    error::StructuredError,
    parser::{Parser, ParserOptions},
    schemas::{SchemaParserContext, SchemaValidationContext},
};
use serde::Serialize;
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by the schema registry. Violations are never reported here.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema configured for version {version}; set schema.{key} in the configuration")]
    NotConfigured { version: DocumentVersion, key: String },
    #[error("schema file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to compile schema '{}': {}", path.display(), messages.join("; "))]
    Compile {
        path: PathBuf,
        messages: Vec<String>,
    },
    #[error("no schema validator registered for version {0}")]
    NoValidator(DocumentVersion),
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One structural problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StructuralViolation {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column: Option<usize>,
}

impl StructuralViolation {
    pub fn new(message: impl Into<String>, line: Option<usize>, column: Option<usize>) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn column(&self) -> Option<usize> {
        self.column
    }
}

impl fmt::Display for StructuralViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{line}:{column}: {}", self.message),
            (Some(line), None) => write!(f, "{line}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl From<StructuredError> for StructuralViolation {
    fn from(error: StructuredError) -> Self {
        let message = error
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("schema validation error")
            .to_string();
        StructuralViolation {
            message,
            line: error.line.filter(|l| *l > 0).map(|l| l as usize),
            column: error.col.filter(|c| *c > 0).map(|c| c as usize),
        }
    }
}

static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CONTEXTS: RefCell<HashMap<u64, SchemaValidationContext>> =
        RefCell::new(HashMap::new());
}

fn format_validation_errors(errors: Vec<StructuredError>) -> Vec<String> {
    errors
        .into_iter()
        .map(|se| StructuralViolation::from(se).to_string())
        .collect()
}

#[derive(Debug, Clone)]
struct XsdSchema {
    id: u64,
    path: PathBuf,
    source: Arc<[u8]>,
}

impl XsdSchema {
    fn load(path: &Path) -> Result<Self, SchemaError> {
        let source = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SchemaError::NotFound {
                path: path.to_path_buf(),
            },
            _ => SchemaError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let schema = Self {
            id: NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed),
            path: path.to_path_buf(),
            source: source.into(),
        };
        schema.with_context(|_| ())?;
        Ok(schema)
    }

    fn build_validation_context(&self) -> Result<SchemaValidationContext, SchemaError> {
        let mut parser_ctx = SchemaParserContext::from_buffer(&self.source[..]);
        SchemaValidationContext::from_parser(&mut parser_ctx).map_err(|errors| {
            SchemaError::Compile {
                path: self.path.clone(),
                messages: format_validation_errors(errors),
            }
        })
    }

    /// Run `f` with this thread's validation context, building it on first use.
    /// The context is taken out of the cache for the duration of the call and
    /// put back afterwards.
    fn with_context<T>(
        &self,
        f: impl FnOnce(&mut SchemaValidationContext) -> T,
    ) -> Result<T, SchemaError> {
        let cached = CONTEXTS.with(|cell| cell.borrow_mut().remove(&self.id));
        let mut ctx = match cached {
            Some(ctx) => ctx,
            None => self.build_validation_context()?,
        };
        let out = f(&mut ctx);
        CONTEXTS.with(|cell| cell.borrow_mut().insert(self.id, ctx));
        Ok(out)
    }

    fn validate(&self, document: &[u8]) -> Result<Vec<StructuralViolation>, SchemaError> {
        let options = ParserOptions {
            recover: false,
            ..ParserOptions::default()
        };
        let doc = match Parser::default().parse_string_with_options(document, options) {
            Ok(doc) => doc,
            Err(e) => {
                return Ok(vec![StructuralViolation::new(
                    format!("document is not well-formed XML: {e:?}"),
                    None,
                    None,
                )]);
            }
        };

        let outcome = self.with_context(|ctx| ctx.validate_document(&doc))?;
        Ok(match outcome {
            Ok(()) => Vec::new(),
            Err(errors) => errors.into_iter().map(StructuralViolation::from).collect(),
        })
    }
}

/// Structural validators keyed by [`DocumentVersion`].
///
/// # Examples
/// ```rust,no_run
/// use fattura_core::config::Config;
/// use fattura_core::schema::SchemaRegistry;
/// use fattura_core::version::{detect_version, DocumentVersion};
///
/// let config = Config::from_properties_file("fattura.properties".as_ref())?;
/// let registry = SchemaRegistry::from_config(&config)?;
/// let xml = std::fs::read("fattura.xml")?;
/// let version = detect_version(&xml)?;
/// let violations = registry.validate(&xml, version)?;
/// assert!(violations.is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    validators: BTreeMap<DocumentVersion, XsdSchema>,
}

impl SchemaRegistry {
    /// Empty registry; see [`SchemaRegistry::register`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Build validators for every known version from `config`.
    ///
    /// # Errors
    /// Returns [`SchemaError::NotConfigured`] when a version has no schema, and
    /// other [`SchemaError`]s when a configured schema is missing or does not compile.
    pub fn from_config(config: &Config) -> Result<Self, SchemaError> {
        let mut registry = SchemaRegistry::new();
        for version in DocumentVersion::ALL {
            let path = config
                .schema_path(version)
                .ok_or_else(|| SchemaError::NotConfigured {
                    version,
                    key: property_suffix(version.unsigned()),
                })?;
            registry.register(version, path)?;
        }
        Ok(registry)
    }

    /// Read and compile the schema at `path` and use it for `version`. The file
    /// is not read again afterwards.
    pub fn register(&mut self, version: DocumentVersion, path: &Path) -> Result<(), SchemaError> {
        let schema = XsdSchema::load(path)?;
        info!(version = %version, path = %path.display(), "registered schema");
        self.validators.insert(version, schema);
        Ok(())
    }

    pub fn versions(&self) -> impl Iterator<Item = DocumentVersion> + '_ {
        self.validators.keys().copied()
    }

    /// Validate `document` against the schema for `version`.
    ///
    /// Structural problems, including a document that is not well-formed, come
    /// back as violations.
    pub fn validate(
        &self,
        document: &[u8],
        version: DocumentVersion,
    ) -> Result<Vec<StructuralViolation>, SchemaError> {
        let schema = self
            .validators
            .get(&version)
            .ok_or(SchemaError::NoValidator(version))?;
        let violations = schema.validate(document)?;
        debug!(version = %version, violations = violations.len(), "structural validation finished");
        Ok(violations)
    }

    pub fn validate_file(
        &self,
        path: &Path,
        version: DocumentVersion,
    ) -> Result<Vec<StructuralViolation>, SchemaError> {
        let document = std::fs::read(path).map_err(|e| SchemaError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.validate(&document, version)
    }
}
