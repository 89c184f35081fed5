//! Human-readable rendering of documents through per-version stylesheets.
use crate::{
    config::Config,
    transform::{CommandEngine, TransformError, TransformSource, Transformer},
    version::{DetectError, DocumentVersion, detect_version},
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

const FATTURA_HTML_XSL: &[u8] = include_bytes!("../assets/xslt/fattura-html.xsl");

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("stylesheet for version {version} not found: {}", path.display())]
    MissingStylesheet {
        version: DocumentVersion,
        path: PathBuf,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders documents with the stylesheet of their detected version.
///
/// Signed variants use their dialect's stylesheet unless one is set for them;
/// versions without a stylesheet use the built-in HTML one.
///
/// # Examples
/// ```rust,no_run
/// use fattura_core::config::Config;
/// use fattura_core::render::Renderer;
///
/// let renderer = Renderer::from_config(&Config::default())?;
/// let html = renderer.render(&std::fs::read("fattura.xml")?)?;
/// std::fs::write("fattura.html", html)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Renderer {
    transformer: Transformer,
    stylesheets: BTreeMap<DocumentVersion, TransformSource>,
    fallback: TransformSource,
}

impl Renderer {
    pub fn new(transformer: Transformer) -> Self {
        Self {
            transformer,
            stylesheets: BTreeMap::new(),
            fallback: TransformSource::new("fattura-html.xsl", FATTURA_HTML_XSL),
        }
    }

    pub fn with_stylesheet(mut self, version: DocumentVersion, stylesheet: TransformSource) -> Self {
        self.stylesheets.insert(version, stylesheet);
        self
    }

    /// # Errors
    /// Returns [`RenderError::MissingStylesheet`] when a configured stylesheet
    /// does not exist and [`RenderError::Transform`] when one does not compile.
    pub fn from_config(config: &Config) -> Result<Self, RenderError> {
        let transformer = Transformer::new(CommandEngine::new(config.transform_command()));
        let mut renderer = Renderer::new(transformer);
        let mut loaded: BTreeMap<PathBuf, TransformSource> = BTreeMap::new();
        for version in DocumentVersion::ALL {
            let Some(path) = config.stylesheet_path(version) else {
                continue;
            };
            if !path.exists() {
                return Err(RenderError::MissingStylesheet {
                    version,
                    path: path.to_path_buf(),
                });
            }
            let stylesheet = match loaded.get(path) {
                Some(source) => source.clone(),
                None => {
                    let source = TransformSource::from_file(path)?;
                    renderer.transformer.prepare(&source)?;
                    loaded.insert(path.to_path_buf(), source.clone());
                    source
                }
            };
            renderer.stylesheets.insert(version, stylesheet);
        }
        renderer.transformer.prepare(&renderer.fallback)?;
        Ok(renderer)
    }

    /// Stylesheet used for `version`.
    pub fn stylesheet(&self, version: DocumentVersion) -> &TransformSource {
        self.stylesheets
            .get(&version)
            .or_else(|| self.stylesheets.get(&version.unsigned()))
            .unwrap_or(&self.fallback)
    }

    /// Render `document`. The stylesheet receives the detected version as the
    /// `version` parameter.
    pub fn render(&self, document: &[u8]) -> Result<Vec<u8>, RenderError> {
        let version = detect_version(document)?;
        let stylesheet = self.stylesheet(version);
        debug!(version = %version, stylesheet = stylesheet.name(), "rendering document");
        Ok(self
            .transformer
            .apply(stylesheet, document, &[("version", version.as_str())])?)
    }

    pub fn render_file(&self, path: &Path) -> Result<Vec<u8>, RenderError> {
        let document = std::fs::read(path).map_err(|e| RenderError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.render(&document)
    }
}
