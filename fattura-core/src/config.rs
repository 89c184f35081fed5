//! Configuration for schemas, transforms and the signature verifier.
use crate::version::DocumentVersion;
use java_properties::read;
use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

const DEFAULT_VERIFIER_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse properties from '{path}': {source}")]
    PropertiesRead {
        path: PathBuf,
        #[source]
        source: java_properties::PropertiesError,
    },

    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// Configuration for the validation pipeline.
///
/// Signed variants use their dialect's schema and stylesheet unless one is
/// configured for them explicitly. No schema is configured by default: the
/// dialect XSDs are deployment assets and have to be named, normally through
/// `schema.*` keys in a properties file.
///
/// # Examples
/// ```rust
/// use fattura_core::config::Config;
/// use fattura_core::version::DocumentVersion;
///
/// let config = Config::default()
///     .with_schema(DocumentVersion::V1_2, "schemas/Schema_VFPR12.xsd");
/// assert_eq!(
///     config.schema_path(DocumentVersion::V1_2Signed),
///     Some(std::path::Path::new("schemas/Schema_VFPR12.xsd"))
/// );
/// assert_eq!(config.schema_path(DocumentVersion::V1_0), None);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    schemas: BTreeMap<DocumentVersion, PathBuf>,
    stylesheets: BTreeMap<DocumentVersion, PathBuf>,
    meta_transform: Option<PathBuf>,
    report_transform: Option<PathBuf>,
    transform_command: PathBuf,
    verifier_url: Option<String>,
    verifier_timeout: Duration,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, version: DocumentVersion, path: impl Into<PathBuf>) -> Self {
        self.schemas.insert(version, path.into());
        self
    }

    pub fn with_stylesheet(mut self, version: DocumentVersion, path: impl Into<PathBuf>) -> Self {
        self.stylesheets.insert(version, path.into());
        self
    }

    pub fn with_meta_transform(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_transform = Some(path.into());
        self
    }

    pub fn with_report_transform(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_transform = Some(path.into());
        self
    }

    pub fn with_transform_command(mut self, program: impl Into<PathBuf>) -> Self {
        self.transform_command = program.into();
        self
    }

    pub fn with_verifier_url(mut self, url: impl Into<String>) -> Self {
        self.verifier_url = Some(url.into());
        self
    }

    pub fn with_verifier_timeout(mut self, timeout: Duration) -> Self {
        self.verifier_timeout = timeout;
        self
    }

    pub fn schema_path(&self, version: DocumentVersion) -> Option<&Path> {
        self.schemas
            .get(&version)
            .or_else(|| self.schemas.get(&version.unsigned()))
            .map(PathBuf::as_path)
    }

    /// Stylesheet override for a version; `None` means the built-in one.
    pub fn stylesheet_path(&self, version: DocumentVersion) -> Option<&Path> {
        self.stylesheets
            .get(&version)
            .or_else(|| self.stylesheets.get(&version.unsigned()))
            .map(PathBuf::as_path)
    }

    pub fn meta_transform(&self) -> Option<&Path> {
        self.meta_transform.as_deref()
    }

    pub fn report_transform(&self) -> Option<&Path> {
        self.report_transform.as_deref()
    }

    pub fn transform_command(&self) -> &Path {
        &self.transform_command
    }

    pub fn verifier_url(&self) -> Option<&str> {
        self.verifier_url.as_deref()
    }

    pub fn verifier_timeout(&self) -> Duration {
        self.verifier_timeout
    }

    /// Load configuration from a Java-style `.properties` file.
    ///
    /// Keys not present keep their defaults. Relative paths resolve against the
    /// directory holding the file.
    ///
    /// ```text
    /// schema.v1.2=schemas/Schema_VFPR12.xsd
    /// schema.v1.2.signed=schemas/Schema_VFPR12_signed.xsd
    /// transform.command=/usr/bin/xsltproc
    /// verifier.url=https://verifier.example/api/
    /// verifier.timeout.ms=5000
    /// ```
    pub fn from_properties_file(path: &Path) -> Result<Config, ConfigError> {
        let pathbuf = path.to_path_buf();
        let file = File::open(path).map_err(|e| ConfigError::Io {
            path: pathbuf.clone(),
            source: e,
        })?;
        let props = read(BufReader::new(file)).map_err(|e| ConfigError::PropertiesRead {
            path: pathbuf.clone(),
            source: e,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |value: &str| -> PathBuf {
            let candidate = PathBuf::from(value.trim());
            if candidate.is_absolute() {
                candidate
            } else {
                base.join(candidate)
            }
        };

        let mut config = Config::default();
        for version in DocumentVersion::ALL {
            let suffix = property_suffix(version);
            if let Some(value) = props.get(&format!("schema.{suffix}")) {
                config = config.with_schema(version, resolve(value));
            }
            if let Some(value) = props.get(&format!("render.{suffix}")) {
                config = config.with_stylesheet(version, resolve(value));
            }
        }
        if let Some(value) = props.get("transform.meta") {
            config = config.with_meta_transform(resolve(value));
        }
        if let Some(value) = props.get("transform.report") {
            config = config.with_report_transform(resolve(value));
        }
        if let Some(value) = props.get("transform.command") {
            config = config.with_transform_command(value.trim());
        }
        if let Some(value) = props.get("verifier.url") {
            config = config.with_verifier_url(value.trim());
        }
        if let Some(value) = props.get("verifier.timeout.ms") {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "verifier.timeout.ms".into(),
                    value: value.clone(),
                })?;
            config = config.with_verifier_timeout(Duration::from_millis(millis));
        }
        Ok(config)
    }
}

/// Key suffix of a version in properties files, e.g. `v1.2.signed`.
pub(crate) fn property_suffix(version: DocumentVersion) -> String {
    format!("v{}", version.as_str().replace('-', "."))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schemas: BTreeMap::new(),
            stylesheets: BTreeMap::new(),
            meta_transform: None,
            report_transform: None,
            transform_command: PathBuf::from("xsltproc"),
            verifier_url: None,
            verifier_timeout: DEFAULT_VERIFIER_TIMEOUT,
        }
    }
}
