//! End-to-end validation: detection, structure and signature in one result.
use crate::{
    config::Config,
    schema::{SchemaError, SchemaRegistry, StructuralViolation},
    signature::{SignatureAdapter, SignatureOutcome, SignatureVerifier},
    version::{DetectError, DocumentVersion, detect},
};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that stop a validation. Everything else ends up in the result.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Combined outcome of validating one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    version: DocumentVersion,
    violations: Vec<StructuralViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<SignatureOutcome>,
}

impl ValidationResult {
    pub fn version(&self) -> DocumentVersion {
        self.version
    }

    pub fn violations(&self) -> &[StructuralViolation] {
        &self.violations
    }

    /// Present exactly when the version is a signed variant.
    pub fn signature(&self) -> Option<&SignatureOutcome> {
        self.signature.as_ref()
    }

    /// No structural violations and, for signed versions, a verified signature
    /// and certificate.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty() && self.signature.as_ref().is_none_or(SignatureOutcome::is_valid)
    }
}

/// Validates documents against their version's schema and, for signed
/// versions, their signature.
///
/// # Examples
/// ```rust,no_run
/// use fattura_core::config::Config;
/// use fattura_core::signature::RemoteSignatureVerifier;
/// use fattura_core::validation::Validator;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::from_properties_file("fattura.properties".as_ref())?;
/// let verifier = RemoteSignatureVerifier::from_config(&config)?;
/// let validator = Validator::from_config(&config, verifier)?;
/// let result = validator.validate_file("fattura.xml".as_ref()).await?;
/// println!("{} valid: {}", result.version(), result.is_valid());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Validator<V> {
    schemas: SchemaRegistry,
    signatures: SignatureAdapter<V>,
}

impl<V: SignatureVerifier> Validator<V> {
    pub fn new(schemas: SchemaRegistry, verifier: V) -> Self {
        Self {
            schemas,
            signatures: SignatureAdapter::new(verifier),
        }
    }

    /// Validator with every configured schema compiled up front.
    ///
    /// # Errors
    /// Returns [`ValidationError::Schema`] when a schema is missing or broken.
    pub fn from_config(config: &Config, verifier: V) -> Result<Self, ValidationError> {
        let schemas = SchemaRegistry::from_config(config)?;
        Ok(Self::new(schemas, verifier).with_verifier_timeout(config.verifier_timeout()))
    }

    pub fn with_verifier_timeout(mut self, timeout: Duration) -> Self {
        self.signatures = self.signatures.with_timeout(timeout);
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn signatures(&self) -> &SignatureAdapter<V> {
        &self.signatures
    }

    /// Validate a raw document.
    ///
    /// # Errors
    /// Only an undetectable version fails the call. Violations and signature
    /// problems are part of the result; so is a schema stage that cannot run,
    /// which is reported as a violation and never skips the signature check.
    pub async fn validate(&self, document: &[u8]) -> Result<ValidationResult, ValidationError> {
        let detection = detect(document)?;
        let version = detection.version();
        debug!(version = %version, "detected document version");

        let violations = match self.schemas.validate(document, version) {
            Ok(violations) => violations,
            Err(e) => {
                warn!(version = %version, error = %e, "structural validation unavailable");
                vec![StructuralViolation::new(
                    format!("structural validation unavailable: {e}"),
                    None,
                    None,
                )]
            }
        };
        let signature = self.signatures.verify(document, &detection).await;

        let result = ValidationResult {
            version,
            violations,
            signature,
        };
        info!(
            version = %result.version,
            violations = result.violations.len(),
            signed = result.signature.is_some(),
            valid = result.is_valid(),
            "validated document"
        );
        Ok(result)
    }

    pub async fn validate_file(&self, path: &Path) -> Result<ValidationResult, ValidationError> {
        let document = std::fs::read(path).map_err(|e| ValidationError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.validate(&document).await
    }
}
