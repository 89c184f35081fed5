//! Validation pipeline for FatturaPA electronic invoices: version detection,
//! XSD validation, Schematron rule sets, delegated signature checks and HTML
//! rendering.
//!
//! # Examples
//! ```rust
//! use fattura_core::version::{detect_version, DocumentVersion};
//!
//! let xml = br#"<p:FatturaElettronica versione="FPR12"
//!     xmlns:p="http://ivaservizi.agenziaentrate.gov.it/docs/xsd/fatture/v1.2"
//!     xmlns:ds="http://www.w3.org/2000/09/xmldsig#"/>"#;
//! assert_eq!(detect_version(xml)?, DocumentVersion::V1_2Signed);
//! # Ok::<(), fattura_core::Error>(())
//! ```
pub mod config;
pub mod render;
pub mod rules;
pub mod schema;
pub mod signature;
pub mod transform;
pub mod validation;
pub mod version;

use thiserror::Error;

pub use rules::{CompiledRuleSet, Finding, Findings, RuleExecutor, RuleSetCompiler, Severity};
pub use signature::{SignatureOutcome, SignatureVerifier, SignerInfo};
pub use validation::{ValidationResult, Validator};
pub use version::{Detection, DocumentVersion, detect, detect_version};

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Detect(#[from] version::DetectError),
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),
    #[error(transparent)]
    Transform(#[from] transform::TransformError),
    #[error(transparent)]
    RuleSet(#[from] rules::RuleSetError),
    #[error(transparent)]
    RuleExecution(#[from] rules::RuleExecutionError),
    #[error(transparent)]
    Verifier(#[from] signature::VerifierError),
    #[error(transparent)]
    Validation(#[from] validation::ValidationError),
    #[error(transparent)]
    Render(#[from] render::RenderError),
}
