//! Running compiled rule sets against documents.
use super::{CompiledRuleSet, RuleSetRef, SVRL_TO_FINDINGS_XSL};
use crate::config::Config;
use crate::transform::{CommandEngine, TransformError, TransformSource, Transformer};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::debug;

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Pass,
    Fail,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Pass => "pass",
            Severity::Fail => "fail",
            Severity::Warning => "warning",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    rule: String,
    severity: Severity,
    message: String,
    location: String,
}

impl Finding {
    pub fn new(
        rule: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            location: location.into(),
        }
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// XPath-like location of the evaluated node.
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// Ordered findings of one rule-set evaluation, in the order the rule engine
/// reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Findings(Vec<Finding>);

impl Findings {
    pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Finding> {
        self.with_severity(Severity::Fail)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.with_severity(Severity::Warning)
    }

    pub fn passed(&self) -> impl Iterator<Item = &Finding> {
        self.with_severity(Severity::Pass)
    }

    /// No rule failed. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.0
    }

    fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.0.iter().filter(move |f| f.severity == severity)
    }
}

impl From<Vec<Finding>> for Findings {
    fn from(findings: Vec<Finding>) -> Self {
        Findings(findings)
    }
}

impl IntoIterator for Findings {
    type Item = Finding;
    type IntoIter = std::vec::IntoIter<Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Findings {
    type Item = &'a Finding;
    type IntoIter = std::slice::Iter<'a, Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Rule execution failures. A failing rule is a [`Finding`], not an error.
#[derive(Debug, Error)]
pub enum RuleExecutionError {
    #[error("rule set '{rules}' failed on the document: {source}")]
    Execute {
        rules: RuleSetRef,
        #[source]
        source: TransformError,
    },
    #[error("failed to shape the report of '{rules}': {source}")]
    Report {
        rules: RuleSetRef,
        #[source]
        source: TransformError,
    },
    #[error("unreadable findings document for '{rules}': {source}")]
    Findings {
        rules: RuleSetRef,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
}

#[derive(Debug, Deserialize)]
struct FindingsDocument {
    #[serde(rename = "finding", default)]
    findings: Vec<FindingElement>,
}

#[derive(Debug, Deserialize)]
struct FindingElement {
    #[serde(rename = "@rule")]
    rule: String,
    #[serde(rename = "@severity")]
    severity: Severity,
    #[serde(rename = "@location", default)]
    location: String,
    #[serde(rename = "$text", default)]
    message: String,
}

impl From<FindingElement> for Finding {
    fn from(element: FindingElement) -> Self {
        Finding {
            rule: element.rule,
            severity: element.severity,
            message: element.message.trim().to_string(),
            location: element.location,
        }
    }
}

/// Applies compiled rule sets and turns their reports into [`Findings`].
#[derive(Debug, Clone)]
pub struct RuleExecutor {
    transformer: Transformer,
    report: TransformSource,
}

impl RuleExecutor {
    /// `transformer` must use the engine the rule sets were compiled for.
    pub fn new(transformer: Transformer, report: TransformSource) -> Self {
        Self {
            transformer,
            report,
        }
    }

    /// Executor with the built-in SVRL report shaping.
    pub fn with_builtin(transformer: Transformer) -> Self {
        Self::new(
            transformer,
            TransformSource::new("svrl-to-findings.xsl", SVRL_TO_FINDINGS_XSL),
        )
    }

    pub fn from_config(config: &Config) -> Result<Self, RuleExecutionError> {
        let transformer = Transformer::new(CommandEngine::new(config.transform_command()));
        Self::configured(config, transformer)
    }

    /// Executor on an existing transformer, typically the one of the
    /// [`RuleSetCompiler`](super::RuleSetCompiler) producing its rule sets, so
    /// both share execution contexts.
    pub fn configured(config: &Config, transformer: Transformer) -> Result<Self, RuleExecutionError> {
        let executor = match config.report_transform() {
            Some(path) => Self::new(transformer, TransformSource::from_file(path)?),
            None => Self::with_builtin(transformer),
        };
        executor.transformer.prepare(&executor.report)?;
        Ok(executor)
    }

    /// Evaluate `compiled` against `instance`.
    ///
    /// # Errors
    /// Returns [`RuleExecutionError`] when a transform faults, for example
    /// because the instance is not well-formed.
    pub fn execute(
        &self,
        instance: &[u8],
        compiled: &CompiledRuleSet,
    ) -> Result<Findings, RuleExecutionError> {
        let rules = compiled.reference();
        let svrl = self
            .transformer
            .apply(compiled.transform(), instance, &[])
            .map_err(|e| RuleExecutionError::Execute {
                rules: rules.clone(),
                source: e,
            })?;
        let shaped = self
            .transformer
            .apply(&self.report, &svrl, &[])
            .map_err(|e| RuleExecutionError::Report {
                rules: rules.clone(),
                source: e,
            })?;
        let findings = parse_findings(&shaped).map_err(|e| RuleExecutionError::Findings {
            rules: rules.clone(),
            source: e,
        })?;
        debug!(
            rules = %rules,
            findings = findings.len(),
            failures = findings.failures().count(),
            "rule set executed"
        );
        Ok(findings)
    }

    pub fn execute_file(
        &self,
        path: &Path,
        compiled: &CompiledRuleSet,
    ) -> Result<Findings, RuleExecutionError> {
        let instance = std::fs::read(path).map_err(|e| RuleExecutionError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.execute(&instance, compiled)
    }
}

fn parse_findings(document: &[u8]) -> Result<Findings, quick_xml::DeError> {
    let document: FindingsDocument = quick_xml::de::from_reader(document)?;
    Ok(Findings(
        document.findings.into_iter().map(Finding::from).collect(),
    ))
}
