//! Document version detection.
//!
//! Only the root start tag is read: the root namespace selects the dialect and an
//! XML-DSig namespace declaration on the root selects the signed variant. The
//! prefix that declaration binds is kept so the signature check looks for the
//! block under the name the document actually uses.
use quick_xml::{events::Event, name::ResolveResult, reader::NsReader};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub(crate) const FPA_V1_0_NS: &str = "http://www.fatturapa.gov.it/sdi/fatturapa/v1.0";
pub(crate) const FPA_V1_1_NS: &str = "http://www.fatturapa.gov.it/sdi/fatturapa/v1.1";
pub(crate) const FPA_V1_2_NS: &str =
    "http://ivaservizi.agenziaentrate.gov.it/docs/xsd/fatture/v1.2";
pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const DS_PREFIX: &str = "ds";

/// Known FatturaPA dialects, each in a plain and a signed variant.
///
/// # Examples
/// ```rust
/// use fattura_core::version::DocumentVersion;
///
/// let version = DocumentVersion::V1_2Signed;
/// assert!(version.is_signed());
/// assert_eq!(version.signature_prefix(), Some("ds"));
/// assert_eq!(version.unsigned(), DocumentVersion::V1_2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.0-signed")]
    V1_0Signed,
    #[serde(rename = "1.1-signed")]
    V1_1Signed,
    #[serde(rename = "1.2-signed")]
    V1_2Signed,
}

impl DocumentVersion {
    pub const ALL: [DocumentVersion; 6] = [
        DocumentVersion::V1_0,
        DocumentVersion::V1_1,
        DocumentVersion::V1_2,
        DocumentVersion::V1_0Signed,
        DocumentVersion::V1_1Signed,
        DocumentVersion::V1_2Signed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentVersion::V1_0 => "1.0",
            DocumentVersion::V1_1 => "1.1",
            DocumentVersion::V1_2 => "1.2",
            DocumentVersion::V1_0Signed => "1.0-signed",
            DocumentVersion::V1_1Signed => "1.1-signed",
            DocumentVersion::V1_2Signed => "1.2-signed",
        }
    }

    /// Root element namespace of the dialect.
    pub fn namespace(&self) -> &'static str {
        match self.unsigned() {
            DocumentVersion::V1_0 => FPA_V1_0_NS,
            DocumentVersion::V1_1 => FPA_V1_1_NS,
            _ => FPA_V1_2_NS,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DocumentVersion::V1_0Signed | DocumentVersion::V1_1Signed | DocumentVersion::V1_2Signed
        )
    }

    /// Conventional prefix of the signature block, for signed variants only.
    ///
    /// A document may bind XML-DSig under another prefix; [`detect`] reports the
    /// one actually declared.
    pub fn signature_prefix(&self) -> Option<&'static str> {
        self.is_signed().then_some(DS_PREFIX)
    }

    pub fn unsigned(&self) -> DocumentVersion {
        match self {
            DocumentVersion::V1_0 | DocumentVersion::V1_0Signed => DocumentVersion::V1_0,
            DocumentVersion::V1_1 | DocumentVersion::V1_1Signed => DocumentVersion::V1_1,
            DocumentVersion::V1_2 | DocumentVersion::V1_2Signed => DocumentVersion::V1_2,
        }
    }

    pub fn signed(&self) -> DocumentVersion {
        match self.unsigned() {
            DocumentVersion::V1_0 => DocumentVersion::V1_0Signed,
            DocumentVersion::V1_1 => DocumentVersion::V1_1Signed,
            _ => DocumentVersion::V1_2Signed,
        }
    }

    /// Exact lookup of a root namespace.
    pub fn from_namespace(namespace: &str, signed: bool) -> Option<DocumentVersion> {
        let base = match namespace {
            FPA_V1_0_NS => DocumentVersion::V1_0,
            FPA_V1_1_NS => DocumentVersion::V1_1,
            FPA_V1_2_NS => DocumentVersion::V1_2,
            _ => return None,
        };
        Some(if signed { base.signed() } else { base })
    }
}

impl fmt::Display for DocumentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`DocumentVersion`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("invalid document version: {input}")]
    Invalid { input: String },
}

impl FromStr for DocumentVersion {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<DocumentVersion, VersionParseError> {
        DocumentVersion::ALL
            .into_iter()
            .find(|version| version.as_str().eq_ignore_ascii_case(input.trim()))
            .ok_or_else(|| VersionParseError::Invalid {
                input: input.to_string(),
            })
    }
}

/// Terminal detection failure; nothing else runs after it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectError {
    #[error("unknown document namespace: {}", namespace.as_deref().unwrap_or("<none>"))]
    UnknownNamespace { namespace: Option<String> },
}

struct RootElement {
    namespace: Option<String>,
    dsig_prefix: Option<String>,
}

/// Outcome of [`detect`]: the dialect plus the prefix bound to XML-DSig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    version: DocumentVersion,
    signature_prefix: Option<String>,
}

impl Detection {
    pub fn version(&self) -> DocumentVersion {
        self.version
    }

    /// Prefix the root binds to the XML-DSig namespace; `Some` only for signed
    /// variants. Empty when XML-DSig is the root's default namespace.
    pub fn signature_prefix(&self) -> Option<&str> {
        self.signature_prefix.as_deref()
    }
}

/// Classify a raw document by its root element.
///
/// # Errors
/// Returns [`DetectError::UnknownNamespace`] when the root namespace is missing,
/// not one of the known dialects, or no root element can be read at all.
///
/// # Examples
/// ```rust
/// use fattura_core::version::{detect_version, DocumentVersion};
///
/// let xml = br#"<p:FatturaElettronica versione="FPR12"
///     xmlns:p="http://ivaservizi.agenziaentrate.gov.it/docs/xsd/fatture/v1.2"/>"#;
/// assert_eq!(detect_version(xml)?, DocumentVersion::V1_2);
/// # Ok::<(), fattura_core::version::DetectError>(())
/// ```
pub fn detect_version(document: &[u8]) -> Result<DocumentVersion, DetectError> {
    detect(document).map(|detection| detection.version)
}

/// Like [`detect_version`], also reporting the XML-DSig prefix of signed documents.
///
/// ```rust
/// use fattura_core::version::{detect, DocumentVersion};
///
/// let xml = br#"<p:FatturaElettronica
///     xmlns:p="http://ivaservizi.agenziaentrate.gov.it/docs/xsd/fatture/v1.2"
///     xmlns:sig="http://www.w3.org/2000/09/xmldsig#"/>"#;
/// let detection = detect(xml)?;
/// assert_eq!(detection.version(), DocumentVersion::V1_2Signed);
/// assert_eq!(detection.signature_prefix(), Some("sig"));
/// # Ok::<(), fattura_core::version::DetectError>(())
/// ```
pub fn detect(document: &[u8]) -> Result<Detection, DetectError> {
    let root = read_root(document).ok_or(DetectError::UnknownNamespace { namespace: None })?;
    let namespace = root
        .namespace
        .ok_or(DetectError::UnknownNamespace { namespace: None })?;
    let version = DocumentVersion::from_namespace(&namespace, root.dsig_prefix.is_some()).ok_or(
        DetectError::UnknownNamespace {
            namespace: Some(namespace),
        },
    )?;
    Ok(Detection {
        version,
        signature_prefix: root.dsig_prefix,
    })
}

fn read_root(document: &[u8]) -> Option<RootElement> {
    let mut reader = NsReader::from_reader(document);
    loop {
        match reader.read_resolved_event() {
            Ok((resolved, Event::Start(start))) | Ok((resolved, Event::Empty(start))) => {
                let namespace = match resolved {
                    ResolveResult::Bound(ns) => {
                        Some(String::from_utf8_lossy(ns.as_ref()).into_owned())
                    }
                    _ => None,
                };
                let dsig_prefix = start.attributes().flatten().find_map(|attr| {
                    if attr.value.as_ref() != DS_NS.as_bytes() {
                        return None;
                    }
                    let key = attr.key.as_ref();
                    if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                        Some(String::from_utf8_lossy(prefix).into_owned())
                    } else {
                        (key == b"xmlns").then(String::new)
                    }
                });
                return Some(RootElement {
                    namespace,
                    dsig_prefix,
                });
            }
            Ok((_, Event::Eof)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}
