//! Delegated verification of enveloped XML signatures.
//!
//! The cryptography happens in a [`SignatureVerifier`]. [`SignatureAdapter`]
//! bounds each call with a timeout and turns any failure, a panic included, into
//! an [`SignatureOutcome::Errored`] whose flags read false, so a broken verifier
//! never fails a validation.
use crate::version::Detection;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

pub mod remote;

pub use remote::RemoteSignatureVerifier;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors reported by verifier implementations.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("no signature verifier configured")]
    NotConfigured,
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response from verifier (status {status}): {body}")]
    InvalidResponse { status: u16, body: String },
    #[error("signature verifier unavailable: {0}")]
    Unavailable(String),
}

/// Certificate details of the signer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerInfo {
    issuer: String,
    subject: String,
    serial_number: String,
    #[serde(default)]
    qualified: bool,
    #[serde(default)]
    public_authority: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signing_time: Option<DateTime<Utc>>,
}

impl SignerInfo {
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        serial_number: impl Into<String>,
        qualified: bool,
        public_authority: bool,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            serial_number: serial_number.into(),
            qualified,
            public_authority,
            signing_time: None,
        }
    }

    pub fn with_signing_time(mut self, signing_time: DateTime<Utc>) -> Self {
        self.signing_time = Some(signing_time);
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Qualified certificate in the eIDAS sense.
    pub fn qualified(&self) -> bool {
        self.qualified
    }

    /// Certificate issued to a public authority.
    pub fn public_authority(&self) -> bool {
        self.public_authority
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.signing_time
    }
}

/// Raw verifier answer. A check code of 0 means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierResponse {
    certificate_check: i32,
    signature_check: i32,
    #[serde(default)]
    signer: Option<SignerInfo>,
}

impl VerifierResponse {
    pub fn new(certificate_check: i32, signature_check: i32, signer: Option<SignerInfo>) -> Self {
        Self {
            certificate_check,
            signature_check,
            signer,
        }
    }

    pub fn certificate_check(&self) -> i32 {
        self.certificate_check
    }

    pub fn signature_check(&self) -> i32 {
        self.signature_check
    }

    pub fn signer(&self) -> Option<&SignerInfo> {
        self.signer.as_ref()
    }
}

/// External signature verification.
pub trait SignatureVerifier: Send + Sync {
    /// Verify the signature of `document` expected under `signature_prefix`.
    fn verify(
        &self,
        document: &[u8],
        signature_prefix: &str,
    ) -> impl Future<Output = Result<VerifierResponse, VerifierError>> + Send;
}

impl<V: SignatureVerifier> SignatureVerifier for Arc<V> {
    fn verify(
        &self,
        document: &[u8],
        signature_prefix: &str,
    ) -> impl Future<Output = Result<VerifierResponse, VerifierError>> + Send {
        (**self).verify(document, signature_prefix)
    }
}

impl<V: SignatureVerifier> SignatureVerifier for Option<V> {
    async fn verify(
        &self,
        document: &[u8],
        signature_prefix: &str,
    ) -> Result<VerifierResponse, VerifierError> {
        match self {
            Some(verifier) => verifier.verify(document, signature_prefix).await,
            None => Err(VerifierError::NotConfigured),
        }
    }
}

/// Result of checking a signed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "OutcomeView")]
pub enum SignatureOutcome {
    /// The verifier answered.
    Checked {
        certificate_ok: bool,
        signature_ok: bool,
        signer: Option<SignerInfo>,
    },
    /// The verifier failed or timed out; nothing is known about the signature.
    Errored { reason: String },
}

impl SignatureOutcome {
    pub fn certificate_ok(&self) -> bool {
        matches!(self, SignatureOutcome::Checked { certificate_ok: true, .. })
    }

    pub fn signature_ok(&self) -> bool {
        matches!(self, SignatureOutcome::Checked { signature_ok: true, .. })
    }

    pub fn signer(&self) -> Option<&SignerInfo> {
        match self {
            SignatureOutcome::Checked { signer, .. } => signer.as_ref(),
            SignatureOutcome::Errored { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.certificate_ok() && self.signature_ok()
    }

    /// Why verification could not be performed.
    pub fn error(&self) -> Option<&str> {
        match self {
            SignatureOutcome::Errored { reason } => Some(reason),
            SignatureOutcome::Checked { .. } => None,
        }
    }
}

impl From<VerifierResponse> for SignatureOutcome {
    fn from(response: VerifierResponse) -> Self {
        SignatureOutcome::Checked {
            certificate_ok: response.certificate_check == 0,
            signature_ok: response.signature_check == 0,
            signer: response.signer,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeView {
    certificate_ok: bool,
    signature_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    signer: Option<SignerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<SignatureOutcome> for OutcomeView {
    fn from(outcome: SignatureOutcome) -> Self {
        match outcome {
            SignatureOutcome::Checked {
                certificate_ok,
                signature_ok,
                signer,
            } => OutcomeView {
                certificate_ok,
                signature_ok,
                signer,
                error: None,
            },
            SignatureOutcome::Errored { reason } => OutcomeView {
                certificate_ok: false,
                signature_ok: false,
                signer: None,
                error: Some(reason),
            },
        }
    }
}

/// Runs a [`SignatureVerifier`] for signed document versions.
#[derive(Debug, Clone)]
pub struct SignatureAdapter<V> {
    verifier: V,
    timeout: Duration,
}

impl<V: SignatureVerifier> SignatureAdapter<V> {
    pub fn new(verifier: V) -> Self {
        Self {
            verifier,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check the signature of `document` under the prefix detection found;
    /// `None` for unsigned versions.
    pub async fn verify(&self, document: &[u8], detection: &Detection) -> Option<SignatureOutcome> {
        let prefix = detection.signature_prefix()?;
        Some(self.check(document, prefix).await)
    }

    /// Check the signature of `document` expected under `signature_prefix`.
    pub async fn check(&self, document: &[u8], signature_prefix: &str) -> SignatureOutcome {
        let call =
            AssertUnwindSafe(self.verifier.verify(document, signature_prefix)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(response))) => {
                let outcome = SignatureOutcome::from(response);
                debug!(
                    certificate_ok = outcome.certificate_ok(),
                    signature_ok = outcome.signature_ok(),
                    "signature checked"
                );
                outcome
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "signature verification failed");
                SignatureOutcome::Errored {
                    reason: e.to_string(),
                }
            }
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "signature verifier panicked");
                SignatureOutcome::Errored {
                    reason: format!("signature verifier panicked: {message}"),
                }
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "signature verification timed out");
                SignatureOutcome::Errored {
                    reason: format!(
                        "signature verification timed out after {} ms",
                        self.timeout.as_millis()
                    ),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Verifier answering from a fixed script.
    pub(crate) enum FakeVerifier {
        Respond(VerifierResponse),
        Fail,
        Hang,
        Panic,
    }

    pub(crate) struct CountingVerifier {
        pub(crate) inner: FakeVerifier,
        pub(crate) calls: AtomicUsize,
        pub(crate) prefixes: std::sync::Mutex<Vec<String>>,
    }

    impl CountingVerifier {
        pub(crate) fn new(inner: FakeVerifier) -> Self {
            Self {
                inner,
                calls: AtomicUsize::new(0),
                prefixes: std::sync::Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SignatureVerifier for CountingVerifier {
        async fn verify(
            &self,
            _document: &[u8],
            signature_prefix: &str,
        ) -> Result<VerifierResponse, VerifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prefixes
                .lock()
                .expect("prefixes")
                .push(signature_prefix.to_string());
            match &self.inner {
                FakeVerifier::Respond(response) => Ok(response.clone()),
                FakeVerifier::Fail => Err(VerifierError::Unavailable("connection refused".into())),
                FakeVerifier::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(VerifierError::Unavailable("woke up".into()))
                }
                FakeVerifier::Panic => panic!("certificate store corrupted"),
            }
        }
    }

    const SIGNED: &[u8] = br#"<p:FatturaElettronica
        xmlns:p="http://ivaservizi.agenziaentrate.gov.it/docs/xsd/fatture/v1.2"
        xmlns:ds="http://www.w3.org/2000/09/xmldsig#"/>"#;

    pub(crate) fn signer() -> SignerInfo {
        SignerInfo::new(
            "CN=ArubaPEC S.p.A. NG CA 3, O=ArubaPEC S.p.A., C=IT",
            "CN=Mario Rossi, SERIALNUMBER=TINIT-RSSMRA80A01H501U, C=IT",
            "6f2a9c",
            true,
            false,
        )
        .with_signing_time(Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap())
    }

    #[tokio::test]
    async fn intact_signature_carries_signer() {
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Respond(
            VerifierResponse::new(0, 0, Some(signer())),
        )));
        let detection = crate::version::detect(SIGNED).expect("detect");
        let outcome = adapter
            .verify(SIGNED, &detection)
            .await
            .expect("signed version");
        assert!(outcome.certificate_ok());
        assert!(outcome.signature_ok());
        assert!(outcome.is_valid());
        assert_eq!(outcome.signer(), Some(&signer()));
        assert_eq!(
            adapter.verifier().prefixes.lock().unwrap().as_slice(),
            ["ds".to_string()]
        );
    }

    #[tokio::test]
    async fn verifier_receives_the_prefix_the_document_binds() {
        let document = br#"<p:FatturaElettronica
            xmlns:p="http://www.fatturapa.gov.it/sdi/fatturapa/v1.1"
            xmlns:sig="http://www.w3.org/2000/09/xmldsig#"/>"#;
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Respond(
            VerifierResponse::new(0, 0, None),
        )));
        let detection = crate::version::detect(document).expect("detect");
        adapter.verify(document, &detection).await.expect("signed version");
        assert_eq!(
            adapter.verifier().prefixes.lock().unwrap().as_slice(),
            ["sig".to_string()]
        );
    }

    #[tokio::test]
    async fn checks_are_mapped_independently() {
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Respond(
            VerifierResponse::new(0, 3, None),
        )));
        let outcome = adapter.check(b"<doc/>", "ds").await;
        assert!(outcome.certificate_ok());
        assert!(!outcome.signature_ok());
        assert_eq!(outcome.signer(), None);
        assert_eq!(outcome.error(), None);
    }

    #[tokio::test]
    async fn missing_verifier_reads_all_false() {
        let adapter = SignatureAdapter::new(None::<CountingVerifier>);
        let outcome = adapter.check(b"<doc/>", "ds").await;
        assert!(!outcome.is_valid());
        assert_eq!(outcome.error(), Some("no signature verifier configured"));
    }

    #[tokio::test]
    async fn unsigned_versions_are_not_checked() {
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Fail));
        let document = br#"<p:FatturaElettronica xmlns:p="http://www.fatturapa.gov.it/sdi/fatturapa/v1.1"/>"#;
        let detection = crate::version::detect(document).expect("detect");
        assert!(adapter.verify(document, &detection).await.is_none());
        assert_eq!(adapter.verifier().calls(), 0);
    }

    #[tokio::test]
    async fn verifier_errors_read_all_false() {
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Fail));
        let outcome = adapter.check(b"<doc/>", "ds").await;
        assert!(!outcome.certificate_ok());
        assert!(!outcome.signature_ok());
        assert!(outcome.signer().is_none());
        assert!(outcome.error().is_some_and(|e| e.contains("connection refused")));
    }

    #[tokio::test]
    async fn timeouts_read_all_false() {
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Hang))
            .with_timeout(Duration::from_millis(50));
        let outcome = adapter.check(b"<doc/>", "ds").await;
        assert!(matches!(outcome, SignatureOutcome::Errored { .. }));
        assert!(!outcome.is_valid());
        assert!(outcome.error().is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn panicking_verifier_reads_all_false() {
        let adapter = SignatureAdapter::new(CountingVerifier::new(FakeVerifier::Panic));
        let outcome = adapter.check(b"<doc/>", "ds").await;
        assert!(matches!(outcome, SignatureOutcome::Errored { .. }));
        assert!(!outcome.certificate_ok());
        assert!(!outcome.signature_ok());
        assert_eq!(
            outcome.error(),
            Some("signature verifier panicked: certificate store corrupted")
        );
        assert_eq!(adapter.verifier().calls(), 1);
    }

    #[test]
    fn outcome_serializes_flags_for_both_variants() {
        let checked = SignatureOutcome::from(VerifierResponse::new(0, 1, None));
        assert_eq!(
            serde_json::to_value(&checked).unwrap(),
            serde_json::json!({"certificateOk": true, "signatureOk": false})
        );
        let errored = SignatureOutcome::Errored {
            reason: "down".into(),
        };
        assert_eq!(
            serde_json::to_value(&errored).unwrap(),
            serde_json::json!({"certificateOk": false, "signatureOk": false, "error": "down"})
        );
    }

    #[test]
    fn response_deserializes_from_wire_format() {
        let body = r#"{
          "certificateCheck": 0,
          "signatureCheck": 0,
          "signer": {
            "issuer": "CN=CA",
            "subject": "CN=Mario Rossi",
            "serialNumber": "01",
            "qualified": true,
            "publicAuthority": true,
            "signingTime": "2024-03-15T10:30:00Z"
          }
        }"#;
        let response: VerifierResponse = serde_json::from_str(body).expect("deserialize");
        let signer = response.signer().expect("signer");
        assert_eq!(signer.serial_number(), "01");
        assert!(signer.public_authority());
        assert_eq!(
            signer.signing_time(),
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap())
        );

        let bare: VerifierResponse =
            serde_json::from_str(r#"{"certificateCheck": 2, "signatureCheck": 0}"#).expect("bare");
        assert!(bare.signer().is_none());
        assert_eq!(bare.certificate_check(), 2);
    }
}
