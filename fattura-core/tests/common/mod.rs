use fattura_core::{
    config::Config,
    signature::{SignatureVerifier, SignerInfo, VerifierError, VerifierResponse},
    version::DocumentVersion,
};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

#[allow(dead_code)]
pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

#[allow(dead_code)]
pub fn invoice_path(name: &str) -> PathBuf {
    fixtures_dir().join("invoices").join(name)
}

#[allow(dead_code)]
pub fn invoice(name: &str) -> Vec<u8> {
    std::fs::read(invoice_path(name)).expect("read invoice fixture")
}

#[allow(dead_code)]
pub fn rules_path(name: &str) -> PathBuf {
    fixtures_dir().join("rules").join(name)
}

/// Config pointing at the compact test schemas.
#[allow(dead_code)]
pub fn fixture_config() -> Config {
    let schemas = fixtures_dir().join("schemas");
    Config::default()
        .with_schema(DocumentVersion::V1_0, schemas.join("fatturapa_v1.0.xsd"))
        .with_schema(DocumentVersion::V1_1, schemas.join("fatturapa_v1.1.xsd"))
        .with_schema(DocumentVersion::V1_2, schemas.join("fatturapa_v1.2.xsd"))
}

#[allow(dead_code)]
pub fn sample_signer() -> SignerInfo {
    SignerInfo::new(
        "CN=InfoCert Firma Qualificata 2, O=INFOCERT SPA, C=IT",
        "CN=Rossi Mario, SERIALNUMBER=TINIT-RSSMRA80A01H501U, C=IT",
        "1a2b3c4d",
        true,
        false,
    )
}

#[allow(dead_code)]
pub enum Script {
    Respond(VerifierResponse),
    Fail(&'static str),
    Sleep(Duration),
}

/// Scripted stand-in for the external verification service.
#[allow(dead_code)]
pub struct ScriptedVerifier {
    script: Script,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedVerifier {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn intact() -> Self {
        Self::new(Script::Respond(VerifierResponse::new(0, 0, Some(sample_signer()))))
    }

    pub fn broken_signature() -> Self {
        Self::new(Script::Respond(VerifierResponse::new(0, 7, Some(sample_signer()))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureVerifier for ScriptedVerifier {
    async fn verify(
        &self,
        _document: &[u8],
        _signature_prefix: &str,
    ) -> Result<VerifierResponse, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Respond(response) => Ok(response.clone()),
            Script::Fail(reason) => Err(VerifierError::Unavailable((*reason).to_string())),
            Script::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(VerifierResponse::new(0, 0, None))
            }
        }
    }
}
