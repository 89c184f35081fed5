//! HTTP client for a remote signature verification service.
use super::{SignatureVerifier, VerifierError, VerifierResponse};
use crate::config::Config;
use base64ct::{Base64, Encoding};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const BASE_URL_ENV: &str = "FATTURA_VERIFIER_URL";

/// Verifies signatures by posting documents to `{base}/verify`.
///
/// # Examples
/// ```rust,no_run
/// use fattura_core::signature::{RemoteSignatureVerifier, SignatureAdapter};
/// use std::time::Duration;
///
/// let verifier = RemoteSignatureVerifier::new("https://verifier.example/api", Duration::from_secs(10))?;
/// let adapter = SignatureAdapter::new(verifier).with_timeout(Duration::from_secs(10));
/// # let _ = adapter;
/// # Ok::<(), fattura_core::signature::VerifierError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RemoteSignatureVerifier {
    client: Client,
    base_url: String,
}

impl RemoteSignatureVerifier {
    /// # Errors
    /// Returns [`VerifierError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, VerifierError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    /// Verifier for the configured service. `FATTURA_VERIFIER_URL` takes
    /// precedence over `verifier.url`.
    ///
    /// # Errors
    /// Returns [`VerifierError::NotConfigured`] when neither is set.
    pub fn from_config(config: &Config) -> Result<Self, VerifierError> {
        let base_url = resolve_base_url(
            std::env::var(BASE_URL_ENV).ok().as_deref(),
            config.verifier_url(),
        )
        .ok_or(VerifierError::NotConfigured)?;
        Self::new(&base_url, config.verifier_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn normalize_base_url(value: &str) -> String {
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

fn resolve_base_url(env: Option<&str>, configured: Option<&str>) -> Option<String> {
    env.filter(|value| !value.trim().is_empty())
        .or(configured)
        .map(|value| value.trim().to_string())
}

impl SignatureVerifier for RemoteSignatureVerifier {
    async fn verify(
        &self,
        document: &[u8],
        signature_prefix: &str,
    ) -> Result<VerifierResponse, VerifierError> {
        let payload = serde_json::json!({
            "document": Base64::encode_string(document),
            "signaturePrefix": signature_prefix,
        });
        let url = self.build_endpoint("verify");
        debug!(url = %url, bytes = document.len(), "posting document for signature verification");

        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(VerifierError::InvalidResponse {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str::<VerifierResponse>(&body).map_err(|_| VerifierError::InvalidResponse {
            status: status.as_u16(),
            body,
        })
    }
}
