//! Default [`VerifierClient`](super::VerifierClient) implementation: POSTs
//! the verification request to a configured HTTP endpoint.
//!
//! This is the one place in the crate that talks to an external service
//! over HTTP rather than a subprocess -- see `DESIGN.md` for why `reqwest`
//! was added to the dependency stack for it.

use async_trait::async_trait;

use super::{VerificationOutcome, VerificationRequest, VerifierClient, VerifierError, classify};

/// Verifier backend that calls a remote HTTP endpoint with the verification
/// request as a JSON body and expects a [`VerificationOutcome`] JSON body
/// back.
pub struct HttpVerifier {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VerifierClient for HttpVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, (VerifierError, anyhow::Error)> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| (classify::is_retryable(e.status().map(|s| s.as_u16()), true), e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let kind = classify::is_retryable(Some(status.as_u16()), false);
            return Err((
                kind,
                anyhow::anyhow!("verifier {} returned status {}", self.endpoint, status),
            ));
        }

        response
            .json::<VerificationOutcome>()
            .await
            .map_err(|e| (VerifierError::Permanent, e.into()))
    }
}
