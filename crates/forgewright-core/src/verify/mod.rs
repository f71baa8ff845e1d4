//! The `VerifierClient` trait -- the adapter interface for an external
//! verification service.

pub mod backoff;
pub mod classify;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use backoff::BackoffConfig;
pub use classify::is_retryable;
pub use http::HttpVerifier;

/// Everything a verifier needs to judge an attempt.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRequest {
    pub ticket_id: Uuid,
    pub acceptance_criteria: serde_json::Value,
    pub branch_name: String,
    pub attempt: i32,
    /// Which verification phases to run (e.g. `["build", "test", "lint"]`).
    /// An empty list means the verifier's own default phase set.
    #[serde(default)]
    pub phases: Vec<String>,
}

/// The outcome of a verification call.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    /// Per-criterion pass/fail detail, stored as a ticket artifact and
    /// forwarded to the generator on retry.
    pub feedback: serde_json::Value,
    /// Whether the verifier additionally judges the attempt ready to open
    /// as a pull request. `None` means the verifier doesn't distinguish
    /// this from `passed`.
    #[serde(default)]
    pub ready_for_pr: Option<bool>,
    /// Specific, agent-directed feedback lines to feed back into the next
    /// generation attempt on failure.
    #[serde(default)]
    pub feedback_for_agent: Option<Vec<String>>,
    /// Supporting evidence (logs, diffs, test output) kept for the record
    /// but not otherwise interpreted.
    #[serde(default)]
    pub evidence: Option<serde_json::Value>,
}

/// Classification of a verifier call failure, used to decide whether to
/// retry with backoff or give up immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierError {
    /// Network/timeout/5xx -- worth retrying.
    Transient,
    /// The verifier rejected the request itself (bad payload) -- retrying
    /// would fail identically.
    Permanent,
}

/// Adapter interface for an external verification service.
#[async_trait]
pub trait VerifierClient: Send + Sync {
    /// Human-readable name for this verifier backend.
    fn name(&self) -> &str;

    /// Submit an attempt for verification. Returns `Err` with a
    /// [`VerifierError`] classification on failure so the caller's retry
    /// wrapper can decide what to do.
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> std::result::Result<VerificationOutcome, (VerifierError, anyhow::Error)>;
}

/// Call `client.verify` with exponential backoff and jitter, retrying only
/// [`VerifierError::Transient`] failures, up to `max_attempts` total calls.
pub async fn verify_with_retry(
    client: &dyn VerifierClient,
    request: &VerificationRequest,
    max_attempts: u32,
    backoff_config: BackoffConfig,
) -> Result<VerificationOutcome> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match client.verify(request).await {
            Ok(outcome) => return Ok(outcome),
            Err((kind, err)) => {
                if kind == VerifierError::Permanent || attempt >= max_attempts {
                    return Err(err.context(format!(
                        "verifier {:?} failed for ticket {} after {} attempt(s)",
                        client.name(),
                        request.ticket_id,
                        attempt
                    )));
                }
                let delay = backoff::delay_for(attempt, backoff_config);
                tracing::warn!(
                    ticket_id = %request.ticket_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient verifier failure, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
