//! Classify verifier transport failures as retryable or not.

use super::VerifierError;

/// Decide whether a raw transport error (HTTP status, I/O error message)
/// should be retried.
///
/// Connection failures, timeouts, 429 (rate limit), and 5xx responses are
/// transient; other 4xx responses indicate a request the verifier will
/// never accept, so retrying is pointless.
pub fn is_retryable(status: Option<u16>, io_error: bool) -> VerifierError {
    if io_error {
        return VerifierError::Transient;
    }
    match status {
        Some(429) => VerifierError::Transient,
        Some(code) if (500..600).contains(&code) => VerifierError::Transient,
        Some(code) if (400..500).contains(&code) => VerifierError::Permanent,
        _ => VerifierError::Transient,
    }
}
