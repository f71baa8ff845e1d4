//! Exponential backoff with jitter for verifier retries.

use std::time::Duration;

use rand::Rng;

/// The backoff curve's tunable parameters, mirroring `EngineConfig`'s
/// `verify_base_delay`/`verify_delay_cap`/`verify_backoff_multiplier` (see
/// spec.md §4.4 and §6). Kept as its own small struct rather than taking
/// `EngineConfig` directly so `delay_for` stays testable without the rest
/// of the engine's knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub cap: Duration,
    pub multiplier: f64,
}

impl From<&crate::config::EngineConfig> for BackoffConfig {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            base_delay: config.verify_base_delay,
            cap: config.verify_delay_cap,
            multiplier: config.verify_backoff_multiplier,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(
                crate::config::EngineConfig::DEFAULT_VERIFY_BASE_DELAY_MS,
            ),
            cap: Duration::from_secs(crate::config::EngineConfig::DEFAULT_VERIFY_DELAY_CAP_SECS),
            multiplier: crate::config::EngineConfig::DEFAULT_VERIFY_BACKOFF_MULTIPLIER,
        }
    }
}

/// Compute the delay before retry attempt number `attempt` (1-indexed).
///
/// `base * multiplier^(attempt-1)`, capped at `cap`, then widened by up to
/// 20% jitter so concurrent retries from different tickets don't
/// thunder-herd the verifier at the same instant (spec.md §9).
pub fn delay_for(attempt: u32, config: BackoffConfig) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let factor = config.multiplier.max(1.0).powi(exp as i32);
    let base_ms = (config.base_delay.as_millis() as f64 * factor) as u64;
    let base_ms = base_ms.min(config.cap.as_millis() as u64);

    let jitter_range = base_ms / 5;
    let jitter = if jitter_range == 0 {
        0
    } else {
        rand::rng().random_range(0..jitter_range)
    };
    Duration::from_millis(base_ms + jitter)
}
