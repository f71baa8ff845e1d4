//! Engine-wide tuning knobs.
//!
//! Loaded once at [`crate::engine::Engine::start`] from the environment, in
//! the same style as `forgewright_db::config::DbConfig`: an env var per
//! field with a typed default, plus an explicit constructor for tests and
//! CLI overrides.

use std::env;
use std::time::Duration;

/// Tuning knobs for the dispatcher, coordinator, heartbeat, and reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How often the dispatcher polls for ready tickets.
    pub poll_interval: Duration,
    /// Maximum number of tickets this replica will execute concurrently.
    pub max_concurrent: usize,
    /// Hard wall-clock ceiling on a single coordinator attempt before it is
    /// aborted and treated as a verification failure.
    pub ticket_timeout: Duration,
    /// How often an in-flight coordinator sends a heartbeat for its claim.
    pub heartbeat_interval: Duration,
    /// How often the reaper scans for stale claims.
    pub reaper_interval: Duration,
    /// A claim is stale once its `last_heartbeat` is older than this.
    pub stale_threshold: Duration,
    /// Maximum verifier call attempts (transport retries and content-failure
    /// retries share this budget) before a ticket is sent to `needs_review`.
    pub verify_max_retries: u32,
    /// Base delay for the verifier retry backoff curve.
    pub verify_base_delay: Duration,
    /// Ceiling the verifier retry backoff curve will not exceed.
    pub verify_delay_cap: Duration,
    /// Multiplier applied to the delay on each successive retry.
    pub verify_backoff_multiplier: f64,
    /// Path to a file holding the VCS host's auth token.
    pub vcs_token_path: Option<String>,
    /// Base branch used when a project doesn't specify its own.
    pub default_base_branch: String,
}

impl EngineConfig {
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
    pub const DEFAULT_MAX_CONCURRENT: usize = 8;
    pub const DEFAULT_TICKET_TIMEOUT_SECS: u64 = 1800;
    pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
    pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;
    pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 90;
    pub const DEFAULT_VERIFY_MAX_RETRIES: u32 = 5;
    pub const DEFAULT_VERIFY_BASE_DELAY_MS: u64 = 500;
    pub const DEFAULT_VERIFY_DELAY_CAP_SECS: u64 = 30;
    pub const DEFAULT_VERIFY_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_BASE_BRANCH: &str = "main";

    /// Build a config from the environment, falling back to compile-time
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_u64(
                "FORGEWRIGHT_POLL_INTERVAL_SECS",
                Self::DEFAULT_POLL_INTERVAL_SECS,
            )),
            max_concurrent: env_usize(
                "FORGEWRIGHT_MAX_CONCURRENT",
                Self::DEFAULT_MAX_CONCURRENT,
            ),
            ticket_timeout: Duration::from_secs(env_u64(
                "FORGEWRIGHT_TICKET_TIMEOUT_SECS",
                Self::DEFAULT_TICKET_TIMEOUT_SECS,
            )),
            heartbeat_interval: Duration::from_secs(env_u64(
                "FORGEWRIGHT_HEARTBEAT_INTERVAL_SECS",
                Self::DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            reaper_interval: Duration::from_secs(env_u64(
                "FORGEWRIGHT_REAPER_INTERVAL_SECS",
                Self::DEFAULT_REAPER_INTERVAL_SECS,
            )),
            stale_threshold: Duration::from_secs(env_u64(
                "FORGEWRIGHT_STALE_THRESHOLD_SECS",
                Self::DEFAULT_STALE_THRESHOLD_SECS,
            )),
            verify_max_retries: env_u64(
                "FORGEWRIGHT_VERIFY_MAX_RETRIES",
                Self::DEFAULT_VERIFY_MAX_RETRIES as u64,
            ) as u32,
            verify_base_delay: Duration::from_millis(env_u64(
                "FORGEWRIGHT_VERIFY_BASE_DELAY_MS",
                Self::DEFAULT_VERIFY_BASE_DELAY_MS,
            )),
            verify_delay_cap: Duration::from_secs(env_u64(
                "FORGEWRIGHT_VERIFY_DELAY_CAP_SECS",
                Self::DEFAULT_VERIFY_DELAY_CAP_SECS,
            )),
            verify_backoff_multiplier: env::var("FORGEWRIGHT_VERIFY_BACKOFF_MULTIPLIER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_VERIFY_BACKOFF_MULTIPLIER),
            vcs_token_path: env::var("FORGEWRIGHT_VCS_TOKEN_PATH").ok(),
            default_base_branch: env::var("FORGEWRIGHT_DEFAULT_BASE_BRANCH")
                .unwrap_or_else(|_| Self::DEFAULT_BASE_BRANCH.to_string()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(Self::DEFAULT_POLL_INTERVAL_SECS),
            max_concurrent: Self::DEFAULT_MAX_CONCURRENT,
            ticket_timeout: Duration::from_secs(Self::DEFAULT_TICKET_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(Self::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            reaper_interval: Duration::from_secs(Self::DEFAULT_REAPER_INTERVAL_SECS),
            stale_threshold: Duration::from_secs(Self::DEFAULT_STALE_THRESHOLD_SECS),
            verify_max_retries: Self::DEFAULT_VERIFY_MAX_RETRIES,
            verify_base_delay: Duration::from_millis(Self::DEFAULT_VERIFY_BASE_DELAY_MS),
            verify_delay_cap: Duration::from_secs(Self::DEFAULT_VERIFY_DELAY_CAP_SECS),
            verify_backoff_multiplier: Self::DEFAULT_VERIFY_BACKOFF_MULTIPLIER,
            vcs_token_path: None,
            default_base_branch: Self::DEFAULT_BASE_BRANCH.to_string(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
