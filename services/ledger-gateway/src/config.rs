//! Gateway configuration
//!
//! Defaults follow the service's operating assumptions; every knob can be
//! overridden from the environment for deployment tuning.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// First retry delay after a transient submission failure.
    pub submit_base_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub submit_backoff_factor: u32,
    /// Maximum submission attempts before reporting a transient failure.
    pub max_submit_attempts: u32,
    /// Interval between confirmation status polls.
    pub confirm_poll_interval: Duration,
    /// Hard ceiling on confirmation polling; past it the outcome is UNKNOWN.
    pub confirm_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            submit_base_delay: Duration::from_millis(500),
            submit_backoff_factor: 2,
            max_submit_attempts: 5,
            confirm_poll_interval: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `LEDGER_*` environment variables where set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            submit_base_delay: env_millis("LEDGER_SUBMIT_BASE_DELAY_MS")
                .unwrap_or(defaults.submit_base_delay),
            submit_backoff_factor: env_u32("LEDGER_SUBMIT_BACKOFF_FACTOR")
                .unwrap_or(defaults.submit_backoff_factor),
            max_submit_attempts: env_u32("LEDGER_MAX_SUBMIT_ATTEMPTS")
                .unwrap_or(defaults.max_submit_attempts),
            confirm_poll_interval: env_millis("LEDGER_CONFIRM_POLL_INTERVAL_MS")
                .unwrap_or(defaults.confirm_poll_interval),
            confirm_timeout: env_millis("LEDGER_CONFIRM_TIMEOUT_MS")
                .unwrap_or(defaults.confirm_timeout),
        }
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_millis)
}
