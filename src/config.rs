//! Pipeline configuration
//!
//! Defaults in code, overridable from the environment. Thresholds the design
//! leaves tunable (relevance cut-off, contradiction tolerance, retry bounds)
//! live here rather than as constants.

use crate::verifier::VerifierConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay before attempt `attempt` (0-based), capped.
    /// The caller applies jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.backoff_cap)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Evidence below this relevance never enters the ledger; a data need
    /// whose best candidate is below it triggers refusal.
    pub relevance_threshold: f64,
    /// Bounded re-synthesis attempts after a failed verification.
    pub max_synthesis_retries: u32,
    pub retry: RetryPolicy,
    pub verifier: VerifierConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.25,
            max_synthesis_retries: 2,
            retry: RetryPolicy::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `PIPELINE_*` environment variables where set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_f64("PIPELINE_RELEVANCE_THRESHOLD") {
            config.relevance_threshold = v;
        }
        if let Some(v) = env_u32("PIPELINE_MAX_SYNTHESIS_RETRIES") {
            config.max_synthesis_retries = v;
        }
        if let Some(v) = env_u32("PIPELINE_MAX_CALL_ATTEMPTS") {
            config.retry.max_attempts = v.max(1);
        }
        if let Some(v) = env_u64("PIPELINE_CALL_TIMEOUT_MS") {
            config.retry.call_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_f64("PIPELINE_ABS_TOLERANCE") {
            config.verifier.abs_tolerance = v;
        }
        if let Some(v) = env_f64("PIPELINE_REL_TOLERANCE") {
            config.verifier.rel_tolerance = v;
        }
        if let Some(v) = env_f64("PIPELINE_CONTRADICTION_TOLERANCE") {
            config.verifier.contradiction_rel_tolerance = v;
        }

        config
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok()?.parse().ok()
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok()?.parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok()?.parse().ok()
}
