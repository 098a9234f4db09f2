//! Orchestrator configuration with environment overrides

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::job::Stage;

/// Hard ceiling on live job records
pub const DEFAULT_MAX_JOBS: usize = 200;

/// Age after which a job is swept regardless of stage (24 hours)
pub const DEFAULT_JOB_TTL_SECS: u64 = 24 * 60 * 60;

/// Interval between TTL sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Maximum webhook events retained per job
pub const DEFAULT_WEBHOOK_EVENT_CAP: usize = 100;

/// Per-job progress buffer; slower subscribers miss events beyond this
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// Attempts per stage call, first attempt included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff schedule between attempts in milliseconds
pub const DEFAULT_RETRY_DELAYS_MS: &[u64] = &[1_000, 2_000, 4_000];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum live jobs before FIFO eviction
    pub max_jobs: usize,

    /// Job time-to-live in seconds
    pub job_ttl_secs: u64,

    /// TTL sweep interval in seconds
    pub sweep_interval_secs: u64,

    /// Webhook events retained per job
    pub webhook_event_cap: usize,

    /// Progress events buffered per job
    pub subscriber_buffer: usize,

    /// Log level for tracing
    pub log_level: String,

    /// Stage call retry policy
    pub retry: RetryConfig,

    /// Per-stage call timeouts
    pub stage_timeouts: StageTimeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            job_ttl_secs: DEFAULT_JOB_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            webhook_event_cap: DEFAULT_WEBHOOK_EVENT_CAP,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            log_level: "info".to_string(),
            retry: RetryConfig::default(),
            stage_timeouts: StageTimeouts::default(),
        }
    }
}

/// Retry policy for transient stage failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per stage call, first attempt included
    pub max_attempts: u32,

    /// Delay after each failed attempt in milliseconds; the last entry repeats
    pub delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delays_ms: DEFAULT_RETRY_DELAYS_MS.to_vec(),
        }
    }
}

/// Per-attempt timeout for each worker stage, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    /// Remote scout agent
    pub scout_secs: u64,
    /// Local analyst transform
    pub analyst_secs: u64,
    /// Remote strategy agent
    pub strategy_secs: u64,
    /// Local presenter renderer
    pub presenter_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            scout_secs: 180,
            analyst_secs: 60,
            strategy_secs: 180,
            presenter_secs: 60,
        }
    }
}

impl StageTimeouts {
    /// Timeout for a worker stage; non-worker stages get `None`
    pub fn for_stage(&self, stage: Stage) -> Option<Duration> {
        let secs = match stage {
            Stage::Scout => self.scout_secs,
            Stage::Analyst => self.analyst_secs,
            Stage::Strategy => self.strategy_secs,
            Stage::Presenter => self.presenter_secs,
            _ => return None,
        };
        Some(Duration::from_secs(secs))
    }
}

impl OrchestratorConfig {
    /// Load config from environment variables with fallback to defaults
    ///
    /// Environment variables:
    /// - `LEPIPELINE_MAX_JOBS` - Job capacity
    /// - `LEPIPELINE_JOB_TTL_SECS` - Job time-to-live
    /// - `LEPIPELINE_SWEEP_INTERVAL_SECS` - TTL sweep interval
    /// - `LEPIPELINE_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LEPIPELINE_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max_jobs) = lookup("LEPIPELINE_MAX_JOBS").and_then(|v| v.parse().ok()) {
            self.max_jobs = max_jobs;
        }

        if let Some(ttl) = lookup("LEPIPELINE_JOB_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.job_ttl_secs = ttl;
        }

        if let Some(interval) = lookup("LEPIPELINE_SWEEP_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.sweep_interval_secs = interval;
        }

        if let Some(log_level) = lookup("LEPIPELINE_LOG_LEVEL") {
            self.log_level = log_level;
        }

        self
    }

    /// Job time-to-live
    pub fn job_ttl(&self) -> chrono::Duration {
        i64::try_from(self.job_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// TTL sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate configuration
    ///
    /// # Returns
    ///
    /// `Result<(), String>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<(), String> {
        if self.max_jobs == 0 {
            return Err("max_jobs must be greater than zero".to_string());
        }

        if self.job_ttl_secs == 0 {
            return Err("job_ttl_secs must be greater than zero".to_string());
        }

        // chrono caps durations at i64::MAX milliseconds
        if self.job_ttl_secs > i64::MAX as u64 / 1_000 {
            return Err(format!("job_ttl_secs is too large: {}", self.job_ttl_secs));
        }

        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than zero".to_string());
        }

        if self.subscriber_buffer == 0 {
            return Err("subscriber_buffer must be greater than zero".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be greater than zero".to_string());
        }

        let timeouts = &self.stage_timeouts;
        if [
            timeouts.scout_secs,
            timeouts.analyst_secs,
            timeouts.strategy_secs,
            timeouts.presenter_secs,
        ]
        .contains(&0)
        {
            return Err("stage timeouts must be greater than zero".to_string());
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.log_level
            ));
        }

        Ok(())
    }
}
