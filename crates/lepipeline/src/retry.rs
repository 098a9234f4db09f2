//! Bounded retry around a single stage worker

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::job::{JobFailure, Stage};
use crate::worker::{StageError, StageInput, StageOutcome, StageOutput, StageWorker};

/// Attempt budget and backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, first attempt included
    pub max_attempts: u32,
    /// Delay after the n-th failed attempt; the last entry repeats
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delays: config.delays_ms.iter().copied().map(Duration::from_millis).collect(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// A stage call that could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed after {attempts} attempt(s): {error}")]
pub struct StageFailure {
    /// Stage that failed
    pub stage: Stage,
    /// Attempts made
    pub attempts: u32,
    /// Last error observed
    pub error: StageError,
}

impl From<StageFailure> for JobFailure {
    fn from(failure: StageFailure) -> Self {
        JobFailure {
            stage: failure.stage,
            message: failure.error.to_string(),
            attempts: failure.attempts,
        }
    }
}

/// Resilience decorator for one stage worker.
///
/// Transient failures (including attempts that exceed the stage timeout) are
/// retried on a fixed schedule; permanent failures and worker panics stop
/// immediately.
pub struct RetryingInvoker {
    stage: Stage,
    worker: Arc<dyn StageWorker>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryingInvoker {
    /// Wrap `worker` for `stage`
    pub fn new(stage: Stage, worker: Arc<dyn StageWorker>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            stage,
            worker,
            policy,
            timeout,
        }
    }

    /// Stage this invoker serves
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call the worker until it succeeds, fails permanently, or the attempt budget runs out
    pub async fn invoke(&self, input: StageInput) -> Result<StageOutput, StageFailure> {
        self.invoke_while(input, || true).await
    }

    /// [`RetryingInvoker::invoke`], abandoned between attempts as soon as
    /// `live` returns false. The attempt in flight is not interrupted.
    pub async fn invoke_while<F>(&self, input: StageInput, live: F) -> Result<StageOutput, StageFailure>
    where
        F: Fn() -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.attempt(input.clone()).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!(job_id = %input.job_id, stage = %self.stage, attempt, "stage recovered after retry");
                    }
                    return Ok(output);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                warn!(job_id = %input.job_id, stage = %self.stage, attempt, %error, "permanent stage failure, not retrying");
                return Err(self.failure(attempt, error));
            }

            if attempt >= max_attempts {
                error!(job_id = %input.job_id, stage = %self.stage, attempts = attempt, %error, "all attempts exhausted");
                return Err(self.failure(attempt, error));
            }

            if !live() {
                return Err(self.abandoned(&input, attempt));
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                job_id = %input.job_id,
                stage = %self.stage,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                %error,
                "transient stage failure, retrying"
            );
            tokio::time::sleep(delay).await;

            if !live() {
                return Err(self.abandoned(&input, attempt));
            }
        }
    }

    fn abandoned(&self, input: &StageInput, attempts: u32) -> StageFailure {
        debug!(job_id = %input.job_id, stage = %self.stage, attempts, "job gone, abandoning retries");
        self.failure(attempts, StageError::permanent("job no longer exists"))
    }

    async fn attempt(&self, input: StageInput) -> StageOutcome {
        let call = AssertUnwindSafe(self.worker.invoke(input)).catch_unwind();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(StageError::permanent(format!(
                "worker panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => {
                debug!(stage = %self.stage, timeout_ms = self.timeout.as_millis() as u64, "stage attempt timed out");
                Err(StageError::transient(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn failure(&self, attempts: u32, error: StageError) -> StageFailure {
        StageFailure {
            stage: self.stage,
            attempts,
            error,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
