//! Drives a single job through the stage state machine

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::broadcast::ProgressBroadcaster;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobFailure, JobId, JobRecord, Stage, StageOutputs, StageTransition};
use crate::retry::{RetryPolicy, RetryingInvoker};
use crate::store::JobStore;
use crate::worker::{StageInput, StageWorkers};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached `DONE`
    Completed,
    /// Reached `ERROR`
    Failed {
        /// Stage that failed
        stage: Stage,
    },
    /// The job was evicted mid-run; nothing further was recorded
    Evicted,
}

/// Sequential stage runner.
///
/// Each job runs at most once: the run holds the job's execution lock from the
/// first stage to the terminal one, and a job that already left `PENDING` is
/// refused.
pub struct PipelineRunner {
    store: JobStore,
    invokers: Vec<RetryingInvoker>,
}

impl PipelineRunner {
    /// Build a runner with one retrying invoker per worker stage
    pub fn new(store: JobStore, workers: StageWorkers, config: &OrchestratorConfig) -> Self {
        let policy = RetryPolicy::from(&config.retry);
        let invokers = Stage::PIPELINE
            .iter()
            .filter_map(|&stage| {
                let worker = workers.for_stage(stage)?;
                let timeout = config.stage_timeouts.for_stage(stage)?;
                Some(RetryingInvoker::new(stage, Arc::clone(worker), policy.clone(), timeout))
            })
            .collect();

        Self { store, invokers }
    }

    /// Store the runner records into
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    fn broadcaster(&self) -> &ProgressBroadcaster {
        self.store.broadcaster()
    }

    /// Run a `PENDING` job to completion.
    ///
    /// Stage failures are recorded on the job and reported as
    /// [`RunOutcome::Failed`]; the `Err` side is reserved for jobs that cannot
    /// be run at all.
    pub async fn run(&self, job_id: &JobId) -> Result<RunOutcome> {
        let _guard = self.store.try_lock_run(job_id)?;

        let (target, analysis_type) = self.store.update(job_id, |job| {
            if job.stage != Stage::Pending {
                return Err(OrchestratorError::AlreadyRunning(job.id.clone()));
            }
            job.mark_started(Utc::now());
            Ok((job.target.clone(), job.analysis_type.clone()))
        })??;

        info!(%job_id, %target, %analysis_type, "pipeline run started");
        let started = Instant::now();
        let mut outputs = StageOutputs::default();

        for invoker in &self.invokers {
            let stage = invoker.stage();
            let Some(event) = self.apply(job_id, |job| job.enter_stage(stage, Utc::now()))? else {
                return Ok(self.evicted(job_id, stage));
            };
            self.broadcaster().publish(event);
            debug!(%job_id, %stage, "stage started");

            let input = StageInput {
                job_id: job_id.clone(),
                target: target.clone(),
                analysis_type: analysis_type.clone(),
                stage,
                outputs: outputs.clone(),
            };

            let live = || self.store.contains(job_id);
            match invoker.invoke_while(input, live).await {
                Ok(output) => {
                    outputs.insert(stage, output);
                    debug!(%job_id, %stage, "stage completed");
                }
                Err(failure) => {
                    if !self.store.contains(job_id) {
                        return Ok(self.evicted(job_id, stage));
                    }
                    warn!(%job_id, %stage, attempts = failure.attempts, error = %failure.error, "stage failed");
                    let failure = JobFailure::from(failure);
                    let Some(event) = self.apply(job_id, |job| job.fail(failure, Utc::now()))? else {
                        return Ok(self.evicted(job_id, stage));
                    };
                    self.broadcaster().publish(event);
                    info!(
                        %job_id,
                        %stage,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "pipeline run failed"
                    );
                    return Ok(RunOutcome::Failed { stage });
                }
            }
        }

        let Some(event) = self.apply(job_id, |job| job.complete(outputs, Utc::now()))? else {
            return Ok(self.evicted(job_id, Stage::Done));
        };
        self.broadcaster().publish(event);
        info!(
            %job_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline run completed"
        );
        Ok(RunOutcome::Completed)
    }

    /// Apply a state change; `None` means the job is gone
    fn apply<F>(&self, job_id: &JobId, mutate: F) -> Result<Option<StageTransition>>
    where
        F: FnOnce(&mut JobRecord) -> Result<StageTransition>,
    {
        match self.store.update(job_id, mutate) {
            Ok(transition) => transition.map(Some),
            Err(OrchestratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn evicted(&self, job_id: &JobId, stage: Stage) -> RunOutcome {
        debug!(%job_id, %stage, "job evicted mid-run, stopping");
        RunOutcome::Evicted
    }
}
