//! Public entry point tying the store, runner and broadcaster together

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broadcast::{ProgressBroadcaster, ProgressStream};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobId, JobRecord, JobStatus, PipelineResult, Stage, WebhookEvent};
use crate::runner::{PipelineRunner, RunOutcome};
use crate::store::JobStore;
use crate::worker::StageWorkers;

/// Pipeline orchestrator.
///
/// Cheap to clone; every clone shares the same store.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    store: JobStore,
    runner: Arc<PipelineRunner>,
}

impl Orchestrator {
    /// Validate `config`, build the store and start its TTL sweeper
    pub fn new(config: OrchestratorConfig, workers: StageWorkers) -> Result<Self> {
        config.validate().map_err(OrchestratorError::InvalidConfig)?;

        let broadcaster = ProgressBroadcaster::new(config.subscriber_buffer);
        let store = JobStore::new(&config, broadcaster);
        let runner = Arc::new(PipelineRunner::new(store.clone(), workers, &config));
        store.start_sweeper();

        info!(
            max_jobs = config.max_jobs,
            job_ttl_secs = config.job_ttl_secs,
            max_attempts = config.retry.max_attempts,
            "orchestrator ready"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            runner,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Underlying job store
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Register a new `PENDING` job without running it
    pub fn create(&self, target: impl Into<String>, analysis_type: impl Into<String>) -> Result<JobId> {
        self.store.create(target, analysis_type)
    }

    /// Create a job and run it in the background
    pub fn start(&self, target: impl Into<String>, analysis_type: impl Into<String>) -> Result<JobId> {
        let job_id = self.create(target, analysis_type)?;
        drop(self.spawn_run(job_id.clone()));
        Ok(job_id)
    }

    /// Run an existing job on a new tokio task
    pub fn spawn_run(&self, job_id: JobId) -> JoinHandle<Result<RunOutcome>> {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let outcome = runner.run(&job_id).await;
            if let Err(e) = &outcome {
                error!(%job_id, code = e.code(), "pipeline run rejected: {}", e);
            }
            outcome
        })
    }

    /// Run an existing job on the current task
    pub async fn run(&self, job_id: &JobId) -> Result<RunOutcome> {
        self.runner.run(job_id).await
    }

    /// Full snapshot of a job
    pub fn get(&self, job_id: &JobId) -> Result<JobRecord> {
        self.store.get(job_id)
    }

    /// Polling view of a job
    pub fn get_status(&self, job_id: &JobId) -> Result<JobStatus> {
        Ok(self.store.get(job_id)?.status())
    }

    /// Aggregate result of a finished job
    pub fn get_results(&self, job_id: &JobId) -> Result<PipelineResult> {
        let job = self.store.get(job_id)?;
        match job.stage {
            Stage::Done => job.result.ok_or(OrchestratorError::NotReady {
                job_id: job.id,
                stage: Stage::Done,
            }),
            Stage::Error => {
                let (stage, message) = match job.error {
                    Some(failure) => (failure.stage, failure.message),
                    None => (job.failed_at_stage.unwrap_or(Stage::Error), job.message),
                };
                Err(OrchestratorError::PipelineFailed {
                    job_id: job.id,
                    stage,
                    message,
                })
            }
            stage => Err(OrchestratorError::NotReady {
                job_id: job.id,
                stage,
            }),
        }
    }

    /// Follow a job's progress.
    ///
    /// The stream starts with the job's current state and ends after `DONE` or
    /// `ERROR`. It also ends early, without a terminal event, if the job is
    /// evicted.
    pub fn subscribe(&self, job_id: &JobId) -> Result<ProgressStream> {
        let broadcaster = self.store.broadcaster();
        // subscribe before reading the snapshot so no transition falls in between
        let subscription = broadcaster.subscribe(job_id);

        let snapshot = match self.store.get(job_id) {
            Ok(job) => job.transition(),
            Err(e) => {
                drop(subscription);
                broadcaster.prune(job_id);
                return Err(e);
            }
        };

        if snapshot.stage.is_terminal() {
            drop(subscription);
            broadcaster.prune(job_id);
            return Ok(ProgressStream::new(snapshot, None));
        }
        Ok(ProgressStream::new(snapshot, Some(subscription)))
    }

    /// Attach a webhook payload to a job; returns the number of events retained
    pub fn record_webhook_event(&self, job_id: &JobId, payload: Value) -> Result<usize> {
        self.store.record_webhook_event(job_id, payload)
    }

    /// Webhook payloads of a job, oldest first
    pub fn webhook_events(&self, job_id: &JobId) -> Result<Vec<WebhookEvent>> {
        self.store.webhook_events(job_id)
    }

    /// Number of jobs currently held
    pub fn active_jobs(&self) -> usize {
        self.store.len()
    }

    /// Stop background maintenance. Runs already in flight are not cancelled.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RunStatus;
    use crate::worker::{StageError, StageInput, StageOutcome, StageWorker};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(Option<Stage>);

    #[async_trait]
    impl StageWorker for Fixed {
        async fn invoke(&self, input: StageInput) -> StageOutcome {
            if Some(input.stage) == self.0 {
                Err(StageError::permanent("no data for target"))
            } else {
                Ok(json!({ "stage": input.stage.as_str() }))
            }
        }
    }

    fn orchestrator(fail_at: Option<Stage>) -> Orchestrator {
        let worker = Arc::new(Fixed(fail_at));
        let workers = StageWorkers::new(worker.clone(), worker.clone(), worker.clone(), worker);
        Orchestrator::new(OrchestratorConfig::default(), workers).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let worker = Arc::new(Fixed(None));
        let workers = StageWorkers::new(worker.clone(), worker.clone(), worker.clone(), worker);
        let config = OrchestratorConfig {
            max_jobs: 0,
            ..Default::default()
        };
        let err = Orchestrator::new(config, workers).err().unwrap();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[tokio::test]
    async fn test_results_not_ready_while_pending() {
        let orchestrator = orchestrator(None);
        let id = orchestrator.create("Acme", "standard").unwrap();

        let status = orchestrator.get_status(&id).unwrap();
        assert_eq!(status.status, RunStatus::Pending);
        assert_eq!(
            orchestrator.get_results(&id).unwrap_err(),
            OrchestratorError::NotReady {
                job_id: id.clone(),
                stage: Stage::Pending
            }
        );
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_results_after_success() {
        let orchestrator = orchestrator(None);
        let id = orchestrator.create("Acme", "standard").unwrap();
        assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);

        let result = orchestrator.get_results(&id).unwrap();
        assert_eq!(result.presenter, Some(json!({ "stage": "PRESENTER" })));
        assert_eq!(orchestrator.get_status(&id).unwrap().status, RunStatus::Done);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_results_after_failure() {
        let orchestrator = orchestrator(Some(Stage::Scout));
        let id = orchestrator.create("Acme", "standard").unwrap();
        orchestrator.run(&id).await.unwrap();

        match orchestrator.get_results(&id).unwrap_err() {
            OrchestratorError::PipelineFailed { stage, message, .. } => {
                assert_eq!(stage, Stage::Scout);
                assert!(message.contains("no data for target"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let status = orchestrator.get_status(&id).unwrap();
        assert_eq!(status.failed_at_stage, Some(Stage::Scout));
        assert!(status.error.is_some());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_unknown_job() {
        let orchestrator = orchestrator(None);
        assert!(orchestrator.subscribe(&JobId::new()).unwrap_err().is_not_found());
        assert_eq!(orchestrator.store().broadcaster().tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_to_removed_job_leaves_no_channel() {
        let orchestrator = orchestrator(None);
        let id = orchestrator.create("Acme", "standard").unwrap();
        let stream = orchestrator.subscribe(&id).unwrap();
        assert_eq!(orchestrator.store().broadcaster().tracked_jobs(), 1);

        assert!(orchestrator.store().remove(&id));
        assert_eq!(orchestrator.store().broadcaster().tracked_jobs(), 0);
        drop(stream);

        assert!(orchestrator.subscribe(&id).unwrap_err().is_not_found());
        assert_eq!(orchestrator.store().broadcaster().tracked_jobs(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_to_finished_job() {
        let orchestrator = orchestrator(None);
        let id = orchestrator.create("Acme", "standard").unwrap();
        orchestrator.run(&id).await.unwrap();

        let events = orchestrator.subscribe(&id).unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, Stage::Done);
        assert_eq!(events[0].progress, 100);
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let orchestrator = orchestrator(None);
        let id = orchestrator.start("Acme", "standard").unwrap();

        let events = orchestrator.subscribe(&id).unwrap().collect().await;
        assert_eq!(events.last().map(|e| e.stage), Some(Stage::Done));
        assert!(events.windows(2).all(|w| w[0].stage < w[1].stage));
        assert_eq!(orchestrator.active_jobs(), 1);
    }
}
