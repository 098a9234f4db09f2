//! Stage worker boundary.
//!
//! The orchestrator never looks inside a worker: it hands over a [`StageInput`]
//! and gets back either an output value or a classified [`StageError`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::job::{JobId, Stage, StageOutputs};

/// Opaque output of one stage
pub type StageOutput = Value;

/// Result of a single worker attempt
pub type StageOutcome = Result<StageOutput, StageError>;

/// Failure classification reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// Network/timeout class; worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// Validation/business-rule class; retrying will not help
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl StageError {
    /// Build a transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Build a permanent failure
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// True for `Transient`
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Failure description without the classification prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Permanent(message) => message,
        }
    }
}

/// Input handed to a stage worker
#[derive(Debug, Clone, Serialize)]
pub struct StageInput {
    /// Job being run
    pub job_id: JobId,
    /// Original request target
    pub target: String,
    /// Original request analysis type
    pub analysis_type: String,
    /// Stage being invoked
    pub stage: Stage,
    /// Outputs of the stages that already ran
    pub outputs: StageOutputs,
}

impl StageInput {
    /// Output of the immediately preceding stage, if any
    pub fn previous(&self) -> Option<&Value> {
        self.outputs.latest()
    }
}

/// One step of the pipeline, implemented outside the orchestrator
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// Execute one attempt
    async fn invoke(&self, input: StageInput) -> StageOutcome;
}

/// The four workers a pipeline runs, one per stage
#[derive(Clone)]
pub struct StageWorkers {
    /// Scout worker
    pub scout: Arc<dyn StageWorker>,
    /// Analyst worker
    pub analyst: Arc<dyn StageWorker>,
    /// Strategy worker
    pub strategy: Arc<dyn StageWorker>,
    /// Presenter worker
    pub presenter: Arc<dyn StageWorker>,
}

impl StageWorkers {
    /// Bundle the four stage workers
    pub fn new(
        scout: Arc<dyn StageWorker>,
        analyst: Arc<dyn StageWorker>,
        strategy: Arc<dyn StageWorker>,
        presenter: Arc<dyn StageWorker>,
    ) -> Self {
        Self {
            scout,
            analyst,
            strategy,
            presenter,
        }
    }

    /// Worker for a pipeline stage
    pub fn for_stage(&self, stage: Stage) -> Option<&Arc<dyn StageWorker>> {
        match stage {
            Stage::Scout => Some(&self.scout),
            Stage::Analyst => Some(&self.analyst),
            Stage::Strategy => Some(&self.strategy),
            Stage::Presenter => Some(&self.presenter),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StageWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageWorkers").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl StageWorker for Echo {
        async fn invoke(&self, input: StageInput) -> StageOutcome {
            Ok(json!({ "stage": input.stage.as_str(), "target": input.target }))
        }
    }

    #[test]
    fn test_stage_error_classification() {
        assert!(StageError::transient("reset by peer").is_transient());
        assert!(!StageError::permanent("schema mismatch").is_transient());
        assert_eq!(StageError::permanent("schema mismatch").message(), "schema mismatch");
    }

    #[test]
    fn test_workers_for_stage() {
        let echo: Arc<dyn StageWorker> = Arc::new(Echo);
        let workers = StageWorkers::new(echo.clone(), echo.clone(), echo.clone(), echo);
        for stage in Stage::PIPELINE {
            assert!(workers.for_stage(stage).is_some());
        }
        assert!(workers.for_stage(Stage::Pending).is_none());
        assert!(workers.for_stage(Stage::Done).is_none());
    }

    #[tokio::test]
    async fn test_input_previous_output() {
        let mut outputs = StageOutputs::default();
        outputs.insert(Stage::Scout, json!({ "competitors": 3 }));
        let input = StageInput {
            job_id: JobId::new(),
            target: "Acme".to_string(),
            analysis_type: "quick".to_string(),
            stage: Stage::Analyst,
            outputs,
        };
        assert_eq!(input.previous(), Some(&json!({ "competitors": 3 })));

        let output = Echo.invoke(input).await.unwrap();
        assert_eq!(output["stage"], "ANALYST");
    }
}
