//! Orchestrator error types

use thiserror::Error;

use crate::job::{JobId, Stage};

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors returned synchronously by the store, runner and facade.
///
/// Stage failures never surface here directly: they end up recorded on the
/// job as `ERROR` and are only reported as `PipelineFailed` when a caller asks
/// for the results of such a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// Unknown or evicted job
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// A run for this job is in flight or has already happened
    #[error("Job {0} is already running or has already run")]
    AlreadyRunning(JobId),

    /// Eviction could not free a slot
    #[error("Job store capacity of {capacity} exceeded")]
    CapacityExceeded {
        /// Configured ceiling
        capacity: usize,
    },

    /// Results requested before the job finished
    #[error("Job {job_id} has no results yet (stage {stage})")]
    NotReady {
        /// Job queried
        job_id: JobId,
        /// Stage at the time of the query
        stage: Stage,
    },

    /// The job ended in `ERROR`
    #[error("Job {job_id} failed at {stage}: {message}")]
    PipelineFailed {
        /// Job queried
        job_id: JobId,
        /// Stage that failed
        stage: Stage,
        /// Failure description
        message: String,
    },

    /// A mutation tried to break the stage state machine
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition {
        /// Stage before
        from: Stage,
        /// Requested stage
        to: Stage,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OrchestratorError {
    /// Stable error code for transport layers
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::NotReady { .. } => "NOT_READY",
            Self::PipelineFailed { .. } => "PIPELINE_FAILED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let id = JobId::new();
        let error = OrchestratorError::NotFound(id.clone());
        assert!(error.to_string().contains(&id.to_string()));
        assert_eq!(error.code(), "NOT_FOUND");
        assert!(error.is_not_found());
    }

    #[test]
    fn test_error_display_pipeline_failed() {
        let error = OrchestratorError::PipelineFailed {
            job_id: JobId::new(),
            stage: Stage::Strategy,
            message: "agent rejected prompt".to_string(),
        };
        let display = error.to_string();
        assert!(display.contains("STRATEGY"));
        assert!(display.contains("agent rejected prompt"));
        assert_eq!(error.code(), "PIPELINE_FAILED");
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_error_display_transition() {
        let error = OrchestratorError::InvalidTransition {
            from: Stage::Done,
            to: Stage::Error,
        };
        assert_eq!(error.to_string(), "Invalid stage transition: DONE -> ERROR");
    }
}
