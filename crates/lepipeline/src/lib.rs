//! lepipeline - Staged Analysis Pipeline
//!
//! *Le Pipeline* (The Pipeline) - In-memory job orchestration for a four-stage
//! analysis pipeline (scout, analyst, strategy, presenter) with bounded retries,
//! capacity/TTL eviction and per-job progress fan-out.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Orchestrator configuration
pub mod config;

/// Error types
pub mod error;

/// Job record and stage state machine
pub mod job;

/// Stage worker trait and I/O types
pub mod worker;

/// Bounded retry around stage workers
pub mod retry;

/// Per-job progress broadcasting
pub mod broadcast;

/// Bounded in-memory job store
pub mod store;

/// Sequential stage runner
pub mod runner;

/// Public orchestrator facade
pub mod orchestrator;

mod sync;

pub use broadcast::{ProgressBroadcaster, ProgressStream};
pub use config::{OrchestratorConfig, RetryConfig, StageTimeouts};
pub use error::{OrchestratorError, Result};
pub use job::{
    JobFailure, JobId, JobRecord, JobStatus, PipelineResult, RunStatus, Stage, StageOutputs,
    StageTransition, WebhookEvent,
};
pub use orchestrator::Orchestrator;
pub use retry::{RetryPolicy, RetryingInvoker, StageFailure};
pub use runner::{PipelineRunner, RunOutcome};
pub use store::{JobStore, RunGuard};
pub use worker::{StageError, StageInput, StageOutcome, StageOutput, StageWorker, StageWorkers};
