//! Job record, stage state machine and the read-side views derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Opaque job identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Pipeline stage.
///
/// Declaration order is the order a job moves through on the success path;
/// `Error` sorts last so it always compares as "newer" than any running stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    /// Created, not yet picked up by a runner
    Pending,
    /// Remote web/news collection
    Scout,
    /// Local structuring of the scout output
    Analyst,
    /// Remote strategy generation
    Strategy,
    /// Local report rendering
    Presenter,
    /// All stages succeeded
    Done,
    /// A stage failed; terminal
    Error,
}

impl Stage {
    /// The four worker stages, in execution order
    pub const PIPELINE: [Stage; 4] = [Stage::Scout, Stage::Analyst, Stage::Strategy, Stage::Presenter];

    /// Upper-case wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Scout => "SCOUT",
            Self::Analyst => "ANALYST",
            Self::Strategy => "STRATEGY",
            Self::Presenter => "PRESENTER",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// `DONE` and `ERROR` never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Progress reported on entering this stage
    pub fn entry_progress(&self) -> u8 {
        match self {
            Self::Pending | Self::Scout | Self::Error => 0,
            Self::Analyst => 25,
            Self::Strategy => 50,
            Self::Presenter => 75,
            Self::Done => 100,
        }
    }

    /// Next stage on the success path
    pub fn successor(&self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Self::Scout),
            Self::Scout => Some(Self::Analyst),
            Self::Analyst => Some(Self::Strategy),
            Self::Strategy => Some(Self::Presenter),
            Self::Presenter => Some(Self::Done),
            Self::Done | Self::Error => None,
        }
    }

    /// Human-readable status line for this stage
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Job queued, waiting to start",
            Self::Scout => "Scout agent collecting web and news data",
            Self::Analyst => "Analyst structuring data and building the knowledge graph",
            Self::Strategy => "Strategy agent generating SWOT and go-to-market recommendations",
            Self::Presenter => "Presenter producing report and pitch deck",
            Self::Done => "Analysis complete, results ready",
            Self::Error => "Pipeline failed",
        }
    }

    /// Coarse status derived from the stage
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::Pending => RunStatus::Pending,
            Self::Done => RunStatus::Done,
            Self::Error => RunStatus::Error,
            Self::Scout | Self::Analyst | Self::Strategy | Self::Presenter => RunStatus::Running,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SCOUT" => Ok(Self::Scout),
            "ANALYST" => Ok(Self::Analyst),
            "STRATEGY" => Ok(Self::Strategy),
            "PRESENTER" => Ok(Self::Presenter),
            "DONE" => Ok(Self::Done),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// Coarse job status for polling clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Waiting for a runner
    Pending,
    /// A worker stage is executing
    Running,
    /// Finished successfully
    Done,
    /// Finished with a failure
    Error,
}

/// Outputs accumulated while a job moves through the worker stages.
///
/// Passed to each worker as part of its input and, once every stage has
/// reported, stored on the record as the job's result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    /// Scout output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scout: Option<Value>,

    /// Analyst output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyst: Option<Value>,

    /// Strategy output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Value>,

    /// Presenter output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presenter: Option<Value>,
}

/// Aggregate result of a completed job
pub type PipelineResult = StageOutputs;

impl StageOutputs {
    /// Output recorded for a worker stage
    pub fn get(&self, stage: Stage) -> Option<&Value> {
        match stage {
            Stage::Scout => self.scout.as_ref(),
            Stage::Analyst => self.analyst.as_ref(),
            Stage::Strategy => self.strategy.as_ref(),
            Stage::Presenter => self.presenter.as_ref(),
            _ => None,
        }
    }

    /// Record a worker stage output; non-worker stages are ignored
    pub fn insert(&mut self, stage: Stage, output: Value) {
        let slot = match stage {
            Stage::Scout => &mut self.scout,
            Stage::Analyst => &mut self.analyst,
            Stage::Strategy => &mut self.strategy,
            Stage::Presenter => &mut self.presenter,
            _ => return,
        };
        *slot = Some(output);
    }

    /// Output of the most recent stage that has reported
    pub fn latest(&self) -> Option<&Value> {
        Stage::PIPELINE.iter().rev().find_map(|stage| self.get(*stage))
    }

    /// True once every worker stage has reported
    pub fn is_complete(&self) -> bool {
        Stage::PIPELINE.iter().all(|stage| self.get(*stage).is_some())
    }
}

/// Failure details recorded on a job in `ERROR`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Stage that failed
    pub stage: Stage,
    /// Failure description
    pub message: String,
    /// Worker attempts consumed before giving up
    pub attempts: u32,
}

/// Out-of-band callback notice attached to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Payload as received
    pub payload: Value,
    /// Arrival time
    pub received_at: DateTime<Utc>,
}

/// Progress event emitted on every stage change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    /// Job the event belongs to
    pub job_id: JobId,
    /// Stage after the change
    pub stage: Stage,
    /// Progress after the change
    pub progress: u8,
    /// Status line after the change
    pub message: String,
    /// Time of the change
    pub timestamp: DateTime<Utc>,
}

/// Mutable state of a single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Identifier
    pub id: JobId,
    /// Company, product or market under analysis
    pub target: String,
    /// Requested analysis depth
    pub analysis_type: String,
    /// Current stage
    pub stage: Stage,
    /// Progress 0-100
    pub progress: u8,
    /// Latest status line
    pub message: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Set when a runner picks the job up
    pub started_at: Option<DateTime<Utc>>,
    /// Set on `DONE`
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on `ERROR`
    pub failed_at_stage: Option<Stage>,
    /// Present only in `ERROR`
    pub error: Option<JobFailure>,
    /// Present only in `DONE`
    pub result: Option<PipelineResult>,
    /// Bounded callback log, oldest first
    pub webhook_events: VecDeque<WebhookEvent>,
}

impl JobRecord {
    /// New record in `PENDING`
    pub fn new(
        id: JobId,
        target: impl Into<String>,
        analysis_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            target: target.into(),
            analysis_type: analysis_type.into(),
            stage: Stage::Pending,
            progress: 0,
            message: Stage::Pending.label().to_string(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at_stage: None,
            error: None,
            result: None,
            webhook_events: VecDeque::new(),
        }
    }

    /// Record the moment a runner took the job; only the first call sticks
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Move to the next worker stage.
    ///
    /// Only the direct successor of the current stage is accepted, so a job can
    /// neither skip nor revisit a stage.
    pub fn enter_stage(&mut self, stage: Stage, now: DateTime<Utc>) -> Result<StageTransition> {
        if !Stage::PIPELINE.contains(&stage) || self.stage.successor() != Some(stage) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.stage,
                to: stage,
            });
        }

        self.mark_started(now);
        self.stage = stage;
        self.progress = self.progress.max(stage.entry_progress());
        self.message = stage.label().to_string();
        Ok(self.transition())
    }

    /// Finish successfully after the presenter stage
    pub fn complete(&mut self, result: PipelineResult, now: DateTime<Utc>) -> Result<StageTransition> {
        if self.stage != Stage::Presenter {
            return Err(OrchestratorError::InvalidTransition {
                from: self.stage,
                to: Stage::Done,
            });
        }

        self.stage = Stage::Done;
        self.progress = 100;
        self.message = Stage::Done.label().to_string();
        self.result = Some(result);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self.transition())
    }

    /// Move to `ERROR`; progress keeps the value of the failing stage
    pub fn fail(&mut self, failure: JobFailure, now: DateTime<Utc>) -> Result<StageTransition> {
        if self.stage.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                from: self.stage,
                to: Stage::Error,
            });
        }

        self.message = format!("{} failed: {}", failure.stage, failure.message);
        self.stage = Stage::Error;
        self.failed_at_stage = Some(failure.stage);
        self.error = Some(failure);
        self.updated_at = now;
        Ok(self.transition())
    }

    /// Append a callback notice, dropping the oldest ones beyond `cap`
    pub fn push_webhook_event(&mut self, event: WebhookEvent, cap: usize) {
        self.webhook_events.push_back(event);
        while self.webhook_events.len() > cap {
            self.webhook_events.pop_front();
        }
    }

    /// Current state expressed as a progress event
    pub fn transition(&self) -> StageTransition {
        StageTransition {
            job_id: self.id.clone(),
            stage: self.stage,
            progress: self.progress,
            message: self.message.clone(),
            timestamp: self.updated_at,
        }
    }

    /// Polling view of the record
    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id.clone(),
            target: self.target.clone(),
            analysis_type: self.analysis_type.clone(),
            stage: self.stage,
            status: self.stage.run_status(),
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            failed_at_stage: self.failed_at_stage,
            error: self.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

/// Status payload served to polling readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Identifier
    pub job_id: JobId,
    /// Analysis target
    pub target: String,
    /// Requested analysis depth
    pub analysis_type: String,
    /// Current stage
    pub stage: Stage,
    /// Coarse status
    pub status: RunStatus,
    /// Progress 0-100
    pub progress: u8,
    /// Latest status line
    pub message: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Failing stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_stage: Option<Stage>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
