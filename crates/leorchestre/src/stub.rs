//! Deterministic stand-in stage workers.
//!
//! Each stub answers with a small JSON document derived from the request and
//! the previous stage's output, so a full pipeline can run without any remote
//! agent. Latency, transient failures and a permanent failure can be injected
//! per stage.

use async_trait::async_trait;
use lepipeline::{Stage, StageError, StageInput, StageOutcome, StageWorker, StageWorkers};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Failure and latency injection for the stub workers
#[derive(Debug, Clone, Default)]
pub struct StubPlan {
    /// Delay before every stub answers
    pub latency: Duration,
    /// Stage that always fails permanently
    pub fail_at: Option<Stage>,
    /// Transient failures returned by a stage before it starts succeeding
    pub flaky: HashMap<Stage, u32>,
}

impl StubPlan {
    /// Build the stub for one stage
    pub fn worker(&self, stage: Stage) -> Arc<StubWorker> {
        Arc::new(StubWorker {
            stage,
            latency: self.latency,
            transient_failures: self.flaky.get(&stage).copied().unwrap_or(0),
            permanent: self.fail_at == Some(stage),
            calls: AtomicU32::new(0),
        })
    }

    /// Build all four stubs
    pub fn workers(&self) -> StageWorkers {
        StageWorkers::new(
            self.worker(Stage::Scout),
            self.worker(Stage::Analyst),
            self.worker(Stage::Strategy),
            self.worker(Stage::Presenter),
        )
    }
}

/// Stub worker for a single stage
#[derive(Debug)]
pub struct StubWorker {
    stage: Stage,
    latency: Duration,
    transient_failures: u32,
    permanent: bool,
    calls: AtomicU32,
}

impl StubWorker {
    /// Calls received so far, across all jobs
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageWorker for StubWorker {
    async fn invoke(&self, input: StageInput) -> StageOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(job_id = %input.job_id, stage = %self.stage, call, "stub invoked");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.permanent {
            return Err(StageError::permanent(format!(
                "{} stub rejected target '{}'",
                self.stage, input.target
            )));
        }
        if call <= self.transient_failures {
            return Err(StageError::transient(format!(
                "simulated connection reset (call {})",
                call
            )));
        }

        Ok(payload(self.stage, &input))
    }
}

fn competitor_count(analysis_type: &str) -> usize {
    match analysis_type {
        "quick" => 2,
        "deep" => 5,
        _ => 3,
    }
}

fn payload(stage: Stage, input: &StageInput) -> Value {
    let target = input.target.as_str();
    match stage {
        Stage::Scout => {
            let competitors: Vec<Value> = (1..=competitor_count(&input.analysis_type))
                .map(|rank| {
                    json!({
                        "name": format!("{} competitor #{}", target, rank),
                        "market_position": if rank == 1 { "leader" } else { "challenger" },
                        "confidence": if rank <= 2 { "high" } else { "medium" },
                    })
                })
                .collect();
            json!({
                "target": target,
                "analysis_type": input.analysis_type,
                "competitors": competitors,
                "trends": [
                    { "title": "Agentic workflows", "impact": "high" },
                    { "title": "Price compression", "impact": "medium" },
                ],
            })
        }
        Stage::Analyst => {
            let competitors = input
                .previous()
                .and_then(|scout| scout["competitors"].as_array())
                .map_or(0, Vec::len);
            json!({
                "target": target,
                "competitor_count": competitors,
                "knowledge_graph": { "nodes": competitors + 1, "edges": competitors },
                "summary": format!("{} operates against {} tracked competitors", target, competitors),
            })
        }
        Stage::Strategy => json!({
            "target": target,
            "swot": {
                "strengths": [format!("{} ships faster than incumbents", target)],
                "weaknesses": ["Depends on third-party models"],
                "opportunities": ["Enterprise demand for automated research"],
                "threats": ["Incumbents adding similar features"],
            },
            "positioning": format!("{} as the autonomous research platform", target),
        }),
        Stage::Presenter => {
            let sections = ["Market overview", "Competitors", "SWOT", "Go-to-market"];
            json!({
                "target": target,
                "report_title": format!("{}: competitive landscape", target),
                "sections": sections,
                "slides": sections.len() + 2,
            })
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lepipeline::{JobId, StageOutputs};

    fn input(stage: Stage, outputs: StageOutputs) -> StageInput {
        StageInput {
            job_id: JobId::new(),
            target: "Acme".to_string(),
            analysis_type: "deep".to_string(),
            stage,
            outputs,
        }
    }

    #[tokio::test]
    async fn test_analyst_reads_scout_output() {
        let plan = StubPlan::default();
        let scout = plan.worker(Stage::Scout).invoke(input(Stage::Scout, StageOutputs::default())).await.unwrap();
        assert_eq!(scout["competitors"].as_array().unwrap().len(), 5);

        let mut outputs = StageOutputs::default();
        outputs.insert(Stage::Scout, scout);
        let analyst = plan.worker(Stage::Analyst).invoke(input(Stage::Analyst, outputs)).await.unwrap();
        assert_eq!(analyst["competitor_count"], 5);
        assert_eq!(analyst["knowledge_graph"]["nodes"], 6);
    }

    #[tokio::test]
    async fn test_flaky_stub_recovers() {
        let plan = StubPlan {
            flaky: HashMap::from([(Stage::Strategy, 2)]),
            ..Default::default()
        };
        let worker = plan.worker(Stage::Strategy);
        for _ in 0..2 {
            let err = worker.invoke(input(Stage::Strategy, StageOutputs::default())).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(worker.invoke(input(Stage::Strategy, StageOutputs::default())).await.is_ok());
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_stub_is_permanent() {
        let plan = StubPlan {
            fail_at: Some(Stage::Presenter),
            ..Default::default()
        };
        let err = plan
            .worker(Stage::Presenter)
            .invoke(input(Stage::Presenter, StageOutputs::default()))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.message().contains("Acme"));
        assert!(plan
            .worker(Stage::Scout)
            .invoke(input(Stage::Scout, StageOutputs::default()))
            .await
            .is_ok());
    }
}
