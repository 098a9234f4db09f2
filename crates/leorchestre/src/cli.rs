// CLI Interface
//
// Runs a single analysis job end to end against the stub workers and streams
// its progress to stdout.

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use lepipeline::{Orchestrator, OrchestratorError, RunOutcome, Stage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config;
use crate::logging::init_logging;
use crate::stub::StubPlan;

/// LeOrchestre - Staged Analysis Pipeline Runner
#[derive(Parser, Debug)]
#[command(name = "leorchestre")]
#[command(author = "LeOrchestre Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run the scout/analyst/strategy/presenter pipeline with stub workers", long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one analysis job and stream its progress
    Run {
        /// Company, product or market to analyse
        #[arg(long = "target", short = 't')]
        target: String,

        /// Analysis depth (quick, standard, deep)
        #[arg(long = "analysis-type", default_value = "standard")]
        analysis_type: String,

        /// Path to a TOML config file
        #[arg(long = "config", short = 'c')]
        config: Option<PathBuf>,

        /// Make this stage fail permanently
        #[arg(long = "fail-at", value_name = "STAGE", value_parser = parse_worker_stage)]
        fail_at: Option<Stage>,

        /// Make a stage fail transiently N times before succeeding (repeatable)
        #[arg(long = "flaky", value_name = "STAGE:N")]
        flaky: Vec<FlakyStage>,

        /// Simulated latency of every stage in milliseconds
        #[arg(long = "latency-ms", default_value = "0")]
        latency_ms: u64,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Path to a TOML config file
        #[arg(long = "config", short = 'c')]
        config: Option<PathBuf>,
    },
}

/// `STAGE:N` argument of `--flaky`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlakyStage {
    /// Stage to disturb
    pub stage: Stage,
    /// Transient failures before it succeeds
    pub failures: u32,
}

impl FromStr for FlakyStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stage, failures) = s
            .split_once(':')
            .ok_or_else(|| format!("expected STAGE:N, got '{}'", s))?;
        let stage = parse_worker_stage(stage)?;
        let failures = failures
            .trim()
            .parse()
            .map_err(|e| format!("invalid failure count '{}': {}", failures, e))?;
        Ok(Self { stage, failures })
    }
}

/// Parse a stage that has a worker behind it (SCOUT through PRESENTER)
fn parse_worker_stage(s: &str) -> Result<Stage, String> {
    let stage: Stage = s.parse()?;
    if !Stage::PIPELINE.contains(&stage) {
        return Err(format!("{} is not a worker stage", stage));
    }
    Ok(stage)
}

impl Cli {
    /// Run the CLI
    pub async fn run(self) -> AnyhowResult<ExitCode> {
        match self.command {
            Commands::Run {
                target,
                analysis_type,
                config,
                fail_at,
                flaky,
                latency_ms,
            } => {
                let plan = StubPlan {
                    latency: Duration::from_millis(latency_ms),
                    fail_at,
                    flaky: flaky.iter().map(|f| (f.stage, f.failures)).collect::<HashMap<_, _>>(),
                };
                cmd_run_impl(target, analysis_type, config, plan, self.verbose).await
            }
            Commands::Config { config } => cmd_config_impl(config, self.verbose),
        }
    }
}

/// Run command implementation
async fn cmd_run_impl(
    target: String,
    analysis_type: String,
    config_path: Option<PathBuf>,
    plan: StubPlan,
    verbose: bool,
) -> AnyhowResult<ExitCode> {
    let config = config::load(config_path.as_deref())?;
    init_logging(verbose, &config.log_level);

    let orchestrator = Orchestrator::new(config, plan.workers())
        .context("Failed to initialize orchestrator")?;

    let job_id = orchestrator.create(target.as_str(), analysis_type.as_str())?;
    info!(%job_id, %target, %analysis_type, "job created");
    println!("Job {} ({}, {})", job_id, target, analysis_type);

    let mut progress = orchestrator.subscribe(&job_id)?;
    let run = orchestrator.spawn_run(job_id.clone());

    while let Some(event) = progress.next().await {
        println!("[{:>3}%] {:<9} {}", event.progress, event.stage, event.message);
    }

    let outcome = run.await.context("Pipeline task panicked")??;
    if outcome == RunOutcome::Evicted {
        eprintln!("Job {} was evicted before it finished", job_id);
        orchestrator.shutdown().await;
        return Ok(ExitCode::FAILURE);
    }

    let status = orchestrator.get_status(&job_id)?;
    println!();
    println!("{}", serde_json::to_string_pretty(&status)?);

    let exit = match orchestrator.get_results(&job_id) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            ExitCode::SUCCESS
        }
        Err(OrchestratorError::PipelineFailed { stage, message, .. }) => {
            eprintln!("Pipeline failed at {}: {}", stage, message);
            ExitCode::FAILURE
        }
        Err(e) => return Err(e.into()),
    };

    orchestrator.shutdown().await;
    Ok(exit)
}

/// Config command implementation
fn cmd_config_impl(config_path: Option<PathBuf>, verbose: bool) -> AnyhowResult<ExitCode> {
    let config = config::load(config_path.as_deref())?;
    init_logging(verbose, &config.log_level);

    print!("{}", config::to_toml(&config)?);
    Ok(ExitCode::SUCCESS)
}
