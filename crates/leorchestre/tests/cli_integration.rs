// Integration Tests for LeOrchestre
//
// - CLI argument parsing
// - Config file loading
// - Full pipeline runs against the stub workers

use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

// ============================================================================
// CLI PARSING TESTS
// ============================================================================

mod cli_parsing_tests {
    use super::*;
    use clap::Parser;
    use lepipeline::Stage;
    use leorchestre::cli::{Cli, Commands, FlakyStage};
    use rstest::rstest;

    #[test]
    fn test_cli_run_command_parsing() {
        let cli = Cli::parse_from([
            "leorchestre",
            "run",
            "--target",
            "Acme Corp",
            "--analysis-type",
            "deep",
            "--config",
            "/etc/leorchestre.toml",
            "--fail-at",
            "strategy",
            "--flaky",
            "scout:2",
            "--flaky",
            "PRESENTER:1",
            "--latency-ms",
            "250",
            "--verbose",
        ]);

        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                target,
                analysis_type,
                config,
                fail_at,
                flaky,
                latency_ms,
            } => {
                assert_eq!(target, "Acme Corp");
                assert_eq!(analysis_type, "deep");
                assert_eq!(config, Some(PathBuf::from("/etc/leorchestre.toml")));
                assert_eq!(fail_at, Some(Stage::Strategy));
                assert_eq!(
                    flaky,
                    vec![
                        FlakyStage {
                            stage: Stage::Scout,
                            failures: 2
                        },
                        FlakyStage {
                            stage: Stage::Presenter,
                            failures: 1
                        },
                    ]
                );
                assert_eq!(latency_ms, 250);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::parse_from(["leorchestre", "run", "-t", "Globex"]);
        match cli.command {
            Commands::Run {
                analysis_type,
                config,
                fail_at,
                flaky,
                latency_ms,
                ..
            } => {
                assert_eq!(analysis_type, "standard");
                assert!(config.is_none());
                assert!(fail_at.is_none());
                assert!(flaky.is_empty());
                assert_eq!(latency_ms, 0);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_config_command_parsing() {
        let cli = Cli::parse_from(["leorchestre", "config", "-c", "custom.toml"]);
        assert!(!cli.verbose);
        match cli.command {
            Commands::Config { config } => {
                assert_eq!(config, Some(PathBuf::from("custom.toml")));
            }
            _ => panic!("Expected Config command"),
        }
    }

    #[rstest]
    #[case::unknown_stage(&["--fail-at", "review"])]
    #[case::fail_at_terminal_stage(&["--fail-at", "done"])]
    #[case::fail_at_pending(&["--fail-at", "pending"])]
    #[case::flaky_without_count(&["--flaky", "scout"])]
    #[case::flaky_terminal_stage(&["--flaky", "done:1"])]
    #[case::flaky_bad_count(&["--flaky", "analyst:-1"])]
    #[case::bad_latency(&["--latency-ms", "soon"])]
    fn test_cli_rejects_bad_run_arguments(#[case] extra: &[&str]) {
        let mut args = vec!["leorchestre", "run", "-t", "Acme"];
        args.extend_from_slice(extra);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_cli_run_requires_target() {
        assert!(Cli::try_parse_from(["leorchestre", "run"]).is_err());
    }
}

// ============================================================================
// CONFIG LOADING TESTS
// ============================================================================

mod config_tests {
    use super::*;
    use leorchestre::config;

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "max_jobs = 50\njob_ttl_secs = 3600\n\n[retry]\nmax_attempts = 2\ndelays_ms = [10, 20]"
        )
        .unwrap();

        let loaded = config::load(Some(file.path())).unwrap();
        assert_eq!(loaded.max_jobs, 50);
        assert_eq!(loaded.job_ttl_secs, 3600);
        assert_eq!(loaded.retry.max_attempts, 2);
        assert_eq!(loaded.retry.delays_ms, vec![10, 20]);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 0").unwrap();

        let err = config::load(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("max_attempts"));
    }
}

// ============================================================================
// STUB PIPELINE TESTS
// ============================================================================

mod stub_pipeline_tests {
    use lepipeline::{
        Orchestrator, OrchestratorConfig, OrchestratorError, RunOutcome, Stage, StageWorker,
    };
    use leorchestre::StubPlan;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stub_pipeline_completes() {
        let plan = StubPlan::default();
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), plan.workers()).unwrap();
        let id = orchestrator.create("Acme Corp", "quick").unwrap();

        assert_eq!(orchestrator.run(&id).await.unwrap(), RunOutcome::Completed);

        let result = orchestrator.get_results(&id).unwrap();
        assert_eq!(result.scout.as_ref().unwrap()["competitors"].as_array().unwrap().len(), 2);
        assert_eq!(result.analyst.as_ref().unwrap()["competitor_count"], 2);
        assert_eq!(
            result.presenter.as_ref().unwrap()["report_title"],
            "Acme Corp: competitive landscape"
        );
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_pipeline_recovers_from_flaky_stage() {
        let plan = StubPlan {
            latency: Duration::from_millis(100),
            flaky: HashMap::from([(Stage::Scout, 2)]),
            ..Default::default()
        };
        let scout = plan.worker(Stage::Scout);
        let others = plan.workers();
        let workers = lepipeline::StageWorkers::new(
            scout.clone() as Arc<dyn StageWorker>,
            others.analyst,
            others.strategy,
            others.presenter,
        );

        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), workers).unwrap();
        let id = orchestrator.create("Acme Corp", "standard").unwrap();
        let progress = orchestrator.subscribe(&id).unwrap();
        let run = orchestrator.spawn_run(id.clone());

        let events = progress.collect().await;
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Completed);
        assert_eq!(scout.calls(), 3);
        assert_eq!(events.last().map(|e| e.stage), Some(Stage::Done));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_stub_pipeline_forced_failure() {
        let plan = StubPlan {
            fail_at: Some(Stage::Analyst),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), plan.workers()).unwrap();
        let id = orchestrator.create("Acme Corp", "standard").unwrap();

        assert_eq!(
            orchestrator.run(&id).await.unwrap(),
            RunOutcome::Failed {
                stage: Stage::Analyst
            }
        );
        match orchestrator.get_results(&id).unwrap_err() {
            OrchestratorError::PipelineFailed { stage, .. } => assert_eq!(stage, Stage::Analyst),
            other => panic!("unexpected error: {:?}", other),
        }
        orchestrator.shutdown().await;
    }
}
