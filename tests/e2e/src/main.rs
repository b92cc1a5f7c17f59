//! End-to-End Test Runner for Frontier

use anyhow::Result;
use clap::Parser;
use frontier_e2e_tests::{
    framework::{TestConfig, TestFramework},
    scenarios::{
        ClusterRoutingTest, EdgeRoundTripTest, IdFallbackTest, LivenessDecayTest,
        ReconnectDisplacesTest, ReversePublishTest, TopicFanoutTest,
    },
    TestResult,
};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCENARIOS: &[&str] = &[
    "edge_round_trip",
    "reverse_publish",
    "topic_fanout",
    "reconnect",
    "id_fallback",
    "liveness_decay",
    "cluster_routing",
];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Test scenario to run, or `all`
    #[arg(short, long, default_value = "all")]
    scenario: String,

    /// Per-scenario timeout in seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// Output results to file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Leave gateways running after each scenario
    #[arg(long)]
    no_cleanup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("frontier_e2e_tests={}", log_level).parse()?)
                .add_directive(format!("frontier={}", log_level).parse()?)
                .add_directive(format!("frontlas={}", log_level).parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Frontier E2E Test Suite");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let framework = TestFramework::new(TestConfig {
        timeout_secs: args.timeout,
        cleanup: !args.no_cleanup,
        verbose: args.verbose,
    });

    let selected: Vec<&str> = match args.scenario.as_str() {
        "all" => SCENARIOS.to_vec(),
        name if SCENARIOS.contains(&name) => vec![name],
        _ => {
            error!("Unknown test scenario: {} (known: {})", args.scenario, SCENARIOS.join(", "));
            std::process::exit(2);
        }
    };

    let mut results = Vec::with_capacity(selected.len());
    for name in selected {
        results.push(run(&framework, name).await);
    }

    print_results_summary(&results);

    if let Some(output_path) = args.output {
        save_results_to_file(&results, &output_path).await?;
        info!("Results saved to: {}", output_path.display());
    }

    if !results.iter().all(|r| r.success) {
        error!("Some tests failed");
        std::process::exit(1);
    }

    info!("All tests passed");
    Ok(())
}

async fn run(framework: &TestFramework, name: &str) -> TestResult {
    match name {
        "edge_round_trip" => framework.run_scenario(&EdgeRoundTripTest::default()).await,
        "reverse_publish" => framework.run_scenario(&ReversePublishTest::default()).await,
        "topic_fanout" => framework.run_scenario(&TopicFanoutTest::default()).await,
        "reconnect" => framework.run_scenario(&ReconnectDisplacesTest::default()).await,
        "id_fallback" => framework.run_scenario(&IdFallbackTest).await,
        "liveness_decay" => framework.run_scenario(&LivenessDecayTest::default()).await,
        _ => framework.run_scenario(&ClusterRoutingTest::default()).await,
    }
}

fn print_results_summary(results: &[TestResult]) {
    println!("\n═══════════════════════════════════════");
    println!("        TEST RESULTS SUMMARY");
    println!("═══════════════════════════════════════");

    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.success).count();

    println!("Total Tests: {}", total_tests);
    println!("Passed:      {} ✓", passed_tests);
    println!("Failed:      {} ✗", total_tests - passed_tests);
    println!();

    for result in results {
        let status = if result.success { "✓ PASS" } else { "✗ FAIL" };
        println!("{} {} ({} ms)", status, result.scenario_name, result.duration.as_millis());

        if let Some(ref error) = result.error_message {
            println!("      Error: {}", error);
        }
        println!(
            "      Sent: {} | Received: {} | RPCs: {}",
            result.metrics.messages_sent, result.metrics.messages_received, result.metrics.rpcs
        );

        let failed: Vec<_> = result.validation_results.iter().filter(|v| !v.passed).collect();
        if !failed.is_empty() {
            println!("      Validation Failures:");
            for validation in failed {
                println!("        - {}: {}", validation.validator, validation.message);
            }
        }
        println!();
    }

    println!("═══════════════════════════════════════");
}

async fn save_results_to_file(results: &[TestResult], path: &PathBuf) -> Result<()> {
    let json_output = serde_json::json!({
        "test_run": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "total_tests": results.len(),
            "passed_tests": results.iter().filter(|r| r.success).count(),
            "failed_tests": results.iter().filter(|r| !r.success).count(),
        },
        "results": results
    });

    tokio::fs::write(path, serde_json::to_string_pretty(&json_output)?).await?;
    Ok(())
}
