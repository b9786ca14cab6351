// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ragbench CLI
//!
//! Command-line runner that compares RAG backends on a question set.

mod config;
mod report;
mod wiring;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{split_list, BenchConfig, Overrides};
use ragbench_evals::presets::builtin_metrics;
use ragbench_evals::{
    Aggregator, EngineError, EvaluationEngine, PromptTemplate, QuestionSet, ResultTable,
    RunOutcome, ScorerRegistry,
};
use report::{CacheReport, RunReport};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "ragbench")]
#[command(
    about = "Ragbench - compare retrieval backends on a shared question set",
    long_about = None
)]
struct Cli {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every backend over the question set and score the results
    Run {
        /// Benchmark configuration file
        #[arg(short, long, env = "RAGBENCH_CONFIG", default_value = "ragbench.toml")]
        config: PathBuf,

        /// Question file, overriding the configured dataset
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the flat cell table here (CSV, or JSON for a .json path)
        #[arg(long = "csv", value_name = "PATH")]
        cells: Option<PathBuf>,

        /// Chunks retrieved per question
        #[arg(long)]
        top_k: Option<usize>,

        /// Maximum in-flight external calls
        #[arg(long)]
        concurrency: Option<usize>,

        /// Comma-separated metric names (default: every metric of the preset)
        #[arg(long)]
        metrics: Option<String>,

        /// Global deadline in seconds
        #[arg(long)]
        run_timeout: Option<u64>,
    },

    /// Recompute the summary from an exported cell table
    Summarize {
        /// Cell table written by `run --csv`
        #[arg(short, long)]
        input: PathBuf,

        /// Comma-separated backend ids in registration order
        #[arg(long)]
        backends: Option<String>,
    },

    /// List built-in metrics
    Metrics,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ragbench=debug,ragbench_evals=debug"
    } else {
        "ragbench=info,ragbench_evals=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            dataset,
            output,
            cells,
            top_k,
            concurrency,
            metrics,
            run_timeout,
        } => {
            let overrides = Overrides {
                dataset,
                top_k,
                concurrency,
                metrics: metrics.as_deref().map(split_list),
                run_timeout_secs: run_timeout,
            };
            let config = BenchConfig::load(&config, &overrides)?;
            run(&config, output.as_deref(), cells.as_deref(), cli.json).await
        }

        Commands::Summarize { input, backends } => {
            let table = ResultTable::load(&input)
                .with_context(|| format!("Failed to load cell table {}", input.display()))?;
            let order = backends.as_deref().map(split_list).unwrap_or_default();
            let summary = Aggregator::summarize(&table, &order);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
            Ok(())
        }

        Commands::Metrics => {
            let metrics = builtin_metrics();
            if cli.json {
                let listing: Vec<serde_json::Value> = metrics
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "name": m.name,
                            "signature": m.signature.to_string(),
                            "bounds": [m.bounds.lo, m.bounds.hi],
                            "description": m.description,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for m in metrics {
                    println!(
                        "{:<20} [{}, {}]  {:<30} {}",
                        m.name,
                        m.bounds.lo,
                        m.bounds.hi,
                        m.signature.to_string(),
                        m.description
                    );
                }
            }
            Ok(())
        }
    }
}

async fn run(
    config: &BenchConfig,
    output: Option<&Path>,
    cells: Option<&Path>,
    json: bool,
) -> Result<()> {
    let dataset = config
        .dataset
        .as_ref()
        .context("No dataset configured")?;
    let questions = QuestionSet::from_path(dataset)
        .with_context(|| format!("Failed to load dataset {}", dataset.display()))?;
    info!("Loaded {} questions from {}", questions.len(), dataset.display());

    let clients = wiring::build_scoring_clients(config)?;
    let registry = ScorerRegistry::from_preset(
        config.preset,
        clients.judge.clone(),
        clients.embedder.clone(),
    )?;

    let mut backends = Vec::with_capacity(config.backends.len());
    for backend in &config.backends {
        backends.push(wiring::build_backend(backend).await?);
    }

    let mut engine = EvaluationEngine::new(config.eval.clone())?;
    if let Some(template) = &config.prompt_template {
        engine = engine.with_template(PromptTemplate::new(template.clone()));
    }

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run and keeping partial results");
            token.cancel();
        }
    });

    let (outcome, exhausted) = match engine.run(&questions, &backends, &registry).await {
        Ok(outcome) => (outcome, false),
        Err(EngineError::PipelineExhausted { outcome }) => (*outcome, true),
        Err(e) => return Err(e.into()),
    };

    let cache = CacheReport {
        judge: clients.judge_cache.as_ref().map(|c| c.stats()),
        embedding: clients.embedding_cache.as_ref().map(|c| c.stats()),
    };
    let report = RunReport::new(&outcome, &config.eval, Some(cache));
    write_artifacts(&outcome, &report, output, cells)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    if exhausted {
        anyhow::bail!(
            "No cell succeeded ({} failed cells, {} failed records)",
            outcome.failed_cells(),
            outcome.record_failures.len()
        );
    }
    Ok(())
}

fn write_artifacts(
    outcome: &RunOutcome,
    report: &RunReport,
    output: Option<&Path>,
    cells: Option<&Path>,
) -> Result<()> {
    if let Some(path) = output {
        report.write_json(path)?;
        info!("Wrote report to {}", path.display());
    }
    if let Some(path) = cells {
        outcome
            .table
            .save(path)
            .with_context(|| format!("Failed to write cell table {}", path.display()))?;
        info!("Wrote {} cells to {}", outcome.table.len(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "ragbench",
            "--json",
            "run",
            "--config",
            "bench.toml",
            "--metrics",
            "faithfulness,context_recall",
            "--run-timeout",
            "300",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Run {
                config,
                metrics,
                run_timeout,
                ..
            } => {
                assert_eq!(config, PathBuf::from("bench.toml"));
                assert_eq!(metrics.as_deref(), Some("faithfulness,context_recall"));
                assert_eq!(run_timeout, Some(300));
            }
            _ => panic!("expected run"),
        }
    }
}
