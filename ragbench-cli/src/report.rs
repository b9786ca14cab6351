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

//! Run reports: terminal output and the JSON artifact

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ragbench_evals::cache::CacheStats;
use ragbench_evals::engine::PairId;
use ragbench_evals::{
    Aggregator, CellKey, EvalConfig, PairwiseComparison, RecordFailure, RunOutcome, Summary,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub judge: Option<CacheStats>,
    pub embedding: Option<CacheStats>,
}

/// Everything written to `--output`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub config: EvalConfig,
    pub records_built: usize,
    pub succeeded_cells: usize,
    pub failed_cells: usize,
    pub record_failures: Vec<RecordFailure>,
    pub skipped: Vec<PairId>,

    /// Scorers never invoked because the run was cancelled
    #[serde(default)]
    pub unscored: Vec<CellKey>,

    pub summary: Summary,

    /// First registered backend against each other backend, per metric
    pub comparisons: Vec<PairwiseComparison>,

    pub cache: Option<CacheReport>,
}

impl RunReport {
    pub fn new(outcome: &RunOutcome, config: &EvalConfig, cache: Option<CacheReport>) -> Self {
        let summary =
            Aggregator::summarize_metrics(&outcome.table, &outcome.backend_ids, &outcome.metrics);
        let comparisons = baseline_comparisons(outcome, &summary);

        Self {
            run_id: outcome.run_id,
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            cancelled: outcome.cancelled,
            config: config.clone(),
            records_built: outcome.records_built,
            succeeded_cells: outcome.succeeded_cells(),
            failed_cells: outcome.failed_cells(),
            record_failures: outcome.record_failures.clone(),
            skipped: outcome.skipped.clone(),
            unscored: outcome.unscored.clone(),
            summary,
            comparisons,
            cache,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))
    }

    pub fn print(&self) {
        let elapsed = self.finished_at - self.started_at;
        println!(
            "Run {} ({:.1}s){}",
            self.run_id,
            elapsed.num_milliseconds() as f64 / 1000.0,
            if self.cancelled { " [cancelled]" } else { "" }
        );
        println!(
            "{} records built, {} failed, {} skipped; {} cells ok, {} cells failed, {} unscored",
            self.records_built,
            self.record_failures.len(),
            self.skipped.len(),
            self.succeeded_cells,
            self.failed_cells,
            self.unscored.len()
        );
        println!();
        print!("{}", self.summary);

        if !self.comparisons.is_empty() {
            println!();
            for cmp in &self.comparisons {
                println!(
                    "{}: {} vs {}: {:+.3} (p = {:.3}, d = {:.2}, {}){}",
                    cmp.metric,
                    cmp.treatment,
                    cmp.baseline,
                    cmp.difference,
                    cmp.p_value,
                    cmp.cohens_d,
                    cmp.effect_size.as_str(),
                    if cmp.is_significant { " *" } else { "" }
                );
            }
        }

        if !self.record_failures.is_empty() {
            println!();
            println!("Failed records:");
            for failure in &self.record_failures {
                println!(
                    "  {}/{}: {}",
                    failure.backend_id, failure.question_id, failure.error
                );
            }
        }

        if let Some(cache) = &self.cache {
            for (name, stats) in [("judge", &cache.judge), ("embedding", &cache.embedding)] {
                if let Some(stats) = stats {
                    println!(
                        "{} cache: {} hits, {} misses ({:.0}% hit rate)",
                        name,
                        stats.hits,
                        stats.misses,
                        stats.hit_rate * 100.0
                    );
                }
            }
        }
    }
}

fn baseline_comparisons(outcome: &RunOutcome, summary: &Summary) -> Vec<PairwiseComparison> {
    let Some((baseline, others)) = summary.backends.split_first() else {
        return Vec::new();
    };
    summary
        .metrics
        .iter()
        .flat_map(|metric| {
            others.iter().filter_map(move |other| {
                Aggregator::compare(&outcome.table, metric, baseline, other)
            })
        })
        .collect()
}
