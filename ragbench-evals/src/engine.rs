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

//! Evaluation engine
//!
//! Drives record construction across every (backend, question) pair and
//! dispatches each built record to every applicable scorer. Failures are
//! captured as data:
//!
//! - a record that cannot be built yields a [`RecordFailure`] and no cells
//! - every scorer invocation on a built record yields exactly one cell,
//!   holding either a value or the error
//! - a scorer not yet invoked when the run is cancelled yields no cell and is
//!   listed in [`RunOutcome::unscored`]
//!
//! Only a run in which not a single cell succeeded is reported as an error
//! ([`EngineError::PipelineExhausted`]).
//!
//! Retrieval, generation and scoring calls share one [`CallGate`], so the
//! configured concurrency limit bounds all external calls together.

use crate::backend::Backend;
use crate::dataset::{Question, QuestionSet};
use crate::record::{EvaluationRecord, PromptTemplate, RecordBuildError, RecordBuilder};
use crate::registry::{applicable, RegistryError, ScorerRegistry};
use crate::resilience::{CallError, CallGate};
use crate::table::{CellKey, ResultTable, ScoreCell};
use crate::{ConfigError, EvalConfig, Scorer, ScoringError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A (backend, question) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairId {
    pub backend_id: String,
    pub question_id: String,
}

/// A record that could not be built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub backend_id: String,
    pub question_id: String,
    pub error: String,

    /// The build was interrupted by cancellation rather than failing
    pub cancelled: bool,
}

/// Everything a run produced
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Backend ids in registration order
    pub backend_ids: Vec<String>,

    /// Metrics evaluated, in registration order
    pub metrics: Vec<String>,

    pub table: ResultTable,
    pub records_built: usize,
    pub record_failures: Vec<RecordFailure>,

    /// Pairs never started because the run was cancelled
    pub skipped: Vec<PairId>,

    /// Cells of built records whose scorer was never invoked because the run was cancelled
    pub unscored: Vec<CellKey>,

    pub cancelled: bool,
}

impl RunOutcome {
    pub fn succeeded_cells(&self) -> usize {
        self.table.succeeded()
    }

    pub fn failed_cells(&self) -> usize {
        self.table.failed()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Duplicate backend id: {0}")]
    DuplicateBackend(String),

    #[error("No scorers selected")]
    NoScorers,

    #[error(
        "Pipeline exhausted: no cell succeeded ({} failed cells, {} failed records)",
        .outcome.failed_cells(),
        .outcome.record_failures.len()
    )]
    PipelineExhausted { outcome: Box<RunOutcome> },
}

/// Shared state of one run
struct RunContext<'a> {
    builder: RecordBuilder,
    gate: CallGate,
    scorers: &'a [Arc<dyn Scorer>],
    table: &'a ResultTable,
}

enum PairOutcome {
    /// Built and scored; carries the cells left unscored by cancellation
    Built(Vec<CellKey>),
    Failed(RecordFailure),
    Skipped(PairId),
}

/// Runs evaluations with a fixed configuration
pub struct EvaluationEngine {
    config: EvalConfig,
    template: PromptTemplate,
    cancel: CancellationToken,
}

impl EvaluationEngine {
    pub fn new(config: EvalConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            template: PromptTemplate::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Use `template` for every generation prompt
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Token that cancels every current and future run of this engine
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Evaluate every question against every backend with the registry's scorers
    pub async fn run(
        &self,
        questions: &QuestionSet,
        backends: &[Backend],
        registry: &ScorerRegistry,
    ) -> Result<RunOutcome, EngineError> {
        let mut seen = HashSet::new();
        for backend in backends {
            if !seen.insert(backend.id()) {
                return Err(EngineError::DuplicateBackend(backend.id().to_string()));
            }
        }

        let scorers = registry.select(&self.config.metrics)?;
        if scorers.is_empty() {
            return Err(EngineError::NoScorers);
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("evaluation_run", run_id = %run_id);

        self.run_inner(run_id, questions, backends, &scorers)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        questions: &QuestionSet,
        backends: &[Backend],
        scorers: &[Arc<dyn Scorer>],
    ) -> Result<RunOutcome, EngineError> {
        let started_at = Utc::now();
        let metrics: Vec<String> = scorers.iter().map(|s| s.name().to_string()).collect();
        info!(
            "Starting evaluation: {} backends x {} questions, metrics [{}]",
            backends.len(),
            questions.len(),
            metrics.join(", ")
        );

        let token = self.cancel.child_token();
        let deadline = self.config.run_timeout().map(|limit| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("Run timeout of {:?} reached, cancelling", limit);
                token.cancel();
            })
        });

        let gate = CallGate::new(
            self.config.concurrency_limit,
            self.config.call_timeout(),
            token.clone(),
        );
        let table = ResultTable::new();
        let ctx = RunContext {
            builder: RecordBuilder::new(&self.config, gate.clone())
                .with_template(self.template.clone()),
            gate,
            scorers,
            table: &table,
        };

        let pairs: Vec<(&Backend, &Question)> = backends
            .iter()
            .flat_map(|b| questions.iter().map(move |q| (b, q)))
            .collect();

        let ctx = &ctx;
        let mut outcomes: Vec<(usize, PairOutcome)> = stream::iter(pairs.into_iter().enumerate())
            .map(move |(idx, (backend, question))| async move {
                (idx, evaluate_pair(ctx, backend, question).await)
            })
            .buffer_unordered(self.config.concurrency_limit)
            .collect()
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        outcomes.sort_by_key(|(idx, _)| *idx);
        let mut records_built = 0;
        let mut record_failures = Vec::new();
        let mut skipped = Vec::new();
        let mut unscored = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                PairOutcome::Built(keys) => {
                    records_built += 1;
                    unscored.extend(keys);
                }
                PairOutcome::Failed(failure) => record_failures.push(failure),
                PairOutcome::Skipped(pair) => skipped.push(pair),
            }
        }

        let cancelled = token.is_cancelled();
        let outcome = RunOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            backend_ids: backends.iter().map(|b| b.id().to_string()).collect(),
            metrics,
            table,
            records_built,
            record_failures,
            skipped,
            unscored,
            cancelled,
        };

        info!(
            "Evaluation finished: {} records built, {} failed, {} skipped; \
             {} cells ok, {} cells failed, {} unscored{}",
            outcome.records_built,
            outcome.record_failures.len(),
            outcome.skipped.len(),
            outcome.succeeded_cells(),
            outcome.failed_cells(),
            outcome.unscored.len(),
            if cancelled { " (cancelled)" } else { "" }
        );

        if outcome.succeeded_cells() == 0 && !cancelled {
            error!("No cell succeeded; check backend and judge configuration");
            return Err(EngineError::PipelineExhausted {
                outcome: Box::new(outcome),
            });
        }

        Ok(outcome)
    }
}

async fn evaluate_pair(
    ctx: &RunContext<'_>,
    backend: &Backend,
    question: &Question,
) -> PairOutcome {
    if ctx.gate.is_cancelled() {
        return PairOutcome::Skipped(PairId {
            backend_id: backend.id().to_string(),
            question_id: question.id.clone(),
        });
    }

    let span = info_span!("pair", backend = backend.id(), question = %question.id);
    async move {
        let record = match ctx.builder.build(question, backend).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Record build failed: {}", e);
                return PairOutcome::Failed(RecordFailure {
                    backend_id: backend.id().to_string(),
                    question_id: question.id.clone(),
                    error: e.to_string(),
                    cancelled: matches!(e, RecordBuildError::Cancelled),
                });
            }
        };

        let cells = join_all(
            applicable(ctx.scorers, &record)
                .map(|scorer| score_cell(&ctx.gate, scorer.as_ref(), &record)),
        )
        .await;

        let mut unscored = Vec::new();
        for cell in cells {
            match cell {
                Ok(cell) => {
                    if let Err(e) = ctx.table.insert(cell) {
                        // Keys are unique per pair and metric, so this indicates a registry bug
                        error!("Dropping cell: {}", e);
                    }
                }
                Err(key) => unscored.push(key),
            }
        }
        if !unscored.is_empty() {
            debug!("{} scorers not invoked after cancellation", unscored.len());
        }
        PairOutcome::Built(unscored)
    }
    .instrument(span)
    .await
}

/// Invoke one scorer and turn whatever happens into a cell.
///
/// Returns the key instead when cancellation stopped the scorer from being invoked.
async fn score_cell(
    gate: &CallGate,
    scorer: &dyn Scorer,
    record: &EvaluationRecord,
) -> Result<ScoreCell, CellKey> {
    let key = CellKey::new(&record.backend_id, &record.question_id, scorer.name());

    let result = gate
        .call_once(|| AssertUnwindSafe(scorer.score(record)).catch_unwind())
        .await;

    let outcome = match result {
        Ok(Ok(value)) => {
            let bounds = scorer.bounds();
            if bounds.contains(value) {
                Ok(value)
            } else {
                Err(ScoringError::OutOfBounds {
                    value,
                    lo: bounds.lo,
                    hi: bounds.hi,
                })
            }
        }
        Ok(Err(e)) => Err(e),
        Err(CallError::Failed(panic)) => Err(ScoringError::Panicked(panic_message(panic))),
        Err(CallError::Timeout(limit)) => Err(ScoringError::Timeout(limit)),
        Err(CallError::Cancelled) => Err(ScoringError::Cancelled),
        Err(CallError::NotStarted) => return Err(key),
    };

    Ok(match outcome {
        Ok(value) => {
            debug!("{} = {:.4}", key.metric, value);
            ScoreCell::value(key, value)
        }
        Err(e) => {
            debug!("{} failed: {}", key.metric, e);
            ScoreCell::error(key, e.to_string())
        }
    })
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
