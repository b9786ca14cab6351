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

//! # Ragbench Evaluation Framework
//!
//! Compares retrieval-augmented-generation backends that differ only in how
//! they retrieve, by running every backend through the same generation
//! pipeline and scoring the results with a battery of independent scorers.
//!
//! ## Features
//!
//! - **Ports**: [`ports::Retriever`] and [`ports::Generator`] abstract the backend under test
//! - **Trait-based scorers**: each [`Scorer`] declares the record fields it needs
//! - **Cell-level isolation**: a failing scorer or backend never invalidates sibling results
//! - **Bounded concurrency**: one limit shared by retrieval, generation and scoring calls
//! - **Aggregation**: per-backend means, failure counts, rankings and pairwise comparisons
//!
//! ## Example
//!
//! ```rust,ignore
//! use ragbench_evals::{Backend, EvalConfig, EvaluationEngine, QuestionSet, ScorerRegistry};
//! use ragbench_evals::aggregator::Aggregator;
//! use ragbench_evals::presets::MetricPreset;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let questions = QuestionSet::from_path("questions.jsonl")?;
//!     let registry = ScorerRegistry::from_preset(MetricPreset::Ragas, judge, embedder)?;
//!     let backends = vec![
//!         Backend::new("titan", titan_retriever, generator.clone()),
//!         Backend::new("cohere", cohere_retriever, generator),
//!     ];
//!
//!     let engine = EvaluationEngine::new(EvalConfig::default())?;
//!     let outcome = engine.run(&questions, &backends, &registry).await?;
//!     let summary = Aggregator::summarize(&outcome.table, &outcome.backend_ids);
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod aggregator;
pub mod backend;
pub mod cache;
pub mod dataset;
pub mod engine;
pub mod llm_client;
pub mod ports;
pub mod presets;
pub mod record;
pub mod registry;
pub mod resilience;
pub mod retrievers;
pub mod scorers;
pub mod table;

pub use aggregator::{
    Aggregator, EffectSize, MetricRanking, MetricStat, MetricSummary, PairwiseComparison,
    RankedBackend, Summary, SummaryRow,
};
pub use backend::Backend;
pub use dataset::{GroundTruth, Question, QuestionSet};
pub use engine::{EngineError, EvaluationEngine, RecordFailure, RunOutcome};
pub use ports::{GenerationError, Generator, RetrievalError, RetrievedChunk, Retriever};
pub use record::{EvaluationRecord, PromptTemplate, RecordBuildError, RecordBuilder};
pub use registry::{RegistryError, ScorerRegistry};
pub use resilience::{CallGate, RetryPolicy};
pub use table::{CellKey, CellOutcome, FlatRow, ResultTable, ScoreCell};

use llm_client::{EmbedError, LLMError};

/// A field of an evaluation record that a scorer may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Question,
    Answer,
    Contexts,
    GroundTruth,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Question => "question",
            Field::Answer => "answer",
            Field::Contexts => "contexts",
            Field::GroundTruth => "ground_truth",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of record fields a scorer needs to produce a value
///
/// Built with the const builder methods:
///
/// ```rust
/// use ragbench_evals::{Field, Signature};
///
/// let sig = Signature::new().answer().ground_truth();
/// assert!(sig.requires(Field::GroundTruth));
/// assert!(!sig.requires(Field::Contexts));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    pub question: bool,
    pub answer: bool,
    pub contexts: bool,
    pub ground_truth: bool,
}

impl Signature {
    pub const fn new() -> Self {
        Self {
            question: false,
            answer: false,
            contexts: false,
            ground_truth: false,
        }
    }

    pub const fn question(mut self) -> Self {
        self.question = true;
        self
    }

    pub const fn answer(mut self) -> Self {
        self.answer = true;
        self
    }

    pub const fn contexts(mut self) -> Self {
        self.contexts = true;
        self
    }

    pub const fn ground_truth(mut self) -> Self {
        self.ground_truth = true;
        self
    }

    pub fn requires(&self, field: Field) -> bool {
        match field {
            Field::Question => self.question,
            Field::Answer => self.answer,
            Field::Contexts => self.contexts,
            Field::GroundTruth => self.ground_truth,
        }
    }

    /// Required fields in canonical order
    pub fn fields(&self) -> Vec<Field> {
        [
            Field::Question,
            Field::Answer,
            Field::Contexts,
            Field::GroundTruth,
        ]
        .into_iter()
        .filter(|f| self.requires(*f))
        .collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields().iter().map(Field::as_str).collect();
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

/// Declared output range of a metric (inclusive on both ends)
///
/// Scores outside the range are reported as [`ScoringError::OutOfBounds`],
/// never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    pub lo: f64,
    pub hi: f64,
}

impl MetricBounds {
    /// The usual `[0, 1]` higher-is-better range
    pub const UNIT: MetricBounds = MetricBounds { lo: 0.0, hi: 1.0 };

    /// Range of a cosine similarity between arbitrary embedding vectors
    pub const COSINE: MetricBounds = MetricBounds { lo: -1.0, hi: 1.0 };

    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.lo && value <= self.hi
    }
}

impl fmt::Display for MetricBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// Core trait that all scorers must implement
///
/// Scorers receive a shared reference to an immutable record and must not
/// rely on the order in which other scorers run.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Metric name, unique within a registry (e.g., "faithfulness")
    fn name(&self) -> &str;

    /// Record fields this scorer reads
    fn signature(&self) -> Signature;

    /// Output range of the metric
    fn bounds(&self) -> MetricBounds {
        MetricBounds::UNIT
    }

    /// One-line description for listings
    fn description(&self) -> &str {
        ""
    }

    /// Score a single record
    async fn score(&self, record: &EvaluationRecord) -> Result<f64, ScoringError>;
}

/// Errors a scorer invocation can end in. Each becomes an error cell.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Missing required field: {0}")]
    MissingField(Field),

    #[error("Judge call failed: {0}")]
    Judge(String),

    #[error("Embedding call failed: {0}")]
    Embedding(String),

    #[error("Failed to parse judge output: {0}")]
    Parse(String),

    #[error("Metric undefined for this record: {0}")]
    Undefined(String),

    #[error("Score {value} outside declared bounds [{lo}, {hi}]")]
    OutOfBounds { value: f64, lo: f64, hi: f64 },

    #[error("Scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scoring cancelled")]
    Cancelled,

    #[error("Scorer panicked: {0}")]
    Panicked(String),
}

impl From<LLMError> for ScoringError {
    fn from(e: LLMError) -> Self {
        match e {
            LLMError::Json(err) => ScoringError::Parse(err.to_string()),
            LLMError::InvalidResponse(msg) => ScoringError::Parse(msg),
            other => ScoringError::Judge(other.to_string()),
        }
    }
}

impl From<EmbedError> for ScoringError {
    fn from(e: EmbedError) -> Self {
        ScoringError::Embedding(e.to_string())
    }
}

/// Configuration for an evaluation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvalConfig {
    /// Number of retrieved chunks kept per query
    pub top_k: usize,

    /// Maximum simultaneous retrieval, generation and scoring calls
    pub concurrency_limit: usize,

    /// Timeout per external call in seconds
    pub call_timeout_secs: u64,

    /// Retries for retrieval and generation calls (scorers are never retried)
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries
    pub retry_base_delay_ms: u64,

    /// Metrics to compute; empty means every registered scorer
    pub metrics: Vec<String>,

    /// Global deadline after which no new work is issued
    pub run_timeout_secs: Option<u64>,

    /// Whether to cache judge and embedding responses
    pub enable_cache: bool,

    /// Cache TTL in seconds
    pub cache_ttl_secs: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            concurrency_limit: 8,
            call_timeout_secs: 60,
            max_retries: 2,
            retry_base_delay_ms: 250,
            metrics: Vec::new(),
            run_timeout_secs: None,
            enable_cache: true,
            cache_ttl_secs: 3600, // 1 hour
        }
    }
}

impl EvalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".to_string()));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "call_timeout_secs must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            if !seen.insert(metric.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "metric listed twice: {}",
                    metric
                )));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

/// Errors from invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
