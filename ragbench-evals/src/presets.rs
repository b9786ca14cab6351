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

//! Pre-configured metric sets
//!
//! Instead of registering scorers one by one, pick a preset:
//!
//! ```rust,ignore
//! use ragbench_evals::presets::MetricPreset;
//! use ragbench_evals::ScorerRegistry;
//!
//! let registry = ScorerRegistry::from_preset(MetricPreset::Ragas, judge, embedder)?;
//! ```

use crate::llm_client::{EmbeddingClient, LLMClient};
use crate::scorers::{
    AnswerCorrectness, AnswerRelevancy, AnswerSimilarity, ContextPrecision, ContextRecall,
    Faithfulness,
};
use crate::{MetricBounds, Scorer, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Pre-configured metric sets for common comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricPreset {
    /// All six RAGAS metrics
    Ragas,

    /// Retrieval quality only:
    /// - Context precision
    /// - Context recall
    Retrieval,

    /// Generation quality without a reference answer:
    /// - Faithfulness
    /// - Answer relevancy
    Generation,

    /// Agreement with the reference answer:
    /// - Answer similarity
    /// - Answer correctness
    Reference,
}

/// Static description of a built-in metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricInfo {
    pub name: &'static str,
    pub signature: Signature,
    pub bounds: MetricBounds,
    pub description: &'static str,
}

/// Every built-in metric, in the order the `Ragas` preset registers them
pub fn builtin_metrics() -> Vec<MetricInfo> {
    vec![
        MetricInfo {
            name: Faithfulness::NAME,
            signature: Faithfulness::SIGNATURE,
            bounds: Faithfulness::BOUNDS,
            description: Faithfulness::DESCRIPTION,
        },
        MetricInfo {
            name: AnswerRelevancy::NAME,
            signature: AnswerRelevancy::SIGNATURE,
            bounds: AnswerRelevancy::BOUNDS,
            description: AnswerRelevancy::DESCRIPTION,
        },
        MetricInfo {
            name: ContextPrecision::NAME,
            signature: ContextPrecision::SIGNATURE,
            bounds: ContextPrecision::BOUNDS,
            description: ContextPrecision::DESCRIPTION,
        },
        MetricInfo {
            name: ContextRecall::NAME,
            signature: ContextRecall::SIGNATURE,
            bounds: ContextRecall::BOUNDS,
            description: ContextRecall::DESCRIPTION,
        },
        MetricInfo {
            name: AnswerSimilarity::NAME,
            signature: AnswerSimilarity::SIGNATURE,
            bounds: AnswerSimilarity::BOUNDS,
            description: AnswerSimilarity::DESCRIPTION,
        },
        MetricInfo {
            name: AnswerCorrectness::NAME,
            signature: AnswerCorrectness::SIGNATURE,
            bounds: AnswerCorrectness::DEFAULT_BOUNDS,
            description: AnswerCorrectness::DESCRIPTION,
        },
    ]
}

impl MetricPreset {
    /// Create scorers for this preset, in registration order
    pub fn create_scorers(
        &self,
        judge: Arc<dyn LLMClient>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Vec<Arc<dyn Scorer>> {
        match self {
            MetricPreset::Ragas => vec![
                Arc::new(Faithfulness::new(judge.clone())),
                Arc::new(AnswerRelevancy::new(judge.clone(), embedder.clone())),
                Arc::new(ContextPrecision::new(judge.clone())),
                Arc::new(ContextRecall::new(judge.clone())),
                Arc::new(AnswerSimilarity::new(embedder.clone())),
                Arc::new(AnswerCorrectness::new(judge, embedder)),
            ],
            MetricPreset::Retrieval => vec![
                Arc::new(ContextPrecision::new(judge.clone())),
                Arc::new(ContextRecall::new(judge)),
            ],
            MetricPreset::Generation => vec![
                Arc::new(Faithfulness::new(judge.clone())),
                Arc::new(AnswerRelevancy::new(judge, embedder)),
            ],
            MetricPreset::Reference => vec![
                Arc::new(AnswerSimilarity::new(embedder.clone())),
                Arc::new(AnswerCorrectness::new(judge, embedder)),
            ],
        }
    }

    /// Metric names this preset registers
    pub fn metric_names(&self) -> &'static [&'static str] {
        match self {
            MetricPreset::Ragas => &[
                Faithfulness::NAME,
                AnswerRelevancy::NAME,
                ContextPrecision::NAME,
                ContextRecall::NAME,
                AnswerSimilarity::NAME,
                AnswerCorrectness::NAME,
            ],
            MetricPreset::Retrieval => &[ContextPrecision::NAME, ContextRecall::NAME],
            MetricPreset::Generation => &[Faithfulness::NAME, AnswerRelevancy::NAME],
            MetricPreset::Reference => &[AnswerSimilarity::NAME, AnswerCorrectness::NAME],
        }
    }

    /// Get a description of this preset
    pub fn description(&self) -> &'static str {
        match self {
            MetricPreset::Ragas => {
                "All RAGAS metrics: faithfulness, relevancy, context precision/recall, similarity, correctness"
            }
            MetricPreset::Retrieval => "Retrieval quality: context precision and context recall",
            MetricPreset::Generation => {
                "Generation quality without references: faithfulness and answer relevancy"
            }
            MetricPreset::Reference => {
                "Agreement with the reference answer: answer similarity and answer correctness"
            }
        }
    }

    /// Get all available presets
    pub fn all() -> Vec<Self> {
        vec![
            MetricPreset::Ragas,
            MetricPreset::Retrieval,
            MetricPreset::Generation,
            MetricPreset::Reference,
        ]
    }
}

impl fmt::Display for MetricPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricPreset::Ragas => "ragas",
            MetricPreset::Retrieval => "retrieval",
            MetricPreset::Generation => "generation",
            MetricPreset::Reference => "reference",
        };
        f.write_str(name)
    }
}

impl FromStr for MetricPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricPreset::all()
            .into_iter()
            .find(|p| p.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown metric preset: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::{MockEmbedder, MockLLMClient};

    #[test]
    fn test_preset_scorers_match_names() {
        let judge: Arc<dyn LLMClient> = Arc::new(MockLLMClient::new(vec![]));
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(MockEmbedder::new(vec![], vec![1.0]));

        for preset in MetricPreset::all() {
            let names: Vec<String> = preset
                .create_scorers(judge.clone(), embedder.clone())
                .iter()
                .map(|s| s.name().to_string())
                .collect();
            assert_eq!(names, preset.metric_names(), "preset {}", preset);
        }
    }

    #[test]
    fn test_builtin_metrics_cover_ragas() {
        let names: Vec<&str> = builtin_metrics().iter().map(|m| m.name).collect();
        assert_eq!(names, MetricPreset::Ragas.metric_names());
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("RAGAS".parse::<MetricPreset>(), Ok(MetricPreset::Ragas));
        assert!("agent".parse::<MetricPreset>().is_err());
    }
}
