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

//! Answer correctness: factual overlap with the reference plus semantic similarity
//!
//! The judge sorts statements into true positives (in both answer and
//! reference), false positives (answer only) and false negatives (reference
//! only). The score is `w_f * F1 + w_s * answer_similarity`, default weights
//! 0.75 / 0.25. Because similarity can be negative, the lower bound is
//! `-w_s`.

use super::answer_similarity::AnswerSimilarity;
use super::{ask_judge, string_list};
use crate::llm_client::{EmbeddingClient, LLMClient};
use crate::record::{fill_placeholders, EvaluationRecord};
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct AnswerCorrectness {
    judge: Arc<dyn LLMClient>,
    similarity: AnswerSimilarity,
    factual_weight: f64,
    semantic_weight: f64,
}

impl AnswerCorrectness {
    pub const NAME: &'static str = "answer_correctness";
    pub const SIGNATURE: Signature = Signature::new().question().answer().ground_truth();
    pub const DEFAULT_BOUNDS: MetricBounds = MetricBounds::new(-0.25, 1.0);
    pub const DESCRIPTION: &'static str =
        "Weighted F1 of answer statements against the reference plus semantic similarity";

    const CLASSIFICATION_PROMPT: &'static str = r#"Compare the answer with the reference answer to the question.

QUESTION:
{question}

ANSWER:
{answer}

REFERENCE ANSWER:
{ground_truth}

Split both texts into atomic statements and classify them:
- "tp": statements in the answer that are supported by the reference answer
- "fp": statements in the answer that are not supported by the reference answer
- "fn": statements in the reference answer that are missing from the answer

Respond in JSON:
{"tp": ["..."], "fp": ["..."], "fn": ["..."]}
"#;

    pub fn new(judge: Arc<dyn LLMClient>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            judge,
            similarity: AnswerSimilarity::new(embedder),
            factual_weight: 0.75,
            semantic_weight: 0.25,
        }
    }

    /// Set the F1 and similarity weights (both non-negative)
    pub fn with_weights(mut self, factual: f64, semantic: f64) -> Self {
        self.factual_weight = factual.max(0.0);
        self.semantic_weight = semantic.max(0.0);
        self
    }

    async fn factual_f1(
        &self,
        record: &EvaluationRecord,
        ground_truth: &str,
    ) -> Result<f64, ScoringError> {
        let prompt = fill_placeholders(
            Self::CLASSIFICATION_PROMPT,
            &[
                ("question", record.question.as_str()),
                ("answer", record.answer.as_str()),
                ("ground_truth", ground_truth),
            ],
        );
        let json = ask_judge(self.judge.as_ref(), prompt).await?;

        let tp = string_list(&json, "tp")?.len() as f64;
        let fp = string_list(&json, "fp")?.len() as f64;
        let fn_ = string_list(&json, "fn")?.len() as f64;

        if tp + fp + fn_ == 0.0 {
            return Err(ScoringError::Undefined(
                "no statements to compare".to_string(),
            ));
        }
        Ok(tp / (tp + 0.5 * (fp + fn_)))
    }
}

#[async_trait]
impl Scorer for AnswerCorrectness {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn signature(&self) -> Signature {
        Self::SIGNATURE
    }

    fn bounds(&self) -> MetricBounds {
        MetricBounds::new(
            -self.semantic_weight,
            self.factual_weight + self.semantic_weight,
        )
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    async fn score(&self, record: &EvaluationRecord) -> Result<f64, ScoringError> {
        let ground_truth = record.require_ground_truth()?;
        let f1 = self.factual_f1(record, ground_truth).await?;

        let similarity = if self.semantic_weight > 0.0 {
            self.similarity.similarity(&record.answer, ground_truth).await?
        } else {
            0.0
        };

        Ok(self.factual_weight * f1 + self.semantic_weight * similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::{record, MockEmbedder, MockLLMClient};

    #[tokio::test]
    async fn test_answer_correctness() {
        let judge = Arc::new(MockLLMClient::new(vec![(
            "Compare the answer with the reference",
            r#"{"tp": ["Paris is the capital"], "fp": ["Paris has 20M people"], "fn": []}"#,
        )]));
        let embedder = Arc::new(MockEmbedder::new(vec![], vec![1.0, 0.0]));
        let scorer = AnswerCorrectness::new(judge, embedder);

        // F1 = 1 / (1 + 0.5) = 2/3, similarity = 1
        let score = scorer
            .score(&record("Paris, 20M people", &[], Some("Paris")))
            .await
            .unwrap();
        assert!((score - (0.75 * 2.0 / 3.0 + 0.25)).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_follow_weights() {
        let judge = Arc::new(MockLLMClient::new(vec![]));
        let embedder = Arc::new(MockEmbedder::new(vec![], vec![1.0]));
        let scorer = AnswerCorrectness::new(judge, embedder);

        assert_eq!(scorer.bounds(), MetricBounds::new(-0.25, 1.0));
    }
}
