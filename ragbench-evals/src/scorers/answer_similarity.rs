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

//! Semantic similarity between the answer and the reference answer
//!
//! Raw cosine similarity of the two embeddings. The value is reported as is,
//! so its range is `[-1, 1]` even though embedding models rarely go below 0.

use super::cosine_similarity;
use crate::llm_client::EmbeddingClient;
use crate::record::EvaluationRecord;
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct AnswerSimilarity {
    embedder: Arc<dyn EmbeddingClient>,
}

impl AnswerSimilarity {
    pub const NAME: &'static str = "answer_similarity";
    pub const SIGNATURE: Signature = Signature::new().answer().ground_truth();
    pub const BOUNDS: MetricBounds = MetricBounds::COSINE;
    pub const DESCRIPTION: &'static str =
        "Cosine similarity of answer and reference embeddings (not clamped)";

    pub fn new(embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { embedder }
    }

    /// Cosine similarity of `answer` and `reference` embeddings
    pub async fn similarity(&self, answer: &str, reference: &str) -> Result<f64, ScoringError> {
        if answer.trim().is_empty() {
            return Err(ScoringError::Undefined("empty answer".to_string()));
        }
        let embeddings = self
            .embedder
            .embed_batch(&[answer.to_string(), reference.to_string()])
            .await?;
        match embeddings.as_slice() {
            [a, b] => cosine_similarity(a, b),
            other => Err(ScoringError::Embedding(format!(
                "expected 2 embeddings, got {}",
                other.len()
            ))),
        }
    }
}

#[async_trait]
impl Scorer for AnswerSimilarity {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn signature(&self) -> Signature {
        Self::SIGNATURE
    }

    fn bounds(&self) -> MetricBounds {
        Self::BOUNDS
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    async fn score(&self, record: &EvaluationRecord) -> Result<f64, ScoringError> {
        let ground_truth = record.require_ground_truth()?;
        self.similarity(&record.answer, ground_truth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::{record, MockEmbedder};

    #[tokio::test]
    async fn test_negative_similarity_is_not_clamped() {
        let embedder = Arc::new(MockEmbedder::new(
            vec![("Berlin", vec![-1.0, 0.0]), ("Paris", vec![1.0, 0.0])],
            vec![0.0, 1.0],
        ));
        let scorer = AnswerSimilarity::new(embedder);

        let score = scorer.score(&record("Berlin", &[], Some("Paris"))).await.unwrap();
        assert!((score + 1.0).abs() < 1e-9);
        assert!(scorer.bounds().contains(score));
    }

    #[tokio::test]
    async fn test_empty_answer_is_undefined() {
        let embedder = Arc::new(MockEmbedder::new(vec![], vec![1.0, 0.0]));
        let scorer = AnswerSimilarity::new(embedder);

        let result = scorer.score(&record("", &[], Some("Paris"))).await;
        assert!(matches!(result, Err(ScoringError::Undefined(_))));
    }
}
