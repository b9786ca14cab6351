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

//! Answer relevancy: how well the answer addresses the question
//!
//! The judge reverse-engineers questions from the answer; the score is the
//! mean cosine similarity between the original question and those questions.
//! Noncommittal answers ("I don't know") score 0.

use super::{ask_judge, cosine_similarity, string_list, verdict};
use crate::llm_client::{EmbeddingClient, LLMClient};
use crate::record::{fill_placeholders, EvaluationRecord};
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct AnswerRelevancy {
    judge: Arc<dyn LLMClient>,
    embedder: Arc<dyn EmbeddingClient>,
    num_questions: usize,
}

impl AnswerRelevancy {
    pub const NAME: &'static str = "answer_relevancy";
    pub const SIGNATURE: Signature = Signature::new().question().answer();
    pub const BOUNDS: MetricBounds = MetricBounds::COSINE;
    pub const DESCRIPTION: &'static str =
        "Mean cosine similarity between the question and questions generated from the answer";

    const QUESTION_GEN_PROMPT: &'static str = r#"Generate {n} different questions that the following answer could be responding to.
Also decide whether the answer is noncommittal: evasive, vague or a refusal such as "I don't know".

ANSWER:
{answer}

Respond in JSON:
{"questions": ["Question 1?", ...], "noncommittal": 0 | 1}
"#;

    pub fn new(judge: Arc<dyn LLMClient>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            judge,
            embedder,
            num_questions: 3,
        }
    }

    pub fn with_num_questions(mut self, n: usize) -> Self {
        self.num_questions = n.max(1);
        self
    }
}

#[async_trait]
impl Scorer for AnswerRelevancy {
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
        if record.answer.trim().is_empty() {
            return Ok(0.0);
        }

        let n = self.num_questions.to_string();
        let prompt = fill_placeholders(
            Self::QUESTION_GEN_PROMPT,
            &[("n", n.as_str()), ("answer", record.answer.as_str())],
        );
        let json = ask_judge(self.judge.as_ref(), prompt).await?;

        if verdict(&json["noncommittal"])? {
            return Ok(0.0);
        }

        let generated: Vec<String> = string_list(&json, "questions")?
            .into_iter()
            .filter(|q| !q.is_empty())
            .collect();
        if generated.is_empty() {
            return Err(ScoringError::Undefined(
                "judge generated no questions".to_string(),
            ));
        }

        let original = self.embedder.embed(&record.question).await?;
        let embeddings = self.embedder.embed_batch(&generated).await?;

        let mut total = 0.0;
        for embedding in &embeddings {
            total += cosine_similarity(&original, embedding)?;
        }
        Ok(total / embeddings.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::{record, MockEmbedder, MockLLMClient};

    fn embedder() -> Arc<MockEmbedder> {
        Arc::new(MockEmbedder::new(
            vec![
                ("What is the capital of France?", vec![1.0, 0.0]),
                ("Which city is France's capital?", vec![1.0, 0.0]),
                ("Where is Paris?", vec![0.0, 1.0]),
            ],
            vec![0.0, 1.0],
        ))
    }

    #[tokio::test]
    async fn test_answer_relevancy_mean_similarity() {
        let judge = Arc::new(MockLLMClient::new(vec![(
            "Generate 2 different questions",
            r#"{"questions": ["Which city is France's capital?", "Where is Paris?"], "noncommittal": 0}"#,
        )]));
        let scorer = AnswerRelevancy::new(judge, embedder()).with_num_questions(2);

        let score = scorer.score(&record("Paris", &[], None)).await.unwrap();
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_noncommittal_answer_scores_zero() {
        let judge = Arc::new(MockLLMClient::new(vec![(
            "Generate",
            r#"{"questions": ["What is the capital of France?"], "noncommittal": 1}"#,
        )]));
        let scorer = AnswerRelevancy::new(judge, embedder());

        let score = scorer.score(&record("I don't know", &[], None)).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn test_missing_noncommittal_flag_is_parse_error() {
        let judge = Arc::new(MockLLMClient::new(vec![(
            "Generate",
            r#"{"questions": ["Where is Paris?"]}"#,
        )]));
        let scorer = AnswerRelevancy::new(judge, embedder());

        let result = scorer.score(&record("Paris", &[], None)).await;
        assert!(matches!(result, Err(ScoringError::Parse(_))));
    }
}
