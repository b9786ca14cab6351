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

//! Context precision: are the useful chunks ranked first?
//!
//! The judge marks each retrieved chunk as useful (1) or not (0) for arriving
//! at the reference answer. The score is the average precision over the
//! ranked verdicts: `sum_k(precision@k * v_k) / sum_k(v_k)`, and 0 when no
//! chunk is useful.

use super::{ask_judge, verdict};
use crate::llm_client::LLMClient;
use crate::record::{fill_placeholders, EvaluationRecord};
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ContextPrecision {
    judge: Arc<dyn LLMClient>,
}

impl ContextPrecision {
    pub const NAME: &'static str = "context_precision";
    pub const SIGNATURE: Signature = Signature::new().question().contexts().ground_truth();
    pub const BOUNDS: MetricBounds = MetricBounds::UNIT;
    pub const DESCRIPTION: &'static str = "Average precision of useful chunks in retrieval order";

    const USEFULNESS_PROMPT: &'static str = r#"Evaluate the precision of the retrieved context for answering the question.

QUESTION:
{question}

REFERENCE ANSWER:
{ground_truth}

RETRIEVED CHUNKS:
{chunks}

For each chunk, in order, decide whether it was useful in arriving at the reference answer
(1 = useful, 0 = not useful).

Respond in JSON:
{"verdicts": [1, 0, ...]}
"#;

    pub fn new(judge: Arc<dyn LLMClient>) -> Self {
        Self { judge }
    }
}

/// Average precision of a ranked list of relevance verdicts
pub fn average_precision(verdicts: &[bool]) -> f64 {
    let mut hits = 0usize;
    let mut numerator = 0.0;
    for (k, useful) in verdicts.iter().enumerate() {
        if *useful {
            hits += 1;
            numerator += hits as f64 / (k + 1) as f64;
        }
    }
    if hits == 0 {
        0.0
    } else {
        numerator / hits as f64
    }
}

#[async_trait]
impl Scorer for ContextPrecision {
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
        let contexts = record.require_contexts()?;

        let chunks = contexts
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[Chunk {}]: {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = fill_placeholders(
            Self::USEFULNESS_PROMPT,
            &[
                ("question", record.question.as_str()),
                ("ground_truth", ground_truth),
                ("chunks", chunks.as_str()),
            ],
        );
        let json = ask_judge(self.judge.as_ref(), prompt).await?;

        let verdicts = json["verdicts"]
            .as_array()
            .ok_or_else(|| ScoringError::Parse("missing `verdicts` array".to_string()))?
            .iter()
            .map(verdict)
            .collect::<Result<Vec<_>, _>>()?;

        if verdicts.len() != contexts.len() {
            return Err(ScoringError::Parse(format!(
                "expected {} verdicts, got {}",
                contexts.len(),
                verdicts.len()
            )));
        }

        Ok(average_precision(&verdicts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::test_support::{record, MockLLMClient};

    #[test]
    fn test_average_precision() {
        assert_eq!(average_precision(&[true, true]), 1.0);
        assert_eq!(average_precision(&[false, false]), 0.0);
        // (1/2 + 2/3) / 2
        let ap = average_precision(&[false, true, true]);
        assert!((ap - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_context_precision() {
        let judge = Arc::new(MockLLMClient::new(vec![(
            "precision of the retrieved context",
            r#"{"verdicts": [0, 1]}"#,
        )]));
        let scorer = ContextPrecision::new(judge);
        let rec = record("Paris", &["Berlin is in Germany.", "Paris is in France."], Some("Paris"));

        let score = scorer.score(&rec).await.unwrap();
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_context_precision_needs_ground_truth() {
        let judge = Arc::new(MockLLMClient::new(vec![]));
        let scorer = ContextPrecision::new(judge);

        let result = scorer.score(&record("Paris", &["ctx"], None)).await;
        assert!(matches!(result, Err(ScoringError::MissingField(_))));
    }
}
