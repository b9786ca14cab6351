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

//! Context recall: how much of the reference answer the contexts cover

use super::{ask_judge, verdict};
use crate::llm_client::LLMClient;
use crate::record::{fill_placeholders, EvaluationRecord};
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ContextRecall {
    judge: Arc<dyn LLMClient>,
}

impl ContextRecall {
    pub const NAME: &'static str = "context_recall";
    pub const SIGNATURE: Signature = Signature::new().contexts().ground_truth();
    pub const BOUNDS: MetricBounds = MetricBounds::UNIT;
    pub const DESCRIPTION: &'static str =
        "Reference-answer statements attributable to the retrieved contexts";

    const ATTRIBUTION_PROMPT: &'static str = r#"Evaluate if all necessary context was retrieved to support the reference answer.

CONTEXT:
{context}

REFERENCE ANSWER:
{ground_truth}

Break the reference answer into individual statements. For each statement decide whether it
can be attributed to the context (1) or not (0).

Respond in JSON:
{"statements": [{"statement": "<statement>", "attributed": 1 | 0}, ...]}
"#;

    pub fn new(judge: Arc<dyn LLMClient>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl Scorer for ContextRecall {
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

        let context = contexts.join("\n\n");
        let prompt = fill_placeholders(
            Self::ATTRIBUTION_PROMPT,
            &[("context", context.as_str()), ("ground_truth", ground_truth)],
        );
        let json = ask_judge(self.judge.as_ref(), prompt).await?;

        let statements = json["statements"]
            .as_array()
            .ok_or_else(|| ScoringError::Parse("missing `statements` array".to_string()))?;
        if statements.is_empty() {
            return Err(ScoringError::Undefined(
                "reference answer has no statements".to_string(),
            ));
        }

        let mut attributed = 0usize;
        for statement in statements {
            if verdict(&statement["attributed"])? {
                attributed += 1;
            }
        }

        Ok(attributed as f64 / statements.len() as f64)
    }
}
