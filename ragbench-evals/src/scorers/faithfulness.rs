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

//! Faithfulness: share of the answer's claims supported by the retrieved contexts
//!
//! Decompose-then-verify with two judge calls: claim extraction from the
//! answer, then one NLI verdict per claim against the joined contexts.

use super::{ask_judge, numbered, string_list};
use crate::llm_client::LLMClient;
use crate::record::{fill_placeholders, EvaluationRecord};
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// NLI verdict for a single claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NLIVerdict {
    Entailed,
    Contradicted,
    Neutral,
}

pub struct Faithfulness {
    judge: Arc<dyn LLMClient>,
}

impl Faithfulness {
    pub const NAME: &'static str = "faithfulness";
    pub const SIGNATURE: Signature = Signature::new().question().answer().contexts();
    pub const BOUNDS: MetricBounds = MetricBounds::UNIT;
    pub const DESCRIPTION: &'static str = "Supported claims / claims extracted from the answer";

    const CLAIM_EXTRACTION_PROMPT: &'static str = r#"Extract all atomic factual claims from the following answer.

QUESTION:
{question}

ANSWER:
{answer}

Rules:
- Extract ONLY factual claims (not opinions, hedged statements, or questions)
- Each claim should be self-contained and independently verifiable
- Decompose compound claims into atomic parts

Respond in JSON:
{"claims": ["<factual statement>", ...]}

If there are no factual claims, respond with: {"claims": []}
"#;

    const NLI_VERIFICATION_PROMPT: &'static str = r#"Verify each claim against the provided context.

CONTEXT:
{context}

CLAIMS TO VERIFY:
{claims}

For each claim, in order, determine:
- "entailed": the claim is SUPPORTED by the context
- "contradicted": the claim CONTRADICTS the context
- "neutral": the claim CANNOT be verified from the context

Respond in JSON:
{"verdicts": ["entailed" | "contradicted" | "neutral", ...]}
"#;

    pub fn new(judge: Arc<dyn LLMClient>) -> Self {
        Self { judge }
    }

    async fn extract_claims(&self, record: &EvaluationRecord) -> Result<Vec<String>, ScoringError> {
        let prompt = fill_placeholders(
            Self::CLAIM_EXTRACTION_PROMPT,
            &[("question", record.question.as_str()), ("answer", record.answer.as_str())],
        );
        let json = ask_judge(self.judge.as_ref(), prompt).await?;

        Ok(string_list(&json, "claims")?
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect())
    }

    async fn verify_claims(
        &self,
        claims: &[String],
        contexts: &[String],
    ) -> Result<Vec<NLIVerdict>, ScoringError> {
        let context = contexts.join("\n\n");
        let listed = numbered(claims);
        let prompt = fill_placeholders(
            Self::NLI_VERIFICATION_PROMPT,
            &[("context", context.as_str()), ("claims", listed.as_str())],
        );
        let json = ask_judge(self.judge.as_ref(), prompt).await?;

        let verdicts: Vec<NLIVerdict> = string_list(&json, "verdicts")?
            .iter()
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "entailed" => Ok(NLIVerdict::Entailed),
                "contradicted" => Ok(NLIVerdict::Contradicted),
                "neutral" => Ok(NLIVerdict::Neutral),
                other => Err(ScoringError::Parse(format!("unknown NLI verdict: {}", other))),
            })
            .collect::<Result<_, _>>()?;

        if verdicts.len() != claims.len() {
            return Err(ScoringError::Parse(format!(
                "expected {} verdicts, got {}",
                claims.len(),
                verdicts.len()
            )));
        }
        Ok(verdicts)
    }
}

#[async_trait]
impl Scorer for Faithfulness {
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
        let contexts = record.require_contexts()?;
        let claims = self.extract_claims(record).await?;

        // No claims is vacuously faithful
        if claims.is_empty() {
            return Ok(1.0);
        }

        let verdicts = self.verify_claims(&claims, contexts).await?;
        let entailed = verdicts
            .iter()
            .filter(|v| **v == NLIVerdict::Entailed)
            .count();

        Ok(entailed as f64 / claims.len() as f64)
    }
}
