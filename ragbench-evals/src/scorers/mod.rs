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

//! Built-in scorers
//!
//! The judge-based scorers follow the RAGAS metric definitions. Every judge
//! or embedding failure, and every judge reply that cannot be parsed, ends the
//! invocation with a [`ScoringError`](crate::ScoringError) rather than a
//! fallback value.

pub mod answer_correctness;
pub mod answer_relevancy;
pub mod answer_similarity;
pub mod context_precision;
pub mod context_recall;
pub mod custom;
pub mod faithfulness;

pub use answer_correctness::AnswerCorrectness;
pub use answer_relevancy::AnswerRelevancy;
pub use answer_similarity::AnswerSimilarity;
pub use context_precision::ContextPrecision;
pub use context_recall::ContextRecall;
pub use custom::FnScorer;
pub use faithfulness::Faithfulness;

use crate::llm_client::LLMClient;
use crate::ScoringError;
use serde_json::Value;

/// Cosine similarity between two embedding vectors, in `[-1, 1]`.
///
/// Negative values are kept; only floating-point overshoot past ±1 is trimmed.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, ScoringError> {
    if a.len() != b.len() {
        return Err(ScoringError::Embedding(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a < 1e-12 || norm_b < 1e-12 {
        return Err(ScoringError::Undefined("zero-length embedding".to_string()));
    }

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Send a prompt to the judge and parse the reply as JSON
pub(crate) async fn ask_judge(
    judge: &dyn LLMClient,
    prompt: String,
) -> Result<Value, ScoringError> {
    let response = judge.evaluate(prompt).await?;
    response
        .as_json()
        .map_err(|e| ScoringError::Parse(format!("{} in {:?}", e, truncate(&response.content))))
}

/// Read `json[key]` as an array of strings
pub(crate) fn string_list(json: &Value, key: &str) -> Result<Vec<String>, ScoringError> {
    let items = json[key]
        .as_array()
        .ok_or_else(|| ScoringError::Parse(format!("missing `{}` array", key)))?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| ScoringError::Parse(format!("non-string entry in `{}`", key)))
        })
        .collect()
}

/// Read a 0/1 verdict, accepting numbers, booleans and "yes"/"no" strings
pub(crate) fn verdict(value: &Value) -> Result<bool, ScoringError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Ok(true),
            Some(v) if v == 0.0 => Ok(false),
            _ => Err(ScoringError::Parse(format!("verdict out of range: {}", n))),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" => Ok(true),
            "0" | "no" | "false" => Ok(false),
            other => Err(ScoringError::Parse(format!("unrecognised verdict: {}", other))),
        },
        other => Err(ScoringError::Parse(format!("unrecognised verdict: {}", other))),
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(MAX).collect();
        cut.push('…');
        cut
    }
}

/// Numbered list rendering shared by the judge prompts
pub(crate) fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_err());
        assert!(matches!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]),
            Err(ScoringError::Undefined(_))
        ));
    }

    #[test]
    fn test_verdict_forms() {
        assert!(verdict(&json!(1)).unwrap());
        assert!(!verdict(&json!("no")).unwrap());
        assert!(verdict(&json!(true)).unwrap());
        assert!(verdict(&json!(0.5)).is_err());
        assert!(verdict(&json!(null)).is_err());
    }

    #[test]
    fn test_string_list_requires_array() {
        let value = json!({"claims": ["a", " b "]});
        assert_eq!(string_list(&value, "claims").unwrap(), vec!["a", "b"]);
        assert!(matches!(
            string_list(&value, "statements"),
            Err(ScoringError::Parse(_))
        ));
    }
}
