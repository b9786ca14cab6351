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

//! Evaluation record construction
//!
//! A record is built exactly once per (question, backend) pair: retrieve the
//! top-K contexts, render them into the generation prompt, generate an answer.

use crate::backend::Backend;
use crate::dataset::Question;
use crate::ports::{GenerationError, RetrievalError, RetrievedChunk};
use crate::resilience::{CallError, CallGate, Exhausted, RetryPolicy};
use crate::{EvalConfig, Field, ScoringError, Signature};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// The unit of scoring work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub question_id: String,
    pub backend_id: String,
    pub question: String,
    pub answer: String,

    /// Retrieved context texts in retrieval order
    pub contexts: Vec<String>,

    /// Source locators aligned with `contexts`
    pub sources: Vec<Option<String>>,

    pub ground_truth: Option<String>,
}

impl EvaluationRecord {
    /// Identifier of the record, `backend_id/question_id`
    pub fn record_id(&self) -> String {
        format!("{}/{}", self.backend_id, self.question_id)
    }

    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::Question | Field::Answer => true,
            Field::Contexts => !self.contexts.is_empty(),
            Field::GroundTruth => self.ground_truth.is_some(),
        }
    }

    /// Whether every field in the signature is present
    pub fn satisfies(&self, signature: &Signature) -> bool {
        signature.fields().into_iter().all(|f| self.has(f))
    }

    /// Ground truth, or the error a scorer should report without it
    pub fn require_ground_truth(&self) -> Result<&str, ScoringError> {
        self.ground_truth
            .as_deref()
            .ok_or(ScoringError::MissingField(Field::GroundTruth))
    }

    pub fn require_contexts(&self) -> Result<&[String], ScoringError> {
        if self.contexts.is_empty() {
            Err(ScoringError::MissingField(Field::Contexts))
        } else {
            Ok(&self.contexts)
        }
    }
}

/// Generation prompt template with `{context}` and `{question}` placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Render with contexts numbered in retrieval order
    pub fn render(&self, question: &str, contexts: &[String]) -> String {
        let context = contexts
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}] {}", i + 1, c.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");

        fill_placeholders(&self.0, &[("context", context.as_str()), ("question", question)])
    }
}

/// Replace `{name}` placeholders in one pass.
///
/// Substituted text is never rescanned, and braces that do not name a known
/// placeholder are kept as written.
pub(crate) fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let found = tail[1..].find('}').and_then(|close| {
            let name = &tail[1..=close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match found {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(
            "Answer the question using only the information in the context below. \
             If the context does not contain the answer, say that you don't know.\n\n\
             Context:\n{context}\n\n\
             Question: {question}\n\n\
             Answer:",
        )
    }
}

/// Terminal failure to build one record. Never aborts the run.
#[derive(Debug, Error)]
pub enum RecordBuildError {
    #[error("Retrieval failed after {attempts} attempt(s): {source}")]
    Retrieval {
        attempts: u32,
        #[source]
        source: RetrievalError,
    },

    #[error("Generation failed after {attempts} attempt(s): {source}")]
    Generation {
        attempts: u32,
        #[source]
        source: GenerationError,
    },

    #[error("Record build cancelled")]
    Cancelled,
}

impl RecordBuildError {
    fn retrieval(exhausted: Exhausted<RetrievalError>) -> Self {
        let source = match exhausted.error {
            CallError::Failed(e) => e,
            CallError::Timeout(d) => RetrievalError::Timeout(d),
            CallError::NotStarted | CallError::Cancelled => return RecordBuildError::Cancelled,
        };
        RecordBuildError::Retrieval {
            attempts: exhausted.attempts,
            source,
        }
    }

    fn generation(exhausted: Exhausted<GenerationError>) -> Self {
        let source = match exhausted.error {
            CallError::Failed(e) => e,
            CallError::Timeout(d) => GenerationError::Timeout(d),
            CallError::NotStarted | CallError::Cancelled => return RecordBuildError::Cancelled,
        };
        RecordBuildError::Generation {
            attempts: exhausted.attempts,
            source,
        }
    }
}

/// Builds evaluation records through a backend's ports
pub struct RecordBuilder {
    top_k: usize,
    retry: RetryPolicy,
    template: PromptTemplate,
    gate: CallGate,
}

impl RecordBuilder {
    pub fn new(config: &EvalConfig, gate: CallGate) -> Self {
        Self {
            top_k: config.top_k,
            retry: config.retry_policy(),
            template: PromptTemplate::default(),
            gate,
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub async fn build(
        &self,
        question: &Question,
        backend: &Backend,
    ) -> Result<EvaluationRecord, RecordBuildError> {
        let retriever = backend.retriever();
        let query = question.text.as_str();
        let top_k = self.top_k;

        let mut chunks: Vec<RetrievedChunk> = self
            .gate
            .call_with_retry(&self.retry, move || async move {
                let chunks = retriever.retrieve(query, top_k).await?;
                if chunks.is_empty() {
                    Err(RetrievalError::Empty)
                } else {
                    Ok(chunks)
                }
            })
            .await
            .map_err(RecordBuildError::retrieval)?;
        chunks.truncate(top_k);

        let (contexts, sources): (Vec<String>, Vec<Option<String>>) =
            chunks.into_iter().map(|c| (c.text, c.source)).unzip();
        debug!("Retrieved {} contexts", contexts.len());

        let prompt = self.template.render(query, &contexts);
        let generator = backend.generator();
        let prompt_ref = prompt.as_str();

        let answer = self
            .gate
            .call_with_retry(&self.retry, move || generator.generate(prompt_ref))
            .await
            .map_err(RecordBuildError::generation)?;

        Ok(EvaluationRecord {
            question_id: question.id.clone(),
            backend_id: backend.id().to_string(),
            question: question.text.clone(),
            answer: answer.trim().to_string(),
            contexts,
            sources,
            ground_truth: question
                .ground_truth
                .as_ref()
                .map(|gt| gt.as_str().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{Generator, Retriever};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct StaticRetriever {
        chunks: Vec<RetrievedChunk>,
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(RetrievalError::Unavailable("warming up".to_string()));
            }
            Ok(self.chunks.clone())
        }
    }

    #[derive(Default)]
    struct EchoGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().push(prompt.to_string());
            Ok("  Paris  ".to_string())
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct RefusingGenerator;

    #[async_trait]
    impl Generator for RefusingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Err(GenerationError::ContentPolicy("no".to_string()))
        }

        fn model_name(&self) -> &str {
            "refuser"
        }
    }

    fn retriever(n: usize, fail_first: u32) -> Arc<StaticRetriever> {
        Arc::new(StaticRetriever {
            chunks: (0..n)
                .map(|i| RetrievedChunk::new(format!("chunk {}", i), 1.0).with_source(format!("doc{}", i)))
                .collect(),
            calls: AtomicU32::new(0),
            fail_first,
        })
    }

    fn builder(top_k: usize) -> RecordBuilder {
        let config = EvalConfig {
            top_k,
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        };
        let gate = CallGate::new(4, Duration::from_secs(5), CancellationToken::new());
        RecordBuilder::new(&config, gate)
    }

    #[test]
    fn test_prompt_template_render() {
        let prompt = PromptTemplate::new("{context}|{question}")
            .render("Why?", &["a".to_string(), "b".to_string()]);
        assert_eq!(prompt, "[1] a\n\n[2] b|Why?");
    }

    #[test]
    fn test_render_does_not_expand_placeholders_in_inserted_text() {
        let prompt = PromptTemplate::new("{context}|{question}")
            .render("What does {context} mean?", &["use {question} here".to_string()]);
        assert_eq!(prompt, "[1] use {question} here|What does {context} mean?");
    }

    #[test]
    fn test_fill_placeholders_keeps_unknown_braces() {
        let filled = fill_placeholders(
            r#"{"claims": []} for {answer}{"#,
            &[("answer", "{answer}")],
        );
        assert_eq!(filled, r#"{"claims": []} for {answer}{"#);
    }

    #[tokio::test]
    async fn test_build_truncates_to_top_k() {
        let generator = Arc::new(EchoGenerator::default());
        let backend = Backend::new("b1", retriever(5, 0), generator.clone());
        let question = Question::new("q1", "What is the capital of France?").with_ground_truth("Paris");

        let record = builder(2).build(&question, &backend).await.unwrap();

        assert_eq!(record.contexts, vec!["chunk 0", "chunk 1"]);
        assert_eq!(record.sources[1].as_deref(), Some("doc1"));
        assert_eq!(record.answer, "Paris");
        assert_eq!(record.ground_truth.as_deref(), Some("Paris"));
        assert_eq!(record.record_id(), "b1/q1");

        let prompts = generator.prompts.lock();
        assert!(prompts[0].contains("[2] chunk 1"));
        assert!(!prompts[0].contains("chunk 2"));
        assert!(prompts[0].contains("What is the capital of France?"));
    }

    #[tokio::test]
    async fn test_build_retries_retrieval() {
        let r = retriever(1, 2);
        let backend = Backend::new("b1", r.clone(), Arc::new(EchoGenerator::default()));

        let record = builder(5).build(&Question::new("q1", "Q?"), &backend).await;

        assert!(record.is_ok());
        assert_eq!(r.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_retrieval_is_retrieval_error() {
        let r = retriever(0, 0);
        let backend = Backend::new("b1", r.clone(), Arc::new(EchoGenerator::default()));

        let err = builder(5)
            .build(&Question::new("q1", "Q?"), &backend)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RecordBuildError::Retrieval {
                attempts: 3,
                source: RetrievalError::Empty
            }
        ));
    }

    #[tokio::test]
    async fn test_content_policy_not_retried() {
        let backend = Backend::new("b1", retriever(1, 0), Arc::new(RefusingGenerator));

        let err = builder(5)
            .build(&Question::new("q1", "Q?"), &backend)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RecordBuildError::Generation {
                attempts: 1,
                source: GenerationError::ContentPolicy(_)
            }
        ));
    }

    #[test]
    fn test_record_field_presence() {
        let record = EvaluationRecord {
            question_id: "q1".to_string(),
            backend_id: "b1".to_string(),
            question: "Q?".to_string(),
            answer: String::new(),
            contexts: vec!["c".to_string()],
            sources: vec![None],
            ground_truth: None,
        };

        assert!(record.satisfies(&Signature::new().question().answer().contexts()));
        assert!(!record.satisfies(&Signature::new().answer().ground_truth()));
        assert!(matches!(
            record.require_ground_truth(),
            Err(ScoringError::MissingField(Field::GroundTruth))
        ));
    }
}
