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

//! End-to-end tests of the evaluation pipeline through the public API

use async_trait::async_trait;
use ragbench_evals::llm_client::{EmbedError, EmbeddingClient};
use ragbench_evals::retrievers::{Passage, VectorIndexRetriever};
use ragbench_evals::scorers::{AnswerSimilarity, FnScorer};
use ragbench_evals::{
    Aggregator, Backend, CellKey, EvalConfig, EvaluationEngine, GenerationError, Generator,
    MetricStat, Question, QuestionSet, ResultTable, RetrievalError, RetrievedChunk, Retriever,
    Scorer, ScorerRegistry, ScoringError, Signature,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StaticRetriever;

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        query: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        Ok(vec![RetrievedChunk::new(format!("Context for {}", query), 0.8)])
    }
}

struct UnavailableRetriever;

#[async_trait]
impl Retriever for UnavailableRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        Err(RetrievalError::Unavailable("connection refused".to_string()))
    }
}

/// Answers with the first numbered context of the prompt
struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        prompt
            .lines()
            .find_map(|line| line.strip_prefix("[1] "))
            .map(str::to_string)
            .ok_or_else(|| GenerationError::InvalidResponse("no context in prompt".to_string()))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

/// Bag-of-words embedding over a tiny vocabulary, plus a bias dimension
struct VocabularyEmbedder;

const VOCABULARY: [&str; 6] = ["paris", "france", "berlin", "germany", "rome", "italy"];

#[async_trait]
impl EmbeddingClient for VocabularyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mut vector: Vec<f64> = VOCABULARY
            .iter()
            .map(|v| words.iter().filter(|w| *w == v).count() as f64)
            .collect();
        vector.push(1.0);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Maps every text to the same vector, so retrieval order is corpus order
struct FlatEmbedder;

#[async_trait]
impl EmbeddingClient for FlatEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f64>, EmbedError> {
        Ok(vec![1.0; VOCABULARY.len() + 1])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        Ok(vec![vec![1.0; VOCABULARY.len() + 1]; texts.len()])
    }
}

fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn three_questions() -> QuestionSet {
    QuestionSet::new(vec![
        Question::new("q1", "What is the capital of France?")
            .with_ground_truth("Paris is the capital of France."),
        Question::new("q2", "What is the capital of Germany?")
            .with_ground_truth("Berlin is the capital of Germany."),
        Question::new("q3", "What is the capital of Italy?")
            .with_ground_truth("Rome is the capital of Italy."),
    ])
    .unwrap()
}

fn fast_config() -> EvalConfig {
    EvalConfig {
        retry_base_delay_ms: 1,
        ..Default::default()
    }
}

fn constant_and_failing() -> ScorerRegistry {
    let registry = ScorerRegistry::new();
    registry
        .register(Arc::new(FnScorer::new(
            "constant",
            Signature::new().answer(),
            |_| Ok(0.8),
        )))
        .unwrap();
    registry
        .register(Arc::new(FnScorer::new(
            "always_fails",
            Signature::new().answer(),
            |_| Err(ScoringError::Judge("judge returned 500".to_string())),
        )))
        .unwrap();
    registry
}

#[tokio::test]
async fn test_two_backends_three_questions_two_metrics() {
    let backends = vec![
        Backend::new("titan", Arc::new(StaticRetriever), Arc::new(EchoGenerator)),
        Backend::new("cohere", Arc::new(StaticRetriever), Arc::new(EchoGenerator)),
    ];
    let engine = EvaluationEngine::new(fast_config()).unwrap();

    let outcome = engine
        .run(&three_questions(), &backends, &constant_and_failing())
        .await
        .unwrap();

    assert_eq!(outcome.table.len(), 12);
    let values: Vec<f64> = outcome
        .table
        .cells()
        .iter()
        .filter_map(|c| c.outcome.value())
        .collect();
    assert_eq!(values, vec![0.8; 6]);
    assert_eq!(outcome.failed_cells(), 6);

    let summary =
        Aggregator::summarize_metrics(&outcome.table, &outcome.backend_ids, &outcome.metrics);
    for backend in ["titan", "cohere"] {
        let row = summary.row(backend).unwrap();
        assert_eq!(row.metric("constant").unwrap().stat.mean(), Some(0.8));
        let failing = row.metric("always_fails").unwrap();
        assert_eq!(failing.stat, MetricStat::NoData);
        assert_eq!(failing.failures, 3);
    }

    // Equal means rank in registration order
    let ranking = summary.ranking("constant").unwrap();
    let order: Vec<&str> = ranking.ranked.iter().map(|r| r.backend_id.as_str()).collect();
    assert_eq!(order, vec!["titan", "cohere"]);
    assert_eq!(summary.ranking("always_fails").unwrap().unranked, ids(&["titan", "cohere"]));
}

#[tokio::test]
async fn test_unavailable_backend_is_isolated() {
    let backends = vec![
        Backend::new("broken", Arc::new(UnavailableRetriever), Arc::new(EchoGenerator)),
        Backend::new("healthy", Arc::new(StaticRetriever), Arc::new(EchoGenerator)),
    ];
    let engine = EvaluationEngine::new(fast_config()).unwrap();

    let outcome = engine
        .run(&three_questions(), &backends, &constant_and_failing())
        .await
        .unwrap();

    assert!(outcome.table.query(Some("broken"), None, None).is_empty());
    assert_eq!(outcome.table.query(Some("healthy"), None, None).len(), 6);
    assert_eq!(outcome.record_failures.len(), 3);
    assert!(outcome.record_failures[0].error.contains("3 attempt"));

    let summary = Aggregator::summarize(&outcome.table, &outcome.backend_ids);
    let broken = summary.row("broken").unwrap();
    assert!(broken.metric("constant").unwrap().stat.is_no_data());
    assert_eq!(broken.failures(), 0);
}

#[tokio::test]
async fn test_embedding_backends_compared_on_answer_similarity() {
    let corpus: Vec<Passage> = [
        ("doc-paris", "Paris is the capital of France."),
        ("doc-berlin", "Berlin is the capital of Germany."),
        ("doc-rome", "Rome is the capital of Italy."),
    ]
    .iter()
    .map(|(id, text)| Passage {
        id: id.to_string(),
        text: text.to_string(),
    })
    .collect();

    let good = VectorIndexRetriever::build(Arc::new(VocabularyEmbedder), corpus.clone())
        .await
        .unwrap();
    let flat = VectorIndexRetriever::build(Arc::new(FlatEmbedder), corpus)
        .await
        .unwrap();
    // Registered first so a tie would favour it; it must still lose
    let backends = vec![
        Backend::new("flat", Arc::new(flat), Arc::new(EchoGenerator)),
        Backend::new("vocabulary", Arc::new(good), Arc::new(EchoGenerator)),
    ];

    let registry = ScorerRegistry::new();
    let similarity: Arc<dyn Scorer> =
        Arc::new(AnswerSimilarity::new(Arc::new(VocabularyEmbedder)));
    registry.register(similarity).unwrap();

    let engine = EvaluationEngine::new(EvalConfig {
        top_k: 1,
        ..fast_config()
    })
    .unwrap();
    let outcome = engine
        .run(&three_questions(), &backends, &registry)
        .await
        .unwrap();

    let answer = outcome
        .table
        .get(&CellKey::new("vocabulary", "q2", "answer_similarity"))
        .unwrap();
    assert!((answer.outcome.value().unwrap() - 1.0).abs() < 1e-9);

    let summary = Aggregator::summarize(&outcome.table, &outcome.backend_ids);
    let ranking = summary.ranking("answer_similarity").unwrap();
    assert_eq!(ranking.leader().unwrap().backend_id, "vocabulary");
    assert!(ranking.ranked[1].mean < 0.9);

    // The exported table reproduces the same summary
    let mut csv = Vec::new();
    outcome.table.write_csv(&mut csv).unwrap();
    let reloaded = ResultTable::read_csv(csv.as_slice()).unwrap();
    assert_eq!(Aggregator::summarize(&reloaded, &outcome.backend_ids), summary);
}

#[tokio::test]
async fn test_run_timeout_returns_partial_results() {
    let backends = vec![
        Backend::new("fast", Arc::new(StaticRetriever), Arc::new(EchoGenerator)),
        Backend::new("stalled", Arc::new(StaticRetriever), Arc::new(StalledGenerator)),
    ];
    let engine = EvaluationEngine::new(EvalConfig {
        run_timeout_secs: Some(1),
        ..fast_config()
    })
    .unwrap();

    let outcome = engine
        .run(&three_questions(), &backends, &constant_and_failing())
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.table.query(Some("fast"), None, None).len(), 6);
    assert!(outcome.table.query(Some("stalled"), None, None).is_empty());
    assert!(outcome
        .record_failures
        .iter()
        .all(|f| f.backend_id == "stalled" && f.cancelled));
}

#[tokio::test]
async fn test_scorers_not_invoked_after_cancel_leave_no_cells() {
    let backends = vec![Backend::new("only", Arc::new(StaticRetriever), Arc::new(EchoGenerator))];
    let questions = QuestionSet::new(vec![Question::new("q1", "What is Rust?")]).unwrap();
    let engine = EvaluationEngine::new(EvalConfig {
        concurrency_limit: 1,
        ..fast_config()
    })
    .unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let registry = ScorerRegistry::new();
    for name in ["m1", "m2"] {
        let token = engine.cancellation_token();
        let invocations = invocations.clone();
        registry
            .register(Arc::new(FnScorer::new(name, Signature::new().answer(), move |_| {
                invocations.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Ok(0.9)
            })))
            .unwrap();
    }

    let outcome = engine.run(&questions, &backends, &registry).await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.table.len(), 1);
    assert_eq!(outcome.failed_cells(), 0);
    assert_eq!(
        outcome
            .table
            .get(&CellKey::new("only", "q1", "m1"))
            .unwrap()
            .outcome
            .value(),
        Some(0.9)
    );
    assert_eq!(outcome.unscored, vec![CellKey::new("only", "q1", "m2")]);

    let summary =
        Aggregator::summarize_metrics(&outcome.table, &outcome.backend_ids, &outcome.metrics);
    let m2 = summary.row("only").unwrap().metric("m2").unwrap();
    assert!(m2.stat.is_no_data());
    assert_eq!(m2.failures, 0);
}
