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

//! Construction of concrete ports from configuration

use crate::config::{
    BackendConfig, BenchConfig, EmbeddingConfig, ModelConfig, Provider, RetrieverConfig,
};
use anyhow::{Context, Result};
use ragbench_evals::cache::{CachedEmbeddingClient, CachedJudge};
use ragbench_evals::llm_client::{AnthropicClient, EmbeddingClient, LLMClient, OpenAIClient};
use ragbench_evals::retrievers::{load_passages, HttpRetriever, VectorIndexRetriever};
use ragbench_evals::{Backend, Generator, Retriever};
use std::sync::Arc;
use tracing::info;

/// Judge and embedder shared by all scorers, kept for cache statistics
pub struct ScoringClients {
    pub judge: Arc<dyn LLMClient>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub judge_cache: Option<Arc<CachedJudge>>,
    pub embedding_cache: Option<Arc<CachedEmbeddingClient>>,
}

/// API key for a model. A custom base URL may point at a local server that
/// needs none.
fn api_key(configured: &Option<String>, base_url: &Option<String>, var: &str) -> Result<String> {
    match (configured, base_url) {
        (Some(key), _) => Ok(key.clone()),
        (None, Some(_)) => Ok(String::new()),
        (None, None) => anyhow::bail!("No API key configured; set {}", var),
    }
}

fn openai(model: &ModelConfig) -> Result<OpenAIClient> {
    let key = api_key(&model.api_key, &model.base_url, "OPENAI_API_KEY")?;
    let mut client = OpenAIClient::new(key, model.model.clone());
    if let Some(url) = &model.base_url {
        client = client.with_base_url(url.clone());
    }
    Ok(client)
}

fn anthropic(model: &ModelConfig) -> Result<AnthropicClient> {
    let key = api_key(&model.api_key, &model.base_url, "ANTHROPIC_API_KEY")?;
    let mut client = AnthropicClient::new(key, model.model.clone());
    if let Some(url) = &model.base_url {
        client = client.with_base_url(url.clone());
    }
    Ok(client)
}

pub fn build_judge(model: &ModelConfig) -> Result<Arc<dyn LLMClient>> {
    let judge: Arc<dyn LLMClient> = match model.provider {
        Provider::OpenAI => Arc::new(openai(model)?),
        Provider::Anthropic => Arc::new(anthropic(model)?),
    };
    Ok(judge)
}

pub fn build_generator(model: &ModelConfig) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match model.provider {
        Provider::OpenAI => Arc::new(openai(model)?),
        Provider::Anthropic => Arc::new(anthropic(model)?),
    };
    Ok(generator)
}

pub fn build_embedder(embedding: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    let key = api_key(&embedding.api_key, &embedding.base_url, "OPENAI_API_KEY")?;
    // The chat model is unused; only the embeddings endpoint is called
    let mut client = OpenAIClient::new(key, String::new())
        .with_embedding_model(embedding.model.clone());
    if let Some(url) = &embedding.base_url {
        client = client.with_base_url(url.clone());
    }
    Ok(Arc::new(client))
}

pub fn build_scoring_clients(config: &BenchConfig) -> Result<ScoringClients> {
    let judge = build_judge(&config.judge).context("Failed to configure judge")?;
    let embedder = build_embedder(&config.embedding).context("Failed to configure embedder")?;

    if !config.eval.enable_cache {
        return Ok(ScoringClients {
            judge,
            embedder,
            judge_cache: None,
            embedding_cache: None,
        });
    }

    let ttl = config.eval.cache_ttl_secs;
    let judge_cache = Arc::new(CachedJudge::new(judge, ttl));
    let embedding_cache = Arc::new(CachedEmbeddingClient::new(embedder, ttl));
    Ok(ScoringClients {
        judge: judge_cache.clone(),
        embedder: embedding_cache.clone(),
        judge_cache: Some(judge_cache),
        embedding_cache: Some(embedding_cache),
    })
}

async fn build_retriever(config: &RetrieverConfig) -> Result<Arc<dyn Retriever>> {
    let retriever: Arc<dyn Retriever> = match config {
        RetrieverConfig::Http { endpoint, api_key } => {
            let mut retriever = HttpRetriever::new(endpoint.clone());
            if let Some(key) = api_key {
                retriever = retriever.with_api_key(key.clone());
            }
            Arc::new(retriever)
        }
        RetrieverConfig::VectorIndex { corpus, embedding } => {
            let passages = load_passages(corpus)
                .with_context(|| format!("Failed to load corpus {}", corpus.display()))?;
            let embedder = build_embedder(embedding)?;
            let index = VectorIndexRetriever::build(embedder, passages)
                .await
                .context("Failed to build vector index")?;
            Arc::new(index)
        }
    };
    Ok(retriever)
}

pub async fn build_backend(config: &BackendConfig) -> Result<Backend> {
    let retriever = build_retriever(&config.retriever)
        .await
        .with_context(|| format!("Backend {}", config.id))?;
    let generator = build_generator(&config.generator)
        .with_context(|| format!("Backend {}", config.id))?;

    info!("Configured backend {} ({})", config.id, generator.model_name());
    Ok(Backend::new(config.id.clone(), retriever, generator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_resolution() {
        let local = Some("http://localhost:11434/v1".to_string());

        assert_eq!(api_key(&Some("k".into()), &None, "X").unwrap(), "k");
        assert_eq!(api_key(&None, &local, "X").unwrap(), "");

        let err = api_key(&None, &None, "OPENAI_API_KEY").unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_build_http_backend() {
        let backend = build_backend(&BackendConfig {
            id: "titan".to_string(),
            retriever: RetrieverConfig::Http {
                endpoint: "http://localhost:8001/retrieve".to_string(),
                api_key: None,
            },
            generator: ModelConfig {
                provider: Provider::Anthropic,
                model: "claude-3-5-haiku-latest".to_string(),
                base_url: None,
                api_key: Some("sk-ant".to_string()),
            },
        })
        .await
        .unwrap();

        assert_eq!(backend.id(), "titan");
        assert_eq!(backend.generator().model_name(), "claude-3-5-haiku-latest");
    }

    #[tokio::test]
    async fn test_missing_corpus_fails() {
        let result = build_backend(&BackendConfig {
            id: "local".to_string(),
            retriever: RetrieverConfig::VectorIndex {
                corpus: "/nonexistent/corpus.jsonl".into(),
                embedding: EmbeddingConfig::default(),
            },
            generator: ModelConfig {
                api_key: Some("sk".to_string()),
                ..Default::default()
            },
        })
        .await;

        assert!(result.is_err());
    }
}
