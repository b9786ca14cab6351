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

//! Caching layer for judge and embedding calls
//!
//! The same question and ground-truth texts are embedded once per backend and
//! metric, and a rerun sends identical judge prompts. Both clients are wrapped
//! in a TTL cache so repeated work is served locally. Errors are never cached.

use crate::llm_client::{EmbedError, EmbeddingClient, LLMClient, LLMError, LLMResponse};
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MAX_ENTRIES: u64 = 10_000;

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self, entry_count: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count,
        }
    }
}

/// Embedding client that remembers vectors by input text
pub struct CachedEmbeddingClient {
    inner: Arc<dyn EmbeddingClient>,
    cache: Cache<String, Arc<Vec<f64>>>,
    counters: Counters,
}

impl CachedEmbeddingClient {
    /// Wrap `inner` with a cache whose entries live for `ttl_secs`
    pub fn new(inner: Arc<dyn EmbeddingClient>, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            cache,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.stats(self.cache.entry_count())
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    async fn lookup(&self, text: &str) -> Option<Vec<f64>> {
        match self.cache.get(text).await {
            Some(vector) => {
                self.counters.hit();
                Some(vector.as_ref().clone())
            }
            None => {
                self.counters.miss();
                None
            }
        }
    }
}

#[async_trait]
impl EmbeddingClient for CachedEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        if let Some(vector) = self.lookup(text).await {
            return Ok(vector);
        }

        let vector = self.inner.embed(text).await?;
        self.cache
            .insert(text.to_string(), Arc::new(vector.clone()))
            .await;
        Ok(vector)
    }

    /// Only texts not already cached are sent to the inner client, in one batch
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let mut out: Vec<Option<Vec<f64>>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            let cached = self.lookup(text).await;
            if cached.is_none() {
                missing.push(idx);
            }
            out.push(cached);
        }

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbedError::ApiError(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for (idx, vector) in missing.into_iter().zip(vectors) {
                self.cache
                    .insert(texts[idx].clone(), Arc::new(vector.clone()))
                    .await;
                out[idx] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

/// Judge that remembers responses by model and prompt
pub struct CachedJudge {
    inner: Arc<dyn LLMClient>,
    /// Keyed by (model, prompt)
    cache: Cache<(String, String), LLMResponse>,
    counters: Counters,
}

impl CachedJudge {
    pub fn new(inner: Arc<dyn LLMClient>, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            cache,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.stats(self.cache.entry_count())
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl LLMClient for CachedJudge {
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError> {
        let key = (self.inner.model_name().to_string(), prompt.clone());
        if let Some(response) = self.cache.get(&key).await {
            self.counters.hit();
            return Ok(response);
        }
        self.counters.miss();

        let response = self.inner.evaluate(prompt).await?;
        self.cache.insert(key, response.clone()).await;
        Ok(response)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
