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

//! Retrieval port adapters
//!
//! - [`HttpRetriever`]: a remote retrieval service speaking a small JSON protocol
//! - [`VectorIndexRetriever`]: an in-memory cosine index over a chunked corpus,
//!   embedded with the backend's own embedding client. Two backends built from
//!   the same corpus with different embedders differ only in their embeddings.

use crate::llm_client::{EmbedError, EmbeddingClient};
use crate::ports::{RetrievalError, RetrievedChunk, Retriever};
use crate::scorers::cosine_similarity;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    results: Vec<RetrievedChunk>,
}

/// Retriever backed by an HTTP service.
///
/// Request: `POST {endpoint}` with `{"query": "...", "top_k": 5}`.
/// Response: `{"results": [{"text": "...", "source": "...", "score": 0.9}]}`.
pub struct HttpRetriever {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRetriever {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&RetrieveRequest { query, top_k });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Client errors other than throttling will not go away on retry
            return Err(
                if status.is_server_error()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
                {
                    RetrievalError::Unavailable(format!("{}: {}", status, body))
                } else {
                    RetrievalError::Malformed(format!("{}: {}", status, body))
                },
            );
        }

        let parsed: RetrieveResponse = serde_json::from_str(&body)
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        debug!("Retrieved {} chunks from {}", parsed.results.len(), self.endpoint);
        Ok(parsed.results)
    }
}

/// A chunk of the corpus to index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Failed to read passages: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid passage on line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Failed to embed corpus: {0}")]
    Embed(#[from] EmbedError),
}

/// Load passages from a JSONL file of `{"id": "...", "text": "..."}`
pub fn load_passages(path: impl AsRef<Path>) -> Result<Vec<Passage>, IndexError> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| IndexError::Json {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

struct IndexedPassage {
    passage: Passage,
    vector: Vec<f64>,
}

/// In-memory exact nearest-neighbour retriever
pub struct VectorIndexRetriever {
    embedder: Arc<dyn EmbeddingClient>,
    entries: Vec<IndexedPassage>,
}

impl VectorIndexRetriever {
    const BATCH_SIZE: usize = 64;

    /// Embed every passage with `embedder` and build the index
    pub async fn build(
        embedder: Arc<dyn EmbeddingClient>,
        passages: Vec<Passage>,
    ) -> Result<Self, IndexError> {
        let mut entries = Vec::with_capacity(passages.len());
        for batch in passages.chunks(Self::BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::Embed(EmbedError::ApiError(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                ))));
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(passage, vector)| IndexedPassage { passage, vector }),
            );
        }

        info!("Indexed {} passages", entries.len());
        Ok(Self { embedder, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Retriever for VectorIndexRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.vector.len() != query_vector.len())
        {
            return Err(RetrievalError::DimensionMismatch {
                index: entry.vector.len(),
                query: query_vector.len(),
            });
        }

        // Passages with a zero vector cannot be ranked
        let mut scored: Vec<(&IndexedPassage, f64)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                cosine_similarity(&query_vector, &entry.vector)
                    .ok()
                    .map(|score| (entry, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(entry, score)| {
                RetrievedChunk::new(entry.passage.text.clone(), score)
                    .with_source(entry.passage.id.clone())
            })
            .collect())
    }
}
