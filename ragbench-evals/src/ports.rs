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

//! Retrieval and generation ports consumed by the record builder

use crate::resilience::Retryable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A single retrieved chunk, in backend relevance order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,

    /// Where the chunk came from (document URI, passage id, ...)
    #[serde(default)]
    pub source: Option<String>,

    /// Backend-specific relevance score
    #[serde(default)]
    pub score: f64,
}

impl RetrievedChunk {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            source: None,
            score,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Trait for retrieval backends under comparison
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `top_k` chunks for the query, most relevant first
    async fn retrieve(&self, query: &str, top_k: usize)
        -> Result<Vec<RetrievedChunk>, RetrievalError>;
}

/// Trait for answer generators
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Model identifier for logging and reports
    fn model_name(&self) -> &str;
}

/// Errors from a retrieval backend
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed retrieval response: {0}")]
    Malformed(String),

    #[error("Retrieval returned no contexts")]
    Empty,

    #[error("Embedding dimension mismatch: index has {index}, query has {query}")]
    DimensionMismatch { index: usize, query: usize },

    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Retryable for RetrievalError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetrievalError::Malformed(_) | RetrievalError::DimensionMismatch { .. }
        )
    }
}

/// Errors from a generation backend
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation backend unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rejected by content policy: {0}")]
    ContentPolicy(String),

    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::ContentPolicy(_))
    }
}
