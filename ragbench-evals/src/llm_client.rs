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

//! LLM and embedding clients.
//!
//! The same HTTP clients serve two roles: as the judge behind LLM-as-judge
//! scorers ([`LLMClient`]) and as the answer [`Generator`] shared by every
//! backend under comparison.

use crate::ports::{GenerationError, Generator};
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

const JUDGE_SYSTEM_PROMPT: &str = "You are an expert evaluator. Respond only with valid JSON.";

/// Trait for LLM clients used as judges
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send a prompt and get a response expected to hold JSON
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError>;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Response from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

fn json_fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").ok())
        .as_ref()
}

impl LLMResponse {
    /// Parse response as JSON, tolerating a markdown code fence around it
    pub fn as_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let body = match json_fence().and_then(|fence| fence.captures(&self.content)) {
            Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(&self.content),
            None => self.content.trim(),
        };
        serde_json::from_str(body)
    }

    /// Get a specific field from JSON response
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.as_json().ok()?.get(key).cloned()
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Errors from LLM clients
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from embedding clients
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for embedding clients used by similarity scorers and vector indexes
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text string
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError>;

    /// Embed a batch of texts, one vector per input in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError>;
}

/// Non-success outcome of a provider request, before mapping to a role error
enum ApiFailure {
    Status(StatusCode, String),
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for ApiFailure {
    fn from(e: reqwest::Error) -> Self {
        ApiFailure::Transport(e)
    }
}

fn is_content_policy(body: &str) -> bool {
    body.contains("content_policy") || body.contains("content_filter")
}

impl From<ApiFailure> for LLMError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Status(StatusCode::TOO_MANY_REQUESTS, _) => LLMError::RateLimitExceeded,
            ApiFailure::Status(status, body) => LLMError::ApiError(format!("{}: {}", status, body)),
            ApiFailure::Transport(e) => LLMError::Http(e),
        }
    }
}

impl From<ApiFailure> for GenerationError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Status(StatusCode::TOO_MANY_REQUESTS, _) => GenerationError::RateLimited,
            ApiFailure::Status(status, body) if status.is_client_error() && is_content_policy(&body) => {
                GenerationError::ContentPolicy(body)
            }
            ApiFailure::Status(status, body) => {
                GenerationError::Unavailable(format!("{}: {}", status, body))
            }
            ApiFailure::Transport(e) => GenerationError::Http(e),
        }
    }
}

impl From<ApiFailure> for EmbedError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Status(StatusCode::TOO_MANY_REQUESTS, _) => EmbedError::RateLimitExceeded,
            ApiFailure::Status(status, body) => {
                EmbedError::ApiError(format!("{}: {}", status, body))
            }
            ApiFailure::Transport(e) => EmbedError::Http(e),
        }
    }
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ApiFailure> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(ApiFailure::Status(status, error_text));
    }
    Ok(response.json().await?)
}

/// Text and usage of one chat completion
struct Completion {
    content: String,
    usage: TokenUsage,
    refused: bool,
}

/// OpenAI client implementation (chat completions and embeddings)
pub struct OpenAIClient {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_embedding_model(mut self, embedding_model: String) -> Self {
        self.embedding_model = embedding_model;
        self
    }

    async fn chat(&self, request: serde_json::Value) -> Result<Completion, ApiFailure> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response_data = read_json(response).await?;
        let choice = &response_data["choices"][0];

        let usage_data = &response_data["usage"];
        let usage = TokenUsage {
            prompt_tokens: usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: usage_data["total_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(Completion {
            content: choice["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            usage,
            refused: choice["finish_reason"].as_str() == Some("content_filter"),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIClient {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::ApiError("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = serde_json::json!({
            "model": self.embedding_model,
            "input": texts
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response_data = read_json(response).await?;

        let mut embeddings = Vec::new();
        if let Some(data) = response_data["data"].as_array() {
            for item in data {
                if let Some(embedding_vec) = item["embedding"].as_array() {
                    let vec: Vec<f64> = embedding_vec.iter().filter_map(|v| v.as_f64()).collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != texts.len() {
            return Err(EmbedError::ApiError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": JUDGE_SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        });

        let completion = self.chat(request).await?;
        if completion.content.is_empty() {
            return Err(LLMError::InvalidResponse("Missing content".to_string()));
        }

        Ok(LLMResponse {
            content: completion.content,
            usage: completion.usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for OpenAIClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.0
        });

        let completion = self.chat(request).await?;
        if completion.refused {
            return Err(GenerationError::ContentPolicy(
                "completion stopped by content filter".to_string(),
            ));
        }
        Ok(completion.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Anthropic Claude client implementation
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.anthropic.com/v1".to_string(),
            max_tokens: 4096,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn messages(
        &self,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<Completion, ApiFailure> {
        let mut request = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.0
        });
        if let Some(system) = system {
            request["system"] = serde_json::Value::String(system.to_string());
        }

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let response_data = read_json(response).await?;

        let usage_data = &response_data["usage"];
        let input_tokens = usage_data["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = usage_data["output_tokens"].as_u64().unwrap_or(0);

        Ok(Completion {
            content: response_data["content"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            usage: TokenUsage {
                prompt_tokens: input_tokens as u32,
                completion_tokens: output_tokens as u32,
                total_tokens: (input_tokens + output_tokens) as u32,
            },
            refused: response_data["stop_reason"].as_str() == Some("refusal"),
        })
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError> {
        let completion = self.messages(Some(JUDGE_SYSTEM_PROMPT), &prompt).await?;
        if completion.content.is_empty() {
            return Err(LLMError::InvalidResponse("Missing content".to_string()));
        }

        Ok(LLMResponse {
            content: completion.content,
            usage: completion.usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for AnthropicClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let completion = self.messages(None, prompt).await?;
        if completion.refused {
            return Err(GenerationError::ContentPolicy(
                "model declined to answer".to_string(),
            ));
        }
        Ok(completion.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> LLMResponse {
        LLMResponse {
            content: content.to_string(),
            usage: TokenUsage::default(),
            model: "test".to_string(),
        }
    }

    #[test]
    fn test_as_json_strips_code_fence() {
        let fenced = response("```json\n{\"verdict\": 1}\n```");
        assert_eq!(fenced.get("verdict"), Some(serde_json::json!(1)));

        let plain = response("  {\"verdict\": 0}  ");
        assert_eq!(plain.get("verdict"), Some(serde_json::json!(0)));

        assert!(response("not json").as_json().is_err());
    }

    #[tokio::test]
    async fn test_openai_generate() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"content":"Paris"},"finish_reason":"stop"}],
                    "usage":{"prompt_tokens":12,"completion_tokens":1,"total_tokens":13}}"#,
            )
            .create_async()
            .await;

        let client = OpenAIClient::new("key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());
        let answer = client.generate("Capital of France?").await.unwrap();

        assert_eq!(answer, "Paris");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let _limited = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client = OpenAIClient::new("key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());

        assert!(matches!(
            client.generate("q").await,
            Err(GenerationError::RateLimited)
        ));
        assert!(matches!(
            client.evaluate("q".to_string()).await,
            Err(LLMError::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn test_openai_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _down = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = OpenAIClient::new("key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());

        assert!(matches!(
            client.generate("q").await,
            Err(GenerationError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_openai_content_filter() {
        let mut server = mockito::Server::new_async().await;
        let _filtered = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":""},"finish_reason":"content_filter"}]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new("key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());

        assert!(matches!(
            client.generate("q").await,
            Err(GenerationError::ContentPolicy(_))
        ));
    }

    #[tokio::test]
    async fn test_openai_embed_batch() {
        let mut server = mockito::Server::new_async().await;
        let _embeddings = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"embedding":[1.0,0.0]},{"embedding":[0.0,1.0]}]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new("key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.url());
        let vectors = client
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_anthropic_judge() {
        let mut server = mockito::Server::new_async().await;
        let _messages = server
            .mock("POST", "/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"content":[{"type":"text","text":"{\"verdict\": 1}"}],
                    "stop_reason":"end_turn",
                    "usage":{"input_tokens":20,"output_tokens":5}}"#,
            )
            .create_async()
            .await;

        let client = AnthropicClient::new("key".to_string(), "claude-3-5-haiku-20241022".to_string())
            .with_base_url(server.url());
        let response = client.evaluate("judge this".to_string()).await.unwrap();

        assert_eq!(response.get("verdict"), Some(serde_json::json!(1)));
        assert_eq!(response.usage.total_tokens, 25);
    }
}
