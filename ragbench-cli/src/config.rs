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

//! Benchmark configuration
//!
//! Priority: CLI flag > environment > file > defaults.
//!
//! ```toml
//! dataset = "questions.jsonl"
//! preset = "ragas"
//!
//! [eval]
//! top_k = 5
//! concurrency_limit = 8
//!
//! [judge]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [embedding]
//! model = "text-embedding-3-small"
//!
//! [[backends]]
//! id = "titan"
//! retriever = { type = "http", endpoint = "http://localhost:8001/retrieve" }
//! generator = { provider = "openai", model = "gpt-4o-mini" }
//! ```

use anyhow::{bail, Context, Result};
use ragbench_evals::presets::MetricPreset;
use ragbench_evals::EvalConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAI,
    Anthropic,
}

impl Provider {
    fn key_var(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// A chat model used as judge or generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// An OpenAI-compatible embedding model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrieverConfig {
    /// Remote retrieval service
    Http {
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
    },

    /// In-memory index over a JSONL corpus of `{id, text}` passages
    VectorIndex {
        corpus: PathBuf,
        #[serde(default)]
        embedding: EmbeddingConfig,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub generator: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Question file (JSON array or JSONL)
    pub dataset: Option<PathBuf>,

    /// Built-in scorer set
    pub preset: MetricPreset,

    /// Generation prompt with `{context}` and `{question}` placeholders
    pub prompt_template: Option<String>,

    pub eval: EvalConfig,
    pub judge: ModelConfig,
    pub embedding: EmbeddingConfig,
    pub backends: Vec<BackendConfig>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            dataset: None,
            preset: MetricPreset::Ragas,
            prompt_template: None,
            eval: EvalConfig::default(),
            judge: ModelConfig::default(),
            embedding: EmbeddingConfig::default(),
            backends: Vec::new(),
        }
    }
}

/// Values given on the command line; `None` leaves the configured value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dataset: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub concurrency: Option<usize>,
    pub metrics: Option<Vec<String>>,
    pub run_timeout_secs: Option<u64>,
}

impl BenchConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        // Relative paths are relative to the config file
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// File, then environment, then command line
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self> {
        tracing::info!("Loading configuration from file: {:?}", path);
        let mut config = Self::from_file(path)?;
        config.merge_with_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `var`.
    ///
    /// Supported environment variables:
    /// - RAGBENCH_TOP_K: chunks retrieved per question
    /// - RAGBENCH_CONCURRENCY: maximum in-flight external calls
    /// - RAGBENCH_MAX_RETRIES: retries for retrieval and generation
    /// - RAGBENCH_CALL_TIMEOUT: per-call timeout in seconds
    /// - RAGBENCH_RUN_TIMEOUT: global run deadline in seconds
    /// - RAGBENCH_METRICS: comma-separated metric names
    pub fn merge_with_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid {}={:?}", key, value);
                    None
                }
            }
        }

        if let Some(v) = parsed("RAGBENCH_TOP_K", var("RAGBENCH_TOP_K")) {
            self.eval.top_k = v;
        }
        if let Some(v) = parsed("RAGBENCH_CONCURRENCY", var("RAGBENCH_CONCURRENCY")) {
            self.eval.concurrency_limit = v;
        }
        if let Some(v) = parsed("RAGBENCH_MAX_RETRIES", var("RAGBENCH_MAX_RETRIES")) {
            self.eval.max_retries = v;
        }
        if let Some(v) = parsed("RAGBENCH_CALL_TIMEOUT", var("RAGBENCH_CALL_TIMEOUT")) {
            self.eval.call_timeout_secs = v;
        }
        if let Some(v) = parsed("RAGBENCH_RUN_TIMEOUT", var("RAGBENCH_RUN_TIMEOUT")) {
            self.eval.run_timeout_secs = Some(v);
        }
        if let Some(metrics) = var("RAGBENCH_METRICS") {
            self.eval.metrics = split_list(&metrics);
        }

        // Provider keys fill in models that do not name one
        let fill = |model: &mut ModelConfig| {
            if model.api_key.is_none() {
                model.api_key = var(model.provider.key_var());
            }
        };
        fill(&mut self.judge);
        for backend in &mut self.backends {
            fill(&mut backend.generator);
        }

        let openai_key = var(Provider::OpenAI.key_var());
        let fill_embedding = |embedding: &mut EmbeddingConfig| {
            if embedding.api_key.is_none() {
                embedding.api_key = openai_key.clone();
            }
        };
        fill_embedding(&mut self.embedding);
        for backend in &mut self.backends {
            if let RetrieverConfig::VectorIndex { embedding, .. } = &mut backend.retriever {
                fill_embedding(embedding);
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(dataset) = &overrides.dataset {
            self.dataset = Some(dataset.clone());
        }
        if let Some(top_k) = overrides.top_k {
            self.eval.top_k = top_k;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.eval.concurrency_limit = concurrency;
        }
        if let Some(metrics) = &overrides.metrics {
            self.eval.metrics = metrics.clone();
        }
        if let Some(secs) = overrides.run_timeout_secs {
            self.eval.run_timeout_secs = Some(secs);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.eval.validate()?;

        if self.dataset.is_none() {
            bail!("No dataset configured; set `dataset` or pass --dataset");
        }
        if self.backends.is_empty() {
            bail!("At least one [[backends]] entry is required");
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                bail!("Backend id cannot be empty");
            }
            if !seen.insert(backend.id.as_str()) {
                bail!("Duplicate backend id: {}", backend.id);
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(dataset) = &mut self.dataset {
            resolve(dataset);
        }
        for backend in &mut self.backends {
            if let RetrieverConfig::VectorIndex { corpus, .. } = &mut backend.retriever {
                resolve(corpus);
            }
        }
    }
}

/// Split a comma-separated list, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
dataset = "questions.jsonl"
preset = "retrieval"

[eval]
top_k = 3
metrics = ["context_precision"]

[judge]
provider = "anthropic"
model = "claude-3-5-haiku-latest"

[[backends]]
id = "titan"
retriever = { type = "http", endpoint = "http://localhost:8001/retrieve" }

[[backends]]
id = "cohere"
retriever = { type = "vector_index", corpus = "corpus.jsonl", embedding = { model = "embed-v3" } }
generator = { model = "gpt-4o" }
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.preset, MetricPreset::Ragas);
        assert_eq!(config.eval.top_k, 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let (dir, path) = write_sample();
        let config = BenchConfig::from_file(&path).unwrap();

        assert_eq!(config.preset, MetricPreset::Retrieval);
        assert_eq!(config.eval.top_k, 3);
        // Unset fields keep their defaults
        assert_eq!(config.eval.concurrency_limit, 8);
        assert_eq!(config.judge.provider, Provider::Anthropic);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].generator, ModelConfig::default());
        assert_eq!(config.dataset, Some(dir.path().join("questions.jsonl")));

        match &config.backends[1].retriever {
            RetrieverConfig::VectorIndex { corpus, embedding } => {
                assert_eq!(corpus, &dir.path().join("corpus.jsonl"));
                assert_eq!(embedding.model, "embed-v3");
            }
            other => panic!("unexpected retriever {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_then_overrides() {
        let (_dir, path) = write_sample();
        let mut config = BenchConfig::from_file(&path).unwrap();

        let env: HashMap<&str, &str> = [
            ("RAGBENCH_TOP_K", "7"),
            ("RAGBENCH_CONCURRENCY", "not-a-number"),
            ("RAGBENCH_METRICS", "context_recall, context_precision"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", "sk-oai"),
        ]
        .into_iter()
        .collect();
        config.merge_with_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.eval.top_k, 7);
        assert_eq!(config.eval.concurrency_limit, 8);
        assert_eq!(
            config.eval.metrics,
            vec!["context_recall".to_string(), "context_precision".to_string()]
        );
        assert_eq!(config.judge.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.backends[0].generator.api_key.as_deref(), Some("sk-oai"));

        config.apply_overrides(&Overrides {
            top_k: Some(2),
            run_timeout_secs: Some(600),
            ..Default::default()
        });
        assert_eq!(config.eval.top_k, 2);
        assert_eq!(config.eval.run_timeout_secs, Some(600));
    }

    #[test]
    fn test_validate_rejects_duplicate_backends() {
        let (_dir, path) = write_sample();
        let mut config = BenchConfig::from_file(&path).unwrap();
        config.backends[1].id = "titan".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate backend id"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, ,b,"), vec!["a".to_string(), "b".to_string()]);
    }
}
