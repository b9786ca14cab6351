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

//! Scorer registry
//!
//! Holds scorers in registration order. Metric names are unique. The engine
//! asks the registry for the scorers selected by the configured metric set and,
//! per record, for those whose signature the record satisfies.

use crate::llm_client::{EmbeddingClient, LLMClient};
use crate::presets::MetricPreset;
use crate::record::EvaluationRecord;
use crate::Scorer;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Registry for managing scorers
#[derive(Clone, Default)]
pub struct ScorerRegistry {
    scorers: Arc<RwLock<Vec<Arc<dyn Scorer>>>>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with a preset's scorers
    pub fn from_preset(
        preset: MetricPreset,
        judge: Arc<dyn LLMClient>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for scorer in preset.create_scorers(judge, embedder) {
            registry.register(scorer)?;
        }
        Ok(registry)
    }

    /// Register a new scorer
    pub fn register(&self, scorer: Arc<dyn Scorer>) -> Result<(), RegistryError> {
        let name = scorer.name().to_string();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut scorers = self.scorers.write();
        if scorers.iter().any(|s| s.name() == name) {
            return Err(RegistryError::DuplicateName(name));
        }

        info!(
            "Registering scorer: {} (needs {}, bounds {})",
            name,
            scorer.signature(),
            scorer.bounds()
        );
        scorers.push(scorer);
        Ok(())
    }

    /// Unregister a scorer by metric name
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut scorers = self.scorers.write();
        let index = scorers
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        scorers.remove(index);

        info!("Unregistered scorer: {}", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scorer>> {
        self.scorers.read().iter().find(|s| s.name() == name).cloned()
    }

    /// Metric names in registration order
    pub fn names(&self) -> Vec<String> {
        self.scorers
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.scorers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.read().is_empty()
    }

    /// Snapshot of the scorers selected by `metrics`, in registration order.
    ///
    /// An empty selection means every registered scorer. Unknown names are
    /// an error rather than silently skipped.
    pub fn select(&self, metrics: &[String]) -> Result<Vec<Arc<dyn Scorer>>, RegistryError> {
        let scorers = self.scorers.read();

        if let Some(unknown) = metrics
            .iter()
            .find(|m| !scorers.iter().any(|s| s.name() == m.as_str()))
        {
            return Err(RegistryError::UnknownMetric(unknown.clone()));
        }

        Ok(scorers
            .iter()
            .filter(|s| metrics.is_empty() || metrics.iter().any(|m| m == s.name()))
            .cloned()
            .collect())
    }
}

/// Scorers from `selected` whose signature `record` satisfies
pub fn applicable<'a>(
    selected: &'a [Arc<dyn Scorer>],
    record: &'a EvaluationRecord,
) -> impl Iterator<Item = &'a Arc<dyn Scorer>> + 'a {
    selected
        .iter()
        .filter(move |s| record.satisfies(&s.signature()))
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Scorer name must not be empty")]
    EmptyName,

    #[error("Duplicate metric name: {0}")]
    DuplicateName(String),

    #[error("Scorer not found: {0}")]
    NotFound(String),

    #[error("Unknown metric in metric set: {0}")]
    UnknownMetric(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorers::FnScorer;
    use crate::scorers::test_support::record;
    use crate::Signature;

    fn constant(name: &str, signature: Signature) -> Arc<dyn Scorer> {
        Arc::new(FnScorer::new(name, signature, |_| Ok(0.5)))
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = ScorerRegistry::new();
        registry
            .register(constant("m1", Signature::new().answer()))
            .unwrap();

        let err = registry
            .register(constant("m1", Signature::new().question()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "m1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = ScorerRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(constant(name, Signature::new().answer()))
                .unwrap();
        }

        assert_eq!(registry.names(), vec!["zeta", "alpha", "mid"]);

        registry.unregister("alpha").unwrap();
        assert_eq!(registry.names(), vec!["zeta", "mid"]);
        assert!(registry.unregister("alpha").is_err());
    }

    #[test]
    fn test_select_filters_in_registration_order() {
        let registry = ScorerRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .register(constant(name, Signature::new().answer()))
                .unwrap();
        }

        let all = registry.select(&[]).unwrap();
        assert_eq!(all.len(), 3);

        let picked = registry
            .select(&["c".to_string(), "a".to_string()])
            .unwrap();
        let names: Vec<&str> = picked.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "c"]);

        assert!(matches!(
            registry.select(&["nope".to_string()]),
            Err(RegistryError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_applicable_skips_missing_ground_truth() {
        let selected = vec![
            constant("needs_gt", Signature::new().answer().ground_truth()),
            constant("needs_ctx", Signature::new().answer().contexts()),
        ];

        let without_gt = record("Paris", &["ctx"], None);
        let names: Vec<&str> = applicable(&selected, &without_gt).map(|s| s.name()).collect();
        assert_eq!(names, vec!["needs_ctx"]);

        let with_gt = record("Paris", &["ctx"], Some("Paris"));
        assert_eq!(applicable(&selected, &with_gt).count(), 2);
    }
}
