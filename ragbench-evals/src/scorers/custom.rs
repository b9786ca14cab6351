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

//! Closure-backed scorer for custom metrics

use crate::record::EvaluationRecord;
use crate::{MetricBounds, Scorer, ScoringError, Signature};
use async_trait::async_trait;

type ScoreFn = dyn Fn(&EvaluationRecord) -> Result<f64, ScoringError> + Send + Sync;

/// Wraps a synchronous function as a [`Scorer`]
///
/// ```rust
/// use ragbench_evals::scorers::FnScorer;
/// use ragbench_evals::Signature;
///
/// let length = FnScorer::new("answer_length", Signature::new().answer(), |record| {
///     Ok((record.answer.split_whitespace().count() as f64 / 100.0).min(1.0))
/// });
/// ```
pub struct FnScorer {
    name: String,
    signature: Signature,
    bounds: MetricBounds,
    description: String,
    func: Box<ScoreFn>,
}

impl FnScorer {
    pub fn new<F>(name: impl Into<String>, signature: Signature, func: F) -> Self
    where
        F: Fn(&EvaluationRecord) -> Result<f64, ScoringError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            bounds: MetricBounds::UNIT,
            description: String::new(),
            func: Box::new(func),
        }
    }

    pub fn with_bounds(mut self, bounds: MetricBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Scorer for FnScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> Signature {
        self.signature
    }

    fn bounds(&self) -> MetricBounds {
        self.bounds
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn score(&self, record: &EvaluationRecord) -> Result<f64, ScoringError> {
        (self.func)(record)
    }
}
