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

//! Aggregation of a [`ResultTable`] into per-backend summaries
//!
//! For every (backend, metric) pair the aggregator reports the mean over
//! successful cells together with the number of failed cells. A pair without
//! a single successful cell is [`MetricStat::NoData`], never a mean of zero.
//!
//! Rankings order backends by descending mean; equal means keep the order in
//! which backends were registered. Pairwise comparisons use Welch's t-test and
//! Cohen's d.

// Numeric approximation constants are written out in full
#![allow(clippy::excessive_precision)]
#![allow(clippy::needless_range_loop)]

use crate::table::{CellOutcome, ResultTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Aggregate value of one metric for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricStat {
    Value {
        mean: f64,
        n: usize,
        std_dev: f64,
        min: f64,
        max: f64,
    },

    /// No successful cell exists for the pair
    NoData,
}

impl MetricStat {
    fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return MetricStat::NoData;
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        let variance =
            values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1).max(1) as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        MetricStat::Value {
            mean,
            n,
            std_dev: variance.sqrt(),
            min,
            max,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        match self {
            MetricStat::Value { mean, .. } => Some(*mean),
            MetricStat::NoData => None,
        }
    }

    /// Number of successful cells
    pub fn count(&self) -> usize {
        match self {
            MetricStat::Value { n, .. } => *n,
            MetricStat::NoData => 0,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, MetricStat::NoData)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub stat: MetricStat,

    /// Error cells for this (backend, metric)
    pub failures: usize,
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stat {
            MetricStat::Value { mean, .. } => write!(f, "{:.3}", mean)?,
            MetricStat::NoData => f.write_str("no data")?,
        }
        if self.failures > 0 {
            write!(f, " ({} failed)", self.failures)?;
        }
        Ok(())
    }
}

/// Summary of one backend across all metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub backend_id: String,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl SummaryRow {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    /// Total error cells across metrics
    pub fn failures(&self) -> usize {
        self.metrics.values().map(|m| m.failures).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedBackend {
    /// 1-based position
    pub rank: usize,
    pub backend_id: String,
    pub mean: f64,
}

/// Backends ordered by one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRanking {
    pub metric: String,
    pub ranked: Vec<RankedBackend>,

    /// Backends with no data for the metric, in registration order
    pub unranked: Vec<String>,
}

impl MetricRanking {
    pub fn leader(&self) -> Option<&RankedBackend> {
        self.ranked.first()
    }
}

/// Per-backend summaries plus per-metric rankings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Backend ids in registration order
    pub backends: Vec<String>,
    pub metrics: Vec<String>,
    pub rows: Vec<SummaryRow>,
    pub rankings: Vec<MetricRanking>,
}

impl Summary {
    pub fn row(&self, backend_id: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.backend_id == backend_id)
    }

    pub fn ranking(&self, metric: &str) -> Option<&MetricRanking> {
        self.rankings.iter().find(|r| r.metric == metric)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend_width = self
            .backends
            .iter()
            .map(|b| b.len())
            .chain(std::iter::once("backend".len()))
            .max()
            .unwrap_or(7);
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                self.metrics
                    .iter()
                    .map(|m| row.metric(m).map(|s| s.to_string()).unwrap_or_default())
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = self
            .metrics
            .iter()
            .enumerate()
            .map(|(i, m)| {
                cells
                    .iter()
                    .map(|row| row[i].len())
                    .chain(std::iter::once(m.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write!(f, "{:<width$}", "backend", width = backend_width)?;
        for (metric, width) in self.metrics.iter().zip(&widths) {
            write!(f, "  {:>width$}", metric, width = *width)?;
        }
        writeln!(f)?;

        for (row, values) in self.rows.iter().zip(&cells) {
            write!(f, "{:<width$}", row.backend_id, width = backend_width)?;
            for (value, width) in values.iter().zip(&widths) {
                write!(f, "  {:>width$}", value, width = *width)?;
            }
            writeln!(f)?;
        }

        if !self.rankings.is_empty() {
            writeln!(f)?;
        }
        for ranking in &self.rankings {
            let order: Vec<String> = ranking
                .ranked
                .iter()
                .map(|r| format!("{}. {} ({:.3})", r.rank, r.backend_id, r.mean))
                .collect();
            write!(f, "{}: {}", ranking.metric, order.join(", "))?;
            if !ranking.unranked.is_empty() {
                write!(f, "; no data: {}", ranking.unranked.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Effect size interpretation based on Cohen's conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectSize {
    Negligible, // |d| < 0.2
    Small,      // 0.2 <= |d| < 0.5
    Medium,     // 0.5 <= |d| < 0.8
    Large,      // |d| >= 0.8
}

impl EffectSize {
    pub fn from_cohens_d(d: f64) -> Self {
        let abs_d = d.abs();
        if abs_d < 0.2 {
            EffectSize::Negligible
        } else if abs_d < 0.5 {
            EffectSize::Small
        } else if abs_d < 0.8 {
            EffectSize::Medium
        } else {
            EffectSize::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectSize::Negligible => "negligible",
            EffectSize::Small => "small",
            EffectSize::Medium => "medium",
            EffectSize::Large => "large",
        }
    }
}

/// Two backends compared on one metric (treatment minus baseline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub metric: String,
    pub baseline: String,
    pub treatment: String,
    pub baseline_mean: f64,
    pub treatment_mean: f64,
    pub difference: f64,

    /// Welch's t-statistic
    pub t_statistic: f64,

    /// Welch-Satterthwaite degrees of freedom
    pub degrees_of_freedom: f64,

    /// Two-tailed p-value
    pub p_value: f64,

    pub cohens_d: f64,
    pub effect_size: EffectSize,

    /// p < 0.05
    pub is_significant: bool,
}

/// Stateless summary computations over a result table
pub struct Aggregator;

impl Aggregator {
    /// Summarize every metric present in the table.
    ///
    /// `backends` gives the registration order; backends present in the
    /// table but not listed are appended in id order.
    pub fn summarize(table: &ResultTable, backends: &[String]) -> Summary {
        Self::summarize_metrics(table, backends, &table.metrics())
    }

    /// Summarize with an explicit metric order. Metrics that appear in the
    /// table but not in `metrics` are appended in name order.
    pub fn summarize_metrics(
        table: &ResultTable,
        backends: &[String],
        metrics: &[String],
    ) -> Summary {
        let backends = merge_order(backends, table.backends());
        let metrics = merge_order(metrics, table.metrics());

        let mut values: BTreeMap<(String, String), (Vec<f64>, usize)> = BTreeMap::new();
        for cell in table.cells() {
            let entry = values
                .entry((cell.key.backend_id, cell.key.metric))
                .or_default();
            match cell.outcome {
                CellOutcome::Value(v) => entry.0.push(v),
                CellOutcome::Error(_) => entry.1 += 1,
            }
        }

        let rows: Vec<SummaryRow> = backends
            .iter()
            .map(|backend| SummaryRow {
                backend_id: backend.clone(),
                metrics: metrics
                    .iter()
                    .map(|metric| {
                        let key = (backend.clone(), metric.clone());
                        let (vals, failures) = values
                            .get(&key)
                            .map(|(v, f)| (v.as_slice(), *f))
                            .unwrap_or((&[][..], 0));
                        let summary = MetricSummary {
                            stat: MetricStat::from_values(vals),
                            failures,
                        };
                        (metric.clone(), summary)
                    })
                    .collect(),
            })
            .collect();

        let rankings = metrics
            .iter()
            .map(|metric| Self::rank(&rows, metric))
            .collect();

        Summary {
            backends,
            metrics,
            rows,
            rankings,
        }
    }

    /// Rank rows by descending mean on `metric`. Rows are expected in
    /// registration order; the sort is stable so ties keep that order.
    pub fn rank(rows: &[SummaryRow], metric: &str) -> MetricRanking {
        let mut scored: Vec<(&str, f64)> = Vec::new();
        let mut unranked = Vec::new();
        for row in rows {
            match row.metric(metric).and_then(|m| m.stat.mean()) {
                Some(mean) => scored.push((row.backend_id.as_str(), mean)),
                None => unranked.push(row.backend_id.clone()),
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        MetricRanking {
            metric: metric.to_string(),
            ranked: scored
                .into_iter()
                .enumerate()
                .map(|(i, (backend_id, mean))| RankedBackend {
                    rank: i + 1,
                    backend_id: backend_id.to_string(),
                    mean,
                })
                .collect(),
            unranked,
        }
    }

    /// Compare two backends on one metric.
    ///
    /// Returns `None` unless both backends have at least two successful
    /// cells for the metric.
    pub fn compare(
        table: &ResultTable,
        metric: &str,
        baseline: &str,
        treatment: &str,
    ) -> Option<PairwiseComparison> {
        let collect = |backend: &str| -> Vec<f64> {
            table
                .query(Some(backend), None, Some(metric))
                .iter()
                .filter_map(|c| c.outcome.value())
                .collect()
        };
        let base = collect(baseline);
        let treat = collect(treatment);
        if base.len() < 2 || treat.len() < 2 {
            return None;
        }

        let (m1, s1, n1) = mean_and_std(&base);
        let (m2, s2, n2) = mean_and_std(&treat);

        // Welch's t-test
        let v1 = s1 * s1 / n1;
        let v2 = s2 * s2 / n2;
        let se = (v1 + v2).sqrt();
        let t_statistic = if se > 0.0 { (m2 - m1) / se } else { 0.0 };
        let df = if v1 + v2 > 0.0 {
            (v1 + v2).powi(2) / ((v1 * v1 / (n1 - 1.0)) + (v2 * v2 / (n2 - 1.0)))
        } else {
            n1 + n2 - 2.0
        };

        let p_value = if se > 0.0 {
            t_distribution_p_value(t_statistic.abs(), df)
        } else if m1 == m2 {
            1.0
        } else {
            // Zero variance with distinct means
            0.0
        };

        let pooled_std = (((n1 - 1.0) * s1 * s1 + (n2 - 1.0) * s2 * s2) / (n1 + n2 - 2.0)).sqrt();
        let cohens_d = if pooled_std > 0.0 {
            (m2 - m1) / pooled_std
        } else {
            0.0
        };

        Some(PairwiseComparison {
            metric: metric.to_string(),
            baseline: baseline.to_string(),
            treatment: treatment.to_string(),
            baseline_mean: m1,
            treatment_mean: m2,
            difference: m2 - m1,
            t_statistic,
            degrees_of_freedom: df,
            p_value,
            cohens_d,
            effect_size: EffectSize::from_cohens_d(cohens_d),
            is_significant: p_value < 0.05,
        })
    }
}

/// `preferred` first, then anything else from `present`, without duplicates
fn merge_order(preferred: &[String], present: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    preferred
        .iter()
        .cloned()
        .chain(present)
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn mean_and_std(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    (mean, variance.sqrt(), n)
}

/// Approximate two-tailed p-value of Student's t-distribution
fn t_distribution_p_value(t: f64, df: f64) -> f64 {
    if df > 100.0 {
        return 2.0 * normal_cdf(-t.abs());
    }
    let x = df / (df + t * t);
    incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

/// Regularized incomplete beta I_x(a, b), Lentz's continued fraction
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    // The continued fraction converges quickly only below the mean
    if x > (a + 1.0) / (a + b + 2.0) {
        return 1.0 - incomplete_beta(b, a, 1.0 - x);
    }

    const TINY: f64 = 1e-30;
    let mut c = 1.0;
    let mut d = 1.0 - (a + b) * x / (a + 1.0);
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut f = d;

    for m in 1..200 {
        let m = m as f64;

        let numerator = m * (b - m) * x / ((a + 2.0 * m - 1.0) * (a + 2.0 * m));
        d = 1.0 + numerator * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + numerator / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        f *= c * d;

        let numerator = -(a + m) * (a + b + m) * x / ((a + 2.0 * m) * (a + 2.0 * m + 1.0));
        d = 1.0 + numerator * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + numerator / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = c * d;
        f *= delta;

        if (delta - 1.0).abs() < 1e-12 {
            break;
        }
    }

    let front = (a * x.ln() + b * (1.0 - x).ln() - ln_beta(a, b)).exp() / a;
    front * f
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Lanczos approximation of ln Γ(z) for z > 0
fn ln_gamma(z: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if z < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * z).sin()).ln() - ln_gamma(1.0 - z);
    }

    let z = z - 1.0;
    let mut x = COEF[0];
    for i in 1..COEF.len() {
        x += COEF[i] / (z + i as f64);
    }
    let t = z + G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (z + 0.5) * t.ln() - t + x.ln()
}
