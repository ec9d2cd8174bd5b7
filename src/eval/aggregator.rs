//! Turns pass-level top-K rows and ground truth into per-metric, per-K scores.

use crate::error::{EvalError, Result};
use crate::eval::collector::{TopKIndexMatrix, PADDING_INDEX};
use crate::eval::metrics::{MetricKind, MetricRegistry};
use ndarray::{Array1, Array2, Axis};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::fmt;

/// Decimal places kept in reported scores.
pub const ROUND_DIGITS: i32 = 4;

/// A configured metric: the resolved kind plus the name it was requested under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedMetric {
    pub kind: MetricKind,
    pub label: String,
}

/// Ordered `"{Metric}@{K}" -> score` mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricResult {
    entries: Vec<(String, f64)>,
}

impl MetricResult {
    /// Insert or overwrite `key`, keeping first-insertion order.
    pub fn insert(&mut self, key: String, value: f64) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for MetricResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}: {:.4}", k, v))
            .collect();
        f.write_str(&parts.join("    "))
    }
}

impl Serialize for MetricResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Cell `(i, k)` is true iff the item ranked `k` for user `i` is a positive.
/// Padding slots never match.
pub fn correctness_matrix(topk: &TopKIndexMatrix, positives: &[HashSet<i64>]) -> Result<Array2<bool>> {
    if topk.nrows() != positives.len() {
        return Err(EvalError::ShapeMismatch(format!(
            "{} top-K rows vs {} positive item sets",
            topk.nrows(),
            positives.len()
        )));
    }
    let mut correct = Array2::from_elem(topk.raw_dim(), false);
    for ((row, items), mut out) in topk.rows().into_iter().zip(positives).zip(correct.rows_mut()) {
        for (idx, cell) in row.iter().zip(out.iter_mut()) {
            *cell = *idx != PADDING_INDEX && items.contains(idx);
        }
    }
    Ok(correct)
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Orchestrates the registered metric functions over one pass.
#[derive(Debug, Clone)]
pub struct MetricAggregator {
    registry: MetricRegistry,
}

impl MetricAggregator {
    pub fn new(registry: MetricRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Per-cutoff user-mean of one metric, cutoffs 1..=K_max.
    pub fn metric_curve(
        &self,
        kind: MetricKind,
        pos_len: &[usize],
        correct: &Array2<bool>,
    ) -> Result<Array1<f64>> {
        let f = self.registry.get(kind).ok_or_else(|| {
            EvalError::Config(format!("metric {} is not registered", kind))
        })?;
        let per_user = f(pos_len, correct);
        if per_user.dim() != correct.dim() {
            return Err(EvalError::ShapeMismatch(format!(
                "metric {} returned {:?}, expected {:?}",
                kind,
                per_user.dim(),
                correct.dim()
            )));
        }
        Ok(per_user
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(correct.ncols())))
    }

    /// Compute every metric once up to K_max, then slice at each requested K.
    pub fn aggregate(
        &self,
        metrics: &[RequestedMetric],
        topk: &[usize],
        pos_len: &[usize],
        correct: &Array2<bool>,
    ) -> Result<MetricResult> {
        if pos_len.len() != correct.nrows() {
            return Err(EvalError::ShapeMismatch(format!(
                "{} positive lengths vs {} correctness rows",
                pos_len.len(),
                correct.nrows()
            )));
        }
        let mut result = MetricResult::default();
        for metric in metrics {
            let curve = self.metric_curve(metric.kind, pos_len, correct)?;
            for &k in topk {
                let value = k.checked_sub(1).and_then(|i| curve.get(i)).copied().ok_or_else(|| {
                    EvalError::ShapeMismatch(format!(
                        "cutoff {} exceeds the {} ranked columns",
                        k,
                        curve.len()
                    ))
                })?;
                result.insert(format!("{}@{}", metric.label, k), round_to(value, ROUND_DIGITS));
            }
        }
        Ok(result)
    }
}

impl Default for MetricAggregator {
    fn default() -> Self {
        Self::new(MetricRegistry::builtin())
    }
}
