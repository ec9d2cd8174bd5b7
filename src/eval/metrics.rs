//! Top-K ranking metrics: Recall, Recall2, Precision, NDCG and MAP.
//!
//! Every metric is a plain function over the per-user positive counts and the
//! boolean correctness matrix (users × K_max). It returns a users × K_max matrix
//! whose column `k` holds the metric's value at cutoff `k + 1`, so one call
//! serves every requested cutoff.

use crate::error::{EvalError, Result};
use ndarray::Array2;
use std::collections::HashMap;
use std::fmt;

/// Signature shared by all registered metric functions.
pub type MetricFn = fn(&[usize], &Array2<bool>) -> Array2<f64>;

/// Enumerated metric tags known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Recall,
    Recall2,
    Precision,
    Ndcg,
    Map,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Recall,
        MetricKind::Recall2,
        MetricKind::Precision,
        MetricKind::Ndcg,
        MetricKind::Map,
    ];

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.key() == lower)
    }

    /// Lowercase registry key.
    pub fn key(&self) -> &'static str {
        match self {
            MetricKind::Recall => "recall",
            MetricKind::Recall2 => "recall2",
            MetricKind::Precision => "precision",
            MetricKind::Ndcg => "ndcg",
            MetricKind::Map => "map",
        }
    }

    /// Display name used in summaries.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            MetricKind::Recall => "Recall",
            MetricKind::Recall2 => "Recall2",
            MetricKind::Precision => "Precision",
            MetricKind::Ndcg => "NDCG",
            MetricKind::Map => "MAP",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Mapping from metric kind to the function that computes it.
#[derive(Clone)]
pub struct MetricRegistry {
    functions: HashMap<MetricKind, MetricFn>,
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("metrics", &self.known_names())
            .finish()
    }
}

impl MetricRegistry {
    /// Registry holding the built-in formula for every kind.
    pub fn builtin() -> Self {
        let mut functions: HashMap<MetricKind, MetricFn> = HashMap::new();
        functions.insert(MetricKind::Recall, recall);
        functions.insert(MetricKind::Recall2, recall2);
        functions.insert(MetricKind::Precision, precision);
        functions.insert(MetricKind::Ndcg, ndcg);
        functions.insert(MetricKind::Map, mean_average_precision);
        Self { functions }
    }

    /// Replace the function used for `kind`.
    pub fn register(&mut self, kind: MetricKind, f: MetricFn) {
        self.functions.insert(kind, f);
    }

    /// Resolve a configured metric name to a registered kind.
    pub fn resolve(&self, name: &str) -> Result<MetricKind> {
        MetricKind::from_name(name)
            .filter(|kind| self.functions.contains_key(kind))
            .ok_or_else(|| {
                EvalError::Config(format!(
                    "There is no user grouped topk metric named {} (known: {})",
                    name,
                    self.known_names().join(", ")
                ))
            })
    }

    pub fn get(&self, kind: MetricKind) -> Option<MetricFn> {
        self.functions.get(&kind).copied()
    }

    fn known_names(&self) -> Vec<&'static str> {
        MetricKind::ALL
            .iter()
            .filter(|kind| self.functions.contains_key(kind))
            .map(|kind| kind.canonical_name())
            .collect()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Running hit count per user per rank.
fn cumulative_hits(correct: &Array2<bool>) -> Array2<f64> {
    let mut cum = Array2::<f64>::zeros(correct.raw_dim());
    for (row_in, mut row_out) in correct.rows().into_iter().zip(cum.rows_mut()) {
        let mut hits = 0.0;
        for (hit, out) in row_in.iter().zip(row_out.iter_mut()) {
            if *hit {
                hits += 1.0;
            }
            *out = hits;
        }
    }
    cum
}

/// Discount applied to a hit at zero-based rank `rank`.
fn discount(rank: usize) -> f64 {
    1.0 / ((rank + 2) as f64).log2()
}

/// Recall@k: hits in the top k divided by the user's positive count.
pub fn recall(pos_len: &[usize], correct: &Array2<bool>) -> Array2<f64> {
    let mut cum = cumulative_hits(correct);
    for (mut row, &len) in cum.rows_mut().into_iter().zip(pos_len) {
        if len == 0 {
            row.fill(0.0);
        } else {
            row.mapv_inplace(|hits| hits / len as f64);
        }
    }
    cum
}

/// Micro-averaged recall: total hits over total positives.
///
/// Rows are scaled by `users / total_positives` so that averaging over users
/// yields the pooled ratio.
pub fn recall2(pos_len: &[usize], correct: &Array2<bool>) -> Array2<f64> {
    let mut cum = cumulative_hits(correct);
    let total: usize = pos_len.iter().sum();
    if total == 0 {
        cum.fill(0.0);
        return cum;
    }
    let scale = cum.nrows() as f64 / total as f64;
    cum.mapv_inplace(|hits| hits * scale);
    cum
}

/// Precision@k: hits in the top k divided by k.
pub fn precision(_pos_len: &[usize], correct: &Array2<bool>) -> Array2<f64> {
    let mut cum = cumulative_hits(correct);
    for mut row in cum.rows_mut() {
        for (k, value) in row.iter_mut().enumerate() {
            *value /= (k + 1) as f64;
        }
    }
    cum
}

/// NDCG@k with binary gains.
pub fn ndcg(pos_len: &[usize], correct: &Array2<bool>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros(correct.raw_dim());
    for ((row_in, mut row_out), &len) in correct
        .rows()
        .into_iter()
        .zip(out.rows_mut())
        .zip(pos_len)
    {
        if len == 0 {
            continue;
        }
        let mut dcg = 0.0;
        let mut idcg = 0.0;
        for (k, (hit, value)) in row_in.iter().zip(row_out.iter_mut()).enumerate() {
            if *hit {
                dcg += discount(k);
            }
            if k < len {
                idcg += discount(k);
            }
            *value = dcg / idcg;
        }
    }
    out
}

/// MAP@k: summed precision at each hit rank over `min(positives, k)`.
pub fn mean_average_precision(pos_len: &[usize], correct: &Array2<bool>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros(correct.raw_dim());
    for ((row_in, mut row_out), &len) in correct
        .rows()
        .into_iter()
        .zip(out.rows_mut())
        .zip(pos_len)
    {
        if len == 0 {
            continue;
        }
        let mut hits = 0.0;
        let mut sum_precision = 0.0;
        for (k, (hit, value)) in row_in.iter().zip(row_out.iter_mut()).enumerate() {
            if *hit {
                hits += 1.0;
                sum_precision += hits / (k + 1) as f64;
            }
            *value = sum_precision / (k + 1).min(len) as f64;
        }
    }
    out
}
