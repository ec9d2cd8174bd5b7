//! Reduces per-batch score data to a dense top-K index matrix.
//!
//! Full-sort batches arrive as one flat score vector segmented per user by
//! `user_len_list`. Segments are padded on the right with `f32::NEG_INFINITY`
//! up to the longest segment (or K_max, whichever is larger). Padding is also
//! tracked per row, so a padded slot ranks below every real score, including
//! a real `-inf` or NaN, and is emitted as [`PADDING_INDEX`].

use crate::error::{EvalError, Result};
use ndarray::{Array2, ArrayView1};
use serde::Deserialize;
use std::cmp::Ordering;

/// Top-K candidate indices per user, one row per user, K_max columns.
pub type TopKIndexMatrix = Array2<i64>;

/// Index emitted for rank slots that only padding could fill.
pub const PADDING_INDEX: i64 = -1;

/// Score value used to pad ragged segments.
pub const PADDING_SCORE: f32 = f32::NEG_INFINITY;

/// One batch of model scores as produced by the forward pass.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreBatch {
    /// Candidate count per user; in sampled mode only its length is used.
    pub user_len_list: Vec<usize>,
    /// Flat scores, segmented by `user_len_list` or row-major users × candidates.
    pub scores: Vec<f32>,
    /// Full-sort (every item scored) versus sampled candidates.
    #[serde(default)]
    pub full: bool,
}

impl ScoreBatch {
    pub fn full(user_len_list: Vec<usize>, scores: Vec<f32>) -> Self {
        Self { user_len_list, scores, full: true }
    }

    pub fn sampled(num_users: usize, scores: Vec<f32>) -> Self {
        Self { user_len_list: vec![0; num_users], scores, full: false }
    }

    pub fn num_users(&self) -> usize {
        self.user_len_list.len()
    }
}

/// Dense score rows plus the number of real (non-padding) entries per row.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseScores {
    pub scores: Array2<f32>,
    pub valid_len: Vec<usize>,
}

/// Split a flat score vector into ragged per-user segments and pad them into a
/// dense matrix at least `min_width` wide.
pub fn pad_ragged(scores: &[f32], user_len_list: &[usize], min_width: usize) -> Result<DenseScores> {
    let total: usize = user_len_list.iter().sum();
    if total != scores.len() {
        return Err(EvalError::ShapeMismatch(format!(
            "user_len_list sums to {} but the batch has {} scores",
            total,
            scores.len()
        )));
    }
    let max_len = user_len_list.iter().copied().max().unwrap_or(0);
    let width = max_len.max(min_width);

    let mut dense = Array2::from_elem((user_len_list.len(), width), PADDING_SCORE);
    let mut offset = 0;
    for (mut row, &len) in dense.rows_mut().into_iter().zip(user_len_list) {
        for (slot, score) in row.iter_mut().zip(&scores[offset..offset + len]) {
            *slot = *score;
        }
        offset += len;
    }

    Ok(DenseScores { scores: dense, valid_len: user_len_list.to_vec() })
}

/// Shape a sampled batch into one row per user.
pub fn shape_sampled(scores: &[f32], num_users: usize) -> Result<DenseScores> {
    if num_users == 0 {
        if !scores.is_empty() {
            return Err(EvalError::ShapeMismatch(format!(
                "sampled batch has {} scores but no users",
                scores.len()
            )));
        }
        return Ok(DenseScores { scores: Array2::zeros((0, 0)), valid_len: Vec::new() });
    }
    if scores.len() % num_users != 0 {
        return Err(EvalError::ShapeMismatch(format!(
            "{} sampled scores cannot be split evenly across {} users",
            scores.len(),
            num_users
        )));
    }
    let width = scores.len() / num_users;
    let dense = Array2::from_shape_vec((num_users, width), scores.to_vec())
        .map_err(|e| EvalError::ShapeMismatch(e.to_string()))?;
    Ok(DenseScores { scores: dense, valid_len: vec![width; num_users] })
}

/// Descending score order; NaN below every number; lower index first on ties.
fn rank_order(a: (usize, f32), b: (usize, f32)) -> Ordering {
    match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => a.0.cmp(&b.0),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)),
    }
}

/// Indices of the `k` best real entries of one row, best first, padded with
/// [`PADDING_INDEX`] when the row has fewer than `k` real entries.
pub fn top_k_row(row: ArrayView1<'_, f32>, valid_len: usize, k: usize) -> Vec<i64> {
    let mut candidates: Vec<(usize, f32)> = row
        .iter()
        .take(valid_len)
        .copied()
        .enumerate()
        .collect();

    let take = k.min(candidates.len());
    if take > 0 && take < candidates.len() {
        candidates.select_nth_unstable_by(take - 1, |a, b| rank_order(*a, *b));
        candidates.truncate(take);
    }
    candidates.sort_by(|a, b| rank_order(*a, *b));
    candidates.truncate(take);

    let mut out: Vec<i64> = candidates.into_iter().map(|(idx, _)| idx as i64).collect();
    out.resize(k, PADDING_INDEX);
    out
}

/// Select the top `k` indices of every row.
pub fn top_k(dense: &DenseScores, k: usize) -> TopKIndexMatrix {
    let rows = dense.scores.nrows();
    let mut out = Array2::from_elem((rows, k), PADDING_INDEX);
    for ((row, &valid), mut out_row) in dense
        .scores
        .rows()
        .into_iter()
        .zip(&dense.valid_len)
        .zip(out.rows_mut())
    {
        for (slot, idx) in out_row.iter_mut().zip(top_k_row(row, valid, k)) {
            *slot = idx;
        }
    }
    out
}

/// Turns score batches into top-K_max index matrices.
#[derive(Debug, Clone, Copy)]
pub struct RaggedScoreCollector {
    k_max: usize,
}

impl RaggedScoreCollector {
    pub fn new(k_max: usize) -> Self {
        Self { k_max }
    }

    pub fn k_max(&self) -> usize {
        self.k_max
    }

    pub fn collect(&self, batch: &ScoreBatch) -> Result<TopKIndexMatrix> {
        let dense = if batch.full {
            pad_ragged(&batch.scores, &batch.user_len_list, self.k_max)?
        } else {
            shape_sampled(&batch.scores, batch.num_users())?
        };
        log::debug!(
            "Collected {} batch: {} users x {} candidates -> top {}",
            if batch.full { "full-sort" } else { "sampled" },
            dense.scores.nrows(),
            dense.scores.ncols(),
            self.k_max
        );
        Ok(top_k(&dense, self.k_max))
    }
}
