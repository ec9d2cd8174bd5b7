//! Concatenates one pass's batches into pass-level top-K rows.

use crate::error::{EvalError, Result};
use crate::eval::collector::TopKIndexMatrix;
use ndarray::{concatenate, Array2, ArrayView2, Axis};

/// Ordered list of per-batch top-K matrices for a single evaluation pass.
#[derive(Debug, Clone)]
pub struct ResultAccumulator {
    k_max: usize,
    batches: Vec<TopKIndexMatrix>,
}

impl ResultAccumulator {
    pub fn new(k_max: usize) -> Self {
        Self { k_max, batches: Vec::new() }
    }

    pub fn push(&mut self, batch: TopKIndexMatrix) -> Result<()> {
        check_width(&batch, self.k_max)?;
        self.batches.push(batch);
        Ok(())
    }

    pub fn batches(&self) -> &[TopKIndexMatrix] {
        &self.batches
    }

    pub fn rows(&self) -> usize {
        self.batches.iter().map(|b| b.nrows()).sum()
    }

    pub fn into_batches(self) -> Vec<TopKIndexMatrix> {
        self.batches
    }
}

fn check_width(batch: &TopKIndexMatrix, k_max: usize) -> Result<()> {
    if batch.ncols() != k_max {
        return Err(EvalError::ShapeMismatch(format!(
            "top-K batch has {} columns, expected K_max = {}",
            batch.ncols(),
            k_max
        )));
    }
    Ok(())
}

/// Stack batches vertically in collection order and check the result lines up
/// with `expected_rows` ground-truth users.
pub fn concat_batches(
    batches: &[TopKIndexMatrix],
    k_max: usize,
    expected_rows: usize,
) -> Result<TopKIndexMatrix> {
    for batch in batches {
        check_width(batch, k_max)?;
    }
    let stacked = if batches.is_empty() {
        Array2::zeros((0, k_max))
    } else {
        let views: Vec<ArrayView2<'_, i64>> = batches.iter().map(|b| b.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| EvalError::ShapeMismatch(e.to_string()))?
    };
    if stacked.nrows() != expected_rows {
        return Err(EvalError::ShapeMismatch(format!(
            "collected {} top-K rows but ground truth has {} users",
            stacked.nrows(),
            expected_rows
        )));
    }
    Ok(stacked)
}
