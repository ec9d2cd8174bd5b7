//! Per-user ground truth for one evaluation pass.

use crate::error::{EvalError, Result};
use serde::Deserialize;
use std::collections::HashSet;

/// Positive items per user, row-aligned with the collected top-K batches.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    users: Vec<i64>,
    positives: Vec<HashSet<i64>>,
    pos_len: Vec<usize>,
}

/// Serialized form: user ids plus positive item ids per user.
#[derive(Debug, Clone, Deserialize)]
pub struct GroundTruthRecord {
    pub users: Vec<i64>,
    pub positives: Vec<Vec<i64>>,
    #[serde(default)]
    pub pos_len: Option<Vec<usize>>,
}

impl GroundTruth {
    /// Build from per-user item lists. Duplicate ids collapse; the positive
    /// count of each user is the size of the resulting set.
    pub fn new(users: Vec<i64>, positives: Vec<Vec<i64>>) -> Result<Self> {
        let positives: Vec<HashSet<i64>> = positives
            .into_iter()
            .map(|items| items.into_iter().collect())
            .collect();
        let pos_len = positives.iter().map(HashSet::len).collect();
        Self::with_lengths(users, positives, pos_len)
    }

    /// Build with explicit positive counts for collaborators whose normaliser
    /// differs from the set size.
    pub fn with_lengths(
        users: Vec<i64>,
        positives: Vec<HashSet<i64>>,
        pos_len: Vec<usize>,
    ) -> Result<Self> {
        if users.len() != positives.len() || positives.len() != pos_len.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "ground truth rows disagree: {} users, {} positive sets, {} positive lengths",
                users.len(),
                positives.len(),
                pos_len.len()
            )));
        }
        Ok(Self { users, positives, pos_len })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> &[i64] {
        &self.users
    }

    pub fn positives(&self) -> &[HashSet<i64>] {
        &self.positives
    }

    pub fn pos_len(&self) -> &[usize] {
        &self.pos_len
    }
}

impl TryFrom<GroundTruthRecord> for GroundTruth {
    type Error = EvalError;

    fn try_from(record: GroundTruthRecord) -> Result<Self> {
        match record.pos_len {
            Some(pos_len) => {
                let positives = record
                    .positives
                    .into_iter()
                    .map(|items| items.into_iter().collect())
                    .collect();
                GroundTruth::with_lengths(record.users, positives, pos_len)
            }
            None => GroundTruth::new(record.users, record.positives),
        }
    }
}
