//! Recommendation audit files: the top-K item indices per user, tab separated.

use crate::error::{EvalError, Result};
use crate::eval::collector::TopKIndexMatrix;
use chrono::Local;
use ndarray::Array2;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Naming context for audit files.
#[derive(Debug, Clone)]
pub struct AuditTarget {
    pub output_dir: PathBuf,
    pub dataset: String,
    pub model: String,
}

impl AuditTarget {
    /// `{model}-{dataset}-idx{index}-top{k_max}-{timestamp}.csv` under the
    /// absolute output directory.
    pub fn file_path(&self, index: usize, k_max: usize, timestamp: &str) -> Result<PathBuf> {
        let dir = if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            std::env::current_dir()?.join(&self.output_dir)
        };
        Ok(dir.join(format!(
            "{}-{}-idx{}-top{}-{}.csv",
            self.model, self.dataset, index, k_max, timestamp
        )))
    }
}

/// Local time in the file-name format, e.g. `Oct-16-2026-09-41-07`.
pub fn local_timestamp() -> String {
    Local::now().format("%b-%d-%Y-%H-%M-%S").to_string()
}

/// Persists top-K recommendations for inspection.
#[derive(Debug, Clone)]
pub struct RecommendationAuditWriter {
    target: AuditTarget,
}

impl RecommendationAuditWriter {
    pub fn new(target: AuditTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &AuditTarget {
        &self.target
    }

    /// Write `topk` for the pass with the given index; returns the file path.
    pub fn write(&self, users: &[i64], topk: &TopKIndexMatrix, index: usize) -> Result<PathBuf> {
        let path = self.target.file_path(index, topk.ncols(), &local_timestamp())?;
        write_recommendations(&path, users, topk)?;
        log::info!(
            "Saved top-{} recommendations for {} users to {}",
            topk.ncols(),
            users.len(),
            path.display()
        );
        Ok(path)
    }
}

/// Write `id, top_0 .. top_{K-1}` rows to `path`, creating parent directories.
pub fn write_recommendations(path: &Path, users: &[i64], topk: &TopKIndexMatrix) -> Result<()> {
    if users.len() != topk.nrows() {
        return Err(EvalError::ShapeMismatch(format!(
            "{} user ids for {} recommendation rows",
            users.len(),
            topk.nrows()
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(path)?);
    let mut header = vec!["id".to_string()];
    header.extend((0..topk.ncols()).map(|i| format!("top_{}", i)));
    writeln!(out, "{}", header.join("\t"))?;

    for (user, row) in users.iter().zip(topk.rows()) {
        write!(out, "{}", user)?;
        for idx in row {
            write!(out, "\t{}", idx)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Parse an audit file back into user ids and the top-K matrix.
pub fn read_recommendations(path: &Path) -> Result<(Vec<i64>, TopKIndexMatrix)> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(EvalError::Parse(format!("{} is empty", path.display()))),
    };
    let columns: Vec<&str> = header.split('\t').collect();
    if columns.first() != Some(&"id") {
        return Err(EvalError::Parse(format!(
            "{}: header must start with 'id', got '{}'",
            path.display(),
            header
        )));
    }
    let k = columns.len() - 1;

    let mut users = Vec::new();
    let mut values = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let fields = line
            .split('\t')
            .map(|f| {
                f.parse::<i64>().map_err(|e| {
                    EvalError::Parse(format!("line {}: '{}': {}", line_no + 2, f, e))
                })
            })
            .collect::<Result<Vec<i64>>>()?;
        if fields.len() != k + 1 {
            return Err(EvalError::Parse(format!(
                "line {}: expected {} columns, got {}",
                line_no + 2,
                k + 1,
                fields.len()
            )));
        }
        users.push(fields[0]);
        values.extend_from_slice(&fields[1..]);
    }

    let topk = Array2::from_shape_vec((users.len(), k), values)
        .map_err(|e| EvalError::Parse(e.to_string()))?;
    Ok((users, topk))
}
