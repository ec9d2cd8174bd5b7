use thiserror::Error;

/// Main error type for topkeval
#[derive(Error, Debug)]
pub enum EvalError {
    /// Invalid metric names, cutoffs, or container shapes in the evaluator configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Score, top-K, or ground-truth rows that do not line up
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// File system I/O errors (audit output)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed audit file or pass input
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenient Result type using EvalError
pub type Result<T> = std::result::Result<T, EvalError>;
