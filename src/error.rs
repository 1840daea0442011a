//! Error types for answerspace.

use thiserror::Error;

/// Answerspace error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid configuration (unknown operator, distance or aggregation name,
    /// out-of-range hyperparameter).
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Tensor shape does not match what the operation requires.
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// An index tensor refers outside its valid range.
    #[error("{what} index {index} out of range [0, {bound})")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        bound: usize,
    },
}

impl Error {
    pub(crate) fn mismatch(what: &'static str, expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { what, expected, got }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
