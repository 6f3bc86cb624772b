//! Error types for graphnets.

use thiserror::Error;

/// Graphnets error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error, passed through unchanged.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// Invalid configuration, raised when a block or aggregator is built.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Graph tensors that violate the layout contract.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Group index outside the declared output size.
    #[error("index {index} out of range for dim_size {dim_size}")]
    IndexOutOfRange { index: usize, dim_size: usize },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
