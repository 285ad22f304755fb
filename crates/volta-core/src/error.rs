//! Error types for the core crate.

use thiserror::Error;

/// Errors from core matrix and registry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Matrix dimensions don't match the operation.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An element parameter is outside its legal range.
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

pub type Result<T> = std::result::Result<T, Error>;
