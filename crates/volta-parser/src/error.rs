//! Parse errors for both text formats.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: {reason}")]
    BadLine { line: usize, reason: String },

    #[error("line {line}: invalid number '{text}'")]
    BadNumber { line: usize, text: String },

    #[error("line {line}: invalid expression: {source}")]
    BadExpression {
        line: usize,
        #[source]
        source: volta_expr::ParseError,
    },

    #[error("unterminated @{block} block starting at line {line}")]
    UnterminatedBlock { block: String, line: usize },

    #[error("empty input")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ParseError>;
