//! Expression parse errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{name} takes {expected} argument(s), got {actual}")]
    WrongArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid number at offset {0}")]
    InvalidNumber(usize),

    #[error("unbalanced parentheses")]
    UnbalancedParens,
}

pub type Result<T> = std::result::Result<T, ParseError>;
