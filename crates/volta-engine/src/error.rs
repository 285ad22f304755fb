//! Engine error taxonomy.
//!
//! Topology, analysis, matrix and parse failures halt stepping and
//! surface through `FrameReport.error`; the engine keeps the last valid
//! state. Subiteration non-convergence is a warning carried in the
//! frame report, not an error. Stamp-contract violations panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No ground reference and the ground policy forbids an implicit one.
    #[error("no ground reference in circuit")]
    NoGround,

    /// A voltage source (or wire path) shorts a source terminal pair.
    #[error("voltage source loop at node {node}")]
    VoltageSourceLoop { node: usize },

    /// An element rejected its own configuration while stamping.
    #[error("illegal element configuration: {0}")]
    BadElement(String),

    /// The (possibly simplified) system has no unique solution.
    #[error("singular matrix: circuit cannot be solved for this topology")]
    SingularMatrix,

    #[error(transparent)]
    Parse(#[from] volta_parser::ParseError),
}

impl From<volta_core::Error> for EngineError {
    fn from(err: volta_core::Error) -> Self {
        EngineError::BadElement(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
