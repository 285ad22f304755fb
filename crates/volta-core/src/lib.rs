//! Core circuit representation for Volta.
//!
//! This crate holds the pieces every other crate builds on:
//! - [`mna`] - the MNA system with its stamping primitives and row metadata
//! - [`values`] - the triple-buffered computed-value registry
//! - [`labels`] - the labeled-node registry
//! - shared id types and error definitions

pub mod error;
pub mod ids;
pub mod labels;
pub mod mna;
pub mod values;

pub use error::{Error, Result};
pub use ids::{ElementId, NodeId};
pub use labels::LabeledNodes;
pub use mna::{MnaSystem, RowInfo, RowKind};
pub use values::ComputedValues;
