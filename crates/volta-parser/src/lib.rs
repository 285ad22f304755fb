//! Circuit text and SFC model parsing.
//!
//! Two input formats:
//! - the native circuit dump format (one line per element, `$` options
//!   line, `%` metadata sections), parsed by [`circuit`];
//! - the human-readable SFC block format (`@init`, `@matrix`,
//!   `@equations`, ...), parsed by [`sfc`].
//!
//! [`parse_auto`] detects the format: any line opening an `@` block
//! selects the SFC reader.

pub mod circuit;
pub mod error;
pub mod escape;
pub mod sfc;
pub mod types;

pub use circuit::{export, parse_circuit};
pub use error::{ParseError, Result};
pub use sfc::parse_sfc;
pub use types::{
    ActionKind, ActionRecord, ParsedCircuit, ScopeKind, ScopeRequest, SimOptions,
};

/// Parse either format, auto-detected.
pub fn parse_auto(text: &str) -> Result<ParsedCircuit> {
    if sfc::looks_like_sfc(text) {
        sfc::parse_sfc(text)
    } else {
        circuit::parse_circuit(text)
    }
}
