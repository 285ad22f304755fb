//! The Volta simulation engine.
//!
//! Ties the element library, expression evaluator and matrix kernel
//! into the per-timestep solve loop:
//!
//! 1. [`topology`] turns the element graph into node indices and the
//!    MNA system shape.
//! 2. Linear element contributions stamp once; the [`lu`] kernel
//!    simplifies and factors the system.
//! 3. [`solver`] iterates nonlinear elements to convergence each
//!    timestep and publishes voltages, currents and computed values.
//! 4. [`engine`] wraps it all behind the [`Engine`] API with a
//!    frame-driven cooperative run loop.

pub mod actions;
pub mod config;
pub mod engine;
pub mod error;
pub mod lu;
pub mod scope;
pub mod solver;
pub mod topology;

pub use actions::ActionSchedule;
pub use config::{EngineConfig, GroundPolicy};
pub use engine::{Engine, FrameReport, ScopeHandle};
pub use error::{EngineError, Result};
pub use scope::ScopeChannel;
