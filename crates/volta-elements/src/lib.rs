//! Circuit element library.
//!
//! Every element implements the [`Element`] trait: it declares its
//! resource needs (posts, internal nodes, voltage sources), stamps its
//! linear contribution once per topology analysis, and participates in
//! the per-timestep iteration through `start_iteration` / `do_step` /
//! `step_finished`.
//!
//! Element groups:
//! - Wire-class: [`passive::Wire`], [`passive::Ground`],
//!   [`misc::LabeledNode`], [`passive::Switch`]
//! - Passives: [`passive::Resistor`], [`passive::Capacitor`],
//!   [`passive::Inductor`]
//! - Sources: [`sources::VoltageSource`], [`sources::CurrentSource`],
//!   [`sources::Rail`] with the shared [`Waveform`] library
//! - Controlled sources: [`controlled`]
//! - Semiconductors: [`diode::Diode`], [`bjt::Bjt`],
//!   [`mosfet::Mosfet`], [`opamp::OpAmp`]
//! - High-impedance arithmetic: [`arith`]
//! - SFC extension: [`table::EquationTable`], [`godley::GodleyTable`]
//! - Structure: [`composite::Composite`], [`misc::StopTrigger`]

pub mod arith;
pub mod bjt;
pub mod composite;
pub mod context;
pub mod controlled;
pub mod diode;
pub mod element;
pub mod godley;
pub mod misc;
pub mod mosfet;
pub mod opamp;
pub mod passive;
pub mod sources;
pub mod table;
#[cfg(test)]
pub(crate) mod testutil;
pub mod waveform;

pub use context::{IntegrationMethod, SimContext};
pub use element::{Base, Element, Point};
pub use waveform::Waveform;
