//! High-impedance arithmetic elements.
//!
//! Inputs draw no current; the output post is driven through a
//! voltage-source row whose value is recomputed each subiteration from
//! the input node voltages. Convergence is judged on the computed value
//! itself, never on the resulting output-node voltage (which lags one
//! iteration behind and would force spurious extra passes).

use std::any::Any;

use volta_core::{NodeId, Result};

use crate::context::SimContext;
use crate::element::{Base, Element};

const DIV_EPSILON: f64 = 1e-12;

/// Operation performed by an [`ArithElement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithKind {
    Add,
    Multiply,
    Divide,
    Percent,
    Differentiate,
    Integrate,
}

impl ArithKind {
    pub fn default_inputs(&self) -> usize {
        match self {
            ArithKind::Add | ArithKind::Multiply | ArithKind::Divide => 2,
            _ => 1,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ArithKind::Add => "200",
            ArithKind::Multiply => "201",
            ArithKind::Divide => "202",
            ArithKind::Percent => "203",
            ArithKind::Differentiate => "204",
            ArithKind::Integrate => "205",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ArithKind::Add => "adder",
            ArithKind::Multiply => "multiplier",
            ArithKind::Divide => "divider",
            ArithKind::Percent => "percent",
            ArithKind::Differentiate => "differentiator",
            ArithKind::Integrate => "integrator",
        }
    }
}

/// Arithmetic block: `input_count` input posts, one output post (the
/// last one).
#[derive(Debug, Clone)]
pub struct ArithElement {
    base: Base,
    pub kind: ArithKind,
    input_count: usize,
    last_out: f64,
    /// Committed integrator output / differentiator input.
    state: f64,
    state_pending: f64,
}

impl ArithElement {
    pub fn new(base: Base, kind: ArithKind, input_count: usize) -> Self {
        Self {
            base,
            kind,
            input_count: input_count.max(1),
            last_out: 0.0,
            state: 0.0,
            state_pending: 0.0,
        }
    }

    pub fn with_defaults(base: Base, kind: ArithKind) -> Self {
        let inputs = kind.default_inputs();
        Self::new(base, kind, inputs)
    }

    fn compute(&mut self, dt: f64) -> f64 {
        let inputs = &self.base.volts[..self.input_count];
        match self.kind {
            ArithKind::Add => inputs.iter().sum(),
            ArithKind::Multiply => inputs.iter().product(),
            ArithKind::Divide => {
                if inputs[1].abs() < DIV_EPSILON {
                    0.0
                } else {
                    inputs[0] / inputs[1]
                }
            }
            ArithKind::Percent => inputs[0] * 100.0,
            ArithKind::Differentiate => {
                let out = if dt.abs() < DIV_EPSILON {
                    0.0
                } else {
                    (inputs[0] - self.state) / dt
                };
                self.state_pending = inputs[0];
                out
            }
            ArithKind::Integrate => {
                let out = self.state + dt * inputs[0];
                self.state_pending = out;
                out
            }
        }
    }
}

impl Element for ArithElement {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        self.kind.code()
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.input_count.to_string()]
    }
    fn post_count(&self) -> usize {
        self.input_count + 1
    }
    fn voltage_source_count(&self) -> usize {
        1
    }
    fn nonlinear(&self) -> bool {
        true
    }
    fn connects_to_ground(&self) -> bool {
        true
    }
    fn get_connection(&self, _a: usize, _b: usize) -> bool {
        false
    }
    fn reset(&mut self) {
        self.last_out = 0.0;
        self.state = 0.0;
        self.state_pending = 0.0;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        let out = self.base.nodes[self.input_count];
        ctx.mna
            .stamp_voltage_source_dynamic(out, NodeId::GROUND, self.base.vs[0]);
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let out = self.compute(ctx.dt);
        if !ctx.within_tolerance(self.last_out, out) {
            ctx.not_converged();
        }
        self.last_out = out;
        ctx.mna.update_voltage_source(self.base.vs[0], out);
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        if matches!(self.kind, ArithKind::Differentiate | ArithKind::Integrate) {
            self.state = self.state_pending;
        }
    }
    fn set_branch_current(&mut self, _local: usize, current: f64) {
        self.base.current = current;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        if post == self.input_count {
            -self.base.current
        } else {
            0.0
        }
    }
    fn info(&self) -> String {
        format!("{} out = {:.6}", self.kind.name(), self.last_out)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
