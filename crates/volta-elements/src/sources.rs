//! Independent sources: voltage source, current source and the
//! one-post rail. All three share the [`Waveform`] library.

use std::any::Any;

use volta_core::{NodeId, Result};

use crate::context::SimContext;
use crate::element::{Base, Element};
use crate::waveform::Waveform;

// ────────────────────────── VoltageSource ──────────────────────────

/// Independent voltage source between two posts. Post 1 is the positive
/// terminal.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    base: Base,
    pub waveform: Waveform,
    pub amplitude: f64,
    pub bias: f64,
}

impl VoltageSource {
    pub fn new(base: Base, waveform: Waveform, amplitude: f64, bias: f64) -> Self {
        Self {
            base,
            waveform,
            amplitude,
            bias,
        }
    }

    pub fn dc(base: Base, volts: f64) -> Self {
        Self::new(base, Waveform::Dc, volts, 0.0)
    }

    pub fn voltage_at(&self, t: f64) -> f64 {
        self.waveform.value_at(t, self.amplitude, self.bias)
    }
}

impl Element for VoltageSource {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "v"
    }
    fn dump_params(&self) -> Vec<String> {
        dump_waveform(self.waveform, self.amplitude, self.bias)
    }
    fn post_count(&self) -> usize {
        2
    }
    fn voltage_source_count(&self) -> usize {
        1
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        let (neg, pos) = (self.base.nodes[0], self.base.nodes[1]);
        let vs = self.base.vs[0];
        if self.waveform.time_varying() {
            ctx.mna.stamp_voltage_source_dynamic(pos, neg, vs);
        } else {
            ctx.mna.stamp_voltage_source(pos, neg, vs, self.voltage_at(0.0));
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        if self.waveform.time_varying() {
            let v = self.voltage_at(ctx.time);
            ctx.mna.update_voltage_source(self.base.vs[0], v);
        }
    }
    fn set_branch_current(&mut self, _local: usize, current: f64) {
        self.base.current = current;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        // Branch current is positive leaving the positive post into the
        // source row, so the source delivers -current into post 1.
        if post == 1 {
            -self.base.current
        } else {
            self.base.current
        }
    }
    fn info(&self) -> String {
        format!(
            "voltage source {:?} {} V, I = {:.6e} A",
            self.waveform.code(),
            self.amplitude,
            self.base.current
        )
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────── CurrentSource ──────────────────────────

/// Independent current source pushing current from post 0 to post 1.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    base: Base,
    pub waveform: Waveform,
    pub amplitude: f64,
    pub bias: f64,
}

impl CurrentSource {
    pub fn new(base: Base, waveform: Waveform, amplitude: f64, bias: f64) -> Self {
        Self {
            base,
            waveform,
            amplitude,
            bias,
        }
    }

    pub fn dc(base: Base, amps: f64) -> Self {
        Self::new(base, Waveform::Dc, amps, 0.0)
    }

    fn current_at(&self, t: f64) -> f64 {
        self.waveform.value_at(t, self.amplitude, self.bias)
    }
}

impl Element for CurrentSource {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "i"
    }
    fn dump_params(&self) -> Vec<String> {
        dump_waveform(self.waveform, self.amplitude, self.bias)
    }
    fn post_count(&self) -> usize {
        2
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        if self.waveform.time_varying() {
            for node in [self.base.nodes[0], self.base.nodes[1]] {
                if let Some(row) = node.matrix_index() {
                    ctx.mna.mark_right_side_dirty(row);
                }
            }
        } else {
            let i = self.current_at(0.0);
            ctx.mna
                .stamp_current_source(self.base.nodes[0], self.base.nodes[1], i);
            self.base.current = i;
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        if self.waveform.time_varying() {
            let i = self.current_at(ctx.time);
            ctx.mna
                .stamp_current_source(self.base.nodes[0], self.base.nodes[1], i);
            self.base.current = i;
        }
    }
    fn current_into_node(&self, post: usize) -> f64 {
        if post == 1 {
            self.base.current
        } else {
            -self.base.current
        }
    }
    fn info(&self) -> String {
        format!("current source {:.6e} A", self.base.current)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── Rail ──────────────────────────────

/// One-post fixed rail: a voltage source from the post to ground.
#[derive(Debug, Clone)]
pub struct Rail {
    base: Base,
    pub waveform: Waveform,
    pub amplitude: f64,
    pub bias: f64,
}

impl Rail {
    pub fn new(base: Base, waveform: Waveform, amplitude: f64, bias: f64) -> Self {
        Self {
            base,
            waveform,
            amplitude,
            bias,
        }
    }

    pub fn dc(base: Base, volts: f64) -> Self {
        Self::new(base, Waveform::Dc, volts, 0.0)
    }

    fn voltage_at(&self, t: f64) -> f64 {
        self.waveform.value_at(t, self.amplitude, self.bias)
    }
}

impl Element for Rail {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "R"
    }
    fn dump_params(&self) -> Vec<String> {
        dump_waveform(self.waveform, self.amplitude, self.bias)
    }
    fn post_count(&self) -> usize {
        1
    }
    fn voltage_source_count(&self) -> usize {
        1
    }
    fn connects_to_ground(&self) -> bool {
        true
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        let vs = self.base.vs[0];
        if self.waveform.time_varying() {
            ctx.mna
                .stamp_voltage_source_dynamic(self.base.nodes[0], NodeId::GROUND, vs);
        } else {
            ctx.mna.stamp_voltage_source(
                self.base.nodes[0],
                NodeId::GROUND,
                vs,
                self.voltage_at(0.0),
            );
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        if self.waveform.time_varying() {
            let v = self.voltage_at(ctx.time);
            ctx.mna.update_voltage_source(self.base.vs[0], v);
        }
    }
    fn set_branch_current(&mut self, _local: usize, current: f64) {
        self.base.current = current;
    }
    fn current_into_node(&self, _post: usize) -> f64 {
        -self.base.current
    }
    fn info(&self) -> String {
        format!("rail {} V", self.amplitude)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn dump_waveform(waveform: Waveform, amplitude: f64, bias: f64) -> Vec<String> {
    let (freq, p1) = match waveform {
        Waveform::Dc => (0.0, 0.0),
        Waveform::Sine { frequency, phase } => (frequency, phase),
        Waveform::Square { frequency, duty } | Waveform::Pulse { frequency, duty } => {
            (frequency, duty)
        }
    };
    vec![
        waveform.code().to_string(),
        amplitude.to_string(),
        bias.to_string(),
        freq.to_string(),
        p1.to_string(),
    ]
}

/// Rebuild a waveform from its dump columns.
pub fn waveform_from_dump(code: u32, freq: f64, p1: f64) -> Waveform {
    match code {
        1 => Waveform::Sine {
            frequency: freq,
            phase: p1,
        },
        2 => Waveform::Square {
            frequency: freq,
            duty: if p1 > 0.0 { p1 } else { 0.5 },
        },
        3 => Waveform::Pulse {
            frequency: freq,
            duty: if p1 > 0.0 { p1 } else { 0.5 },
        },
        _ => Waveform::Dc,
    }
}
