//! Wires, ground, switches and the passive R/C/L elements.

use std::any::Any;

use volta_core::Result;

use crate::context::{IntegrationMethod, SimContext};
use crate::element::{Base, Element};

// ────────────────────────────── Wire ──────────────────────────────

/// Zero-resistance connection; folded into the wire closure.
#[derive(Debug, Clone)]
pub struct Wire {
    base: Base,
}

impl Wire {
    pub fn new(base: Base) -> Self {
        Self { base }
    }
}

impl Element for Wire {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "w"
    }
    fn dump_params(&self) -> Vec<String> {
        Vec::new()
    }
    fn post_count(&self) -> usize {
        2
    }
    fn is_wire(&self) -> bool {
        true
    }
    fn stamp(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }
    fn info(&self) -> String {
        "wire".to_string()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── Ground ──────────────────────────────

/// Ground reference post. Its component becomes node 0.
#[derive(Debug, Clone)]
pub struct Ground {
    base: Base,
}

impl Ground {
    pub fn new(base: Base) -> Self {
        Self { base }
    }
}

impl Element for Ground {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "g"
    }
    fn dump_params(&self) -> Vec<String> {
        Vec::new()
    }
    fn post_count(&self) -> usize {
        1
    }
    fn has_ground_post(&self, _post: usize) -> bool {
        true
    }
    fn stamp(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }
    fn info(&self) -> String {
        "ground".to_string()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── Switch ──────────────────────────────

/// SPST switch. Closed it is wire-equivalent; open it conducts nothing.
/// Toggling must set the engine's analyze flag.
#[derive(Debug, Clone)]
pub struct Switch {
    base: Base,
    pub closed: bool,
}

impl Switch {
    pub fn new(base: Base, closed: bool) -> Self {
        Self { base, closed }
    }

    pub fn toggle(&mut self) {
        self.closed = !self.closed;
    }
}

impl Element for Switch {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "s"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![if self.closed { "1" } else { "0" }.to_string()]
    }
    fn post_count(&self) -> usize {
        2
    }
    fn is_wire(&self) -> bool {
        self.closed
    }
    fn get_connection(&self, _a: usize, _b: usize) -> bool {
        self.closed
    }
    fn stamp(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }
    fn info(&self) -> String {
        format!("switch ({})", if self.closed { "closed" } else { "open" })
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── Resistor ──────────────────────────────

#[derive(Debug, Clone)]
pub struct Resistor {
    base: Base,
    pub resistance: f64,
}

impl Resistor {
    pub fn new(base: Base, resistance: f64) -> Self {
        Self { base, resistance }
    }

    fn through_current(&self) -> f64 {
        (self.base.volts[0] - self.base.volts[1]) / self.resistance
    }
}

impl Element for Resistor {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "r"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.resistance.to_string()]
    }
    fn post_count(&self) -> usize {
        2
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        ctx.mna
            .stamp_resistor(self.base.nodes[0], self.base.nodes[1], self.resistance)
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        self.base.current = self.through_current();
    }
    fn current_into_node(&self, post: usize) -> f64 {
        let i = self.through_current();
        if post == 0 { -i } else { i }
    }
    fn info(&self) -> String {
        format!("resistor {} ohm, I = {:.6e} A", self.resistance, self.base.current)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── Capacitor ──────────────────────────────

/// Capacitor via its per-timestep companion model: a resistor
/// `dt/C` (backward Euler) or `dt/2C` (trapezoidal) in parallel with a
/// history current source.
#[derive(Debug, Clone)]
pub struct Capacitor {
    base: Base,
    pub capacitance: f64,
    /// Committed voltage across the capacitor.
    voltdiff: f64,
    comp_resistance: f64,
    cur_source_val: f64,
}

impl Capacitor {
    pub fn new(base: Base, capacitance: f64) -> Self {
        Self {
            base,
            capacitance,
            voltdiff: 0.0,
            comp_resistance: 0.0,
            cur_source_val: 0.0,
        }
    }

    /// Committed voltage across the capacitor.
    pub fn voltage(&self) -> f64 {
        self.voltdiff
    }

    /// Seed the committed voltage (initial conditions).
    pub fn set_voltage(&mut self, v: f64) {
        self.voltdiff = v;
    }
}

impl Element for Capacitor {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "c"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.capacitance.to_string(), self.voltdiff.to_string()]
    }
    fn post_count(&self) -> usize {
        2
    }
    fn reset(&mut self) {
        self.voltdiff = 0.0;
        self.cur_source_val = 0.0;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        self.comp_resistance = match ctx.method {
            IntegrationMethod::BackwardEuler => ctx.dt / self.capacitance,
            IntegrationMethod::Trapezoidal => ctx.dt / (2.0 * self.capacitance),
        };
        ctx.mna
            .stamp_resistor(self.base.nodes[0], self.base.nodes[1], self.comp_resistance)?;
        for node in [self.base.nodes[0], self.base.nodes[1]] {
            if let Some(row) = node.matrix_index() {
                ctx.mna.mark_right_side_dirty(row);
            }
        }
        Ok(())
    }
    fn start_iteration(&mut self, ctx: &mut SimContext) {
        self.cur_source_val = match ctx.method {
            IntegrationMethod::BackwardEuler => self.voltdiff / self.comp_resistance,
            IntegrationMethod::Trapezoidal => {
                self.voltdiff / self.comp_resistance + self.base.current
            }
        };
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        // History current flows from the negative post to the positive.
        ctx.mna
            .stamp_current_source(self.base.nodes[1], self.base.nodes[0], self.cur_source_val);
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        let v = self.base.volts[0] - self.base.volts[1];
        self.base.current = v / self.comp_resistance - self.cur_source_val;
        self.voltdiff = v;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        if post == 0 { -self.base.current } else { self.base.current }
    }
    fn info(&self) -> String {
        format!(
            "capacitor {} F, V = {:.6} V, I = {:.6e} A",
            self.capacitance, self.voltdiff, self.base.current
        )
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── Inductor ──────────────────────────────

/// Inductor companion model: conductance `dt/L` (backward Euler) or
/// `dt/2L` (trapezoidal) in parallel with a history current source
/// carrying the committed inductor current.
#[derive(Debug, Clone)]
pub struct Inductor {
    base: Base,
    pub inductance: f64,
    voltdiff: f64,
    comp_conductance: f64,
    cur_source_val: f64,
}

impl Inductor {
    pub fn new(base: Base, inductance: f64) -> Self {
        Self {
            base,
            inductance,
            voltdiff: 0.0,
            comp_conductance: 0.0,
            cur_source_val: 0.0,
        }
    }

    /// Committed inductor current.
    pub fn current(&self) -> f64 {
        self.base.current
    }

    pub fn set_current(&mut self, i: f64) {
        self.base.current = i;
    }
}

impl Element for Inductor {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "l"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.inductance.to_string(), self.base.current.to_string()]
    }
    fn post_count(&self) -> usize {
        2
    }
    fn reset(&mut self) {
        self.voltdiff = 0.0;
        self.cur_source_val = 0.0;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        self.comp_conductance = match ctx.method {
            IntegrationMethod::BackwardEuler => ctx.dt / self.inductance,
            IntegrationMethod::Trapezoidal => ctx.dt / (2.0 * self.inductance),
        };
        ctx.mna
            .stamp_conductance(self.base.nodes[0], self.base.nodes[1], self.comp_conductance);
        for node in [self.base.nodes[0], self.base.nodes[1]] {
            if let Some(row) = node.matrix_index() {
                ctx.mna.mark_right_side_dirty(row);
            }
        }
        Ok(())
    }
    fn start_iteration(&mut self, ctx: &mut SimContext) {
        self.cur_source_val = match ctx.method {
            IntegrationMethod::BackwardEuler => self.base.current,
            IntegrationMethod::Trapezoidal => {
                self.base.current + self.comp_conductance * self.voltdiff
            }
        };
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        // History current keeps flowing from post 0 through to post 1.
        ctx.mna
            .stamp_current_source(self.base.nodes[0], self.base.nodes[1], self.cur_source_val);
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        let v = self.base.volts[0] - self.base.volts[1];
        self.base.current = self.cur_source_val + self.comp_conductance * v;
        self.voltdiff = v;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        if post == 0 { -self.base.current } else { self.base.current }
    }
    fn info(&self) -> String {
        format!(
            "inductor {} H, I = {:.6e} A",
            self.inductance, self.base.current
        )
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
