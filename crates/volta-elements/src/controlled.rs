//! Controlled source elements: VCVS, VCCS, CCCS, CCVS.
//!
//! The current-controlled pair senses its control current through an
//! internal 0 V source in series with posts 0-1, the same trick an
//! ammeter uses. Posts 2-3 are the output side on all four elements.

use std::any::Any;

use volta_core::Result;

use crate::context::SimContext;
use crate::element::{Base, Element};

// ────────────────────────────── VCVS ──────────────────────────────

/// Voltage-controlled voltage source:
/// `V(out+, out-) = gain * V(ctrl+, ctrl-)`.
///
/// Posts: 0 = ctrl+, 1 = ctrl-, 2 = out+, 3 = out-.
#[derive(Debug, Clone)]
pub struct Vcvs {
    base: Base,
    pub gain: f64,
}

impl Vcvs {
    pub fn new(base: Base, gain: f64) -> Self {
        Self { base, gain }
    }
}

impl Element for Vcvs {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "220"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.gain.to_string()]
    }
    fn post_count(&self) -> usize {
        4
    }
    fn voltage_source_count(&self) -> usize {
        1
    }
    fn get_connection(&self, a: usize, b: usize) -> bool {
        // Control side is high-impedance and isolated from the output.
        (a < 2 && b < 2) || (a >= 2 && b >= 2)
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        let [cp, cn, op, on] = [
            self.base.nodes[0],
            self.base.nodes[1],
            self.base.nodes[2],
            self.base.nodes[3],
        ];
        let row = ctx.mna.vsource_row(self.base.vs[0]);
        ctx.mna.stamp_voltage_source(op, on, self.base.vs[0], 0.0);
        // Branch equation picks up -gain * V(ctrl)
        if let Some(c) = cp.matrix_index() {
            ctx.mna.stamp_matrix(row, c, -self.gain);
        }
        if let Some(c) = cn.matrix_index() {
            ctx.mna.stamp_matrix(row, c, self.gain);
        }
        Ok(())
    }
    fn set_branch_current(&mut self, _local: usize, current: f64) {
        self.base.current = current;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        match post {
            2 => -self.base.current,
            3 => self.base.current,
            _ => 0.0,
        }
    }
    fn info(&self) -> String {
        format!("vcvs gain {}", self.gain)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── VCCS ──────────────────────────────

/// Voltage-controlled current source:
/// `I(out+ → out-) = gm * V(ctrl+, ctrl-)`.
///
/// Posts: 0 = ctrl+, 1 = ctrl-, 2 = out+, 3 = out-.
#[derive(Debug, Clone)]
pub struct Vccs {
    base: Base,
    pub gm: f64,
}

impl Vccs {
    pub fn new(base: Base, gm: f64) -> Self {
        Self { base, gm }
    }
}

impl Element for Vccs {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "221"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.gm.to_string()]
    }
    fn post_count(&self) -> usize {
        4
    }
    fn get_connection(&self, a: usize, b: usize) -> bool {
        (a < 2 && b < 2) || (a >= 2 && b >= 2)
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        ctx.mna.stamp_vccs(
            self.base.nodes[2],
            self.base.nodes[3],
            self.base.nodes[0],
            self.base.nodes[1],
            self.gm,
        );
        Ok(())
    }
    fn step_finished(&mut self, ctx: &mut SimContext) {
        let vc = ctx.node_voltage(self.base.nodes[0]) - ctx.node_voltage(self.base.nodes[1]);
        self.base.current = self.gm * vc;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        match post {
            2 => self.base.current,
            3 => -self.base.current,
            _ => 0.0,
        }
    }
    fn info(&self) -> String {
        format!("vccs gm {}", self.gm)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── CCCS ──────────────────────────────

/// Current-controlled current source:
/// `I(out+ → out-) = gain * I(sense)`.
///
/// Posts: 0 = sense in, 1 = sense out, 2 = out+, 3 = out-.
#[derive(Debug, Clone)]
pub struct Cccs {
    base: Base,
    pub gain: f64,
}

impl Cccs {
    pub fn new(base: Base, gain: f64) -> Self {
        Self { base, gain }
    }
}

impl Element for Cccs {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "222"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.gain.to_string()]
    }
    fn post_count(&self) -> usize {
        4
    }
    fn voltage_source_count(&self) -> usize {
        1
    }
    fn get_connection(&self, a: usize, b: usize) -> bool {
        (a < 2 && b < 2) || (a >= 2 && b >= 2)
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        // 0V sense source between posts 0 and 1
        ctx.mna
            .stamp_voltage_source(self.base.nodes[0], self.base.nodes[1], self.base.vs[0], 0.0);
        ctx.mna.stamp_cccs(
            self.base.nodes[2],
            self.base.nodes[3],
            self.base.vs[0],
            self.gain,
        );
        Ok(())
    }
    fn set_branch_current(&mut self, _local: usize, current: f64) {
        self.base.current = current;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        match post {
            0 => self.base.current,
            1 => -self.base.current,
            2 => self.gain * self.base.current,
            3 => -self.gain * self.base.current,
            _ => 0.0,
        }
    }
    fn info(&self) -> String {
        format!("cccs gain {}", self.gain)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── CCVS ──────────────────────────────

/// Current-controlled voltage source:
/// `V(out+, out-) = r * I(sense)`.
///
/// Posts: 0 = sense in, 1 = sense out, 2 = out+, 3 = out-.
#[derive(Debug, Clone)]
pub struct Ccvs {
    base: Base,
    pub transresistance: f64,
}

impl Ccvs {
    pub fn new(base: Base, transresistance: f64) -> Self {
        Self {
            base,
            transresistance,
        }
    }
}

impl Element for Ccvs {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "223"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.transresistance.to_string()]
    }
    fn post_count(&self) -> usize {
        4
    }
    fn voltage_source_count(&self) -> usize {
        2
    }
    fn get_connection(&self, a: usize, b: usize) -> bool {
        (a < 2 && b < 2) || (a >= 2 && b >= 2)
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        // Sense source is vs[0], output source is vs[1].
        ctx.mna
            .stamp_voltage_source(self.base.nodes[0], self.base.nodes[1], self.base.vs[0], 0.0);
        ctx.mna
            .stamp_voltage_source(self.base.nodes[2], self.base.nodes[3], self.base.vs[1], 0.0);
        // Output branch equation: V(out) - r * I(sense) = 0
        let out_row = ctx.mna.vsource_row(self.base.vs[1]);
        let sense_col = ctx.mna.vsource_row(self.base.vs[0]);
        ctx.mna.stamp_matrix(out_row, sense_col, -self.transresistance);
        Ok(())
    }
    fn set_branch_current(&mut self, local: usize, current: f64) {
        if local == 0 {
            self.base.current = current;
        }
    }
    fn current_into_node(&self, post: usize) -> f64 {
        match post {
            0 => self.base.current,
            1 => -self.base.current,
            _ => 0.0,
        }
    }
    fn info(&self) -> String {
        format!("ccvs r {}", self.transresistance)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRig;
    use volta_core::NodeId;

    fn wire_up(elm: &mut dyn Element, nodes: &[usize], vs_base: usize) {
        elm.allocate();
        for (i, n) in nodes.iter().enumerate() {
            elm.set_node(i, NodeId(*n));
        }
        for i in 0..elm.voltage_source_count() {
            elm.set_voltage_source(i, vs_base + i);
        }
    }

    #[test]
    fn test_vcvs_branch_equation() {
        let mut rig = TestRig::new(4, 1, 1e-6);
        let mut e = Vcvs::new(Base::new(0, 0, 64, 0, 0), 2.0);
        wire_up(&mut e, &[1, 2, 3, 4], 0);
        e.stamp(&mut rig.ctx()).unwrap();

        let row = 4; // vsource row after 4 nodes
        // V(out+) - V(out-) - gain*V(ctrl+) + gain*V(ctrl-) = 0
        assert_eq!(rig.mna.matrix()[(row, 2)], 1.0);
        assert_eq!(rig.mna.matrix()[(row, 3)], -1.0);
        assert_eq!(rig.mna.matrix()[(row, 0)], -2.0);
        assert_eq!(rig.mna.matrix()[(row, 1)], 2.0);
        // Branch current couples into the output nodes only
        assert_eq!(rig.mna.matrix()[(2, row)], 1.0);
        assert_eq!(rig.mna.matrix()[(3, row)], -1.0);
        assert_eq!(rig.mna.matrix()[(0, row)], 0.0);
    }

    #[test]
    fn test_cccs_couples_to_sense_current() {
        let mut rig = TestRig::new(4, 1, 1e-6);
        let mut f = Cccs::new(Base::new(0, 0, 64, 0, 0), 3.0);
        wire_up(&mut f, &[1, 2, 3, 4], 0);
        f.stamp(&mut rig.ctx()).unwrap();

        let sense_col = 4;
        // gain * i_sense enters out+ (node 3, row 2)
        assert_eq!(rig.mna.matrix()[(2, sense_col)], -3.0);
        assert_eq!(rig.mna.matrix()[(3, sense_col)], 3.0);
    }

    #[test]
    fn test_ccvs_output_row() {
        let mut rig = TestRig::new(4, 2, 1e-6);
        let mut h = Ccvs::new(Base::new(0, 0, 64, 0, 0), 50.0);
        wire_up(&mut h, &[1, 2, 3, 4], 0);
        h.stamp(&mut rig.ctx()).unwrap();

        let out_row = 5;
        let sense_col = 4;
        assert_eq!(rig.mna.matrix()[(out_row, 2)], 1.0);
        assert_eq!(rig.mna.matrix()[(out_row, 3)], -1.0);
        assert_eq!(rig.mna.matrix()[(out_row, sense_col)], -50.0);
    }
}
