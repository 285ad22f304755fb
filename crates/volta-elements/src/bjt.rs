//! Bipolar junction transistor, Ebers-Moll transport form.
//!
//! Posts: 0 = base, 1 = collector, 2 = emitter. Each subiteration
//! linearizes the two junction exponentials and stamps the resulting
//! conductance pattern plus residual currents into the three terminal
//! rows.

use std::any::Any;

use volta_core::{NodeId, Result};

use crate::context::SimContext;
use crate::diode::THERMAL_VOLTAGE;
use crate::element::{Base, Element};

const EXP_LIMIT: f64 = 700.0;

#[derive(Debug, Clone)]
pub struct Bjt {
    base: Base,
    /// +1 for NPN, -1 for PNP.
    pub polarity: f64,
    /// Forward current gain.
    pub beta: f64,
    /// Reverse current gain.
    pub beta_r: f64,
    /// Saturation current.
    pub leakage: f64,
    vcrit: f64,
    last_vbe: f64,
    last_vbc: f64,
    ib: f64,
    ic: f64,
    ie: f64,
}

impl Bjt {
    pub fn new(base: Base, npn: bool, beta: f64) -> Self {
        let leakage = 1e-13;
        let vcrit =
            THERMAL_VOLTAGE * (THERMAL_VOLTAGE / (std::f64::consts::SQRT_2 * leakage)).ln();
        Self {
            base,
            polarity: if npn { 1.0 } else { -1.0 },
            beta,
            beta_r: 1.0,
            leakage,
            vcrit,
            last_vbe: 0.0,
            last_vbc: 0.0,
            ib: 0.0,
            ic: 0.0,
            ie: 0.0,
        }
    }

    fn limit_step(&self, vnew: f64, vold: f64) -> f64 {
        let vt = THERMAL_VOLTAGE;
        if vnew > self.vcrit && (vnew - vold).abs() > 2.0 * vt {
            if vold > 0.0 {
                let arg = 1.0 + (vnew - vold) / vt;
                if arg > 0.0 {
                    vold + vt * arg.ln()
                } else {
                    self.vcrit
                }
            } else {
                vt * (vnew / vt).ln()
            }
        } else {
            vnew
        }
    }

    /// Stamp the linearized terminal current
    /// `I = i_at + gb*(vb-vb0) + gc*(vc-vc0) + ge*(ve-ve0)` leaving the
    /// circuit into terminal `node`.
    #[allow(clippy::too_many_arguments)]
    fn stamp_terminal(
        ctx: &mut SimContext,
        node: NodeId,
        b: NodeId,
        c: NodeId,
        e: NodeId,
        gb: f64,
        gc: f64,
        ge: f64,
        i_resid: f64,
    ) {
        let Some(row) = node.matrix_index() else {
            return;
        };
        if let Some(col) = b.matrix_index() {
            ctx.mna.stamp_matrix(row, col, gb);
        }
        if let Some(col) = c.matrix_index() {
            ctx.mna.stamp_matrix(row, col, gc);
        }
        if let Some(col) = e.matrix_index() {
            ctx.mna.stamp_matrix(row, col, ge);
        }
        ctx.mna.stamp_right_side(row, -i_resid);
    }
}

impl Element for Bjt {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "t"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![
            if self.polarity > 0.0 { "1" } else { "-1" }.to_string(),
            self.beta.to_string(),
        ]
    }
    fn post_count(&self) -> usize {
        3
    }
    fn nonlinear(&self) -> bool {
        true
    }
    fn reset(&mut self) {
        self.last_vbe = 0.0;
        self.last_vbc = 0.0;
        self.ib = 0.0;
        self.ic = 0.0;
        self.ie = 0.0;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        for node in self.base.nodes.clone() {
            if let Some(row) = node.matrix_index() {
                ctx.mna.stamp_nonlinear(row);
            }
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let vt = THERMAL_VOLTAGE;
        let p = self.polarity;
        let (vb, vc, ve) = (self.base.volts[0], self.base.volts[1], self.base.volts[2]);

        let mut vbe = p * (vb - ve);
        let mut vbc = p * (vb - vc);
        if !ctx.within_tolerance(self.last_vbe, vbe) || !ctx.within_tolerance(self.last_vbc, vbc) {
            ctx.not_converged();
        }
        vbe = self.limit_step(vbe, self.last_vbe);
        vbc = self.limit_step(vbc, self.last_vbc);
        self.last_vbe = vbe;
        self.last_vbc = vbc;

        let is = self.leakage;
        let ebe = (vbe / vt).min(EXP_LIMIT).exp();
        let ebc = (vbc / vt).min(EXP_LIMIT).exp();

        // Transport currents (into collector / base, NPN sense)
        let icc = is * (ebe - ebc);
        let ibe = is / self.beta * (ebe - 1.0);
        let ibc = is / self.beta_r * (ebc - 1.0);
        self.ic = p * (icc - ibc);
        self.ib = p * (ibe + ibc);
        self.ie = -(self.ic + self.ib);

        // Junction-voltage partials
        let gc_be = is / vt * ebe;
        let gc_bc = -(is / vt + is / (self.beta_r * vt)) * ebc;
        let gb_be = is / (self.beta * vt) * ebe;
        let gb_bc = is / (self.beta_r * vt) * ebc;
        let ge_be = -(gc_be + gb_be);
        let ge_bc = -(gc_bc + gb_bc);

        let nodes = [self.base.nodes[0], self.base.nodes[1], self.base.nodes[2]];
        let [nb, nc, ne] = nodes;

        // Node-voltage partials: dI/dvb = g_be + g_bc, dI/dvc = -g_bc,
        // dI/dve = -g_be (junction voltages are vbe = p(vb-ve),
        // vbc = p(vb-vc); the polarity squares away).
        let terms = [
            (nc, gc_be, gc_bc, self.ic),
            (nb, gb_be, gb_bc, self.ib),
            (ne, ge_be, ge_bc, self.ie),
        ];
        for (node, g_be, g_bc, i_term) in terms {
            let gb = g_be + g_bc;
            let gc = -g_bc;
            let ge = -g_be;
            let i_resid = i_term - (gb * vb + gc * vc + ge * ve);
            Self::stamp_terminal(ctx, node, nb, nc, ne, gb, gc, ge, i_resid);
        }
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        self.base.current = self.ic;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        match post {
            0 => -self.ib,
            1 => -self.ic,
            2 => -self.ie,
            _ => 0.0,
        }
    }
    fn info(&self) -> String {
        format!(
            "{} beta = {}, Ic = {:.6e} A",
            if self.polarity > 0.0 { "npn" } else { "pnp" },
            self.beta,
            self.ic
        )
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

    fn make_bjt() -> Bjt {
        let mut q = Bjt::new(Base::new(0, 0, 64, 0, 0), true, 100.0);
        q.allocate();
        q.set_node(0, NodeId(1)); // base
        q.set_node(1, NodeId(2)); // collector
        q.set_node(2, NodeId(0)); // emitter grounded
        q
    }

    #[test]
    fn test_terminal_currents_sum_to_zero() {
        let mut rig = TestRig::new(2, 0, 1e-6);
        let mut q = make_bjt();
        q.stamp(&mut rig.ctx()).unwrap();

        q.set_node_voltage(0, 0.65);
        q.set_node_voltage(1, 3.0);
        q.do_step(&mut rig.ctx());

        let sum = q.ib + q.ic + q.ie;
        assert!(sum.abs() < 1e-18, "KCL violated: {sum}");
        // Active region: collector current beta times base current
        assert!(q.ic > 0.0);
        assert!(
            (q.ic / q.ib - 100.0).abs() < 2.0,
            "Ic/Ib = {} (expected ~100)",
            q.ic / q.ib
        );
    }

    #[test]
    fn test_cutoff_no_current() {
        let mut rig = TestRig::new(2, 0, 1e-6);
        let mut q = make_bjt();
        q.stamp(&mut rig.ctx()).unwrap();

        q.set_node_voltage(0, 0.0);
        q.set_node_voltage(1, 5.0);
        q.do_step(&mut rig.ctx());
        assert!(q.ic.abs() < 1e-9, "Ic = {} in cutoff", q.ic);
    }

    #[test]
    fn test_pnp_polarity_flips_currents() {
        let mut rig = TestRig::new(2, 0, 1e-6);
        let mut q = Bjt::new(Base::new(0, 0, 64, 0, 0), false, 100.0);
        q.allocate();
        q.set_node(0, NodeId(1));
        q.set_node(1, NodeId(2));
        q.set_node(2, NodeId(0));
        q.stamp(&mut rig.ctx()).unwrap();

        // PNP forward active: base below emitter, collector lower still
        q.set_node_voltage(0, -0.65);
        q.set_node_voltage(1, -3.0);
        q.do_step(&mut rig.ctx());
        assert!(q.ic < 0.0, "PNP collector current should be negative: {}", q.ic);
    }
}
