//! MOSFET: square-law channel with subthreshold smoothing.
//!
//! Posts: 0 = gate, 1 = drain, 2 = source. The overdrive voltage goes
//! through a softplus so the device stays differentiable through the
//! threshold instead of kinking, which keeps Newton-Raphson out of
//! limit cycles around cutoff.

use std::any::Any;

use volta_core::Result;

use crate::context::SimContext;
use crate::element::{Base, Element};

/// Subthreshold slope voltage (n * kT/q with n = 2).
const SLOPE_V: f64 = 0.05173;

/// Residual channel conductance.
const G_MIN: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct Mosfet {
    base: Base,
    /// +1 for n-channel, -1 for p-channel.
    pub polarity: f64,
    /// Threshold voltage.
    pub threshold: f64,
    /// Transconductance parameter (A/V^2).
    pub beta: f64,
    last_vgs: f64,
    last_vds: f64,
    /// Channel current, positive post1 → post2 internally.
    ids: f64,
}

impl Mosfet {
    pub fn new(base: Base, n_channel: bool, threshold: f64, beta: f64) -> Self {
        Self {
            base,
            polarity: if n_channel { 1.0 } else { -1.0 },
            threshold,
            beta,
            last_vgs: 0.0,
            last_vds: 0.0,
            ids: 0.0,
        }
    }

    /// Smooth overdrive: softplus of `vgs - threshold` and its
    /// derivative with respect to vgs.
    fn overdrive(&self, vgs: f64) -> (f64, f64) {
        let x = (vgs - self.threshold) / SLOPE_V;
        if x > 40.0 {
            (vgs - self.threshold, 1.0)
        } else if x < -40.0 {
            let e = x.exp();
            (SLOPE_V * e, e)
        } else {
            let e = x.exp();
            (SLOPE_V * (1.0 + e).ln(), e / (1.0 + e))
        }
    }
}

impl Element for Mosfet {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "f"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![
            if self.polarity > 0.0 { "1" } else { "-1" }.to_string(),
            self.threshold.to_string(),
            self.beta.to_string(),
        ]
    }
    fn post_count(&self) -> usize {
        3
    }
    fn nonlinear(&self) -> bool {
        true
    }
    fn get_connection(&self, a: usize, b: usize) -> bool {
        // Gate draws no current.
        a != 0 && b != 0
    }
    fn reset(&mut self) {
        self.last_vgs = 0.0;
        self.last_vds = 0.0;
        self.ids = 0.0;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        for node in [self.base.nodes[1], self.base.nodes[2]] {
            if let Some(row) = node.matrix_index() {
                ctx.mna.stamp_nonlinear(row);
            }
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let p = self.polarity;
        let vg = self.base.volts[0];

        // The channel is symmetric: operate on whichever end is the
        // effective source for the present bias.
        let reversed = p * (self.base.volts[1] - self.base.volts[2]) < 0.0;
        let (dn, sn) = if reversed {
            (self.base.nodes[2], self.base.nodes[1])
        } else {
            (self.base.nodes[1], self.base.nodes[2])
        };
        let (vdn, vsn) = if reversed {
            (self.base.volts[2], self.base.volts[1])
        } else {
            (self.base.volts[1], self.base.volts[2])
        };

        let vgs = p * (vg - vsn);
        let vds = p * (vdn - vsn);
        if !ctx.within_tolerance(self.last_vgs, vgs) || !ctx.within_tolerance(self.last_vds, vds) {
            ctx.not_converged();
        }
        self.last_vgs = vgs;
        self.last_vds = vds;

        let (vov, dvov) = self.overdrive(vgs);
        let (ids, gm, gds);
        if vds < vov {
            // Triode
            ids = self.beta * (vov * vds - 0.5 * vds * vds);
            gm = self.beta * vds * dvov;
            gds = self.beta * (vov - vds) + G_MIN;
        } else {
            // Saturation
            ids = 0.5 * self.beta * vov * vov;
            gm = self.beta * vov * dvov;
            gds = G_MIN;
        }

        // Linearized drain current in node voltages:
        // dI/dvg = gm, dI/dvd = gds, dI/dvs = -(gm + gds)
        let i0 = p * ids - (gm * vg + gds * vdn - (gm + gds) * vsn);

        let gate = self.base.nodes[0];
        if let Some(row) = dn.matrix_index() {
            if let Some(col) = gate.matrix_index() {
                ctx.mna.stamp_matrix(row, col, gm);
            }
            if let Some(col) = dn.matrix_index() {
                ctx.mna.stamp_matrix(row, col, gds);
            }
            if let Some(col) = sn.matrix_index() {
                ctx.mna.stamp_matrix(row, col, -(gm + gds));
            }
            ctx.mna.stamp_right_side(row, -i0);
        }
        if let Some(row) = sn.matrix_index() {
            if let Some(col) = gate.matrix_index() {
                ctx.mna.stamp_matrix(row, col, -gm);
            }
            if let Some(col) = dn.matrix_index() {
                ctx.mna.stamp_matrix(row, col, -gds);
            }
            if let Some(col) = sn.matrix_index() {
                ctx.mna.stamp_matrix(row, col, gm + gds);
            }
            ctx.mna.stamp_right_side(row, i0);
        }

        self.ids = if reversed { -p * ids } else { p * ids };
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        self.base.current = self.ids;
    }
    fn current_into_node(&self, post: usize) -> f64 {
        match post {
            1 => -self.ids,
            2 => self.ids,
            _ => 0.0,
        }
    }
    fn info(&self) -> String {
        format!(
            "{}mos Vt = {}, Ids = {:.6e} A",
            if self.polarity > 0.0 { "n" } else { "p" },
            self.threshold,
            self.ids
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
    use volta_core::NodeId;

    fn make_fet() -> Mosfet {
        let mut m = Mosfet::new(Base::new(0, 0, 64, 0, 0), true, 1.5, 0.02);
        m.allocate();
        m.set_node(0, NodeId(1)); // gate
        m.set_node(1, NodeId(2)); // drain
        m.set_node(2, NodeId(0)); // source grounded
        m
    }

    #[test]
    fn test_saturation_current_square_law() {
        let mut rig = TestRig::new(2, 0, 1e-6);
        let mut m = make_fet();
        m.stamp(&mut rig.ctx()).unwrap();

        m.set_node_voltage(0, 3.5); // vgs = 3.5, vov = 2
        m.set_node_voltage(1, 5.0); // vds = 5 > vov: saturation
        m.do_step(&mut rig.ctx());

        // ids = 0.5 * beta * vov^2 = 0.5 * 0.02 * 4 = 40 mA
        assert!(
            (m.ids - 0.04).abs() < 1e-3,
            "ids = {} (expected ~0.04)",
            m.ids
        );
    }

    #[test]
    fn test_cutoff_leaves_only_leakage() {
        let mut rig = TestRig::new(2, 0, 1e-6);
        let mut m = make_fet();
        m.stamp(&mut rig.ctx()).unwrap();

        m.set_node_voltage(0, 0.0);
        m.set_node_voltage(1, 5.0);
        m.do_step(&mut rig.ctx());
        assert!(m.ids.abs() < 1e-6, "ids = {} in cutoff", m.ids);
    }

    #[test]
    fn test_smooth_through_threshold() {
        // Overdrive and its derivative must be continuous near Vt
        let m = make_fet();
        let (below, _) = m.overdrive(1.45);
        let (at, _) = m.overdrive(1.5);
        let (above, _) = m.overdrive(1.55);
        assert!(below < at && at < above);
        assert!(below > 0.0, "subthreshold overdrive must stay positive");
    }

    #[test]
    fn test_reversed_channel_swaps_terminals() {
        let mut rig = TestRig::new(3, 0, 1e-6);
        let mut m = Mosfet::new(Base::new(0, 0, 64, 0, 0), true, 1.5, 0.02);
        m.allocate();
        m.set_node(0, NodeId(1));
        m.set_node(1, NodeId(2));
        m.set_node(2, NodeId(3));
        m.stamp(&mut rig.ctx()).unwrap();

        // Drain below source: current must flow source → drain
        m.set_node_voltage(0, 5.0);
        m.set_node_voltage(1, 0.0);
        m.set_node_voltage(2, 2.0);
        m.do_step(&mut rig.ctx());
        assert!(m.ids < 0.0, "reversed channel current = {}", m.ids);
    }
}
