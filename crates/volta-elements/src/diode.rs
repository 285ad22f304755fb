//! Diode with Shockley equation and Newton-Raphson companion model.

use std::any::Any;

use volta_core::Result;

use crate::context::SimContext;
use crate::element::{Base, Element};

/// Thermal voltage at room temperature (V).
pub const THERMAL_VOLTAGE: f64 = 0.025865;

/// Exponent clip keeping `exp` finite.
const EXP_LIMIT: f64 = 700.0;

/// PN junction diode. Post 0 is the anode.
#[derive(Debug, Clone)]
pub struct Diode {
    base: Base,
    /// Saturation current Is.
    pub saturation_current: f64,
    /// Emission coefficient n.
    pub emission: f64,
    vt: f64,
    vcrit: f64,
    last_voltdiff: f64,
}

impl Diode {
    pub fn new(base: Base, saturation_current: f64, emission: f64) -> Self {
        let vt = emission * THERMAL_VOLTAGE;
        let vcrit = vt * (vt / (std::f64::consts::SQRT_2 * saturation_current)).ln();
        Self {
            base,
            saturation_current,
            emission,
            vt,
            vcrit,
            last_voltdiff: 0.0,
        }
    }

    /// Silicon diode with default parameters.
    pub fn silicon(base: Base) -> Self {
        Self::new(base, 1e-14, 1.0)
    }

    /// Damp a Newton step across the exponential, keeping the iteration
    /// from overshooting into overflow territory.
    fn limit_step(&self, vnew: f64, vold: f64) -> f64 {
        if vnew > self.vcrit && (vnew - vold).abs() > 2.0 * self.vt {
            if vold > 0.0 {
                let arg = 1.0 + (vnew - vold) / self.vt;
                if arg > 0.0 {
                    vold + self.vt * arg.ln()
                } else {
                    self.vcrit
                }
            } else {
                self.vt * (vnew / self.vt).ln()
            }
        } else {
            vnew
        }
    }

    fn diode_current(&self, vd: f64) -> f64 {
        let arg = (vd / self.vt).min(EXP_LIMIT);
        self.saturation_current * (arg.exp() - 1.0)
    }
}

impl Element for Diode {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "d"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![
            self.saturation_current.to_string(),
            self.emission.to_string(),
        ]
    }
    fn post_count(&self) -> usize {
        2
    }
    fn nonlinear(&self) -> bool {
        true
    }
    fn reset(&mut self) {
        self.last_voltdiff = 0.0;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        for node in [self.base.nodes[0], self.base.nodes[1]] {
            if let Some(row) = node.matrix_index() {
                ctx.mna.stamp_nonlinear(row);
            }
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let mut vd = self.base.volts[0] - self.base.volts[1];
        if !ctx.within_tolerance(self.last_voltdiff, vd) {
            ctx.not_converged();
        }
        vd = self.limit_step(vd, self.last_voltdiff);
        self.last_voltdiff = vd;

        // Minimum conductance, ramped up if the iteration is struggling.
        let gmin = if ctx.subiter > 100 {
            10.0_f64.powf(-9.0 * (1.0 - ctx.subiter as f64 / 3000.0))
        } else {
            1e-12
        };

        let arg = (vd / self.vt).min(EXP_LIMIT);
        let e = arg.exp();
        let geq = self.saturation_current / self.vt * e + gmin;
        let i0 = self.saturation_current * (e - 1.0) - geq * vd;

        ctx.mna
            .stamp_conductance(self.base.nodes[0], self.base.nodes[1], geq);
        ctx.mna
            .stamp_current_source(self.base.nodes[0], self.base.nodes[1], i0);
    }
    fn step_finished(&mut self, _ctx: &mut SimContext) {
        let vd = self.base.volts[0] - self.base.volts[1];
        self.base.current = self.diode_current(vd);
    }
    fn current_into_node(&self, post: usize) -> f64 {
        if post == 0 {
            -self.base.current
        } else {
            self.base.current
        }
    }
    fn info(&self) -> String {
        format!(
            "diode Is = {:.3e}, I = {:.6e} A",
            self.saturation_current, self.base.current
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

    fn make_diode() -> Diode {
        let mut d = Diode::silicon(Base::new(0, 0, 64, 0, 0));
        d.allocate();
        d.set_node(0, NodeId(1));
        d.set_node(1, NodeId(0));
        d
    }

    #[test]
    fn test_stamp_marks_rows_nonlinear() {
        let mut rig = TestRig::new(1, 0, 1e-6);
        let mut d = make_diode();
        d.stamp(&mut rig.ctx()).unwrap();
        assert!(rig.mna.row_info()[0].ls_changes);
        assert!(!rig.mna.row_info()[0].simplifiable());
    }

    #[test]
    fn test_forward_drop_near_700mv() {
        // Solve i = Is*(exp(v/vt)-1) for i = 1 mA: about 0.65-0.75 V
        let d = make_diode();
        let mut lo = 0.0;
        let mut hi = 1.0;
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if d.diode_current(mid) < 1e-3 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        assert!(
            (0.6..0.8).contains(&lo),
            "forward drop at 1 mA = {lo} (expected 0.6-0.8)"
        );
    }

    #[test]
    fn test_limit_step_damps_overshoot() {
        let d = make_diode();
        // Newton proposes a 5 V jump from 0.6 V; must be pulled back
        let limited = d.limit_step(5.6, 0.6);
        assert!(limited < 1.0, "limited = {limited}");
        // Small steps pass through untouched
        assert_eq!(d.limit_step(0.61, 0.6), 0.61);
    }

    #[test]
    fn test_convergence_flag_on_large_change() {
        let mut rig = TestRig::new(1, 0, 1e-6);
        let mut d = make_diode();
        d.stamp(&mut rig.ctx()).unwrap();

        d.set_node_voltage(0, 0.5);
        let mut ctx = rig.ctx();
        d.do_step(&mut ctx);
        assert!(!ctx.is_converged());

        // Second pass at the same voltage: converged
        let mut ctx = rig.ctx();
        d.do_step(&mut ctx);
        assert!(ctx.is_converged());
    }
}
