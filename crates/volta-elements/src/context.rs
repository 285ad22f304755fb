//! Per-step context handed to element methods.
//!
//! The context replaces the global registries of a classic interactive
//! simulator with explicit engine-owned state: the MNA system being
//! assembled, the computed-value buffers, the labeled-node registry and
//! the published node voltages of the previous solve.

use volta_core::{ComputedValues, LabeledNodes, MnaSystem, NodeId};
use volta_expr::EvalContext;

/// Companion-model integration scheme, selected per circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// First-order, A-stable, most robust.
    #[default]
    BackwardEuler,
    /// Second-order, better for oscillators.
    Trapezoidal,
}

/// Mutable view of the solver state during one element callback.
pub struct SimContext<'a> {
    pub mna: &'a mut MnaSystem,
    pub values: &'a mut ComputedValues,
    pub labels: &'a LabeledNodes,
    /// Node voltages from the latest solve, indexed by `NodeId.0`
    /// (entry 0 is ground and always 0).
    pub node_volts: &'a [f64],
    pub time: f64,
    pub dt: f64,
    pub method: IntegrationMethod,
    /// Absolute convergence floor.
    pub tol_abs: f64,
    /// Relative convergence ratio.
    pub tol_rel: f64,
    /// Subiteration counter within the current timestep.
    pub subiter: usize,
    converged: bool,
    stop_requested: bool,
}

impl<'a> SimContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mna: &'a mut MnaSystem,
        values: &'a mut ComputedValues,
        labels: &'a LabeledNodes,
        node_volts: &'a [f64],
        time: f64,
        dt: f64,
        method: IntegrationMethod,
        tol_abs: f64,
        tol_rel: f64,
    ) -> Self {
        Self {
            mna,
            values,
            labels,
            node_volts,
            time,
            dt,
            method,
            tol_abs,
            tol_rel,
            subiter: 0,
            converged: true,
            stop_requested: false,
        }
    }

    /// Voltage of a node from the latest solve.
    #[inline]
    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.node_volts.get(node.0).copied().unwrap_or(0.0)
    }

    /// Called by a nonlinear element whose proposed value moved more
    /// than its tolerance since the last subiteration.
    #[inline]
    pub fn not_converged(&mut self) {
        self.converged = false;
    }

    #[inline]
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Reset the convergence flag at the top of a subiteration.
    #[inline]
    pub fn reset_converged(&mut self) {
        self.converged = true;
    }

    /// True if `new` is within this circuit's convergence tolerance of
    /// `old` (absolute floor plus relative ratio).
    #[inline]
    pub fn within_tolerance(&self, old: f64, new: f64) -> bool {
        (new - old).abs() <= self.tol_abs + self.tol_rel * new.abs()
    }

    /// Ask the outer run loop to halt after this timestep.
    #[inline]
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Expression resolver over this context: labeled nodes first, then
    /// the computed-value registry's current buffer.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver {
            labels: self.labels,
            values: self.values,
            node_volts: self.node_volts,
            time: self.time,
            dt: self.dt,
        }
    }
}

/// [`EvalContext`] view over the simulation state.
pub struct Resolver<'b> {
    labels: &'b LabeledNodes,
    values: &'b ComputedValues,
    node_volts: &'b [f64],
    time: f64,
    dt: f64,
}

impl EvalContext for Resolver<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        if let Some(node) = self.labels.resolve(name) {
            return Some(self.node_volts.get(node.0).copied().unwrap_or(0.0));
        }
        self.values.get(name)
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn dt(&self) -> f64 {
        self.dt
    }
}
