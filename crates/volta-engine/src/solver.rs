//! Per-timestep solve loop.
//!
//! `simulate_step` runs the action scheduler, lets every element open
//! the timestep, then iterates: restore the linear snapshot, run
//! nonlinear `do_step`s, solve, publish voltages, rotate the pending
//! value buffer. The loop exits once no element objects to the
//! proposed solution (or the subiteration cap trips, which is reported
//! but never fatal).

use nalgebra::DVector;

use volta_core::{MnaSystem, NodeId};
use volta_elements::SimContext;
use volta_parser::ActionKind;

use crate::actions;
use crate::engine::Engine;
use crate::error::Result;
use crate::lu;

/// Build a [`SimContext`] from engine fields without borrowing the
/// element list, so the caller can iterate elements while the context
/// is alive.
macro_rules! sim_context {
    ($engine:expr, $time:expr, $subiter:expr) => {{
        let mut ctx = SimContext::new(
            &mut $engine.mna,
            &mut $engine.values,
            &$engine.labels,
            &$engine.node_volts,
            $time,
            $engine.options.dt,
            $engine.method,
            $engine.config.nonlinear_tol_abs,
            $engine.config.nonlinear_tol_rel,
        );
        ctx.subiter = $subiter;
        ctx
    }};
}

impl Engine {
    /// Run topology analysis and the linear stamp immediately if the
    /// circuit is dirty, without advancing time.
    pub fn analyze(&mut self) -> Result<()> {
        self.ensure_analyzed()
    }

    /// Re-run topology analysis and the linear stamp if anything marked
    /// the circuit dirty.
    pub(crate) fn ensure_analyzed(&mut self) -> Result<()> {
        if !self.needs_analysis {
            return Ok(());
        }

        self.labels.clear();
        self.values.clear_masters();

        let analysis = crate::topology::analyze(
            &mut self.elements,
            &mut self.labels,
            &mut self.values,
            self.config.ground_policy,
        )?;

        let unknowns = analysis.node_count - 1;
        self.mna = MnaSystem::new(unknowns, analysis.vsource_count);
        self.node_volts = vec![0.0; analysis.node_count];

        {
            let mut ctx = sim_context!(self, self.t, 0);
            for element in &mut self.elements {
                element.stamp(&mut ctx)?;
            }
        }

        for node in &analysis.implicit_ground_nodes {
            self.mna.stamp_resistor(*node, NodeId::GROUND, 1e9)?;
        }

        self.mna.snapshot();
        // Iteration need is decided after stamping so that stamp-time
        // demotions (linear table rows without a node) are counted.
        self.circuit_nonlinear = self.elements.iter().any(|e| e.nonlinear());

        let m = self.mna.size();
        if m > 0 && m < self.config.big_solver_threshold {
            let red = lu::simplify(&mut self.mna);
            let matrix = lu::build_reduced_matrix(&self.mna, &red);
            self.factored = Some(lu::factor(matrix)?);
            self.reduced = Some(red);
        } else {
            self.reduced = None;
            self.factored = None;
        }

        self.analysis = Some(analysis);
        self.needs_analysis = false;
        Ok(())
    }

    /// Advance the simulation by one timestep of `dt`.
    pub fn simulate_step(&mut self) -> Result<()> {
        self.ensure_analyzed()?;

        // Scheduled actions due at the current time fire first; actions
        // at t = 0 fire on the very first step.
        for kind in actions::drain_due(&mut self.schedule, self.t) {
            match kind {
                ActionKind::Set { name, value } => self.values.set_external(&name, value),
                ActionKind::Stop => self.stop_flag = true,
            }
        }

        let dt = self.options.dt;
        let target_time = self.t + dt;
        let m = self.mna.size();

        {
            let mut ctx = sim_context!(self, target_time, 0);
            for element in &mut self.elements {
                element.start_iteration(&mut ctx);
            }
        }

        let cap = self.config.subiteration_cap.max(1);
        let mut converged = false;

        for k in 0..cap {
            self.mna.restore();

            let (step_converged, stop) = {
                let mut ctx = sim_context!(self, target_time, k);
                for element in &mut self.elements {
                    element.do_step(&mut ctx);
                }
                (ctx.is_converged(), ctx.stop_requested())
            };
            if stop {
                self.stop_flag = true;
            }

            if m > 0 {
                let x = self.solve_system()?;
                self.publish_solution(&x);
            }

            // Writes become visible only now, after every element ran.
            self.values.commit_pending_to_current();

            if !self.circuit_nonlinear {
                converged = true;
                break;
            }
            if step_converged && k >= 1 {
                converged = true;
                break;
            }
        }

        if !converged {
            self.nonconverged_steps += 1;
            if self.nonconverged_steps == 1 {
                log::warn!(
                    "subiteration cap ({cap}) hit at t = {target_time:.6e}; \
                     publishing last solution and continuing"
                );
            } else {
                log::debug!("subiteration cap hit at t = {target_time:.6e}");
            }
        }

        {
            let mut ctx = sim_context!(self, target_time, 0);
            for element in &mut self.elements {
                element.step_finished(&mut ctx);
            }
            if ctx.stop_requested() {
                self.stop_flag = true;
            }
        }

        self.values.commit_pending_to_current();
        self.values.commit_current_to_converged();
        self.t = target_time;
        self.last_converged = converged;
        self.record_scopes();
        Ok(())
    }

    /// Solve the current system, choosing the reduced-dense or sparse
    /// path and reusing the factorization when only the RHS changed.
    fn solve_system(&mut self) -> Result<DVector<f64>> {
        let m = self.mna.size();
        if m >= self.config.big_solver_threshold {
            return lu::solve_sparse(self.mna.matrix(), self.mna.rhs());
        }

        let red = self
            .reduced
            .as_ref()
            .expect("reduced system exists below the sparse threshold");

        if self.mna.matrix_dirty() || self.factored.is_none() {
            let matrix = lu::build_reduced_matrix(&self.mna, red);
            self.factored = Some(lu::factor(matrix)?);
        }
        let rhs = lu::build_reduced_rhs(&self.mna, red);
        let factored = self.factored.as_ref().expect("factorization just built");
        let xr = lu::solve_factored(factored, &rhs);
        Ok(lu::expand_solution(&self.mna, red, &xr))
    }
}
