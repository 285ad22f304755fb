//! Engine configuration surface.

use volta_elements::IntegrationMethod;

/// What to do when a circuit has no ground reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroundPolicy {
    /// Tie the first node to ground through 1 GΩ and warn.
    #[default]
    ImplicitViaBigResistor,
    /// Refuse to analyze.
    ExplicitOnly,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Companion-model scheme; a loaded circuit's flags override this.
    pub integration_method: IntegrationMethod,
    /// Newton-Raphson subiteration cap per timestep.
    pub subiteration_cap: usize,
    /// Absolute convergence floor (volts / value units).
    pub nonlinear_tol_abs: f64,
    /// Relative convergence ratio.
    pub nonlinear_tol_rel: f64,
    pub ground_policy: GroundPolicy,
    /// Matrix size at which the engine switches to the sparse solver
    /// and skips row simplification.
    pub big_solver_threshold: usize,
    /// Wall-clock budget for one frame, milliseconds.
    pub frame_budget_ms: u64,
    /// Speed knob; maps monotonically to steps per frame.
    pub sim_speed: i32,
}

impl EngineConfig {
    /// Steps attempted per frame for the current speed knob.
    pub fn steps_per_frame(&self, sim_speed: i32) -> usize {
        sim_speed.clamp(1, 100_000) as usize
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            integration_method: IntegrationMethod::BackwardEuler,
            subiteration_cap: 5000,
            nonlinear_tol_abs: 1e-6,
            nonlinear_tol_rel: 1e-3,
            ground_policy: GroundPolicy::default(),
            big_solver_threshold: 50,
            frame_budget_ms: 50,
            sim_speed: 10,
        }
    }
}
