//! The public engine facade.

use std::time::{Duration, Instant};

use nalgebra::DVector;

use volta_core::{ComputedValues, ElementId, LabeledNodes, MnaSystem, NodeId};
use volta_elements::{Element, IntegrationMethod};
use volta_parser::{self as parser, ScopeKind, ScopeRequest, SimOptions};

use crate::actions::ActionSchedule;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::lu::{Factored, ReducedSystem};
use crate::scope::ScopeChannel;
use crate::topology::Analysis;

/// Report of one frame of simulation.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Timesteps completed this frame.
    pub steps: usize,
    /// Simulation time after the frame.
    pub t: f64,
    /// False if the last step hit the subiteration cap.
    pub converged: bool,
    /// Sticky error; the engine stops stepping while set.
    pub error: Option<String>,
}

/// Handle to a subscribed scope channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeHandle(pub usize);

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) options: SimOptions,
    pub(crate) method: IntegrationMethod,
    pub(crate) elements: Vec<Box<dyn Element>>,
    pub(crate) labels: LabeledNodes,
    pub(crate) values: ComputedValues,
    pub(crate) mna: MnaSystem,
    pub(crate) analysis: Option<Analysis>,
    pub(crate) reduced: Option<ReducedSystem>,
    pub(crate) factored: Option<Factored>,
    /// Node voltages from the latest solve, index 0 = ground.
    pub(crate) node_volts: Vec<f64>,
    pub(crate) t: f64,
    pub(crate) running: bool,
    pub(crate) needs_analysis: bool,
    pub(crate) schedule: ActionSchedule,
    pub(crate) scopes: Vec<ScopeChannel>,
    pub(crate) error_text: Option<String>,
    pub(crate) last_converged: bool,
    pub(crate) nonconverged_steps: u64,
    pub(crate) circuit_nonlinear: bool,
    pub(crate) stop_flag: bool,
    pub(crate) parameters: Vec<(String, f64)>,
    pub(crate) hints: Vec<(String, String)>,
    pub(crate) comments: Vec<String>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let options = SimOptions {
            sim_speed: config.sim_speed,
            ..SimOptions::default()
        };
        Self {
            method: config.integration_method,
            config,
            options,
            elements: Vec::new(),
            labels: LabeledNodes::new(),
            values: ComputedValues::new(),
            mna: MnaSystem::new(0, 0),
            analysis: None,
            reduced: None,
            factored: None,
            node_volts: vec![0.0],
            t: 0.0,
            running: false,
            needs_analysis: true,
            schedule: ActionSchedule::default(),
            scopes: Vec::new(),
            error_text: None,
            last_converged: true,
            nonconverged_steps: 0,
            circuit_nonlinear: false,
            stop_flag: false,
            parameters: Vec::new(),
            hints: Vec::new(),
            comments: Vec::new(),
        }
    }

    // ─────────────────────────── load / export ───────────────────────────

    /// Import a circuit or SFC description, replacing the current one.
    pub fn load_from_text(&mut self, text: &str) -> Result<()> {
        let parsed = parser::parse_auto(text)?;

        self.elements = parsed.elements;
        self.options = parsed.options;
        self.method = self.options.integration_method();
        self.schedule = ActionSchedule::new(parsed.actions);
        self.parameters = parsed.parameters;
        self.hints = parsed.hints;
        self.comments = parsed.comments;
        self.scopes = parsed
            .scopes
            .into_iter()
            .map(|spec| ScopeChannel::new(spec, 1, 1024))
            .collect();

        self.values.clear();
        for (name, value) in &self.parameters {
            self.values.set_external(name, *value);
        }
        self.t = 0.0;
        self.node_volts = vec![0.0];
        self.analysis = None;
        self.reduced = None;
        self.factored = None;
        self.error_text = None;
        self.nonconverged_steps = 0;
        self.stop_flag = false;
        self.needs_analysis = true;
        Ok(())
    }

    /// Serialize the circuit back to dump-line text.
    pub fn export_text(&self) -> String {
        let scope_specs: Vec<ScopeRequest> =
            self.scopes.iter().map(|c| c.spec.clone()).collect();
        parser::export(
            &self.options,
            &self.elements,
            self.schedule.records(),
            &scope_specs,
            &self.parameters,
            &self.comments,
        )
    }

    // ─────────────────────────── run control ───────────────────────────

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Discard all dynamic state and schedule re-analysis.
    pub fn reset(&mut self) {
        self.t = 0.0;
        for element in &mut self.elements {
            element.reset();
        }
        self.values.clear();
        for (name, value) in &self.parameters {
            self.values.set_external(name, *value);
        }
        self.node_volts.iter_mut().for_each(|v| *v = 0.0);
        self.schedule.rewind();
        for scope in &mut self.scopes {
            scope.clear();
        }
        self.error_text = None;
        self.last_converged = true;
        self.nonconverged_steps = 0;
        self.stop_flag = false;
        self.needs_analysis = true;
    }

    /// Advance exactly one timestep, ignoring the running flag.
    pub fn step_once(&mut self) -> Result<()> {
        let result = self.simulate_step();
        if let Err(e) = &result {
            self.error_text = Some(e.to_string());
        }
        result
    }

    /// Run up to one frame's worth of timesteps within the wall-clock
    /// budget. Pass 0 to use the configured budget.
    pub fn run_frame(&mut self, wall_budget_ms: u64) -> FrameReport {
        let start = Instant::now();
        let budget = Duration::from_millis(if wall_budget_ms == 0 {
            self.config.frame_budget_ms
        } else {
            wall_budget_ms
        });

        let mut steps = 0;
        if self.error_text.is_none() && self.running {
            let target = self.config.steps_per_frame(self.options.sim_speed);
            for _ in 0..target {
                if start.elapsed() >= budget {
                    break;
                }
                match self.simulate_step() {
                    Ok(()) => steps += 1,
                    Err(e) => {
                        self.error_text = Some(e.to_string());
                        self.running = false;
                        break;
                    }
                }
                if self.stop_flag {
                    self.stop_flag = false;
                    self.running = false;
                    break;
                }
            }
        }

        FrameReport {
            steps,
            t: self.t,
            converged: self.last_converged,
            error: self.error_text.clone(),
        }
    }

    // ─────────────────────────── inspection ───────────────────────────

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn dt(&self) -> f64 {
        self.options.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.options.dt = dt;
        self.needs_analysis = true;
    }

    pub fn integration_method(&self) -> IntegrationMethod {
        self.method
    }

    pub fn set_integration_method(&mut self, method: IntegrationMethod) {
        self.method = method;
        if method == IntegrationMethod::Trapezoidal {
            self.options.flags |= SimOptions::FLAG_TRAPEZOIDAL;
        } else {
            self.options.flags &= !SimOptions::FLAG_TRAPEZOIDAL;
        }
        self.needs_analysis = true;
    }

    /// Count of timesteps that hit the subiteration cap.
    pub fn nonconverged_steps(&self) -> u64 {
        self.nonconverged_steps
    }

    pub fn elements(&self) -> &[Box<dyn Element>] {
        &self.elements
    }

    /// Mutable element access for the editor. Any mutation may change
    /// topology, so the analyze flag is set.
    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut Box<dyn Element>> {
        self.needs_analysis = true;
        self.error_text = None;
        self.elements.get_mut(id.0)
    }

    pub fn add_element(&mut self, element: Box<dyn Element>) -> ElementId {
        self.elements.push(element);
        self.needs_analysis = true;
        self.error_text = None;
        ElementId(self.elements.len() - 1)
    }

    pub fn remove_element(&mut self, id: ElementId) {
        if id.0 < self.elements.len() {
            self.elements.remove(id.0);
            self.needs_analysis = true;
            self.error_text = None;
        }
    }

    /// Force re-analysis before the next step (switch toggles, label
    /// renames).
    pub fn mark_dirty(&mut self) {
        self.needs_analysis = true;
    }

    /// Voltage of a node by labeled name or numeric index.
    pub fn node_voltage(&self, name_or_idx: &str) -> Option<f64> {
        if let Some(node) = self.labels.resolve(name_or_idx) {
            return self.node_volts.get(node.0).copied();
        }
        let idx: usize = name_or_idx.trim_start_matches('n').parse().ok()?;
        self.node_volts.get(idx).copied()
    }

    pub fn node_voltage_at(&self, node: NodeId) -> f64 {
        self.node_volts.get(node.0).copied().unwrap_or(0.0)
    }

    /// Number of solution unknowns (nodes excluding ground).
    pub fn node_count(&self) -> usize {
        self.analysis
            .as_ref()
            .map(|a| a.node_count - 1)
            .unwrap_or(0)
    }

    /// Computed value from the converged buffer (what displays read).
    pub fn computed_value(&self, name: &str) -> Option<f64> {
        self.values.get_converged(name)
    }

    /// Write a named parameter (UI slider). Picked up on the next
    /// element evaluation.
    pub fn set_parameter(&mut self, name: &str, value: f64) {
        if let Some(entry) = self.parameters.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.parameters.push((name.to_string(), value));
        }
        self.values.set_external(name, value);
    }

    pub fn hints(&self) -> &[(String, String)] {
        &self.hints
    }

    /// Labeled nodes with their latest voltages, in registration order.
    pub fn labeled_voltages(&self) -> Vec<(String, f64)> {
        self.labels
            .iter()
            .map(|(name, node)| (name.to_string(), self.node_voltage_at(node)))
            .collect()
    }

    /// All converged computed values, in insertion order.
    pub fn converged_values(&self) -> Vec<(String, f64)> {
        self.values
            .converged_names()
            .map(|name| (name.to_string(), self.values.get_converged(name).unwrap_or(0.0)))
            .collect::<Vec<_>>()
    }

    // ─────────────────────────── scopes ───────────────────────────

    pub fn subscribe_scope(&mut self, spec: ScopeRequest) -> ScopeHandle {
        self.scopes.push(ScopeChannel::new(spec, 1, 1024));
        ScopeHandle(self.scopes.len() - 1)
    }

    pub fn scope(&self, handle: ScopeHandle) -> Option<&ScopeChannel> {
        self.scopes.get(handle.0)
    }

    pub fn scope_mut(&mut self, handle: ScopeHandle) -> Option<&mut ScopeChannel> {
        self.scopes.get_mut(handle.0)
    }

    /// Current value a scope spec resolves to.
    pub(crate) fn scope_value(&self, spec: &ScopeRequest) -> f64 {
        match spec.kind {
            ScopeKind::Voltage => self.node_voltage(&spec.target).unwrap_or(0.0),
            ScopeKind::Value => self
                .values
                .get_converged(&spec.target)
                .or_else(|| self.node_voltage(&spec.target))
                .unwrap_or(0.0),
            ScopeKind::Current | ScopeKind::Power => {
                let Some(idx) = spec.target.strip_prefix('#').and_then(|s| s.parse::<usize>().ok())
                else {
                    return 0.0;
                };
                let Some(element) = self.elements.get(idx) else {
                    return 0.0;
                };
                let current = element.base().current;
                match spec.kind {
                    ScopeKind::Current => current,
                    _ => {
                        let b = element.base();
                        let v0 = b.volts.first().copied().unwrap_or(0.0);
                        let v1 = b.volts.get(1).copied().unwrap_or(0.0);
                        current * (v0 - v1)
                    }
                }
            }
        }
    }

    pub(crate) fn record_scopes(&mut self) {
        for i in 0..self.scopes.len() {
            let value = self.scope_value(&self.scopes[i].spec.clone());
            self.scopes[i].record(value);
        }
    }

    /// Branch-current solution helper used by the solver.
    pub(crate) fn publish_solution(&mut self, x: &DVector<f64>) {
        let unknowns = self.node_volts.len() - 1;
        for i in 0..unknowns {
            self.node_volts[i + 1] = x[i];
        }
        for element in &mut self.elements {
            let total = element.post_count() + element.internal_node_count();
            for i in 0..total {
                let node = element.node(i);
                let v = self.node_volts.get(node.0).copied().unwrap_or(0.0);
                element.set_node_voltage(i, v);
            }
        }
        if let Some(analysis) = &self.analysis {
            let owners = analysis.vsource_owners.clone();
            for (global, (ei, local)) in owners.into_iter().enumerate() {
                let current = x[unknowns + global];
                self.elements[ei].set_branch_current(local, current);
            }
        }
    }
}
