//! Shared fixtures for element unit tests.

use volta_core::{ComputedValues, LabeledNodes, MnaSystem};

use crate::context::{IntegrationMethod, SimContext};

/// Owns everything a [`SimContext`] borrows.
pub struct TestRig {
    pub mna: MnaSystem,
    pub values: ComputedValues,
    pub labels: LabeledNodes,
    pub node_volts: Vec<f64>,
    pub time: f64,
    pub dt: f64,
    pub method: IntegrationMethod,
}

impl TestRig {
    pub fn new(num_nodes: usize, num_vsources: usize, dt: f64) -> Self {
        Self {
            mna: MnaSystem::new(num_nodes, num_vsources),
            values: ComputedValues::new(),
            labels: LabeledNodes::new(),
            node_volts: vec![0.0; num_nodes + 1],
            time: 0.0,
            dt,
            method: IntegrationMethod::BackwardEuler,
        }
    }

    pub fn ctx(&mut self) -> SimContext<'_> {
        SimContext::new(
            &mut self.mna,
            &mut self.values,
            &self.labels,
            &self.node_volts,
            self.time,
            self.dt,
            self.method,
            1e-6,
            1e-3,
        )
    }
}
