//! Labeled nodes and the stop trigger.

use std::any::Any;

use volta_core::{ComputedValues, ElementId, LabeledNodes, Result};

use crate::context::SimContext;
use crate::element::{Base, Element};

/// Named rail: every labeled-node element carrying the same name shares
/// one circuit node.
#[derive(Debug, Clone)]
pub struct LabeledNode {
    base: Base,
    pub name: String,
}

impl LabeledNode {
    pub fn new(base: Base, name: impl Into<String>) -> Self {
        Self {
            base,
            name: name.into(),
        }
    }
}

impl Element for LabeledNode {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "207"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
    fn post_count(&self) -> usize {
        1
    }
    fn label_name(&self) -> Option<&str> {
        Some(&self.name)
    }
    fn register_labels(
        &mut self,
        labels: &mut LabeledNodes,
        _values: &ComputedValues,
        _id: ElementId,
    ) {
        labels.register(&self.name, self.base.nodes[0]);
    }
    fn stamp(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }
    fn info(&self) -> String {
        format!("label {} = {:.6} V", self.name, self.base.volts[0])
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Halts the run loop once simulation time reaches `stop_time`.
/// A degenerate scheduler entry living in the element list.
#[derive(Debug, Clone)]
pub struct StopTrigger {
    base: Base,
    pub stop_time: f64,
    pub enabled: bool,
}

impl StopTrigger {
    pub fn new(base: Base, stop_time: f64) -> Self {
        Self {
            base,
            stop_time,
            enabled: true,
        }
    }
}

impl Element for StopTrigger {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "211"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![
            self.stop_time.to_string(),
            if self.enabled { "1" } else { "0" }.to_string(),
        ]
    }
    fn post_count(&self) -> usize {
        0
    }
    fn stamp(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }
    fn step_finished(&mut self, ctx: &mut SimContext) {
        if self.enabled && ctx.time >= self.stop_time {
            ctx.request_stop();
        }
    }
    fn info(&self) -> String {
        format!("stop at t = {} s", self.stop_time)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
