//! The element trait and shared geometry/state base.

use std::any::Any;

use volta_core::{ComputedValues, ElementId, LabeledNodes, NodeId, Result};

use crate::context::SimContext;

/// Integer-grid post coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Geometry and solver-assigned state every element carries.
///
/// Concrete elements embed a `Base` and expose it through
/// [`Element::base`]; the trait's default accessors do the bookkeeping
/// so element impls only write their own physics.
#[derive(Debug, Clone, Default)]
pub struct Base {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub flags: u32,
    /// Node per post, then per internal node.
    pub nodes: Vec<NodeId>,
    /// Voltage per post/internal node, published after each solve.
    pub volts: Vec<f64>,
    /// Global index per requested voltage source.
    pub vs: Vec<usize>,
    /// Branch/through current for display and KCL accounting.
    pub current: f64,
}

impl Base {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, flags: u32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            flags,
            nodes: Vec::new(),
            volts: Vec::new(),
            vs: Vec::new(),
            current: 0.0,
        }
    }
}

/// Contract every circuit element implements.
///
/// Lifecycle per topology analysis: `allocate` → node/source assignment
/// (`set_node`, `set_voltage_source`) → `register_values` → `stamp`.
/// Lifecycle per timestep: `start_iteration` → `do_step` × subiterations
/// → `step_finished`.
pub trait Element: std::fmt::Debug {
    fn base(&self) -> &Base;
    fn base_mut(&mut self) -> &mut Base;

    /// Serialization code: a single character for classic elements, a
    /// decimal integer for newer ones (100-300 reserved for
    /// extensions).
    fn dump_code(&self) -> &'static str;

    /// Element parameters after the coordinate/flag columns, in fixed
    /// order.
    fn dump_params(&self) -> Vec<String>;

    /// Number of external terminals.
    fn post_count(&self) -> usize;

    /// Extra solver-only nodes this element needs.
    fn internal_node_count(&self) -> usize {
        0
    }

    /// Number of voltage-source rows this element owns.
    fn voltage_source_count(&self) -> usize {
        0
    }

    /// True if the element must iterate within a timestep. Queried
    /// after `stamp`, so stamp-time demotions are visible.
    fn nonlinear(&self) -> bool {
        false
    }

    /// True if the element electrically shorts its two posts and should
    /// be folded into the wire closure.
    fn is_wire(&self) -> bool {
        false
    }

    /// True if the given post is tied to ground.
    fn has_ground_post(&self, _post: usize) -> bool {
        false
    }

    /// True if the element references ground internally (rails, table
    /// output rows). Such a circuit needs no implicit ground tie even
    /// without a ground post.
    fn connects_to_ground(&self) -> bool {
        false
    }

    /// Name this element contributes to the labeled-node registry.
    fn label_name(&self) -> Option<&str> {
        None
    }

    /// True if current can flow between two posts through this element.
    /// High-impedance inputs return false.
    fn get_connection(&self, _a: usize, _b: usize) -> bool {
        true
    }

    /// Post coordinate. Default: post 0 at (x1,y1), post 1 at (x2,y2),
    /// further posts stacked below (x2,y2) on the grid.
    fn post(&self, i: usize) -> Point {
        let b = self.base();
        match i {
            0 => Point::new(b.x1, b.y1),
            1 => Point::new(b.x2, b.y2),
            n => Point::new(b.x2, b.y2 + 16 * (n as i32 - 1)),
        }
    }

    /// Size node/voltage storage before assignment.
    fn allocate(&mut self) {
        let nodes = self.post_count() + self.internal_node_count();
        let sources = self.voltage_source_count();
        let b = self.base_mut();
        b.nodes.clear();
        b.nodes.resize(nodes, NodeId::GROUND);
        b.volts.clear();
        b.volts.resize(nodes, 0.0);
        b.vs.clear();
        b.vs.resize(sources, 0);
    }

    fn set_node(&mut self, i: usize, node: NodeId) {
        self.base_mut().nodes[i] = node;
    }

    fn node(&self, i: usize) -> NodeId {
        self.base().nodes[i]
    }

    fn set_voltage_source(&mut self, local: usize, global: usize) {
        self.base_mut().vs[local] = global;
    }

    fn voltage_source(&self, local: usize) -> usize {
        self.base().vs[local]
    }

    fn set_node_voltage(&mut self, i: usize, v: f64) {
        self.base_mut().volts[i] = v;
    }

    /// Branch current of one of this element's voltage sources, from
    /// the latest solution. Positive flowing out of the positive
    /// terminal into the branch row.
    fn set_branch_current(&mut self, _local: usize, _current: f64) {}

    /// Register computed-value masters and seed initial values. Runs
    /// during topology analysis, after node assignment.
    fn register_values(&mut self, _values: &mut ComputedValues, _id: ElementId) {}

    /// Register entries in the labeled-node registry. Runs after
    /// `register_values` so tables can skip names they lost to a
    /// higher-priority master.
    fn register_labels(
        &mut self,
        _labels: &mut LabeledNodes,
        _values: &ComputedValues,
        _id: ElementId,
    ) {
    }

    /// Discard all dynamic state (engine reset).
    fn reset(&mut self) {
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }

    /// One-shot linear contribution after topology analysis.
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()>;

    /// Once per timestep, before the subiteration loop.
    fn start_iteration(&mut self, _ctx: &mut SimContext) {}

    /// Each subiteration. Nonlinear restamps may only touch rows marked
    /// at stamp time.
    fn do_step(&mut self, _ctx: &mut SimContext) {}

    /// Once per timestep, after convergence. Commit histories and
    /// publish computed values.
    fn step_finished(&mut self, _ctx: &mut SimContext) {}

    /// Current flowing out of the element into the node at post `i`.
    fn current_into_node(&self, _post: usize) -> f64 {
        0.0
    }

    /// One-line description for inspection surfaces.
    fn info(&self) -> String;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
