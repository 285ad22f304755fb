//! Composite element: a sub-circuit behind a fixed set of posts.
//!
//! Inner elements are wired to *nets*. Nets `0..post_count` are the
//! composite's external posts; higher nets are internal and surface as
//! internal nodes to the analyzer. Stamp and step calls forward to the
//! inner elements under the outer node mapping, so the sub-circuit
//! participates in the same MNA system.
//!
//! Inner elements may not request internal nodes of their own.

use std::any::Any;

use volta_core::{ComputedValues, ElementId, LabeledNodes, NodeId, Result};

use crate::context::SimContext;
use crate::element::{Base, Element};

/// An inner element plus the net each of its posts connects to.
#[derive(Debug)]
struct Inner {
    element: Box<dyn Element>,
    post_nets: Vec<usize>,
}

#[derive(Debug)]
pub struct Composite {
    base: Base,
    external_posts: usize,
    net_count: usize,
    inner: Vec<Inner>,
}

impl Composite {
    /// Build a composite with `external_posts` posts and `net_count`
    /// total nets. Each entry of `parts` maps an element's posts onto
    /// nets.
    pub fn new(
        base: Base,
        external_posts: usize,
        net_count: usize,
        parts: Vec<(Box<dyn Element>, Vec<usize>)>,
    ) -> Self {
        let inner = parts
            .into_iter()
            .map(|(mut element, post_nets)| {
                assert_eq!(
                    element.post_count(),
                    post_nets.len(),
                    "post/net map length mismatch"
                );
                assert_eq!(
                    element.internal_node_count(),
                    0,
                    "inner elements may not request internal nodes"
                );
                assert!(
                    post_nets.iter().all(|n| *n < net_count),
                    "net index out of range"
                );
                element.allocate();
                Inner { element, post_nets }
            })
            .collect();
        Self {
            base,
            external_posts,
            net_count,
            inner,
        }
    }
}

impl Element for Composite {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "212"
    }
    fn dump_params(&self) -> Vec<String> {
        Vec::new()
    }
    fn post_count(&self) -> usize {
        self.external_posts
    }
    fn internal_node_count(&self) -> usize {
        self.net_count - self.external_posts
    }
    fn voltage_source_count(&self) -> usize {
        self.inner
            .iter()
            .map(|p| p.element.voltage_source_count())
            .sum()
    }
    fn nonlinear(&self) -> bool {
        self.inner.iter().any(|p| p.element.nonlinear())
    }
    fn connects_to_ground(&self) -> bool {
        self.inner.iter().any(|p| p.element.connects_to_ground())
    }
    fn set_node(&mut self, i: usize, node: NodeId) {
        self.base.nodes[i] = node;
        for part in &mut self.inner {
            for (post, net) in part.post_nets.iter().enumerate() {
                if *net == i {
                    part.element.set_node(post, node);
                }
            }
        }
    }
    fn set_voltage_source(&mut self, local: usize, global: usize) {
        self.base.vs[local] = global;
        let mut cursor = 0;
        for part in &mut self.inner {
            let count = part.element.voltage_source_count();
            if local < cursor + count {
                part.element.set_voltage_source(local - cursor, global);
                return;
            }
            cursor += count;
        }
    }
    fn set_node_voltage(&mut self, i: usize, v: f64) {
        self.base.volts[i] = v;
        for part in &mut self.inner {
            for (post, net) in part.post_nets.iter().enumerate() {
                if *net == i {
                    part.element.set_node_voltage(post, v);
                }
            }
        }
    }
    fn set_branch_current(&mut self, local: usize, current: f64) {
        let mut cursor = 0;
        for part in &mut self.inner {
            let count = part.element.voltage_source_count();
            if local < cursor + count {
                part.element.set_branch_current(local - cursor, current);
                return;
            }
            cursor += count;
        }
    }
    fn register_values(&mut self, values: &mut ComputedValues, id: ElementId) {
        for part in &mut self.inner {
            part.element.register_values(values, id);
        }
    }
    fn register_labels(
        &mut self,
        labels: &mut LabeledNodes,
        values: &ComputedValues,
        id: ElementId,
    ) {
        for part in &mut self.inner {
            part.element.register_labels(labels, values, id);
        }
    }
    fn reset(&mut self) {
        for part in &mut self.inner {
            part.element.reset();
        }
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        for part in &mut self.inner {
            part.element.stamp(ctx)?;
        }
        Ok(())
    }
    fn start_iteration(&mut self, ctx: &mut SimContext) {
        for part in &mut self.inner {
            part.element.start_iteration(ctx);
        }
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        for part in &mut self.inner {
            part.element.do_step(ctx);
        }
    }
    fn step_finished(&mut self, ctx: &mut SimContext) {
        for part in &mut self.inner {
            part.element.step_finished(ctx);
        }
    }
    fn current_into_node(&self, post: usize) -> f64 {
        let mut total = 0.0;
        for part in &self.inner {
            for (inner_post, net) in part.post_nets.iter().enumerate() {
                if *net == post {
                    total += part.element.current_into_node(inner_post);
                }
            }
        }
        total
    }
    fn info(&self) -> String {
        format!("composite ({} parts)", self.inner.len())
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
    use crate::passive::Resistor;
    use crate::testutil::TestRig;

    /// Two 1k resistors in series behind two posts, junction internal.
    fn divider() -> Composite {
        let r1 = Box::new(Resistor::new(Base::default(), 1000.0));
        let r2 = Box::new(Resistor::new(Base::default(), 1000.0));
        Composite::new(
            Base::default(),
            2,
            3,
            vec![(r1, vec![0, 2]), (r2, vec![2, 1])],
        )
    }

    #[test]
    fn test_composite_resource_counts() {
        let c = divider();
        assert_eq!(c.post_count(), 2);
        assert_eq!(c.internal_node_count(), 1);
        assert_eq!(c.voltage_source_count(), 0);
        assert!(!c.nonlinear());
    }

    #[test]
    fn test_composite_forwards_stamps() {
        let mut rig = TestRig::new(3, 0, 1e-6);
        let mut c = divider();
        c.allocate();
        c.set_node(0, NodeId(1));
        c.set_node(1, NodeId(2));
        c.set_node(2, NodeId(3)); // internal junction

        c.stamp(&mut rig.ctx()).unwrap();
        // Junction row sees both conductances
        assert!((rig.mna.matrix()[(2, 2)] - 2e-3).abs() < 1e-15);
        assert!((rig.mna.matrix()[(0, 0)] - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_composite_current_sums_at_net() {
        let mut c = divider();
        c.allocate();
        c.set_node(0, NodeId(1));
        c.set_node(1, NodeId(2));
        c.set_node(2, NodeId(3));

        c.set_node_voltage(0, 2.0);
        c.set_node_voltage(1, 0.0);
        c.set_node_voltage(2, 1.0);

        // 1 mA through each leg; junction net balances to zero
        assert!(c.current_into_node(2).abs() < 1e-15);
        assert!((c.current_into_node(1) - 1e-3).abs() < 1e-15);
    }
}
