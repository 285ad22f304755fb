//! Topology analyzer: wire closure, node numbering, ground selection,
//! voltage-source allocation and pathology checks.
//!
//! Posts connect when they share coordinates, when a wire-equivalent
//! element shorts them, or when labeled-node elements carry the same
//! name. The union-find closure over those relations yields the node
//! set; ground (node 0) is the component holding a ground post.

use std::collections::HashMap;

use volta_core::{ComputedValues, ElementId, LabeledNodes, NodeId};
use volta_elements::Element;

use crate::config::GroundPolicy;
use crate::error::{EngineError, Result};

/// Shape of the MNA system produced by one analysis pass.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Node count including ground.
    pub node_count: usize,
    pub vsource_count: usize,
    /// `(element index, local source index)` per global source index.
    pub vsource_owners: Vec<(usize, usize)>,
    /// Nodes that get an implicit 1 GΩ tie to ground.
    pub implicit_ground_nodes: Vec<NodeId>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Run topology analysis. Assigns node and voltage-source indices into
/// the elements, registers computed-value masters and labels, and
/// reports the system shape.
pub fn analyze(
    elements: &mut [Box<dyn Element>],
    labels: &mut LabeledNodes,
    values: &mut ComputedValues,
    ground_policy: GroundPolicy,
) -> Result<Analysis> {
    for element in elements.iter_mut() {
        element.allocate();
    }

    // One union-find slot per post, plus a virtual ground slot at the
    // end.
    let mut slot_of: Vec<(usize, usize)> = Vec::new();
    let mut slot_base: Vec<usize> = Vec::with_capacity(elements.len());
    for (ei, element) in elements.iter().enumerate() {
        slot_base.push(slot_of.len());
        for pi in 0..element.post_count() {
            slot_of.push((ei, pi));
        }
    }
    let ground_slot = slot_of.len();
    let mut uf = UnionFind::new(ground_slot + 1);

    // Coincident posts join.
    let mut by_coord: HashMap<(i32, i32), usize> = HashMap::new();
    for (slot, &(ei, pi)) in slot_of.iter().enumerate() {
        let p = elements[ei].post(pi);
        match by_coord.get(&(p.x, p.y)) {
            Some(&first) => uf.union(slot, first),
            None => {
                by_coord.insert((p.x, p.y), slot);
            }
        }
    }

    // Wire-equivalent elements short their two posts.
    for (ei, element) in elements.iter().enumerate() {
        if element.is_wire() && element.post_count() == 2 {
            uf.union(slot_base[ei], slot_base[ei] + 1);
        }
    }

    // Labeled nodes with the same name share a node.
    let mut by_label: HashMap<String, usize> = HashMap::new();
    for (ei, element) in elements.iter().enumerate() {
        if let Some(name) = element.label_name() {
            match by_label.get(name) {
                Some(&first) => uf.union(slot_base[ei], first),
                None => {
                    by_label.insert(name.to_string(), slot_base[ei]);
                }
            }
        }
    }

    // Ground posts pull their component onto node 0.
    let mut has_ground_post = false;
    for (ei, element) in elements.iter().enumerate() {
        for pi in 0..element.post_count() {
            if element.has_ground_post(pi) {
                uf.union(slot_base[ei] + pi, ground_slot);
                has_ground_post = true;
            }
        }
    }

    // Number the components: ground first, the rest in slot order.
    let ground_root = uf.find(ground_slot);
    let mut node_of_root: HashMap<usize, NodeId> = HashMap::new();
    node_of_root.insert(ground_root, NodeId::GROUND);
    let mut next_node = 1;
    for slot in 0..slot_of.len() {
        let root = uf.find(slot);
        node_of_root.entry(root).or_insert_with(|| {
            let id = NodeId(next_node);
            next_node += 1;
            id
        });
    }

    for (slot, &(ei, pi)) in slot_of.iter().enumerate() {
        let root = uf.find(slot);
        elements[ei].set_node(pi, node_of_root[&root]);
    }

    // Internal nodes come after all post nodes.
    for element in elements.iter_mut() {
        let posts = element.post_count();
        for k in 0..element.internal_node_count() {
            element.set_node(posts + k, NodeId(next_node));
            next_node += 1;
        }
    }
    let node_count = next_node;

    // Global voltage-source indices, in element order.
    let mut vsource_owners = Vec::new();
    for (ei, element) in elements.iter_mut().enumerate() {
        for local in 0..element.voltage_source_count() {
            element.set_voltage_source(local, vsource_owners.len());
            vsource_owners.push((ei, local));
        }
    }

    // Master registration, then labels (tables consult master-ship).
    for (ei, element) in elements.iter_mut().enumerate() {
        element.register_values(values, ElementId(ei));
    }
    for (ei, element) in elements.iter_mut().enumerate() {
        element.register_labels(labels, values, ElementId(ei));
    }

    // Pathologies: a voltage source shorted onto one node, or two
    // ideal sources in parallel across the same node pair.
    let mut source_pairs: HashMap<(usize, usize), usize> = HashMap::new();
    for element in elements.iter() {
        if element.voltage_source_count() == 0 || element.post_count() != 2 {
            continue;
        }
        let (a, b) = (element.node(0).0, element.node(1).0);
        if a == b {
            return Err(EngineError::VoltageSourceLoop { node: a });
        }
        let key = (a.min(b), a.max(b));
        if let Some(&node) = source_pairs.get(&key) {
            return Err(EngineError::VoltageSourceLoop { node });
        }
        source_pairs.insert(key, a);
    }

    // Ground reachability: nodes with a conduction path to ground (or
    // to a ground-referencing element) need no implicit tie.
    let implicit_ground_nodes = if node_count > 1 {
        let mut grounded = vec![false; node_count];
        grounded[0] = true;
        for element in elements.iter() {
            if element.connects_to_ground() {
                for pi in 0..element.post_count() {
                    grounded[element.node(pi).0] = true;
                }
                for k in 0..element.internal_node_count() {
                    grounded[element.node(element.post_count() + k).0] = true;
                }
            }
        }
        // Propagate through element conduction paths to a fixpoint.
        loop {
            let mut changed = false;
            for element in elements.iter() {
                let posts = element.post_count();
                for a in 0..posts {
                    for b in 0..posts {
                        if a == b || !element.get_connection(a, b) {
                            continue;
                        }
                        let (na, nb) = (element.node(a).0, element.node(b).0);
                        if grounded[na] && !grounded[nb] {
                            grounded[nb] = true;
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        let floating: Vec<NodeId> = (1..node_count)
            .filter(|n| !grounded[*n])
            .map(NodeId)
            .collect();
        if floating.is_empty() {
            Vec::new()
        } else {
            match ground_policy {
                GroundPolicy::ExplicitOnly if !has_ground_post => {
                    return Err(EngineError::NoGround);
                }
                GroundPolicy::ExplicitOnly => {
                    // Partial ground exists; floating islands still get
                    // tied so the matrix stays solvable.
                    tie_warn(&floating);
                    floating
                }
                GroundPolicy::ImplicitViaBigResistor => {
                    tie_warn(&floating);
                    floating
                }
            }
        }
    } else {
        Vec::new()
    };

    Ok(Analysis {
        node_count,
        vsource_count: vsource_owners.len(),
        vsource_owners,
        implicit_ground_nodes,
    })
}

fn tie_warn(floating: &[NodeId]) {
    log::warn!(
        "{} node(s) have no path to ground; tying through 1 GΩ",
        floating.len()
    );
}
