//! Labeled-node registry.
//!
//! Multiple labeled-node elements carrying the same name share one node
//! index; the first registrant during topology analysis wins and later
//! registrants are handed the existing index. The registry is rebuilt on
//! every analysis pass.

use indexmap::IndexMap;

use crate::ids::NodeId;

/// Name → node index map, rebuilt each topology analysis.
#[derive(Debug, Default)]
pub struct LabeledNodes {
    map: IndexMap<String, NodeId>,
}

impl LabeledNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` at `node`. Returns the node the name resolves to:
    /// the given node for a first registration, the existing one for a
    /// collision.
    pub fn register(&mut self, name: &str, node: NodeId) -> NodeId {
        *self.map.entry(name.to_string()).or_insert(node)
    }

    /// Look up a label.
    pub fn resolve(&self, name: &str) -> Option<NodeId> {
        self.map.get(name).copied()
    }

    /// True if the name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Iterate over (name, node) pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
