//! Triple-buffered computed-value registry.
//!
//! Non-MNA elements (equation tables, Godley tables, the arithmetic
//! elements) publish scalars by name. Three buffers keep element order
//! irrelevant:
//!
//! - `current` - what `do_step` reads this subiteration
//! - `pending` - what `do_step` writes this subiteration
//! - `converged` - what display/scope surfaces read
//!
//! After every element has run, `pending` rotates into `current`; once
//! the timestep converges, `current` rotates into `converged`. Before
//! the rotation no element can observe another element's new write.

use indexmap::{IndexMap, IndexSet};

use crate::ids::ElementId;

/// Default master priority for elements that don't ask for one.
pub const DEFAULT_MASTER_PRIORITY: u8 = 5;

#[derive(Debug, Clone, Copy)]
struct Master {
    element: ElementId,
    priority: u8,
}

/// Name → value registry with double-buffered writes and master-priority
/// ownership of shared names.
#[derive(Debug, Default)]
pub struct ComputedValues {
    current: IndexMap<String, f64>,
    pending: IndexMap<String, f64>,
    converged: IndexMap<String, f64>,
    masters: IndexMap<String, Master>,
    live: IndexSet<String>,
}

impl ComputedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `element` as a candidate master for `name`. Higher
    /// priority wins; ties keep the first registrant. Returns true if the
    /// element now owns the name.
    pub fn register_master(&mut self, name: &str, element: ElementId, priority: u8) -> bool {
        if let Some(m) = self.masters.get_mut(name) {
            if m.element == element {
                m.priority = priority;
                return true;
            }
            if priority > m.priority {
                *m = Master { element, priority };
                return true;
            }
            return false;
        }
        self.masters
            .insert(name.to_string(), Master { element, priority });
        true
    }

    /// True if `element` owns `name` (or no master is registered at all).
    pub fn is_master(&self, name: &str, element: ElementId) -> bool {
        match self.masters.get(name) {
            Some(m) => m.element == element,
            None => true,
        }
    }

    /// Write `value` under `name` into the pending buffer. Writes from a
    /// non-master element for an owned name are dropped.
    pub fn set(&mut self, name: &str, value: f64, writer: ElementId) {
        if !self.is_master(name, writer) {
            return;
        }
        self.pending.insert(name.to_string(), value);
        self.live.insert(name.to_string());
    }

    /// Write `value` into all three buffers at once. For externally
    /// driven parameters (model constants, slider actions) mutated
    /// between frames, outside the double-buffer discipline.
    pub fn set_external(&mut self, name: &str, value: f64) {
        self.current.insert(name.to_string(), value);
        self.converged.insert(name.to_string(), value);
    }

    /// Read from the current buffer.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.current.get(name).copied()
    }

    /// Read from the converged buffer (what display surfaces see).
    pub fn get_converged(&self, name: &str) -> Option<f64> {
        self.converged.get(name).copied()
    }

    /// Record that `name` was produced this timestep.
    pub fn mark_computed(&mut self, name: &str) {
        self.live.insert(name.to_string());
    }

    /// True if `name` was produced this timestep.
    pub fn computed_this_step(&self, name: &str) -> bool {
        self.live.contains(name)
    }

    /// Rotate `pending → current` after all `do_step`s of a subiteration.
    pub fn commit_pending_to_current(&mut self) {
        for (name, value) in self.pending.drain(..) {
            self.current.insert(name, value);
        }
    }

    /// Rotate `current → converged` after the timestep converges.
    pub fn commit_current_to_converged(&mut self) {
        for (name, value) in &self.current {
            self.converged.insert(name.clone(), *value);
        }
        self.live.clear();
    }

    /// Names present in the converged buffer.
    pub fn converged_names(&self) -> impl Iterator<Item = &str> {
        self.converged.keys().map(String::as_str)
    }

    /// Drop all buffers and master registrations. Used by engine reset
    /// and re-analysis (masters re-register during topology analysis).
    pub fn clear(&mut self) {
        self.current.clear();
        self.pending.clear();
        self.converged.clear();
        self.masters.clear();
        self.live.clear();
    }

    /// Drop master registrations only; value buffers survive a topology
    /// re-analysis so expressions keep their last committed inputs.
    pub fn clear_masters(&mut self) {
        self.masters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ElementId = ElementId(1);
    const B: ElementId = ElementId(2);

    #[test]
    fn test_writes_invisible_until_commit() {
        let mut cv = ComputedValues::new();
        cv.set("x", 1.5, A);
        assert_eq!(cv.get("x"), None);

        cv.commit_pending_to_current();
        assert_eq!(cv.get("x"), Some(1.5));
        assert_eq!(cv.get_converged("x"), None);

        cv.commit_current_to_converged();
        assert_eq!(cv.get_converged("x"), Some(1.5));
    }

    #[test]
    fn test_higher_priority_master_wins() {
        let mut cv = ComputedValues::new();
        assert!(cv.register_master("Cash", B, 5));
        assert!(cv.register_master("Cash", A, 10));
        assert!(cv.is_master("Cash", A));
        assert!(!cv.is_master("Cash", B));

        cv.set("Cash", 100.0, A);
        cv.set("Cash", -7.0, B); // dropped: B lost the name
        cv.commit_pending_to_current();
        cv.commit_current_to_converged();
        assert_eq!(cv.get_converged("Cash"), Some(100.0));
    }

    #[test]
    fn test_tie_keeps_first_registrant() {
        let mut cv = ComputedValues::new();
        assert!(cv.register_master("H", A, 5));
        assert!(!cv.register_master("H", B, 5));
        assert!(cv.is_master("H", A));
    }

    #[test]
    fn test_reregistration_updates_priority() {
        let mut cv = ComputedValues::new();
        cv.register_master("x", A, 5);
        cv.register_master("x", B, 7);
        assert!(cv.is_master("x", B));
        // A comes back with a raised priority
        cv.register_master("x", A, 9);
        assert!(cv.is_master("x", A));
    }

    #[test]
    fn test_liveness_cleared_per_step() {
        let mut cv = ComputedValues::new();
        cv.set("y", 2.0, A);
        assert!(cv.computed_this_step("y"));
        cv.commit_pending_to_current();
        cv.commit_current_to_converged();
        assert!(!cv.computed_this_step("y"));
    }
}
