//! The MNA system and its stamping primitives.
//!
//! The system is `A * x = b` where `x = [v_1 .. v_{N-1}, i_vs0 .. i_vsV]`:
//! node voltages for every non-ground node followed by one branch current
//! per voltage source. Elements contribute additively through the stamp
//! primitives; the row metadata in [`RowInfo`] records which rows a
//! nonlinear element will touch again during iteration so the simplifier
//! leaves them alone.
//!
//! Sign conventions:
//! - A conductance `g` between nodes p and q adds `+g` to both diagonals
//!   and `-g` to both off-diagonals.
//! - A voltage-source row asserts `v(pos) - v(neg) = V`; its branch
//!   current is positive flowing from the positive terminal through the
//!   source.
//! - `stamp_current_source(from, to, i)` injects `i` amps into `to`.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::ids::NodeId;

/// Simplifier classification of a solution variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowKind {
    /// Ordinary unknown; survives into the reduced system.
    Normal,
    /// Variable is a known constant.
    Const(f64),
    /// Variable equals another variable (by full-system column index).
    Equal(usize),
}

/// Per-row / per-variable metadata used by the simplifier.
#[derive(Debug, Clone)]
pub struct RowInfo {
    pub kind: RowKind,
    /// Matrix entries in this row are restamped during iteration.
    pub ls_changes: bool,
    /// The RHS entry of this row is restamped during iteration.
    pub rs_changes: bool,
    /// Row was consumed by the simplifier.
    pub dropped: bool,
    /// Column index in the reduced system (for `Normal` variables).
    pub map_col: Option<usize>,
}

impl RowInfo {
    fn new() -> Self {
        Self {
            kind: RowKind::Normal,
            ls_changes: false,
            rs_changes: false,
            dropped: false,
            map_col: None,
        }
    }

    /// True if the simplifier may touch this row.
    pub fn simplifiable(&self) -> bool {
        !self.ls_changes && !self.rs_changes && !self.dropped
    }
}

/// Dense MNA system plus per-row metadata.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    num_nodes: usize,
    num_vsources: usize,
    a: DMatrix<f64>,
    b: DVector<f64>,
    row_info: Vec<RowInfo>,
    /// Snapshot taken after the one-shot linear stamp.
    orig_a: Option<DMatrix<f64>>,
    orig_b: Option<DVector<f64>>,
    /// Matrix entries were stamped since the last snapshot/restore.
    matrix_dirty: bool,
}

impl MnaSystem {
    /// Create a zeroed system for `num_nodes` non-ground nodes and
    /// `num_vsources` voltage-source branch currents.
    pub fn new(num_nodes: usize, num_vsources: usize) -> Self {
        let size = num_nodes + num_vsources;
        Self {
            num_nodes,
            num_vsources,
            a: DMatrix::zeros(size, size),
            b: DVector::zeros(size),
            row_info: vec![RowInfo::new(); size],
            orig_a: None,
            orig_b: None,
            matrix_dirty: false,
        }
    }

    /// Total number of unknowns.
    #[inline]
    pub fn size(&self) -> usize {
        self.num_nodes + self.num_vsources
    }

    /// Number of non-ground nodes.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of voltage-source branch currents.
    #[inline]
    pub fn num_vsources(&self) -> usize {
        self.num_vsources
    }

    /// Matrix row owned by voltage source `vs`.
    #[inline]
    pub fn vsource_row(&self, vs: usize) -> usize {
        assert!(vs < self.num_vsources, "voltage source {vs} out of range");
        self.num_nodes + vs
    }

    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    #[inline]
    pub fn rhs(&self) -> &DVector<f64> {
        &self.b
    }

    #[inline]
    pub fn row_info(&self) -> &[RowInfo] {
        &self.row_info
    }

    #[inline]
    pub fn row_info_mut(&mut self) -> &mut [RowInfo] {
        &mut self.row_info
    }

    /// True if matrix entries were stamped since the last snapshot or
    /// restore. A clean matrix lets the solver reuse its factorization.
    #[inline]
    pub fn matrix_dirty(&self) -> bool {
        self.matrix_dirty
    }

    // ─────────────────────────── raw primitives ───────────────────────────

    /// `A[row][col] += v`. Out-of-range indices are a stamp-contract
    /// violation and panic.
    pub fn stamp_matrix(&mut self, row: usize, col: usize, v: f64) {
        let n = self.size();
        assert!(row < n && col < n, "stamp outside matrix: ({row},{col}) in {n}x{n}");
        self.a[(row, col)] += v;
        self.matrix_dirty = true;
    }

    /// `b[row] += v`.
    pub fn stamp_right_side(&mut self, row: usize, v: f64) {
        assert!(row < self.size(), "stamp outside rhs: {} in {}", row, self.size());
        self.b[row] += v;
    }

    /// Marker form: the RHS of `row` will change during iteration.
    /// Inhibits simplification of that row.
    pub fn mark_right_side_dirty(&mut self, row: usize) {
        assert!(row < self.size(), "mark outside rhs: {} in {}", row, self.size());
        self.row_info[row].rs_changes = true;
    }

    /// Mark `row` as restamped each subiteration; the simplifier must
    /// keep it intact.
    pub fn stamp_nonlinear(&mut self, row: usize) {
        assert!(row < self.size(), "mark outside matrix: {} in {}", row, self.size());
        self.row_info[row].ls_changes = true;
    }

    // ────────────────────────── node-level stamps ──────────────────────────

    /// Conductance `g` between two nodes. Ground contributions vanish.
    pub fn stamp_conductance(&mut self, n1: NodeId, n2: NodeId, g: f64) {
        let i = n1.matrix_index();
        let j = n2.matrix_index();
        if let Some(i) = i {
            self.a[(i, i)] += g;
        }
        if let Some(j) = j {
            self.a[(j, j)] += g;
        }
        if let (Some(i), Some(j)) = (i, j) {
            self.a[(i, j)] -= g;
            self.a[(j, i)] -= g;
        }
        self.matrix_dirty = true;
    }

    /// Resistor of `r` ohms between two nodes.
    pub fn stamp_resistor(&mut self, n1: NodeId, n2: NodeId, r: f64) -> Result<()> {
        if !(r.is_finite() && r > 0.0) {
            return Err(Error::InvalidParameter {
                name: "resistance",
                value: r,
            });
        }
        self.stamp_conductance(n1, n2, 1.0 / r);
        Ok(())
    }

    /// Independent current source injecting `i` amps into `to`.
    pub fn stamp_current_source(&mut self, from: NodeId, to: NodeId, i: f64) {
        if let Some(f) = from.matrix_index() {
            self.b[f] -= i;
        }
        if let Some(t) = to.matrix_index() {
            self.b[t] += i;
        }
    }

    /// Ideal voltage source `vs` asserting `v(pos) - v(neg) = v`.
    pub fn stamp_voltage_source(&mut self, pos: NodeId, neg: NodeId, vs: usize, v: f64) {
        let row = self.vsource_row(vs);
        self.stamp_voltage_source_structure(pos, neg, vs);
        self.row_info[row].rs_changes = false;
        self.b[row] += v;
    }

    /// Structural form: places the ±1 pattern for source `vs` but leaves
    /// its value open, marking the row as changing each iteration. Used
    /// by time-varying and nonlinear sources that set the value in
    /// `do_step`.
    pub fn stamp_voltage_source_dynamic(&mut self, pos: NodeId, neg: NodeId, vs: usize) {
        let row = self.vsource_row(vs);
        self.stamp_voltage_source_structure(pos, neg, vs);
        self.row_info[row].rs_changes = true;
    }

    fn stamp_voltage_source_structure(&mut self, pos: NodeId, neg: NodeId, vs: usize) {
        let row = self.vsource_row(vs);
        if let Some(p) = pos.matrix_index() {
            self.a[(p, row)] += 1.0;
            self.a[(row, p)] += 1.0;
        }
        if let Some(n) = neg.matrix_index() {
            self.a[(n, row)] -= 1.0;
            self.a[(row, n)] -= 1.0;
        }
        self.matrix_dirty = true;
    }

    /// Overwrite the value of voltage source `vs` for this iteration.
    pub fn update_voltage_source(&mut self, vs: usize, v: f64) {
        let row = self.vsource_row(vs);
        self.b[row] = v;
    }

    /// Voltage-controlled current source:
    /// `I = gm * (v(ctrl_pos) - v(ctrl_neg))` entering `out_pos`.
    pub fn stamp_vccs(
        &mut self,
        out_pos: NodeId,
        out_neg: NodeId,
        ctrl_pos: NodeId,
        ctrl_neg: NodeId,
        gm: f64,
    ) {
        let op = out_pos.matrix_index();
        let on = out_neg.matrix_index();
        let cp = ctrl_pos.matrix_index();
        let cn = ctrl_neg.matrix_index();

        // Current entering a node moves to the RHS, so the matrix-side
        // sign at the entered node is negative.
        if let Some(i) = op {
            if let Some(j) = cp {
                self.a[(i, j)] -= gm;
            }
            if let Some(j) = cn {
                self.a[(i, j)] += gm;
            }
        }
        if let Some(i) = on {
            if let Some(j) = cp {
                self.a[(i, j)] += gm;
            }
            if let Some(j) = cn {
                self.a[(i, j)] -= gm;
            }
        }
        self.matrix_dirty = true;
    }

    /// Current-controlled current source:
    /// `I = gain * i(vs)` entering `out_pos`.
    pub fn stamp_cccs(&mut self, out_pos: NodeId, out_neg: NodeId, vs: usize, gain: f64) {
        let col = self.vsource_row(vs);
        if let Some(i) = out_pos.matrix_index() {
            self.a[(i, col)] -= gain;
        }
        if let Some(i) = out_neg.matrix_index() {
            self.a[(i, col)] += gain;
        }
        self.matrix_dirty = true;
    }

    // ─────────────────────────── phase bookkeeping ───────────────────────────

    /// Snapshot the linear stamp. The solver restores to this state at the
    /// start of every subiteration before nonlinear restamps.
    pub fn snapshot(&mut self) {
        self.orig_a = Some(self.a.clone());
        self.orig_b = Some(self.b.clone());
        self.matrix_dirty = false;
    }

    /// Restore the working system to the linear-stamp snapshot.
    pub fn restore(&mut self) {
        if let Some(orig) = &self.orig_a {
            self.a.copy_from(orig);
        }
        if let Some(orig) = &self.orig_b {
            self.b.copy_from(orig);
        }
        self.matrix_dirty = false;
    }

    /// True once `snapshot()` has been called.
    pub fn has_snapshot(&self) -> bool {
        self.orig_a.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(i: usize) -> NodeId {
        NodeId(i)
    }

    #[test]
    fn test_conductance_stamp_pattern() {
        let mut mna = MnaSystem::new(2, 0);
        mna.stamp_conductance(n(1), n(2), 0.5);

        assert_eq!(mna.matrix()[(0, 0)], 0.5);
        assert_eq!(mna.matrix()[(1, 1)], 0.5);
        assert_eq!(mna.matrix()[(0, 1)], -0.5);
        assert_eq!(mna.matrix()[(1, 0)], -0.5);
    }

    #[test]
    fn test_conductance_to_ground_stamps_diagonal_only() {
        let mut mna = MnaSystem::new(1, 0);
        mna.stamp_conductance(n(1), NodeId::GROUND, 2.0);

        assert_eq!(mna.matrix()[(0, 0)], 2.0);
        assert_eq!(mna.rhs()[0], 0.0);
    }

    #[test]
    fn test_resistor_rejects_nonpositive() {
        let mut mna = MnaSystem::new(2, 0);
        assert!(matches!(
            mna.stamp_resistor(n(1), n(2), 0.0),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            mna.stamp_resistor(n(1), n(2), -5.0),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            mna.stamp_resistor(n(1), n(2), f64::NAN),
            Err(Error::InvalidParameter { .. })
        ));
        mna.stamp_resistor(n(1), n(2), 1000.0).unwrap();
        assert!((mna.matrix()[(0, 0)] - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_voltage_source_stamp() {
        // 5V source from node 1 to ground, vs row is index 1
        let mut mna = MnaSystem::new(1, 1);
        mna.stamp_voltage_source(n(1), NodeId::GROUND, 0, 5.0);

        assert_eq!(mna.matrix()[(0, 1)], 1.0);
        assert_eq!(mna.matrix()[(1, 0)], 1.0);
        assert_eq!(mna.rhs()[1], 5.0);
        assert!(!mna.row_info()[1].rs_changes);
    }

    #[test]
    fn test_dynamic_voltage_source_marks_row() {
        let mut mna = MnaSystem::new(1, 1);
        mna.stamp_voltage_source_dynamic(n(1), NodeId::GROUND, 0);

        assert_eq!(mna.rhs()[1], 0.0);
        assert!(mna.row_info()[1].rs_changes);
        assert!(!mna.row_info()[1].simplifiable());
    }

    #[test]
    fn test_current_source_rhs() {
        let mut mna = MnaSystem::new(2, 0);
        mna.stamp_current_source(n(1), n(2), 1e-3);

        assert_eq!(mna.rhs()[0], -1e-3);
        assert_eq!(mna.rhs()[1], 1e-3);
    }

    #[test]
    fn test_vccs_stamp_pattern() {
        let mut mna = MnaSystem::new(4, 0);
        mna.stamp_vccs(n(1), n(2), n(3), n(4), 0.1);

        assert_eq!(mna.matrix()[(0, 2)], -0.1);
        assert_eq!(mna.matrix()[(0, 3)], 0.1);
        assert_eq!(mna.matrix()[(1, 2)], 0.1);
        assert_eq!(mna.matrix()[(1, 3)], -0.1);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut mna = MnaSystem::new(2, 0);
        mna.stamp_conductance(n(1), n(2), 1.0);
        mna.snapshot();
        assert!(!mna.matrix_dirty());

        mna.stamp_matrix(0, 0, 10.0);
        mna.stamp_right_side(1, 3.0);
        assert!(mna.matrix_dirty());
        assert_eq!(mna.matrix()[(0, 0)], 11.0);

        mna.restore();
        assert!(!mna.matrix_dirty());
        assert_eq!(mna.matrix()[(0, 0)], 1.0);
        assert_eq!(mna.rhs()[1], 0.0);
    }

    #[test]
    #[should_panic(expected = "stamp outside matrix")]
    fn test_out_of_range_stamp_panics() {
        let mut mna = MnaSystem::new(1, 0);
        mna.stamp_matrix(0, 5, 1.0);
    }
}
