//! Matrix kernel: row simplification, Crout LU with partial pivoting,
//! and the sparse large-matrix path.
//!
//! The simplifier scans the stamped system for rows it can eliminate
//! before factorization:
//! - a row with one unknown pins that variable to a constant
//!   (`RowKind::Const`), folded into other rows' RHS;
//! - a row with two equal-and-opposite coefficients and a zero RHS
//!   makes one variable an alias of the other (`RowKind::Equal`).
//!
//! Rows whose matrix or RHS entries are restamped during iteration
//! (`ls_changes` / `rs_changes`) are never touched, so a later
//! nonlinear stamp always finds its row intact.
//!
//! Systems at or above the configured size threshold skip
//! simplification entirely and go through faer's sparse LU instead.

use faer::prelude::*;
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};

use volta_core::mna::{MnaSystem, RowKind};

use crate::error::{EngineError, Result};

/// Relative pivot threshold: a pivot below this fraction of its row's
/// largest entry flags the matrix as singular.
const PIVOT_EPSILON: f64 = 1e-13;

/// Structural result of the simplification pass. Valid until the next
/// topology analysis.
#[derive(Debug, Clone)]
pub struct ReducedSystem {
    /// Reduced column per full-system column (`None` = eliminated).
    col_map: Vec<Option<usize>>,
    /// Full-system rows that survive, in order.
    kept_rows: Vec<usize>,
}

impl ReducedSystem {
    /// Identity reduction (nothing eliminated).
    pub fn identity(size: usize) -> Self {
        Self {
            col_map: (0..size).map(Some).collect(),
            kept_rows: (0..size).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.kept_rows.len()
    }

    pub fn full_size(&self) -> usize {
        self.col_map.len()
    }
}

/// Run the simplification pass, updating row metadata in `mna` and
/// returning the reduced structure.
pub fn simplify(mna: &mut MnaSystem) -> ReducedSystem {
    let n = mna.size();
    let mut dropped = vec![false; n];

    loop {
        let mut changed = false;

        'rows: for i in 0..n {
            if dropped[i] {
                continue;
            }
            {
                let info = &mna.row_info()[i];
                if info.ls_changes || info.rs_changes {
                    continue;
                }
            }

            // Gather this row's live terms, folding constants into the
            // RHS and resolving aliased columns to their targets.
            let mut rhs = mna.rhs()[i];
            let mut terms: Vec<(usize, f64)> = Vec::new();
            for j in 0..n {
                let v = mna.matrix()[(i, j)];
                if v == 0.0 {
                    continue;
                }
                match resolve(mna, j) {
                    Resolved::Const(c) => rhs -= c * v,
                    Resolved::Var(target) => {
                        if let Some(term) = terms.iter_mut().find(|(col, _)| *col == target) {
                            term.1 += v;
                        } else {
                            terms.push((target, v));
                        }
                        if terms.len() > 2 {
                            continue 'rows;
                        }
                    }
                }
            }
            terms.retain(|(_, v)| *v != 0.0);

            match terms.as_slice() {
                [(col, coeff)] => {
                    let col = *col;
                    if matches!(mna.row_info()[col].kind, RowKind::Normal) {
                        mna.row_info_mut()[col].kind = RowKind::Const(rhs / coeff);
                        dropped[i] = true;
                        changed = true;
                    }
                }
                [(c1, v1), (c2, v2)] if *v1 == -*v2 && rhs == 0.0 => {
                    let (c1, c2) = (*c1, *c2);
                    if matches!(mna.row_info()[c1].kind, RowKind::Normal)
                        && matches!(mna.row_info()[c2].kind, RowKind::Normal)
                        && c1 != c2
                    {
                        mna.row_info_mut()[c1].kind = RowKind::Equal(c2);
                        dropped[i] = true;
                        changed = true;
                    }
                }
                _ => {}
            }
        }

        if !changed {
            break;
        }
    }

    // Assign reduced columns to the surviving variables.
    let mut col_map = vec![None; n];
    let mut next = 0;
    for (j, slot) in col_map.iter_mut().enumerate() {
        if matches!(mna.row_info()[j].kind, RowKind::Normal) {
            *slot = Some(next);
            next += 1;
        }
    }
    let kept_rows: Vec<usize> = (0..n).filter(|i| !dropped[*i]).collect();

    if kept_rows.len() != next {
        // Eliminations left the system non-square (redundant or
        // contradictory rows). Undo and let factorization report it.
        for info in mna.row_info_mut() {
            info.kind = RowKind::Normal;
            info.dropped = false;
        }
        return ReducedSystem::identity(n);
    }

    for (i, info) in mna.row_info_mut().iter_mut().enumerate() {
        info.dropped = dropped[i];
        info.map_col = col_map[i];
    }

    ReducedSystem { col_map, kept_rows }
}

enum Resolved {
    Const(f64),
    Var(usize),
}

/// Follow `Equal` chains to a terminal variable or constant.
fn resolve(mna: &MnaSystem, mut col: usize) -> Resolved {
    for _ in 0..mna.size() {
        match mna.row_info()[col].kind {
            RowKind::Normal => return Resolved::Var(col),
            RowKind::Const(v) => return Resolved::Const(v),
            RowKind::Equal(target) => col = target,
        }
    }
    Resolved::Var(col)
}

/// Build the reduced matrix from the current full matrix.
pub fn build_reduced_matrix(mna: &MnaSystem, red: &ReducedSystem) -> DMatrix<f64> {
    let m = red.size();
    let mut out = DMatrix::zeros(m, m);
    for (ri, &i) in red.kept_rows.iter().enumerate() {
        for j in 0..mna.size() {
            let v = mna.matrix()[(i, j)];
            if v == 0.0 {
                continue;
            }
            if let Resolved::Var(target) = resolve(mna, j) {
                if let Some(rj) = red.col_map[target] {
                    out[(ri, rj)] += v;
                }
            }
        }
    }
    out
}

/// Build the reduced RHS from the current full system, folding constant
/// columns.
pub fn build_reduced_rhs(mna: &MnaSystem, red: &ReducedSystem) -> DVector<f64> {
    let m = red.size();
    let mut out = DVector::zeros(m);
    for (ri, &i) in red.kept_rows.iter().enumerate() {
        let mut rhs = mna.rhs()[i];
        for j in 0..mna.size() {
            let v = mna.matrix()[(i, j)];
            if v == 0.0 {
                continue;
            }
            if let Resolved::Const(c) = resolve(mna, j) {
                rhs -= c * v;
            }
        }
        out[ri] = rhs;
    }
    out
}

/// Expand a reduced solution back to the full variable set.
pub fn expand_solution(mna: &MnaSystem, red: &ReducedSystem, xr: &DVector<f64>) -> DVector<f64> {
    let n = mna.size();
    let mut out = DVector::zeros(n);
    for j in 0..n {
        out[j] = match resolve(mna, j) {
            Resolved::Const(v) => v,
            Resolved::Var(target) => match red.col_map[target] {
                Some(rj) => xr[rj],
                None => 0.0,
            },
        };
    }
    out
}

/// In-place Crout LU factorization with partial pivoting.
#[derive(Debug, Clone)]
pub struct Factored {
    lu: DMatrix<f64>,
    pivots: Vec<usize>,
}

impl Factored {
    pub fn size(&self) -> usize {
        self.lu.nrows()
    }
}

/// Factor a dense matrix. Fails with [`EngineError::SingularMatrix`]
/// when a pivot falls below the scaled threshold.
pub fn factor(mut a: DMatrix<f64>) -> Result<Factored> {
    let n = a.nrows();
    let mut pivots = vec![0usize; n];
    let mut scale = vec![0.0f64; n];

    for i in 0..n {
        let mut big = 0.0f64;
        for j in 0..n {
            big = big.max(a[(i, j)].abs());
        }
        if big == 0.0 {
            return Err(EngineError::SingularMatrix);
        }
        scale[i] = 1.0 / big;
    }

    for j in 0..n {
        for i in 0..j {
            let mut sum = a[(i, j)];
            for k in 0..i {
                sum -= a[(i, k)] * a[(k, j)];
            }
            a[(i, j)] = sum;
        }

        let mut big = 0.0;
        let mut imax = j;
        for i in j..n {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= a[(i, k)] * a[(k, j)];
            }
            a[(i, j)] = sum;
            let weighted = scale[i] * sum.abs();
            if weighted >= big {
                big = weighted;
                imax = i;
            }
        }

        if imax != j {
            a.swap_rows(imax, j);
            scale[imax] = scale[j];
        }
        pivots[j] = imax;

        // Pivot threshold scaled by the row's largest original entry.
        let pivot = a[(j, j)];
        if pivot.abs() * scale[j] < PIVOT_EPSILON {
            return Err(EngineError::SingularMatrix);
        }
        if j + 1 < n {
            let inv = 1.0 / pivot;
            for i in j + 1..n {
                a[(i, j)] *= inv;
            }
        }
    }

    Ok(Factored { lu: a, pivots })
}

/// Solve against an existing factorization. The fast path for RHS-only
/// changes: no matrix copy, just the two substitution sweeps.
pub fn solve_factored(f: &Factored, b: &DVector<f64>) -> DVector<f64> {
    let n = f.lu.nrows();
    let mut x = b.clone();

    // Apply row permutation and forward-substitute L (unit diagonal in
    // the strictly-lower part holds the multipliers).
    for i in 0..n {
        x.swap_rows(i, f.pivots[i]);
        let mut sum = x[i];
        for k in 0..i {
            sum -= f.lu[(i, k)] * x[k];
        }
        x[i] = sum;
    }
    // Back-substitute U.
    for i in (0..n).rev() {
        let mut sum = x[i];
        for k in i + 1..n {
            sum -= f.lu[(i, k)] * x[k];
        }
        x[i] = sum / f.lu[(i, i)];
    }
    x
}

/// Sparse LU solve for large systems, via faer. The full (unreduced)
/// system solves in one shot; duplicate triplets sum automatically.
pub fn solve_sparse(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let n = a.nrows();
    let mut triplets = Vec::new();
    for i in 0..n {
        for j in 0..n {
            let v = a[(i, j)];
            if v != 0.0 {
                triplets.push(Triplet::new(i, j, v));
            }
        }
    }

    let sparse = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
        .map_err(|_| EngineError::SingularMatrix)?;
    let lu = sparse.sp_lu().map_err(|_| EngineError::SingularMatrix)?;

    let rhs = Col::<f64>::from_fn(n, |i| b[i]);
    let x = lu.solve(&rhs);
    Ok(DVector::from_fn(n, |i, _| x[i]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};
    use volta_core::NodeId;

    #[test]
    fn test_factor_and_solve() {
        // 2x + y = 5, x + 3y = 6 → x = 1.8, y = 1.4
        let a = dmatrix![2.0, 1.0; 1.0, 3.0];
        let f = factor(a).unwrap();
        let x = solve_factored(&f, &dvector![5.0, 6.0]);
        assert!((x[0] - 1.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_factor_reuse_for_new_rhs() {
        let a = dmatrix![4.0, 1.0; 2.0, 3.0];
        let f = factor(a.clone()).unwrap();
        for rhs in [dvector![1.0, 0.0], dvector![0.0, 1.0], dvector![3.0, -2.0]] {
            let x = solve_factored(&f, &rhs);
            let residual = &a * &x - &rhs;
            assert!(residual.amax() < 1e-12, "residual = {}", residual.amax());
        }
    }

    #[test]
    fn test_singular_matrix_detected() {
        let a = dmatrix![1.0, 2.0; 2.0, 4.0];
        assert!(matches!(factor(a), Err(EngineError::SingularMatrix)));
        let zero = DMatrix::zeros(2, 2);
        assert!(matches!(factor(zero), Err(EngineError::SingularMatrix)));
    }

    #[test]
    fn test_pivoting_handles_zero_diagonal() {
        let a = dmatrix![0.0, 1.0; 1.0, 0.0];
        let f = factor(a).unwrap();
        let x = solve_factored(&f, &dvector![2.0, 3.0]);
        assert!((x[0] - 3.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    /// Battery + divider: v1 = 5 pinned by the source row, v2 from the
    /// resistor chain. The source row must fold to a constant.
    fn stamped_divider() -> MnaSystem {
        let mut mna = MnaSystem::new(2, 1);
        mna.stamp_voltage_source(NodeId(1), NodeId::GROUND, 0, 5.0);
        mna.stamp_resistor(NodeId(1), NodeId(2), 1000.0).unwrap();
        mna.stamp_resistor(NodeId(2), NodeId::GROUND, 1000.0).unwrap();
        mna.snapshot();
        mna
    }

    #[test]
    fn test_simplifier_pins_source_node() {
        let mut mna = stamped_divider();
        let red = simplify(&mut mna);
        // v1 became a constant; the system shrinks
        assert!(matches!(mna.row_info()[0].kind, RowKind::Const(v) if (v - 5.0).abs() < 1e-12));
        assert!(red.size() < red.full_size());
    }

    #[test]
    fn test_simplified_solution_matches_unsimplified() {
        // Unsimplified solve
        let plain = stamped_divider();
        let red_id = ReducedSystem::identity(plain.size());
        let a = build_reduced_matrix(&plain, &red_id);
        let b = build_reduced_rhs(&plain, &red_id);
        let x_plain = solve_factored(&factor(a).unwrap(), &b);

        // Simplified solve, projected back
        let mut simp = stamped_divider();
        let red = simplify(&mut simp);
        let a = build_reduced_matrix(&simp, &red);
        let b = build_reduced_rhs(&simp, &red);
        let xr = solve_factored(&factor(a).unwrap(), &b);
        let x_full = expand_solution(&simp, &red, &xr);

        for i in 0..plain.size() {
            assert!(
                (x_plain[i] - x_full[i]).abs() < 1e-9,
                "x[{i}]: {} vs {}",
                x_plain[i],
                x_full[i]
            );
        }
    }

    #[test]
    fn test_simplifier_respects_change_flags() {
        let mut mna = MnaSystem::new(1, 1);
        // Dynamic source: the row would fold to a constant, but its RHS
        // changes every iteration, so it must survive.
        mna.stamp_voltage_source_dynamic(NodeId(1), NodeId::GROUND, 0);
        mna.stamp_resistor(NodeId(1), NodeId::GROUND, 100.0).unwrap();
        mna.snapshot();

        let red = simplify(&mut mna);
        assert_eq!(red.size(), red.full_size(), "flagged rows must not fold");
        assert!(matches!(mna.row_info()[0].kind, RowKind::Normal));
    }

    #[test]
    fn test_wire_like_row_contracts_to_equal() {
        // Row asserting v1 - v2 = 0 via a 0V source, plus load resistors
        let mut mna = MnaSystem::new(2, 1);
        mna.stamp_voltage_source(NodeId(1), NodeId(2), 0, 0.0);
        mna.stamp_resistor(NodeId(1), NodeId::GROUND, 10.0).unwrap();
        mna.stamp_resistor(NodeId(2), NodeId::GROUND, 10.0).unwrap();
        mna.snapshot();

        let red = simplify(&mut mna);
        let equal_count = mna
            .row_info()
            .iter()
            .filter(|ri| matches!(ri.kind, RowKind::Equal(_)))
            .count();
        assert_eq!(equal_count, 1);
        assert!(red.size() < 3);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let size = 20;
        let a = DMatrix::from_fn(size, size, |i, j| {
            if i == j {
                size as f64 + 1.0
            } else {
                1.0 / ((i as f64 - j as f64).abs() + 1.0)
            }
        });
        let b = DVector::from_fn(size, |i, _| (i + 1) as f64);

        let dense = solve_factored(&factor(a.clone()).unwrap(), &b);
        let sparse = solve_sparse(&a, &b).unwrap();
        for i in 0..size {
            assert!(
                (dense[i] - sparse[i]).abs() < 1e-9,
                "mismatch at {i}: {} vs {}",
                dense[i],
                sparse[i]
            );
        }
    }
}
