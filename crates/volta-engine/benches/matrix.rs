//! Matrix kernel benchmarks: factorization vs the RHS-only re-solve
//! path that nonlinear subiterations lean on.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nalgebra::{DMatrix, DVector};
use volta_engine::lu::{factor, solve_factored};

fn ladder_system(n: usize) -> (DMatrix<f64>, DVector<f64>) {
    // Resistor-ladder-shaped tridiagonal conductance matrix
    let a = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            2.1e-3
        } else if i.abs_diff(j) == 1 {
            -1e-3
        } else {
            0.0
        }
    });
    let b = DVector::from_fn(n, |i, _| if i == 0 { 5e-3 } else { 0.0 });
    (a, b)
}

fn bench_factor(c: &mut Criterion) {
    let (a, _) = ladder_system(30);
    c.bench_function("factor_30", |bench| {
        bench.iter(|| factor(black_box(a.clone())).unwrap());
    });
}

fn bench_resolve(c: &mut Criterion) {
    let (a, b) = ladder_system(30);
    let f = factor(a).unwrap();
    c.bench_function("resolve_30", |bench| {
        bench.iter(|| solve_factored(black_box(&f), black_box(&b)));
    });
}

criterion_group!(benches, bench_factor, bench_resolve);
criterion_main!(benches);
