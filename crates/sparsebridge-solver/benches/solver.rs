//! Benchmarks for direct solver contexts.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nalgebra::DVector;
use sparsebridge_solver::eigen::{ArpackContext, Job};
use sparsebridge_solver::{
    CscMatrix, DirectMethod, DirectOptions, DirectSolver, EigenOptions, Triangle,
};

/// Five-point Laplacian on a `side x side` grid.
fn laplacian_2d(side: usize) -> CscMatrix<f64> {
    let n = side * side;
    let mut triplets = Vec::with_capacity(5 * n);
    for row in 0..side {
        for col in 0..side {
            let i = row * side + col;
            triplets.push((i, i, 4.0));
            if row + 1 < side {
                triplets.push((i + side, i, -1.0));
                triplets.push((i, i + side, -1.0));
            }
            if col + 1 < side {
                triplets.push((i + 1, i, -1.0));
                triplets.push((i, i + 1, -1.0));
            }
        }
    }
    CscMatrix::from_triplets(n, n, &triplets).unwrap()
}

fn options_for(method: DirectMethod) -> DirectOptions {
    if method.requires_symmetric() {
        DirectOptions::symmetric(Triangle::Full)
    } else {
        DirectOptions::default()
    }
}

fn bench_factorize(c: &mut Criterion) {
    let mut group = c.benchmark_group("factorize");

    for side in [10, 30] {
        let a = laplacian_2d(side);
        for method in DirectMethod::ALL {
            group.bench_with_input(
                BenchmarkId::new(method.name(), side * side),
                &a,
                |bencher, a| {
                    let options = options_for(method);
                    bencher.iter(|| {
                        let mut solver = DirectSolver::new(method, black_box(a), &options).unwrap();
                        solver.factorize().unwrap();
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve");

    let a = laplacian_2d(30);
    let b = DVector::from_fn(a.rows(), |i, _| (i % 5) as f64 - 2.0);
    for method in DirectMethod::ALL {
        let mut solver = DirectSolver::new(method, &a, &options_for(method)).unwrap();
        solver.factorize().unwrap();
        group.bench_function(BenchmarkId::from_parameter(method.name()), |bencher| {
            bencher.iter(|| solver.solve(black_box(&b)).unwrap());
        });
    }

    group.finish();
}

fn bench_arpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("arpack");

    for side in [8, 16] {
        let a = laplacian_2d(side);
        group.bench_with_input(BenchmarkId::from_parameter(side * side), &a, |bencher, a| {
            let options = EigenOptions::default().with_eigenvectors(false);
            bencher.iter(|| {
                let mut ctx = ArpackContext::new(black_box(a), true, options.clone()).unwrap();
                ctx.solve(4, Job::SmallestMagnitude).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_factorize, bench_solve, bench_arpack);
criterion_main!(benches);
