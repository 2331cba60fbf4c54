//! Matrix builders shared by the integration tests.

#![allow(dead_code)]

use nalgebra::DVector;
use sparsebridge_solver::{Complex64, CscMatrix, Element};

/// Symmetric tridiagonal `[-1, diagonal, -1]` matrix of order `n`.
pub fn tridiagonal(n: usize, diagonal: f64) -> CscMatrix<f64> {
    let mut triplets = Vec::with_capacity(3 * n);
    for i in 0..n {
        triplets.push((i, i, diagonal));
        if i + 1 < n {
            triplets.push((i + 1, i, -1.0));
            triplets.push((i, i + 1, -1.0));
        }
    }
    CscMatrix::from_triplets(n, n, &triplets).unwrap()
}

/// Five-point Laplacian on a `side x side` grid.
pub fn laplacian_2d(side: usize) -> CscMatrix<f64> {
    let n = side * side;
    let index = |row: usize, col: usize| row * side + col;
    let mut triplets = Vec::with_capacity(5 * n);
    for row in 0..side {
        for col in 0..side {
            let i = index(row, col);
            triplets.push((i, i, 4.0));
            if row + 1 < side {
                triplets.push((index(row + 1, col), i, -1.0));
                triplets.push((i, index(row + 1, col), -1.0));
            }
            if col + 1 < side {
                triplets.push((index(row, col + 1), i, -1.0));
                triplets.push((i, index(row, col + 1), -1.0));
            }
        }
    }
    CscMatrix::from_triplets(n, n, &triplets).unwrap()
}

/// Small deterministic generator so the tests need no extra crates.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Uniform in `[-1, 1)`.
    pub fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    pub fn index(&mut self, bound: usize) -> usize {
        ((self.next() + 1.0) * 0.5 * bound as f64) as usize % bound
    }
}

/// Random unsymmetric, diagonally dominant matrix with about `per_column`
/// off-diagonal entries per column.
pub fn random_sparse(n: usize, per_column: usize, seed: u64) -> CscMatrix<f64> {
    let mut rng = Lcg::new(seed);
    let mut triplets = Vec::new();
    for j in 0..n {
        triplets.push((j, j, per_column as f64 + 2.0 + rng.next().abs()));
        for _ in 0..per_column {
            let i = rng.index(n);
            if i != j {
                triplets.push((i, j, rng.next()));
            }
        }
    }
    CscMatrix::from_triplets(n, n, &triplets).unwrap()
}

/// Complex variant of [`random_sparse`].
pub fn random_sparse_complex(n: usize, per_column: usize, seed: u64) -> CscMatrix<Complex64> {
    let mut rng = Lcg::new(seed);
    let mut triplets = Vec::new();
    for j in 0..n {
        triplets.push((j, j, Complex64::new(per_column as f64 + 2.0, rng.next())));
        for _ in 0..per_column {
            let i = rng.index(n);
            if i != j {
                triplets.push((i, j, Complex64::new(rng.next(), rng.next())));
            }
        }
    }
    CscMatrix::from_triplets(n, n, &triplets).unwrap()
}

pub fn random_vector(n: usize, seed: u64) -> DVector<f64> {
    let mut rng = Lcg::new(seed);
    DVector::from_fn(n, |_, _| rng.next())
}

/// `‖A x - b‖ / ‖b‖`.
pub fn relative_residual<T: Element>(a: &CscMatrix<T>, x: &DVector<T>, b: &DVector<T>) -> f64 {
    let ax = DVector::from_vec(a.multiply(x.as_slice()).unwrap());
    (ax - b).norm() / b.norm()
}

pub fn relative_error<T: Element>(actual: &DVector<T>, expected: &DVector<T>) -> f64 {
    (actual - expected).norm() / expected.norm()
}
