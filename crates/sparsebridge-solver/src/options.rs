//! Solver configuration.
//!
//! Options are plain structs with `with_*` builders. Every field has a
//! default, so a JSON file only needs to name what it changes.

use serde::{Deserialize, Serialize};

/// Fill-reducing ordering requested from the native library.
///
/// Each backend maps this onto the closest ordering it supports; `Default`
/// keeps the library's own choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ordering {
    #[default]
    Default,
    /// No reordering.
    Natural,
    /// Approximate minimum degree.
    Amd,
    /// Column approximate minimum degree.
    Colamd,
    /// Nested dissection.
    Metis,
    /// Let the library try several and keep the best.
    Best,
}

/// Which part of a symmetric matrix is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Triangle {
    /// Both triangles are stored.
    #[default]
    Full,
    /// Only entries with `row <= column`.
    Upper,
    /// Only entries with `row >= column`.
    Lower,
}

/// PARDISO matrix types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PardisoMatrixType {
    RealStructurallySymmetric,
    RealSymmetricPositiveDefinite,
    RealSymmetricIndefinite,
    RealUnsymmetric,
    ComplexStructurallySymmetric,
    ComplexHermitianPositiveDefinite,
    ComplexHermitianIndefinite,
    ComplexSymmetric,
    ComplexUnsymmetric,
}

impl PardisoMatrixType {
    /// The `mtype` code passed to the library.
    pub fn code(self) -> i32 {
        match self {
            PardisoMatrixType::RealStructurallySymmetric => 1,
            PardisoMatrixType::RealSymmetricPositiveDefinite => 2,
            PardisoMatrixType::RealSymmetricIndefinite => -2,
            PardisoMatrixType::RealUnsymmetric => 11,
            PardisoMatrixType::ComplexStructurallySymmetric => 3,
            PardisoMatrixType::ComplexHermitianPositiveDefinite => 4,
            PardisoMatrixType::ComplexHermitianIndefinite => -4,
            PardisoMatrixType::ComplexSymmetric => 6,
            PardisoMatrixType::ComplexUnsymmetric => 13,
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            PardisoMatrixType::ComplexStructurallySymmetric
                | PardisoMatrixType::ComplexHermitianPositiveDefinite
                | PardisoMatrixType::ComplexHermitianIndefinite
                | PardisoMatrixType::ComplexSymmetric
                | PardisoMatrixType::ComplexUnsymmetric
        )
    }

    /// Whether the library reads a single triangle.
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            PardisoMatrixType::RealSymmetricPositiveDefinite
                | PardisoMatrixType::RealSymmetricIndefinite
                | PardisoMatrixType::ComplexHermitianPositiveDefinite
                | PardisoMatrixType::ComplexHermitianIndefinite
                | PardisoMatrixType::ComplexSymmetric
        )
    }

    /// Default type for a matrix of the given element kind and symmetry.
    pub fn default_for(complex: bool, symmetric: bool) -> Self {
        match (complex, symmetric) {
            (false, false) => PardisoMatrixType::RealUnsymmetric,
            (false, true) => PardisoMatrixType::RealSymmetricIndefinite,
            (true, false) => PardisoMatrixType::ComplexUnsymmetric,
            (true, true) => PardisoMatrixType::ComplexHermitianIndefinite,
        }
    }
}

/// Options for direct (factorization based) solvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectOptions {
    /// Fill-reducing ordering.
    pub ordering: Ordering,
    /// Numeric pivoting threshold; `None` keeps the library default.
    pub pivot_tolerance: Option<f64>,
    /// The matrix is symmetric (Hermitian for complex values).
    pub symmetric: bool,
    /// Stored part of a symmetric matrix.
    pub triangle: Triangle,
    /// Iterative refinement steps after each solve; `None` keeps the library default.
    pub refinement_steps: Option<u32>,
    /// PARDISO matrix type; derived from `symmetric` when absent.
    pub matrix_type: Option<PardisoMatrixType>,
    /// Row/column equilibration before factoring (SuperLU).
    pub equilibrate: bool,
}

impl Default for DirectOptions {
    fn default() -> Self {
        Self {
            ordering: Ordering::Default,
            pivot_tolerance: None,
            symmetric: false,
            triangle: Triangle::Full,
            refinement_steps: None,
            matrix_type: None,
            equilibrate: true,
        }
    }
}

impl DirectOptions {
    /// Options for a symmetric matrix stored in `triangle`.
    pub fn symmetric(triangle: Triangle) -> Self {
        Self {
            symmetric: true,
            triangle,
            ..Default::default()
        }
    }

    /// Set the ordering.
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Set the pivot tolerance.
    pub fn with_pivot_tolerance(mut self, tolerance: f64) -> Self {
        self.pivot_tolerance = Some(tolerance);
        self
    }

    /// Set the refinement steps.
    pub fn with_refinement_steps(mut self, steps: u32) -> Self {
        self.refinement_steps = Some(steps);
        self
    }

    /// Set the PARDISO matrix type.
    pub fn with_matrix_type(mut self, matrix_type: PardisoMatrixType) -> Self {
        self.matrix_type = Some(matrix_type);
        self
    }

    /// Enable or disable equilibration.
    pub fn with_equilibration(mut self, equilibrate: bool) -> Self {
        self.equilibrate = equilibrate;
        self
    }
}

/// Options for iterative eigensolvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EigenOptions {
    /// Convergence tolerance; zero selects machine precision.
    pub tolerance: f64,
    /// Iteration (or refinement loop) limit.
    pub max_iterations: usize,
    /// Return eigenvectors as well as eigenvalues.
    pub compute_eigenvectors: bool,
    /// Arnoldi subspace size (ARPACK `ncv`); derived from `k` when absent.
    pub arnoldi_vectors: Option<usize>,
}

impl Default for EigenOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            max_iterations: 1000,
            compute_eigenvectors: true,
            arnoldi_vectors: None,
        }
    }
}

impl EigenOptions {
    /// Set the tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the iteration limit.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Request or skip eigenvectors.
    pub fn with_eigenvectors(mut self, compute: bool) -> Self {
        self.compute_eigenvectors = compute;
        self
    }

    /// Set the Arnoldi vector count.
    pub fn with_arnoldi_vectors(mut self, ncv: usize) -> Self {
        self.arnoldi_vectors = Some(ncv);
        self
    }

    /// Arnoldi subspace size for `k` wanted values of an order-`n` problem.
    pub fn arnoldi_count(&self, k: usize, n: usize) -> usize {
        self.arnoldi_vectors
            .unwrap_or_else(|| (2 * k + 1).max(20).min(n))
    }
}
