//! Solver contexts for native sparse direct and eigen solvers.
//!
//! A [`SolverContext`] binds one [`CscMatrix`] to one native library and
//! drives it through analysis, factorization and any number of solves, then
//! releases every native object exactly once. Backends are chosen at compile
//! time through the concrete adapter types or at run time through
//! [`DirectSolver`].
//!
//! # Example
//!
//! ```
//! use nalgebra::DVector;
//! use sparsebridge_solver::{CscMatrix, DirectMethod, DirectOptions, DirectSolver};
//!
//! let a = CscMatrix::from_triplets(2, 2, &[(0, 0, 4.0), (1, 0, 1.0), (0, 1, 1.0), (1, 1, 3.0)])
//!     .unwrap();
//! let mut solver = DirectSolver::new(DirectMethod::Umfpack, &a, &DirectOptions::default()).unwrap();
//! let x = solver.solve(&DVector::from_vec(vec![1.0, 2.0])).unwrap();
//! assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
//! ```
//!
//! Eigenvalue problems go through [`ArpackContext`] (a few eigenpairs by
//! spectrum position) or [`FeastContext`] (every eigenpair in an interval).

pub mod backend;
pub mod context;
pub mod eigen;
pub mod options;

pub use backend::{
    Cholmod, CxSparse, DirectElement, DirectMethod, DirectSolver, Factorization, LuFactors,
    Pardiso, SuperLu, Umfpack,
};
pub use context::{DirectBackend, PhaseStats, SolverContext, SystemKind};
pub use eigen::{ArpackContext, EigenResult, EigenVectors, FeastContext, Job};
pub use options::{DirectOptions, EigenOptions, Ordering, PardisoMatrixType, Triangle};

pub use sparsebridge_core::{
    BackendKind, Complex64, ContextState, CscMatrix, Element, Error, PinLedger, Result,
};
