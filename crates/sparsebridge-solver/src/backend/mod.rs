//! Direct solver backends and closed dispatch over them.
//!
//! Each submodule adapts one native library to [`DirectBackend`]. Use the
//! concrete context types when the library is known at compile time, or
//! [`DirectSolver`] to pick one from configuration.

pub mod cholmod;
pub mod cxsparse;
pub mod pardiso;
pub mod superlu;
pub mod umfpack;

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use sparsebridge_core::{BackendKind, ContextState, CscMatrix, Error, Result};

use crate::context::{PhaseStats, SolverContext, SystemKind};
use crate::options::DirectOptions;

pub use cholmod::Cholmod;
pub use cxsparse::{CxSparse, CxSparseElement, Factorization};
pub use pardiso::Pardiso;
pub use superlu::{SuperLu, SuperLuElement};
pub use umfpack::{LuFactors, Umfpack, UmfpackElement};

/// Element types every direct backend accepts.
pub trait DirectElement: UmfpackElement + CxSparseElement + SuperLuElement {}

impl<T: UmfpackElement + CxSparseElement + SuperLuElement> DirectElement for T {}

/// Direct solution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectMethod {
    Umfpack,
    Cholmod,
    #[serde(rename = "cxsparse_lu")]
    CxSparseLu,
    #[serde(rename = "cxsparse_cholesky")]
    CxSparseCholesky,
    #[serde(rename = "superlu")]
    SuperLu,
    Pardiso,
}

impl DirectMethod {
    pub const ALL: [DirectMethod; 6] = [
        DirectMethod::Umfpack,
        DirectMethod::Cholmod,
        DirectMethod::CxSparseLu,
        DirectMethod::CxSparseCholesky,
        DirectMethod::SuperLu,
        DirectMethod::Pardiso,
    ];

    pub fn backend(self) -> BackendKind {
        match self {
            DirectMethod::Umfpack => BackendKind::Umfpack,
            DirectMethod::Cholmod => BackendKind::Cholmod,
            DirectMethod::CxSparseLu | DirectMethod::CxSparseCholesky => BackendKind::CxSparse,
            DirectMethod::SuperLu => BackendKind::SuperLu,
            DirectMethod::Pardiso => BackendKind::Pardiso,
        }
    }

    /// Whether the method only factors symmetric (Hermitian) matrices.
    pub fn requires_symmetric(self) -> bool {
        matches!(self, DirectMethod::Cholmod | DirectMethod::CxSparseCholesky)
    }

    pub fn name(self) -> &'static str {
        match self {
            DirectMethod::Umfpack => "umfpack",
            DirectMethod::Cholmod => "cholmod",
            DirectMethod::CxSparseLu => "cxsparse_lu",
            DirectMethod::CxSparseCholesky => "cxsparse_cholesky",
            DirectMethod::SuperLu => "superlu",
            DirectMethod::Pardiso => "pardiso",
        }
    }
}

impl fmt::Display for DirectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DirectMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        DirectMethod::ALL
            .into_iter()
            .find(|method| method.name() == wanted)
            .ok_or_else(|| Error::Configuration(format!("unknown direct method '{}'", s)))
    }
}

/// A direct solver context for any of the supported libraries.
pub enum DirectSolver<'a, T: DirectElement> {
    Umfpack(SolverContext<'a, T, Umfpack<T>>),
    Cholmod(SolverContext<'a, T, Cholmod<T>>),
    CxSparse(SolverContext<'a, T, CxSparse<T>>),
    SuperLu(SolverContext<'a, T, SuperLu<T>>),
    Pardiso(SolverContext<'a, T, Pardiso<T>>),
}

macro_rules! dispatch {
    ($self:expr, $ctx:ident => $body:expr) => {
        match $self {
            DirectSolver::Umfpack($ctx) => $body,
            DirectSolver::Cholmod($ctx) => $body,
            DirectSolver::CxSparse($ctx) => $body,
            DirectSolver::SuperLu($ctx) => $body,
            DirectSolver::Pardiso($ctx) => $body,
        }
    };
}

impl<'a, T: DirectElement> DirectSolver<'a, T> {
    /// Create a context for `matrix` using `method`.
    pub fn new(method: DirectMethod, matrix: &'a CscMatrix<T>, options: &DirectOptions) -> Result<Self> {
        log::debug!("creating {} solver for {}x{} matrix", method, matrix.rows(), matrix.columns());
        Ok(match method {
            DirectMethod::Umfpack => {
                DirectSolver::Umfpack(SolverContext::new(matrix, Umfpack::new(options))?)
            }
            DirectMethod::Cholmod => {
                DirectSolver::Cholmod(SolverContext::new(matrix, Cholmod::new(options))?)
            }
            DirectMethod::CxSparseLu => {
                DirectSolver::CxSparse(SolverContext::new(matrix, CxSparse::lu(options))?)
            }
            DirectMethod::CxSparseCholesky => {
                DirectSolver::CxSparse(SolverContext::new(matrix, CxSparse::cholesky(options))?)
            }
            DirectMethod::SuperLu => {
                DirectSolver::SuperLu(SolverContext::new(matrix, SuperLu::new(options))?)
            }
            DirectMethod::Pardiso => {
                DirectSolver::Pardiso(SolverContext::new(matrix, Pardiso::new(options))?)
            }
        })
    }

    pub fn kind(&self) -> BackendKind {
        dispatch!(self, ctx => ctx.kind())
    }

    pub fn state(&self) -> ContextState {
        dispatch!(self, ctx => ctx.state())
    }

    pub fn stats(&self) -> PhaseStats {
        dispatch!(self, ctx => ctx.stats())
    }

    pub fn factorize(&mut self) -> Result<()> {
        dispatch!(self, ctx => ctx.factorize())
    }

    pub fn refactor(&mut self, matrix: &'a CscMatrix<T>) -> Result<()> {
        dispatch!(self, ctx => ctx.refactor(matrix))
    }

    pub fn solve(&mut self, b: &DVector<T>) -> Result<DVector<T>> {
        dispatch!(self, ctx => ctx.solve(b))
    }

    pub fn solve_system(&mut self, system: SystemKind, b: &DVector<T>) -> Result<DVector<T>> {
        dispatch!(self, ctx => ctx.solve_system(system, b))
    }

    pub fn solve_many(&mut self, b: &DMatrix<T>) -> Result<DMatrix<T>> {
        dispatch!(self, ctx => ctx.solve_many(b))
    }

    pub fn solve_many_system(&mut self, system: SystemKind, b: &DMatrix<T>) -> Result<DMatrix<T>> {
        dispatch!(self, ctx => ctx.solve_many_system(system, b))
    }

    pub fn dispose(&mut self) {
        dispatch!(self, ctx => ctx.dispose())
    }
}

impl<T: DirectElement> fmt::Debug for DirectSolver<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, ctx => fmt::Debug::fmt(ctx, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Triangle;

    #[test]
    fn test_method_names_round_trip() {
        for method in DirectMethod::ALL {
            assert_eq!(method.name().parse::<DirectMethod>().unwrap(), method);
        }
        assert_eq!("CxSparse-LU".parse::<DirectMethod>().unwrap(), DirectMethod::CxSparseLu);
        assert!(matches!("klu".parse::<DirectMethod>(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_method_serde_names() {
        let json = serde_json::to_string(&DirectMethod::CxSparseCholesky).unwrap();
        assert_eq!(json, "\"cxsparse_cholesky\"");
        let method: DirectMethod = serde_json::from_str("\"superlu\"").unwrap();
        assert_eq!(method, DirectMethod::SuperLu);
    }

    #[test]
    fn test_dispatch_solves_with_every_method() {
        let a = CscMatrix::from_triplets(
            3,
            3,
            &[
                (0, 0, 4.0),
                (1, 0, -1.0),
                (0, 1, -1.0),
                (1, 1, 4.0),
                (2, 1, -1.0),
                (1, 2, -1.0),
                (2, 2, 4.0),
            ],
        )
        .unwrap();
        let expected = DVector::from_vec(vec![1.0, -1.0, 2.0]);
        let b = DVector::from_vec(a.multiply(expected.as_slice()).unwrap());
        for method in DirectMethod::ALL {
            let options = if method.requires_symmetric() {
                DirectOptions::symmetric(Triangle::Full)
            } else {
                DirectOptions::default()
            };
            let mut solver = DirectSolver::new(method, &a, &options).unwrap();
            assert_eq!(solver.kind(), method.backend());
            let x = solver.solve(&b).unwrap();
            assert!((x - &expected).norm() < 1e-10, "{} failed", method);
            solver.dispose();
            assert_eq!(solver.state(), ContextState::Disposed);
        }
    }
}
