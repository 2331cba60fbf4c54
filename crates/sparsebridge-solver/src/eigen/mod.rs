//! Eigenvalue problems and result assembly.
//!
//! The native eigensolvers write into caller-sized raw buffers: split real
//! and imaginary arrays for real problems, interleaved pairs for complex
//! ones, and eigenvectors column by column. The functions here turn those
//! buffers into an [`EigenResult`] holding exactly the converged pairs.
//!
//! A non-success native status is recorded in the result rather than raised;
//! call [`EigenResult::ensure_success`] to turn it into an error.

pub mod arpack;
pub mod feast;

use std::ffi::CStr;
use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use sparsebridge_core::{BackendKind, Error, Result};

pub use arpack::{ArpackContext, ArpackElement};
pub use feast::FeastContext;

/// Which part of the spectrum to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Job {
    LargestMagnitude,
    SmallestMagnitude,
    /// Symmetric problems only.
    LargestAlgebraic,
    /// Symmetric problems only.
    SmallestAlgebraic,
    /// Half from each end of the spectrum; symmetric problems only.
    BothEnds,
    /// General problems only.
    LargestReal,
    /// General problems only.
    SmallestReal,
    /// General problems only.
    LargestImaginary,
    /// General problems only.
    SmallestImaginary,
}

impl Job {
    pub const ALL: [Job; 9] = [
        Job::LargestMagnitude,
        Job::SmallestMagnitude,
        Job::LargestAlgebraic,
        Job::SmallestAlgebraic,
        Job::BothEnds,
        Job::LargestReal,
        Job::SmallestReal,
        Job::LargestImaginary,
        Job::SmallestImaginary,
    ];

    /// Two-letter selector understood by the native drivers.
    pub fn code(self) -> &'static str {
        match self {
            Job::LargestMagnitude => "LM",
            Job::SmallestMagnitude => "SM",
            Job::LargestAlgebraic => "LA",
            Job::SmallestAlgebraic => "SA",
            Job::BothEnds => "BE",
            Job::LargestReal => "LR",
            Job::SmallestReal => "SR",
            Job::LargestImaginary => "LI",
            Job::SmallestImaginary => "SI",
        }
    }

    pub(crate) fn c_code(self) -> &'static CStr {
        match self {
            Job::LargestMagnitude => c"LM",
            Job::SmallestMagnitude => c"SM",
            Job::LargestAlgebraic => c"LA",
            Job::SmallestAlgebraic => c"SA",
            Job::BothEnds => c"BE",
            Job::LargestReal => c"LR",
            Job::SmallestReal => c"SR",
            Job::LargestImaginary => c"LI",
            Job::SmallestImaginary => c"SI",
        }
    }

    /// Whether the job applies to a symmetric (`true`) or general problem.
    pub fn valid_for(self, symmetric: bool) -> bool {
        match self {
            Job::LargestMagnitude | Job::SmallestMagnitude => true,
            Job::LargestAlgebraic | Job::SmallestAlgebraic | Job::BothEnds => symmetric,
            Job::LargestReal | Job::SmallestReal | Job::LargestImaginary | Job::SmallestImaginary => {
                !symmetric
            }
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Job {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().to_ascii_uppercase();
        Job::ALL
            .into_iter()
            .find(|job| job.code() == code)
            .ok_or_else(|| Error::Configuration(format!("unknown eigenvalue job '{}'", s)))
    }
}

/// Eigenvectors, one per column.
#[derive(Debug, Clone, PartialEq)]
pub enum EigenVectors {
    /// Symmetric problems.
    Real(DMatrix<f64>),
    /// General problems.
    Complex(DMatrix<Complex64>),
}

impl EigenVectors {
    pub fn ncols(&self) -> usize {
        match self {
            EigenVectors::Real(v) => v.ncols(),
            EigenVectors::Complex(v) => v.ncols(),
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            EigenVectors::Real(v) => v.nrows(),
            EigenVectors::Complex(v) => v.nrows(),
        }
    }

    /// Column `j` as a complex vector.
    pub fn column(&self, j: usize) -> DVector<Complex64> {
        match self {
            EigenVectors::Real(v) => v.column(j).map(|x| Complex64::new(x, 0.0)),
            EigenVectors::Complex(v) => v.column(j).into_owned(),
        }
    }

    pub fn as_real(&self) -> Option<&DMatrix<f64>> {
        match self {
            EigenVectors::Real(v) => Some(v),
            EigenVectors::Complex(_) => None,
        }
    }
}

/// Outcome of an eigenvalue computation.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenResult {
    pub backend: BackendKind,
    /// Number of eigenvalues asked for (FEAST: the subspace size `m0`).
    pub requested: usize,
    /// Number of eigenpairs returned; never more than `requested`.
    pub converged: usize,
    pub iterations: usize,
    /// Native status; zero on success.
    pub status: i32,
    pub eigenvalues: Vec<Complex64>,
    pub eigenvectors: Option<EigenVectors>,
    /// Relative residual per pair, when the library reports them.
    pub residuals: Option<Vec<f64>>,
}

impl EigenResult {
    /// Raise the native status as [`Error::Eigen`] if it is not success.
    pub fn ensure_success(&self) -> Result<()> {
        if self.status != 0 {
            return Err(Error::Eigen {
                backend: self.backend,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Real parts of the eigenvalues.
    pub fn eigenvalues_real(&self) -> Vec<f64> {
        self.eigenvalues.iter().map(|v| v.re).collect()
    }
}

/// Pair split real and imaginary buffers, keeping the first `converged`.
pub fn assemble_split(real: &[f64], imaginary: &[f64], converged: usize) -> Vec<Complex64> {
    real.iter()
        .zip(imaginary)
        .take(converged)
        .map(|(&re, &im)| Complex64::new(re, im))
        .collect()
}

/// Copy the first `converged` values of an interleaved buffer.
pub fn assemble_interleaved(values: &[Complex64], converged: usize) -> Vec<Complex64> {
    values.iter().take(converged).copied().collect()
}

/// First `converged` columns of an `n`-row column-major buffer.
pub fn real_vectors(buffer: &[f64], n: usize, converged: usize) -> DMatrix<f64> {
    DMatrix::from_column_slice(n, converged, &buffer[..n * converged])
}

/// First `converged` columns of an `n`-row complex buffer.
pub fn complex_vectors(buffer: &[Complex64], n: usize, converged: usize) -> DMatrix<Complex64> {
    DMatrix::from_column_slice(n, converged, &buffer[..n * converged])
}

/// Rebuild complex eigenvectors of a real general problem.
///
/// A conjugate pair `λ, conj(λ)` (positive imaginary part first) shares two
/// buffer columns holding the real and imaginary parts of the vector of `λ`;
/// the vector of `conj(λ)` is its conjugate. The buffer may hold one column
/// more than `converged` so that a pair cut by the limit can still be read.
pub fn pair_vectors(buffer: &[f64], imaginary: &[f64], n: usize, converged: usize) -> DMatrix<Complex64> {
    let available = buffer.len() / n.max(1);
    let column = |j: usize| &buffer[j * n..(j + 1) * n];
    let mut out = DMatrix::zeros(n, converged);
    let mut j = 0;
    while j < converged {
        if imaginary[j] > 0.0 && j + 1 < available {
            let (re, im) = (column(j), column(j + 1));
            for row in 0..n {
                out[(row, j)] = Complex64::new(re[row], im[row]);
            }
            if j + 1 < converged {
                for row in 0..n {
                    out[(row, j + 1)] = Complex64::new(re[row], -im[row]);
                }
            }
            j += 2;
        } else {
            for (row, &value) in column(j).iter().enumerate() {
                out[(row, j)] = Complex64::new(value, 0.0);
            }
            j += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_parsing() {
        assert_eq!("sm".parse::<Job>().unwrap(), Job::SmallestMagnitude);
        assert_eq!(" LR ".parse::<Job>().unwrap(), Job::LargestReal);
        assert!(matches!("XX".parse::<Job>(), Err(Error::Configuration(_))));
        for job in Job::ALL {
            assert_eq!(job.c_code().to_str().unwrap(), job.code());
        }
    }

    #[test]
    fn test_job_symmetry() {
        assert!(Job::LargestMagnitude.valid_for(true));
        assert!(Job::LargestMagnitude.valid_for(false));
        assert!(Job::BothEnds.valid_for(true));
        assert!(!Job::BothEnds.valid_for(false));
        assert!(!Job::LargestReal.valid_for(true));
        assert!(Job::SmallestImaginary.valid_for(false));
    }

    #[test]
    fn test_assemble_split_caps_at_converged() {
        let values = assemble_split(&[1.0, 2.0, 3.0], &[0.0, 0.5, -0.5], 2);
        assert_eq!(values, vec![Complex64::new(1.0, 0.0), Complex64::new(2.0, 0.5)]);
    }

    #[test]
    fn test_pair_vectors() {
        // Columns: real vector, then (re, im) of a pair.
        let buffer = [1.0, 0.0, 0.5, 0.5, 0.25, -0.25];
        let imaginary = [0.0, 2.0, -2.0];
        let v = pair_vectors(&buffer, &imaginary, 2, 3);
        assert_eq!(v[(0, 0)], Complex64::new(1.0, 0.0));
        assert_eq!(v[(0, 1)], Complex64::new(0.5, 0.25));
        assert_eq!(v[(1, 1)], Complex64::new(0.5, -0.25));
        assert_eq!(v[(0, 2)], Complex64::new(0.5, -0.25));
        assert_eq!(v[(1, 2)], Complex64::new(0.5, 0.25));
    }

    #[test]
    fn test_pair_cut_by_limit() {
        let buffer = [0.5, 0.5, 0.25, -0.25];
        let v = pair_vectors(&buffer, &[1.0, -1.0], 2, 1);
        assert_eq!(v.ncols(), 1);
        assert_eq!(v[(1, 0)], Complex64::new(0.5, -0.25));
    }

    #[test]
    fn test_ensure_success() {
        let mut result = EigenResult {
            backend: BackendKind::Arpack,
            requested: 2,
            converged: 0,
            iterations: 0,
            status: -3,
            eigenvalues: Vec::new(),
            eigenvectors: None,
            residuals: None,
        };
        assert!(matches!(
            result.ensure_success(),
            Err(Error::Eigen { backend: BackendKind::Arpack, status: -3 })
        ));
        result.status = 0;
        assert!(result.ensure_success().is_ok());
    }
}
