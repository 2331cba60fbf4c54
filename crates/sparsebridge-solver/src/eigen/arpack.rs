//! ARPACK eigenvalue context.
//!
//! Computes a few eigenpairs of a large sparse matrix, optionally for the
//! generalized problem `A v = λ B v` and optionally in shift-invert mode
//! around σ. Real matrices may be declared symmetric (Lanczos drivers) or
//! general (Arnoldi drivers); complex matrices always use the general driver.
//!
//! Matrices and output buffers are pinned only for the duration of each call.

use std::fmt;
use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use num_complex::Complex64;
use sparsebridge_core::{
    BackendKind, ContextState, CscMatrix, Element, Error, NativeMatrix, PinLedger, PinnedBuffers,
    Result,
};
use sparsebridge_native::arpack::{ArResult, ArResultComplex, ArSpmat, di, zi};

use super::{
    EigenResult, EigenVectors, Job, assemble_interleaved, assemble_split, complex_vectors,
    pair_vectors, real_vectors,
};
use crate::context::require_square;
use crate::options::EigenOptions;

/// Arguments of one driver call, resolved from the context and its options.
#[derive(Debug, Clone, Copy)]
pub struct ArpackRequest<T> {
    pub job: Job,
    pub k: usize,
    pub ncv: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub shift: Option<T>,
    pub symmetric: bool,
    pub vectors: bool,
}

/// Element types with an ARPACK driver family.
pub trait ArpackElement: Element {
    /// Run the matching driver with every array pinned on `ledger`.
    fn drive(
        ledger: &Arc<PinLedger>,
        a: &CscMatrix<Self>,
        b: Option<&CscMatrix<Self>>,
        request: &ArpackRequest<Self>,
    ) -> Result<EigenResult>;
}

fn spmat<T>(native: &NativeMatrix<T>) -> ArSpmat<T> {
    ArSpmat {
        n: native.rows,
        nnz: native.nnz,
        p: native.column_pointers,
        i: native.row_indices,
        x: native.values,
    }
}

fn count(value: usize) -> c_int {
    value.min(c_int::MAX as usize) as c_int
}

impl ArpackElement for f64 {
    fn drive(
        ledger: &Arc<PinLedger>,
        a: &CscMatrix<f64>,
        b: Option<&CscMatrix<f64>>,
        request: &ArpackRequest<f64>,
    ) -> Result<EigenResult> {
        let n = a.rows();
        let k = request.k;
        // A conjugate pair is never split, so general drivers may return k + 1.
        let slots = if request.symmetric { k } else { k + 1 };
        let mut real = vec![0.0; slots];
        let mut imaginary = vec![0.0; slots];
        let mut vectors = if request.vectors {
            vec![0.0; n * slots]
        } else {
            Vec::new()
        };

        let (nconv, info, iterations) = {
            let mut pins = PinnedBuffers::new(Arc::clone(ledger));
            let a_native = spmat(&NativeMatrix::pin(a, &mut pins));
            let b_native = b.map(|b| spmat(&NativeMatrix::pin(b, &mut pins)));
            let mut result = ArResult {
                eigvalr: pins.pin_mut(&mut real),
                eigvali: pins.pin_mut(&mut imaginary),
                eigvec: if request.vectors {
                    pins.pin_mut(&mut vectors)
                } else {
                    ptr::null_mut()
                },
                info: 0,
                iterations: 0,
            };
            let which = request.job.c_code().as_ptr();
            let (k, ncv, maxit, tol) = (
                count(k),
                count(request.ncv),
                count(request.max_iterations),
                request.tolerance,
            );
            let nconv = unsafe {
                match (request.symmetric, &b_native, request.shift) {
                    (true, None, None) => di::ss(which, k, ncv, maxit, tol, &a_native, &mut result),
                    (true, None, Some(sigma)) => {
                        di::ss_shift(which, k, ncv, maxit, tol, sigma, &a_native, &mut result)
                    }
                    (true, Some(b), None) => {
                        di::sg(which, k, ncv, maxit, tol, &a_native, b, &mut result)
                    }
                    (true, Some(b), Some(sigma)) => {
                        di::sg_shift(which, k, ncv, maxit, tol, sigma, &a_native, b, &mut result)
                    }
                    (false, None, None) => di::ns(which, k, ncv, maxit, tol, &a_native, &mut result),
                    (false, None, Some(sigma)) => {
                        di::ns_shift(which, k, ncv, maxit, tol, sigma, &a_native, &mut result)
                    }
                    (false, Some(b), None) => {
                        di::ng(which, k, ncv, maxit, tol, &a_native, b, &mut result)
                    }
                    (false, Some(b), Some(sigma)) => {
                        di::ng_shift(which, k, ncv, maxit, tol, sigma, &a_native, b, &mut result)
                    }
                }
            };
            (nconv, result.info, result.iterations)
        };

        let converged = (nconv.max(0) as usize).min(k);
        let eigenvectors = if !request.vectors {
            None
        } else if request.symmetric {
            Some(EigenVectors::Real(real_vectors(&vectors, n, converged)))
        } else {
            Some(EigenVectors::Complex(pair_vectors(&vectors, &imaginary, n, converged)))
        };
        Ok(EigenResult {
            backend: BackendKind::Arpack,
            requested: k,
            converged,
            iterations: iterations.max(0) as usize,
            status: info,
            eigenvalues: assemble_split(&real, &imaginary, converged),
            eigenvectors,
            residuals: None,
        })
    }
}

impl ArpackElement for Complex64 {
    fn drive(
        ledger: &Arc<PinLedger>,
        a: &CscMatrix<Complex64>,
        b: Option<&CscMatrix<Complex64>>,
        request: &ArpackRequest<Complex64>,
    ) -> Result<EigenResult> {
        if b.is_some() || request.symmetric {
            return Err(Error::Configuration(
                "complex ARPACK problems must be standard and general".to_string(),
            ));
        }
        let n = a.rows();
        let k = request.k;
        let mut values = vec![Complex64::new(0.0, 0.0); k];
        let mut vectors = if request.vectors {
            vec![Complex64::new(0.0, 0.0); n * k]
        } else {
            Vec::new()
        };

        let (nconv, info, iterations) = {
            let mut pins = PinnedBuffers::new(Arc::clone(ledger));
            let a_native = spmat(&NativeMatrix::pin(a, &mut pins));
            let mut result = ArResultComplex {
                eigval: pins.pin_mut(&mut values),
                eigvec: if request.vectors {
                    pins.pin_mut(&mut vectors)
                } else {
                    ptr::null_mut()
                },
                info: 0,
                iterations: 0,
            };
            let which = request.job.c_code().as_ptr();
            let (k, ncv, maxit, tol) = (
                count(k),
                count(request.ncv),
                count(request.max_iterations),
                request.tolerance,
            );
            let nconv = unsafe {
                match request.shift {
                    None => zi::ns(which, k, ncv, maxit, tol, &a_native, &mut result),
                    Some(sigma) => zi::ns_shift(
                        which, k, ncv, maxit, tol, sigma.re, sigma.im, &a_native, &mut result,
                    ),
                }
            };
            (nconv, result.info, result.iterations)
        };

        let converged = (nconv.max(0) as usize).min(k);
        Ok(EigenResult {
            backend: BackendKind::Arpack,
            requested: k,
            converged,
            iterations: iterations.max(0) as usize,
            status: info,
            eigenvalues: assemble_interleaved(&values, converged),
            eigenvectors: request
                .vectors
                .then(|| EigenVectors::Complex(complex_vectors(&vectors, n, converged))),
            residuals: None,
        })
    }
}

/// ARPACK context bound to one matrix (and optionally `B`).
pub struct ArpackContext<'a, T: ArpackElement> {
    a: &'a CscMatrix<T>,
    b: Option<&'a CscMatrix<T>>,
    symmetric: bool,
    options: EigenOptions,
    ledger: Arc<PinLedger>,
    state: ContextState,
    calls: usize,
}

impl<'a, T: ArpackElement> ArpackContext<'a, T> {
    /// Context for the standard problem `A v = λ v`.
    ///
    /// `symmetric` selects the Lanczos drivers and is only valid for real
    /// matrices.
    pub fn new(a: &'a CscMatrix<T>, symmetric: bool, options: EigenOptions) -> Result<Self> {
        Self::build(a, None, symmetric, options)
    }

    /// Context for the generalized problem `A v = λ B v` (real only).
    pub fn generalized(
        a: &'a CscMatrix<T>,
        b: &'a CscMatrix<T>,
        symmetric: bool,
        options: EigenOptions,
    ) -> Result<Self> {
        Self::build(a, Some(b), symmetric, options)
    }

    fn build(
        a: &'a CscMatrix<T>,
        b: Option<&'a CscMatrix<T>>,
        symmetric: bool,
        options: EigenOptions,
    ) -> Result<Self> {
        require_square(BackendKind::Arpack, a)?;
        if let Some(b) = b {
            if b.rows() != a.rows() || b.columns() != a.columns() {
                return Err(Error::DimensionMismatch {
                    expected: a.rows(),
                    actual: b.rows(),
                });
            }
            if T::IS_COMPLEX {
                return Err(Error::Configuration(
                    "ARPACK has no complex generalized driver".to_string(),
                ));
            }
        }
        if symmetric && T::IS_COMPLEX {
            return Err(Error::Configuration(
                "complex ARPACK problems must be declared general".to_string(),
            ));
        }
        Ok(Self {
            a,
            b,
            symmetric,
            options,
            ledger: PinLedger::new(),
            state: ContextState::Uninitialized,
            calls: 0,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn options(&self) -> &EigenOptions {
        &self.options
    }

    pub fn pin_ledger(&self) -> &Arc<PinLedger> {
        &self.ledger
    }

    /// Number of completed driver calls.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Compute `k` eigenvalues selected by `job`.
    pub fn solve(&mut self, k: usize, job: Job) -> Result<EigenResult> {
        self.run(k, job, None)
    }

    /// Compute `k` eigenvalues nearest `sigma` in shift-invert mode; `job`
    /// applies to `1 / (λ - σ)`.
    pub fn solve_shifted(&mut self, k: usize, job: Job, sigma: T) -> Result<EigenResult> {
        self.run(k, job, Some(sigma))
    }

    fn run(&mut self, k: usize, job: Job, shift: Option<T>) -> Result<EigenResult> {
        match self.state {
            ContextState::Disposed | ContextState::Failed => {
                return Err(Error::Lifecycle {
                    operation: "eigensolve",
                    state: self.state,
                });
            }
            _ => {}
        }
        if !job.valid_for(self.symmetric) {
            return Err(Error::Configuration(format!(
                "job {} is not available for {} problems",
                job,
                if self.symmetric { "symmetric" } else { "general" }
            )));
        }
        let n = self.a.rows();
        let request = ArpackRequest {
            job,
            k,
            ncv: self.options.arnoldi_count(k, n),
            max_iterations: self.options.max_iterations,
            tolerance: self.options.tolerance,
            shift,
            symmetric: self.symmetric,
            vectors: self.options.compute_eigenvectors,
        };
        log::debug!(
            "arpack: n={} k={} ncv={} job={} shifted={}",
            n,
            k,
            request.ncv,
            job,
            shift.is_some()
        );
        let result = T::drive(&self.ledger, self.a, self.b, &request)?;
        self.calls += 1;
        if result.is_success() {
            self.state = ContextState::Factorized;
        } else {
            log::warn!("arpack returned status {}", result.status);
        }
        Ok(result)
    }

    /// Mark the context unusable. Idempotent.
    pub fn dispose(&mut self) {
        if self.state == ContextState::Disposed {
            return;
        }
        self.state = ContextState::Disposed;
        log::debug!("arpack context disposed");
    }
}

impl<T: ArpackElement> Drop for ArpackContext<'_, T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: ArpackElement> fmt::Debug for ArpackContext<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArpackContext")
            .field("order", &self.a.rows())
            .field("generalized", &self.b.is_some())
            .field("symmetric", &self.symmetric)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;
    use sparsebridge_native::arpack::ARPACK_INVALID_NCV;
    use sparsebridge_native::thread_stats;
    use std::f64::consts::PI;

    fn laplacian(n: usize) -> CscMatrix<f64> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0));
            if i + 1 < n {
                triplets.push((i + 1, i, -1.0));
                triplets.push((i, i + 1, -1.0));
            }
        }
        CscMatrix::from_triplets(n, n, &triplets).unwrap()
    }

    fn exact(n: usize, j: usize) -> f64 {
        2.0 - 2.0 * (j as f64 * PI / (n as f64 + 1.0)).cos()
    }

    #[test]
    fn test_symmetric_smallest() {
        let a = laplacian(11);
        let mut ctx = ArpackContext::new(&a, true, EigenOptions::default()).unwrap();
        let result = ctx.solve(4, Job::SmallestMagnitude).unwrap();
        result.ensure_success().unwrap();
        assert_eq!(result.converged, 4);
        for (j, value) in result.eigenvalues_real().iter().enumerate() {
            assert!((value - exact(11, j + 1)).abs() < 1e-8);
        }
        assert!(result.eigenvalues.iter().all(|v| v.im == 0.0));

        let vectors = result.eigenvectors.as_ref().and_then(EigenVectors::as_real).unwrap();
        let dense = a.to_dense();
        for j in 0..4 {
            let v = vectors.column(j).into_owned();
            let residual = (&dense * &v - &v * result.eigenvalues[j].re).norm();
            assert!(residual < 1e-8);
        }
        assert_eq!(ctx.state(), ContextState::Factorized);
        assert_eq!(ctx.pin_ledger().outstanding(), 0);
    }

    #[test]
    fn test_shift_invert() {
        let a = laplacian(11);
        let options = EigenOptions::default().with_eigenvectors(false);
        let mut ctx = ArpackContext::new(&a, true, options).unwrap();
        let result = ctx.solve_shifted(1, Job::LargestMagnitude, 0.9).unwrap();
        assert!(result.eigenvectors.is_none());
        let nearest = (1..=11)
            .map(|j| exact(11, j))
            .min_by(|x, y| (x - 0.9).abs().total_cmp(&(y - 0.9).abs()))
            .unwrap();
        assert!((result.eigenvalues[0].re - nearest).abs() < 1e-8);
    }

    #[test]
    fn test_general_conjugate_pair() {
        // Rotation block with eigenvalues 1 ± 2i, plus a real 5.
        let a = CscMatrix::from_triplets(
            4,
            4,
            &[(0, 0, 1.0), (1, 0, 2.0), (0, 1, -2.0), (1, 1, 1.0), (2, 2, 5.0), (3, 3, 0.5)],
        )
        .unwrap();
        let mut ctx = ArpackContext::new(&a, false, EigenOptions::default()).unwrap();
        let result = ctx.solve(1, Job::SmallestReal).unwrap();
        result.ensure_success().unwrap();
        assert_eq!(result.converged, 1);
        assert!((result.eigenvalues[0] - Complex64::new(0.5, 0.0)).norm() < 1e-8);

        let result = ctx.solve(2, Job::LargestImaginary).unwrap();
        assert_eq!(result.converged, 2);
        assert!((result.eigenvalues[0] - Complex64::new(1.0, 2.0)).norm() < 1e-8);
        assert!((result.eigenvalues[1] - Complex64::new(1.0, -2.0)).norm() < 1e-8);

        let Some(EigenVectors::Complex(vectors)) = &result.eigenvectors else {
            panic!("expected complex eigenvectors");
        };
        let dense = a.to_dense().map(|v| Complex64::new(v, 0.0));
        for j in 0..2 {
            let v: DVector<Complex64> = vectors.column(j).into_owned();
            let residual = (&dense * &v - &v * result.eigenvalues[j]).norm();
            assert!(residual < 1e-6 * v.norm());
        }
    }

    #[test]
    fn test_complex_driver() {
        let a = CscMatrix::from_triplets(
            3,
            3,
            &[
                (0, 0, Complex64::new(1.0, 1.0)),
                (1, 1, Complex64::new(2.0, -1.0)),
                (2, 2, Complex64::new(-3.0, 0.5)),
                (0, 2, Complex64::new(0.0, 0.0)),
            ],
        )
        .unwrap();
        let options = EigenOptions::default().with_arnoldi_vectors(3);
        let mut ctx = ArpackContext::new(&a, false, options).unwrap();
        let result = ctx.solve(1, Job::LargestMagnitude).unwrap();
        result.ensure_success().unwrap();
        assert!((result.eigenvalues[0] - Complex64::new(-3.0, 0.5)).norm() < 1e-8);
        assert_eq!(result.eigenvectors.as_ref().map(EigenVectors::ncols), Some(1));
    }

    #[test]
    fn test_complex_symmetric_rejected() {
        let a = CscMatrix::from_triplets(2, 2, &[(0, 0, Complex64::new(1.0, 0.0))]).unwrap();
        let err = ArpackContext::new(&a, true, EigenOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_job_rejected_before_native_call() {
        let a = laplacian(6);
        let mut ctx = ArpackContext::new(&a, true, EigenOptions::default()).unwrap();
        let before = thread_stats().calls;
        let err = ctx.solve(2, Job::LargestReal).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(thread_stats().calls, before);
        assert_eq!(ctx.pin_ledger().acquired(), 0);
        assert_eq!(ctx.calls(), 0);
    }

    #[test]
    fn test_subspace_errors_left_to_native_status() {
        let a = laplacian(6);
        let options = EigenOptions::default().with_arnoldi_vectors(2);
        let mut ctx = ArpackContext::new(&a, true, options).unwrap();
        let result = ctx.solve(3, Job::LargestAlgebraic).unwrap();
        assert_eq!(result.status, ARPACK_INVALID_NCV);
        assert_eq!(result.converged, 0);
        assert!(result.eigenvalues.is_empty());
        assert!(matches!(
            result.ensure_success(),
            Err(Error::Eigen { backend: BackendKind::Arpack, status: ARPACK_INVALID_NCV })
        ));
        assert_eq!(ctx.state(), ContextState::Uninitialized);
        assert_eq!(ctx.pin_ledger().outstanding(), 0);
    }

    #[test]
    fn test_disposed_context_rejects_calls() {
        let a = laplacian(5);
        let mut ctx = ArpackContext::new(&a, true, EigenOptions::default()).unwrap();
        ctx.dispose();
        ctx.dispose();
        assert!(matches!(
            ctx.solve(1, Job::LargestMagnitude),
            Err(Error::Lifecycle { state: ContextState::Disposed, .. })
        ));
    }
}
