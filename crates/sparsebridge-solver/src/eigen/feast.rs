//! FEAST interval eigensolver context (real symmetric).
//!
//! FEAST returns every eigenvalue inside `[emin, emax]`. The caller supplies
//! the subspace size `m0`, an upper bound on how many there are; when the
//! interval holds more, the result carries status 3 and no pairs.
//!
//! The library reads one-based compressed-row arrays. A compressed-column
//! matrix is handed over as its own transpose in row form, which for a
//! symmetric matrix only swaps which triangle is stored.

use std::ffi::c_char;
use std::fmt;
use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use sparsebridge_core::{
    BackendKind, ContextState, CscMatrix, Error, PinLedger, PinnedBuffers, Result,
};
use sparsebridge_native::feast::{
    self, FEAST_NO_CONVERGENCE, FEAST_OK, FEAST_PARAMETERS, FPM_MAX_LOOPS, FPM_PRINT,
    FPM_TOLERANCE_EXPONENT,
};

use super::{EigenResult, EigenVectors, assemble_split, real_vectors};
use crate::context::{debug_check_triangle, require_square};
use crate::options::{EigenOptions, Triangle};

/// One-based copies of a matrix's index arrays.
struct OneBased {
    pointers: Vec<c_int>,
    indices: Vec<c_int>,
}

impl OneBased {
    fn new(matrix: &CscMatrix<f64>) -> Self {
        Self {
            pointers: matrix.column_pointers().iter().map(|&p| p + 1).collect(),
            indices: matrix.row_indices().iter().map(|&i| i + 1).collect(),
        }
    }
}

fn uplo(triangle: Triangle) -> c_char {
    let code = match triangle {
        Triangle::Lower => b'U',
        Triangle::Upper => b'L',
        Triangle::Full => b'F',
    };
    code as c_char
}

/// FEAST context bound to `A` (and optionally a positive definite `B`).
pub struct FeastContext<'a> {
    a: &'a CscMatrix<f64>,
    b: Option<&'a CscMatrix<f64>>,
    a_indices: OneBased,
    b_indices: Option<OneBased>,
    triangle: Triangle,
    options: EigenOptions,
    ledger: Arc<PinLedger>,
    state: ContextState,
}

impl<'a> FeastContext<'a> {
    /// Context for `A x = λ x` with `A` stored as `triangle`.
    pub fn new(a: &'a CscMatrix<f64>, triangle: Triangle, options: EigenOptions) -> Result<Self> {
        Self::build(a, None, triangle, options)
    }

    /// Context for `A x = λ B x`; both matrices use the same storage.
    pub fn generalized(
        a: &'a CscMatrix<f64>,
        b: &'a CscMatrix<f64>,
        triangle: Triangle,
        options: EigenOptions,
    ) -> Result<Self> {
        Self::build(a, Some(b), triangle, options)
    }

    fn build(
        a: &'a CscMatrix<f64>,
        b: Option<&'a CscMatrix<f64>>,
        triangle: Triangle,
        options: EigenOptions,
    ) -> Result<Self> {
        require_square(BackendKind::Feast, a)?;
        debug_check_triangle(a, triangle);
        if let Some(b) = b {
            if b.rows() != a.rows() || b.columns() != a.columns() {
                return Err(Error::DimensionMismatch {
                    expected: a.rows(),
                    actual: b.rows(),
                });
            }
            debug_check_triangle(b, triangle);
        }
        Ok(Self {
            a,
            b,
            a_indices: OneBased::new(a),
            b_indices: b.map(OneBased::new),
            triangle,
            options,
            ledger: PinLedger::new(),
            state: ContextState::Uninitialized,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn pin_ledger(&self) -> &Arc<PinLedger> {
        &self.ledger
    }

    /// Parameter array after defaults and option overrides.
    pub fn parameters(&self) -> [c_int; FEAST_PARAMETERS] {
        let mut fpm = [0 as c_int; FEAST_PARAMETERS];
        unsafe { feast::feastinit(fpm.as_mut_ptr()) };
        if log::log_enabled!(log::Level::Debug) {
            fpm[FPM_PRINT] = 1;
        }
        if self.options.tolerance > 0.0 {
            fpm[FPM_TOLERANCE_EXPONENT] = (-self.options.tolerance.log10()).ceil().max(1.0) as c_int;
        }
        fpm[FPM_MAX_LOOPS] = self.options.max_iterations.min(c_int::MAX as usize) as c_int;
        fpm
    }

    /// Find the eigenvalues in `[emin, emax]` with a subspace of size `m0`.
    pub fn solve(&mut self, emin: f64, emax: f64, m0: usize) -> Result<EigenResult> {
        match self.state {
            ContextState::Disposed | ContextState::Failed => {
                return Err(Error::Lifecycle {
                    operation: "eigensolve",
                    state: self.state,
                });
            }
            _ => {}
        }
        let n = self.a.rows();
        let mut fpm = self.parameters();
        let mut eigenvalues = vec![0.0; m0];
        let mut residuals = vec![0.0; m0];
        let mut vectors = if self.options.compute_eigenvectors {
            vec![0.0; n * m0]
        } else {
            Vec::new()
        };
        let (mut epsout, mut loops, mut found, mut info): (f64, c_int, c_int, c_int) = (0.0, 0, 0, 0);
        let order = n as c_int;
        let subspace = m0.min(c_int::MAX as usize) as c_int;
        let uplo = uplo(self.triangle);
        log::debug!("feast: n={} interval=[{}, {}] m0={}", n, emin, emax, m0);

        {
            let mut pins = PinnedBuffers::new(Arc::clone(&self.ledger));
            let a_values = pins.pin(self.a.values());
            let ia = pins.pin(&self.a_indices.pointers);
            let ja = pins.pin(&self.a_indices.indices);
            let e = pins.pin_mut(&mut eigenvalues);
            let res = pins.pin_mut(&mut residuals);
            let x = if self.options.compute_eigenvectors {
                pins.pin_mut(&mut vectors)
            } else {
                ptr::null_mut()
            };
            match (self.b, &self.b_indices) {
                (Some(b), Some(b_indices)) => {
                    let b_values = pins.pin(b.values());
                    let ib = pins.pin(&b_indices.pointers);
                    let jb = pins.pin(&b_indices.indices);
                    unsafe {
                        feast::dfeast_scsrgv(
                            &uplo, &order, a_values, ia, ja, b_values, ib, jb, fpm.as_mut_ptr(),
                            &mut epsout, &mut loops, &emin, &emax, &subspace, e, x, &mut found,
                            res, &mut info,
                        )
                    };
                }
                _ => unsafe {
                    feast::dfeast_scsrev(
                        &uplo, &order, a_values, ia, ja, fpm.as_mut_ptr(), &mut epsout,
                        &mut loops, &emin, &emax, &subspace, e, x, &mut found, res, &mut info,
                    )
                },
            }
        }

        let converged = match info {
            FEAST_OK | FEAST_NO_CONVERGENCE => (found.max(0) as usize).min(m0),
            _ => 0,
        };
        if info == FEAST_OK {
            self.state = ContextState::Factorized;
            log::debug!("feast: {} eigenvalues, worst residual {:e}", converged, epsout);
        } else {
            log::warn!("feast returned status {} ({} eigenvalues in interval)", info, found);
        }
        residuals.truncate(converged);
        let imaginary = vec![0.0; converged];
        Ok(EigenResult {
            backend: BackendKind::Feast,
            requested: m0,
            converged,
            iterations: loops.max(0) as usize,
            status: info,
            eigenvalues: assemble_split(&eigenvalues, &imaginary, converged),
            eigenvectors: self
                .options
                .compute_eigenvectors
                .then(|| EigenVectors::Real(real_vectors(&vectors, n, converged))),
            residuals: Some(residuals),
        })
    }

    /// Mark the context unusable. Idempotent.
    pub fn dispose(&mut self) {
        if self.state == ContextState::Disposed {
            return;
        }
        self.state = ContextState::Disposed;
        log::debug!("feast context disposed");
    }
}

impl Drop for FeastContext<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for FeastContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeastContext")
            .field("order", &self.a.rows())
            .field("generalized", &self.b.is_some())
            .field("triangle", &self.triangle)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsebridge_native::feast::{FEAST_INVALID_M0, FEAST_NONE_FOUND, FEAST_SUBSPACE_TOO_SMALL};
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

    fn exact(n: usize) -> Vec<f64> {
        (1..=n)
            .map(|j| 2.0 - 2.0 * (j as f64 * PI / (n as f64 + 1.0)).cos())
            .collect()
    }

    #[test]
    fn test_parameters() {
        let a = laplacian(4);
        let options = EigenOptions::default().with_tolerance(2e-9).with_max_iterations(7);
        let ctx = FeastContext::new(&a, Triangle::Full, options).unwrap();
        let fpm = ctx.parameters();
        assert_eq!(fpm[FPM_TOLERANCE_EXPONENT], 9);
        assert_eq!(fpm[FPM_MAX_LOOPS], 7);
    }

    #[test]
    fn test_interval_count() {
        let n = 20;
        let a = laplacian(n);
        let expected: Vec<f64> = exact(n).into_iter().filter(|&v| v <= 0.9).collect();
        let mut ctx = FeastContext::new(&a, Triangle::Full, EigenOptions::default()).unwrap();
        let result = ctx.solve(0.0, 0.9, 10).unwrap();
        result.ensure_success().unwrap();
        assert_eq!(result.converged, expected.len());
        for (value, exact) in result.eigenvalues_real().iter().zip(&expected) {
            assert!((value - exact).abs() < 1e-8);
        }
        let residuals = result.residuals.as_ref().unwrap();
        assert_eq!(residuals.len(), expected.len());
        assert!(residuals.iter().all(|&r| r < 1e-8));
        assert_eq!(result.eigenvectors.as_ref().map(EigenVectors::ncols), Some(expected.len()));
        assert_eq!(ctx.pin_ledger().outstanding(), 0);
    }

    #[test]
    fn test_lower_storage_matches_full() {
        let n = 12;
        let a = laplacian(n);
        let lower = a.lower_triangle();
        let options = EigenOptions::default().with_eigenvectors(false);
        let mut full = FeastContext::new(&a, Triangle::Full, options.clone()).unwrap();
        let mut half = FeastContext::new(&lower, Triangle::Lower, options).unwrap();
        let expected = full.solve(1.0, 3.0, n).unwrap();
        let actual = half.solve(1.0, 3.0, n).unwrap();
        assert_eq!(expected.converged, actual.converged);
        for (x, y) in expected.eigenvalues.iter().zip(&actual.eigenvalues) {
            assert!((x - y).norm() < 1e-10);
        }
        assert!(actual.eigenvectors.is_none());
    }

    #[test]
    fn test_generalized_problem() {
        // B = 2 I halves every eigenvalue.
        let n = 8;
        let a = laplacian(n);
        let b = CscMatrix::from_triplets(n, n, &(0..n).map(|i| (i, i, 2.0)).collect::<Vec<_>>())
            .unwrap();
        let mut ctx = FeastContext::generalized(&a, &b, Triangle::Full, EigenOptions::default()).unwrap();
        let result = ctx.solve(0.0, 10.0, n).unwrap();
        result.ensure_success().unwrap();
        assert_eq!(result.converged, n);
        for (value, exact) in result.eigenvalues_real().iter().zip(exact(n)) {
            assert!((value - exact / 2.0).abs() < 1e-8);
        }
    }

    #[test]
    fn test_status_codes() {
        let a = laplacian(10);
        let mut ctx = FeastContext::new(&a, Triangle::Full, EigenOptions::default()).unwrap();

        let result = ctx.solve(10.0, 11.0, 4).unwrap();
        assert_eq!(result.status, FEAST_NONE_FOUND);
        assert_eq!(result.converged, 0);

        let result = ctx.solve(0.0, 4.0, 3).unwrap();
        assert_eq!(result.status, FEAST_SUBSPACE_TOO_SMALL);
        assert_eq!(result.converged, 0);
        assert!(matches!(
            result.ensure_success(),
            Err(Error::Eigen { backend: BackendKind::Feast, status: FEAST_SUBSPACE_TOO_SMALL })
        ));

        let result = ctx.solve(0.0, 4.0, 0).unwrap();
        assert_eq!(result.status, FEAST_INVALID_M0);
        assert_eq!(ctx.state(), ContextState::Uninitialized);
        assert_eq!(ctx.pin_ledger().outstanding(), 0);
    }

    #[test]
    fn test_disposed_context_rejects_calls() {
        let a = laplacian(3);
        let mut ctx = FeastContext::new(&a, Triangle::Full, EigenOptions::default()).unwrap();
        ctx.dispose();
        assert!(matches!(
            ctx.solve(0.0, 1.0, 2),
            Err(Error::Lifecycle { state: ContextState::Disposed, .. })
        ));
    }
}
