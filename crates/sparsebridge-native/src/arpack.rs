//! ARPACK calling convention, through the simplified drivers.
//!
//! Each driver takes a compressed-column matrix (and `B` for generalized
//! problems), the number of wanted eigenvalues `k`, the Arnoldi subspace size
//! `ncv`, an iteration limit, a tolerance and a two-letter `which` selector,
//! and writes into caller-allocated result buffers:
//!
//! - symmetric drivers (`ss`, `sg`) fill `eigvalr[k]` in ascending order and
//!   leave `eigvali` alone;
//! - real nonsymmetric drivers (`ns`, `ng`) fill `eigvalr`/`eigvali` with up to
//!   `k + 1` values, because a complex conjugate pair is never split. The
//!   eigenvector of a pair is stored as two real columns, real part first;
//! - the complex driver fills interleaved `eigval[k]` and `eigvec[n * k]`.
//!
//! Eigenvectors are computed only when `eigvec` is non-null. Each driver
//! returns the number of converged eigenvalues; the status is in `info`.
//! The `_shift` variants run in shift-invert mode, where `which` applies to
//! `1 / (λ - σ)`.

use crate::engine::{CscParts, dense_symmetric_eigen, inverse_iteration};
use crate::registry;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use std::ffi::{CStr, c_char};
use std::os::raw::c_int;

pub const ARPACK_OK: c_int = 0;
/// Maximum number of iterations taken.
pub const ARPACK_MAX_ITERATIONS: c_int = 1;
pub const ARPACK_INVALID_N: c_int = -1;
pub const ARPACK_INVALID_NEV: c_int = -2;
pub const ARPACK_INVALID_NCV: c_int = -3;
pub const ARPACK_INVALID_MAXIT: c_int = -4;
pub const ARPACK_INVALID_WHICH: c_int = -5;
/// `B` is not positive definite or `A - σB` is singular.
pub const ARPACK_FACTORIZATION_FAILED: c_int = -9999;

/// Compressed-column matrix argument.
#[repr(C)]
#[derive(Debug)]
pub struct ArSpmat<T> {
    pub n: c_int,
    pub nnz: c_int,
    pub p: *const c_int,
    pub i: *const c_int,
    pub x: *const T,
}

/// Result buffers for real problems.
#[repr(C)]
#[derive(Debug)]
pub struct ArResult {
    pub eigvalr: *mut f64,
    pub eigvali: *mut f64,
    pub eigvec: *mut f64,
    pub info: c_int,
    pub iterations: c_int,
}

/// Result buffers for complex problems.
#[repr(C)]
#[derive(Debug)]
pub struct ArResultComplex {
    pub eigval: *mut Complex64,
    pub eigvec: *mut Complex64,
    pub info: c_int,
    pub iterations: c_int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Which {
    LargestMagnitude,
    SmallestMagnitude,
    LargestAlgebraic,
    SmallestAlgebraic,
    BothEnds,
    LargestReal,
    SmallestReal,
    LargestImaginary,
    SmallestImaginary,
}

impl Which {
    fn parse(which: *const c_char, symmetric: bool) -> Option<Self> {
        if which.is_null() {
            return None;
        }
        let code = unsafe { CStr::from_ptr(which) }.to_str().ok()?;
        let which = match code {
            "LM" => Which::LargestMagnitude,
            "SM" => Which::SmallestMagnitude,
            "LA" if symmetric => Which::LargestAlgebraic,
            "SA" if symmetric => Which::SmallestAlgebraic,
            "BE" if symmetric => Which::BothEnds,
            "LR" if !symmetric => Which::LargestReal,
            "SR" if !symmetric => Which::SmallestReal,
            "LI" if !symmetric => Which::LargestImaginary,
            "SI" if !symmetric => Which::SmallestImaginary,
            _ => return None,
        };
        Some(which)
    }

    /// Ranking key, larger is preferred.
    fn score(self, theta: Complex64, real_problem: bool) -> f64 {
        let imaginary = if real_problem { theta.im.abs() } else { theta.im };
        match self {
            Which::LargestMagnitude => theta.norm(),
            Which::SmallestMagnitude => -theta.norm(),
            Which::LargestAlgebraic | Which::LargestReal => theta.re,
            Which::SmallestAlgebraic | Which::SmallestReal => -theta.re,
            Which::LargestImaginary => imaginary,
            Which::SmallestImaginary => -imaginary,
            // Ordered separately.
            Which::BothEnds => theta.re,
        }
    }
}

struct Request {
    which: Which,
    k: usize,
    sigma: Option<Complex64>,
}

/// Validate the common driver arguments; `Err` carries the ARPACK status.
unsafe fn request(
    n: c_int,
    which: *const c_char,
    k: c_int,
    ncv: c_int,
    maxit: c_int,
    symmetric: bool,
    sigma: Option<Complex64>,
) -> Result<Request, c_int> {
    if n <= 0 {
        return Err(ARPACK_INVALID_N);
    }
    // Nonsymmetric Arnoldi needs two spare vectors.
    let spare = if symmetric { 1 } else { 2 };
    if k <= 0 || k > n - spare {
        return Err(ARPACK_INVALID_NEV);
    }
    if ncv < k + spare || ncv > n {
        return Err(ARPACK_INVALID_NCV);
    }
    if maxit <= 0 {
        return Err(ARPACK_INVALID_MAXIT);
    }
    let which = Which::parse(which, symmetric).ok_or(ARPACK_INVALID_WHICH)?;
    Ok(Request {
        which,
        k: k as usize,
        sigma,
    })
}

fn transform(lambda: Complex64, sigma: Option<Complex64>) -> Complex64 {
    match sigma {
        Some(sigma) => Complex64::new(1.0, 0.0) / (lambda - sigma),
        None => lambda,
    }
}

unsafe fn read<T: crate::engine::Scalar>(a: *const ArSpmat<T>) -> Option<DMatrix<T>> {
    let a = unsafe { a.as_ref() }?;
    if a.n <= 0 {
        return None;
    }
    let n = a.n as usize;
    let parts = unsafe { CscParts::<T>::from_raw(n, n, a.p, a.i, a.x, 0) }?;
    if parts.nnz() != a.nnz.max(0) as usize {
        return None;
    }
    Some(parts.to_dense())
}

fn matrix_order<T>(a: *const ArSpmat<T>) -> c_int {
    unsafe { a.as_ref() }.map_or(0, |a| a.n)
}

fn fail(info: &mut c_int, status: c_int) -> c_int {
    *info = status;
    0
}

fn near_shift(values: &[Complex64], sigma: Option<Complex64>) -> bool {
    let Some(sigma) = sigma else {
        return false;
    };
    let tolerance = 1e-12 * sigma.norm().max(1.0);
    values.iter().any(|&v| (v - sigma).norm() <= tolerance)
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_symmetric(
    which: *const c_char,
    k: c_int,
    ncv: c_int,
    maxit: c_int,
    sigma: Option<f64>,
    a: *const ArSpmat<f64>,
    b: *const ArSpmat<f64>,
    result: *mut ArResult,
) -> c_int {
    let Some(result) = (unsafe { result.as_mut() }) else {
        return 0;
    };
    let sigma = sigma.map(|s| Complex64::new(s, 0.0));
    let request = match unsafe { request(matrix_order(a), which, k, ncv, maxit, true, sigma) } {
        Ok(request) => request,
        Err(status) => return fail(&mut result.info, status),
    };
    if result.eigvalr.is_null() {
        return fail(&mut result.info, ARPACK_INVALID_N);
    }
    let Some(a) = (unsafe { read(a) }) else {
        return fail(&mut result.info, ARPACK_INVALID_N);
    };
    let n = a.nrows();
    let b = if b.is_null() {
        None
    } else {
        match unsafe { read(b) } {
            Some(b) if b.nrows() == n => Some(b),
            _ => return fail(&mut result.info, ARPACK_INVALID_N),
        }
    };
    let Some((values, vectors)) = dense_symmetric_eigen(&a, b.as_ref()) else {
        return fail(&mut result.info, ARPACK_FACTORIZATION_FAILED);
    };
    let lambdas: Vec<Complex64> = values.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    if near_shift(&lambdas, request.sigma) {
        return fail(&mut result.info, ARPACK_FACTORIZATION_FAILED);
    }

    let mut chosen: Vec<usize> = if request.which == Which::BothEnds {
        // Order by θ; half from each end, the odd one from the high end.
        let mut by_theta: Vec<usize> = (0..n).collect();
        by_theta.sort_by(|&i, &j| {
            let ti = transform(lambdas[i], request.sigma).re;
            let tj = transform(lambdas[j], request.sigma).re;
            ti.total_cmp(&tj)
        });
        let low = request.k / 2;
        let high = request.k - low;
        let mut picked: Vec<usize> = by_theta[..low].to_vec();
        picked.extend_from_slice(&by_theta[n - high..]);
        picked
    } else {
        let mut ranked: Vec<usize> = (0..n).collect();
        ranked.sort_by(|&i, &j| {
            let si = request.which.score(transform(lambdas[i], request.sigma), true);
            let sj = request.which.score(transform(lambdas[j], request.sigma), true);
            sj.total_cmp(&si)
        });
        ranked.truncate(request.k);
        ranked
    };
    // Reported in ascending order of λ.
    chosen.sort_unstable();

    for (slot, &index) in chosen.iter().enumerate() {
        unsafe { *result.eigvalr.add(slot) = values[index] };
        if !result.eigvec.is_null() {
            for row in 0..n {
                unsafe { *result.eigvec.add(slot * n + row) = vectors[(row, index)] };
            }
        }
    }
    log::debug!(
        "arpack symmetric: n={} k={} which={:?} shift={:?}",
        n,
        request.k,
        request.which,
        request.sigma
    );
    result.info = ARPACK_OK;
    result.iterations = 1;
    chosen.len() as c_int
}

/// Eigenvalue groups for a real matrix: a real value or a conjugate pair
/// represented by its member with positive imaginary part.
fn rank_real_general(values: &[Complex64], request: &Request) -> Vec<Complex64> {
    let mut units: Vec<Complex64> = values.iter().copied().filter(|v| v.im >= 0.0).collect();
    units.sort_by(|x, y| {
        let sx = request.which.score(transform(*x, request.sigma), true);
        let sy = request.which.score(transform(*y, request.sigma), true);
        sy.total_cmp(&sx)
    });
    let mut chosen = Vec::with_capacity(request.k + 1);
    for unit in units {
        if chosen.len() >= request.k {
            break;
        }
        chosen.push(unit);
        if unit.im > 0.0 {
            chosen.push(unit.conj());
        }
    }
    chosen
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_general(
    which: *const c_char,
    k: c_int,
    ncv: c_int,
    maxit: c_int,
    sigma: Option<f64>,
    a: *const ArSpmat<f64>,
    b: *const ArSpmat<f64>,
    result: *mut ArResult,
) -> c_int {
    let Some(result) = (unsafe { result.as_mut() }) else {
        return 0;
    };
    let sigma = sigma.map(|s| Complex64::new(s, 0.0));
    let request = match unsafe { request(matrix_order(a), which, k, ncv, maxit, false, sigma) } {
        Ok(request) => request,
        Err(status) => return fail(&mut result.info, status),
    };
    if result.eigvalr.is_null() || result.eigvali.is_null() {
        return fail(&mut result.info, ARPACK_INVALID_N);
    }
    let Some(mut a) = (unsafe { read(a) }) else {
        return fail(&mut result.info, ARPACK_INVALID_N);
    };
    let n = a.nrows();
    if !b.is_null() {
        // A v = λ B v  <=>  B⁻¹A v = λ v
        let solved = match unsafe { read(b) } {
            Some(b) if b.nrows() == n => b.lu().solve(&a),
            _ => return fail(&mut result.info, ARPACK_INVALID_N),
        };
        match solved {
            Some(solved) => a = solved,
            None => return fail(&mut result.info, ARPACK_FACTORIZATION_FAILED),
        }
    }

    let values: Vec<Complex64> = nalgebra::Schur::new(a.clone())
        .complex_eigenvalues()
        .iter()
        .copied()
        .collect();
    if near_shift(&values, request.sigma) {
        return fail(&mut result.info, ARPACK_FACTORIZATION_FAILED);
    }
    let chosen = rank_real_general(&values, &request);
    let complex = a.map(|v| Complex64::new(v, 0.0));

    let mut slot = 0;
    while slot < chosen.len() {
        let lambda = chosen[slot];
        unsafe {
            *result.eigvalr.add(slot) = lambda.re;
            *result.eigvali.add(slot) = lambda.im;
        }
        let vector = if result.eigvec.is_null() {
            None
        } else {
            Some(inverse_iteration(&complex, lambda))
        };
        if lambda.im > 0.0 {
            unsafe {
                *result.eigvalr.add(slot + 1) = lambda.re;
                *result.eigvali.add(slot + 1) = -lambda.im;
            }
            if let Some(v) = vector {
                for row in 0..n {
                    unsafe {
                        *result.eigvec.add(slot * n + row) = v[row].re;
                        *result.eigvec.add((slot + 1) * n + row) = v[row].im;
                    }
                }
            }
            slot += 2;
        } else {
            if let Some(v) = vector {
                let real = DVector::from_fn(n, |row, _| v[row].re);
                let norm = real.norm();
                for row in 0..n {
                    unsafe { *result.eigvec.add(slot * n + row) = real[row] / norm };
                }
            }
            slot += 1;
        }
    }
    log::debug!(
        "arpack general: n={} k={} converged={} which={:?}",
        n,
        request.k,
        chosen.len(),
        request.which
    );
    result.info = ARPACK_OK;
    result.iterations = 1;
    chosen.len() as c_int
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_complex(
    which: *const c_char,
    k: c_int,
    ncv: c_int,
    maxit: c_int,
    sigma: Option<Complex64>,
    a: *const ArSpmat<Complex64>,
    result: *mut ArResultComplex,
) -> c_int {
    let Some(result) = (unsafe { result.as_mut() }) else {
        return 0;
    };
    let request = match unsafe { request(matrix_order(a), which, k, ncv, maxit, false, sigma) } {
        Ok(request) => request,
        Err(status) => return fail(&mut result.info, status),
    };
    if result.eigval.is_null() {
        return fail(&mut result.info, ARPACK_INVALID_N);
    }
    let Some(a) = (unsafe { read(a) }) else {
        return fail(&mut result.info, ARPACK_INVALID_N);
    };
    let n = a.nrows();
    let Some(values) = nalgebra::Schur::new(a.clone()).eigenvalues() else {
        return fail(&mut result.info, ARPACK_FACTORIZATION_FAILED);
    };
    let mut values: Vec<Complex64> = values.iter().copied().collect();
    if near_shift(&values, request.sigma) {
        return fail(&mut result.info, ARPACK_FACTORIZATION_FAILED);
    }
    values.sort_by(|x, y| {
        let sx = request.which.score(transform(*x, request.sigma), false);
        let sy = request.which.score(transform(*y, request.sigma), false);
        sy.total_cmp(&sx)
    });
    values.truncate(request.k);

    for (slot, &lambda) in values.iter().enumerate() {
        unsafe { *result.eigval.add(slot) = lambda };
        if !result.eigvec.is_null() {
            let v = inverse_iteration(&a, lambda);
            for row in 0..n {
                unsafe { *result.eigvec.add(slot * n + row) = v[row] };
            }
        }
    }
    result.info = ARPACK_OK;
    result.iterations = 1;
    values.len() as c_int
}

/// Real drivers.
pub mod di {
    use super::*;

    /// Symmetric standard problem `A v = λ v`.
    ///
    /// # Safety
    ///
    /// `which` must be a C string; `a` a valid matrix; result buffers sized
    /// for `k` values and `n * k` vector entries.
    pub unsafe extern "C" fn ss(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        a: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe {
            run_symmetric(which, k, ncv, maxit, None, a, std::ptr::null(), result)
        })
    }

    /// Symmetric standard problem in shift-invert mode.
    ///
    /// # Safety
    ///
    /// As [`ss`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn ss_shift(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        sigma: f64,
        a: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe {
            run_symmetric(which, k, ncv, maxit, Some(sigma), a, std::ptr::null(), result)
        })
    }

    /// Symmetric generalized problem `A v = λ B v`, `B` positive definite.
    ///
    /// # Safety
    ///
    /// As [`ss`]; `b` must be a valid matrix of the same order.
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn sg(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        a: *const ArSpmat<f64>,
        b: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe { run_symmetric(which, k, ncv, maxit, None, a, b, result) })
    }

    /// Symmetric generalized problem in shift-invert mode.
    ///
    /// # Safety
    ///
    /// As [`sg`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn sg_shift(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        sigma: f64,
        a: *const ArSpmat<f64>,
        b: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe {
            run_symmetric(which, k, ncv, maxit, Some(sigma), a, b, result)
        })
    }

    /// Nonsymmetric standard problem.
    ///
    /// # Safety
    ///
    /// As [`ss`], with buffers sized for `k + 1` values.
    pub unsafe extern "C" fn ns(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        a: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe {
            run_general(which, k, ncv, maxit, None, a, std::ptr::null(), result)
        })
    }

    /// Nonsymmetric standard problem in shift-invert mode (real shift).
    ///
    /// # Safety
    ///
    /// As [`ns`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn ns_shift(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        sigma: f64,
        a: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe {
            run_general(which, k, ncv, maxit, Some(sigma), a, std::ptr::null(), result)
        })
    }

    /// Nonsymmetric generalized problem.
    ///
    /// # Safety
    ///
    /// As [`ns`]; `b` must be a valid, regular matrix of the same order.
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn ng(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        a: *const ArSpmat<f64>,
        b: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe { run_general(which, k, ncv, maxit, None, a, b, result) })
    }

    /// Nonsymmetric generalized problem in shift-invert mode.
    ///
    /// # Safety
    ///
    /// As [`ng`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn ng_shift(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        sigma: f64,
        a: *const ArSpmat<f64>,
        b: *const ArSpmat<f64>,
        result: *mut ArResult,
    ) -> c_int {
        registry::guard(0, || unsafe {
            run_general(which, k, ncv, maxit, Some(sigma), a, b, result)
        })
    }
}

/// Complex drivers.
pub mod zi {
    use super::*;

    /// General complex problem `A v = λ v`.
    ///
    /// # Safety
    ///
    /// `which` must be a C string; `a` a valid matrix; result buffers sized
    /// for `k` values and `n * k` vector entries.
    pub unsafe extern "C" fn ns(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        a: *const ArSpmat<Complex64>,
        result: *mut ArResultComplex,
    ) -> c_int {
        registry::guard(0, || unsafe { run_complex(which, k, ncv, maxit, None, a, result) })
    }

    /// General complex problem in shift-invert mode.
    ///
    /// # Safety
    ///
    /// As [`ns`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe extern "C" fn ns_shift(
        which: *const c_char,
        k: c_int,
        ncv: c_int,
        maxit: c_int,
        _tol: f64,
        sigma_re: f64,
        sigma_im: f64,
        a: *const ArSpmat<Complex64>,
        result: *mut ArResultComplex,
    ) -> c_int {
        registry::guard(0, || unsafe {
            let sigma = Complex64::new(sigma_re, sigma_im);
            run_complex(which, k, ncv, maxit, Some(sigma), a, result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Csc<T> {
        p: Vec<c_int>,
        i: Vec<c_int>,
        x: Vec<T>,
    }

    impl<T> Csc<T> {
        fn spmat(&self) -> ArSpmat<T> {
            ArSpmat {
                n: (self.p.len() - 1) as c_int,
                nnz: self.x.len() as c_int,
                p: self.p.as_ptr(),
                i: self.i.as_ptr(),
                x: self.x.as_ptr(),
            }
        }
    }

    /// tridiag(-1, 2, -1) of order n; eigenvalues 2 - 2 cos(jπ/(n+1)).
    fn laplacian(n: usize) -> Csc<f64> {
        let mut p = vec![0];
        let mut i = Vec::new();
        let mut x = Vec::new();
        for c in 0..n {
            if c > 0 {
                i.push((c - 1) as c_int);
                x.push(-1.0);
            }
            i.push(c as c_int);
            x.push(2.0);
            if c + 1 < n {
                i.push((c + 1) as c_int);
                x.push(-1.0);
            }
            p.push(i.len() as c_int);
        }
        Csc { p, i, x }
    }

    fn exact(n: usize, j: usize) -> f64 {
        2.0 - 2.0 * (j as f64 * std::f64::consts::PI / (n as f64 + 1.0)).cos()
    }

    fn buffers(n: usize, k: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        (vec![0.0; k + 1], vec![0.0; k + 1], vec![0.0; n * (k + 1)])
    }

    #[test]
    fn test_symmetric_smallest_and_largest() {
        let n = 10;
        let a = laplacian(n);
        let spmat = a.spmat();
        let (mut re, mut im, mut vec) = buffers(n, 3);
        let mut result = ArResult {
            eigvalr: re.as_mut_ptr(),
            eigvali: im.as_mut_ptr(),
            eigvec: vec.as_mut_ptr(),
            info: -1,
            iterations: 0,
        };
        let nconv = unsafe { di::ss(c"SA".as_ptr(), 3, 8, 100, 0.0, &spmat, &mut result) };
        assert_eq!(nconv, 3);
        assert_eq!(result.info, ARPACK_OK);
        for j in 0..3 {
            assert!((re[j] - exact(n, j + 1)).abs() < 1e-10);
        }

        let nconv = unsafe { di::ss(c"LA".as_ptr(), 3, 8, 100, 0.0, &spmat, &mut result) };
        assert_eq!(nconv, 3);
        // Ascending: the three largest, smallest of them first.
        for j in 0..3 {
            assert!((re[j] - exact(n, n - 2 + j)).abs() < 1e-10);
        }
    }

    #[test]
    fn test_shift_invert_finds_values_near_sigma() {
        let n = 10;
        let a = laplacian(n);
        let spmat = a.spmat();
        let (mut re, mut im, mut vec) = buffers(n, 2);
        let mut result = ArResult {
            eigvalr: re.as_mut_ptr(),
            eigvali: im.as_mut_ptr(),
            eigvec: vec.as_mut_ptr(),
            info: -1,
            iterations: 0,
        };
        let sigma = exact(n, 5) + 0.05;
        let nconv =
            unsafe { di::ss_shift(c"LM".as_ptr(), 2, 6, 100, 0.0, sigma, &spmat, &mut result) };
        assert_eq!(nconv, 2);
        assert!((re[0] - exact(n, 5)).abs() < 1e-10);
        assert!((re[1] - exact(n, 6)).abs() < 1e-10);
    }

    #[test]
    fn test_argument_errors() {
        let a = laplacian(6);
        let spmat = a.spmat();
        let (mut re, mut im, mut vec) = buffers(6, 6);
        let mut result = ArResult {
            eigvalr: re.as_mut_ptr(),
            eigvali: im.as_mut_ptr(),
            eigvec: vec.as_mut_ptr(),
            info: 0,
            iterations: 0,
        };
        unsafe {
            assert_eq!(di::ss(c"LM".as_ptr(), 6, 6, 100, 0.0, &spmat, &mut result), 0);
            assert_eq!(result.info, ARPACK_INVALID_NEV);
            assert_eq!(di::ss(c"LM".as_ptr(), 2, 2, 100, 0.0, &spmat, &mut result), 0);
            assert_eq!(result.info, ARPACK_INVALID_NCV);
            assert_eq!(di::ss(c"LM".as_ptr(), 2, 5, 0, 0.0, &spmat, &mut result), 0);
            assert_eq!(result.info, ARPACK_INVALID_MAXIT);
            // LR is only meaningful for nonsymmetric problems.
            assert_eq!(di::ss(c"LR".as_ptr(), 2, 5, 100, 0.0, &spmat, &mut result), 0);
            assert_eq!(result.info, ARPACK_INVALID_WHICH);
        }
    }

    #[test]
    fn test_nonsymmetric_conjugate_pair_layout() {
        // Block diagonal: rotation-scaling block with eigenvalues 1 ± 2i,
        // then 5, then 0.5.
        let a = Csc {
            p: vec![0, 2, 4, 5, 6],
            i: vec![0, 1, 0, 1, 2, 3],
            x: vec![1.0, 2.0, -2.0, 1.0, 5.0, 0.5],
        };
        let spmat = a.spmat();
        let n = 4;
        let (mut re, mut im, mut vec) = buffers(n, 2);
        let mut result = ArResult {
            eigvalr: re.as_mut_ptr(),
            eigvali: im.as_mut_ptr(),
            eigvec: vec.as_mut_ptr(),
            info: -1,
            iterations: 0,
        };
        // k = 2 by largest magnitude: 5, then the pair (|1+2i| = 2.24) is not
        // split, so three values come back.
        let nconv = unsafe { di::ns(c"LM".as_ptr(), 2, 4, 100, 0.0, &spmat, &mut result) };
        assert_eq!(nconv, 3);
        assert!((re[0] - 5.0).abs() < 1e-10 && im[0] == 0.0);
        assert!((re[1] - 1.0).abs() < 1e-10 && (im[1] - 2.0).abs() < 1e-10);
        assert!((re[2] - 1.0).abs() < 1e-10 && (im[2] + 2.0).abs() < 1e-10);

        // Columns 1 and 2 hold Re(v) and Im(v) of the 1+2i eigenvector.
        let dense = DMatrix::from_row_slice(
            4,
            4,
            &[1.0, -2.0, 0.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.5],
        );
        let v = DVector::from_fn(n, |r, _| Complex64::new(vec[n + r], vec[2 * n + r]));
        let complex = dense.map(|x| Complex64::new(x, 0.0));
        let lambda = Complex64::new(re[1], im[1]);
        assert!((&complex * &v - &v * lambda).norm() < 1e-8);
    }

    #[test]
    fn test_complex_driver() {
        // diag(1+i, 3, -2i)
        let a = Csc {
            p: vec![0, 1, 2, 3],
            i: vec![0, 1, 2],
            x: vec![
                Complex64::new(1.0, 1.0),
                Complex64::new(3.0, 0.0),
                Complex64::new(0.0, -2.0),
            ],
        };
        let spmat = a.spmat();
        let mut values = vec![Complex64::new(0.0, 0.0); 1];
        let mut vectors = vec![Complex64::new(0.0, 0.0); 3];
        let mut result = ArResultComplex {
            eigval: values.as_mut_ptr(),
            eigvec: vectors.as_mut_ptr(),
            info: -1,
            iterations: 0,
        };
        let nconv = unsafe { zi::ns(c"SI".as_ptr(), 1, 3, 100, 0.0, &spmat, &mut result) };
        assert_eq!(nconv, 1);
        assert!((values[0] - Complex64::new(0.0, -2.0)).norm() < 1e-10);
        assert!((vectors[2].norm() - 1.0).abs() < 1e-8);
    }
}
