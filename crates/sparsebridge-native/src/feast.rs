//! FEAST calling convention (real symmetric, compressed-sparse-row).
//!
//! FEAST finds every eigenvalue inside a search interval `[emin, emax]`
//! rather than a fixed count. The caller guesses an upper bound `m0` on how
//! many there are and sizes `e[m0]`, `x[n * m0]` and `res[m0]`; on return `m`
//! holds the number found. Index arrays are one-based and `uplo` selects the
//! stored triangle (`U`, `L`) or full storage (`F`). All arguments are passed
//! by reference, Fortran style.

use crate::engine::{CscParts, dense_symmetric_eigen};
use crate::registry;
use nalgebra::{DMatrix, DVector};
use std::ffi::c_char;
use std::os::raw::c_int;

/// Length of the `fpm` parameter array.
pub const FEAST_PARAMETERS: usize = 128;

// fpm indices (zero-based)
pub const FPM_PRINT: usize = 0;
pub const FPM_CONTOUR_POINTS: usize = 1;
/// Stopping tolerance is `10^-fpm[2]`.
pub const FPM_TOLERANCE_EXPONENT: usize = 2;
pub const FPM_MAX_LOOPS: usize = 3;

pub const FEAST_OK: c_int = 0;
/// No eigenvalue in the search interval.
pub const FEAST_NONE_FOUND: c_int = 1;
/// Refinement loops exhausted before convergence.
pub const FEAST_NO_CONVERGENCE: c_int = 2;
/// More eigenvalues in the interval than `m0`.
pub const FEAST_SUBSPACE_TOO_SMALL: c_int = 3;
pub const FEAST_INVALID_INTERVAL: c_int = 200;
pub const FEAST_INVALID_M0: c_int = 201;
pub const FEAST_INVALID_N: c_int = 202;
pub const FEAST_INVALID_MATRIX: c_int = -1;
/// `B` is not positive definite.
pub const FEAST_B_NOT_SPD: c_int = -4;

struct Outputs {
    epsout: *mut f64,
    loops: *mut c_int,
    e: *mut f64,
    x: *mut f64,
    m: *mut c_int,
    res: *mut f64,
}

/// Read a one-based CSR matrix into a full dense symmetric matrix.
unsafe fn read(
    uplo: c_char,
    n: usize,
    a: *const f64,
    ia: *const c_int,
    ja: *const c_int,
) -> Option<DMatrix<f64>> {
    // CSR read as CSC is the transpose, so the triangles swap.
    let stored = unsafe { CscParts::<f64>::from_raw(n, n, ia, ja, a, 1) }?;
    let full = match uplo as u8 {
        b'U' | b'u' => stored.expand_triangle(false, false),
        b'L' | b'l' => stored.expand_triangle(true, false),
        b'F' | b'f' => stored.transpose(),
        _ => return None,
    };
    Some(full.to_dense())
}

#[allow(clippy::too_many_arguments)]
unsafe fn run(
    uplo: *const c_char,
    n: *const c_int,
    a: (*const f64, *const c_int, *const c_int),
    b: Option<(*const f64, *const c_int, *const c_int)>,
    fpm: *mut c_int,
    emin: *const f64,
    emax: *const f64,
    m0: *const c_int,
    out: Outputs,
) -> c_int {
    if [n, m0].iter().any(|p| p.is_null())
        || [emin, emax].iter().any(|p| p.is_null())
        || uplo.is_null()
        || fpm.is_null()
        || out.e.is_null()
        || out.m.is_null()
    {
        return FEAST_INVALID_MATRIX;
    }
    let (n, m0, emin, emax, uplo) = unsafe { (*n, *m0, *emin, *emax, *uplo) };
    unsafe { *out.m = 0 };
    if n <= 0 {
        return FEAST_INVALID_N;
    }
    if emin >= emax {
        return FEAST_INVALID_INTERVAL;
    }
    if m0 <= 0 || m0 > n {
        return FEAST_INVALID_M0;
    }
    let n = n as usize;
    let fpm = unsafe { std::slice::from_raw_parts(fpm, FEAST_PARAMETERS) };

    let Some(a) = (unsafe { read(uplo, n, a.0, a.1, a.2) }) else {
        return FEAST_INVALID_MATRIX;
    };
    let b = match b {
        Some((bx, ib, jb)) => match unsafe { read(uplo, n, bx, ib, jb) } {
            Some(b) => Some(b),
            None => return FEAST_INVALID_MATRIX,
        },
        None => None,
    };
    let Some((values, vectors)) = dense_symmetric_eigen(&a, b.as_ref()) else {
        return FEAST_B_NOT_SPD;
    };

    let inside: Vec<usize> = (0..n)
        .filter(|&j| values[j] >= emin && values[j] <= emax)
        .collect();
    if fpm[FPM_PRINT] != 0 {
        log::info!("feast: {} eigenvalues in [{}, {}]", inside.len(), emin, emax);
    }
    unsafe { *out.m = inside.len() as c_int };
    if inside.is_empty() {
        return FEAST_NONE_FOUND;
    }
    if inside.len() > m0 as usize {
        return FEAST_SUBSPACE_TOO_SMALL;
    }

    let tolerance = 10f64.powi(-fpm[FPM_TOLERANCE_EXPONENT]);
    let mut worst: f64 = 0.0;
    for (slot, &j) in inside.iter().enumerate() {
        let lambda = values[j];
        let v: DVector<f64> = vectors.column(j).into_owned();
        let bv = match &b {
            Some(b) => b * &v,
            None => v.clone(),
        };
        let av = &a * &v;
        let scale = av.norm().max(lambda.abs() * bv.norm()).max(f64::MIN_POSITIVE);
        let residual = (&av - &bv * lambda).norm() / scale;
        worst = worst.max(residual);
        unsafe {
            *out.e.add(slot) = lambda;
            if !out.res.is_null() {
                *out.res.add(slot) = residual;
            }
            if !out.x.is_null() {
                for row in 0..n {
                    *out.x.add(slot * n + row) = v[row];
                }
            }
        }
    }
    unsafe {
        if !out.epsout.is_null() {
            *out.epsout = worst;
        }
        if !out.loops.is_null() {
            *out.loops = 1;
        }
    }
    if worst > tolerance.max(1e-10) {
        return FEAST_NO_CONVERGENCE;
    }
    FEAST_OK
}

/// Fill `fpm[128]` with default parameters.
///
/// # Safety
///
/// `fpm` must be null or point to 128 ints.
pub unsafe extern "C" fn feastinit(fpm: *mut c_int) {
    registry::guard((), || {
        if fpm.is_null() {
            return;
        }
        let fpm = unsafe { std::slice::from_raw_parts_mut(fpm, FEAST_PARAMETERS) };
        fpm.fill(0);
        fpm[FPM_CONTOUR_POINTS] = 8;
        fpm[FPM_TOLERANCE_EXPONENT] = 12;
        fpm[FPM_MAX_LOOPS] = 20;
    })
}

/// Standard problem `A x = λ x`.
///
/// # Safety
///
/// `a`/`ia`/`ja` must be a one-based CSR matrix of order `n`; output buffers
/// sized for `m0` eigenpairs.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn dfeast_scsrev(
    uplo: *const c_char,
    n: *const c_int,
    a: *const f64,
    ia: *const c_int,
    ja: *const c_int,
    fpm: *mut c_int,
    epsout: *mut f64,
    loops: *mut c_int,
    emin: *const f64,
    emax: *const f64,
    m0: *const c_int,
    e: *mut f64,
    x: *mut f64,
    m: *mut c_int,
    res: *mut f64,
    info: *mut c_int,
) {
    registry::guard((), || unsafe {
        let out = Outputs {
            epsout,
            loops,
            e,
            x,
            m,
            res,
        };
        let status = run(uplo, n, (a, ia, ja), None, fpm, emin, emax, m0, out);
        if let Some(info) = info.as_mut() {
            *info = status;
        }
    })
}

/// Generalized problem `A x = λ B x`, `B` positive definite, both stored
/// with the same `uplo`.
///
/// # Safety
///
/// As [`dfeast_scsrev`]; `b`/`ib`/`jb` must be a one-based CSR matrix of
/// order `n`.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn dfeast_scsrgv(
    uplo: *const c_char,
    n: *const c_int,
    a: *const f64,
    ia: *const c_int,
    ja: *const c_int,
    b: *const f64,
    ib: *const c_int,
    jb: *const c_int,
    fpm: *mut c_int,
    epsout: *mut f64,
    loops: *mut c_int,
    emin: *const f64,
    emax: *const f64,
    m0: *const c_int,
    e: *mut f64,
    x: *mut f64,
    m: *mut c_int,
    res: *mut f64,
    info: *mut c_int,
) {
    registry::guard((), || unsafe {
        let out = Outputs {
            epsout,
            loops,
            e,
            x,
            m,
            res,
        };
        let status = run(uplo, n, (a, ia, ja), Some((b, ib, jb)), fpm, emin, emax, m0, out);
        if let Some(info) = info.as_mut() {
            *info = status;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-based CSR upper triangle of tridiag(-1, 2, -1).
    fn laplacian_upper(n: usize) -> (Vec<c_int>, Vec<c_int>, Vec<f64>) {
        let mut ia = vec![1];
        let mut ja = Vec::new();
        let mut a = Vec::new();
        for r in 0..n {
            ja.push(r as c_int + 1);
            a.push(2.0);
            if r + 1 < n {
                ja.push(r as c_int + 2);
                a.push(-1.0);
            }
            ia.push(ja.len() as c_int + 1);
        }
        (ia, ja, a)
    }

    struct Output {
        e: Vec<f64>,
        x: Vec<f64>,
        res: Vec<f64>,
        m: c_int,
        info: c_int,
    }

    fn solve(n: usize, emin: f64, emax: f64, m0: usize) -> Output {
        let (ia, ja, a) = laplacian_upper(n);
        let mut fpm = [0 as c_int; FEAST_PARAMETERS];
        unsafe { feastinit(fpm.as_mut_ptr()) };
        let mut out = Output {
            e: vec![0.0; m0],
            x: vec![0.0; n * m0],
            res: vec![0.0; m0],
            m: -1,
            info: -99,
        };
        let mut epsout = 0.0;
        let mut loops = 0;
        let uplo = b'U' as c_char;
        let n = n as c_int;
        let m0 = m0 as c_int;
        unsafe {
            dfeast_scsrev(
                &uplo,
                &n,
                a.as_ptr(),
                ia.as_ptr(),
                ja.as_ptr(),
                fpm.as_mut_ptr(),
                &mut epsout,
                &mut loops,
                &emin,
                &emax,
                &m0,
                out.e.as_mut_ptr(),
                out.x.as_mut_ptr(),
                &mut out.m,
                out.res.as_mut_ptr(),
                &mut out.info,
            );
        }
        out
    }

    #[test]
    fn test_defaults() {
        let mut fpm = [7 as c_int; FEAST_PARAMETERS];
        unsafe { feastinit(fpm.as_mut_ptr()) };
        assert_eq!(fpm[FPM_TOLERANCE_EXPONENT], 12);
        assert_eq!(fpm[FPM_MAX_LOOPS], 20);
        assert_eq!(fpm[100], 0);
    }

    #[test]
    fn test_interval_count() {
        // n = 8: eigenvalues 2 - 2cos(jπ/9); four of them lie below 2.
        let out = solve(8, 0.0, 1.99, 6);
        assert_eq!(out.info, FEAST_OK);
        assert_eq!(out.m, 4);
        for j in 0..4 {
            let exact = 2.0 - 2.0 * ((j + 1) as f64 * std::f64::consts::PI / 9.0).cos();
            assert!((out.e[j] - exact).abs() < 1e-10);
            assert!(out.res[j] < 1e-10);
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(solve(8, 5.0, 6.0, 2).info, FEAST_NONE_FOUND);
        let small = solve(8, 0.0, 1.99, 2);
        assert_eq!(small.info, FEAST_SUBSPACE_TOO_SMALL);
        assert_eq!(small.m, 4);
        assert_eq!(solve(8, 1.0, 1.0, 2).info, FEAST_INVALID_INTERVAL);
        assert_eq!(solve(8, 0.0, 1.0, 9).info, FEAST_INVALID_M0);
    }
}
