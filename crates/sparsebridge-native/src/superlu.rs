//! SuperLU calling convention.
//!
//! The wrapper exposes one combined call, `gstrf`, that orders, equilibrates
//! and factors a compressed-column matrix into an opaque factor object, and
//! `gstrs`, which solves against it in place. There is no separate symbolic
//! step: refactorization always repeats the full analysis.
//!
//! Real entry points live in [`d`], complex ones in [`z`].

use crate::engine::{CscParts, EngineError, Factor, Op, Scalar};
use crate::registry;
use num_complex::Complex64;
use std::ffi::c_void;
use std::os::raw::c_int;

pub const NO: c_int = 0;
pub const YES: c_int = 1;

// Column permutations
pub const NATURAL: c_int = 0;
pub const MMD_ATA: c_int = 1;
pub const MMD_AT_PLUS_A: c_int = 2;
pub const COLAMD: c_int = 3;

// Transpose selectors for gstrs
pub const NOTRANS: c_int = 0;
pub const TRANS: c_int = 1;
pub const CONJ: c_int = 2;

// Iterative refinement
pub const NOREFINE: c_int = 0;
pub const SLU_SINGLE: c_int = 1;
pub const SLU_DOUBLE: c_int = 2;

/// Refinement steps taken when `iter_refine` is not `NOREFINE`.
const REFINE_STEPS: usize = 2;

/// Solver options, filled by `set_default_options`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub equil: c_int,
    pub col_perm: c_int,
    pub iter_refine: c_int,
    pub diag_pivot_thresh: f64,
    pub sym_pattern: c_int,
    pub print_stat: c_int,
}

struct Factors<T: Scalar> {
    factor: Factor<T>,
    row_scale: Vec<f64>,
    col_scale: Vec<f64>,
    refine: bool,
}

trait Kinds {
    const FACTORS: &'static str;
}

impl Kinds for f64 {
    const FACTORS: &'static str = "superlu_d_factors";
}

impl Kinds for Complex64 {
    const FACTORS: &'static str = "superlu_z_factors";
}

unsafe fn set_info(info: *mut c_int, value: c_int) {
    if !info.is_null() {
        unsafe { *info = value };
    }
}

/// Row then column scaling so every row and column has max modulus one.
fn equilibrate<T: Scalar>(matrix: &CscParts<T>) -> (Vec<f64>, Vec<f64>) {
    let mut row = vec![0.0f64; matrix.rows];
    for (r, _, v) in matrix.iter() {
        row[r] = row[r].max(v.modulus());
    }
    for s in row.iter_mut() {
        *s = if *s > 0.0 { 1.0 / *s } else { 1.0 };
    }
    let mut col = vec![0.0f64; matrix.columns];
    for (r, c, v) in matrix.iter() {
        col[c] = col[c].max(v.modulus() * row[r]);
    }
    for s in col.iter_mut() {
        *s = if *s > 0.0 { 1.0 / *s } else { 1.0 };
    }
    (row, col)
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_gstrf<T: Scalar + Kinds>(
    options: *const Options,
    n: c_int,
    nnz: c_int,
    colptr: *const c_int,
    rowind: *const c_int,
    values: *const T,
    factors: *mut *mut c_void,
    info: *mut c_int,
) {
    let Some(options) = (unsafe { options.as_ref() }) else {
        return unsafe { set_info(info, -1) };
    };
    if n < 0 {
        return unsafe { set_info(info, -2) };
    }
    if factors.is_null() || values.is_null() {
        return unsafe { set_info(info, -7) };
    }
    unsafe { *factors = std::ptr::null_mut() };
    let n = n as usize;
    let Some(mut parts) =
        (unsafe { CscParts::<T>::from_raw(n, n, colptr, rowind, values, 0) })
    else {
        return unsafe { set_info(info, -4) };
    };
    if parts.nnz() != nnz.max(0) as usize {
        return unsafe { set_info(info, -3) };
    }

    let (row_scale, col_scale) = if options.equil == YES {
        let (row, col) = equilibrate(&parts);
        parts.scale(&row, &col);
        (row, col)
    } else {
        (vec![1.0; n], vec![1.0; n])
    };

    let Some(symbolic) = T::analyze_lu(&parts) else {
        return unsafe { set_info(info, -4) };
    };
    match Factor::lu(&symbolic, parts) {
        Ok(factor) => {
            if options.print_stat == YES {
                log::debug!("superlu gstrf: n={} nnz={} equil={}", n, nnz, options.equil);
            }
            let object = Factors {
                factor,
                row_scale,
                col_scale,
                refine: options.iter_refine != NOREFINE,
            };
            unsafe {
                *factors = registry::register(T::FACTORS, object);
                set_info(info, 0);
            }
        }
        // Positive info: the factor U is exactly singular.
        Err(_) => unsafe { set_info(info, n.max(1) as c_int) },
    }
}

unsafe fn run_gstrs<T: Scalar + Kinds>(
    trans: c_int,
    factors: *mut c_void,
    nrhs: c_int,
    b: *mut T,
    ldb: c_int,
    info: *mut c_int,
) {
    let op = match trans {
        NOTRANS => Op::Normal,
        TRANS => Op::Transpose,
        CONJ => Op::ConjugateTranspose,
        _ => return unsafe { set_info(info, -1) },
    };
    let Some(object) = (unsafe { registry::get::<Factors<T>>(factors, T::FACTORS) }) else {
        return unsafe { set_info(info, -2) };
    };
    let n = object.factor.order();
    if nrhs < 0 {
        return unsafe { set_info(info, -3) };
    }
    if b.is_null() || (ldb as usize) < n.max(1) || ldb < 0 {
        return unsafe { set_info(info, -4) };
    }

    // A = R⁻¹ As C⁻¹. For op = N the scaled right-hand side is R b and the
    // solution is C y; the transposes swap the roles of R and C.
    let (pre, post) = match op {
        Op::Normal => (&object.row_scale, &object.col_scale),
        _ => (&object.col_scale, &object.row_scale),
    };
    let mut rhs = vec![T::zero(); n];
    let mut y = vec![T::zero(); n];
    let mut scratch = vec![T::zero(); n];
    for j in 0..nrhs as usize {
        let column = unsafe { std::slice::from_raw_parts_mut(b.add(j * ldb as usize), n) };
        for i in 0..n {
            rhs[i] = column[i] * T::from_real(pre[i]);
        }
        y.copy_from_slice(&rhs);
        let solved = object.factor.solve(op, &mut y).and_then(|()| {
            if object.refine {
                object
                    .factor
                    .refine(op, &rhs, &mut y, REFINE_STEPS, &mut scratch)
                    .map(|_| ())
            } else {
                Ok::<(), EngineError>(())
            }
        });
        if solved.is_err() {
            return unsafe { set_info(info, 1) };
        }
        for i in 0..n {
            column[i] = y[i] * T::from_real(post[i]);
        }
    }
    unsafe { set_info(info, 0) };
}

macro_rules! entry_points {
    ($prefix:ident, $t:ty) => {
        pub mod $prefix {
            use super::*;

            /// Factor an `n x n` compressed-column matrix.
            ///
            /// `info` is 0 on success, `-i` if argument `i` is illegal, and
            /// positive if the matrix is singular (no factors are returned).
            ///
            /// # Safety
            ///
            /// Arrays must describe an `n x n` matrix with `nnz` entries.
            #[allow(clippy::too_many_arguments)]
            pub unsafe extern "C" fn gstrf(
                options: *const Options,
                n: c_int,
                nnz: c_int,
                colptr: *const c_int,
                rowind: *const c_int,
                values: *const $t,
                factors: *mut *mut c_void,
                info: *mut c_int,
            ) {
                registry::guard((), || unsafe {
                    run_gstrf::<$t>(options, n, nnz, colptr, rowind, values, factors, info)
                })
            }

            /// Solve `op(A) X = B` in place, `B` column-major with leading
            /// dimension `ldb`.
            ///
            /// # Safety
            ///
            /// `b` must hold `ldb * nrhs` values.
            pub unsafe extern "C" fn gstrs(
                trans: c_int,
                factors: *mut c_void,
                nrhs: c_int,
                b: *mut $t,
                ldb: c_int,
                info: *mut c_int,
            ) {
                registry::guard((), || unsafe { run_gstrs::<$t>(trans, factors, nrhs, b, ldb, info) })
            }

            /// Free factors and null the handle.
            ///
            /// # Safety
            ///
            /// `factors` must be null or point to a handle slot.
            pub unsafe extern "C" fn destroy(factors: *mut *mut c_void) {
                registry::guard((), || unsafe {
                    if let Some(slot) = factors.as_mut() {
                        registry::free::<Factors<$t>>(*slot, <$t>::FACTORS);
                        *slot = std::ptr::null_mut();
                    }
                })
            }
        }
    };
}

/// Fill `options` with the library defaults.
///
/// # Safety
///
/// `options` must be null or point to an `Options`.
pub unsafe extern "C" fn set_default_options(options: *mut Options) {
    registry::guard((), || {
        if let Some(options) = unsafe { options.as_mut() } {
            *options = Options {
                equil: YES,
                col_perm: COLAMD,
                iter_refine: NOREFINE,
                diag_pivot_thresh: 1.0,
                sym_pattern: NO,
                print_stat: NO,
            };
        }
    })
}

entry_points!(d, f64);
entry_points!(z, Complex64);
