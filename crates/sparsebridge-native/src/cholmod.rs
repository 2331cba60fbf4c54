//! CHOLMOD calling convention.
//!
//! A `Common` workspace is started before and finished after every other
//! call. Matrices are described by `Sparse` headers whose `stype` says which
//! triangle is stored (`-1` lower, `1` upper); the other triangle is never
//! read. `analyze` returns an opaque factor that `factorize` fills and
//! `solve` uses; `solve` returns a library-allocated `Dense` result that the
//! caller must release with `free_dense`.

use crate::engine::{CscParts, EngineError, Factor, Op, Scalar};
use crate::registry;
use faer::Side;
use faer::sparse::linalg::solvers::SymbolicLlt;
use num_complex::Complex64;
use std::ffi::c_void;
use std::os::raw::c_int;

pub const CHOLMOD_OK: c_int = 0;
pub const CHOLMOD_NOT_POSDEF: c_int = 1;
pub const CHOLMOD_NOT_INSTALLED: c_int = -1;
pub const CHOLMOD_OUT_OF_MEMORY: c_int = -2;
pub const CHOLMOD_INVALID: c_int = -4;

pub const CHOLMOD_TRUE: c_int = 1;
pub const CHOLMOD_FALSE: c_int = 0;

pub const CHOLMOD_INT: c_int = 0;
pub const CHOLMOD_DOUBLE: c_int = 0;
pub const CHOLMOD_REAL: c_int = 1;
pub const CHOLMOD_COMPLEX: c_int = 2;

/// Solve `A x = b`.
pub const CHOLMOD_A: c_int = 0;

const STARTED: c_int = 0x5eed;

/// Shared workspace and status for every call.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Common {
    /// Status of the most recent call.
    pub status: c_int,
    /// Print level.
    pub print: c_int,
    /// Supernodal strategy (kept for layout compatibility).
    pub supernodal: c_int,
    /// Whether `start` has run.
    pub magic: c_int,
}

/// Compressed-column matrix header.
#[repr(C)]
#[derive(Debug)]
pub struct Sparse {
    pub nrow: usize,
    pub ncol: usize,
    pub nzmax: usize,
    /// Column pointers (`ncol + 1` ints).
    pub p: *mut c_void,
    /// Row indices.
    pub i: *mut c_void,
    /// Values, interleaved for complex.
    pub x: *mut c_void,
    /// `0` unsymmetric, `1` upper stored, `-1` lower stored.
    pub stype: c_int,
    pub itype: c_int,
    pub xtype: c_int,
    pub dtype: c_int,
    pub sorted: c_int,
    pub packed: c_int,
}

/// Column-major dense block header.
#[repr(C)]
#[derive(Debug)]
pub struct Dense {
    pub nrow: usize,
    pub ncol: usize,
    pub nzmax: usize,
    /// Leading dimension.
    pub d: usize,
    pub x: *mut c_void,
    pub xtype: c_int,
    pub dtype: c_int,
}

struct CholmodFactor<T: Scalar> {
    n: usize,
    upper: bool,
    column_pointers: Vec<usize>,
    row_indices: Vec<usize>,
    symbolic: SymbolicLlt<usize>,
    numeric: Option<Factor<T>>,
}

#[repr(C)]
struct DenseBlock<T> {
    header: Dense,
    values: Vec<T>,
}

trait Kinds {
    const XTYPE: c_int;
    const FACTOR: &'static str;
    const DENSE: &'static str;
}

impl Kinds for f64 {
    const XTYPE: c_int = CHOLMOD_REAL;
    const FACTOR: &'static str = "cholmod_factor_real";
    const DENSE: &'static str = "cholmod_dense_real";
}

impl Kinds for Complex64 {
    const XTYPE: c_int = CHOLMOD_COMPLEX;
    const FACTOR: &'static str = "cholmod_factor_complex";
    const DENSE: &'static str = "cholmod_dense_complex";
}

/// Borrow a started common, or `None`.
unsafe fn started<'a>(common: *mut Common) -> Option<&'a mut Common> {
    let common = unsafe { common.as_mut() }?;
    if common.magic == STARTED {
        Some(common)
    } else {
        common.status = CHOLMOD_INVALID;
        None
    }
}

unsafe fn read_sparse<T: Scalar>(a: &Sparse) -> Option<(CscParts<T>, bool)> {
    if a.nrow != a.ncol || a.stype == 0 || a.x.is_null() {
        return None;
    }
    let parts = unsafe {
        CscParts::<T>::from_raw(
            a.nrow,
            a.ncol,
            a.p.cast::<c_int>(),
            a.i.cast::<c_int>(),
            a.x.cast::<T>(),
            0,
        )
    }?;
    Some((parts, a.stype > 0))
}

unsafe fn analyze_typed<T: Scalar + Kinds>(a: &Sparse, common: &mut Common) -> *mut c_void {
    let Some((parts, upper)) = (unsafe { read_sparse::<T>(a) }) else {
        common.status = CHOLMOD_INVALID;
        return std::ptr::null_mut();
    };
    let full = parts.expand_triangle(upper, true);
    let Some(symbolic) = T::analyze_llt(&full, Side::Lower) else {
        common.status = CHOLMOD_INVALID;
        return std::ptr::null_mut();
    };
    if common.print > 2 {
        log::debug!("cholmod analyze: n={} nnz={} upper={}", a.nrow, parts.nnz(), upper);
    }
    common.status = CHOLMOD_OK;
    let factor = CholmodFactor::<T> {
        n: a.nrow,
        upper,
        column_pointers: parts.column_pointers,
        row_indices: parts.row_indices,
        symbolic,
        numeric: None,
    };
    registry::register(T::FACTOR, factor)
}

unsafe fn factorize_typed<T: Scalar + Kinds>(
    a: &Sparse,
    l: *mut c_void,
    common: &mut Common,
) -> c_int {
    let Some(factor) = (unsafe { registry::get::<CholmodFactor<T>>(l, T::FACTOR) }) else {
        common.status = CHOLMOD_INVALID;
        return CHOLMOD_FALSE;
    };
    let Some((parts, upper)) = (unsafe { read_sparse::<T>(a) }) else {
        common.status = CHOLMOD_INVALID;
        return CHOLMOD_FALSE;
    };
    if parts.rows != factor.n
        || upper != factor.upper
        || parts.column_pointers != factor.column_pointers
        || parts.row_indices != factor.row_indices
    {
        common.status = CHOLMOD_INVALID;
        return CHOLMOD_FALSE;
    }
    let full = parts.expand_triangle(upper, true);
    factor.numeric = None;
    match Factor::llt(&factor.symbolic, full) {
        Ok(numeric) => {
            factor.numeric = Some(numeric);
            common.status = CHOLMOD_OK;
        }
        // Not an error in CHOLMOD: the factor is left incomplete and the
        // status carries the warning.
        Err(EngineError::NotPositiveDefinite) | Err(EngineError::Singular) => {
            common.status = CHOLMOD_NOT_POSDEF;
        }
        Err(EngineError::Structure) => {
            common.status = CHOLMOD_INVALID;
            return CHOLMOD_FALSE;
        }
    }
    CHOLMOD_TRUE
}

unsafe fn solve_typed<T: Scalar + Kinds>(
    l: *mut c_void,
    b: &Dense,
    common: &mut Common,
) -> *mut Dense {
    let Some(factor) = (unsafe { registry::get::<CholmodFactor<T>>(l, T::FACTOR) }) else {
        common.status = CHOLMOD_INVALID;
        return std::ptr::null_mut();
    };
    let n = factor.n;
    let Some(numeric) = factor.numeric.as_mut() else {
        common.status = CHOLMOD_INVALID;
        return std::ptr::null_mut();
    };
    if b.nrow != n || b.d < n || b.x.is_null() {
        common.status = CHOLMOD_INVALID;
        return std::ptr::null_mut();
    }

    let mut values = vec![T::zero(); n * b.ncol];
    let source = b.x.cast::<T>();
    for j in 0..b.ncol {
        let column = &mut values[j * n..(j + 1) * n];
        for (i, slot) in column.iter_mut().enumerate() {
            *slot = unsafe { *source.add(j * b.d + i) };
        }
        if numeric.solve(Op::Normal, column).is_err() {
            common.status = CHOLMOD_NOT_POSDEF;
            return std::ptr::null_mut();
        }
    }

    let mut block = DenseBlock {
        header: Dense {
            nrow: n,
            ncol: b.ncol,
            nzmax: n * b.ncol,
            d: n,
            x: std::ptr::null_mut(),
            xtype: T::XTYPE,
            dtype: CHOLMOD_DOUBLE,
        },
        values,
    };
    // The Vec's heap buffer does not move when the block is boxed.
    block.header.x = block.values.as_mut_ptr().cast();
    common.status = CHOLMOD_OK;
    registry::register(T::DENSE, block).cast::<Dense>()
}

/// Initialize a common workspace.
///
/// # Safety
///
/// `common` must be null or point to a `Common`.
pub unsafe extern "C" fn start(common: *mut Common) -> c_int {
    registry::guard(CHOLMOD_FALSE, || {
        let Some(common) = (unsafe { common.as_mut() }) else {
            return CHOLMOD_FALSE;
        };
        *common = Common {
            status: CHOLMOD_OK,
            print: 3,
            supernodal: 1,
            magic: STARTED,
        };
        CHOLMOD_TRUE
    })
}

/// Tear down a common workspace. Further calls with it fail.
///
/// # Safety
///
/// `common` must be null or point to a `Common`.
pub unsafe extern "C" fn finish(common: *mut Common) -> c_int {
    registry::guard(CHOLMOD_FALSE, || {
        let Some(common) = (unsafe { started(common) }) else {
            return CHOLMOD_FALSE;
        };
        common.magic = 0;
        CHOLMOD_TRUE
    })
}

/// Symbolic analysis of a symmetric matrix. Returns null on failure.
///
/// # Safety
///
/// `a` must describe valid compressed-column arrays.
pub unsafe extern "C" fn analyze(a: *mut Sparse, common: *mut Common) -> *mut c_void {
    registry::guard(std::ptr::null_mut(), || {
        let Some(common) = (unsafe { started(common) }) else {
            return std::ptr::null_mut();
        };
        let Some(a) = (unsafe { a.as_ref() }) else {
            common.status = CHOLMOD_INVALID;
            return std::ptr::null_mut();
        };
        match a.xtype {
            CHOLMOD_REAL => unsafe { analyze_typed::<f64>(a, common) },
            CHOLMOD_COMPLEX => unsafe { analyze_typed::<Complex64>(a, common) },
            _ => {
                common.status = CHOLMOD_INVALID;
                std::ptr::null_mut()
            }
        }
    })
}

/// Numeric factorization into an analyzed factor.
///
/// A matrix that is not positive definite returns `TRUE` with
/// `common.status == CHOLMOD_NOT_POSDEF`.
///
/// # Safety
///
/// `a` must have the pattern `l` was analyzed with.
pub unsafe extern "C" fn factorize(a: *mut Sparse, l: *mut c_void, common: *mut Common) -> c_int {
    registry::guard(CHOLMOD_FALSE, || {
        let Some(common) = (unsafe { started(common) }) else {
            return CHOLMOD_FALSE;
        };
        let Some(a) = (unsafe { a.as_ref() }) else {
            common.status = CHOLMOD_INVALID;
            return CHOLMOD_FALSE;
        };
        match a.xtype {
            CHOLMOD_REAL => unsafe { factorize_typed::<f64>(a, l, common) },
            CHOLMOD_COMPLEX => unsafe { factorize_typed::<Complex64>(a, l, common) },
            _ => {
                common.status = CHOLMOD_INVALID;
                CHOLMOD_FALSE
            }
        }
    })
}

/// Solve `A X = B` for every column of `B`.
///
/// The result is allocated by the library; free it with [`free_dense`].
///
/// # Safety
///
/// `b` must describe a valid dense block.
pub unsafe extern "C" fn solve(
    sys: c_int,
    l: *mut c_void,
    b: *mut Dense,
    common: *mut Common,
) -> *mut Dense {
    registry::guard(std::ptr::null_mut(), || {
        let Some(common) = (unsafe { started(common) }) else {
            return std::ptr::null_mut();
        };
        let Some(b) = (unsafe { b.as_ref() }) else {
            common.status = CHOLMOD_INVALID;
            return std::ptr::null_mut();
        };
        if sys != CHOLMOD_A {
            common.status = CHOLMOD_INVALID;
            return std::ptr::null_mut();
        }
        match b.xtype {
            CHOLMOD_REAL => unsafe { solve_typed::<f64>(l, b, common) },
            CHOLMOD_COMPLEX => unsafe { solve_typed::<Complex64>(l, b, common) },
            _ => {
                common.status = CHOLMOD_INVALID;
                std::ptr::null_mut()
            }
        }
    })
}

/// Free a factor and null the handle.
///
/// # Safety
///
/// `l` must be null or point to a handle slot.
pub unsafe extern "C" fn free_factor(l: *mut *mut c_void, common: *mut Common) -> c_int {
    registry::guard(CHOLMOD_FALSE, || unsafe {
        let Some(slot) = l.as_mut() else {
            return CHOLMOD_TRUE;
        };
        let ptr = *slot;
        *slot = std::ptr::null_mut();
        if ptr.is_null() {
            return CHOLMOD_TRUE;
        }
        let freed = match registry::kind_of(ptr) {
            Some(kind) if kind == f64::FACTOR => {
                registry::free::<CholmodFactor<f64>>(ptr, f64::FACTOR)
            }
            Some(kind) if kind == Complex64::FACTOR => {
                registry::free::<CholmodFactor<Complex64>>(ptr, Complex64::FACTOR)
            }
            _ => {
                registry::reject_free(ptr);
                false
            }
        };
        if !freed {
            if let Some(common) = common.as_mut() {
                common.status = CHOLMOD_INVALID;
            }
        }
        if freed { CHOLMOD_TRUE } else { CHOLMOD_FALSE }
    })
}

/// Free a library-allocated dense block and null the handle.
///
/// # Safety
///
/// `x` must be null or point to a handle slot.
pub unsafe extern "C" fn free_dense(x: *mut *mut Dense, common: *mut Common) -> c_int {
    registry::guard(CHOLMOD_FALSE, || unsafe {
        let Some(slot) = x.as_mut() else {
            return CHOLMOD_TRUE;
        };
        let ptr = (*slot).cast::<c_void>();
        *slot = std::ptr::null_mut();
        if ptr.is_null() {
            return CHOLMOD_TRUE;
        }
        let freed = match registry::kind_of(ptr) {
            Some(kind) if kind == f64::DENSE => registry::free::<DenseBlock<f64>>(ptr, f64::DENSE),
            Some(kind) if kind == Complex64::DENSE => {
                registry::free::<DenseBlock<Complex64>>(ptr, Complex64::DENSE)
            }
            _ => {
                registry::reject_free(ptr);
                false
            }
        };
        if !freed {
            if let Some(common) = common.as_mut() {
                common.status = CHOLMOD_INVALID;
            }
        }
        if freed { CHOLMOD_TRUE } else { CHOLMOD_FALSE }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lower triangle of tridiag(-1, 2, -1), n = 4.
    fn lower() -> (Vec<c_int>, Vec<c_int>, Vec<f64>) {
        (
            vec![0, 2, 4, 6, 7],
            vec![0, 1, 1, 2, 2, 3, 3],
            vec![2.0, -1.0, 2.0, -1.0, 2.0, -1.0, 2.0],
        )
    }

    fn header(p: &mut [c_int], i: &mut [c_int], x: &mut [f64], stype: c_int) -> Sparse {
        Sparse {
            nrow: 4,
            ncol: 4,
            nzmax: x.len(),
            p: p.as_mut_ptr().cast(),
            i: i.as_mut_ptr().cast(),
            x: x.as_mut_ptr().cast(),
            stype,
            itype: CHOLMOD_INT,
            xtype: CHOLMOD_REAL,
            dtype: CHOLMOD_DOUBLE,
            sorted: 1,
            packed: 1,
        }
    }

    #[test]
    fn test_full_cycle() {
        let (mut p, mut i, mut x) = lower();
        let mut a = header(&mut p, &mut i, &mut x, -1);
        let mut common = Common::default();
        unsafe {
            assert_eq!(start(&mut common), CHOLMOD_TRUE);
            let mut l = analyze(&mut a, &mut common);
            assert!(!l.is_null());
            assert_eq!(factorize(&mut a, l, &mut common), CHOLMOD_TRUE);
            assert_eq!(common.status, CHOLMOD_OK);

            // Two right-hand sides: A * ones and A * [1, 2, 3, 4].
            let mut rhs = vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 5.0];
            let mut b = Dense {
                nrow: 4,
                ncol: 2,
                nzmax: 8,
                d: 4,
                x: rhs.as_mut_ptr().cast(),
                xtype: CHOLMOD_REAL,
                dtype: CHOLMOD_DOUBLE,
            };
            let mut out = solve(CHOLMOD_A, l, &mut b, &mut common);
            assert!(!out.is_null());
            let values = std::slice::from_raw_parts((*out).x.cast::<f64>(), 8);
            for k in 0..4 {
                assert!((values[k] - 1.0).abs() < 1e-12);
                assert!((values[4 + k] - (k as f64 + 1.0)).abs() < 1e-12);
            }
            assert_eq!(free_dense(&mut out, &mut common), CHOLMOD_TRUE);
            assert!(out.is_null());
            assert_eq!(free_factor(&mut l, &mut common), CHOLMOD_TRUE);
            assert!(l.is_null());
            assert_eq!(finish(&mut common), CHOLMOD_TRUE);
        }
    }

    #[test]
    fn test_not_positive_definite() {
        let (mut p, mut i, mut x) = lower();
        x[0] = -2.0;
        let mut a = header(&mut p, &mut i, &mut x, -1);
        let mut common = Common::default();
        unsafe {
            start(&mut common);
            let mut l = analyze(&mut a, &mut common);
            assert_eq!(factorize(&mut a, l, &mut common), CHOLMOD_TRUE);
            assert_eq!(common.status, CHOLMOD_NOT_POSDEF);
            let mut b = Dense {
                nrow: 4,
                ncol: 1,
                nzmax: 4,
                d: 4,
                x: x.as_mut_ptr().cast(),
                xtype: CHOLMOD_REAL,
                dtype: CHOLMOD_DOUBLE,
            };
            assert!(solve(CHOLMOD_A, l, &mut b, &mut common).is_null());
            free_factor(&mut l, &mut common);
            finish(&mut common);
        }
    }

    #[test]
    fn test_requires_started_common_and_symmetric_storage() {
        let (mut p, mut i, mut x) = lower();
        let mut a = header(&mut p, &mut i, &mut x, -1);
        let mut common = Common::default();
        unsafe {
            assert!(analyze(&mut a, &mut common).is_null());
            assert_eq!(common.status, CHOLMOD_INVALID);
            start(&mut common);
            a.stype = 0;
            assert!(analyze(&mut a, &mut common).is_null());
            assert_eq!(common.status, CHOLMOD_INVALID);
            finish(&mut common);
        }
    }

    #[test]
    fn test_double_free_factor_is_harmless() {
        registry::reset_thread_stats();
        let (mut p, mut i, mut x) = lower();
        let mut a = header(&mut p, &mut i, &mut x, -1);
        let mut common = Common::default();
        unsafe {
            start(&mut common);
            let l = analyze(&mut a, &mut common);
            let mut first = l;
            let mut second = l;
            assert_eq!(free_factor(&mut first, &mut common), CHOLMOD_TRUE);
            assert_eq!(free_factor(&mut second, &mut common), CHOLMOD_FALSE);
            finish(&mut common);
        }
        let stats = registry::thread_stats();
        assert_eq!(stats.freed, 1);
        assert_eq!(stats.invalid_frees, 1);
    }
}
