//! UMFPACK calling convention.
//!
//! Real (`di`) and complex (`zi`) entry points mirror `umfpack_di_*` and
//! `umfpack_zi_*`. Complex values are packed (interleaved `re, im`), the
//! layout UMFPACK uses when the separate imaginary array is null. The
//! analysis is opaque (`void *Symbolic`, `void *Numeric`) and must be freed
//! with `free_symbolic` / `free_numeric`.
//!
//! The reference engine factors square matrices only.

use crate::engine::{CscParts, EngineError, Factor, Op, Scalar, dense_lu};
use crate::registry;
use faer::sparse::linalg::solvers::SymbolicLu;
use nalgebra::DMatrix;
use num_complex::Complex64;
use std::ffi::c_void;
use std::os::raw::c_int;

/// Length of the control array.
pub const UMFPACK_CONTROL: usize = 20;
/// Length of the info array.
pub const UMFPACK_INFO: usize = 90;

pub const UMFPACK_OK: c_int = 0;
pub const UMFPACK_WARNING_SINGULAR_MATRIX: c_int = 1;
pub const UMFPACK_ERROR_OUT_OF_MEMORY: c_int = -1;
pub const UMFPACK_ERROR_INVALID_NUMERIC_OBJECT: c_int = -3;
pub const UMFPACK_ERROR_INVALID_SYMBOLIC_OBJECT: c_int = -4;
pub const UMFPACK_ERROR_ARGUMENT_MISSING: c_int = -5;
pub const UMFPACK_ERROR_N_NONPOSITIVE: c_int = -6;
pub const UMFPACK_ERROR_INVALID_MATRIX: c_int = -8;
pub const UMFPACK_ERROR_DIFFERENT_PATTERN: c_int = -11;
pub const UMFPACK_ERROR_INVALID_SYSTEM: c_int = -13;
pub const UMFPACK_ERROR_INTERNAL_ERROR: c_int = -911;

// Control indices
pub const UMFPACK_PRL: usize = 0;
pub const UMFPACK_DENSE_ROW: usize = 1;
pub const UMFPACK_DENSE_COL: usize = 2;
pub const UMFPACK_PIVOT_TOLERANCE: usize = 3;
pub const UMFPACK_BLOCK_SIZE: usize = 4;
pub const UMFPACK_STRATEGY: usize = 5;
pub const UMFPACK_IRSTEP: usize = 7;
pub const UMFPACK_ORDERING: usize = 10;
pub const UMFPACK_SYM_PIVOT_TOLERANCE: usize = 15;
pub const UMFPACK_SCALE: usize = 16;

// Info indices
pub const UMFPACK_STATUS: usize = 0;
pub const UMFPACK_NROW: usize = 1;
pub const UMFPACK_NZ: usize = 2;
pub const UMFPACK_NCOL: usize = 16;
pub const UMFPACK_IR_TAKEN: usize = 80;

// Strategy values
pub const UMFPACK_STRATEGY_AUTO: f64 = 0.0;
pub const UMFPACK_STRATEGY_UNSYMMETRIC: f64 = 1.0;
pub const UMFPACK_STRATEGY_SYMMETRIC: f64 = 3.0;

// Ordering values
pub const UMFPACK_ORDERING_CHOLMOD: f64 = 0.0;
pub const UMFPACK_ORDERING_AMD: f64 = 1.0;
pub const UMFPACK_ORDERING_METIS: f64 = 3.0;
pub const UMFPACK_ORDERING_BEST: f64 = 4.0;
pub const UMFPACK_ORDERING_NONE: f64 = 5.0;

// Systems
/// `A x = b`
pub const UMFPACK_A: c_int = 0;
/// `Aᴴ x = b` (conjugate transpose)
pub const UMFPACK_AT: c_int = 1;
/// `Aᵀ x = b` (array transpose)
pub const UMFPACK_AAT: c_int = 2;

struct Symbolic {
    pattern: CscParts<f64>,
    analysis: SymbolicLu<usize>,
}

struct Numeric<T: Scalar> {
    factor: Factor<T>,
    dense: Option<(DMatrix<T>, DMatrix<T>, Vec<usize>)>,
}

impl<T: Scalar> Numeric<T> {
    fn dense_factors(&mut self) -> Option<&(DMatrix<T>, DMatrix<T>, Vec<usize>)> {
        if self.dense.is_none() {
            self.dense = dense_lu(self.factor.matrix());
        }
        self.dense.as_ref()
    }
}

unsafe fn set_info(info: *mut f64, index: usize, value: f64) {
    if !info.is_null() {
        unsafe { *info.add(index) = value };
    }
}

unsafe fn control_value(control: *const f64, index: usize, default: f64) -> f64 {
    if control.is_null() {
        return default;
    }
    let value = unsafe { *control.add(index) };
    if value.is_nan() { default } else { value }
}

unsafe fn finish(info: *mut f64, status: c_int) -> c_int {
    unsafe { set_info(info, UMFPACK_STATUS, status as f64) };
    status
}

unsafe fn run_defaults(control: *mut f64) {
    if control.is_null() {
        return;
    }
    let control = unsafe { std::slice::from_raw_parts_mut(control, UMFPACK_CONTROL) };
    control.fill(0.0);
    control[UMFPACK_PRL] = 1.0;
    control[UMFPACK_DENSE_ROW] = 0.2;
    control[UMFPACK_DENSE_COL] = 0.2;
    control[UMFPACK_PIVOT_TOLERANCE] = 0.1;
    control[UMFPACK_BLOCK_SIZE] = 32.0;
    control[UMFPACK_STRATEGY] = UMFPACK_STRATEGY_AUTO;
    control[UMFPACK_IRSTEP] = 2.0;
    control[UMFPACK_ORDERING] = UMFPACK_ORDERING_AMD;
    control[UMFPACK_SYM_PIVOT_TOLERANCE] = 0.001;
    control[UMFPACK_SCALE] = 1.0;
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_symbolic<T: Scalar + Kinds>(
    n_row: c_int,
    n_col: c_int,
    ap: *const c_int,
    ai: *const c_int,
    ax: *const T,
    symbolic: *mut *mut c_void,
    control: *const f64,
    info: *mut f64,
) -> c_int {
    if symbolic.is_null() || ap.is_null() || ai.is_null() {
        return unsafe { finish(info, UMFPACK_ERROR_ARGUMENT_MISSING) };
    }
    unsafe { *symbolic = std::ptr::null_mut() };
    if n_row <= 0 || n_col <= 0 {
        return unsafe { finish(info, UMFPACK_ERROR_N_NONPOSITIVE) };
    }
    if n_row != n_col {
        return unsafe { finish(info, UMFPACK_ERROR_INVALID_MATRIX) };
    }
    let (rows, columns) = (n_row as usize, n_col as usize);
    let Some(parts) = (unsafe { CscParts::<T>::from_raw(rows, columns, ap, ai, ax, 0) }) else {
        return unsafe { finish(info, UMFPACK_ERROR_INVALID_MATRIX) };
    };
    let Some(analysis) = T::analyze_lu(&parts) else {
        return unsafe { finish(info, UMFPACK_ERROR_INVALID_MATRIX) };
    };

    let strategy = unsafe { control_value(control, UMFPACK_STRATEGY, UMFPACK_STRATEGY_AUTO) };
    log::debug!(
        "umfpack symbolic: n={} nnz={} strategy={}",
        rows,
        parts.nnz(),
        strategy
    );
    unsafe {
        set_info(info, UMFPACK_NROW, rows as f64);
        set_info(info, UMFPACK_NCOL, columns as f64);
        set_info(info, UMFPACK_NZ, parts.nnz() as f64);
    }

    let pattern = CscParts {
        rows,
        columns,
        column_pointers: parts.column_pointers,
        row_indices: parts.row_indices,
        values: Vec::new(),
    };
    let object = Symbolic { pattern, analysis };
    unsafe { *symbolic = registry::register(T::SYMBOLIC_KIND, object) };
    unsafe { finish(info, UMFPACK_OK) }
}

unsafe fn run_numeric<T: Scalar + Kinds>(
    ap: *const c_int,
    ai: *const c_int,
    ax: *const T,
    symbolic: *mut c_void,
    numeric: *mut *mut c_void,
    info: *mut f64,
) -> c_int {
    if numeric.is_null() || ap.is_null() || ai.is_null() || ax.is_null() {
        return unsafe { finish(info, UMFPACK_ERROR_ARGUMENT_MISSING) };
    }
    unsafe { *numeric = std::ptr::null_mut() };
    let Some(sym) = (unsafe { registry::get::<Symbolic>(symbolic, T::SYMBOLIC_KIND) }) else {
        return unsafe { finish(info, UMFPACK_ERROR_INVALID_SYMBOLIC_OBJECT) };
    };
    let (rows, columns) = (sym.pattern.rows, sym.pattern.columns);
    let Some(parts) = (unsafe { CscParts::<T>::from_raw(rows, columns, ap, ai, ax, 0) }) else {
        return unsafe { finish(info, UMFPACK_ERROR_INVALID_MATRIX) };
    };
    if parts.column_pointers != sym.pattern.column_pointers
        || parts.row_indices != sym.pattern.row_indices
    {
        return unsafe { finish(info, UMFPACK_ERROR_DIFFERENT_PATTERN) };
    }

    match Factor::lu(&sym.analysis, parts) {
        Ok(factor) => {
            let object = Numeric { factor, dense: None };
            unsafe { *numeric = registry::register(T::NUMERIC_KIND, object) };
            unsafe { finish(info, UMFPACK_OK) }
        }
        Err(EngineError::Singular) => unsafe { finish(info, UMFPACK_WARNING_SINGULAR_MATRIX) },
        Err(_) => unsafe { finish(info, UMFPACK_ERROR_INVALID_MATRIX) },
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_solve<T: Scalar + Kinds>(
    sys: c_int,
    ax: *const T,
    x: *mut T,
    b: *const T,
    numeric: *mut c_void,
    control: *const f64,
    info: *mut f64,
    workspace: Option<&mut [T]>,
) -> c_int {
    let op = match sys {
        UMFPACK_A => Op::Normal,
        UMFPACK_AT => Op::ConjugateTranspose,
        UMFPACK_AAT => Op::Transpose,
        _ => return unsafe { finish(info, UMFPACK_ERROR_INVALID_SYSTEM) },
    };
    if x.is_null() || b.is_null() {
        return unsafe { finish(info, UMFPACK_ERROR_ARGUMENT_MISSING) };
    }
    let Some(num) = (unsafe { registry::get::<Numeric<T>>(numeric, T::NUMERIC_KIND) }) else {
        return unsafe { finish(info, UMFPACK_ERROR_INVALID_NUMERIC_OBJECT) };
    };
    let n = num.factor.order();
    let b = unsafe { std::slice::from_raw_parts(b, n) };
    let x = unsafe { std::slice::from_raw_parts_mut(x, n) };
    x.copy_from_slice(b);
    if num.factor.solve(op, x).is_err() {
        return unsafe { finish(info, UMFPACK_WARNING_SINGULAR_MATRIX) };
    }

    // Refinement needs the numerical values, as in UMFPACK.
    let steps = unsafe { control_value(control, UMFPACK_IRSTEP, 2.0) }.max(0.0) as usize;
    let mut taken = 0;
    if steps > 0 && !ax.is_null() {
        let mut local = Vec::new();
        let scratch = match workspace {
            Some(w) => w,
            None => {
                local.resize(n, T::zero());
                &mut local[..]
            }
        };
        match num.factor.refine(op, b, x, steps, scratch) {
            Ok(t) => taken = t,
            Err(_) => return unsafe { finish(info, UMFPACK_WARNING_SINGULAR_MATRIX) },
        }
    }
    unsafe { set_info(info, UMFPACK_IR_TAKEN, taken as f64) };
    unsafe { finish(info, UMFPACK_OK) }
}

unsafe fn run_get_lunz<T: Scalar + Kinds>(
    lnz: *mut c_int,
    unz: *mut c_int,
    n_row: *mut c_int,
    n_col: *mut c_int,
    nz_udiag: *mut c_int,
    numeric: *mut c_void,
) -> c_int {
    let Some(num) = (unsafe { registry::get::<Numeric<T>>(numeric, T::NUMERIC_KIND) }) else {
        return UMFPACK_ERROR_INVALID_NUMERIC_OBJECT;
    };
    if lnz.is_null() || unz.is_null() || n_row.is_null() || n_col.is_null() || nz_udiag.is_null() {
        return UMFPACK_ERROR_ARGUMENT_MISSING;
    }
    let n = num.factor.order();
    let Some((l, u, _)) = num.dense_factors() else {
        return UMFPACK_ERROR_INTERNAL_ERROR;
    };
    let count = |m: &DMatrix<T>| m.iter().filter(|v| !v.is_zero()).count();
    let diagonal = (0..n).filter(|&i| !u[(i, i)].is_zero()).count();
    unsafe {
        *lnz = count(l) as c_int;
        *unz = count(u) as c_int;
        *n_row = n as c_int;
        *n_col = n as c_int;
        *nz_udiag = diagonal as c_int;
    }
    UMFPACK_OK
}

#[allow(clippy::too_many_arguments)]
unsafe fn run_get_numeric<T: Scalar + Kinds>(
    lp: *mut c_int,
    lj: *mut c_int,
    lx: *mut T,
    up: *mut c_int,
    ui: *mut c_int,
    ux: *mut T,
    p: *mut c_int,
    q: *mut c_int,
    dx: *mut T,
    do_recip: *mut c_int,
    rs: *mut f64,
    numeric: *mut c_void,
) -> c_int {
    let Some(num) = (unsafe { registry::get::<Numeric<T>>(numeric, T::NUMERIC_KIND) }) else {
        return UMFPACK_ERROR_INVALID_NUMERIC_OBJECT;
    };
    let n = num.factor.order();
    let Some((l, u, perm)) = num.dense_factors() else {
        return UMFPACK_ERROR_INTERNAL_ERROR;
    };

    // L by rows
    if !lp.is_null() && !lj.is_null() && !lx.is_null() {
        let mut k = 0usize;
        for i in 0..n {
            unsafe { *lp.add(i) = k as c_int };
            for j in 0..=i {
                let v = l[(i, j)];
                if !v.is_zero() {
                    unsafe {
                        *lj.add(k) = j as c_int;
                        *lx.add(k) = v;
                    }
                    k += 1;
                }
            }
        }
        unsafe { *lp.add(n) = k as c_int };
    }

    // U by columns
    if !up.is_null() && !ui.is_null() && !ux.is_null() {
        let mut k = 0usize;
        for j in 0..n {
            unsafe { *up.add(j) = k as c_int };
            for i in 0..=j {
                let v = u[(i, j)];
                if !v.is_zero() {
                    unsafe {
                        *ui.add(k) = i as c_int;
                        *ux.add(k) = v;
                    }
                    k += 1;
                }
            }
        }
        unsafe { *up.add(n) = k as c_int };
    }

    for i in 0..n {
        unsafe {
            if !p.is_null() {
                *p.add(i) = perm[i] as c_int;
            }
            if !q.is_null() {
                *q.add(i) = i as c_int;
            }
            if !dx.is_null() {
                *dx.add(i) = u[(i, i)];
            }
            if !rs.is_null() {
                *rs.add(i) = 1.0;
            }
        }
    }
    if !do_recip.is_null() {
        unsafe { *do_recip = 0 };
    }
    UMFPACK_OK
}

/// Registry tags per element type.
trait Kinds {
    const SYMBOLIC_KIND: &'static str;
    const NUMERIC_KIND: &'static str;
}

impl Kinds for f64 {
    const SYMBOLIC_KIND: &'static str = "umfpack_di_symbolic";
    const NUMERIC_KIND: &'static str = "umfpack_di_numeric";
}

impl Kinds for Complex64 {
    const SYMBOLIC_KIND: &'static str = "umfpack_zi_symbolic";
    const NUMERIC_KIND: &'static str = "umfpack_zi_numeric";
}

macro_rules! entry_points {
    ($prefix:ident, $t:ty) => {
        pub mod $prefix {
            use super::*;

            /// Fill `control[UMFPACK_CONTROL]` with default parameters.
            ///
            /// # Safety
            ///
            /// `control` must be null or point to `UMFPACK_CONTROL` doubles.
            pub unsafe extern "C" fn defaults(control: *mut f64) {
                registry::guard((), || unsafe { run_defaults(control) })
            }

            /// Analyze the pattern (and optionally values) of an `n_row x n_col` matrix.
            ///
            /// # Safety
            ///
            /// Arrays must match the compressed-column layout of the given size.
            #[allow(clippy::too_many_arguments)]
            pub unsafe extern "C" fn symbolic(
                n_row: c_int,
                n_col: c_int,
                ap: *const c_int,
                ai: *const c_int,
                ax: *const f64,
                symbolic: *mut *mut c_void,
                control: *const f64,
                info: *mut f64,
            ) -> c_int {
                registry::guard(UMFPACK_ERROR_INTERNAL_ERROR, || unsafe {
                    run_symbolic::<$t>(n_row, n_col, ap, ai, ax.cast(), symbolic, control, info)
                })
            }

            /// Numeric factorization reusing a symbolic analysis.
            ///
            /// # Safety
            ///
            /// Arrays must have the pattern the analysis was built from.
            pub unsafe extern "C" fn numeric(
                ap: *const c_int,
                ai: *const c_int,
                ax: *const f64,
                symbolic: *mut c_void,
                numeric: *mut *mut c_void,
                _control: *const f64,
                info: *mut f64,
            ) -> c_int {
                registry::guard(UMFPACK_ERROR_INTERNAL_ERROR, || unsafe {
                    run_numeric::<$t>(ap, ai, ax.cast(), symbolic, numeric, info)
                })
            }

            /// Solve one system with a freshly allocated workspace.
            ///
            /// # Safety
            ///
            /// `x` and `b` must hold `n` values.
            #[allow(clippy::too_many_arguments)]
            pub unsafe extern "C" fn solve(
                sys: c_int,
                _ap: *const c_int,
                _ai: *const c_int,
                ax: *const f64,
                x: *mut f64,
                b: *const f64,
                numeric: *mut c_void,
                control: *const f64,
                info: *mut f64,
            ) -> c_int {
                registry::guard(UMFPACK_ERROR_INTERNAL_ERROR, || unsafe {
                    run_solve::<$t>(
                        sys,
                        ax.cast(),
                        x.cast(),
                        b.cast(),
                        numeric,
                        control,
                        info,
                        None,
                    )
                })
            }

            /// Solve one system using caller-provided workspace.
            ///
            /// `wi` holds `n` ints and `w` holds `5n` values; both can be reused
            /// across calls. Only `w` is used by this engine.
            ///
            /// # Safety
            ///
            /// `x` and `b` must hold `n` values; workspace must be sized as above.
            #[allow(clippy::too_many_arguments)]
            pub unsafe extern "C" fn wsolve(
                sys: c_int,
                _ap: *const c_int,
                _ai: *const c_int,
                ax: *const f64,
                x: *mut f64,
                b: *const f64,
                numeric: *mut c_void,
                control: *const f64,
                info: *mut f64,
                wi: *mut c_int,
                w: *mut f64,
            ) -> c_int {
                registry::guard(UMFPACK_ERROR_INTERNAL_ERROR, || unsafe {
                    if wi.is_null() || w.is_null() {
                        return finish(info, UMFPACK_ERROR_ARGUMENT_MISSING);
                    }
                    let Some(num) = registry::get::<Numeric<$t>>(numeric, <$t>::NUMERIC_KIND)
                    else {
                        return finish(info, UMFPACK_ERROR_INVALID_NUMERIC_OBJECT);
                    };
                    let n = num.factor.order();
                    let workspace = std::slice::from_raw_parts_mut(w.cast::<$t>(), 5 * n);
                    run_solve::<$t>(
                        sys,
                        ax.cast(),
                        x.cast(),
                        b.cast(),
                        numeric,
                        control,
                        info,
                        Some(workspace),
                    )
                })
            }

            /// Free a symbolic analysis and null the handle.
            ///
            /// # Safety
            ///
            /// `symbolic` must be null or point to a handle slot.
            pub unsafe extern "C" fn free_symbolic(symbolic: *mut *mut c_void) {
                registry::guard((), || unsafe {
                    if !symbolic.is_null() {
                        registry::free::<Symbolic>(*symbolic, <$t>::SYMBOLIC_KIND);
                        *symbolic = std::ptr::null_mut();
                    }
                })
            }

            /// Free a numeric factorization and null the handle.
            ///
            /// # Safety
            ///
            /// `numeric` must be null or point to a handle slot.
            pub unsafe extern "C" fn free_numeric(numeric: *mut *mut c_void) {
                registry::guard((), || unsafe {
                    if !numeric.is_null() {
                        registry::free::<Numeric<$t>>(*numeric, <$t>::NUMERIC_KIND);
                        *numeric = std::ptr::null_mut();
                    }
                })
            }

            /// Sizes of the factors.
            ///
            /// # Safety
            ///
            /// All outputs must be valid int pointers.
            pub unsafe extern "C" fn get_lunz(
                lnz: *mut c_int,
                unz: *mut c_int,
                n_row: *mut c_int,
                n_col: *mut c_int,
                nz_udiag: *mut c_int,
                numeric: *mut c_void,
            ) -> c_int {
                registry::guard(UMFPACK_ERROR_INTERNAL_ERROR, || unsafe {
                    run_get_lunz::<$t>(lnz, unz, n_row, n_col, nz_udiag, numeric)
                })
            }

            /// Copy out `P R A Q = L U`: L by rows, U by columns, permutations,
            /// the diagonal of U and the row scale factors.
            ///
            /// Any output may be null to skip it.
            ///
            /// # Safety
            ///
            /// Non-null outputs must be sized from `get_lunz`.
            #[allow(clippy::too_many_arguments)]
            pub unsafe extern "C" fn get_numeric(
                lp: *mut c_int,
                lj: *mut c_int,
                lx: *mut f64,
                up: *mut c_int,
                ui: *mut c_int,
                ux: *mut f64,
                p: *mut c_int,
                q: *mut c_int,
                dx: *mut f64,
                do_recip: *mut c_int,
                rs: *mut f64,
                numeric: *mut c_void,
            ) -> c_int {
                registry::guard(UMFPACK_ERROR_INTERNAL_ERROR, || unsafe {
                    run_get_numeric::<$t>(
                        lp,
                        lj,
                        lx.cast(),
                        up,
                        ui,
                        ux.cast(),
                        p,
                        q,
                        dx.cast(),
                        do_recip,
                        rs,
                        numeric,
                    )
                })
            }
        }
    };
}

entry_points!(di, f64);
entry_points!(zi, Complex64);
