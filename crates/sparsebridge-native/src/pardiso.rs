//! PARDISO calling convention.
//!
//! A single entry point drives every phase through an integer code: 11
//! analysis, 22 numeric factorization, 33 solve, combined phases 12, 13 and
//! 23, 0 to release the numeric factor and -1 to release everything. Matrices
//! are compressed-sparse-row; symmetric types store the upper triangle only.
//! Internal state lives behind the 64-slot `pt` array, which the caller
//! zeroes with `pardisoinit` and must not touch afterwards.
//!
//! The library keeps process-wide state, so callers must serialize calls.

use crate::engine::{CscParts, EngineError, Factor, Op, Scalar};
use crate::registry;
use faer::Side;
use faer::sparse::linalg::solvers::{SymbolicLlt, SymbolicLu};
use num_complex::Complex64;
use std::ffi::c_void;
use std::os::raw::c_int;

/// Length of `pt` and `iparm`.
pub const PARDISO_SLOTS: usize = 64;

// Matrix types
pub const MTYPE_REAL_STRUCTURALLY_SYMMETRIC: c_int = 1;
pub const MTYPE_REAL_SPD: c_int = 2;
pub const MTYPE_REAL_SYMMETRIC_INDEFINITE: c_int = -2;
pub const MTYPE_COMPLEX_STRUCTURALLY_SYMMETRIC: c_int = 3;
pub const MTYPE_COMPLEX_HPD: c_int = 4;
pub const MTYPE_COMPLEX_HERMITIAN_INDEFINITE: c_int = -4;
pub const MTYPE_COMPLEX_SYMMETRIC: c_int = 6;
pub const MTYPE_REAL_UNSYMMETRIC: c_int = 11;
pub const MTYPE_COMPLEX_UNSYMMETRIC: c_int = 13;

// Phases
pub const PHASE_ANALYSIS: c_int = 11;
pub const PHASE_ANALYSIS_NUMERIC: c_int = 12;
pub const PHASE_ANALYSIS_NUMERIC_SOLVE: c_int = 13;
pub const PHASE_NUMERIC: c_int = 22;
pub const PHASE_NUMERIC_SOLVE: c_int = 23;
pub const PHASE_SOLVE: c_int = 33;
pub const PHASE_RELEASE_NUMERIC: c_int = 0;
pub const PHASE_RELEASE_ALL: c_int = -1;

// Error codes
pub const PARDISO_OK: c_int = 0;
pub const PARDISO_INPUT_INCONSISTENT: c_int = -1;
pub const PARDISO_NOT_ENOUGH_MEMORY: c_int = -2;
pub const PARDISO_REORDERING_PROBLEM: c_int = -3;
pub const PARDISO_ZERO_PIVOT: c_int = -4;
pub const PARDISO_INTERNAL_ERROR: c_int = -5;

// iparm indices (zero-based)
pub const IPARM_USER_DEFAULTS: usize = 0;
pub const IPARM_ORDERING: usize = 1;
pub const IPARM_WRITE_SOLUTION_TO_B: usize = 5;
pub const IPARM_REFINEMENT_TAKEN: usize = 6;
pub const IPARM_REFINEMENT_STEPS: usize = 7;
pub const IPARM_PIVOT_PERTURBATION: usize = 9;
pub const IPARM_SCALING: usize = 10;
/// 0 solves `A x = b`, 1 the conjugate transpose, 2 the transpose.
pub const IPARM_TRANSPOSE: usize = 11;
pub const IPARM_MATCHING: usize = 12;
pub const IPARM_FACTOR_NNZ: usize = 17;
/// 0 for one-based indexing (the default), 1 for zero-based.
pub const IPARM_ZERO_BASED: usize = 34;

pub const SOLVE_NORMAL: c_int = 0;
pub const SOLVE_CONJUGATE_TRANSPOSE: c_int = 1;
pub const SOLVE_TRANSPOSE: c_int = 2;

const REAL_KIND: &str = "pardiso_real";
const COMPLEX_KIND: &str = "pardiso_complex";

fn is_real(mtype: c_int) -> Option<bool> {
    match mtype {
        1 | 2 | -2 | 11 => Some(true),
        3 | 4 | -4 | 6 | 13 => Some(false),
        _ => None,
    }
}

/// Types stored as one triangle.
fn is_symmetric(mtype: c_int) -> bool {
    matches!(mtype, 2 | -2 | 4 | -4 | 6)
}

fn is_definite(mtype: c_int) -> bool {
    matches!(mtype, 2 | 4)
}

enum Analysis {
    Lu(SymbolicLu<usize>),
    Llt(SymbolicLlt<usize>),
}

struct Session<T: Scalar> {
    mtype: c_int,
    n: usize,
    column_pointers: Vec<usize>,
    row_indices: Vec<usize>,
    analysis: Analysis,
    factor: Option<Factor<T>>,
}

trait Kind {
    const KIND: &'static str;
}

impl Kind for f64 {
    const KIND: &'static str = REAL_KIND;
}

impl Kind for Complex64 {
    const KIND: &'static str = COMPLEX_KIND;
}

struct Call<'a> {
    mtype: c_int,
    phase: c_int,
    n: usize,
    a: *const c_void,
    ia: *const c_int,
    ja: *const c_int,
    nrhs: usize,
    iparm: &'a mut [c_int],
    verbose: bool,
    b: *mut c_void,
    x: *mut c_void,
}

impl Call<'_> {
    fn base(&self) -> c_int {
        if self.iparm[IPARM_ZERO_BASED] != 0 { 0 } else { 1 }
    }

    /// The matrix the caller described, as a full compressed-column matrix.
    ///
    /// Reading CSR arrays as CSC yields the transpose, so the rows are
    /// turned back afterwards. Symmetric types expand their stored triangle.
    unsafe fn matrix<T: Scalar>(&self) -> Option<CscParts<T>> {
        let stored = unsafe {
            CscParts::<T>::from_raw(
                self.n,
                self.n,
                self.ia,
                self.ja,
                self.a.cast::<T>(),
                self.base(),
            )
        }?;
        // Upper triangle of the CSR matrix is the lower triangle of its transpose.
        let transposed = if is_symmetric(self.mtype) {
            stored.expand_triangle(false, matches!(self.mtype, 4 | -4))
        } else {
            stored
        };
        Some(transposed.transpose())
    }
}

unsafe fn analyze<T: Scalar + Kind>(call: &Call<'_>, slot: &mut *mut c_void) -> c_int {
    unsafe { release(slot) };
    let Some(matrix) = (unsafe { call.matrix::<T>() }) else {
        return PARDISO_INPUT_INCONSISTENT;
    };
    let analysis = if is_definite(call.mtype) {
        T::analyze_llt(&matrix, Side::Lower).map(Analysis::Llt)
    } else {
        T::analyze_lu(&matrix).map(Analysis::Lu)
    };
    let Some(analysis) = analysis else {
        return PARDISO_REORDERING_PROBLEM;
    };
    if call.verbose {
        log::info!("pardiso analysis: mtype={} n={} nnz={}", call.mtype, call.n, matrix.nnz());
    }
    let session = Session::<T> {
        mtype: call.mtype,
        n: call.n,
        column_pointers: matrix.column_pointers,
        row_indices: matrix.row_indices,
        analysis,
        factor: None,
    };
    *slot = registry::register(T::KIND, session);
    PARDISO_OK
}

unsafe fn factor<T: Scalar + Kind>(call: &mut Call<'_>, slot: *mut c_void) -> c_int {
    let Some(session) = (unsafe { registry::get::<Session<T>>(slot, T::KIND) }) else {
        return PARDISO_INPUT_INCONSISTENT;
    };
    if session.mtype != call.mtype || session.n != call.n {
        return PARDISO_INPUT_INCONSISTENT;
    }
    let Some(matrix) = (unsafe { call.matrix::<T>() }) else {
        return PARDISO_INPUT_INCONSISTENT;
    };
    if matrix.column_pointers != session.column_pointers
        || matrix.row_indices != session.row_indices
    {
        return PARDISO_INPUT_INCONSISTENT;
    }
    session.factor = None;
    let nnz = matrix.nnz();
    let result = match &session.analysis {
        Analysis::Lu(symbolic) => Factor::lu(symbolic, matrix),
        Analysis::Llt(symbolic) => Factor::llt(symbolic, matrix),
    };
    match result {
        Ok(factor) => {
            session.factor = Some(factor);
            call.iparm[IPARM_FACTOR_NNZ] = nnz as c_int;
            PARDISO_OK
        }
        Err(EngineError::Structure) => PARDISO_INPUT_INCONSISTENT,
        Err(_) => PARDISO_ZERO_PIVOT,
    }
}

unsafe fn solve<T: Scalar + Kind>(call: &mut Call<'_>, slot: *mut c_void) -> c_int {
    let Some(session) = (unsafe { registry::get::<Session<T>>(slot, T::KIND) }) else {
        return PARDISO_INPUT_INCONSISTENT;
    };
    let n = session.n;
    let Some(factor) = session.factor.as_mut() else {
        return PARDISO_INPUT_INCONSISTENT;
    };
    let op = match call.iparm[IPARM_TRANSPOSE] {
        SOLVE_NORMAL => Op::Normal,
        SOLVE_CONJUGATE_TRANSPOSE => Op::ConjugateTranspose,
        SOLVE_TRANSPOSE => Op::Transpose,
        _ => return PARDISO_INPUT_INCONSISTENT,
    };
    let in_place = call.iparm[IPARM_WRITE_SOLUTION_TO_B] == 1;
    if call.b.is_null() || (!in_place && call.x.is_null()) {
        return PARDISO_INPUT_INCONSISTENT;
    }
    let steps = call.iparm[IPARM_REFINEMENT_STEPS].max(0) as usize;
    let b = call.b.cast::<T>();
    let x = if in_place { b } else { call.x.cast::<T>() };
    let mut rhs = vec![T::zero(); n];
    let mut solution = vec![T::zero(); n];
    let mut scratch = vec![T::zero(); n];
    let mut taken = 0;
    for j in 0..call.nrhs {
        for i in 0..n {
            rhs[i] = unsafe { *b.add(j * n + i) };
        }
        solution.copy_from_slice(&rhs);
        if factor.solve(op, &mut solution).is_err() {
            return PARDISO_ZERO_PIVOT;
        }
        if steps > 0 {
            match factor.refine(op, &rhs, &mut solution, steps, &mut scratch) {
                Ok(done) => taken = taken.max(done),
                Err(_) => return PARDISO_ZERO_PIVOT,
            }
        }
        for i in 0..n {
            unsafe { *x.add(j * n + i) = solution[i] };
        }
    }
    call.iparm[IPARM_REFINEMENT_TAKEN] = taken as c_int;
    PARDISO_OK
}

unsafe fn release_numeric(slot: *mut c_void) {
    unsafe {
        if let Some(session) = registry::get::<Session<f64>>(slot, REAL_KIND) {
            session.factor = None;
        } else if let Some(session) = registry::get::<Session<Complex64>>(slot, COMPLEX_KIND) {
            session.factor = None;
        }
    }
}

unsafe fn release(slot: &mut *mut c_void) {
    let ptr = *slot;
    *slot = std::ptr::null_mut();
    if ptr.is_null() {
        return;
    }
    unsafe {
        match registry::kind_of(ptr) {
            Some(REAL_KIND) => {
                registry::free::<Session<f64>>(ptr, REAL_KIND);
            }
            Some(COMPLEX_KIND) => {
                registry::free::<Session<Complex64>>(ptr, COMPLEX_KIND);
            }
            _ => registry::reject_free(ptr),
        }
    }
}

unsafe fn run_phases<T: Scalar + Kind>(call: &mut Call<'_>, slot: &mut *mut c_void) -> c_int {
    let (analysis, numeric, solving) = match call.phase {
        PHASE_ANALYSIS => (true, false, false),
        PHASE_ANALYSIS_NUMERIC => (true, true, false),
        PHASE_ANALYSIS_NUMERIC_SOLVE => (true, true, true),
        PHASE_NUMERIC => (false, true, false),
        PHASE_NUMERIC_SOLVE => (false, true, true),
        PHASE_SOLVE => (false, false, true),
        _ => return PARDISO_INPUT_INCONSISTENT,
    };
    if analysis {
        let status = unsafe { analyze::<T>(call, slot) };
        if status != PARDISO_OK {
            return status;
        }
    }
    if numeric {
        let status = unsafe { factor::<T>(call, *slot) };
        if status != PARDISO_OK {
            return status;
        }
    }
    if solving {
        return unsafe { solve::<T>(call, *slot) };
    }
    PARDISO_OK
}

/// Zero `pt` and fill `iparm` with defaults for `mtype`.
///
/// # Safety
///
/// `pt` and `iparm` must each hold 64 entries.
pub unsafe extern "C" fn pardisoinit(pt: *mut *mut c_void, mtype: *const c_int, iparm: *mut c_int) {
    registry::guard((), || unsafe {
        if pt.is_null() || iparm.is_null() || mtype.is_null() {
            return;
        }
        std::slice::from_raw_parts_mut(pt, PARDISO_SLOTS).fill(std::ptr::null_mut());
        let iparm = std::slice::from_raw_parts_mut(iparm, PARDISO_SLOTS);
        iparm.fill(0);
        let symmetric = is_symmetric(*mtype);
        iparm[IPARM_USER_DEFAULTS] = 1;
        iparm[IPARM_ORDERING] = 2;
        iparm[IPARM_REFINEMENT_STEPS] = 2;
        iparm[IPARM_PIVOT_PERTURBATION] = if symmetric { 8 } else { 13 };
        iparm[IPARM_SCALING] = if symmetric { 0 } else { 1 };
        iparm[IPARM_MATCHING] = if symmetric { 0 } else { 1 };
        iparm[IPARM_FACTOR_NNZ] = -1;
    })
}

/// Run one phase (or a combined phase) of the direct solver.
///
/// `a`, `b` and `x` point to `f64` or interleaved complex values depending
/// on `mtype`. The status is written to `error`.
///
/// # Safety
///
/// `pt` must have been initialized by [`pardisoinit`]; arrays must match
/// the compressed-row layout of an `n x n` matrix and `b`/`x` must hold
/// `n * nrhs` values.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn pardiso(
    pt: *mut *mut c_void,
    maxfct: *const c_int,
    mnum: *const c_int,
    mtype: *const c_int,
    phase: *const c_int,
    n: *const c_int,
    a: *const c_void,
    ia: *const c_int,
    ja: *const c_int,
    _perm: *mut c_int,
    nrhs: *const c_int,
    iparm: *mut c_int,
    msglvl: *const c_int,
    b: *mut c_void,
    x: *mut c_void,
    error: *mut c_int,
) {
    registry::guard((), || unsafe {
        let status = run(
            pt, maxfct, mnum, mtype, phase, n, a, ia, ja, nrhs, iparm, msglvl, b, x,
        );
        if let Some(error) = error.as_mut() {
            *error = status;
        }
    })
}

#[allow(clippy::too_many_arguments)]
unsafe fn run(
    pt: *mut *mut c_void,
    maxfct: *const c_int,
    mnum: *const c_int,
    mtype: *const c_int,
    phase: *const c_int,
    n: *const c_int,
    a: *const c_void,
    ia: *const c_int,
    ja: *const c_int,
    nrhs: *const c_int,
    iparm: *mut c_int,
    msglvl: *const c_int,
    b: *mut c_void,
    x: *mut c_void,
) -> c_int {
    if [maxfct, mnum, mtype, phase, n, nrhs, msglvl].iter().any(|p| p.is_null())
        || pt.is_null()
        || iparm.is_null()
    {
        return PARDISO_INPUT_INCONSISTENT;
    }
    let (maxfct, mnum, mtype, phase, n, nrhs, msglvl) =
        unsafe { (*maxfct, *mnum, *mtype, *phase, *n, *nrhs, *msglvl) };
    let slot = unsafe { &mut *pt };

    match phase {
        PHASE_RELEASE_ALL => {
            unsafe { release(slot) };
            return PARDISO_OK;
        }
        PHASE_RELEASE_NUMERIC => {
            unsafe { release_numeric(*slot) };
            return PARDISO_OK;
        }
        _ => {}
    }
    if maxfct != 1 || mnum != 1 || n <= 0 || nrhs < 0 {
        return PARDISO_INPUT_INCONSISTENT;
    }
    let Some(real) = is_real(mtype) else {
        return PARDISO_INPUT_INCONSISTENT;
    };
    let mut call = Call {
        mtype,
        phase,
        n: n as usize,
        a,
        ia,
        ja,
        nrhs: nrhs as usize,
        iparm: unsafe { std::slice::from_raw_parts_mut(iparm, PARDISO_SLOTS) },
        verbose: msglvl > 0,
        b,
        x,
    };
    if real {
        unsafe { run_phases::<f64>(&mut call, slot) }
    } else {
        unsafe { run_phases::<Complex64>(&mut call, slot) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Solver {
        pt: [*mut c_void; PARDISO_SLOTS],
        iparm: [c_int; PARDISO_SLOTS],
        mtype: c_int,
    }

    impl Solver {
        fn new(mtype: c_int) -> Self {
            let mut solver = Solver {
                pt: [std::ptr::null_mut(); PARDISO_SLOTS],
                iparm: [0; PARDISO_SLOTS],
                mtype,
            };
            unsafe { pardisoinit(solver.pt.as_mut_ptr(), &mtype, solver.iparm.as_mut_ptr()) };
            solver.iparm[IPARM_ZERO_BASED] = 1;
            solver
        }

        fn call<T>(
            &mut self,
            phase: c_int,
            ia: &[c_int],
            ja: &[c_int],
            a: &[T],
            b: &mut [T],
            x: &mut [T],
        ) -> c_int {
            let n = (ia.len() - 1) as c_int;
            let one = 1;
            let zero = 0;
            let mut error = 99;
            unsafe {
                pardiso(
                    self.pt.as_mut_ptr(),
                    &one,
                    &one,
                    &self.mtype,
                    &phase,
                    &n,
                    a.as_ptr().cast(),
                    ia.as_ptr(),
                    ja.as_ptr(),
                    std::ptr::null_mut(),
                    &one,
                    self.iparm.as_mut_ptr(),
                    &zero,
                    b.as_mut_ptr().cast(),
                    x.as_mut_ptr().cast(),
                    &mut error,
                );
            }
            error
        }
    }

    // CSR of [[4, 1, 0], [2, 5, 1], [0, 3, 6]].
    const IA: [c_int; 4] = [0, 2, 5, 7];
    const JA: [c_int; 7] = [0, 1, 0, 1, 2, 1, 2];
    const A: [f64; 7] = [4.0, 1.0, 2.0, 5.0, 1.0, 3.0, 6.0];

    #[test]
    fn test_init_defaults() {
        let solver = Solver::new(MTYPE_REAL_UNSYMMETRIC);
        assert_eq!(solver.iparm[IPARM_USER_DEFAULTS], 1);
        assert_eq!(solver.iparm[IPARM_REFINEMENT_STEPS], 2);
        assert_eq!(solver.iparm[IPARM_PIVOT_PERTURBATION], 13);
        assert!(solver.pt.iter().all(|p| p.is_null()));
    }

    #[test]
    fn test_phases_solve_csr_system() {
        let mut solver = Solver::new(MTYPE_REAL_UNSYMMETRIC);
        let mut b = [5.0, 8.0, 9.0];
        let mut x = [0.0; 3];
        assert_eq!(solver.call(PHASE_ANALYSIS, &IA, &JA, &A, &mut b, &mut x), 0);
        assert_eq!(solver.call(PHASE_NUMERIC, &IA, &JA, &A, &mut b, &mut x), 0);
        assert_eq!(solver.call(PHASE_SOLVE, &IA, &JA, &A, &mut b, &mut x), 0);
        for v in x {
            assert!((v - 1.0).abs() < 1e-12, "{:?}", x);
        }

        // Transposed system: Aᵀ ones = [6, 9, 7].
        solver.iparm[IPARM_TRANSPOSE] = SOLVE_TRANSPOSE;
        let mut b = [6.0, 9.0, 7.0];
        assert_eq!(solver.call(PHASE_SOLVE, &IA, &JA, &A, &mut b, &mut x), 0);
        for v in x {
            assert!((v - 1.0).abs() < 1e-12, "{:?}", x);
        }

        assert_eq!(solver.call(PHASE_RELEASE_ALL, &IA, &JA, &A, &mut b, &mut x), 0);
        assert!(solver.pt[0].is_null());
    }

    #[test]
    fn test_symmetric_upper_triangle() {
        // Upper triangle of [[4, -1, 0], [-1, 4, -1], [0, -1, 4]].
        let ia = [0, 2, 4, 5];
        let ja = [0, 1, 1, 2, 2];
        let a = [4.0, -1.0, 4.0, -1.0, 4.0];
        let mut solver = Solver::new(MTYPE_REAL_SPD);
        let mut b = [3.0, 2.0, 3.0];
        let mut x = [0.0f64; 3];
        assert_eq!(
            solver.call(PHASE_ANALYSIS_NUMERIC_SOLVE, &ia, &ja, &a, &mut b, &mut x),
            0
        );
        for v in x {
            assert!((v - 1.0).abs() < 1e-12, "{:?}", x);
        }
        solver.call(PHASE_RELEASE_ALL, &ia, &ja, &a, &mut b, &mut x);
    }

    #[test]
    fn test_zero_pivot() {
        let ia = [0, 2, 4];
        let ja = [0, 1, 0, 1];
        let a = [1.0, 2.0, 2.0, 4.0];
        let mut solver = Solver::new(MTYPE_REAL_UNSYMMETRIC);
        let mut b = [0.0; 2];
        let mut x = [0.0; 2];
        assert_eq!(solver.call(PHASE_ANALYSIS, &ia, &ja, &a, &mut b, &mut x), 0);
        assert_eq!(
            solver.call(PHASE_NUMERIC, &ia, &ja, &a, &mut b, &mut x),
            PARDISO_ZERO_PIVOT
        );
        solver.call(PHASE_RELEASE_ALL, &ia, &ja, &a, &mut b, &mut x);
    }

    #[test]
    fn test_solve_before_factor_is_rejected() {
        let mut solver = Solver::new(MTYPE_REAL_UNSYMMETRIC);
        let mut b = [5.0, 8.0, 9.0];
        let mut x = [0.0; 3];
        assert_eq!(solver.call(PHASE_ANALYSIS, &IA, &JA, &A, &mut b, &mut x), 0);
        assert_eq!(
            solver.call(PHASE_SOLVE, &IA, &JA, &A, &mut b, &mut x),
            PARDISO_INPUT_INCONSISTENT
        );
        solver.call(PHASE_RELEASE_ALL, &IA, &JA, &A, &mut b, &mut x);
    }

    #[test]
    fn test_complex_conjugate_transpose() {
        // CSR of [[2+i, 1], [0, 3]].
        let ia = [0, 2, 3];
        let ja = [0, 1, 1];
        let a = [
            Complex64::new(2.0, 1.0),
            Complex64::new(1.0, 0.0),
            Complex64::new(3.0, 0.0),
        ];
        let expected = [Complex64::new(0.0, 1.0), Complex64::new(1.0, 0.0)];
        // Aᴴ expected
        let mut b = [
            a[0].conj() * expected[0],
            a[1].conj() * expected[0] + a[2].conj() * expected[1],
        ];
        let mut x = [Complex64::new(0.0, 0.0); 2];
        let mut solver = Solver::new(MTYPE_COMPLEX_UNSYMMETRIC);
        solver.iparm[IPARM_TRANSPOSE] = SOLVE_CONJUGATE_TRANSPOSE;
        assert_eq!(
            solver.call(PHASE_ANALYSIS_NUMERIC_SOLVE, &ia, &ja, &a, &mut b, &mut x),
            0
        );
        for k in 0..2 {
            assert!((x[k] - expected[k]).norm() < 1e-12);
        }
        solver.call(PHASE_RELEASE_ALL, &ia, &ja, &a, &mut b, &mut x);
    }

    #[test]
    fn test_release_all_twice_is_harmless() {
        registry::reset_thread_stats();
        let mut solver = Solver::new(MTYPE_REAL_UNSYMMETRIC);
        let mut b = [5.0, 8.0, 9.0];
        let mut x = [0.0; 3];
        solver.call(PHASE_ANALYSIS_NUMERIC, &IA, &JA, &A, &mut b, &mut x);
        assert_eq!(solver.call(PHASE_RELEASE_ALL, &IA, &JA, &A, &mut b, &mut x), 0);
        assert_eq!(solver.call(PHASE_RELEASE_ALL, &IA, &JA, &A, &mut b, &mut x), 0);
        let stats = registry::thread_stats();
        assert_eq!(stats.freed, 1);
        assert_eq!(stats.invalid_frees, 0);
    }
}
