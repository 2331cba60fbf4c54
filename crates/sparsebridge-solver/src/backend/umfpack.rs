//! UMFPACK adapter (unsymmetric multifrontal LU).
//!
//! Separate symbolic and numeric phases; values-only refactorization reuses
//! the symbolic object. UMFPACK solves one right-hand side per call, so
//! several columns are solved in a loop through `wsolve` with one pinned
//! workspace shared by every column.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::Arc;

use num_complex::Complex64;
use sparsebridge_core::{
    BackendKind, ContextState, CscMatrix, Element, Error, NativeDense, NativeDenseMut, NativeHandle,
    NativeMatrix, PinLedger, PinnedBuffers, Result,
};
use sparsebridge_native::umfpack::{
    self, UMFPACK_A, UMFPACK_AAT, UMFPACK_AT, UMFPACK_CONTROL, UMFPACK_ERROR_OUT_OF_MEMORY,
    UMFPACK_INFO, UMFPACK_IRSTEP, UMFPACK_OK, UMFPACK_ORDERING, UMFPACK_ORDERING_AMD,
    UMFPACK_ORDERING_BEST, UMFPACK_ORDERING_CHOLMOD, UMFPACK_ORDERING_METIS,
    UMFPACK_ORDERING_NONE, UMFPACK_PIVOT_TOLERANCE, UMFPACK_STRATEGY, UMFPACK_STRATEGY_SYMMETRIC,
};

use crate::context::{
    DirectBackend, SolverContext, SystemKind, require_full_storage, require_square,
};
use crate::options::{DirectOptions, Ordering};

/// Native entry points for one element type.
pub struct UmfpackEntry {
    defaults: unsafe extern "C" fn(*mut f64),
    symbolic: unsafe extern "C" fn(
        c_int,
        c_int,
        *const c_int,
        *const c_int,
        *const f64,
        *mut *mut c_void,
        *const f64,
        *mut f64,
    ) -> c_int,
    numeric: unsafe extern "C" fn(
        *const c_int,
        *const c_int,
        *const f64,
        *mut c_void,
        *mut *mut c_void,
        *const f64,
        *mut f64,
    ) -> c_int,
    wsolve: unsafe extern "C" fn(
        c_int,
        *const c_int,
        *const c_int,
        *const f64,
        *mut f64,
        *const f64,
        *mut c_void,
        *const f64,
        *mut f64,
        *mut c_int,
        *mut f64,
    ) -> c_int,
    free_symbolic: unsafe extern "C" fn(*mut *mut c_void),
    free_numeric: unsafe extern "C" fn(*mut *mut c_void),
    get_lunz: unsafe extern "C" fn(
        *mut c_int,
        *mut c_int,
        *mut c_int,
        *mut c_int,
        *mut c_int,
        *mut c_void,
    ) -> c_int,
    get_numeric: unsafe extern "C" fn(
        *mut c_int,
        *mut c_int,
        *mut f64,
        *mut c_int,
        *mut c_int,
        *mut f64,
        *mut c_int,
        *mut c_int,
        *mut f64,
        *mut c_int,
        *mut f64,
        *mut c_void,
    ) -> c_int,
}

/// Element types UMFPACK can factor (`di` and `zi`).
pub trait UmfpackElement: Element {
    const ENTRY: UmfpackEntry;
}

macro_rules! umfpack_element {
    ($t:ty, $prefix:ident) => {
        impl UmfpackElement for $t {
            const ENTRY: UmfpackEntry = UmfpackEntry {
                defaults: umfpack::$prefix::defaults,
                symbolic: umfpack::$prefix::symbolic,
                numeric: umfpack::$prefix::numeric,
                wsolve: umfpack::$prefix::wsolve,
                free_symbolic: umfpack::$prefix::free_symbolic,
                free_numeric: umfpack::$prefix::free_numeric,
                get_lunz: umfpack::$prefix::get_lunz,
                get_numeric: umfpack::$prefix::get_numeric,
            };
        }
    };
}

umfpack_element!(f64, di);
umfpack_element!(Complex64, zi);

unsafe fn free_symbolic<T: UmfpackElement>(slot: *mut *mut c_void, _: *mut c_void) {
    unsafe { (T::ENTRY.free_symbolic)(slot) }
}

unsafe fn free_numeric<T: UmfpackElement>(slot: *mut *mut c_void, _: *mut c_void) {
    unsafe { (T::ENTRY.free_numeric)(slot) }
}

/// LU factors `P R A Q = L U` extracted from a numeric object.
#[derive(Debug, Clone)]
pub struct LuFactors<T> {
    /// Unit lower triangular factor.
    pub l: CscMatrix<T>,
    /// Upper triangular factor.
    pub u: CscMatrix<T>,
    /// Row permutation: row `k` of `P A` is row `p[k]` of `A`.
    pub p: Vec<usize>,
    /// Column permutation: column `k` of `A Q` is column `q[k]` of `A`.
    pub q: Vec<usize>,
    /// Diagonal of `U`.
    pub d: Vec<T>,
    /// Row scale factors (`R` is `diag(r)`).
    pub r: Vec<f64>,
}

/// UMFPACK backend state.
pub struct Umfpack<T: UmfpackElement> {
    symbolic: NativeHandle,
    numeric: NativeHandle,
    control: [f64; UMFPACK_CONTROL],
    info: [f64; UMFPACK_INFO],
    options: DirectOptions,
    _element: PhantomData<T>,
}

impl<T: UmfpackElement> Umfpack<T> {
    pub fn new(options: &DirectOptions) -> Self {
        Self {
            symbolic: NativeHandle::empty("umfpack symbolic", free_symbolic::<T>),
            numeric: NativeHandle::empty("umfpack numeric", free_numeric::<T>),
            control: [0.0; UMFPACK_CONTROL],
            info: [0.0; UMFPACK_INFO],
            options: options.clone(),
            _element: PhantomData,
        }
    }

    /// Control parameters as passed to the library.
    pub fn control(&self) -> &[f64] {
        &self.control
    }

    /// Statistics from the most recent native call.
    pub fn info(&self) -> &[f64] {
        &self.info
    }

    fn factorization_error(status: c_int) -> Error {
        if status == UMFPACK_ERROR_OUT_OF_MEMORY {
            Error::ResourceExhaustion {
                backend: BackendKind::Umfpack,
                status,
            }
        } else {
            Error::Factorization {
                backend: BackendKind::Umfpack,
                status,
            }
        }
    }

    fn solve_error(status: c_int) -> Error {
        if status == UMFPACK_ERROR_OUT_OF_MEMORY {
            Error::ResourceExhaustion {
                backend: BackendKind::Umfpack,
                status,
            }
        } else {
            Error::Solve {
                backend: BackendKind::Umfpack,
                status,
            }
        }
    }

    fn system_code(system: SystemKind) -> c_int {
        match system {
            SystemKind::Normal => UMFPACK_A,
            SystemKind::Transpose => UMFPACK_AAT,
            SystemKind::ConjugateTranspose => UMFPACK_AT,
        }
    }

    /// Copy the factors out of the numeric object.
    fn extract(&self) -> Result<LuFactors<T>> {
        if !self.numeric.is_live() {
            return Err(Error::FactorsUnavailable);
        }
        let entry = T::ENTRY;
        let (mut lnz, mut unz, mut n_row, mut n_col, mut nz_udiag) = (0, 0, 0, 0, 0);
        let status = unsafe {
            (entry.get_lunz)(
                &mut lnz,
                &mut unz,
                &mut n_row,
                &mut n_col,
                &mut nz_udiag,
                self.numeric.as_ptr(),
            )
        };
        if status != UMFPACK_OK {
            return Err(Self::solve_error(status));
        }
        let n = n_row.max(0) as usize;
        let mut lp = vec![0 as c_int; n + 1];
        let mut lj = vec![0 as c_int; lnz.max(0) as usize];
        let mut lx = vec![T::zero(); lnz.max(0) as usize];
        let mut up = vec![0 as c_int; n + 1];
        let mut ui = vec![0 as c_int; unz.max(0) as usize];
        let mut ux = vec![T::zero(); unz.max(0) as usize];
        let mut p = vec![0 as c_int; n];
        let mut q = vec![0 as c_int; n];
        let mut d = vec![T::zero(); n];
        let mut r = vec![0.0f64; n];
        let mut do_recip: c_int = 0;
        let status = unsafe {
            (entry.get_numeric)(
                lp.as_mut_ptr(),
                lj.as_mut_ptr(),
                lx.as_mut_ptr().cast(),
                up.as_mut_ptr(),
                ui.as_mut_ptr(),
                ux.as_mut_ptr().cast(),
                p.as_mut_ptr(),
                q.as_mut_ptr(),
                d.as_mut_ptr().cast(),
                &mut do_recip,
                r.as_mut_ptr(),
                self.numeric.as_ptr(),
            )
        };
        if status != UMFPACK_OK {
            return Err(Self::solve_error(status));
        }

        // L comes back row-compressed.
        let mut triplets = Vec::with_capacity(lj.len());
        for row in 0..n {
            for k in lp[row] as usize..lp[row + 1] as usize {
                triplets.push((row, lj[k] as usize, lx[k]));
            }
        }
        let l = CscMatrix::from_triplets(n, n, &triplets)?;
        let u = CscMatrix::try_new(n, n, up, ui, ux)?;
        Ok(LuFactors {
            l,
            u,
            p: p.into_iter().map(|v| v as usize).collect(),
            q: q.into_iter().map(|v| v as usize).collect(),
            d,
            r: row_multipliers(r, do_recip),
        })
    }
}

/// Converts UMFPACK's `Rs` into multipliers of the rows of `A`.
///
/// With `do_recip` set the library already hands back multipliers;
/// otherwise row `i` is divided by `Rs[i]`.
fn row_multipliers(mut rs: Vec<f64>, do_recip: c_int) -> Vec<f64> {
    if do_recip == 0 {
        for s in rs.iter_mut() {
            *s = 1.0 / *s;
        }
    }
    rs
}

impl<T: UmfpackElement> DirectBackend<T> for Umfpack<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::Umfpack
    }

    fn validate(&self, matrix: &CscMatrix<T>) -> Result<()> {
        require_square(BackendKind::Umfpack, matrix)?;
        require_full_storage(BackendKind::Umfpack, self.options.triangle)
    }

    fn initialize(&mut self) -> Result<()> {
        unsafe { (T::ENTRY.defaults)(self.control.as_mut_ptr()) };
        let ordering = match self.options.ordering {
            Ordering::Default => None,
            Ordering::Natural => Some(UMFPACK_ORDERING_NONE),
            Ordering::Amd => Some(UMFPACK_ORDERING_AMD),
            Ordering::Colamd => Some(UMFPACK_ORDERING_CHOLMOD),
            Ordering::Metis => Some(UMFPACK_ORDERING_METIS),
            Ordering::Best => Some(UMFPACK_ORDERING_BEST),
        };
        if let Some(ordering) = ordering {
            self.control[UMFPACK_ORDERING] = ordering;
        }
        if let Some(tolerance) = self.options.pivot_tolerance {
            self.control[UMFPACK_PIVOT_TOLERANCE] = tolerance;
        }
        if self.options.symmetric {
            self.control[UMFPACK_STRATEGY] = UMFPACK_STRATEGY_SYMMETRIC;
        }
        if let Some(steps) = self.options.refinement_steps {
            self.control[UMFPACK_IRSTEP] = steps as f64;
        }
        Ok(())
    }

    fn symbolic(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        self.numeric.release();
        let status = unsafe {
            (T::ENTRY.symbolic)(
                matrix.rows,
                matrix.columns,
                matrix.column_pointers,
                matrix.row_indices,
                matrix.scalars(),
                self.symbolic.slot(),
                self.control.as_ptr(),
                self.info.as_mut_ptr(),
            )
        };
        if status != UMFPACK_OK {
            return Err(Self::factorization_error(status));
        }
        Ok(())
    }

    fn numeric(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let status = unsafe {
            (T::ENTRY.numeric)(
                matrix.column_pointers,
                matrix.row_indices,
                matrix.scalars(),
                self.symbolic.as_ptr(),
                self.numeric.slot(),
                self.control.as_ptr(),
                self.info.as_mut_ptr(),
            )
        };
        if status != UMFPACK_OK {
            // A singular matrix can still leave a numeric object behind.
            self.numeric.release();
            return Err(Self::factorization_error(status));
        }
        Ok(())
    }

    fn has_symbolic(&self) -> bool {
        self.symbolic.is_live()
    }

    fn solve(
        &mut self,
        system: SystemKind,
        matrix: &NativeMatrix<T>,
        b: &NativeDense<T>,
        x: &mut NativeDenseMut<T>,
    ) -> Result<()> {
        let ledger = PinLedger::new();
        self.solve_batched(system, matrix, b, x, &ledger)
    }

    fn solve_batched(
        &mut self,
        system: SystemKind,
        matrix: &NativeMatrix<T>,
        b: &NativeDense<T>,
        x: &mut NativeDenseMut<T>,
        ledger: &Arc<PinLedger>,
    ) -> Result<()> {
        let n = matrix.order();
        let sys = Self::system_code(system);
        let mut wi = vec![0 as c_int; n];
        let mut w = vec![T::zero(); 5 * n];
        let mut pins = PinnedBuffers::new(Arc::clone(ledger));
        let wi = pins.pin_mut(&mut wi);
        let w = pins.pin_mut(&mut w).cast::<f64>();
        for j in 0..b.columns {
            let status = unsafe {
                (T::ENTRY.wsolve)(
                    sys,
                    matrix.column_pointers,
                    matrix.row_indices,
                    matrix.scalars(),
                    x.column(j).cast(),
                    b.column(j).cast(),
                    self.numeric.as_ptr(),
                    self.control.as_ptr(),
                    self.info.as_mut_ptr(),
                    wi,
                    w,
                )
            };
            if status != UMFPACK_OK {
                return Err(Self::solve_error(status));
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.numeric.release();
        self.symbolic.release();
    }

    fn release(&mut self) {
        self.numeric.release();
        self.symbolic.release();
    }
}

impl<T: UmfpackElement> SolverContext<'_, T, Umfpack<T>> {
    /// Extract `L`, `U`, `P`, `Q`, the pivot diagonal and the row scaling.
    ///
    /// Fails with [`Error::FactorsUnavailable`] before a successful
    /// factorization.
    pub fn factors(&self) -> Result<LuFactors<T>> {
        match self.state() {
            ContextState::Factorized => self.backend().extract(),
            ContextState::Disposed => Err(Error::Lifecycle {
                operation: "extract factors from",
                state: self.state(),
            }),
            _ => Err(Error::FactorsUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn unsymmetric() -> CscMatrix<f64> {
        CscMatrix::from_triplets(
            3,
            3,
            &[
                (0, 0, 2.0),
                (1, 0, 1.0),
                (0, 1, 1.0),
                (1, 1, 3.0),
                (2, 1, 1.0),
                (0, 2, 0.5),
                (1, 2, 1.0),
                (2, 2, 4.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_control_reflects_options() {
        let a = unsymmetric();
        let options = DirectOptions::default()
            .with_ordering(Ordering::Natural)
            .with_pivot_tolerance(0.5)
            .with_refinement_steps(0);
        let ctx = SolverContext::new(&a, Umfpack::<f64>::new(&options)).unwrap();
        let control = ctx.backend().control();
        assert_eq!(control[UMFPACK_ORDERING], UMFPACK_ORDERING_NONE);
        assert_eq!(control[UMFPACK_PIVOT_TOLERANCE], 0.5);
        assert_eq!(control[UMFPACK_IRSTEP], 0.0);
    }

    #[test]
    fn test_factors_reconstruct_matrix() {
        let a = unsymmetric();
        let mut ctx = SolverContext::new(&a, Umfpack::<f64>::new(&DirectOptions::default())).unwrap();
        assert!(matches!(ctx.factors(), Err(Error::FactorsUnavailable)));
        ctx.factorize().unwrap();
        let factors = ctx.factors().unwrap();

        // P A Q = L U with Q the identity and R = I
        let l = factors.l.to_dense();
        let u = factors.u.to_dense();
        let lu = &l * &u;
        let dense = a.to_dense();
        for k in 0..3 {
            for c in 0..3 {
                let expected = dense[(factors.p[k], factors.q[c])] * factors.r[factors.p[k]];
                assert!((lu[(k, c)] - expected).abs() < 1e-12);
            }
            assert_eq!(factors.d[k], u[(k, k)]);
            assert_eq!(l[(k, k)], 1.0);
        }
    }

    #[test]
    fn test_row_scale_as_multipliers() {
        assert_eq!(row_multipliers(vec![2.0, 4.0], 1), vec![2.0, 4.0]);
        assert_eq!(row_multipliers(vec![2.0, 4.0], 0), vec![0.5, 0.25]);
        assert_eq!(row_multipliers(vec![1.0, 1.0], 0), vec![1.0, 1.0]);
    }

    #[test]
    fn test_singular_matrix_reports_status() {
        let a = CscMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 4.0)])
            .unwrap();
        let mut ctx = SolverContext::new(&a, Umfpack::<f64>::new(&DirectOptions::default())).unwrap();
        let err = ctx.factorize().unwrap_err();
        assert!(matches!(
            err,
            Error::Factorization {
                backend: BackendKind::Umfpack,
                status: 1
            }
        ));
        assert_eq!(ctx.state(), ContextState::Uninitialized);
        assert!(!ctx.backend().has_symbolic());
        assert!(ctx.solve(&DVector::from_vec(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn test_triangle_storage_is_rejected() {
        let a = unsymmetric();
        let options = DirectOptions::symmetric(crate::options::Triangle::Upper);
        let err = SolverContext::new(&a, Umfpack::<f64>::new(&options)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
