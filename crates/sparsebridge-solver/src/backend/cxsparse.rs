//! CXSparse adapter.
//!
//! `cs_sqr` produces the symbolic analysis and `cs_lu` / `cs_chol` the
//! numeric factors. CXSparse has no solve driver worth the name, so the solve
//! is composed here from its permutation and triangular kernels, one column
//! at a time with a single pinned work vector.
//!
//! Every CXSparse failure is a null pointer or a zero return; both surface
//! with status `-1`.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::Arc;

use num_complex::Complex64;
use sparsebridge_core::{
    BackendKind, CscMatrix, Element, Error, NativeDense, NativeDenseMut, NativeHandle,
    NativeMatrix, PinLedger, PinnedBuffers, Result,
};
use sparsebridge_native::cxsparse::{self, Cs, Csn, Css};

use crate::context::{
    DirectBackend, SystemKind, debug_check_triangle, require_full_storage, require_square,
};
use crate::options::{DirectOptions, Ordering, Triangle};

const CS_FAILURE: i32 = -1;

/// Native entry points for one element type.
pub struct CsEntry<T> {
    sqr: unsafe extern "C" fn(c_int, *const Cs<T>, c_int) -> *mut Css,
    lu: unsafe extern "C" fn(*const Cs<T>, *const Css, f64) -> *mut Csn<T>,
    chol: unsafe extern "C" fn(*const Cs<T>, *const Css) -> *mut Csn<T>,
    ipvec: unsafe extern "C" fn(*const c_int, *const T, *mut T, c_int) -> c_int,
    pvec: unsafe extern "C" fn(*const c_int, *const T, *mut T, c_int) -> c_int,
    lsolve: unsafe extern "C" fn(*const Cs<T>, *mut T) -> c_int,
    ltsolve: unsafe extern "C" fn(*const Cs<T>, *mut T) -> c_int,
    usolve: unsafe extern "C" fn(*const Cs<T>, *mut T) -> c_int,
    utsolve: unsafe extern "C" fn(*const Cs<T>, *mut T) -> c_int,
    sfree: unsafe extern "C" fn(*mut Css) -> *mut Css,
    nfree: unsafe extern "C" fn(*mut Csn<T>) -> *mut Csn<T>,
}

/// Element types CXSparse can factor (`cs_di` and `cs_ci`).
pub trait CxSparseElement: Element {
    const ENTRY: CsEntry<Self>;
}

macro_rules! cxsparse_element {
    ($t:ty, $prefix:ident) => {
        impl CxSparseElement for $t {
            const ENTRY: CsEntry<$t> = CsEntry {
                sqr: cxsparse::$prefix::sqr,
                lu: cxsparse::$prefix::lu,
                chol: cxsparse::$prefix::chol,
                ipvec: cxsparse::$prefix::ipvec,
                pvec: cxsparse::$prefix::pvec,
                lsolve: cxsparse::$prefix::lsolve,
                ltsolve: cxsparse::$prefix::ltsolve,
                usolve: cxsparse::$prefix::usolve,
                utsolve: cxsparse::$prefix::utsolve,
                sfree: cxsparse::$prefix::sfree,
                nfree: cxsparse::$prefix::nfree,
            };
        }
    };
}

cxsparse_element!(f64, di);
cxsparse_element!(Complex64, ci);

unsafe fn free_symbolic<T: CxSparseElement>(slot: *mut *mut Css, _: *mut c_void) {
    unsafe { *slot = (T::ENTRY.sfree)(*slot) };
}

unsafe fn free_numeric<T: CxSparseElement>(slot: *mut *mut Csn<T>, _: *mut c_void) {
    unsafe { *slot = (T::ENTRY.nfree)(*slot) };
}

/// Which CXSparse factorization to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factorization {
    /// `cs_lu`, general square matrices.
    Lu,
    /// `cs_chol`, Hermitian positive definite matrices (upper triangle read).
    Cholesky,
}

/// CXSparse backend state.
pub struct CxSparse<T: CxSparseElement> {
    factorization: Factorization,
    symbolic: NativeHandle<Css>,
    numeric: NativeHandle<Csn<T>>,
    options: DirectOptions,
    _element: PhantomData<T>,
}

impl<T: CxSparseElement> CxSparse<T> {
    pub fn new(factorization: Factorization, options: &DirectOptions) -> Self {
        Self {
            factorization,
            symbolic: NativeHandle::empty("cs symbolic", free_symbolic::<T>),
            numeric: NativeHandle::empty("cs numeric", free_numeric::<T>),
            options: options.clone(),
            _element: PhantomData,
        }
    }

    pub fn lu(options: &DirectOptions) -> Self {
        Self::new(Factorization::Lu, options)
    }

    pub fn cholesky(options: &DirectOptions) -> Self {
        Self::new(Factorization::Cholesky, options)
    }

    pub fn factorization(&self) -> Factorization {
        self.factorization
    }

    /// The `order` argument of `cs_sqr`.
    fn order(&self) -> c_int {
        match (self.options.ordering, self.factorization) {
            (Ordering::Natural, _) => 0,
            (Ordering::Default, Factorization::Cholesky) | (Ordering::Amd, _) => 1,
            (Ordering::Default, Factorization::Lu) | (Ordering::Colamd, _) => 2,
            (Ordering::Metis, _) | (Ordering::Best, _) => 3,
        }
    }

    fn pivot_tolerance(&self) -> f64 {
        self.options
            .pivot_tolerance
            .unwrap_or(if self.options.symmetric { 0.001 } else { 1.0 })
    }

    fn header(matrix: &NativeMatrix<T>) -> Cs<T> {
        Cs {
            nzmax: matrix.nnz,
            m: matrix.rows,
            n: matrix.columns,
            p: matrix.column_pointers.cast_mut(),
            i: matrix.row_indices.cast_mut(),
            x: matrix.values.cast_mut(),
            nz: -1,
        }
    }

    fn failure(&self) -> Error {
        Error::Factorization {
            backend: BackendKind::CxSparse,
            status: CS_FAILURE,
        }
    }
}

impl<T: CxSparseElement> DirectBackend<T> for CxSparse<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::CxSparse
    }

    fn validate(&self, matrix: &CscMatrix<T>) -> Result<()> {
        require_square(BackendKind::CxSparse, matrix)?;
        match self.factorization {
            Factorization::Lu => require_full_storage(BackendKind::CxSparse, self.options.triangle),
            Factorization::Cholesky => {
                if !self.options.symmetric {
                    return Err(Error::Configuration(
                        "CXSparse Cholesky needs a symmetric matrix; declare the matrix symmetric"
                            .to_string(),
                    ));
                }
                if self.options.triangle == Triangle::Lower {
                    return Err(Error::Configuration(
                        "CXSparse Cholesky reads the upper triangle; lower storage is not supported"
                            .to_string(),
                    ));
                }
                debug_check_triangle(matrix, self.options.triangle);
                Ok(())
            }
        }
    }

    fn initialize(&mut self) -> Result<()> {
        log::debug!(
            "cs_{:?} with order {} for {} values",
            self.factorization,
            self.order(),
            T::NAME
        );
        Ok(())
    }

    fn symbolic(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        self.numeric.release();
        let header = Self::header(matrix);
        let symbolic = unsafe { (T::ENTRY.sqr)(self.order(), &header, 0) };
        self.symbolic.reset(symbolic);
        if !self.symbolic.is_live() {
            return Err(self.failure());
        }
        Ok(())
    }

    fn numeric(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let header = Self::header(matrix);
        let numeric = unsafe {
            match self.factorization {
                Factorization::Lu => {
                    (T::ENTRY.lu)(&header, self.symbolic.as_ptr(), self.pivot_tolerance())
                }
                Factorization::Cholesky => (T::ENTRY.chol)(&header, self.symbolic.as_ptr()),
            }
        };
        self.numeric.reset(numeric);
        if !self.numeric.is_live() {
            return Err(self.failure());
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
        if !self.symbolic.is_live() || !self.numeric.is_live() {
            return Err(Error::FactorsUnavailable);
        }
        let entry = T::ENTRY;
        let s = unsafe { &*self.symbolic.as_ptr() };
        let f = unsafe { &*self.numeric.as_ptr() };
        let n = matrix.order();
        let order = n as c_int;

        // Aᵀ x = b is solved as Aᴴ conj(x) = conj(b) for complex values.
        let conjugate = T::IS_COMPLEX && system == SystemKind::Transpose;
        let adjoint = self.factorization == Factorization::Lu && system != SystemKind::Normal;

        let mut work = vec![T::zero(); n];
        let mut flipped = vec![T::zero(); if conjugate { n } else { 0 }];
        let mut pins = PinnedBuffers::new(Arc::clone(ledger));
        let work = pins.pin_mut(&mut work);
        let flipped = pins.pin_mut(&mut flipped);

        for j in 0..b.columns {
            let mut rhs = b.column(j);
            let out = x.column(j);
            if conjugate {
                for k in 0..n {
                    unsafe { *flipped.add(k) = (*rhs.add(k)).conjugate() };
                }
                rhs = flipped;
            }
            let ok = unsafe {
                match (self.factorization, adjoint) {
                    // x = Q U⁻¹ L⁻¹ P b
                    (Factorization::Lu, false) => {
                        (entry.ipvec)(f.pinv, rhs, work, order) != 0
                            && (entry.lsolve)(f.l, work) != 0
                            && (entry.usolve)(f.u, work) != 0
                            && (entry.ipvec)(s.q, work, out, order) != 0
                    }
                    // x = Pᵀ L⁻ᴴ U⁻ᴴ Qᵀ b
                    (Factorization::Lu, true) => {
                        (entry.pvec)(s.q, rhs, work, order) != 0
                            && (entry.utsolve)(f.u, work) != 0
                            && (entry.ltsolve)(f.l, work) != 0
                            && (entry.pvec)(f.pinv, work, out, order) != 0
                    }
                    (Factorization::Cholesky, _) => {
                        (entry.ipvec)(s.pinv, rhs, work, order) != 0
                            && (entry.lsolve)(f.l, work) != 0
                            && (entry.ltsolve)(f.l, work) != 0
                            && (entry.pvec)(s.pinv, work, out, order) != 0
                    }
                }
            };
            if !ok {
                return Err(Error::Solve {
                    backend: BackendKind::CxSparse,
                    status: CS_FAILURE,
                });
            }
            if conjugate {
                for k in 0..n {
                    unsafe { *out.add(k) = (*out.add(k)).conjugate() };
                }
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
