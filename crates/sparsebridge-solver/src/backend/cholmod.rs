//! CHOLMOD adapter (sparse Cholesky for symmetric / Hermitian matrices).
//!
//! The matrix is described by a `cholmod_sparse` header pointing at the
//! pinned arrays, with `stype` selecting the stored triangle. All right-hand
//! sides go to one `cholmod_solve` call; its result is a library-owned dense
//! block that is copied out and freed on every path.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::Arc;

use sparsebridge_core::{
    BackendKind, CscMatrix, Element, Error, NativeDense, NativeDenseMut, NativeHandle,
    NativeMatrix, PinLedger, Result,
};
use sparsebridge_native::cholmod::{
    self, CHOLMOD_A, CHOLMOD_COMPLEX, CHOLMOD_DOUBLE, CHOLMOD_FALSE, CHOLMOD_INT, CHOLMOD_OK,
    CHOLMOD_OUT_OF_MEMORY, CHOLMOD_REAL, CHOLMOD_TRUE, Common, Dense, Sparse,
};

use crate::context::{DirectBackend, SystemKind, debug_check_triangle, require_square};
use crate::options::{DirectOptions, Triangle};

unsafe fn free_factor(slot: *mut *mut c_void, common: *mut c_void) {
    unsafe { cholmod::free_factor(slot, common.cast()) };
}

unsafe fn free_dense(slot: *mut *mut Dense, common: *mut c_void) {
    unsafe { cholmod::free_dense(slot, common.cast()) };
}

/// CHOLMOD backend state.
pub struct Cholmod<T> {
    factor: NativeHandle,
    // Boxed so the address handed to the factor handle stays fixed.
    common: Box<Common>,
    started: bool,
    options: DirectOptions,
    _element: PhantomData<T>,
}

impl<T: Element> Cholmod<T> {
    pub fn new(options: &DirectOptions) -> Self {
        let mut common = Box::new(Common::default());
        let companion = (&mut *common as *mut Common).cast::<c_void>();
        Self {
            factor: NativeHandle::empty("cholmod factor", free_factor).with_companion(companion),
            common,
            started: false,
            options: options.clone(),
            _element: PhantomData,
        }
    }

    fn common(&mut self) -> *mut Common {
        &mut *self.common
    }

    /// Status left in the common block by the last call.
    pub fn status(&self) -> i32 {
        self.common.status
    }

    fn error(&self, solving: bool) -> Error {
        let status = self.common.status;
        if status == CHOLMOD_OUT_OF_MEMORY {
            Error::ResourceExhaustion {
                backend: BackendKind::Cholmod,
                status,
            }
        } else if solving {
            Error::Solve {
                backend: BackendKind::Cholmod,
                status,
            }
        } else {
            Error::Factorization {
                backend: BackendKind::Cholmod,
                status,
            }
        }
    }

    fn xtype() -> i32 {
        if T::IS_COMPLEX { CHOLMOD_COMPLEX } else { CHOLMOD_REAL }
    }

    /// `cholmod_sparse` header over the pinned matrix arrays.
    fn sparse(&self, matrix: &NativeMatrix<T>) -> Sparse {
        Sparse {
            nrow: matrix.rows as usize,
            ncol: matrix.columns as usize,
            nzmax: matrix.nnz as usize,
            p: matrix.column_pointers.cast_mut().cast(),
            i: matrix.row_indices.cast_mut().cast(),
            x: matrix.values.cast_mut().cast(),
            stype: match self.options.triangle {
                Triangle::Lower => -1,
                Triangle::Upper | Triangle::Full => 1,
            },
            itype: CHOLMOD_INT,
            xtype: Self::xtype(),
            dtype: CHOLMOD_DOUBLE,
            sorted: CHOLMOD_TRUE,
            packed: CHOLMOD_TRUE,
        }
    }
}

impl<T: Element> DirectBackend<T> for Cholmod<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::Cholmod
    }

    fn validate(&self, matrix: &CscMatrix<T>) -> Result<()> {
        if !self.options.symmetric {
            return Err(Error::Configuration(
                "CHOLMOD factors symmetric matrices only; declare the matrix symmetric".to_string(),
            ));
        }
        require_square(BackendKind::Cholmod, matrix)?;
        debug_check_triangle(matrix, self.options.triangle);
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        let common = self.common();
        if unsafe { cholmod::start(common) } != CHOLMOD_TRUE {
            return Err(Error::Initialization {
                backend: BackendKind::Cholmod,
                status: self.common.status,
            });
        }
        self.started = true;
        Ok(())
    }

    fn symbolic(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let mut sparse = self.sparse(matrix);
        let common = self.common();
        let factor = unsafe { cholmod::analyze(&mut sparse, common) };
        self.factor.reset(factor);
        if !self.factor.is_live() {
            return Err(self.error(false));
        }
        Ok(())
    }

    fn numeric(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let mut sparse = self.sparse(matrix);
        let common = self.common();
        let ok = unsafe { cholmod::factorize(&mut sparse, self.factor.as_ptr(), common) };
        if ok == CHOLMOD_FALSE || self.common.status != CHOLMOD_OK {
            return Err(self.error(false));
        }
        Ok(())
    }

    fn has_symbolic(&self) -> bool {
        self.factor.is_live()
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
        _ledger: &Arc<PinLedger>,
    ) -> Result<()> {
        let n = matrix.order();
        // A is Hermitian, so Aᴴ = A and Aᵀ x = b becomes A conj(x) = conj(b).
        let conjugate = T::IS_COMPLEX && system == SystemKind::Transpose;
        let conjugated: Vec<T>;
        let source = if conjugate {
            conjugated = unsafe { b.as_slice() }.iter().map(|v| v.conjugate()).collect();
            conjugated.as_ptr()
        } else {
            b.data
        };
        let mut rhs = Dense {
            nrow: n,
            ncol: b.columns,
            nzmax: n * b.columns,
            d: n,
            x: source.cast_mut().cast(),
            xtype: Self::xtype(),
            dtype: CHOLMOD_DOUBLE,
        };

        let common = self.common();
        let companion = common.cast::<c_void>();
        let mut result = NativeHandle::<Dense>::empty("cholmod dense", free_dense).with_companion(companion);
        result.reset(unsafe { cholmod::solve(CHOLMOD_A, self.factor.as_ptr(), &mut rhs, common) });
        if !result.is_live() {
            return Err(self.error(true));
        }

        let solved = unsafe { &*result.as_ptr() };
        let values = unsafe { std::slice::from_raw_parts(solved.x.cast::<T>(), n * b.columns) };
        let out = unsafe { x.as_mut_slice() };
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = if conjugate { value.conjugate() } else { *value };
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.factor.release();
    }

    fn release(&mut self) {
        self.shutdown();
    }
}

impl<T> Cholmod<T> {
    // The factor must go before the common block it points at.
    fn shutdown(&mut self) {
        self.factor.release();
        if self.started {
            let common: *mut Common = &mut *self.common;
            if unsafe { cholmod::finish(common) } != CHOLMOD_TRUE {
                log::warn!("cholmod_finish failed with status {}", self.common.status);
            }
            self.started = false;
        }
    }

    /// Whether `cholmod_start` has run without a matching finish.
    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl<T> Drop for Cholmod<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
