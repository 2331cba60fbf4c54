//! SuperLU adapter.
//!
//! `gstrf` analyzes and factors in one call, so this backend has no separate
//! phases and a refactorization always starts from scratch. `gstrs` overwrites
//! its right-hand side, so the pinned solution block is filled with `b` and
//! all columns are solved in place in a single call.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::Arc;

use num_complex::Complex64;
use sparsebridge_core::{
    BackendKind, CscMatrix, Element, Error, NativeDense, NativeDenseMut, NativeHandle,
    NativeMatrix, PinLedger, Result,
};
use sparsebridge_native::superlu::{
    self, COLAMD, CONJ, MMD_AT_PLUS_A, MMD_ATA, NATURAL, NO, NOREFINE, NOTRANS, Options,
    SLU_DOUBLE, TRANS, YES,
};

use crate::context::{DirectBackend, SystemKind, require_full_storage, require_square};
use crate::options::{DirectOptions, Ordering};

/// Native entry points for one element type.
pub struct Entry<T> {
    gstrf: unsafe extern "C" fn(
        *const Options,
        c_int,
        c_int,
        *const c_int,
        *const c_int,
        *const T,
        *mut *mut c_void,
        *mut c_int,
    ),
    gstrs: unsafe extern "C" fn(c_int, *mut c_void, c_int, *mut T, c_int, *mut c_int),
    destroy: unsafe extern "C" fn(*mut *mut c_void),
}

/// Element types SuperLU can factor (`d` and `z` drivers).
pub trait SuperLuElement: Element {
    const ENTRY: Entry<Self>;
}

impl SuperLuElement for f64 {
    const ENTRY: Entry<f64> = Entry {
        gstrf: superlu::d::gstrf,
        gstrs: superlu::d::gstrs,
        destroy: superlu::d::destroy,
    };
}

impl SuperLuElement for Complex64 {
    const ENTRY: Entry<Complex64> = Entry {
        gstrf: superlu::z::gstrf,
        gstrs: superlu::z::gstrs,
        destroy: superlu::z::destroy,
    };
}

unsafe fn destroy<T: SuperLuElement>(slot: *mut *mut c_void, _: *mut c_void) {
    unsafe { (T::ENTRY.destroy)(slot) }
}

/// SuperLU backend state.
pub struct SuperLu<T: SuperLuElement> {
    factors: NativeHandle,
    native_options: Options,
    options: DirectOptions,
    _element: PhantomData<T>,
}

impl<T: SuperLuElement> SuperLu<T> {
    pub fn new(options: &DirectOptions) -> Self {
        Self {
            factors: NativeHandle::empty("superlu factors", destroy::<T>),
            native_options: Options::default(),
            options: options.clone(),
            _element: PhantomData,
        }
    }

    /// Options struct as handed to `gstrf`.
    pub fn native_options(&self) -> &Options {
        &self.native_options
    }
}

impl<T: SuperLuElement> DirectBackend<T> for SuperLu<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::SuperLu
    }

    fn validate(&self, matrix: &CscMatrix<T>) -> Result<()> {
        require_square(BackendKind::SuperLu, matrix)?;
        require_full_storage(BackendKind::SuperLu, self.options.triangle)
    }

    fn initialize(&mut self) -> Result<()> {
        unsafe { superlu::set_default_options(&mut self.native_options) };
        let native = &mut self.native_options;
        native.equil = if self.options.equilibrate { YES } else { NO };
        native.col_perm = match self.options.ordering {
            Ordering::Natural => NATURAL,
            Ordering::Amd => MMD_ATA,
            Ordering::Metis => MMD_AT_PLUS_A,
            Ordering::Default | Ordering::Colamd | Ordering::Best => COLAMD,
        };
        if self.options.symmetric {
            native.sym_pattern = YES;
            native.col_perm = MMD_AT_PLUS_A;
        }
        native.iter_refine = match self.options.refinement_steps {
            Some(steps) if steps > 0 => SLU_DOUBLE,
            _ => NOREFINE,
        };
        native.diag_pivot_thresh = self.options.pivot_tolerance.unwrap_or(1.0);
        if log::log_enabled!(log::Level::Trace) {
            native.print_stat = YES;
        }
        Ok(())
    }

    fn separable_phases(&self) -> bool {
        false
    }

    fn factorize(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let mut info: c_int = 0;
        unsafe {
            (T::ENTRY.gstrf)(
                &self.native_options,
                matrix.rows,
                matrix.nnz,
                matrix.column_pointers,
                matrix.row_indices,
                matrix.values,
                self.factors.slot(),
                &mut info,
            )
        };
        if info != 0 {
            self.factors.release();
            if info > 0 {
                log::warn!("superlu: matrix is singular (info {})", info);
            }
            return Err(Error::Factorization {
                backend: BackendKind::SuperLu,
                status: info,
            });
        }
        Ok(())
    }

    fn has_symbolic(&self) -> bool {
        false
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
        let trans = match system {
            SystemKind::Normal => NOTRANS,
            SystemKind::Transpose => TRANS,
            SystemKind::ConjugateTranspose => CONJ,
        };
        unsafe { x.as_mut_slice() }.copy_from_slice(unsafe { b.as_slice() });
        let n = matrix.order().max(1) as c_int;
        let mut info: c_int = 0;
        unsafe {
            (T::ENTRY.gstrs)(
                trans,
                self.factors.as_ptr(),
                b.columns as c_int,
                x.data,
                n,
                &mut info,
            )
        };
        if info != 0 {
            return Err(Error::Solve {
                backend: BackendKind::SuperLu,
                status: info,
            });
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.factors.release();
    }

    fn release(&mut self) {
        self.factors.release();
    }
}
