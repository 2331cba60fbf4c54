//! PARDISO adapter.
//!
//! PARDISO expects compressed rows; the compressed-column arrays are handed
//! over unchanged, so the library factors `Aᵀ`. The solve phase compensates:
//!
//! | caller system | `iparm[11]`            | extra work            |
//! |---------------|------------------------|-----------------------|
//! | `A x = b`     | 2 (transposed solve)   |                       |
//! | `Aᵀ x = b`    | 0                      |                       |
//! | `Aᴴ x = b`    | 0                      | conjugate `b` and `x` (complex) |
//!
//! Symmetric matrix types read one triangle of compressed rows, which is the
//! lower triangle of the caller's matrix.
//!
//! The library keeps global state, so every call goes through one
//! process-wide lock.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex, PoisonError};

use sparsebridge_core::{
    BackendKind, CscMatrix, Element, Error, NativeDense, NativeDenseMut, NativeMatrix, PinLedger,
    PinnedBuffers, Result,
};
use sparsebridge_native::pardiso::{
    self, IPARM_FACTOR_NNZ, IPARM_ORDERING, IPARM_PIVOT_PERTURBATION, IPARM_REFINEMENT_STEPS,
    IPARM_TRANSPOSE, IPARM_ZERO_BASED, PARDISO_NOT_ENOUGH_MEMORY, PARDISO_OK, PARDISO_SLOTS,
    PHASE_ANALYSIS, PHASE_NUMERIC, PHASE_RELEASE_ALL, PHASE_SOLVE, SOLVE_NORMAL, SOLVE_TRANSPOSE,
};

use crate::context::{
    DirectBackend, SystemKind, debug_check_triangle, require_full_storage, require_square,
};
use crate::options::{DirectOptions, Ordering, PardisoMatrixType, Triangle};

static PARDISO_LOCK: Mutex<()> = Mutex::new(());

/// Raw arguments of one `pardiso` call that vary between phases.
struct Call {
    phase: c_int,
    n: c_int,
    a: *const c_void,
    ia: *const c_int,
    ja: *const c_int,
    nrhs: c_int,
    b: *mut c_void,
    x: *mut c_void,
}

impl Call {
    fn release() -> Self {
        Self {
            phase: PHASE_RELEASE_ALL,
            n: 0,
            a: std::ptr::null(),
            ia: std::ptr::null(),
            ja: std::ptr::null(),
            nrhs: 0,
            b: std::ptr::null_mut(),
            x: std::ptr::null_mut(),
        }
    }

    fn with_matrix<T>(phase: c_int, matrix: &NativeMatrix<T>) -> Self {
        Self {
            phase,
            n: matrix.rows,
            a: matrix.values.cast(),
            // Compressed-column pointers read as compressed-row pointers.
            ia: matrix.column_pointers,
            ja: matrix.row_indices,
            nrhs: 0,
            b: std::ptr::null_mut(),
            x: std::ptr::null_mut(),
        }
    }
}

/// PARDISO backend state.
pub struct Pardiso<T> {
    // Boxed so the handle array never moves once the library has written it.
    pt: Box<[*mut c_void; PARDISO_SLOTS]>,
    iparm: [c_int; PARDISO_SLOTS],
    matrix_type: PardisoMatrixType,
    analyzed: bool,
    options: DirectOptions,
    _element: PhantomData<T>,
}

// The handle array is owned by this backend alone and only used under the lock.
unsafe impl<T: Send> Send for Pardiso<T> {}

impl<T: Element> Pardiso<T> {
    pub fn new(options: &DirectOptions) -> Self {
        let matrix_type = options
            .matrix_type
            .unwrap_or_else(|| PardisoMatrixType::default_for(T::IS_COMPLEX, options.symmetric));
        Self {
            pt: Box::new([std::ptr::null_mut(); PARDISO_SLOTS]),
            iparm: [0; PARDISO_SLOTS],
            matrix_type,
            analyzed: false,
            options: options.clone(),
            _element: PhantomData,
        }
    }

    pub fn matrix_type(&self) -> PardisoMatrixType {
        self.matrix_type
    }

    /// The `iparm` array as last written by the library.
    pub fn iparm(&self) -> &[c_int] {
        &self.iparm
    }

    /// Nonzeros in the factors, once factorized.
    pub fn factor_nonzeros(&self) -> Option<usize> {
        let nnz = self.iparm[IPARM_FACTOR_NNZ];
        (nnz >= 0 && self.analyzed).then_some(nnz as usize)
    }
}

impl<T> Pardiso<T> {
    fn call(&mut self, call: Call) -> c_int {
        let _lock = PARDISO_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let (maxfct, mnum) = (1, 1);
        let mtype = self.matrix_type.code();
        let msglvl = c_int::from(log::log_enabled!(log::Level::Trace));
        let mut error = PARDISO_OK;
        unsafe {
            pardiso::pardiso(
                self.pt.as_mut_ptr(),
                &maxfct,
                &mnum,
                &mtype,
                &call.phase,
                &call.n,
                call.a,
                call.ia,
                call.ja,
                std::ptr::null_mut(),
                &call.nrhs,
                self.iparm.as_mut_ptr(),
                &msglvl,
                call.b,
                call.x,
                &mut error,
            )
        };
        error
    }

    fn error(status: c_int, solving: bool) -> Error {
        if status == PARDISO_NOT_ENOUGH_MEMORY {
            Error::ResourceExhaustion {
                backend: BackendKind::Pardiso,
                status,
            }
        } else if solving {
            Error::Solve {
                backend: BackendKind::Pardiso,
                status,
            }
        } else {
            Error::Factorization {
                backend: BackendKind::Pardiso,
                status,
            }
        }
    }

    fn release_all(&mut self) {
        if self.pt.iter().all(|slot| slot.is_null()) {
            self.analyzed = false;
            return;
        }
        let status = self.call(Call::release());
        if status != PARDISO_OK {
            log::warn!("pardiso release returned {}", status);
        }
        self.analyzed = false;
    }
}

impl<T: Element> DirectBackend<T> for Pardiso<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::Pardiso
    }

    fn validate(&self, matrix: &CscMatrix<T>) -> Result<()> {
        require_square(BackendKind::Pardiso, matrix)?;
        if self.matrix_type.is_complex() != T::IS_COMPLEX {
            return Err(Error::Configuration(format!(
                "PARDISO matrix type {:?} does not match {} values",
                self.matrix_type,
                T::NAME
            )));
        }
        if !self.matrix_type.is_symmetric() {
            return require_full_storage(BackendKind::Pardiso, self.options.triangle);
        }
        if self.options.triangle == Triangle::Upper {
            return Err(Error::Configuration(
                "PARDISO symmetric types read the lower triangle; upper storage is not supported"
                    .to_string(),
            ));
        }
        debug_check_triangle(matrix, self.options.triangle);
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        let mtype = self.matrix_type.code();
        {
            let _lock = PARDISO_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            unsafe { pardiso::pardisoinit(self.pt.as_mut_ptr(), &mtype, self.iparm.as_mut_ptr()) };
        }
        self.iparm[IPARM_ZERO_BASED] = 1;
        match self.options.ordering {
            Ordering::Amd => self.iparm[IPARM_ORDERING] = 0,
            Ordering::Metis => self.iparm[IPARM_ORDERING] = 2,
            Ordering::Default => {}
            other => log::debug!("pardiso has no {:?} ordering, keeping its default", other),
        }
        if let Some(steps) = self.options.refinement_steps {
            self.iparm[IPARM_REFINEMENT_STEPS] = steps as c_int;
        }
        if let Some(tolerance) = self.options.pivot_tolerance {
            if tolerance > 0.0 {
                self.iparm[IPARM_PIVOT_PERTURBATION] = (-tolerance.log10()).round() as c_int;
            }
        }
        Ok(())
    }

    fn symbolic(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let status = self.call(Call::with_matrix(PHASE_ANALYSIS, matrix));
        if status != PARDISO_OK {
            return Err(Self::error(status, false));
        }
        self.analyzed = true;
        Ok(())
    }

    fn numeric(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        let status = self.call(Call::with_matrix(PHASE_NUMERIC, matrix));
        if status != PARDISO_OK {
            return Err(Self::error(status, false));
        }
        Ok(())
    }

    fn has_symbolic(&self) -> bool {
        self.analyzed
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
        let conjugate = T::IS_COMPLEX && system == SystemKind::ConjugateTranspose;
        self.iparm[IPARM_TRANSPOSE] = match system {
            SystemKind::Normal => SOLVE_TRANSPOSE,
            SystemKind::Transpose | SystemKind::ConjugateTranspose => SOLVE_NORMAL,
        };

        let mut flipped: Vec<T> = if conjugate {
            unsafe { b.as_slice() }.iter().map(|v| v.conjugate()).collect()
        } else {
            Vec::new()
        };
        let mut pins = PinnedBuffers::new(Arc::clone(ledger));
        let rhs = if conjugate {
            pins.pin_mut(&mut flipped)
        } else {
            b.data.cast_mut()
        };

        let mut call = Call::with_matrix(PHASE_SOLVE, matrix);
        call.nrhs = b.columns as c_int;
        call.b = rhs.cast();
        call.x = x.data.cast();
        let status = self.call(call);
        if status != PARDISO_OK {
            return Err(Self::error(status, true));
        }
        if conjugate {
            for value in unsafe { x.as_mut_slice() } {
                *value = value.conjugate();
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.release_all();
    }

    fn release(&mut self) {
        self.release_all();
    }
}

impl<T> Drop for Pardiso<T> {
    fn drop(&mut self) {
        self.release_all();
    }
}
