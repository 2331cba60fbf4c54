//! The solver-context lifecycle shared by every direct backend.
//!
//! A [`SolverContext`] borrows one matrix, pins its three arrays for the
//! whole lifetime of the context and drives a [`DirectBackend`] through
//!
//! ```text
//! new ─► Uninitialized ──factorize──► Factorized ──solve*──► ...
//!              ▲   │ (status ≠ 0)           │
//!              └───┘                        ▼
//!                                        Disposed
//! ```
//!
//! Native out-of-memory moves the context to `Failed`, where only
//! [`SolverContext::dispose`] is allowed. Solving an `Uninitialized` context
//! factors it first.

use nalgebra::{DMatrix, DVector};
use sparsebridge_core::{
    BackendKind, ContextState, CscMatrix, Element, Error, NativeDense, NativeDenseMut,
    NativeMatrix, PinLedger, PinnedBuffers, Result,
};
use std::sync::Arc;

use crate::options::Triangle;

/// Which system to solve with the factored matrix `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SystemKind {
    /// `A x = b`
    #[default]
    Normal,
    /// `Aᵀ x = b`
    Transpose,
    /// `Aᴴ x = b` (same as `Transpose` for real matrices)
    ConjugateTranspose,
}

/// Counters for the native phases a context has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub symbolic_runs: usize,
    pub numeric_runs: usize,
    /// Combined factorizations, for backends without separate phases.
    pub factorize_runs: usize,
    /// Right-hand-side columns solved.
    pub solves: usize,
}

/// Hooks a native library implements to take part in the lifecycle.
///
/// Hooks receive descriptors of storage the context has already pinned.
/// Every non-success native status is converted into an [`Error`] carrying
/// the raw code at the point where it is detected.
pub trait DirectBackend<T: Element> {
    fn kind(&self) -> BackendKind;

    /// Reject matrices or option combinations the library cannot handle.
    /// Runs before anything is pinned or allocated.
    fn validate(&self, matrix: &CscMatrix<T>) -> Result<()>;

    /// Set up control structures. Never touches the matrix.
    fn initialize(&mut self) -> Result<()>;

    /// Whether symbolic and numeric factorization are separate native calls.
    fn separable_phases(&self) -> bool {
        true
    }

    /// Structure-only analysis.
    fn symbolic(&mut self, _matrix: &NativeMatrix<T>) -> Result<()> {
        Err(Error::Configuration(format!(
            "{} has no separate symbolic phase",
            self.kind()
        )))
    }

    /// Numeric factorization reusing the current analysis.
    fn numeric(&mut self, _matrix: &NativeMatrix<T>) -> Result<()> {
        Err(Error::Configuration(format!(
            "{} has no separate numeric phase",
            self.kind()
        )))
    }

    /// Analysis and factorization in one step.
    fn factorize(&mut self, matrix: &NativeMatrix<T>) -> Result<()> {
        self.symbolic(matrix)?;
        self.numeric(matrix)
    }

    /// Whether a symbolic analysis is currently held.
    fn has_symbolic(&self) -> bool;

    /// Solve for a single right-hand-side column.
    fn solve(
        &mut self,
        system: SystemKind,
        matrix: &NativeMatrix<T>,
        b: &NativeDense<T>,
        x: &mut NativeDenseMut<T>,
    ) -> Result<()>;

    /// Solve for every column of `b`.
    ///
    /// The default loops over columns; libraries with a batched entry point
    /// or reusable workspace override it. `ledger` records any scratch the
    /// backend pins for the duration of the call.
    fn solve_batched(
        &mut self,
        system: SystemKind,
        matrix: &NativeMatrix<T>,
        b: &NativeDense<T>,
        x: &mut NativeDenseMut<T>,
        _ledger: &Arc<PinLedger>,
    ) -> Result<()> {
        for j in 0..b.columns {
            let column = NativeDense {
                rows: b.rows,
                columns: 1,
                data: b.column(j),
            };
            let mut out = NativeDenseMut {
                rows: x.rows,
                columns: 1,
                data: x.column(j),
            };
            self.solve(system, matrix, &column, &mut out)?;
        }
        Ok(())
    }

    /// Free factorization objects after a failed phase, keeping control
    /// structures so the context can retry.
    fn reset(&mut self);

    /// Free everything the backend holds. Must be idempotent and never panic.
    fn release(&mut self);
}

/// Common matrix checks for square-only backends.
pub(crate) fn require_square<T: Element>(kind: BackendKind, matrix: &CscMatrix<T>) -> Result<()> {
    if !matrix.is_square() {
        return Err(Error::InvalidMatrix(format!(
            "{} requires a square matrix, got {}x{}",
            kind,
            matrix.rows(),
            matrix.columns()
        )));
    }
    Ok(())
}

/// Checks for backends that factor the whole matrix.
pub(crate) fn require_full_storage(kind: BackendKind, triangle: Triangle) -> Result<()> {
    if triangle != Triangle::Full {
        return Err(Error::Configuration(format!(
            "{} factors the full matrix; {:?} triangle storage is not supported",
            kind, triangle
        )));
    }
    Ok(())
}

/// Cheap debug check that a declared triangle holds.
pub(crate) fn debug_check_triangle<T: Element>(matrix: &CscMatrix<T>, triangle: Triangle) {
    match triangle {
        Triangle::Full => {}
        Triangle::Upper => debug_assert!(matrix.is_upper_triangular(), "matrix is not upper triangular"),
        Triangle::Lower => debug_assert!(matrix.is_lower_triangular(), "matrix is not lower triangular"),
    }
}

/// A direct solver bound to one matrix.
pub struct SolverContext<'a, T: Element, B: DirectBackend<T>> {
    backend: B,
    matrix: &'a CscMatrix<T>,
    native: NativeMatrix<T>,
    pins: PinnedBuffers<'a>,
    ledger: Arc<PinLedger>,
    state: ContextState,
    stats: PhaseStats,
}

impl<'a, T: Element, B: DirectBackend<T>> SolverContext<'a, T, B> {
    /// Validate `matrix`, pin it and initialize `backend`.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn new(matrix: &'a CscMatrix<T>, mut backend: B) -> Result<Self> {
        backend.validate(matrix)?;
        let ledger = PinLedger::new();
        let mut pins = PinnedBuffers::new(Arc::clone(&ledger));
        let native = NativeMatrix::pin(matrix, &mut pins);
        if let Err(err) = backend.initialize() {
            log::warn!("{} initialization failed: {}", backend.kind(), err);
            backend.release();
            return Err(err);
        }
        log::debug!(
            "{} context created for {}x{} {} matrix",
            backend.kind(),
            matrix.rows(),
            matrix.columns(),
            T::NAME
        );
        Ok(Self {
            backend,
            matrix,
            native,
            pins,
            ledger,
            state: ContextState::Uninitialized,
            stats: PhaseStats::default(),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn stats(&self) -> PhaseStats {
        self.stats
    }

    /// The matrix currently bound to the context.
    pub fn matrix(&self) -> &'a CscMatrix<T> {
        self.matrix
    }

    /// Ledger recording every pin made by this context.
    pub fn pin_ledger(&self) -> &Arc<PinLedger> {
        &self.ledger
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn ensure_usable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            ContextState::Disposed | ContextState::Failed => Err(Error::Lifecycle {
                operation,
                state: self.state,
            }),
            _ => Ok(()),
        }
    }

    /// Record the outcome of a factorization phase.
    fn settle(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.state = ContextState::Factorized;
                log::debug!("{} factorized", self.backend.kind());
                Ok(())
            }
            Err(err) => {
                log::warn!("{} factorization failed: {}", self.backend.kind(), err);
                self.backend.reset();
                self.state = if err.is_fatal() {
                    ContextState::Failed
                } else {
                    ContextState::Uninitialized
                };
                Err(err)
            }
        }
    }

    /// Factor the bound matrix. A no-op when already factorized.
    pub fn factorize(&mut self) -> Result<()> {
        self.ensure_usable("factorize")?;
        if self.state == ContextState::Factorized {
            return Ok(());
        }
        let result = if self.backend.separable_phases() {
            self.stats.symbolic_runs += 1;
            match self.backend.symbolic(&self.native) {
                Ok(()) => {
                    self.stats.numeric_runs += 1;
                    self.backend.numeric(&self.native)
                }
                Err(err) => Err(err),
            }
        } else {
            self.stats.factorize_runs += 1;
            self.backend.factorize(&self.native)
        };
        self.settle(result)
    }

    /// Bind new values with the same sparsity pattern and refactor.
    ///
    /// Only the numeric phase runs when the backend keeps a symbolic
    /// analysis; otherwise this is a full factorization.
    pub fn refactor(&mut self, matrix: &'a CscMatrix<T>) -> Result<()> {
        self.ensure_usable("refactor")?;
        if !matrix.same_pattern(self.matrix) {
            return Err(Error::InvalidMatrix(
                "refactor requires the sparsity pattern of the bound matrix".to_string(),
            ));
        }
        self.pins.release_all();
        self.pins = PinnedBuffers::new(Arc::clone(&self.ledger));
        self.native = NativeMatrix::pin(matrix, &mut self.pins);
        self.matrix = matrix;

        if self.backend.separable_phases() && self.backend.has_symbolic() {
            self.stats.numeric_runs += 1;
            let result = self.backend.numeric(&self.native);
            self.settle(result)
        } else {
            self.state = ContextState::Uninitialized;
            self.factorize()
        }
    }

    fn ensure_factorized(&mut self, operation: &'static str) -> Result<()> {
        self.ensure_usable(operation)?;
        if self.state == ContextState::Uninitialized {
            self.factorize()?;
        }
        Ok(())
    }

    /// Solve `A x = b`.
    pub fn solve(&mut self, b: &DVector<T>) -> Result<DVector<T>> {
        self.solve_system(SystemKind::Normal, b)
    }

    /// Solve `op(A) x = b`.
    pub fn solve_system(&mut self, system: SystemKind, b: &DVector<T>) -> Result<DVector<T>> {
        let x = self.run_solve("solve", system, b.as_slice(), 1)?;
        Ok(DVector::from_vec(x))
    }

    /// Solve `A X = B` for every column of `B`.
    pub fn solve_many(&mut self, b: &DMatrix<T>) -> Result<DMatrix<T>> {
        self.solve_many_system(SystemKind::Normal, b)
    }

    /// Solve `op(A) X = B` for every column of `B`.
    pub fn solve_many_system(&mut self, system: SystemKind, b: &DMatrix<T>) -> Result<DMatrix<T>> {
        let x = self.run_solve("solve", system, b.as_slice(), b.ncols())?;
        Ok(DMatrix::from_vec(b.nrows(), b.ncols(), x))
    }

    fn run_solve(
        &mut self,
        operation: &'static str,
        system: SystemKind,
        b: &[T],
        columns: usize,
    ) -> Result<Vec<T>> {
        self.ensure_usable(operation)?;
        let n = self.native.order();
        if b.len() != n * columns {
            return Err(Error::DimensionMismatch {
                expected: n * columns,
                actual: b.len(),
            });
        }
        self.ensure_factorized(operation)?;

        let mut x = vec![T::zero(); b.len()];
        let result = {
            let mut pins = PinnedBuffers::new(Arc::clone(&self.ledger));
            let rhs = NativeDense::pin(b, n, &mut pins);
            let mut out = NativeDenseMut::pin(&mut x, n, &mut pins);
            self.backend
                .solve_batched(system, &self.native, &rhs, &mut out, &self.ledger)
        };
        match result {
            Ok(()) => {
                self.stats.solves += columns;
                Ok(x)
            }
            Err(err) => {
                log::warn!("{} solve failed: {}", self.backend.kind(), err);
                if err.is_fatal() {
                    self.backend.reset();
                    self.state = ContextState::Failed;
                }
                Err(err)
            }
        }
    }

    /// Release native handles, then the matrix pins. Idempotent.
    pub fn dispose(&mut self) {
        if self.state == ContextState::Disposed {
            return;
        }
        self.backend.release();
        self.pins.release_all();
        self.state = ContextState::Disposed;
        log::debug!("{} context disposed", self.backend.kind());
    }
}

impl<T: Element, B: DirectBackend<T>> Drop for SolverContext<'_, T, B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: Element, B: DirectBackend<T>> std::fmt::Debug for SolverContext<'_, T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverContext")
            .field("backend", &self.backend.kind())
            .field("state", &self.state)
            .field("order", &self.native.order())
            .field("stats", &self.stats)
            .finish()
    }
}
