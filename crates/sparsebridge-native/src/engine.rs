//! Numeric engine shared by the library front-ends.
//!
//! Sparse LU and LLᴴ factorizations come from faer, with the symbolic
//! analysis kept separate so numeric refactorization can reuse it. Dense
//! factors (for libraries that hand L and U back to the caller) and dense
//! eigen decompositions come from nalgebra.

use faer::Side;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, Lu, SymbolicLlt, SymbolicLu};
use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{ComplexField, DMatrix, DVector};
use num_complex::Complex64;
use std::os::raw::c_int;

/// Element types the engine can factor.
pub(crate) trait Scalar:
    ComplexField<RealField = f64> + Copy + Default + PartialEq + std::fmt::Debug + 'static
{
    type Lu;
    type Llt;

    fn analyze_lu(matrix: &CscParts<Self>) -> Option<SymbolicLu<usize>>;
    fn factor_lu(symbolic: &SymbolicLu<usize>, matrix: &CscParts<Self>) -> Option<Self::Lu>;
    fn solve_lu(lu: &Self::Lu, rhs: &mut [Self]);

    fn analyze_llt(matrix: &CscParts<Self>, side: Side) -> Option<SymbolicLlt<usize>>;
    fn factor_llt(
        symbolic: &SymbolicLlt<usize>,
        matrix: &CscParts<Self>,
        side: Side,
    ) -> Option<Self::Llt>;
    fn solve_llt(llt: &Self::Llt, rhs: &mut [Self]);
}

macro_rules! impl_scalar {
    ($t:ty, $faer:ty, $convert:ident, |$v:ident| $to:expr, |$w:ident| $from:expr) => {
        fn $convert(matrix: &CscParts<$t>) -> Option<SparseColMat<usize, $faer>> {
            let triplets: Vec<Triplet<usize, usize, $faer>> = matrix
                .iter()
                .map(|(r, c, $v)| Triplet::new(r, c, $to))
                .collect();
            SparseColMat::<usize, $faer>::try_new_from_triplets(
                matrix.rows,
                matrix.columns,
                &triplets,
            )
            .ok()
        }

        impl Scalar for $t {
            type Lu = Lu<usize, $faer>;
            type Llt = Llt<usize, $faer>;

            fn analyze_lu(matrix: &CscParts<Self>) -> Option<SymbolicLu<usize>> {
                let mat = $convert(matrix)?;
                SymbolicLu::try_new(mat.symbolic()).ok()
            }

            fn factor_lu(
                symbolic: &SymbolicLu<usize>,
                matrix: &CscParts<Self>,
            ) -> Option<Self::Lu> {
                let mat = $convert(matrix)?;
                Lu::try_new_with_symbolic(symbolic.clone(), mat.as_ref()).ok()
            }

            fn solve_lu(lu: &Self::Lu, rhs: &mut [Self]) {
                let b = Col::<$faer>::from_fn(rhs.len(), |i| {
                    let $v = rhs[i];
                    $to
                });
                let x = lu.solve(&b);
                for (i, slot) in rhs.iter_mut().enumerate() {
                    let $w = x[i];
                    *slot = $from;
                }
            }

            fn analyze_llt(matrix: &CscParts<Self>, side: Side) -> Option<SymbolicLlt<usize>> {
                let mat = $convert(matrix)?;
                SymbolicLlt::try_new(mat.symbolic(), side).ok()
            }

            fn factor_llt(
                symbolic: &SymbolicLlt<usize>,
                matrix: &CscParts<Self>,
                side: Side,
            ) -> Option<Self::Llt> {
                let mat = $convert(matrix)?;
                Llt::try_new_with_symbolic(symbolic.clone(), mat.as_ref(), side).ok()
            }

            fn solve_llt(llt: &Self::Llt, rhs: &mut [Self]) {
                let b = Col::<$faer>::from_fn(rhs.len(), |i| {
                    let $v = rhs[i];
                    $to
                });
                let x = llt.solve(&b);
                for (i, slot) in rhs.iter_mut().enumerate() {
                    let $w = x[i];
                    *slot = $from;
                }
            }
        }
    };
}

impl_scalar!(f64, f64, faer_real, |v| v, |w| w);
impl_scalar!(
    Complex64,
    c64,
    faer_complex,
    |v| c64::new(v.re, v.im),
    |w| Complex64::new(w.re, w.im)
);

/// Which system a solve targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Normal,
    Transpose,
    ConjugateTranspose,
}

/// Engine failures, mapped to library status codes by each front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineError {
    /// Pattern could not be analyzed or assembled.
    Structure,
    /// A zero (or non-finite) pivot was encountered.
    Singular,
    /// Cholesky met a non-positive pivot.
    NotPositiveDefinite,
}

/// Owned copy of a compressed-column matrix read from native arguments.
#[derive(Debug, Clone)]
pub(crate) struct CscParts<T> {
    pub rows: usize,
    pub columns: usize,
    pub column_pointers: Vec<usize>,
    pub row_indices: Vec<usize>,
    pub values: Vec<T>,
}

impl<T: Scalar> CscParts<T> {
    /// Read and validate compressed arrays with the given index base.
    ///
    /// Row indices within a column need not be sorted. A null `ax` reads the
    /// pattern only, with every value set to one.
    ///
    /// # Safety
    ///
    /// `ap` must point to `columns + 1` ints and `ai`/`ax` to `ap[columns] - base` entries.
    pub unsafe fn from_raw(
        rows: usize,
        columns: usize,
        ap: *const c_int,
        ai: *const c_int,
        ax: *const T,
        base: c_int,
    ) -> Option<Self> {
        if ap.is_null() || ai.is_null() {
            return None;
        }
        let ap = unsafe { std::slice::from_raw_parts(ap, columns + 1) };
        if ap[0] != base {
            return None;
        }
        let mut column_pointers = Vec::with_capacity(columns + 1);
        for w in ap.windows(2) {
            if w[1] < w[0] {
                return None;
            }
        }
        for &p in ap {
            column_pointers.push((p - base) as usize);
        }
        let nnz = column_pointers[columns];
        let ai = unsafe { std::slice::from_raw_parts(ai, nnz) };
        let values = if ax.is_null() {
            vec![T::one(); nnz]
        } else {
            unsafe { std::slice::from_raw_parts(ax, nnz) }.to_vec()
        };
        let mut row_indices = Vec::with_capacity(nnz);
        for &r in ai {
            let r = r - base;
            if r < 0 || r as usize >= rows {
                return None;
            }
            row_indices.push(r as usize);
        }
        Some(Self {
            rows,
            columns,
            column_pointers,
            row_indices,
            values,
        })
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.columns).flat_map(move |c| {
            (self.column_pointers[c]..self.column_pointers[c + 1])
                .map(move |k| (self.row_indices[k], c, self.values[k]))
        })
    }

    /// Whether `other` carries the same column pointers and row indices.
    pub fn same_pattern(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.column_pointers == other.column_pointers
            && self.row_indices == other.row_indices
    }

    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.rows + 1];
        for &r in &self.row_indices {
            counts[r + 1] += 1;
        }
        for r in 0..self.rows {
            counts[r + 1] += counts[r];
        }
        let mut next = counts.clone();
        let mut row_indices = vec![0usize; self.nnz()];
        let mut values = vec![T::zero(); self.nnz()];
        for (r, c, v) in self.iter() {
            row_indices[next[r]] = c;
            values[next[r]] = v;
            next[r] += 1;
        }
        Self {
            rows: self.columns,
            columns: self.rows,
            column_pointers: counts,
            row_indices,
            values,
        }
    }

    /// Expand one stored triangle into a full symmetric or Hermitian matrix.
    ///
    /// Entries outside the declared triangle are ignored.
    pub fn expand_triangle(&self, upper: bool, hermitian: bool) -> Self {
        let mut entries = Vec::with_capacity(2 * self.nnz());
        for (r, c, v) in self.iter() {
            let stored = if upper { r <= c } else { r >= c };
            if !stored {
                continue;
            }
            entries.push((r, c, v));
            if r != c {
                entries.push((c, r, if hermitian { v.conjugate() } else { v }));
            }
        }
        Self::from_entries(self.rows, self.columns, entries)
    }

    /// Assemble from unsorted entries, summing duplicates.
    pub fn from_entries(rows: usize, columns: usize, mut entries: Vec<(usize, usize, T)>) -> Self {
        entries.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        let mut column_pointers = vec![0usize; columns + 1];
        let mut row_indices: Vec<usize> = Vec::with_capacity(entries.len());
        let mut values: Vec<T> = Vec::with_capacity(entries.len());
        let mut last = None;
        for (r, c, v) in entries {
            if last == Some((r, c)) {
                if let Some(slot) = values.last_mut() {
                    *slot += v;
                }
                continue;
            }
            last = Some((r, c));
            row_indices.push(r);
            values.push(v);
            column_pointers[c + 1] += 1;
        }
        for c in 0..columns {
            column_pointers[c + 1] += column_pointers[c];
        }
        Self {
            rows,
            columns,
            column_pointers,
            row_indices,
            values,
        }
    }

    /// `op(A) * x`.
    pub fn apply(&self, op: Op, x: &[T]) -> Vec<T> {
        match op {
            Op::Normal => {
                let mut y = vec![T::zero(); self.rows];
                for (r, c, v) in self.iter() {
                    y[r] += v * x[c];
                }
                y
            }
            Op::Transpose | Op::ConjugateTranspose => {
                let mut y = vec![T::zero(); self.columns];
                for (r, c, v) in self.iter() {
                    let v = if op == Op::ConjugateTranspose { v.conjugate() } else { v };
                    y[c] += v * x[r];
                }
                y
            }
        }
    }

    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.rows, self.columns);
        for (r, c, v) in self.iter() {
            dense[(r, c)] += v;
        }
        dense
    }

    /// Scale rows and columns in place: `A[i][j] *= row[i] * col[j]`.
    pub fn scale(&mut self, row: &[f64], col: &[f64]) {
        for c in 0..self.columns {
            for k in self.column_pointers[c]..self.column_pointers[c + 1] {
                let r = self.row_indices[k];
                self.values[k] = self.values[k] * T::from_real(row[r] * col[c]);
            }
        }
    }
}

pub(crate) fn conjugate_in_place<T: Scalar>(values: &mut [T]) {
    for v in values.iter_mut() {
        *v = v.conjugate();
    }
}

fn all_finite<T: Scalar>(values: &[T]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// A numeric factorization of a square matrix, able to solve `op(A) x = b`.
pub(crate) enum Factor<T: Scalar> {
    Lu {
        matrix: CscParts<T>,
        forward: T::Lu,
        transposed: Option<T::Lu>,
    },
    /// Hermitian positive definite; `matrix` holds the full expansion.
    Llt { matrix: CscParts<T>, llt: T::Llt },
}

impl<T: Scalar> Factor<T> {
    /// LU factorization reusing `symbolic`.
    pub fn lu(symbolic: &SymbolicLu<usize>, matrix: CscParts<T>) -> Result<Self, EngineError> {
        let forward = T::factor_lu(symbolic, &matrix).ok_or(EngineError::Singular)?;
        if !lu_is_regular::<T>(&forward, matrix.rows) {
            return Err(EngineError::Singular);
        }
        Ok(Factor::Lu {
            matrix,
            forward,
            transposed: None,
        })
    }

    /// Cholesky factorization of a full Hermitian matrix reusing `symbolic`.
    pub fn llt(symbolic: &SymbolicLlt<usize>, matrix: CscParts<T>) -> Result<Self, EngineError> {
        let llt = T::factor_llt(symbolic, &matrix, Side::Lower)
            .ok_or(EngineError::NotPositiveDefinite)?;
        Ok(Factor::Llt { matrix, llt })
    }

    pub fn order(&self) -> usize {
        self.matrix().rows
    }

    pub fn matrix(&self) -> &CscParts<T> {
        match self {
            Factor::Lu { matrix, .. } | Factor::Llt { matrix, .. } => matrix,
        }
    }

    /// Solve `op(A) x = b` in place.
    pub fn solve(&mut self, op: Op, rhs: &mut [T]) -> Result<(), EngineError> {
        match self {
            Factor::Lu {
                matrix,
                forward,
                transposed,
            } => match op {
                Op::Normal => T::solve_lu(forward, rhs),
                Op::Transpose | Op::ConjugateTranspose => {
                    if transposed.is_none() {
                        let t = matrix.transpose();
                        let symbolic = T::analyze_lu(&t).ok_or(EngineError::Structure)?;
                        *transposed = Some(T::factor_lu(&symbolic, &t).ok_or(EngineError::Singular)?);
                    }
                    let lu = transposed.as_ref().ok_or(EngineError::Singular)?;
                    // Aᴴx = b  <=>  Aᵀ conj(x) = conj(b)
                    if op == Op::ConjugateTranspose {
                        conjugate_in_place(rhs);
                    }
                    T::solve_lu(lu, rhs);
                    if op == Op::ConjugateTranspose {
                        conjugate_in_place(rhs);
                    }
                }
            },
            Factor::Llt { llt, .. } => {
                // A = Aᴴ, so only the plain transpose needs conjugation.
                if op == Op::Transpose {
                    conjugate_in_place(rhs);
                }
                T::solve_llt(llt, rhs);
                if op == Op::Transpose {
                    conjugate_in_place(rhs);
                }
            }
        }
        if all_finite(rhs) {
            Ok(())
        } else {
            Err(EngineError::Singular)
        }
    }

    /// Iterative refinement of `x` for `op(A) x = b`.
    ///
    /// `scratch` must hold at least `n` values. Returns the number of
    /// correction steps applied.
    pub fn refine(
        &mut self,
        op: Op,
        b: &[T],
        x: &mut [T],
        steps: usize,
        scratch: &mut [T],
    ) -> Result<usize, EngineError> {
        let n = self.order();
        let b_norm = b.iter().map(|v| v.modulus()).fold(0.0, f64::max);
        let mut taken = 0;
        for _ in 0..steps {
            let ax = self.matrix().apply(op, x);
            let residual = &mut scratch[..n];
            let mut r_norm: f64 = 0.0;
            for i in 0..n {
                residual[i] = b[i] - ax[i];
                r_norm = r_norm.max(residual[i].modulus());
            }
            if r_norm <= f64::EPSILON * b_norm {
                break;
            }
            self.solve(op, residual)?;
            for i in 0..n {
                x[i] += residual[i];
            }
            taken += 1;
        }
        Ok(taken)
    }
}

fn lu_is_regular<T: Scalar>(lu: &T::Lu, n: usize) -> bool {
    let mut probe = vec![T::one(); n];
    T::solve_lu(lu, &mut probe);
    all_finite(&probe)
}

/// Dense `P A = L U` with partial pivoting.
///
/// Returns `(L, U, perm)` where row `k` of `P A` is row `perm[k]` of `A`,
/// or `None` if `U` has a zero diagonal.
pub(crate) fn dense_lu<T: Scalar>(
    matrix: &CscParts<T>,
) -> Option<(DMatrix<T>, DMatrix<T>, Vec<usize>)> {
    let n = matrix.rows;
    let lu = matrix.to_dense().lu();
    let l = lu.l();
    let u = lu.u();
    if (0..n).any(|i| u[(i, i)].is_zero() || !u[(i, i)].is_finite()) {
        return None;
    }
    let mut order = DVector::<f64>::from_fn(n, |i, _| i as f64);
    lu.p().permute_rows(&mut order);
    let perm = order.iter().map(|&v| v as usize).collect();
    Some((l, u, perm))
}

/// Dense `A = L Lᴴ` of a full Hermitian matrix.
pub(crate) fn dense_cholesky<T: Scalar>(matrix: &CscParts<T>) -> Option<DMatrix<T>> {
    nalgebra::Cholesky::new(matrix.to_dense()).map(|c| c.l())
}

/// Eigenpairs of `A v = λ B v` for symmetric `A` and SPD `B` (identity when
/// absent), in ascending order. Vectors are `B`-orthonormal.
///
/// Returns `None` if `B` is not positive definite.
pub(crate) fn dense_symmetric_eigen(
    a: &DMatrix<f64>,
    b: Option<&DMatrix<f64>>,
) -> Option<(Vec<f64>, DMatrix<f64>)> {
    let n = a.nrows();
    // K* = L⁻¹ A L⁻ᵀ with B = L Lᵀ, vectors mapped back with L⁻ᵀ.
    let (reduced, back) = match b {
        Some(b) => {
            let l = nalgebra::Cholesky::new(b.clone())?.l();
            let l_inv = l.try_inverse()?;
            let reduced = &l_inv * a * l_inv.transpose();
            (reduced, Some(l_inv.transpose()))
        }
        None => (a.clone(), None),
    };
    let symmetric = (&reduced + reduced.transpose()) * 0.5;
    let eigen = nalgebra::SymmetricEigen::new(symmetric);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));
    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let mut vectors = DMatrix::zeros(n, n);
    for (k, &i) in order.iter().enumerate() {
        let column = eigen.eigenvectors.column(i).into_owned();
        let column = match &back {
            Some(back) => back * column,
            None => column,
        };
        vectors.set_column(k, &column);
    }
    Some((values, vectors))
}

/// Unit eigenvector of `m` for the (approximate) eigenvalue `lambda`, by
/// inverse iteration. The largest component is made real and positive.
pub(crate) fn inverse_iteration(m: &DMatrix<Complex64>, lambda: Complex64) -> DVector<Complex64> {
    let n = m.nrows();
    let scale = lambda.norm().max(1.0);
    let start = DVector::from_fn(n, |i, _| Complex64::new(1.0 / (1.0 + i as f64), 0.0));
    let mut v = start.clone();
    let mut offset = 1e-10 * scale;
    for _ in 0..6 {
        let mut shifted = m.clone();
        let shift = lambda + Complex64::new(offset, offset);
        for i in 0..n {
            shifted[(i, i)] -= shift;
        }
        let lu = shifted.lu();
        v = start.clone();
        let mut converged = true;
        for _ in 0..3 {
            match lu.solve(&v) {
                Some(w) if w.norm().is_finite() && w.norm() > 0.0 => {
                    let norm = w.norm();
                    v = w.unscale(norm);
                }
                _ => {
                    converged = false;
                    break;
                }
            }
        }
        if converged {
            break;
        }
        offset *= 100.0;
    }
    let pivot = v.iter().copied().fold(Complex64::new(0.0, 0.0), |best, value| {
        if value.norm() > best.norm() { value } else { best }
    });
    if pivot.norm() > 0.0 {
        let phase = pivot.conj() / pivot.norm();
        v *= phase;
    }
    v
}
