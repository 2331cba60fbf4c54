//! Compressed-column sparse storage.
//!
//! Indices are stored as `i32` (the native `c_int`) so the arrays can be
//! handed to native routines without any conversion or copy.

use crate::element::Element;
use crate::error::{Error, Result};
use nalgebra::DMatrix;
use num_traits::Zero;

/// A sparse matrix in compressed sparse column (CSC) format.
///
/// Invariants, checked by every constructor:
/// - `column_pointers.len() == columns + 1`
/// - `column_pointers[0] == 0` and `column_pointers[columns] == nnz`
/// - column pointers are non-decreasing
/// - row indices are in `[0, rows)` and strictly increasing within a column
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix<T> {
    rows: usize,
    columns: usize,
    column_pointers: Vec<i32>,
    row_indices: Vec<i32>,
    values: Vec<T>,
}

impl<T: Element> CscMatrix<T> {
    /// Create a matrix from raw CSC arrays, validating every invariant.
    pub fn try_new(
        rows: usize,
        columns: usize,
        column_pointers: Vec<i32>,
        row_indices: Vec<i32>,
        values: Vec<T>,
    ) -> Result<Self> {
        if rows > i32::MAX as usize || columns > i32::MAX as usize {
            return Err(Error::InvalidMatrix(format!(
                "{}x{} exceeds native index range",
                rows, columns
            )));
        }
        if column_pointers.len() != columns + 1 {
            return Err(Error::InvalidMatrix(format!(
                "Expected {} column pointers, got {}",
                columns + 1,
                column_pointers.len()
            )));
        }
        if column_pointers[0] != 0 {
            return Err(Error::InvalidMatrix(format!(
                "First column pointer must be 0, got {}",
                column_pointers[0]
            )));
        }
        let nnz = column_pointers[columns];
        if nnz < 0 || nnz as usize != row_indices.len() || row_indices.len() != values.len() {
            return Err(Error::InvalidMatrix(format!(
                "Last column pointer {} does not match {} row indices and {} values",
                nnz,
                row_indices.len(),
                values.len()
            )));
        }

        for c in 0..columns {
            let (start, end) = (column_pointers[c], column_pointers[c + 1]);
            if start > end {
                return Err(Error::InvalidMatrix(format!(
                    "Column pointers decrease at column {}",
                    c
                )));
            }
            if end > nnz {
                return Err(Error::InvalidMatrix(format!(
                    "Column pointer {} at column {} exceeds {} entries",
                    end, c, nnz
                )));
            }
            let mut previous = -1;
            for &r in &row_indices[start as usize..end as usize] {
                if r < 0 || r as usize >= rows {
                    return Err(Error::InvalidMatrix(format!(
                        "Row index {} out of range in column {}",
                        r, c
                    )));
                }
                if r <= previous {
                    return Err(Error::InvalidMatrix(format!(
                        "Row indices not strictly increasing in column {}",
                        c
                    )));
                }
                previous = r;
            }
        }

        Ok(Self {
            rows,
            columns,
            column_pointers,
            row_indices,
            values,
        })
    }

    /// Assemble a matrix from `(row, col, value)` triplets.
    ///
    /// Duplicate entries at the same position are summed.
    pub fn from_triplets(rows: usize, columns: usize, triplets: &[(usize, usize, T)]) -> Result<Self> {
        let mut sorted: Vec<(usize, usize, T)> = Vec::with_capacity(triplets.len());
        for &(r, c, v) in triplets {
            if r >= rows || c >= columns {
                return Err(Error::InvalidMatrix(format!(
                    "Triplet ({}, {}) outside {}x{} matrix",
                    r, c, rows, columns
                )));
            }
            sorted.push((r, c, v));
        }
        sorted.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));

        let mut column_pointers = vec![0i32; columns + 1];
        let mut row_indices: Vec<i32> = Vec::with_capacity(sorted.len());
        let mut values: Vec<T> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(slot) = values.last_mut() {
                    *slot += v;
                }
                continue;
            }
            row_indices.push(r as i32);
            values.push(v);
            column_pointers[c + 1] += 1;
            last = Some((r, c));
        }
        for c in 0..columns {
            column_pointers[c + 1] += column_pointers[c];
        }

        Self::try_new(rows, columns, column_pointers, row_indices, values)
    }

    /// Convert a dense matrix, keeping entries that are not exactly zero.
    pub fn from_dense(dense: &DMatrix<T>) -> Self {
        let (rows, columns) = dense.shape();
        let mut column_pointers = Vec::with_capacity(columns + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        column_pointers.push(0);
        for c in 0..columns {
            for r in 0..rows {
                let v = dense[(r, c)];
                if !v.is_zero() {
                    row_indices.push(r as i32);
                    values.push(v);
                }
            }
            column_pointers.push(row_indices.len() as i32);
        }
        Self {
            rows,
            columns,
            column_pointers,
            row_indices,
            values,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.columns
    }

    /// Column pointer array (length `columns + 1`).
    pub fn column_pointers(&self) -> &[i32] {
        &self.column_pointers
    }

    /// Row index array (length `nnz`).
    pub fn row_indices(&self) -> &[i32] {
        &self.row_indices
    }

    /// Value array (length `nnz`).
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Iterate over `(row, column, value)` of every stored entry.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.columns).flat_map(move |c| {
            let range = self.column_pointers[c] as usize..self.column_pointers[c + 1] as usize;
            range.map(move |k| (self.row_indices[k] as usize, c, self.values[k]))
        })
    }

    /// Value at `(row, column)`, zero if not stored.
    pub fn get(&self, row: usize, column: usize) -> T {
        let start = self.column_pointers[column] as usize;
        let end = self.column_pointers[column + 1] as usize;
        match self.row_indices[start..end].binary_search(&(row as i32)) {
            Ok(k) => self.values[start + k],
            Err(_) => T::zero(),
        }
    }

    /// Whether `other` has exactly the same sparsity pattern.
    pub fn same_pattern(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.columns == other.columns
            && self.column_pointers == other.column_pointers
            && self.row_indices == other.row_indices
    }

    /// Build the transpose as a new structural copy.
    ///
    /// This is the only operation in the crate that copies matrix storage;
    /// it exists for backends that need compressed-row input.
    pub fn transpose(&self) -> Self {
        self.transpose_map(|v| v)
    }

    /// Build the conjugate transpose as a new structural copy.
    pub fn conjugate_transpose(&self) -> Self {
        self.transpose_map(|v| v.conjugate())
    }

    fn transpose_map(&self, f: impl Fn(T) -> T) -> Self {
        let mut counts = vec![0i32; self.rows + 1];
        for &r in &self.row_indices {
            counts[r as usize + 1] += 1;
        }
        for r in 0..self.rows {
            counts[r + 1] += counts[r];
        }
        let column_pointers = counts.clone();
        let mut next = counts;
        let mut row_indices = vec![0i32; self.nnz()];
        let mut values = vec![T::zero(); self.nnz()];

        // Columns are visited in order, so row indices of the result come out sorted.
        for (r, c, v) in self.iter() {
            let slot = next[r] as usize;
            row_indices[slot] = c as i32;
            values[slot] = f(v);
            next[r] += 1;
        }

        Self {
            rows: self.columns,
            columns: self.rows,
            column_pointers,
            row_indices,
            values,
        }
    }

    /// Keep only entries on or below the diagonal.
    pub fn lower_triangle(&self) -> Self {
        self.filter(|r, c| r >= c)
    }

    /// Keep only entries on or above the diagonal.
    pub fn upper_triangle(&self) -> Self {
        self.filter(|r, c| r <= c)
    }

    fn filter(&self, keep: impl Fn(usize, usize) -> bool) -> Self {
        let mut column_pointers = Vec::with_capacity(self.columns + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        column_pointers.push(0);
        for (r, c, v) in self.iter() {
            while column_pointers.len() <= c {
                column_pointers.push(row_indices.len() as i32);
            }
            if keep(r, c) {
                row_indices.push(r as i32);
                values.push(v);
            }
        }
        while column_pointers.len() <= self.columns {
            column_pointers.push(row_indices.len() as i32);
        }
        Self {
            rows: self.rows,
            columns: self.columns,
            column_pointers,
            row_indices,
            values,
        }
    }

    pub fn is_lower_triangular(&self) -> bool {
        self.iter().all(|(r, c, _)| r >= c)
    }

    pub fn is_upper_triangular(&self) -> bool {
        self.iter().all(|(r, c, _)| r <= c)
    }

    /// Compute `A * x`.
    pub fn multiply(&self, x: &[T]) -> Result<Vec<T>> {
        if x.len() != self.columns {
            return Err(Error::DimensionMismatch {
                expected: self.columns,
                actual: x.len(),
            });
        }
        let mut y = vec![T::zero(); self.rows];
        for (r, c, v) in self.iter() {
            y[r] += v * x[c];
        }
        Ok(y)
    }

    /// Compute `Aᵀ * x`.
    pub fn multiply_transpose(&self, x: &[T]) -> Result<Vec<T>> {
        if x.len() != self.rows {
            return Err(Error::DimensionMismatch {
                expected: self.rows,
                actual: x.len(),
            });
        }
        let mut y = vec![T::zero(); self.columns];
        for (r, c, v) in self.iter() {
            y[c] += v * x[r];
        }
        Ok(y)
    }

    /// Expand to a dense matrix.
    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.rows, self.columns);
        for (r, c, v) in self.iter() {
            dense[(r, c)] = v;
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn sample() -> CscMatrix<f64> {
        // [4 0 1]
        // [2 5 0]
        // [0 3 6]
        CscMatrix::from_triplets(
            3,
            3,
            &[
                (0, 0, 4.0),
                (1, 0, 2.0),
                (1, 1, 5.0),
                (2, 1, 3.0),
                (0, 2, 1.0),
                (2, 2, 6.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_triplets_layout() {
        let a = sample();
        assert_eq!(a.column_pointers(), &[0, 2, 4, 6]);
        assert_eq!(a.row_indices(), &[0, 1, 1, 2, 0, 2]);
        assert_eq!(a.values(), &[4.0, 2.0, 5.0, 3.0, 1.0, 6.0]);
        assert_eq!(a.nnz(), 6);
    }

    #[test]
    fn test_from_triplets_sums_duplicates() {
        let a = CscMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 0, 2.5), (1, 1, 1.0)]).unwrap();
        assert_eq!(a.nnz(), 2);
        assert_eq!(a.get(0, 0), 3.5);
    }

    #[test]
    fn test_try_new_rejects_bad_pointers() {
        let result = CscMatrix::<f64>::try_new(2, 2, vec![1, 1, 2], vec![0, 1], vec![1.0, 1.0]);
        assert!(matches!(result, Err(Error::InvalidMatrix(_))));

        let result = CscMatrix::<f64>::try_new(2, 2, vec![0, 2, 1], vec![0, 1], vec![1.0, 1.0]);
        assert!(matches!(result, Err(Error::InvalidMatrix(_))));

        let result = CscMatrix::<f64>::try_new(2, 2, vec![0, 1, 3], vec![0, 1], vec![1.0, 1.0]);
        assert!(matches!(result, Err(Error::InvalidMatrix(_))));
    }

    #[test]
    fn test_try_new_rejects_pointer_past_entries() {
        // Overshoots nnz in the middle, then comes back down to it.
        let result =
            CscMatrix::<f64>::try_new(3, 2, vec![0, 5, 3], vec![0, 1, 2], vec![1.0, 1.0, 1.0]);
        assert!(matches!(result, Err(Error::InvalidMatrix(_))));
    }

    #[test]
    fn test_try_new_rejects_bad_rows() {
        let out_of_range = CscMatrix::<f64>::try_new(2, 1, vec![0, 1], vec![2], vec![1.0]);
        assert!(matches!(out_of_range, Err(Error::InvalidMatrix(_))));

        let unsorted = CscMatrix::<f64>::try_new(2, 1, vec![0, 2], vec![1, 0], vec![1.0, 1.0]);
        assert!(matches!(unsorted, Err(Error::InvalidMatrix(_))));
    }

    #[test]
    fn test_transpose() {
        let a = sample();
        let t = a.transpose();
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(a.get(r, c), t.get(c, r));
            }
        }
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn test_conjugate_transpose() {
        let a = CscMatrix::from_triplets(
            2,
            2,
            &[(0, 1, Complex64::new(1.0, 2.0)), (1, 0, Complex64::new(3.0, -1.0))],
        )
        .unwrap();
        let h = a.conjugate_transpose();
        assert_eq!(h.get(1, 0), Complex64::new(1.0, -2.0));
        assert_eq!(h.get(0, 1), Complex64::new(3.0, 1.0));
    }

    #[test]
    fn test_multiply() {
        let a = sample();
        let y = a.multiply(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(y, vec![5.0, 7.0, 9.0]);
        let yt = a.multiply_transpose(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(yt, vec![6.0, 8.0, 7.0]);
        assert!(matches!(
            a.multiply(&[1.0]),
            Err(Error::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_triangles() {
        let a = sample();
        let lower = a.lower_triangle();
        let upper = a.upper_triangle();
        assert!(lower.is_lower_triangular());
        assert!(upper.is_upper_triangular());
        assert!(!a.is_lower_triangular());
        assert_eq!(lower.nnz(), 5);
        assert_eq!(upper.nnz(), 4);
        assert_eq!(lower.column_pointers().len(), 4);
    }

    #[test]
    fn test_dense_round_trip_and_pattern() {
        let a = sample();
        let dense = a.to_dense();
        assert_eq!(dense[(2, 1)], 3.0);
        let b = CscMatrix::from_dense(&dense);
        assert_eq!(a, b);

        let mut scaled = dense.clone();
        scaled *= 2.0;
        let c = CscMatrix::from_dense(&scaled);
        assert!(a.same_pattern(&c));
        assert!(!a.same_pattern(&a.lower_triangle()));
    }
}
