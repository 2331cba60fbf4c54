//! Raw descriptors for data passed across the native boundary.
//!
//! Descriptors are only built from pinned storage, so the addresses they carry
//! stay valid for as long as the pin set that produced them is alive.

use crate::element::Element;
use crate::pinned::PinnedBuffers;
use crate::sparse::CscMatrix;
use std::os::raw::c_int;

/// Native view of a compressed-column matrix.
///
/// Holds the addresses of the matrix's own arrays; nothing is copied.
#[derive(Debug, Clone, Copy)]
pub struct NativeMatrix<T> {
    pub rows: c_int,
    pub columns: c_int,
    pub nnz: c_int,
    pub column_pointers: *const c_int,
    pub row_indices: *const c_int,
    pub values: *const T,
}

// The descriptor is only dereferenced by native calls made from the owning
// context, which is itself Send but not Sync.
unsafe impl<T: Send> Send for NativeMatrix<T> {}

impl<T: Element> NativeMatrix<T> {
    /// Pin the three arrays of `matrix` and describe them.
    pub fn pin<'a>(matrix: &'a CscMatrix<T>, pins: &mut PinnedBuffers<'a>) -> Self {
        let column_pointers = pins.pin(matrix.column_pointers());
        let row_indices = pins.pin(matrix.row_indices());
        let values = pins.pin(matrix.values());
        log::trace!(
            "pinned {}x{} {} matrix ({} nonzeros)",
            matrix.rows(),
            matrix.columns(),
            T::NAME,
            matrix.nnz()
        );
        Self {
            rows: matrix.rows() as c_int,
            columns: matrix.columns() as c_int,
            nnz: matrix.nnz() as c_int,
            column_pointers,
            row_indices,
            values,
        }
    }

    /// Values as the `f64` array native code expects (interleaved for complex).
    pub fn scalars(&self) -> *const f64 {
        self.values.cast::<f64>()
    }

    /// Dimension of a square matrix.
    pub fn order(&self) -> usize {
        self.rows as usize
    }
}

/// Native view of a read-only column-major dense block.
#[derive(Debug, Clone, Copy)]
pub struct NativeDense<T> {
    pub rows: usize,
    pub columns: usize,
    pub data: *const T,
}

impl<T: Element> NativeDense<T> {
    /// Pin `data`, interpreted as `rows x (len / rows)` column-major.
    pub fn pin<'a>(data: &'a [T], rows: usize, pins: &mut PinnedBuffers<'a>) -> Self {
        let columns = if rows == 0 { 0 } else { data.len() / rows };
        Self {
            rows,
            columns,
            data: pins.pin(data),
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalars(&self) -> *const f64 {
        self.data.cast::<f64>()
    }

    /// Address of the first element of column `j`.
    pub fn column(&self, j: usize) -> *const T {
        self.data.wrapping_add(j * self.rows)
    }

    /// Borrow the pinned block.
    ///
    /// # Safety
    ///
    /// The pin set that produced this descriptor must still be alive.
    pub unsafe fn as_slice<'b>(&self) -> &'b [T] {
        unsafe { std::slice::from_raw_parts(self.data, self.len()) }
    }
}

/// Native view of a writable column-major dense block.
#[derive(Debug)]
pub struct NativeDenseMut<T> {
    pub rows: usize,
    pub columns: usize,
    pub data: *mut T,
}

impl<T: Element> NativeDenseMut<T> {
    /// Pin `data`, interpreted as `rows x (len / rows)` column-major.
    pub fn pin<'a>(data: &'a mut [T], rows: usize, pins: &mut PinnedBuffers<'a>) -> Self {
        let columns = if rows == 0 { 0 } else { data.len() / rows };
        Self {
            rows,
            columns,
            data: pins.pin_mut(data),
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalars(&mut self) -> *mut f64 {
        self.data.cast::<f64>()
    }

    /// Address of the first element of column `j`.
    pub fn column(&mut self, j: usize) -> *mut T {
        self.data.wrapping_add(j * self.rows)
    }

    /// Borrow the pinned block mutably.
    ///
    /// # Safety
    ///
    /// The pin set that produced this descriptor must still be alive and no
    /// other reference to the block may exist.
    pub unsafe fn as_mut_slice<'b>(&mut self) -> &'b mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinned::{PinLedger, PinnedBuffers, with_pinned};
    use num_complex::Complex64;

    #[test]
    fn test_native_matrix_points_at_matrix_storage() {
        let a = CscMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 2.0), (0, 1, 3.0)]).unwrap();
        let ledger = PinLedger::new();
        with_pinned(&ledger, |pins| {
            let native = NativeMatrix::pin(&a, pins);
            assert_eq!(native.rows, 2);
            assert_eq!(native.nnz, 3);
            assert_eq!(native.column_pointers, a.column_pointers().as_ptr());
            assert_eq!(native.row_indices, a.row_indices().as_ptr());
            assert_eq!(native.values, a.values().as_ptr());
            assert_eq!(pins.len(), 3);
        });
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_dense_descriptors() {
        let rhs = vec![Complex64::new(1.0, -1.0); 6];
        let mut out = vec![Complex64::new(0.0, 0.0); 6];
        let ledger = PinLedger::new();
        {
            let mut pins = PinnedBuffers::new(ledger.clone());
            let b = NativeDense::pin(&rhs, 3, &mut pins);
            let mut x = NativeDenseMut::pin(&mut out, 3, &mut pins);
            assert_eq!(b.columns, 2);
            assert_eq!(x.len(), 6);
            assert_eq!(b.column(1), rhs[3..].as_ptr());
            let raw = unsafe { x.as_mut_slice() };
            raw.copy_from_slice(unsafe { b.as_slice() });
        }
        assert_eq!(out[4], Complex64::new(1.0, -1.0));
        assert_eq!(ledger.outstanding(), 0);
    }
}
