//! CXSparse calling convention.
//!
//! Unlike UMFPACK, CXSparse hands its factors back as plain structs: `sqr`
//! returns a symbolic analysis (`Css`), `lu`/`chol` return a numeric
//! factorization (`Csn`) whose `L` and `U` are ordinary compressed-column
//! matrices. Solving is left to the caller, who composes the permutation and
//! triangular-solve kernels exported here. `sfree`/`nfree` release the
//! structs and return null, the way `S = cs_sfree(S)` is written in C.
//!
//! Real entry points live in [`di`], complex ones in [`ci`].

use crate::engine::{CscParts, Scalar, dense_cholesky, dense_lu};
use crate::registry;
use num_complex::Complex64;
use std::os::raw::c_int;

/// Compressed-column matrix (`nz == -1`) as CXSparse lays it out.
#[repr(C)]
#[derive(Debug)]
pub struct Cs<T> {
    pub nzmax: c_int,
    pub m: c_int,
    pub n: c_int,
    pub p: *mut c_int,
    pub i: *mut c_int,
    pub x: *mut T,
    pub nz: c_int,
}

/// Symbolic analysis.
#[repr(C)]
#[derive(Debug)]
pub struct Css {
    pub pinv: *mut c_int,
    /// Fill-reducing column permutation, or null for the natural order.
    pub q: *mut c_int,
    pub parent: *mut c_int,
    pub cp: *mut c_int,
    pub leftmost: *mut c_int,
    pub m2: c_int,
    pub lnz: f64,
    pub unz: f64,
}

/// Numeric factorization.
#[repr(C)]
#[derive(Debug)]
pub struct Csn<T> {
    /// Unit lower factor for LU, lower Cholesky factor otherwise.
    pub l: *mut Cs<T>,
    /// Upper factor; null for Cholesky.
    pub u: *mut Cs<T>,
    /// Inverse row permutation; null for Cholesky.
    pub pinv: *mut c_int,
    pub b: *mut f64,
}

#[repr(C)]
struct OwnedCs<T> {
    header: Cs<T>,
    p: Vec<c_int>,
    i: Vec<c_int>,
    x: Vec<T>,
}

impl<T: Scalar> OwnedCs<T> {
    /// Column-major compressed copy of the entries selected by `keep`, in
    /// ascending row order.
    fn from_dense(
        dense: &nalgebra::DMatrix<T>,
        keep: impl Fn(usize, usize) -> bool,
    ) -> Box<Self> {
        let n = dense.ncols();
        let mut p = Vec::with_capacity(n + 1);
        let mut i = Vec::new();
        let mut x = Vec::new();
        p.push(0);
        for col in 0..n {
            for row in 0..dense.nrows() {
                let v = dense[(row, col)];
                if keep(row, col) && (row == col || !v.is_zero()) {
                    i.push(row as c_int);
                    x.push(v);
                }
            }
            p.push(i.len() as c_int);
        }
        let mut owned = Box::new(OwnedCs {
            header: Cs {
                nzmax: x.len() as c_int,
                m: dense.nrows() as c_int,
                n: n as c_int,
                p: std::ptr::null_mut(),
                i: std::ptr::null_mut(),
                x: std::ptr::null_mut(),
                nz: -1,
            },
            p,
            i,
            x,
        });
        owned.header.p = owned.p.as_mut_ptr();
        owned.header.i = owned.i.as_mut_ptr();
        owned.header.x = owned.x.as_mut_ptr();
        owned
    }
}

#[repr(C)]
struct OwnedCss {
    header: Css,
    parent: Vec<c_int>,
}

#[repr(C)]
struct OwnedCsn<T> {
    header: Csn<T>,
    l: Box<OwnedCs<T>>,
    u: Option<Box<OwnedCs<T>>>,
    pinv: Vec<c_int>,
}

trait Kinds {
    const SYMBOLIC: &'static str;
    const NUMERIC: &'static str;
}

impl Kinds for f64 {
    const SYMBOLIC: &'static str = "cs_di_symbolic";
    const NUMERIC: &'static str = "cs_di_numeric";
}

impl Kinds for Complex64 {
    const SYMBOLIC: &'static str = "cs_ci_symbolic";
    const NUMERIC: &'static str = "cs_ci_numeric";
}

/// Borrow the arrays of a compressed-column matrix.
unsafe fn view<'a, T: Scalar>(a: *const Cs<T>) -> Option<(usize, &'a [c_int], &'a [c_int], &'a [T])> {
    let a = unsafe { a.as_ref() }?;
    if a.nz != -1 || a.n < 0 || a.p.is_null() || a.i.is_null() || a.x.is_null() {
        return None;
    }
    let n = a.n as usize;
    let p = unsafe { std::slice::from_raw_parts(a.p, n + 1) };
    let nnz = p[n].max(0) as usize;
    let i = unsafe { std::slice::from_raw_parts(a.i, nnz) };
    let x = unsafe { std::slice::from_raw_parts(a.x, nnz) };
    Some((n, p, i, x))
}

unsafe fn read<T: Scalar>(a: *const Cs<T>) -> Option<CscParts<T>> {
    let a = unsafe { a.as_ref() }?;
    if a.nz != -1 || a.m < 0 || a.n < 0 {
        return None;
    }
    unsafe { CscParts::from_raw(a.m as usize, a.n as usize, a.p, a.i, a.x, 0) }
}

unsafe fn run_sqr<T: Scalar + Kinds>(order: c_int, a: *const Cs<T>, qr: c_int) -> *mut Css {
    let Some(a) = (unsafe { a.as_ref() }) else {
        return std::ptr::null_mut();
    };
    if qr != 0 || !(0..=3).contains(&order) || a.n < 0 || a.p.is_null() {
        return std::ptr::null_mut();
    }
    let n = a.n as usize;
    let nnz = unsafe { *a.p.add(n) }.max(0) as f64;
    if order != 0 {
        log::debug!("cs_sqr: ordering {} requested, natural order used", order);
    }
    let mut owned = Box::new(OwnedCss {
        header: Css {
            pinv: std::ptr::null_mut(),
            q: std::ptr::null_mut(),
            parent: std::ptr::null_mut(),
            cp: std::ptr::null_mut(),
            leftmost: std::ptr::null_mut(),
            m2: a.m,
            lnz: 4.0 * nnz + n as f64,
            unz: 4.0 * nnz + n as f64,
        },
        parent: vec![-1; n],
    });
    owned.header.parent = owned.parent.as_mut_ptr();
    registry::register(T::SYMBOLIC, *owned).cast::<Css>()
}

fn symbolic_is_live<T: Kinds>(s: *const Css) -> bool {
    registry::kind_of(s.cast_mut().cast()) == Some(T::SYMBOLIC)
}

unsafe fn run_lu<T: Scalar + Kinds>(a: *const Cs<T>, s: *const Css, tol: f64) -> *mut Csn<T> {
    if !symbolic_is_live::<T>(s) || !(0.0..=1.0).contains(&tol) {
        return std::ptr::null_mut();
    }
    let Some(parts) = (unsafe { read(a) }) else {
        return std::ptr::null_mut();
    };
    if parts.rows != parts.columns {
        return std::ptr::null_mut();
    }
    let Some((l, u, perm)) = dense_lu(&parts) else {
        return std::ptr::null_mut();
    };
    let mut pinv = vec![0 as c_int; perm.len()];
    for (k, &row) in perm.iter().enumerate() {
        pinv[row] = k as c_int;
    }
    let mut l = OwnedCs::from_dense(&l, |r, c| r >= c);
    let mut u = OwnedCs::from_dense(&u, |r, c| r <= c);
    let mut owned = OwnedCsn {
        header: Csn {
            l: &mut l.header,
            u: &mut u.header,
            pinv: std::ptr::null_mut(),
            b: std::ptr::null_mut(),
        },
        l,
        u: Some(u),
        pinv,
    };
    owned.header.pinv = owned.pinv.as_mut_ptr();
    registry::register(T::NUMERIC, owned).cast::<Csn<T>>()
}

unsafe fn run_chol<T: Scalar + Kinds>(a: *const Cs<T>, s: *const Css) -> *mut Csn<T> {
    if !symbolic_is_live::<T>(s) {
        return std::ptr::null_mut();
    }
    let Some(parts) = (unsafe { read(a) }) else {
        return std::ptr::null_mut();
    };
    if parts.rows != parts.columns {
        return std::ptr::null_mut();
    }
    let full = parts.expand_triangle(true, true);
    let Some(l) = dense_cholesky(&full) else {
        return std::ptr::null_mut();
    };
    let mut l = OwnedCs::from_dense(&l, |r, c| r >= c);
    let owned = OwnedCsn {
        header: Csn {
            l: &mut l.header,
            u: std::ptr::null_mut(),
            pinv: std::ptr::null_mut(),
            b: std::ptr::null_mut(),
        },
        l,
        u: None,
        pinv: Vec::new(),
    };
    registry::register(T::NUMERIC, owned).cast::<Csn<T>>()
}

unsafe fn run_pvec<T: Copy>(p: *const c_int, b: *const T, x: *mut T, n: c_int, inverse: bool) -> c_int {
    if b.is_null() || x.is_null() || n < 0 {
        return 0;
    }
    let n = n as usize;
    for k in 0..n {
        let pk = if p.is_null() { k } else { (unsafe { *p.add(k) }) as usize };
        unsafe {
            if inverse {
                *x.add(pk) = *b.add(k);
            } else {
                *x.add(k) = *b.add(pk);
            }
        }
    }
    1
}

unsafe fn run_lsolve<T: Scalar>(l: *const Cs<T>, x: *mut T, transpose: bool) -> c_int {
    let Some((n, lp, li, lx)) = (unsafe { view(l) }) else {
        return 0;
    };
    if x.is_null() {
        return 0;
    }
    let x = unsafe { std::slice::from_raw_parts_mut(x, n) };
    if !transpose {
        for j in 0..n {
            let start = lp[j] as usize;
            x[j] /= lx[start];
            for p in start + 1..lp[j + 1] as usize {
                let xj = x[j];
                x[li[p] as usize] -= lx[p] * xj;
            }
        }
    } else {
        for j in (0..n).rev() {
            let start = lp[j] as usize;
            for p in start + 1..lp[j + 1] as usize {
                let xi = x[li[p] as usize];
                x[j] -= lx[p].conjugate() * xi;
            }
            x[j] /= lx[start].conjugate();
        }
    }
    1
}

unsafe fn run_usolve<T: Scalar>(u: *const Cs<T>, x: *mut T, transpose: bool) -> c_int {
    let Some((n, up, ui, ux)) = (unsafe { view(u) }) else {
        return 0;
    };
    if x.is_null() {
        return 0;
    }
    let x = unsafe { std::slice::from_raw_parts_mut(x, n) };
    if !transpose {
        for j in (0..n).rev() {
            let last = up[j + 1] as usize - 1;
            x[j] /= ux[last];
            for p in up[j] as usize..last {
                let xj = x[j];
                x[ui[p] as usize] -= ux[p] * xj;
            }
        }
    } else {
        for j in 0..n {
            let last = up[j + 1] as usize - 1;
            for p in up[j] as usize..last {
                let xi = x[ui[p] as usize];
                x[j] -= ux[p].conjugate() * xi;
            }
            x[j] /= ux[last].conjugate();
        }
    }
    1
}

macro_rules! entry_points {
    ($prefix:ident, $t:ty) => {
        pub mod $prefix {
            use super::*;

            pub type Matrix = Cs<$t>;
            pub type Numeric = Csn<$t>;

            /// Symbolic analysis. `order` 0 is the natural ordering, 1-3 request
            /// AMD variants; `qr` must be 0.
            ///
            /// # Safety
            ///
            /// `a` must be null or a valid compressed-column matrix.
            pub unsafe extern "C" fn sqr(order: c_int, a: *const Matrix, qr: c_int) -> *mut Css {
                registry::guard(std::ptr::null_mut(), || unsafe { run_sqr::<$t>(order, a, qr) })
            }

            /// Sparse LU with partial pivoting. Returns null if `A` is singular.
            ///
            /// # Safety
            ///
            /// `a` must be a valid compressed-column matrix and `s` its analysis.
            pub unsafe extern "C" fn lu(a: *const Matrix, s: *const Css, tol: f64) -> *mut Numeric {
                registry::guard(std::ptr::null_mut(), || unsafe { run_lu::<$t>(a, s, tol) })
            }

            /// Cholesky factorization using the upper triangle of `A`.
            /// Returns null if `A` is not positive definite.
            ///
            /// # Safety
            ///
            /// `a` must be a valid compressed-column matrix and `s` its analysis.
            pub unsafe extern "C" fn chol(a: *const Matrix, s: *const Css) -> *mut Numeric {
                registry::guard(std::ptr::null_mut(), || unsafe { run_chol::<$t>(a, s) })
            }

            /// `x(p) = b`; a null `p` is the identity.
            ///
            /// # Safety
            ///
            /// `b`, `x` (and `p` if non-null) must hold `n` entries.
            pub unsafe extern "C" fn ipvec(p: *const c_int, b: *const $t, x: *mut $t, n: c_int) -> c_int {
                registry::guard(0, || unsafe { run_pvec(p, b, x, n, true) })
            }

            /// `x = b(p)`; a null `p` is the identity.
            ///
            /// # Safety
            ///
            /// `b`, `x` (and `p` if non-null) must hold `n` entries.
            pub unsafe extern "C" fn pvec(p: *const c_int, b: *const $t, x: *mut $t, n: c_int) -> c_int {
                registry::guard(0, || unsafe { run_pvec(p, b, x, n, false) })
            }

            /// `x = L \ x`, diagonal stored first in each column.
            ///
            /// # Safety
            ///
            /// `x` must hold `L.n` entries.
            pub unsafe extern "C" fn lsolve(l: *const Matrix, x: *mut $t) -> c_int {
                registry::guard(0, || unsafe { run_lsolve(l, x, false) })
            }

            /// `x = Lᴴ \ x`.
            ///
            /// # Safety
            ///
            /// `x` must hold `L.n` entries.
            pub unsafe extern "C" fn ltsolve(l: *const Matrix, x: *mut $t) -> c_int {
                registry::guard(0, || unsafe { run_lsolve(l, x, true) })
            }

            /// `x = U \ x`, diagonal stored last in each column.
            ///
            /// # Safety
            ///
            /// `x` must hold `U.n` entries.
            pub unsafe extern "C" fn usolve(u: *const Matrix, x: *mut $t) -> c_int {
                registry::guard(0, || unsafe { run_usolve(u, x, false) })
            }

            /// `x = Uᴴ \ x`.
            ///
            /// # Safety
            ///
            /// `x` must hold `U.n` entries.
            pub unsafe extern "C" fn utsolve(u: *const Matrix, x: *mut $t) -> c_int {
                registry::guard(0, || unsafe { run_usolve(u, x, true) })
            }

            /// Free a symbolic analysis. Always returns null.
            ///
            /// # Safety
            ///
            /// `s` must be null or a pointer returned by [`sqr`].
            pub unsafe extern "C" fn sfree(s: *mut Css) -> *mut Css {
                registry::guard(std::ptr::null_mut(), || unsafe {
                    registry::free::<OwnedCss>(s.cast(), <$t>::SYMBOLIC);
                    std::ptr::null_mut()
                })
            }

            /// Free a numeric factorization. Always returns null.
            ///
            /// # Safety
            ///
            /// `n` must be null or a pointer returned by [`lu`] or [`chol`].
            pub unsafe extern "C" fn nfree(n: *mut Numeric) -> *mut Numeric {
                registry::guard(std::ptr::null_mut(), || unsafe {
                    registry::free::<OwnedCsn<$t>>(n.cast(), <$t>::NUMERIC);
                    std::ptr::null_mut()
                })
            }
        }
    };
}

entry_points!(di, f64);
entry_points!(ci, Complex64);
