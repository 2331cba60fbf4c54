//! Reference native layer for sparsebridge.
//!
//! Each module exposes the C calling convention of one native sparse library
//! as `unsafe extern "C"` functions: opaque handles, status codes, raw
//! compressed-column arrays and caller-owned output buffers. The numerics
//! are carried by faer (sparse LU/Cholesky) and nalgebra (dense eigen and
//! reference factorizations).
//!
//! Every object handed out through an opaque pointer is tracked in
//! [`registry`], so double frees and leaks are observable from tests through
//! [`thread_stats`].
//!
//! | Module       | Convention                                    |
//! |--------------|-----------------------------------------------|
//! | [`umfpack`]  | symbolic/numeric LU objects, `A`/`Aᵀ`/`Aᴴ` solves |
//! | [`cholmod`]  | common workspace, sparse/dense descriptors     |
//! | [`cxsparse`] | `cs_*` structs, explicit triangular kernels    |
//! | [`superlu`]  | options struct, `gstrf`/`gstrs`                |
//! | [`pardiso`]  | 64-slot handle, phases, `iparm` array          |
//! | [`arpack`]   | `which` selectors, shift-invert, result structs |
//! | [`feast`]    | interval search, one-based CSR                 |

mod engine;

pub mod arpack;
pub mod cholmod;
pub mod cxsparse;
pub mod feast;
pub mod pardiso;
pub mod registry;
pub mod superlu;
pub mod umfpack;

pub use registry::{AllocationStats, live_objects, reset_thread_stats, thread_stats};
