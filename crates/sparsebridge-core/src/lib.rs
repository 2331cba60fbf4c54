//! Core types for sparsebridge.
//!
//! This crate owns everything that crosses the managed/native boundary but is
//! independent of any particular library:
//!
//! - [`CscMatrix`]: validated compressed-column storage with `c_int` indices
//! - [`PinnedBuffers`] / [`PinLedger`]: scoped pinning of slices passed to native code
//! - [`NativeMatrix`] / [`NativeDense`]: raw descriptors built from pinned storage
//! - [`NativeHandle`]: owned native object released exactly once
//! - [`Error`]: the error taxonomy shared by every backend

pub mod element;
pub mod error;
pub mod handle;
pub mod kind;
pub mod native;
pub mod pinned;
pub mod sparse;

pub use element::Element;
pub use error::{ContextState, Error, Result};
pub use handle::NativeHandle;
pub use kind::BackendKind;
pub use native::{NativeDense, NativeDenseMut, NativeMatrix};
pub use pinned::{PinLedger, PinnedBuffers, with_pinned};
pub use sparse::CscMatrix;

pub use num_complex::Complex64;
