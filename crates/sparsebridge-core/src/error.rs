//! Error types shared by every sparsebridge backend.

use crate::kind::BackendKind;
use thiserror::Error;

/// Lifecycle state of a solver context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Constructed and initialized, no factors yet.
    Uninitialized,
    /// Numeric factors are available.
    Factorized,
    /// A non-retriable native failure occurred.
    Failed,
    /// Native handles and pins have been released.
    Disposed,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::Uninitialized => write!(f, "uninitialized"),
            ContextState::Factorized => write!(f, "factorized"),
            ContextState::Failed => write!(f, "failed"),
            ContextState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Errors raised by sparsebridge contexts.
///
/// Native status codes are carried unchanged so they can be looked up in the
/// owning library's documentation.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid option combination, detected before any native call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The matrix violates a storage invariant or a backend requirement.
    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    /// Dimension mismatch between matrix and vector.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The native library refused to set up its control structures.
    #[error("{backend} initialization failed with status {status}")]
    Initialization { backend: BackendKind, status: i32 },

    /// Symbolic or numeric factorization returned a non-success status.
    #[error("{backend} factorization failed with status {status}")]
    Factorization { backend: BackendKind, status: i32 },

    /// The solve phase returned a non-success status.
    #[error("{backend} solve failed with status {status}")]
    Solve { backend: BackendKind, status: i32 },

    /// The native library ran out of memory.
    #[error("{backend} ran out of memory (status {status})")]
    ResourceExhaustion { backend: BackendKind, status: i32 },

    /// An eigensolver reported a non-zero status.
    #[error("{backend} eigensolver failed with status {status}")]
    Eigen { backend: BackendKind, status: i32 },

    /// Factors were requested before a successful factorization.
    #[error("Factors are not available before factorization")]
    FactorsUnavailable,

    /// An operation was invoked out of lifecycle order.
    #[error("Cannot {operation} a {state} context")]
    Lifecycle {
        operation: &'static str,
        state: ContextState,
    },
}

impl Error {
    /// Whether the error leaves the context unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhaustion { .. } | Error::Initialization { .. } | Error::Lifecycle { .. }
        )
    }

    /// The raw native status, if the error came from a native call.
    pub fn status(&self) -> Option<i32> {
        match self {
            Error::Initialization { status, .. }
            | Error::Factorization { status, .. }
            | Error::Solve { status, .. }
            | Error::ResourceExhaustion { status, .. }
            | Error::Eigen { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for sparsebridge operations.
pub type Result<T> = std::result::Result<T, Error>;
