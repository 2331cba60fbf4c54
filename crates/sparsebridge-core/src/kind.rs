//! Native library identifiers.

use serde::{Deserialize, Serialize};

/// The native libraries a context can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// UMFPACK unsymmetric multifrontal LU.
    Umfpack,
    /// CHOLMOD supernodal Cholesky.
    Cholmod,
    /// CXSparse (LU and Cholesky).
    CxSparse,
    /// SuperLU supernodal LU.
    SuperLu,
    /// Intel MKL PARDISO.
    Pardiso,
    /// ARPACK implicitly restarted Arnoldi/Lanczos.
    Arpack,
    /// FEAST contour-integral eigensolver.
    Feast,
}

impl BackendKind {
    /// Whether this library computes eigenpairs rather than solving linear systems.
    pub fn is_eigensolver(&self) -> bool {
        matches!(self, BackendKind::Arpack | BackendKind::Feast)
    }

    /// Whether the library only factors symmetric (Hermitian) matrices.
    pub fn is_symmetric_only(&self) -> bool {
        matches!(self, BackendKind::Cholmod)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Umfpack => write!(f, "UMFPACK"),
            BackendKind::Cholmod => write!(f, "CHOLMOD"),
            BackendKind::CxSparse => write!(f, "CXSparse"),
            BackendKind::SuperLu => write!(f, "SuperLU"),
            BackendKind::Pardiso => write!(f, "PARDISO"),
            BackendKind::Arpack => write!(f, "ARPACK"),
            BackendKind::Feast => write!(f, "FEAST"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(BackendKind::Umfpack.to_string(), "UMFPACK");
        assert_eq!(BackendKind::SuperLu.to_string(), "SuperLU");
        assert_eq!(BackendKind::CxSparse.to_string(), "CXSparse");
    }

    #[test]
    fn test_capabilities() {
        assert!(BackendKind::Arpack.is_eigensolver());
        assert!(BackendKind::Feast.is_eigensolver());
        assert!(!BackendKind::Pardiso.is_eigensolver());
        assert!(BackendKind::Cholmod.is_symmetric_only());
        assert!(!BackendKind::Umfpack.is_symmetric_only());
    }

    #[test]
    fn test_serde_round_trip_name() {
        let json = serde_json::to_string(&BackendKind::Cholmod).unwrap();
        assert_eq!(json, "\"Cholmod\"");
    }
}
