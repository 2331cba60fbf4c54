//! Context state machine, pin accounting and native handle ownership.

mod common;

use std::sync::Arc;

use common::{laplacian_2d, random_sparse, random_vector, relative_error, tridiagonal};
use nalgebra::DVector;
use sparsebridge_native::{reset_thread_stats, thread_stats};
use sparsebridge_solver::backend::{Cholmod, CxSparse, Pardiso, Umfpack};
use sparsebridge_solver::{
    BackendKind, ContextState, CscMatrix, DirectMethod, DirectOptions, DirectSolver, Error,
    SolverContext, Triangle,
};

fn same_pattern_with_values(a: &CscMatrix<f64>, values: Vec<f64>) -> CscMatrix<f64> {
    CscMatrix::try_new(
        a.rows(),
        a.columns(),
        a.column_pointers().to_vec(),
        a.row_indices().to_vec(),
        values,
    )
    .unwrap()
}

#[test]
fn test_dispose_is_idempotent_and_frees_once() {
    reset_thread_stats();
    let a = random_sparse(30, 3, 5);
    let b = random_vector(30, 1);
    {
        let mut ctx = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
        ctx.solve(&b).unwrap();
        ctx.dispose();
        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Disposed);
    }
    let stats = thread_stats();
    assert!(stats.allocated > 0);
    assert_eq!(stats.allocated, stats.freed);
    assert_eq!(stats.invalid_frees, 0);
}

#[test]
fn test_drop_releases_every_method() {
    let a = laplacian_2d(4);
    let b = random_vector(16, 2);
    for method in DirectMethod::ALL {
        reset_thread_stats();
        let options = if method.requires_symmetric() {
            DirectOptions::symmetric(Triangle::Full)
        } else {
            DirectOptions::default()
        };
        {
            let mut solver = DirectSolver::new(method, &a, &options).unwrap();
            solver.solve(&b).unwrap();
        }
        let stats = thread_stats();
        assert_eq!(stats.live(), 0, "{} leaked", method);
        assert_eq!(stats.invalid_frees, 0, "{} double free", method);
    }
}

#[test]
fn test_disposed_context_rejects_operations() {
    let a = tridiagonal(5, 3.0);
    let mut ctx = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
    ctx.dispose();
    let b = DVector::from_element(5, 1.0);
    assert!(matches!(
        ctx.solve(&b),
        Err(Error::Lifecycle { state: ContextState::Disposed, .. })
    ));
    assert!(matches!(
        ctx.factorize(),
        Err(Error::Lifecycle { state: ContextState::Disposed, .. })
    ));
    assert!(matches!(ctx.factors(), Err(Error::Lifecycle { .. })));
}

#[test]
fn test_solve_factorizes_on_demand() {
    let a = random_sparse(20, 3, 8);
    let b = random_vector(20, 4);

    let mut lazy = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
    assert_eq!(lazy.state(), ContextState::Uninitialized);
    let x_lazy = lazy.solve(&b).unwrap();
    assert_eq!(lazy.state(), ContextState::Factorized);

    let mut eager = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
    eager.factorize().unwrap();
    eager.factorize().unwrap();
    let x_eager = eager.solve(&b).unwrap();

    assert_eq!(x_lazy, x_eager);
    assert_eq!(lazy.stats(), eager.stats());
    assert_eq!(eager.stats().symbolic_runs, 1);
}

#[test]
fn test_refactor_reuses_symbolic_analysis() {
    let a = laplacian_2d(5);
    let scaled = same_pattern_with_values(&a, a.values().iter().map(|v| v * 2.0).collect());
    let expected = random_vector(25, 6);
    let b = DVector::from_vec(scaled.multiply(expected.as_slice()).unwrap());

    let mut umfpack = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
    umfpack.factorize().unwrap();
    umfpack.refactor(&scaled).unwrap();
    assert_eq!(umfpack.stats().symbolic_runs, 1);
    assert_eq!(umfpack.stats().numeric_runs, 2);
    assert!(relative_error(&umfpack.solve(&b).unwrap(), &expected) < 1e-10);

    let symmetric = DirectOptions::symmetric(Triangle::Full);
    let mut cholmod = SolverContext::new(&a, Cholmod::new(&symmetric)).unwrap();
    cholmod.factorize().unwrap();
    cholmod.refactor(&scaled).unwrap();
    assert_eq!(cholmod.stats().symbolic_runs, 1);
    assert!(relative_error(&cholmod.solve(&b).unwrap(), &expected) < 1e-10);

    let mut cxsparse = SolverContext::new(&a, CxSparse::cholesky(&symmetric)).unwrap();
    cxsparse.factorize().unwrap();
    cxsparse.refactor(&scaled).unwrap();
    assert_eq!(cxsparse.stats().symbolic_runs, 1);
    assert!(relative_error(&cxsparse.solve(&b).unwrap(), &expected) < 1e-10);

    let mut pardiso = SolverContext::new(&a, Pardiso::<f64>::new(&DirectOptions::default())).unwrap();
    pardiso.factorize().unwrap();
    pardiso.refactor(&scaled).unwrap();
    assert_eq!(pardiso.stats().symbolic_runs, 1);
    assert!(relative_error(&pardiso.solve(&b).unwrap(), &expected) < 1e-10);
}

#[test]
fn test_refactor_rejects_new_pattern() {
    let a = tridiagonal(6, 4.0);
    let other = laplacian_2d(2);
    let mut ctx = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
    ctx.factorize().unwrap();
    assert!(matches!(ctx.refactor(&other), Err(Error::InvalidMatrix(_))));
    assert_eq!(ctx.state(), ContextState::Factorized);
}

#[test]
fn test_pins_balance_after_success_and_failure() {
    let singular = CscMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 0, 1.0), (0, 1, 1.0), (1, 1, 1.0)])
        .unwrap();
    let ledger = {
        let mut ctx = SolverContext::new(&singular, Umfpack::new(&DirectOptions::default())).unwrap();
        // The matrix arrays stay pinned while the context lives.
        assert_eq!(ctx.pin_ledger().outstanding(), 3);
        assert!(ctx.solve(&DVector::from_element(2, 1.0)).is_err());
        assert_eq!(ctx.pin_ledger().outstanding(), 3);
        Arc::clone(ctx.pin_ledger())
    };
    assert_eq!(ledger.outstanding(), 0);

    let a = random_sparse(10, 2, 3);
    let ledger = {
        let mut ctx = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
        ctx.solve(&random_vector(10, 1)).unwrap();
        ctx.solve(&random_vector(10, 2)).unwrap();
        // Each solve pins at least b and x in a scoped set.
        assert!(ctx.pin_ledger().acquired() >= 3 + 4);
        assert_eq!(ctx.pin_ledger().outstanding(), 3);
        Arc::clone(ctx.pin_ledger())
    };
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn test_pins_balance_after_failed_native_solve() {
    let a = random_sparse(10, 2, 3);
    let ledger = {
        let mut ctx = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
        ctx.factorize().unwrap();
        let before = ctx.pin_ledger().acquired();

        // A non-finite right-hand side makes the native solve report a singular result.
        let mut b = random_vector(10, 4);
        b[3] = f64::NAN;
        let err = ctx.solve(&b).unwrap_err();
        assert!(matches!(err, Error::Solve { backend: BackendKind::Umfpack, status: 1 }));
        // b, x and the two UMFPACK workspaces were pinned and released.
        assert!(ctx.pin_ledger().acquired() >= before + 4);
        assert_eq!(ctx.pin_ledger().outstanding(), 3);
        assert_eq!(ctx.state(), ContextState::Factorized);

        let x = ctx.solve(&random_vector(10, 5)).unwrap();
        assert!(x.iter().all(|v| v.is_finite()));
        assert_eq!(ctx.pin_ledger().outstanding(), 3);
        Arc::clone(ctx.pin_ledger())
    };
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn test_factors_before_factorization() {
    let a = tridiagonal(4, 3.0);
    let mut ctx = SolverContext::new(&a, Umfpack::new(&DirectOptions::default())).unwrap();
    assert!(matches!(ctx.factors(), Err(Error::FactorsUnavailable)));
    ctx.factorize().unwrap();
    let factors = ctx.factors().unwrap();
    assert_eq!(factors.l.rows(), 4);
    assert_eq!(factors.p.len(), 4);
}

#[test]
fn test_retry_after_failed_factorization() {
    let singular = CscMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 0, 1.0), (0, 1, 1.0), (1, 1, 1.0)])
        .unwrap();
    let fixed = same_pattern_with_values(&singular, vec![2.0, 1.0, 1.0, 1.0]);
    let mut ctx = SolverContext::new(&singular, Umfpack::new(&DirectOptions::default())).unwrap();

    let err = ctx.factorize().unwrap_err();
    assert!(matches!(err, Error::Factorization { backend: BackendKind::Umfpack, .. }));
    assert!(err.status().is_some());
    assert!(!err.is_fatal());
    assert_eq!(ctx.state(), ContextState::Uninitialized);

    ctx.refactor(&fixed).unwrap();
    assert_eq!(ctx.state(), ContextState::Factorized);
    let x = ctx.solve(&DVector::from_vec(vec![3.0, 2.0])).unwrap();
    assert!((x - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-12);
}

#[test]
fn test_cholmod_rejects_indefinite_matrix() {
    let indefinite = CscMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 0, 2.0), (0, 1, 2.0), (1, 1, 1.0)])
        .unwrap();
    let mut ctx =
        SolverContext::new(&indefinite, Cholmod::new(&DirectOptions::symmetric(Triangle::Full))).unwrap();
    let err = ctx.factorize().unwrap_err();
    assert!(matches!(err, Error::Factorization { backend: BackendKind::Cholmod, .. }));
    assert_eq!(ctx.state(), ContextState::Uninitialized);
}

#[test]
fn test_construction_rejects_unsupported_configurations() {
    let rectangular = CscMatrix::from_triplets(2, 3, &[(0, 0, 1.0), (1, 2, 1.0)]).unwrap();
    assert!(matches!(
        SolverContext::new(&rectangular, Umfpack::new(&DirectOptions::default())),
        Err(Error::InvalidMatrix(_))
    ));

    let a = laplacian_2d(2);
    assert!(matches!(
        SolverContext::new(&a, Cholmod::new(&DirectOptions::default())),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        SolverContext::new(&a, Umfpack::new(&DirectOptions::symmetric(Triangle::Lower))),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_contexts_move_between_threads() {
    let a = random_sparse(15, 2, 12);
    let b = random_vector(15, 3);
    let handles: Vec<_> = DirectMethod::ALL
        .into_iter()
        .filter(|m| !m.requires_symmetric())
        .map(|method| {
            let a = a.clone();
            let b = b.clone();
            std::thread::spawn(move || {
                let mut solver = DirectSolver::new(method, &a, &DirectOptions::default()).unwrap();
                let x = solver.solve(&b).unwrap();
                DVector::from_vec(a.multiply(x.as_slice()).unwrap())
            })
        })
        .collect();
    for handle in handles {
        let ax = handle.join().unwrap();
        assert!(relative_error(&ax, &b) < 1e-10);
    }
}
