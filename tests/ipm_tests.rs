//! Integration tests for the interior-point QP solver.

use approx::assert_relative_eq;
use sparseqp::{solve_qp, CsrMatrix, InsertMode, IpmSettings, QpProblem, SolveStatus};

fn identity(n: usize) -> CsrMatrix {
    let mut a = CsrMatrix::with_uniform_nnz(n, n, 1).unwrap();
    for i in 0..n {
        a.set_value(i, i, 1.0, InsertMode::Insert).unwrap();
    }
    a.assembly_end();
    a
}

fn row_of_ones(n: usize) -> CsrMatrix {
    let mut a = CsrMatrix::with_uniform_nnz(1, n, n).unwrap();
    for j in 0..n {
        a.set_value(0, j, 1.0, InsertMode::Insert).unwrap();
    }
    a.assembly_end();
    a
}

/// minimize sum(x) + 0.5 |x|^2  s.t.  sum(x) = 1, x >= 0.
///
/// The optimum is x = (1/3, 1/3, 1/3) with equality multiplier -4/3 and
/// inactive inequalities.
fn simplex_qp() -> QpProblem {
    QpProblem {
        h: identity(3),
        d: vec![1.0; 3],
        a_eq: Some(row_of_ones(3)),
        b_eq: vec![1.0],
        a_in: Some(identity(3)),
        b_in: vec![0.0; 3],
    }
}

#[test]
fn simplex_qp_converges_to_the_analytic_optimum() {
    let prob = simplex_qp();
    let settings = IpmSettings::default();
    let result = solve_qp(&prob, &[1.0 / 3.0; 3], &settings).unwrap();

    assert!(result.status.is_converged(), "status: {}", result.status);
    assert!(result.info.phi < settings.fatol);
    for xi in &result.x {
        assert_relative_eq!(*xi, 1.0 / 3.0, epsilon = 1e-3);
    }
    assert_relative_eq!(result.lambda_eq[0], -4.0 / 3.0, epsilon = 1e-2);
    // Strict interiority held to the end.
    for (y, l) in result.slack.iter().zip(&result.lambda_in) {
        assert!(*y > 0.0);
        assert!(*l > 0.0);
    }
    // objective = 1 + 0.5 * 1/3
    assert_relative_eq!(result.objective, 7.0 / 6.0, epsilon = 1e-3);
    assert!(result.info.iterations <= 50);
}

#[test]
fn active_inequality_binds() {
    // minimize 0.5 |x|^2 - 2 x1  s.t.  x >= 1.
    // Unconstrained minimum (2, 0); the bound binds only on x2.
    let prob = QpProblem {
        h: identity(2),
        d: vec![-2.0, 0.0],
        a_eq: None,
        b_eq: vec![],
        a_in: Some(identity(2)),
        b_in: vec![1.0; 2],
    };
    let result = solve_qp(&prob, &[3.0, 3.0], &IpmSettings::default()).unwrap();
    assert!(result.status.is_converged(), "status: {}", result.status);
    assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-2);
    assert_relative_eq!(result.x[1], 1.0, epsilon = 1e-2);
    // Multiplier of the active bound: rd = x2 + 0 - lambda = 0 at x2 = 1.
    assert_relative_eq!(result.lambda_in[1], 1.0, epsilon = 1e-2);
    assert!(result.lambda_in[0].abs() < 1e-2);
}

#[test]
fn unattainable_decrease_ends_in_line_search_failure() {
    // A decrease requirement no trial can meet: the search must exhaust its
    // trials, restore the iterate, and report a zero step.
    let prob = simplex_qp();
    let settings = IpmSettings {
        merit_decrease: 1.0e-9,
        ..IpmSettings::default()
    };
    let result = solve_qp(&prob, &[1.0 / 3.0; 3], &settings).unwrap();
    assert_eq!(result.status, SolveStatus::LineSearchFailure);
    assert_eq!(result.info.step_length, 0.0);
    // The restored iterate is the starting point.
    for xi in &result.x {
        assert_relative_eq!(*xi, 1.0 / 3.0, epsilon = 1e-14);
    }
}

#[test]
fn iteration_budget_is_honored() {
    let prob = simplex_qp();
    let settings = IpmSettings {
        max_iterations: 0,
        ..IpmSettings::default()
    };
    let result = solve_qp(&prob, &[1.0 / 3.0; 3], &settings).unwrap();
    assert_eq!(result.status, SolveStatus::MaxIterationsReached);
    assert_eq!(result.info.iterations, 0);
}

#[test]
fn function_evaluations_are_counted() {
    let prob = simplex_qp();
    let result = solve_qp(&prob, &[1.0 / 3.0; 3], &IpmSettings::default()).unwrap();
    // One evaluation up front, at least one per line search.
    assert!(result.info.func_evals > result.info.iterations);
    assert!(result.info.func_evals <= 4000);
}

#[test]
fn mismatched_start_vector_is_rejected() {
    let prob = simplex_qp();
    assert!(solve_qp(&prob, &[0.5, 0.5], &IpmSettings::default()).is_err());
}
