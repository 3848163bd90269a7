//! Primal-dual interior-point solver for convex QPs.
//!
//! Mehrotra predictor-corrector iteration on the perturbed KKT conditions,
//! with a merit line search guarding each step. The KKT system is solved
//! iteratively; its structure is assembled once and only the complementarity
//! diagonals change between iterations.

pub mod kkt;
pub mod monitor;
pub mod step;

use crate::error::{Error, Result};
use crate::linalg::solver::{KrylovGmres, LinearSolver};
use crate::problem::{IpmSettings, QpProblem, SolveInfo, SolveResult, SolveStatus};
use kkt::{evaluate, IpmState, KktResiduals, KktSystem};
use monitor::ConvergenceMonitor;
use step::{compute_step, merit_line_search};

/// Solves the QP from the starting point `x0`.
///
/// The initial inequality slacks are `A_in x0 - b_in` and must be strictly
/// positive; all multipliers start at one. A line-search failure or an
/// exhausted budget is reported through [`SolveStatus`], with the best
/// iterate still returned.
pub fn solve_qp(prob: &QpProblem, x0: &[f64], settings: &IpmSettings) -> Result<SolveResult> {
    prob.validate()?;
    let n = prob.num_vars();
    let me = prob.num_eq();
    let mi = prob.num_in();
    if x0.len() != n {
        return Err(Error::invalid_arg(format!(
            "starting point has {} entries, expected {}",
            x0.len(),
            n
        )));
    }

    let mut yi = vec![0.0; mi];
    if let Some(a_in) = &prob.a_in {
        a_in.mult(x0, &mut yi)?;
        for (y, b) in yi.iter_mut().zip(&prob.b_in) {
            *y -= b;
        }
        if yi.iter().any(|y| *y <= 0.0) {
            return Err(Error::invalid_arg(
                "starting point is not strictly interior to the inequalities",
            ));
        }
    }
    let mut state = IpmState {
        x: x0.to_vec(),
        lambda_eq: vec![1.0; me],
        yi,
        lambda_in: vec![1.0; mi],
    };

    let mut kkt = KktSystem::new(prob)?;
    let mut solver = KrylovGmres::new(settings.kkt.clone());
    solver.prepare(kkt.matrix())?;

    let mut res = KktResiduals::new(n, me, mi);
    evaluate(prob, &state, &mut res)?;
    let mut func_evals = 1usize;
    let mut monitor = ConvergenceMonitor::new(settings);

    if settings.verbose {
        println!(
            "{:>4}  {:>13}  {:>12}  {:>10}  {:>9}",
            "iter", "objective", "merit", "mu", "step"
        );
        println!(
            "{:>4}  {:>13.6e}  {:>12.6e}  {:>10.3e}  {:>9}",
            0, res.objective, res.phi, res.mu, "-"
        );
    }

    let mut iteration = 0usize;
    let mut last_step = 0.0f64;
    let status = loop {
        if let Some(status) = monitor.check(iteration, func_evals, res.phi) {
            break status;
        }
        let dir = compute_step(&mut kkt, &mut solver, &state, &res, settings.tau_min)?;
        let ls = merit_line_search(prob, &mut state, &mut res, &dir, settings, &mut func_evals)?;
        last_step = ls.alpha;
        iteration += 1;
        if settings.verbose {
            println!(
                "{:>4}  {:>13.6e}  {:>12.6e}  {:>10.3e}  {:>9.3e}",
                iteration, res.objective, res.phi, res.mu, ls.alpha
            );
        }
        if !ls.accepted {
            log::debug!(
                "line search exhausted {} trials at iteration {}",
                ls.trials,
                iteration
            );
            break SolveStatus::LineSearchFailure;
        }
    };

    log::debug!(
        "interior-point solve finished: {} after {} iterations, {} evaluations, merit {:.3e}",
        status,
        iteration,
        func_evals,
        res.phi
    );

    Ok(SolveResult {
        x: state.x,
        lambda_eq: state.lambda_eq,
        lambda_in: state.lambda_in,
        slack: state.yi,
        objective: res.objective,
        status,
        info: SolveInfo {
            iterations: iteration,
            func_evals,
            phi: res.phi,
            mu: res.mu,
            step_length: last_step,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::csr::{CsrMatrix, InsertMode};
    use approx::assert_relative_eq;

    fn identity(n: usize) -> CsrMatrix {
        let mut a = CsrMatrix::with_uniform_nnz(n, n, 1).unwrap();
        for i in 0..n {
            a.set_value(i, i, 1.0, InsertMode::Insert).unwrap();
        }
        a.assembly_end();
        a
    }

    #[test]
    fn equality_only_qp_solves_in_one_newton_step() {
        // minimize 0.5 |x|^2 - x_1  s.t.  x_1 + x_2 = 1
        let mut a_eq = CsrMatrix::with_uniform_nnz(1, 2, 2).unwrap();
        a_eq.set_value(0, 0, 1.0, InsertMode::Insert).unwrap();
        a_eq.set_value(0, 1, 1.0, InsertMode::Insert).unwrap();
        a_eq.assembly_end();
        let prob = QpProblem {
            h: identity(2),
            d: vec![-1.0, 0.0],
            a_eq: Some(a_eq),
            b_eq: vec![1.0],
            a_in: None,
            b_in: vec![],
        };
        let result = solve_qp(&prob, &[0.0, 0.0], &IpmSettings::default()).unwrap();
        assert!(result.status.is_converged());
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.x[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn infeasible_start_is_rejected() {
        let prob = QpProblem {
            h: identity(2),
            d: vec![0.0; 2],
            a_eq: None,
            b_eq: vec![],
            a_in: Some(identity(2)),
            b_in: vec![0.0; 2],
        };
        // x = 0 sits on the boundary, not strictly inside.
        assert!(matches!(
            solve_qp(&prob, &[0.0, 0.0], &IpmSettings::default()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
