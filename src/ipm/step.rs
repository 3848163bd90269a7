//! Predictor-corrector step computation and the merit line search.
//!
//! One step is the Mehrotra sequence: solve the affine system, measure how
//! far it can go before a nonnegativity bound, derive the centering
//! parameter `sigma = (mu_aff / mu)^3`, solve the corrected system, and
//! scale the result by the fraction-to-boundary factor. The merit line
//! search then backtracks geometrically from that step, accepting the first
//! trial whose merit value shows sufficient decrease.

use crate::error::Result;
use crate::ipm::kkt::{evaluate, IpmState, KktResiduals, KktSystem};
use crate::linalg::solver::LinearSolver;
use crate::problem::{IpmSettings, QpProblem};

/// A scaled search direction in all four unknown blocks.
#[derive(Debug, Clone)]
pub struct StepDirection {
    pub dx: Vec<f64>,
    pub dlambda_eq: Vec<f64>,
    pub dyi: Vec<f64>,
    pub dlambda_in: Vec<f64>,
    /// Fraction-to-boundary scaled step length.
    pub alpha: f64,
    /// Centering parameter used by the corrector.
    pub sigma: f64,
}

/// Largest `alpha` in `[0, 1]` keeping `v + alpha * dv >= 0` elementwise.
pub fn step_to_boundary(v: &[f64], dv: &[f64]) -> f64 {
    let mut alpha = 1.0f64;
    for (vi, di) in v.iter().zip(dv) {
        if *di < 0.0 {
            alpha = alpha.min(-vi / di);
        }
    }
    alpha
}

fn split(
    sol: &[f64],
    n: usize,
    me: usize,
    mi: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    (
        sol[..n].to_vec(),
        sol[n..n + me].to_vec(),
        sol[n + me..n + me + mi].to_vec(),
        sol[n + me + mi..].to_vec(),
    )
}

/// Computes the predictor-corrector direction at the current iterate.
pub fn compute_step(
    kkt: &mut KktSystem,
    solver: &mut dyn LinearSolver,
    state: &IpmState,
    res: &KktResiduals,
    tau_min: f64,
) -> Result<StepDirection> {
    let n = state.x.len();
    let me = state.lambda_eq.len();
    let mi = state.yi.len();

    kkt.refresh(state)?;
    let mut sol = vec![0.0f64; kkt.dim()];
    {
        let rhs = kkt.affine_rhs(res).to_vec();
        solver.solve(kkt.matrix(), &rhs, &mut sol)?;
    }
    let (dx, dle, dyi, dli) = split(&sol, n, me, mi);

    if mi == 0 {
        // Pure Newton step; nothing to center.
        return Ok(StepDirection {
            dx,
            dlambda_eq: dle,
            dyi,
            dlambda_in: dli,
            alpha: 1.0,
            sigma: 0.0,
        });
    }

    let alpha_aff = step_to_boundary(&state.yi, &dyi).min(step_to_boundary(&state.lambda_in, &dli));
    let mi_f = mi as f64;
    let mu_aff = state
        .yi
        .iter()
        .zip(&dyi)
        .zip(state.lambda_in.iter().zip(&dli))
        .map(|((y, dy), (l, dl))| (y + alpha_aff * dy) * (l + alpha_aff * dl))
        .sum::<f64>()
        / mi_f;
    let sigma = if res.mu > 0.0 {
        let ratio = (mu_aff / res.mu).max(0.0);
        ratio * ratio * ratio
    } else {
        0.0
    };

    for s in sol.iter_mut() {
        *s = 0.0;
    }
    {
        let rhs = kkt
            .corrector_rhs(res, &dyi, &dli, sigma * res.mu)
            .to_vec();
        solver.solve(kkt.matrix(), &rhs, &mut sol)?;
    }
    let (dx, dle, dyi, dli) = split(&sol, n, me, mi);

    let alpha_max =
        step_to_boundary(&state.yi, &dyi).min(step_to_boundary(&state.lambda_in, &dli));
    let tau = (1.0 - sigma * res.mu).clamp(tau_min, 1.0);
    let alpha = (tau * alpha_max).min(1.0);

    Ok(StepDirection {
        dx,
        dlambda_eq: dle,
        dyi,
        dlambda_in: dli,
        alpha,
        sigma,
    })
}

/// Line search verdict. A rejected search leaves the iterate untouched.
#[derive(Debug, Clone, Copy)]
pub struct LineSearchOutcome {
    pub accepted: bool,
    pub alpha: f64,
    pub trials: usize,
}

/// Backtracking merit line search.
///
/// Trial step lengths shrink geometrically from `dir.alpha`; the first
/// trial whose merit value is at most `merit_decrease` times the current
/// one is committed into `state` and `res`. Every trial costs one function
/// evaluation. On exhaustion the incoming iterate and residuals are
/// restored unchanged.
pub fn merit_line_search(
    prob: &QpProblem,
    state: &mut IpmState,
    res: &mut KktResiduals,
    dir: &StepDirection,
    settings: &IpmSettings,
    func_evals: &mut usize,
) -> Result<LineSearchOutcome> {
    let saved_state = state.clone();
    let saved_res = res.clone();
    let phi0 = res.phi;

    let mut alpha = dir.alpha;
    for t in 0..settings.line_search_trials.max(1) {
        for (xi, (s, d)) in state.x.iter_mut().zip(saved_state.x.iter().zip(&dir.dx)) {
            *xi = s + alpha * d;
        }
        for (li, (s, d)) in state
            .lambda_eq
            .iter_mut()
            .zip(saved_state.lambda_eq.iter().zip(&dir.dlambda_eq))
        {
            *li = s + alpha * d;
        }
        for (yi, (s, d)) in state.yi.iter_mut().zip(saved_state.yi.iter().zip(&dir.dyi)) {
            *yi = s + alpha * d;
        }
        for (li, (s, d)) in state
            .lambda_in
            .iter_mut()
            .zip(saved_state.lambda_in.iter().zip(&dir.dlambda_in))
        {
            *li = s + alpha * d;
        }
        evaluate(prob, state, res)?;
        *func_evals += 1;
        if res.phi.is_finite() && res.phi <= settings.merit_decrease * phi0 {
            return Ok(LineSearchOutcome {
                accepted: true,
                alpha,
                trials: t + 1,
            });
        }
        alpha *= settings.ls_backtrack;
    }

    *state = saved_state;
    *res = saved_res;
    Ok(LineSearchOutcome {
        accepted: false,
        alpha: 0.0,
        trials: settings.line_search_trials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn boundary_ratio_test() {
        assert_relative_eq!(step_to_boundary(&[1.0, 2.0], &[0.5, 1.0]), 1.0);
        assert_relative_eq!(step_to_boundary(&[1.0, 2.0], &[-2.0, -1.0]), 0.5);
        assert_relative_eq!(step_to_boundary(&[0.1], &[-1.0]), 0.1);
        assert_relative_eq!(step_to_boundary(&[], &[]), 1.0);
    }

    #[test]
    fn line_search_restores_on_failure() {
        use crate::ipm::kkt::KktResiduals;
        use crate::linalg::csr::{CsrMatrix, InsertMode};

        // Unconstrained strictly convex problem; an ascent direction can
        // never satisfy the decrease test.
        let mut h = CsrMatrix::with_uniform_nnz(2, 2, 1).unwrap();
        h.set_value(0, 0, 1.0, InsertMode::Insert).unwrap();
        h.set_value(1, 1, 1.0, InsertMode::Insert).unwrap();
        h.assembly_end();
        let prob = QpProblem {
            h,
            d: vec![1.0, 1.0],
            a_eq: None,
            b_eq: vec![],
            a_in: None,
            b_in: vec![],
        };
        let mut state = IpmState {
            x: vec![1.0, 1.0],
            lambda_eq: vec![],
            yi: vec![],
            lambda_in: vec![],
        };
        let mut res = KktResiduals::new(2, 0, 0);
        evaluate(&prob, &state, &mut res).unwrap();
        let phi0 = res.phi;
        // rd = x + 1 = (2, 2); moving along +rd only grows the merit.
        let dir = StepDirection {
            dx: vec![2.0, 2.0],
            dlambda_eq: vec![],
            dyi: vec![],
            dlambda_in: vec![],
            alpha: 1.0,
            sigma: 0.0,
        };
        let settings = IpmSettings::default();
        let mut evals = 0usize;
        let out = merit_line_search(&prob, &mut state, &mut res, &dir, &settings, &mut evals)
            .unwrap();
        assert!(!out.accepted);
        assert_eq!(out.alpha, 0.0);
        assert_eq!(evals, settings.line_search_trials);
        assert_eq!(state.x, vec![1.0, 1.0]);
        assert_relative_eq!(res.phi, phi0);
    }

    #[test]
    fn line_search_accepts_descent_immediately() {
        use crate::ipm::kkt::KktResiduals;
        use crate::linalg::csr::{CsrMatrix, InsertMode};

        let mut h = CsrMatrix::with_uniform_nnz(1, 1, 1).unwrap();
        h.set_value(0, 0, 1.0, InsertMode::Insert).unwrap();
        h.assembly_end();
        let prob = QpProblem {
            h,
            d: vec![0.0],
            a_eq: None,
            b_eq: vec![],
            a_in: None,
            b_in: vec![],
        };
        let mut state = IpmState {
            x: vec![4.0],
            lambda_eq: vec![],
            yi: vec![],
            lambda_in: vec![],
        };
        let mut res = KktResiduals::new(1, 0, 0);
        evaluate(&prob, &state, &mut res).unwrap();
        let dir = StepDirection {
            dx: vec![-4.0],
            dlambda_eq: vec![],
            dyi: vec![],
            dlambda_in: vec![],
            alpha: 1.0,
            sigma: 0.0,
        };
        let settings = IpmSettings::default();
        let mut evals = 0usize;
        let out = merit_line_search(&prob, &mut state, &mut res, &dir, &settings, &mut evals)
            .unwrap();
        assert!(out.accepted);
        assert_eq!(out.trials, 1);
        assert_relative_eq!(state.x[0], 0.0);
        assert!(res.phi < 1e-12);
    }
}
