//! Problem data, solver settings, and result types for the QP solver.
//!
//! The problem form is
//!
//! ```text
//! minimize    (1/2) x' H x + d' x
//! subject to  A_eq x  = b_eq
//!             A_in x >= b_in
//! ```
//!
//! with `H` symmetric positive semidefinite. Either constraint block may be
//! absent.

use crate::error::{Error, Result};
use crate::linalg::csr::CsrMatrix;
use crate::linalg::gmres::GmresSettings;

/// Convex quadratic program data.
pub struct QpProblem {
    /// Hessian, `n` x `n`, full symmetric storage.
    pub h: CsrMatrix,
    /// Linear objective term, length `n`.
    pub d: Vec<f64>,
    /// Equality constraint matrix, `me` x `n`.
    pub a_eq: Option<CsrMatrix>,
    pub b_eq: Vec<f64>,
    /// Inequality constraint matrix, `mi` x `n`.
    pub a_in: Option<CsrMatrix>,
    pub b_in: Vec<f64>,
}

impl QpProblem {
    pub fn num_vars(&self) -> usize {
        self.d.len()
    }

    pub fn num_eq(&self) -> usize {
        self.b_eq.len()
    }

    pub fn num_in(&self) -> usize {
        self.b_in.len()
    }

    /// Checks every dimension coupling.
    pub fn validate(&self) -> Result<()> {
        let n = self.num_vars();
        if self.h.dims() != (n, n) {
            return Err(Error::invalid_arg(format!(
                "hessian is {:?}, expected {} x {}",
                self.h.dims(),
                n,
                n
            )));
        }
        if !self.h.is_assembled() {
            return Err(Error::invalid_state("hessian is not assembled"));
        }
        match (&self.a_eq, self.b_eq.len()) {
            (None, 0) => {}
            (None, _) => {
                return Err(Error::invalid_arg(
                    "equality right-hand side without a constraint matrix",
                ))
            }
            (Some(a), me) => {
                if a.dims() != (me, n) {
                    return Err(Error::invalid_arg(format!(
                        "equality matrix is {:?}, expected {} x {}",
                        a.dims(),
                        me,
                        n
                    )));
                }
                if !a.is_assembled() {
                    return Err(Error::invalid_state("equality matrix is not assembled"));
                }
            }
        }
        match (&self.a_in, self.b_in.len()) {
            (None, 0) => {}
            (None, _) => {
                return Err(Error::invalid_arg(
                    "inequality right-hand side without a constraint matrix",
                ))
            }
            (Some(a), mi) => {
                if a.dims() != (mi, n) {
                    return Err(Error::invalid_arg(format!(
                        "inequality matrix is {:?}, expected {} x {}",
                        a.dims(),
                        mi,
                        n
                    )));
                }
                if !a.is_assembled() {
                    return Err(Error::invalid_state("inequality matrix is not assembled"));
                }
            }
        }
        Ok(())
    }
}

/// Interior-point iteration controls.
///
/// `Default` reads a few environment overrides, handy when comparing runs
/// without recompiling: `SPARSEQP_VERBOSE`, `SPARSEQP_MAX_ITERS`,
/// `SPARSEQP_FATOL`.
#[derive(Debug, Clone)]
pub struct IpmSettings {
    pub max_iterations: usize,
    pub max_func_evals: usize,
    /// Absolute tolerance on the merit value.
    pub fatol: f64,
    /// Relative tolerance on the per-iteration merit decrease.
    pub frtol: f64,
    /// Lower clamp for the fraction-to-boundary factor.
    pub tau_min: f64,
    /// A line-search trial is accepted when its merit value is at most this
    /// fraction of the current one.
    pub merit_decrease: f64,
    /// Maximum number of backtracking trials per step.
    pub line_search_trials: usize,
    /// Geometric backtracking factor between trials.
    pub ls_backtrack: f64,
    /// Settings for the inner KKT solves.
    pub kkt: GmresSettings,
    pub verbose: bool,
}

impl Default for IpmSettings {
    fn default() -> Self {
        let verbose = std::env::var("SPARSEQP_VERBOSE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let max_iterations = std::env::var("SPARSEQP_MAX_ITERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);
        let fatol = std::env::var("SPARSEQP_FATOL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0e-4);
        IpmSettings {
            max_iterations,
            max_func_evals: 4000,
            fatol,
            frtol: 1.0e-4,
            tau_min: 0.995,
            merit_decrease: 0.9999,
            line_search_trials: 11,
            ls_backtrack: 0.5,
            kkt: GmresSettings {
                rtol: 1.0e-12,
                max_iterations: 2000,
                ..GmresSettings::default()
            },
            verbose,
        }
    }
}

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Merit value fell below the absolute tolerance.
    ConvergedAbsolute,
    /// Merit decrease fell below the relative tolerance.
    ConvergedRelative,
    /// The merit line search exhausted its trials.
    LineSearchFailure,
    MaxIterationsReached,
    MaxFunctionEvalsReached,
    /// A residual became non-finite.
    NumericalError,
}

impl SolveStatus {
    pub fn is_converged(self) -> bool {
        matches!(
            self,
            SolveStatus::ConvergedAbsolute | SolveStatus::ConvergedRelative
        )
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SolveStatus::ConvergedAbsolute => "converged (absolute tolerance)",
            SolveStatus::ConvergedRelative => "converged (relative tolerance)",
            SolveStatus::LineSearchFailure => "line search failure",
            SolveStatus::MaxIterationsReached => "maximum iterations reached",
            SolveStatus::MaxFunctionEvalsReached => "maximum function evaluations reached",
            SolveStatus::NumericalError => "numerical error",
        };
        write!(f, "{}", s)
    }
}

/// Solution and diagnostics returned by the solver.
pub struct SolveResult {
    pub x: Vec<f64>,
    pub lambda_eq: Vec<f64>,
    pub lambda_in: Vec<f64>,
    /// Inequality slacks at the final iterate.
    pub slack: Vec<f64>,
    pub objective: f64,
    pub status: SolveStatus,
    pub info: SolveInfo,
}

/// Per-solve counters and final merit data.
#[derive(Debug, Clone, Copy)]
pub struct SolveInfo {
    pub iterations: usize,
    pub func_evals: usize,
    /// Final merit value (sum of residual norms).
    pub phi: f64,
    /// Final complementarity measure.
    pub mu: f64,
    /// Step length accepted in the last iteration.
    pub step_length: f64,
}
