//! Convergence monitoring for the outer interior-point loop.

use crate::problem::{IpmSettings, SolveStatus};

/// Tracks the merit trajectory and the iteration budgets.
///
/// Checked once per outer iteration, before the step: a `Some` verdict
/// terminates the loop with that status.
pub struct ConvergenceMonitor {
    fatol: f64,
    frtol: f64,
    max_iterations: usize,
    max_func_evals: usize,
    phi_prev: Option<f64>,
}

impl ConvergenceMonitor {
    pub fn new(settings: &IpmSettings) -> Self {
        ConvergenceMonitor {
            fatol: settings.fatol,
            frtol: settings.frtol,
            max_iterations: settings.max_iterations,
            max_func_evals: settings.max_func_evals,
            phi_prev: None,
        }
    }

    pub fn check(&mut self, iteration: usize, func_evals: usize, phi: f64) -> Option<SolveStatus> {
        if !phi.is_finite() {
            return Some(SolveStatus::NumericalError);
        }
        if phi <= self.fatol {
            return Some(SolveStatus::ConvergedAbsolute);
        }
        if let Some(prev) = self.phi_prev {
            if (prev - phi).abs() <= self.frtol * phi.abs().max(1.0) {
                return Some(SolveStatus::ConvergedRelative);
            }
        }
        if iteration >= self.max_iterations {
            return Some(SolveStatus::MaxIterationsReached);
        }
        if func_evals >= self.max_func_evals {
            return Some(SolveStatus::MaxFunctionEvalsReached);
        }
        self.phi_prev = Some(phi);
        None
    }
}
