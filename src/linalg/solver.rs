//! Linear solver strategies behind one trait.
//!
//! The prepare/solve split mirrors the factorization lifecycle: `prepare`
//! does the work that depends only on the matrix (factorization, workspace
//! sizing) and `solve` handles one right-hand side. Strategies are created
//! by name through [`SolverRegistry`], an explicitly constructed object.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::linalg::chol::{cholesky, CholeskyFactor};
use crate::linalg::csr::CsrMatrix;
use crate::linalg::gmres::{Gmres, GmresSettings};
use crate::linalg::index::Permutation;

/// A strategy for solving `A x = b`.
pub trait LinearSolver {
    /// Matrix-dependent setup; must precede the first `solve`.
    fn prepare(&mut self, a: &CsrMatrix) -> Result<()>;

    /// Solves one right-hand side. `x` doubles as the initial guess for
    /// iterative strategies.
    fn solve(&mut self, a: &CsrMatrix, b: &[f64], x: &mut [f64]) -> Result<()>;
}

/// Direct strategy for symmetric positive definite systems: complete
/// in-pattern Cholesky at `prepare`, triangular solves afterwards.
pub struct DirectCholesky {
    fill: f64,
    factor: Option<CholeskyFactor>,
}

impl DirectCholesky {
    pub fn new() -> Self {
        DirectCholesky {
            fill: 5.0,
            factor: None,
        }
    }
}

impl Default for DirectCholesky {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver for DirectCholesky {
    fn prepare(&mut self, a: &CsrMatrix) -> Result<()> {
        let (m, _) = a.dims();
        self.factor = Some(cholesky(a, &Permutation::identity(m), self.fill)?);
        Ok(())
    }

    fn solve(&mut self, _a: &CsrMatrix, b: &[f64], x: &mut [f64]) -> Result<()> {
        match self.factor.as_mut() {
            Some(f) => f.solve(b, x),
            None => Err(Error::invalid_state("direct solve before prepare")),
        }
    }
}

/// Iterative strategy: restarted GMRES, warm-started from the incoming `x`.
/// A solve that exhausts its budget keeps the best iterate and logs the
/// residual instead of failing.
pub struct KrylovGmres {
    settings: GmresSettings,
    engine: Option<Gmres>,
}

impl KrylovGmres {
    pub fn new(settings: GmresSettings) -> Self {
        KrylovGmres {
            settings,
            engine: None,
        }
    }
}

impl Default for KrylovGmres {
    fn default() -> Self {
        Self::new(GmresSettings::default())
    }
}

impl LinearSolver for KrylovGmres {
    fn prepare(&mut self, a: &CsrMatrix) -> Result<()> {
        let (m, n) = a.dims();
        if m != n {
            return Err(Error::invalid_arg("iterative solve needs a square matrix"));
        }
        self.engine = Some(Gmres::new(m, self.settings.clone()));
        Ok(())
    }

    fn solve(&mut self, a: &CsrMatrix, b: &[f64], x: &mut [f64]) -> Result<()> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| Error::invalid_state("iterative solve before prepare"))?;
        let out = engine.solve(a, b, x)?;
        if !out.converged {
            log::warn!(
                "gmres did not reach tolerance ({} iterations, residual {:.3e})",
                out.iterations,
                out.residual_norm
            );
        }
        Ok(())
    }
}

type SolverCtor = Box<dyn Fn() -> Box<dyn LinearSolver>>;

/// Name-to-constructor map for solver strategies. Built explicitly; there
/// is no global registration.
pub struct SolverRegistry {
    ctors: HashMap<String, SolverCtor>,
}

impl SolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        SolverRegistry {
            ctors: HashMap::new(),
        }
    }

    /// A registry holding the built-in strategies `"cholesky"` and
    /// `"gmres"`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("cholesky", || Box::new(DirectCholesky::new()));
        reg.register("gmres", || Box::new(KrylovGmres::default()));
        reg
    }

    pub fn register<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn() -> Box<dyn LinearSolver> + 'static,
    {
        self.ctors.insert(name.to_string(), Box::new(ctor));
    }

    /// Instantiates a strategy by name.
    ///
    /// # Errors
    /// `UnsupportedOperation` for a name nothing was registered under.
    pub fn create(&self, name: &str) -> Result<Box<dyn LinearSolver>> {
        match self.ctors.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(Error::unsupported(format!(
                "no linear solver registered as '{}'",
                name
            ))),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(|s| s.as_str())
    }
}

impl Default for SolverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::csr::InsertMode;
    use approx::assert_relative_eq;

    fn spd() -> CsrMatrix {
        let mut a = CsrMatrix::with_uniform_nnz(3, 3, 3).unwrap();
        let dense = [[4.0, 1.0, 0.0], [1.0, 5.0, 2.0], [0.0, 2.0, 6.0]];
        for i in 0..3 {
            for j in 0..3 {
                if dense[i][j] != 0.0 {
                    a.set_value(i, j, dense[i][j], InsertMode::Insert).unwrap();
                }
            }
        }
        a.assembly_end();
        a
    }

    #[test]
    fn both_strategies_agree_on_spd() {
        let a = spd();
        let x_true = [1.0, 2.0, -1.0];
        let mut b = [0.0; 3];
        a.mult(&x_true, &mut b).unwrap();

        let registry = SolverRegistry::with_builtins();
        for name in ["cholesky", "gmres"] {
            let mut solver = registry.create(name).unwrap();
            solver.prepare(&a).unwrap();
            let mut x = [0.0; 3];
            solver.solve(&a, &b, &mut x).unwrap();
            for (u, v) in x.iter().zip(&x_true) {
                assert_relative_eq!(u, v, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn unknown_strategy_is_unsupported() {
        let registry = SolverRegistry::with_builtins();
        assert!(matches!(
            registry.create("qr"),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn solve_before_prepare_is_invalid_state() {
        let a = spd();
        let mut solver = DirectCholesky::new();
        let mut x = [0.0; 3];
        assert!(matches!(
            solver.solve(&a, &[1.0, 0.0, 0.0], &mut x),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn custom_registration_is_visible() {
        let mut registry = SolverRegistry::new();
        registry.register("gmres-tight", || {
            Box::new(KrylovGmres::new(GmresSettings {
                rtol: 1.0e-14,
                ..GmresSettings::default()
            }))
        });
        assert!(registry.create("gmres-tight").is_ok());
        assert!(registry.create("cholesky").is_err());
    }
}
