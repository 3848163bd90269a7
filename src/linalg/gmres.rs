//! Restarted GMRES with classical Gram-Schmidt orthogonalization.
//!
//! The orthogonalization is the unmodified (classical) variant: all inner
//! products of the candidate against the basis are taken in one batch, then
//! subtracted in one batched pass. That trades some stability against
//! modified Gram-Schmidt for a single reduction, and it is the variant the
//! solver uses; no iterative refinement is applied.

use crate::error::{Error, Result};
use crate::linalg::csr::CsrMatrix;

/// Orthogonalizes `w` against `basis` in place.
///
/// `h` receives the projection coefficients `<v_i, w>` for each basis
/// vector. Both passes are batched: first every inner product, then every
/// subtraction.
pub fn classical_gram_schmidt(basis: &[Vec<f64>], w: &mut [f64], h: &mut [f64]) -> Result<()> {
    if h.len() < basis.len() {
        return Err(Error::invalid_arg("coefficient slice shorter than basis"));
    }
    for (i, v) in basis.iter().enumerate() {
        if v.len() != w.len() {
            return Err(Error::invalid_arg("basis vector length mismatch"));
        }
        h[i] = v.iter().zip(w.iter()).map(|(a, b)| a * b).sum();
    }
    for (i, v) in basis.iter().enumerate() {
        let hi = h[i];
        for (wk, vk) in w.iter_mut().zip(v) {
            *wk -= hi * vk;
        }
    }
    Ok(())
}

/// Iteration controls for [`Gmres`].
#[derive(Debug, Clone)]
pub struct GmresSettings {
    /// Krylov basis size between restarts.
    pub restart: usize,
    /// Total iteration budget across restarts.
    pub max_iterations: usize,
    /// Relative residual tolerance against the initial residual.
    pub rtol: f64,
    /// Absolute residual tolerance.
    pub atol: f64,
}

impl Default for GmresSettings {
    fn default() -> Self {
        GmresSettings {
            restart: 30,
            max_iterations: 1000,
            rtol: 1.0e-10,
            atol: 1.0e-50,
        }
    }
}

/// Outcome of a GMRES run. A run that exhausts its budget is not an error;
/// `converged` says whether the tolerance was met and `x` holds the best
/// iterate either way.
#[derive(Debug, Clone, Copy)]
pub struct GmresOutcome {
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// Restarted GMRES with preallocated workspace, reusable across solves of
/// equal dimension.
pub struct Gmres {
    n: usize,
    settings: GmresSettings,
    basis: Vec<Vec<f64>>,
    hess: Vec<Vec<f64>>,
    givens_c: Vec<f64>,
    givens_s: Vec<f64>,
    g: Vec<f64>,
    w: Vec<f64>,
    r: Vec<f64>,
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

impl Gmres {
    pub fn new(n: usize, settings: GmresSettings) -> Self {
        let m = settings.restart.max(1);
        Gmres {
            n,
            basis: (0..m + 1).map(|_| vec![0.0; n]).collect(),
            hess: (0..m).map(|i| vec![0.0; i + 2]).collect(),
            givens_c: vec![0.0; m],
            givens_s: vec![0.0; m],
            g: vec![0.0; m + 1],
            w: vec![0.0; n],
            r: vec![0.0; n],
            settings,
        }
    }

    /// Solves `A x = b`, using `x` as the initial guess.
    pub fn solve(&mut self, a: &CsrMatrix, b: &[f64], x: &mut [f64]) -> Result<GmresOutcome> {
        let (am, an) = a.dims();
        if am != self.n || an != self.n || b.len() != self.n || x.len() != self.n {
            return Err(Error::invalid_arg("iterative solve dimension mismatch"));
        }
        let m = self.settings.restart.max(1);
        a.mult(x, &mut self.r)?;
        for (ri, bi) in self.r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let beta0 = norm2(&self.r);
        let target = (self.settings.rtol * beta0).max(self.settings.atol);
        let mut beta = beta0;
        let mut total_its = 0usize;
        if beta <= target {
            return Ok(GmresOutcome {
                iterations: 0,
                residual_norm: beta,
                converged: true,
            });
        }

        while total_its < self.settings.max_iterations {
            for (vk, rk) in self.basis[0].iter_mut().zip(&self.r) {
                *vk = rk / beta;
            }
            for gi in self.g.iter_mut() {
                *gi = 0.0;
            }
            self.g[0] = beta;

            let mut inner = 0usize;
            for j in 0..m {
                if total_its >= self.settings.max_iterations {
                    break;
                }
                a.mult(&self.basis[j], &mut self.w)?;
                {
                    let (done, _) = self.basis.split_at(j + 1);
                    classical_gram_schmidt(done, &mut self.w, &mut self.hess[j])?;
                }
                let hnext = norm2(&self.w);
                self.hess[j][j + 1] = hnext;
                // Apply the accumulated Givens rotations to the new column,
                // then compute the rotation that annihilates its subdiagonal.
                for i in 0..j {
                    let (c, s) = (self.givens_c[i], self.givens_s[i]);
                    let h0 = self.hess[j][i];
                    let h1 = self.hess[j][i + 1];
                    self.hess[j][i] = c * h0 + s * h1;
                    self.hess[j][i + 1] = -s * h0 + c * h1;
                }
                let h0 = self.hess[j][j];
                let h1 = self.hess[j][j + 1];
                let denom = (h0 * h0 + h1 * h1).sqrt();
                let (c, s) = if denom == 0.0 { (1.0, 0.0) } else { (h0 / denom, h1 / denom) };
                self.givens_c[j] = c;
                self.givens_s[j] = s;
                self.hess[j][j] = denom;
                self.hess[j][j + 1] = 0.0;
                self.g[j + 1] = -s * self.g[j];
                self.g[j] *= c;

                total_its += 1;
                inner = j + 1;
                beta = self.g[j + 1].abs();
                if beta <= target || hnext == 0.0 {
                    break;
                }
                for (vk, wk) in self.basis[j + 1].iter_mut().zip(&self.w) {
                    *vk = wk / hnext;
                }
            }

            // Back-substitute the triangular system and update x.
            let mut y = vec![0.0f64; inner];
            for i in (0..inner).rev() {
                let mut s = self.g[i];
                for k in i + 1..inner {
                    s -= self.hess[k][i] * y[k];
                }
                y[i] = s / self.hess[i][i];
            }
            for (i, yi) in y.iter().enumerate() {
                for (xk, vk) in x.iter_mut().zip(&self.basis[i]) {
                    *xk += yi * vk;
                }
            }

            a.mult(x, &mut self.r)?;
            for (ri, bi) in self.r.iter_mut().zip(b) {
                *ri = bi - *ri;
            }
            beta = norm2(&self.r);
            if beta <= target {
                log::debug!(
                    "gmres converged: {} iterations, residual {:.3e}",
                    total_its,
                    beta
                );
                return Ok(GmresOutcome {
                    iterations: total_its,
                    residual_norm: beta,
                    converged: true,
                });
            }
        }
        log::debug!(
            "gmres stopped at the iteration budget with residual {:.3e}",
            beta
        );
        Ok(GmresOutcome {
            iterations: total_its,
            residual_norm: beta,
            converged: false,
        })
    }
}
