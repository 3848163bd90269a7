//! KKT residuals and the block KKT matrix.
//!
//! Unknown ordering is `(dx, dlambda_eq, dyi, dlambda_in)` and the block
//! matrix is
//!
//! ```text
//! [ H     Aeq'   0    -Ain' ]
//! [ Aeq   0      0     0    ]
//! [ Ain   0     -I     0    ]
//! [ 0     0      L     Y    ]
//! ```
//!
//! with `L = diag(lambda_in)` and `Y = diag(yi)`. The structure is
//! assembled once; the constant blocks are frozen with the ignore-new
//! policy and a stored value copy, and each iteration retrieves the copy
//! and overwrites only the two diagonal blocks.

use crate::error::{Error, Result};
use crate::linalg::csr::{CsrMatrix, InsertMode, NonzeroPolicy};
use crate::problem::QpProblem;

/// Primal-dual iterate. `yi` and `lambda_in` stay strictly positive at
/// every iteration boundary.
#[derive(Debug, Clone)]
pub struct IpmState {
    pub x: Vec<f64>,
    pub lambda_eq: Vec<f64>,
    pub yi: Vec<f64>,
    pub lambda_in: Vec<f64>,
}

/// Residuals, merit value and complementarity measure at an iterate.
#[derive(Debug, Clone)]
pub struct KktResiduals {
    /// Dual residual `H x + d + Aeq' lambda_eq - Ain' lambda_in`.
    pub rd: Vec<f64>,
    /// Equality residual `Aeq x - b_eq`.
    pub rpe: Vec<f64>,
    /// Inequality residual `Ain x - yi - b_in`.
    pub rpi: Vec<f64>,
    /// Elementwise product `yi * lambda_in`.
    pub complementarity: Vec<f64>,
    /// Sum of the Euclidean norms of the four blocks above.
    pub phi: f64,
    /// `yi . lambda_in / mi`, zero without inequalities.
    pub mu: f64,
    pub objective: f64,
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

impl KktResiduals {
    pub fn new(n: usize, me: usize, mi: usize) -> Self {
        KktResiduals {
            rd: vec![0.0; n],
            rpe: vec![0.0; me],
            rpi: vec![0.0; mi],
            complementarity: vec![0.0; mi],
            phi: 0.0,
            mu: 0.0,
            objective: 0.0,
        }
    }
}

/// Evaluates residuals, objective, merit and complementarity at `state`.
/// One call counts as one function evaluation against the solve budget.
pub fn evaluate(prob: &QpProblem, state: &IpmState, res: &mut KktResiduals) -> Result<()> {
    let n = prob.num_vars();
    let mi = prob.num_in();

    prob.h.mult(&state.x, &mut res.rd)?;
    let hx_dot_x: f64 = res.rd.iter().zip(&state.x).map(|(a, b)| a * b).sum();
    let d_dot_x: f64 = prob.d.iter().zip(&state.x).map(|(a, b)| a * b).sum();
    res.objective = 0.5 * hx_dot_x + d_dot_x;
    for (r, d) in res.rd.iter_mut().zip(&prob.d) {
        *r += d;
    }
    let mut tmp = vec![0.0; n];
    if let Some(a_eq) = &prob.a_eq {
        a_eq.mult_transpose(&state.lambda_eq, &mut tmp)?;
        for (r, t) in res.rd.iter_mut().zip(&tmp) {
            *r += t;
        }
        a_eq.mult(&state.x, &mut res.rpe)?;
        for (r, b) in res.rpe.iter_mut().zip(&prob.b_eq) {
            *r -= b;
        }
    }
    if let Some(a_in) = &prob.a_in {
        a_in.mult_transpose(&state.lambda_in, &mut tmp)?;
        for (r, t) in res.rd.iter_mut().zip(&tmp) {
            *r -= t;
        }
        a_in.mult(&state.x, &mut res.rpi)?;
        for ((r, y), b) in res.rpi.iter_mut().zip(&state.yi).zip(&prob.b_in) {
            *r -= y + b;
        }
    }
    for ((c, y), l) in res
        .complementarity
        .iter_mut()
        .zip(&state.yi)
        .zip(&state.lambda_in)
    {
        *c = y * l;
    }
    res.phi = norm2(&res.rd) + norm2(&res.rpe) + norm2(&res.rpi) + norm2(&res.complementarity);
    res.mu = if mi == 0 {
        0.0
    } else {
        state
            .yi
            .iter()
            .zip(&state.lambda_in)
            .map(|(y, l)| y * l)
            .sum::<f64>()
            / mi as f64
    };
    Ok(())
}

/// The assembled KKT system with its right-hand-side buffer.
pub struct KktSystem {
    n: usize,
    me: usize,
    mi: usize,
    mat: CsrMatrix,
    rhs: Vec<f64>,
}

impl KktSystem {
    pub fn dim(&self) -> usize {
        self.n + self.me + 2 * self.mi
    }

    pub fn matrix(&self) -> &CsrMatrix {
        &self.mat
    }

    /// Assembles the block structure with exact per-row allocation, then
    /// freezes it: no assembly in later iterations ever adds a location.
    pub fn new(prob: &QpProblem) -> Result<Self> {
        let n = prob.num_vars();
        let me = prob.num_eq();
        let mi = prob.num_in();
        let dim = n + me + 2 * mi;

        // Column counts of the constraint blocks give the transpose row
        // lengths needed for exact hints.
        let mut eq_col_nnz = vec![0usize; n];
        if let Some(a) = &prob.a_eq {
            for r in 0..me {
                let (cols, _) = a.row(r);
                for &c in cols {
                    eq_col_nnz[c] += 1;
                }
            }
        }
        let mut in_col_nnz = vec![0usize; n];
        if let Some(a) = &prob.a_in {
            for r in 0..mi {
                let (cols, _) = a.row(r);
                for &c in cols {
                    in_col_nnz[c] += 1;
                }
            }
        }

        let mut lens = vec![0usize; dim];
        for i in 0..n {
            let (cols, _) = prob.h.row(i);
            lens[i] = cols.len() + eq_col_nnz[i] + in_col_nnz[i];
        }
        if let Some(a) = &prob.a_eq {
            for r in 0..me {
                lens[n + r] = a.row(r).0.len();
            }
        }
        if let Some(a) = &prob.a_in {
            for r in 0..mi {
                lens[n + me + r] = a.row(r).0.len() + 1;
            }
        }
        for r in 0..mi {
            lens[n + me + mi + r] = 2;
        }

        let mut mat = CsrMatrix::with_row_nnz(dim, dim, &lens)?;
        for i in 0..n {
            let (cols, vals) = prob.h.row(i);
            for (c, v) in cols.iter().zip(vals) {
                mat.set_value(i, *c, *v, InsertMode::Insert)?;
            }
        }
        if let Some(a) = &prob.a_eq {
            for r in 0..me {
                let (cols, vals) = a.row(r);
                for (c, v) in cols.iter().zip(vals) {
                    mat.set_value(n + r, *c, *v, InsertMode::Insert)?;
                    mat.set_value(*c, n + r, *v, InsertMode::Insert)?;
                }
            }
        }
        if let Some(a) = &prob.a_in {
            for r in 0..mi {
                let (cols, vals) = a.row(r);
                for (c, v) in cols.iter().zip(vals) {
                    mat.set_value(n + me + r, *c, *v, InsertMode::Insert)?;
                    mat.set_value(*c, n + me + mi + r, -*v, InsertMode::Insert)?;
                }
                mat.set_value(n + me + r, n + me + r, -1.0, InsertMode::Insert)?;
            }
        }
        for r in 0..mi {
            mat.set_value(n + me + mi + r, n + me + r, 1.0, InsertMode::Insert)?;
            mat.set_value(n + me + mi + r, n + me + mi + r, 1.0, InsertMode::Insert)?;
        }
        mat.assembly_end();
        mat.set_policy(NonzeroPolicy::IgnoreNew);
        mat.store_values()?;

        Ok(KktSystem {
            n,
            me,
            mi,
            mat,
            rhs: vec![0.0; dim],
        })
    }

    /// Restores the constant blocks and writes the current `L` and `Y`
    /// diagonals.
    pub fn refresh(&mut self, state: &IpmState) -> Result<()> {
        if state.yi.len() != self.mi || state.lambda_in.len() != self.mi {
            return Err(Error::invalid_arg("iterate sizes disagree with the system"));
        }
        self.mat.retrieve_values()?;
        let (n, me, mi) = (self.n, self.me, self.mi);
        for r in 0..mi {
            self.mat
                .set_value(n + me + mi + r, n + me + r, state.lambda_in[r], InsertMode::Insert)?;
            self.mat
                .set_value(n + me + mi + r, n + me + mi + r, state.yi[r], InsertMode::Insert)?;
        }
        Ok(())
    }

    /// Right-hand side of the affine (predictor) system.
    pub fn affine_rhs(&mut self, res: &KktResiduals) -> &[f64] {
        self.fill_common(res);
        let base = self.n + self.me + self.mi;
        for (r, c) in self.rhs[base..].iter_mut().zip(&res.complementarity) {
            *r = -c;
        }
        &self.rhs
    }

    /// Right-hand side of the corrector system: the complementarity block
    /// gains the Mehrotra correction and the centering term.
    pub fn corrector_rhs(
        &mut self,
        res: &KktResiduals,
        dy_aff: &[f64],
        dl_aff: &[f64],
        sigma_mu: f64,
    ) -> &[f64] {
        self.fill_common(res);
        let base = self.n + self.me + self.mi;
        for (i, r) in self.rhs[base..].iter_mut().enumerate() {
            *r = -res.complementarity[i] - dy_aff[i] * dl_aff[i] + sigma_mu;
        }
        &self.rhs
    }

    fn fill_common(&mut self, res: &KktResiduals) {
        let (n, me, mi) = (self.n, self.me, self.mi);
        for (r, v) in self.rhs[..n].iter_mut().zip(&res.rd) {
            *r = -v;
        }
        for (r, v) in self.rhs[n..n + me].iter_mut().zip(&res.rpe) {
            *r = -v;
        }
        for (r, v) in self.rhs[n + me..n + me + mi].iter_mut().zip(&res.rpi) {
            *r = -v;
        }
    }
}
