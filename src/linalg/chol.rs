//! Symmetric upper-triangle block storage and incomplete Cholesky.
//!
//! [`SbMatrix`] stores the upper triangle of a symmetric matrix in block
//! compressed-row form, diagonal block first in each row. Factorization
//! splits into a symbolic phase (level-based fill pattern, merged linked
//! lists) and a numeric phase, producing a [`CholeskyFactor`] whose rows
//! hold the inverse diagonal block first and the strictly-upper blocks
//! after, so the triangular solves never divide.
//!
//! Factor convention: `P A P^T = (I - S^T) D (I - S)` with `S` the stored
//! strictly-upper blocks and the stored diagonal being `D^{-1}`. The
//! forward pass scatters each finished row's contribution into later rows
//! and then scales by the inverse diagonal; the back pass gathers from
//! later rows. An identity permutation skips the gather/scatter entirely.

use crate::error::{Error, Result};
use crate::linalg::csr::CsrMatrix;
use crate::linalg::index::Permutation;

/// Relative tolerance below which a pivot counts as zero.
const PIVOT_TOL: f64 = 1.0e-12;

/// Upper triangle of a symmetric matrix in block CSR form.
///
/// Each block row starts with its diagonal block; `values` holds
/// `bs * bs` row-major scalars per block.
#[derive(Debug, Clone)]
pub struct SbMatrix {
    mbs: usize,
    bs: usize,
    row_start: Vec<usize>,
    col_index: Vec<usize>,
    values: Vec<f64>,
}

impl SbMatrix {
    /// Builds a block matrix from raw arrays. Every row must be nonempty
    /// with its diagonal block first; column duplicates are caught later,
    /// at symbolic factorization.
    pub fn from_blocks(
        mbs: usize,
        bs: usize,
        row_start: Vec<usize>,
        col_index: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if bs == 0 {
            return Err(Error::invalid_arg("block size must be positive"));
        }
        if row_start.len() != mbs + 1 || row_start[0] != 0 {
            return Err(Error::invalid_arg("malformed block row pointers"));
        }
        let nblocks = row_start[mbs];
        if col_index.len() != nblocks || values.len() != nblocks * bs * bs {
            return Err(Error::invalid_arg("block array lengths disagree"));
        }
        for k in 0..mbs {
            let (lo, hi) = (row_start[k], row_start[k + 1]);
            if hi <= lo {
                return Err(Error::invalid_arg(format!(
                    "block row {} is missing its diagonal block",
                    k
                )));
            }
            if col_index[lo] != k {
                return Err(Error::invalid_arg(format!(
                    "block row {} must start with its diagonal block",
                    k
                )));
            }
            for p in lo..hi {
                if col_index[p] < k || col_index[p] >= mbs {
                    return Err(Error::invalid_arg("block column out of the upper triangle"));
                }
            }
        }
        Ok(SbMatrix {
            mbs,
            bs,
            row_start,
            col_index,
            values,
        })
    }

    /// Extracts the upper triangle of an assembled, structurally symmetric
    /// scalar matrix, applying a symmetric permutation: block row `i` of
    /// the result holds `A[perm(i), perm(j)]` for `j >= i`.
    ///
    /// # Errors
    /// `InvalidArgument` when a diagonal entry is structurally missing.
    pub fn from_csr_upper(a: &CsrMatrix, perm: &Permutation) -> Result<Self> {
        if !a.is_assembled() {
            return Err(Error::invalid_state("upper extraction of unassembled matrix"));
        }
        let (m, n) = a.dims();
        if m != n {
            return Err(Error::invalid_arg("symmetric extraction needs a square matrix"));
        }
        if perm.len() != m {
            return Err(Error::invalid_arg("permutation length mismatch"));
        }
        let pinv = perm.invert();
        let mut row_start = Vec::with_capacity(m + 1);
        let mut col_index = Vec::new();
        let mut values = Vec::new();
        row_start.push(0usize);
        let mut entries: Vec<(usize, f64)> = Vec::new();
        for i in 0..m {
            let pi = perm.apply(i);
            entries.clear();
            let (cols, vals) = a.row(pi);
            for (c, v) in cols.iter().zip(vals) {
                let j = pinv.apply(*c);
                if j >= i {
                    entries.push((j, *v));
                }
            }
            entries.sort_unstable_by_key(|e| e.0);
            if entries.first().map(|e| e.0) != Some(i) {
                return Err(Error::invalid_arg(format!(
                    "matrix is missing the diagonal entry of row {}",
                    pi
                )));
            }
            for (j, v) in &entries {
                col_index.push(*j);
                values.push(*v);
            }
            row_start.push(col_index.len());
        }
        Ok(SbMatrix {
            mbs: m,
            bs: 1,
            row_start,
            col_index,
            values,
        })
    }

    pub fn block_rows(&self) -> usize {
        self.mbs
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    /// Block columns and values of block row `k` (diagonal block first).
    pub fn row(&self, k: usize) -> (&[usize], &[f64]) {
        let bs2 = self.bs * self.bs;
        let (lo, hi) = (self.row_start[k], self.row_start[k + 1]);
        (&self.col_index[lo..hi], &self.values[lo * bs2..hi * bs2])
    }
}

/// Fill pattern produced by [`icc_symbolic`]. Rows are diagonal-first.
#[derive(Debug, Clone)]
pub struct SymbolicFactor {
    mbs: usize,
    bs: usize,
    row_start: Vec<usize>,
    col_index: Vec<usize>,
}

impl SymbolicFactor {
    pub fn block_rows(&self) -> usize {
        self.mbs
    }

    /// Block columns of factor row `k`, diagonal first.
    pub fn row_pattern(&self, k: usize) -> &[usize] {
        &self.col_index[self.row_start[k]..self.row_start[k + 1]]
    }

    pub fn nblocks(&self) -> usize {
        self.row_start[self.mbs]
    }
}

/// Symbolic-phase statistics: sizing hint given, fill actually needed, and
/// how often the work pool had to grow.
#[derive(Debug, Clone, Copy)]
pub struct IccInfo {
    pub fill_given: f64,
    pub fill_needed: f64,
    pub reallocs: usize,
}

/// Level-based symbolic incomplete Cholesky.
///
/// Walks the pivot rows with a merged linked list per row: the original
/// row's columns enter at level zero, and each previously factored row
/// reaching the pivot contributes its trailing columns at level
/// `lev(u_ij) + lev(u_ik) + 1`, dropped when that exceeds `levels`. The
/// column/level pool starts at `fill` times the input's strict-upper count
/// and doubles on overflow.
///
/// # Errors
/// `DuplicateEntry` if a row of `a` holds the same column twice.
pub fn icc_symbolic(a: &SbMatrix, levels: usize, fill: f64) -> Result<(SymbolicFactor, IccInfo)> {
    let mbs = a.mbs;
    let sentinel = mbs;
    let offdiag_nz = a.row_start[mbs] - mbs;
    let given = ((fill.max(1.0) * offdiag_nz as f64) as usize).max(1);

    let mut cap = given;
    let mut ju = vec![0usize; cap];
    let mut lev = vec![0usize; cap];
    let mut iu = vec![0usize; mbs + 1];
    // jl[k] is the waiting list head for pivot k until step k consumes it;
    // afterwards it is row k's own chain pointer. il[i] is the pool
    // position of row i's currently active column.
    let mut jl = vec![sentinel; mbs.max(1)];
    let mut il = vec![0usize; mbs.max(1)];
    let mut q = vec![sentinel; mbs.max(1)];
    let mut levtmp = vec![0usize; mbs.max(1)];
    let mut reallocs = 0usize;

    for k in 0..mbs {
        let mut nzk = 0usize;
        q[k] = sentinel;

        // Row k of A, strict upper part, already ascending.
        let (acols, _) = a.row(k);
        let mut prev = k;
        for &c in &acols[1..] {
            if c == prev || (prev != k && c < prev) {
                return Err(Error::DuplicateEntry { row: k, col: c });
            }
            q[c] = q[prev];
            q[prev] = c;
            levtmp[c] = 0;
            prev = c;
            nzk += 1;
        }

        // Merge every factored row whose active column is k.
        let mut prow = jl[k];
        while prow != sentinel {
            let next_prow = jl[prow];
            let p = il[prow];
            let lev_pk = lev[p];
            let (jmin, jmax) = (p + 1, iu[prow + 1]);
            let mut cursor = k;
            for t in jmin..jmax {
                let j = ju[t];
                let incrlev = lev[t] + lev_pk + 1;
                if incrlev > levels {
                    continue;
                }
                loop {
                    let nxt = q[cursor];
                    if nxt != sentinel && nxt < j {
                        cursor = nxt;
                    } else {
                        break;
                    }
                }
                if q[cursor] == j {
                    levtmp[j] = levtmp[j].min(incrlev);
                } else {
                    q[j] = q[cursor];
                    q[cursor] = j;
                    levtmp[j] = incrlev;
                    nzk += 1;
                }
            }
            if jmin < jmax {
                il[prow] = jmin;
                let j = ju[jmin];
                jl[prow] = jl[j];
                jl[j] = prow;
            }
            prow = next_prow;
        }

        // Store row k's pattern, growing the pool by doubling if needed.
        while iu[k] + nzk > cap {
            cap = (cap * 2).max(iu[k] + nzk);
            ju.resize(cap, 0);
            lev.resize(cap, 0);
            reallocs += 1;
        }
        let mut pos = iu[k];
        let mut col = q[k];
        while col != sentinel {
            ju[pos] = col;
            lev[pos] = levtmp[col];
            pos += 1;
            col = q[col];
        }
        iu[k + 1] = iu[k] + nzk;
        if nzk > 0 {
            il[k] = iu[k];
            let j = ju[iu[k]];
            jl[k] = jl[j];
            jl[j] = k;
        }
    }

    let needed = iu[mbs];
    let info = IccInfo {
        fill_given: fill.max(1.0),
        fill_needed: if offdiag_nz == 0 {
            1.0
        } else {
            needed as f64 / offdiag_nz as f64
        },
        reallocs,
    };
    log::debug!(
        "symbolic factorization: reallocs {}, fill ratio given {} needed {}",
        info.reallocs,
        info.fill_given,
        info.fill_needed
    );

    // Repack into the diagonal-first factor layout.
    let mut row_start = Vec::with_capacity(mbs + 1);
    let mut col_index = Vec::with_capacity(mbs + needed);
    row_start.push(0usize);
    for k in 0..mbs {
        col_index.push(k);
        col_index.extend_from_slice(&ju[iu[k]..iu[k + 1]]);
        row_start.push(col_index.len());
    }
    Ok((
        SymbolicFactor {
            mbs,
            bs: a.bs,
            row_start,
            col_index,
        },
        info,
    ))
}

/// Triangular factor with solve kernels.
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    mbs: usize,
    bs: usize,
    row_start: Vec<usize>,
    col_index: Vec<usize>,
    values: Vec<f64>,
    perm: Permutation,
    identity_perm: bool,
    work: Vec<f64>,
}

/// Numeric phase of the incomplete Cholesky, scalar blocks only.
///
/// Up-looking: a dense work row accumulates the pivot row, and a per-column
/// list of pending factored rows supplies the updates. The diagonal slot of
/// each factor row receives the inverse pivot.
///
/// # Errors
/// `ZeroPivot` when a pivot falls below the relative tolerance;
/// `UnsupportedOperation` for block sizes above one (block factors can
/// still be built externally through [`CholeskyFactor::from_parts`]).
pub fn icc_numeric(a: &SbMatrix, sym: &SymbolicFactor, perm: Permutation) -> Result<CholeskyFactor> {
    if a.bs != 1 || sym.bs != 1 {
        return Err(Error::unsupported(
            "numeric factorization of block sizes above one",
        ));
    }
    if a.mbs != sym.mbs {
        return Err(Error::invalid_arg("pattern and matrix sizes disagree"));
    }
    let mbs = a.mbs;
    if perm.len() != mbs {
        return Err(Error::invalid_arg("permutation length mismatch"));
    }
    let sentinel = mbs;
    let mut values = vec![0.0f64; sym.row_start[mbs]];
    let mut dvec = vec![0.0f64; mbs.max(1)];
    let mut w = vec![0.0f64; mbs.max(1)];
    let mut marker = vec![false; mbs.max(1)];
    let mut jl = vec![sentinel; mbs.max(1)];
    let mut il = vec![0usize; mbs.max(1)];

    let mut scale = 0.0f64;
    for k in 0..mbs {
        let (_, avals) = a.row(k);
        scale = scale.max(avals[0].abs());
    }
    let pivot_floor = PIVOT_TOL * (1.0 + scale);

    for k in 0..mbs {
        let base = sym.row_start[k];
        let end = sym.row_start[k + 1];
        for &c in &sym.col_index[base..end] {
            marker[c] = true;
            w[c] = 0.0;
        }
        let (acols, avals) = a.row(k);
        for (c, v) in acols.iter().zip(avals) {
            // The factor pattern contains the input pattern.
            w[*c] = *v;
        }

        let mut prow = jl[k];
        while prow != sentinel {
            let next_prow = jl[prow];
            let p = il[prow];
            let s_pk = values[p];
            let mult = s_pk * dvec[prow];
            w[k] -= s_pk * mult;
            let (jmin, jmax) = (p + 1, sym.row_start[prow + 1]);
            for t in jmin..jmax {
                let j = sym.col_index[t];
                if marker[j] {
                    w[j] -= mult * values[t];
                }
            }
            if jmin < jmax {
                il[prow] = jmin;
                let j = sym.col_index[jmin];
                jl[prow] = jl[j];
                jl[j] = prow;
            }
            prow = next_prow;
        }

        let d = w[k];
        if !d.is_finite() || d.abs() < pivot_floor {
            return Err(Error::ZeroPivot { row: k });
        }
        dvec[k] = d;
        values[base] = 1.0 / d;
        for t in base + 1..end {
            let j = sym.col_index[t];
            values[t] = -w[j] / d;
        }
        if end > base + 1 {
            il[k] = base + 1;
            let j = sym.col_index[base + 1];
            jl[k] = jl[j];
            jl[j] = k;
        }
        for &c in &sym.col_index[base..end] {
            marker[c] = false;
        }
    }

    let identity_perm = perm.is_identity();
    Ok(CholeskyFactor {
        mbs,
        bs: 1,
        row_start: sym.row_start.clone(),
        col_index: sym.col_index.clone(),
        values,
        work: vec![0.0; mbs],
        perm,
        identity_perm,
    })
}

/// Incomplete Cholesky of an assembled symmetric matrix under a symmetric
/// permutation. `fill` is the predicted fill ratio used to size the
/// symbolic work pool.
pub fn icc(
    a: &CsrMatrix,
    perm: &Permutation,
    levels: usize,
    fill: f64,
) -> Result<(CholeskyFactor, IccInfo)> {
    let upper = SbMatrix::from_csr_upper(a, perm)?;
    let (sym, info) = icc_symbolic(&upper, levels, fill)?;
    let factor = icc_numeric(&upper, &sym, perm.clone())?;
    Ok((factor, info))
}

/// Complete (in-pattern) Cholesky: incomplete factorization with enough
/// levels that no fill is ever dropped.
pub fn cholesky(a: &CsrMatrix, perm: &Permutation, fill: f64) -> Result<CholeskyFactor> {
    let levels = a.dims().0;
    let (factor, _) = icc(a, perm, levels, fill)?;
    Ok(factor)
}

impl CholeskyFactor {
    /// Assembles a factor from raw parts, validating the layout: every row
    /// nonempty, diagonal block first, strictly ascending columns. The
    /// diagonal blocks must already hold inverse pivots.
    pub fn from_parts(
        mbs: usize,
        bs: usize,
        row_start: Vec<usize>,
        col_index: Vec<usize>,
        values: Vec<f64>,
        perm: Permutation,
    ) -> Result<Self> {
        if bs == 0 {
            return Err(Error::invalid_arg("block size must be positive"));
        }
        if row_start.len() != mbs + 1 || row_start[0] != 0 {
            return Err(Error::invalid_arg("malformed factor row pointers"));
        }
        let nblocks = row_start[mbs];
        if col_index.len() != nblocks || values.len() != nblocks * bs * bs {
            return Err(Error::invalid_arg("factor array lengths disagree"));
        }
        for k in 0..mbs {
            let (lo, hi) = (row_start[k], row_start[k + 1]);
            if hi <= lo || col_index[lo] != k {
                return Err(Error::invalid_arg(format!(
                    "factor row {} must start with its diagonal block",
                    k
                )));
            }
            for p in lo + 1..hi {
                if col_index[p] <= col_index[p - 1] || col_index[p] >= mbs {
                    return Err(Error::invalid_arg(
                        "factor row columns must ascend within the triangle",
                    ));
                }
            }
        }
        if perm.len() != mbs {
            return Err(Error::invalid_arg("permutation length mismatch"));
        }
        let identity_perm = perm.is_identity();
        Ok(CholeskyFactor {
            mbs,
            bs,
            row_start,
            col_index,
            values,
            work: vec![0.0; mbs * bs],
            perm,
            identity_perm,
        })
    }

    pub fn dims(&self) -> usize {
        self.mbs * self.bs
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    pub fn nblocks(&self) -> usize {
        self.row_start[self.mbs]
    }

    /// Solves `A x = b` for the matrix this factor was computed from.
    ///
    /// The internal scratch buffer is reused across calls, which is why the
    /// receiver is exclusive.
    pub fn solve(&mut self, b: &[f64], x: &mut [f64]) -> Result<()> {
        let m = self.dims();
        if b.len() != m || x.len() != m {
            return Err(Error::invalid_arg(format!(
                "solve dimensions: factor {}, b {}, x {}",
                m,
                b.len(),
                x.len()
            )));
        }
        if self.identity_perm {
            x.copy_from_slice(b);
            self.sweep(None, x);
        } else {
            let bs = self.bs;
            // Work in the permuted space, scatter back at the end.
            let mut work = std::mem::take(&mut self.work);
            for i in 0..self.mbs {
                let src = self.perm.apply(i) * bs;
                work[i * bs..(i + 1) * bs].copy_from_slice(&b[src..src + bs]);
            }
            self.sweep(Some(&mut work), x);
            for i in 0..self.mbs {
                let dst = self.perm.apply(i) * bs;
                x[dst..dst + bs].copy_from_slice(&work[i * bs..(i + 1) * bs]);
            }
            self.work = work;
        }
        Ok(())
    }

    /// Solves one system per right-hand side; both slices hold the columns
    /// concatenated.
    pub fn solve_many(&mut self, b: &[f64], x: &mut [f64]) -> Result<()> {
        let m = self.dims().max(1);
        if b.len() != x.len() || b.len() % m != 0 {
            return Err(Error::invalid_arg("concatenated right-hand sides misshaped"));
        }
        for (bc, xc) in b.chunks_exact(m).zip(x.chunks_exact_mut(m)) {
            self.solve(bc, xc)?;
        }
        Ok(())
    }

    fn sweep(&self, work: Option<&mut [f64]>, x: &mut [f64]) {
        let t: &mut [f64] = match work {
            Some(w) => w,
            None => x,
        };
        match self.bs {
            1 => self.sweep_fixed::<1>(t),
            2 => self.sweep_fixed::<2>(t),
            3 => self.sweep_fixed::<3>(t),
            4 => self.sweep_fixed::<4>(t),
            5 => self.sweep_fixed::<5>(t),
            6 => self.sweep_fixed::<6>(t),
            7 => self.sweep_fixed::<7>(t),
            _ => self.sweep_general(t),
        }
    }

    /// Forward and back substitution with a compile-time block size; the
    /// small fixed sizes unroll fully.
    fn sweep_fixed<const BS: usize>(&self, t: &mut [f64]) {
        let bs2 = BS * BS;
        // Forward: scatter ahead, then scale by the inverse diagonal.
        for k in 0..self.mbs {
            let (lo, hi) = (self.row_start[k], self.row_start[k + 1]);
            let mut xk = [0.0f64; BS];
            xk.copy_from_slice(&t[k * BS..(k + 1) * BS]);
            for p in lo + 1..hi {
                let j = self.col_index[p];
                let blk = &self.values[p * bs2..(p + 1) * bs2];
                let tj = &mut t[j * BS..(j + 1) * BS];
                for c in 0..BS {
                    let mut s = 0.0;
                    for r in 0..BS {
                        s += blk[r * BS + c] * xk[r];
                    }
                    tj[c] += s;
                }
            }
            let dinv = &self.values[lo * bs2..(lo + 1) * bs2];
            let tk = &mut t[k * BS..(k + 1) * BS];
            for r in 0..BS {
                let mut s = 0.0;
                for c in 0..BS {
                    s += dinv[r * BS + c] * xk[c];
                }
                tk[r] = s;
            }
        }
        // Back: gather from the rows already finished.
        for k in (0..self.mbs).rev() {
            let (lo, hi) = (self.row_start[k], self.row_start[k + 1]);
            let mut xk = [0.0f64; BS];
            xk.copy_from_slice(&t[k * BS..(k + 1) * BS]);
            for p in lo + 1..hi {
                let j = self.col_index[p];
                let blk = &self.values[p * bs2..(p + 1) * bs2];
                for r in 0..BS {
                    let mut s = 0.0;
                    for c in 0..BS {
                        s += blk[r * BS + c] * t[j * BS + c];
                    }
                    xk[r] += s;
                }
            }
            t[k * BS..(k + 1) * BS].copy_from_slice(&xk);
        }
    }

    /// Runtime-block-size fallback for blocks larger than seven.
    fn sweep_general(&self, t: &mut [f64]) {
        let bs = self.bs;
        let bs2 = bs * bs;
        let mut xk = vec![0.0f64; bs];
        for k in 0..self.mbs {
            let (lo, hi) = (self.row_start[k], self.row_start[k + 1]);
            xk.copy_from_slice(&t[k * bs..(k + 1) * bs]);
            for p in lo + 1..hi {
                let j = self.col_index[p];
                let blk = &self.values[p * bs2..(p + 1) * bs2];
                for c in 0..bs {
                    let mut s = 0.0;
                    for r in 0..bs {
                        s += blk[r * bs + c] * xk[r];
                    }
                    t[j * bs + c] += s;
                }
            }
            let dinv = &self.values[lo * bs2..(lo + 1) * bs2];
            for r in 0..bs {
                let mut s = 0.0;
                for c in 0..bs {
                    s += dinv[r * bs + c] * xk[c];
                }
                t[k * bs + r] = s;
            }
        }
        for k in (0..self.mbs).rev() {
            let (lo, hi) = (self.row_start[k], self.row_start[k + 1]);
            xk.copy_from_slice(&t[k * bs..(k + 1) * bs]);
            for p in lo + 1..hi {
                let j = self.col_index[p];
                let blk = &self.values[p * bs2..(p + 1) * bs2];
                for r in 0..bs {
                    let mut s = 0.0;
                    for c in 0..bs {
                        s += blk[r * bs + c] * t[j * bs + c];
                    }
                    xk[r] += s;
                }
            }
            t[k * bs..(k + 1) * bs].copy_from_slice(&xk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::csr::InsertMode;
    use approx::assert_relative_eq;

    fn csr_from_dense(d: &[&[f64]]) -> CsrMatrix {
        let m = d.len();
        let n = d[0].len();
        let mut a = CsrMatrix::with_uniform_nnz(m, n, n).unwrap();
        for (i, row) in d.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    a.set_value(i, j, v, InsertMode::Insert).unwrap();
                }
            }
        }
        a.assembly_end();
        a
    }

    fn spd_5() -> CsrMatrix {
        // Diagonally dominant, symmetric positive definite, with a pattern
        // whose elimination generates fill at (1, 3) and (2, 4).
        csr_from_dense(&[
            &[10.0, 1.0, 0.0, 2.0, 0.0],
            &[1.0, 12.0, 1.0, 0.0, 2.0],
            &[0.0, 1.0, 11.0, 1.0, 0.0],
            &[2.0, 0.0, 1.0, 13.0, 1.0],
            &[0.0, 2.0, 0.0, 1.0, 9.0],
        ])
    }

    #[test]
    fn zero_level_tridiagonal_adds_no_fill() {
        let a = csr_from_dense(&[
            &[4.0, 1.0, 0.0, 0.0],
            &[1.0, 4.0, 1.0, 0.0],
            &[0.0, 1.0, 4.0, 1.0],
            &[0.0, 0.0, 1.0, 4.0],
        ]);
        let upper = SbMatrix::from_csr_upper(&a, &Permutation::identity(4)).unwrap();
        let (sym, info) = icc_symbolic(&upper, 0, 1.0).unwrap();
        assert_eq!(sym.row_pattern(0), &[0, 1]);
        assert_eq!(sym.row_pattern(2), &[2, 3]);
        assert_eq!(sym.row_pattern(3), &[3]);
        assert_eq!(info.reallocs, 0);
        assert_relative_eq!(info.fill_needed, 1.0);
    }

    #[test]
    fn level_one_fill_appears_where_expected() {
        // Row 0 couples columns 1 and 3, so eliminating it fills (1, 3)
        // at level one.
        let a = csr_from_dense(&[
            &[4.0, 1.0, 0.0, 1.0],
            &[1.0, 4.0, 1.0, 0.0],
            &[0.0, 1.0, 4.0, 1.0],
            &[1.0, 0.0, 1.0, 4.0],
        ]);
        let upper = SbMatrix::from_csr_upper(&a, &Permutation::identity(4)).unwrap();
        let (sym0, _) = icc_symbolic(&upper, 0, 1.0).unwrap();
        assert_eq!(sym0.row_pattern(1), &[1, 2]);
        let (sym1, _) = icc_symbolic(&upper, 1, 1.0).unwrap();
        assert_eq!(sym1.row_pattern(1), &[1, 2, 3]);
    }

    #[test]
    fn pool_growth_is_counted() {
        let a = spd_5();
        let upper = SbMatrix::from_csr_upper(&a, &Permutation::identity(5)).unwrap();
        // Deliberately undersized pool: fill clamps to 1.0, but full levels
        // generate fill beyond the input pattern.
        let (_, info) = icc_symbolic(&upper, 5, 1.0).unwrap();
        assert!(info.fill_needed > 1.0);
        assert!(info.reallocs >= 1);
    }

    #[test]
    fn duplicate_column_is_reported() {
        let upper = SbMatrix::from_blocks(
            3,
            1,
            vec![0, 3, 4, 5],
            vec![0, 1, 1, 1, 2],
            vec![4.0, 1.0, 1.0, 4.0, 4.0],
        )
        .unwrap();
        assert!(matches!(
            icc_symbolic(&upper, 0, 1.0),
            Err(Error::DuplicateEntry { row: 0, col: 1 })
        ));
    }

    #[test]
    fn full_fill_cholesky_solves_exactly() {
        let a = spd_5();
        let mut factor = cholesky(&a, &Permutation::identity(5), 2.0).unwrap();
        let x_true = [1.0, -2.0, 3.0, 0.5, -1.5];
        let mut b = [0.0; 5];
        a.mult(&x_true, &mut b).unwrap();
        let mut x = [0.0; 5];
        factor.solve(&b, &mut x).unwrap();
        for (xi, ti) in x.iter().zip(&x_true) {
            assert_relative_eq!(xi, ti, epsilon = 1e-10);
        }
    }

    #[test]
    fn permuted_factor_matches_natural() {
        let a = spd_5();
        let perm = Permutation::new(vec![4, 2, 0, 1, 3]).unwrap();
        let mut natural = cholesky(&a, &Permutation::identity(5), 2.0).unwrap();
        let mut permuted = cholesky(&a, &perm, 2.0).unwrap();
        let b = [3.0, -1.0, 0.0, 2.0, 5.0];
        let mut x1 = [0.0; 5];
        let mut x2 = [0.0; 5];
        natural.solve(&b, &mut x1).unwrap();
        permuted.solve(&b, &mut x2).unwrap();
        for (u, v) in x1.iter().zip(&x2) {
            assert_relative_eq!(u, v, epsilon = 1e-10);
        }
    }

    #[test]
    fn zero_pivot_is_reported() {
        let a = csr_from_dense(&[&[1.0, 1.0], &[1.0, 1.0]]);
        // Second pivot eliminates to zero.
        assert!(matches!(
            cholesky(&a, &Permutation::identity(2), 1.0),
            Err(Error::ZeroPivot { row: 1 })
        ));
    }

    #[test]
    fn missing_diagonal_rejected() {
        let a = csr_from_dense(&[&[1.0, 2.0], &[2.0, 0.0]]);
        assert!(matches!(
            SbMatrix::from_csr_upper(&a, &Permutation::identity(2)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn block_kernel_matches_scalar_kernel() {
        // One 2x2 diagonal-block system solved both as bs = 2 and as the
        // equivalent scalar factor. A = diag([[4,0],[0,2]]) with the
        // identity coupling (single block row), so D^{-1} is explicit.
        let factor2 = CholeskyFactor::from_parts(
            1,
            2,
            vec![0, 1],
            vec![0],
            vec![0.25, 0.0, 0.0, 0.5],
            Permutation::identity(1),
        )
        .unwrap();
        let mut f2 = factor2;
        let mut x2 = [0.0; 2];
        f2.solve(&[8.0, 8.0], &mut x2).unwrap();
        assert_relative_eq!(x2[0], 2.0);
        assert_relative_eq!(x2[1], 4.0);

        // A coupled two-block-row case cross-checked against the dense
        // inverse: A = (I - S^T) D (I - S), bs = 2, one off-diagonal block.
        let d0 = [2.0, 0.0, 0.0, 3.0];
        let s01 = [0.5, -0.25, 0.0, 0.75];
        let d1 = [4.0, 0.0, 0.0, 5.0];
        let mut f = CholeskyFactor::from_parts(
            2,
            2,
            vec![0, 2, 3],
            vec![0, 1, 1],
            vec![
                0.5, 0.0, 0.0, 1.0 / 3.0, // D0^{-1}
                s01[0], s01[1], s01[2], s01[3],
                0.25, 0.0, 0.0, 0.2, // D1^{-1}
            ],
            Permutation::identity(2),
        )
        .unwrap();
        // Build A x for a known x by applying (I - S^T) D (I - S).
        let x_true = [1.0, 2.0, -1.0, 0.5];
        // w = (I - S) x
        let mut w = x_true;
        for r in 0..2 {
            for c in 0..2 {
                w[r] -= s01[r * 2 + c] * x_true[2 + c];
            }
        }
        // w = D w
        let mut dw = [0.0; 4];
        for r in 0..2 {
            for c in 0..2 {
                dw[r] += d0[r * 2 + c] * w[c];
                dw[2 + r] += d1[r * 2 + c] * w[2 + c];
            }
        }
        // b = (I - S^T) dw
        let mut b = dw;
        for r in 0..2 {
            for c in 0..2 {
                b[2 + r] -= s01[c * 2 + r] * dw[c];
            }
        }
        let mut x = [0.0; 4];
        f.solve(&b, &mut x).unwrap();
        for (u, v) in x.iter().zip(&x_true) {
            assert_relative_eq!(u, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn large_block_fallback_agrees_with_direct_inverse() {
        // Single 8x8 diagonal block exercises the runtime-size path.
        let n = 8;
        let mut dinv = vec![0.0; n * n];
        for i in 0..n {
            dinv[i * n + i] = 1.0 / (i + 1) as f64;
        }
        let mut f = CholeskyFactor::from_parts(
            1,
            n,
            vec![0, 1],
            vec![0],
            dinv,
            Permutation::identity(1),
        )
        .unwrap();
        let b: Vec<f64> = (1..=n).map(|i| (i * i) as f64).collect();
        let mut x = vec![0.0; n];
        f.solve(&b, &mut x).unwrap();
        for i in 0..n {
            assert_relative_eq!(x[i], (i + 1) as f64);
        }
    }

    #[test]
    fn solve_many_handles_concatenated_columns() {
        let a = spd_5();
        let mut factor = cholesky(&a, &Permutation::identity(5), 2.0).unwrap();
        let xs = [
            [1.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0, -1.0],
        ];
        let mut b = vec![0.0; 10];
        for (k, xt) in xs.iter().enumerate() {
            let mut bk = [0.0; 5];
            a.mult(xt, &mut bk).unwrap();
            b[k * 5..(k + 1) * 5].copy_from_slice(&bk);
        }
        let mut x = vec![0.0; 10];
        factor.solve_many(&b, &mut x).unwrap();
        for (k, xt) in xs.iter().enumerate() {
            for i in 0..5 {
                assert_relative_eq!(x[k * 5 + i], xt[i], epsilon = 1e-10);
            }
        }
    }
}
