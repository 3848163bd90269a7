//! Compressed-row sparse matrix storage with incremental assembly.
//!
//! Rows are preallocated with caller-supplied nonzero hints and carry slack
//! until [`CsrMatrix::assembly_end`] compacts the store. Insertions keep
//! each row's column indices sorted; a row that overflows its allocation
//! grows the whole store by a fixed chunk and shifts the following rows,
//! which is observable only through [`CsrMatrix::info`]. All indices are
//! zero-based.

use crate::error::{Error, Result};
use crate::linalg::index::{IndexSet, Permutation};

/// Extra slots added to a row when an insertion overflows its allocation.
const CHUNK: usize = 15;
/// Candidate-window size below which insertion search goes linear.
const BSEARCH_CUTOFF: usize = 5;
/// Per-row nonzero hint used when the caller gives none.
const DEFAULT_ROW_NNZ: usize = 10;
/// Maximum number of rows grouped into one identical-pattern node.
const INODE_LIMIT: usize = 5;

/// How `set_value` combines with an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Overwrite the stored value.
    Insert,
    /// Accumulate into the stored value.
    Add,
}

/// Policy for insertions at locations with no allocated nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonzeroPolicy {
    /// Insert, growing the row allocation when needed.
    AllowGrowth,
    /// Silently drop values aimed at unallocated locations.
    IgnoreNew,
    /// Fail on any value aimed at an unallocated location.
    ErrorOnNew,
    /// Insert into free slack, but fail if growth would be required.
    ErrorOnAlloc,
}

/// Matrix norms computable on this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormKind {
    One,
    Frobenius,
    Infinity,
    /// Not implemented for sparse storage.
    Two,
}

/// Assembly and storage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixInfo {
    pub nz_used: usize,
    pub nz_allocated: usize,
    /// Slack eliminated by the last compaction.
    pub nz_unneeded: usize,
    /// Number of store-growing reallocations since creation.
    pub reallocs: usize,
}

/// Sparse matrix in compressed-row format.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    m: usize,
    n: usize,
    /// Row pointers, `m + 1` entries. Before compaction
    /// `row_start[i + 1] - row_start[i] == allocated[i]`, afterwards it
    /// equals `used[i]`.
    row_start: Vec<usize>,
    col_index: Vec<usize>,
    values: Vec<f64>,
    /// Per-row allocation, including slack.
    allocated: Vec<usize>,
    /// Per-row entry count.
    used: Vec<usize>,
    policy: NonzeroPolicy,
    assembled: bool,
    nz: usize,
    reallocs: usize,
    nz_unneeded: usize,
    /// Cached diagonal positions, invalidated when entries move.
    diag: Option<Vec<Option<usize>>>,
    /// Values saved by `store_values`.
    saved: Option<Vec<f64>>,
    /// Run lengths of consecutive rows with identical column patterns.
    inodes: Option<Vec<usize>>,
    inode_limit: usize,
}

fn alloc_zeroed<T: Clone + Default>(len: usize, what: &'static str) -> Result<Vec<T>> {
    let mut v: Vec<T> = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| Error::Allocation { what })?;
    v.resize(len, T::default());
    Ok(v)
}

impl CsrMatrix {
    /// Creates an `m` x `n` matrix with the default per-row nonzero hint.
    pub fn new(m: usize, n: usize) -> Result<Self> {
        Self::with_uniform_nnz(m, n, DEFAULT_ROW_NNZ)
    }

    /// Creates an `m` x `n` matrix preallocating `nnz_per_row` slots per
    /// row. A hint of zero is clamped to one.
    pub fn with_uniform_nnz(m: usize, n: usize, nnz_per_row: usize) -> Result<Self> {
        let hint = nnz_per_row.max(1).min(n.max(1));
        Self::with_row_nnz(m, n, &vec![hint; m])
    }

    /// Creates an `m` x `n` matrix with per-row nonzero hints.
    ///
    /// # Errors
    /// `InvalidArgument` if `row_nnz.len() != m`; `Allocation` if the
    /// backing store cannot be reserved.
    pub fn with_row_nnz(m: usize, n: usize, row_nnz: &[usize]) -> Result<Self> {
        if row_nnz.len() != m {
            return Err(Error::invalid_arg(format!(
                "row nonzero hints: expected {} entries, got {}",
                m,
                row_nnz.len()
            )));
        }
        let mut row_start = alloc_zeroed::<usize>(m + 1, "row pointers")?;
        let mut total = 0usize;
        for (i, &nz) in row_nnz.iter().enumerate() {
            row_start[i] = total;
            total += nz.min(n.max(1));
        }
        row_start[m] = total;
        let allocated: Vec<usize> = (0..m).map(|i| row_start[i + 1] - row_start[i]).collect();
        Ok(CsrMatrix {
            m,
            n,
            col_index: alloc_zeroed(total, "column indices")?,
            values: alloc_zeroed(total, "values")?,
            row_start,
            allocated,
            used: vec![0; m],
            policy: NonzeroPolicy::AllowGrowth,
            assembled: false,
            nz: 0,
            reallocs: 0,
            nz_unneeded: 0,
            diag: None,
            saved: None,
            inodes: None,
            inode_limit: INODE_LIMIT,
        })
    }

    /// Builds an assembled matrix directly from compact CSR arrays.
    /// Column indices must be sorted and in range within each row.
    pub fn from_csr(
        m: usize,
        n: usize,
        row_start: Vec<usize>,
        col_index: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if row_start.len() != m + 1 || row_start[0] != 0 {
            return Err(Error::invalid_arg("malformed row pointer array"));
        }
        let nz = row_start[m];
        if col_index.len() != nz || values.len() != nz {
            return Err(Error::invalid_arg("row pointers disagree with array lengths"));
        }
        for i in 0..m {
            let (lo, hi) = (row_start[i], row_start[i + 1]);
            if hi < lo || hi > nz {
                return Err(Error::invalid_arg("row pointers not monotone"));
            }
            for k in lo..hi {
                if col_index[k] >= n {
                    return Err(Error::invalid_arg("column index out of range"));
                }
                if k > lo && col_index[k] <= col_index[k - 1] {
                    return Err(Error::invalid_arg("row columns not strictly ascending"));
                }
            }
        }
        let used: Vec<usize> = (0..m).map(|i| row_start[i + 1] - row_start[i]).collect();
        Ok(CsrMatrix {
            m,
            n,
            allocated: used.clone(),
            used,
            col_index,
            values,
            row_start,
            policy: NonzeroPolicy::AllowGrowth,
            assembled: true,
            nz,
            reallocs: 0,
            nz_unneeded: 0,
            diag: None,
            saved: None,
            inodes: None,
            inode_limit: INODE_LIMIT,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.m, self.n)
    }

    pub fn rows(&self) -> usize {
        self.m
    }

    pub fn cols(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.nz
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn policy(&self) -> NonzeroPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: NonzeroPolicy) {
        self.policy = policy;
    }

    pub fn info(&self) -> MatrixInfo {
        MatrixInfo {
            nz_used: self.used.iter().sum(),
            nz_allocated: self.allocated.iter().sum(),
            nz_unneeded: self.nz_unneeded,
            reallocs: self.reallocs,
        }
    }

    /// Column indices and values of row `i`, used entries only.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let lo = self.row_start[i];
        let hi = lo + self.used[i];
        (&self.col_index[lo..hi], &self.values[lo..hi])
    }

    /// Sizes of the identical-pattern row groups found at assembly, if any
    /// group spans more than one row.
    pub fn inode_sizes(&self) -> Option<&[usize]> {
        self.inodes.as_deref()
    }

    // ------------------------------------------------------------------
    // assembly
    // ------------------------------------------------------------------

    /// Inserts or accumulates a single value.
    ///
    /// Insertion keeps the row's columns sorted: a binary search narrows the
    /// candidate window until it holds at most five entries, then a linear
    /// scan finds the slot. What happens at an unallocated location depends
    /// on the matrix's [`NonzeroPolicy`].
    pub fn set_value(&mut self, row: usize, col: usize, v: f64, mode: InsertMode) -> Result<()> {
        if row >= self.m {
            return Err(Error::invalid_arg(format!(
                "row {} out of range (m = {})",
                row, self.m
            )));
        }
        if col >= self.n {
            return Err(Error::invalid_arg(format!(
                "column {} out of range (n = {})",
                col, self.n
            )));
        }
        let rp = self.row_start[row];
        let nrow = self.used[row];

        let mut low = 0usize;
        let mut high = nrow;
        while high - low > BSEARCH_CUTOFF {
            let t = (low + high) / 2;
            if self.col_index[rp + t] > col {
                high = t;
            } else {
                low = t;
            }
        }
        let mut i = low;
        while i < high {
            let c = self.col_index[rp + i];
            if c > col {
                break;
            }
            if c == col {
                match mode {
                    InsertMode::Insert => self.values[rp + i] = v,
                    InsertMode::Add => self.values[rp + i] += v,
                }
                return Ok(());
            }
            i += 1;
        }

        // New nonzero location.
        match self.policy {
            NonzeroPolicy::IgnoreNew => return Ok(()),
            NonzeroPolicy::ErrorOnNew => {
                return Err(Error::invalid_state(format!(
                    "inserting a new nonzero at ({}, {}) with new locations disabled",
                    row, col
                )))
            }
            NonzeroPolicy::AllowGrowth | NonzeroPolicy::ErrorOnAlloc => {}
        }
        if nrow >= self.allocated[row] {
            if self.policy == NonzeroPolicy::ErrorOnAlloc {
                return Err(Error::invalid_state(format!(
                    "row {} is full and growth is disabled",
                    row
                )));
            }
            self.grow_row(row)?;
        }
        // Shift the row tail right and drop the value in.
        let rp = self.row_start[row];
        let mut k = nrow;
        while k > i {
            self.col_index[rp + k] = self.col_index[rp + k - 1];
            self.values[rp + k] = self.values[rp + k - 1];
            k -= 1;
        }
        self.col_index[rp + i] = col;
        self.values[rp + i] = v;
        self.used[row] = nrow + 1;
        self.assembled = false;
        self.diag = None;
        Ok(())
    }

    /// Inserts a dense logical block: `block` is row-major of shape
    /// `rows.len()` x `cols.len()`.
    pub fn set_values(
        &mut self,
        rows: &[usize],
        cols: &[usize],
        block: &[f64],
        mode: InsertMode,
    ) -> Result<()> {
        if block.len() != rows.len() * cols.len() {
            return Err(Error::invalid_arg("value block shape mismatch"));
        }
        for (bi, &r) in rows.iter().enumerate() {
            for (bj, &c) in cols.iter().enumerate() {
                self.set_value(r, c, block[bi * cols.len() + bj], mode)?;
            }
        }
        Ok(())
    }

    /// Grows row `row` by a fixed chunk, shifting all later rows.
    fn grow_row(&mut self, row: usize) -> Result<()> {
        self.col_index
            .try_reserve(CHUNK)
            .map_err(|_| Error::Allocation {
                what: "column index growth",
            })?;
        self.values.try_reserve(CHUNK).map_err(|_| Error::Allocation {
            what: "value growth",
        })?;
        let at = self.row_start[row + 1];
        self.col_index.splice(at..at, std::iter::repeat(0).take(CHUNK));
        self.values.splice(at..at, std::iter::repeat(0.0).take(CHUNK));
        self.allocated[row] += CHUNK;
        for p in self.row_start[row + 1..].iter_mut() {
            *p += CHUNK;
        }
        self.reallocs += 1;
        self.diag = None;
        Ok(())
    }

    /// Compacts the store, eliminating per-row slack, and refreshes the
    /// assembly bookkeeping. Idempotent on an already compact matrix.
    pub fn assembly_end(&mut self) {
        let old_cap = self.col_index.len();
        let mut write = 0usize;
        let mut moved = false;
        for i in 0..self.m {
            let rs = self.row_start[i];
            let len = self.used[i];
            if write != rs {
                self.col_index.copy_within(rs..rs + len, write);
                self.values.copy_within(rs..rs + len, write);
                moved = true;
            }
            self.row_start[i] = write;
            self.allocated[i] = len;
            write += len;
        }
        self.row_start[self.m] = write;
        self.col_index.truncate(write);
        self.values.truncate(write);
        self.nz = write;
        self.nz_unneeded = old_cap - write;
        if moved {
            self.diag = None;
        }
        self.assembled = true;
        self.detect_inodes();
        log::debug!(
            "assembly: {} x {}, nz {}, unneeded slack {}, reallocations {}",
            self.m,
            self.n,
            self.nz,
            self.nz_unneeded,
            self.reallocs
        );
    }

    /// Groups consecutive rows with identical column patterns into nodes of
    /// at most `inode_limit` rows.
    fn detect_inodes(&mut self) {
        if self.m == 0 {
            self.inodes = None;
            return;
        }
        let mut sizes = Vec::new();
        let mut i = 0;
        while i < self.m {
            let mut blk = 1;
            while blk < self.inode_limit && i + blk < self.m {
                let (ca, _) = self.row(i);
                let (cb, _) = self.row(i + blk);
                if ca != cb {
                    break;
                }
                blk += 1;
            }
            sizes.push(blk);
            i += blk;
        }
        if sizes.len() < self.m {
            log::debug!("assembly: found {} identical-pattern nodes of {} rows", sizes.len(), self.m);
            self.inodes = Some(sizes);
        } else {
            self.inodes = None;
        }
    }

    /// Caches the storage position of each row's diagonal entry. The cache
    /// speeds up [`CsrMatrix::diagonal`] and is dropped whenever entries
    /// move.
    pub fn mark_diagonals(&mut self) {
        let mut diag = Vec::with_capacity(self.m);
        for i in 0..self.m {
            let lo = self.row_start[i];
            let (cols, _) = self.row(i);
            diag.push(cols.iter().position(|&c| c == i).map(|p| lo + p));
        }
        self.diag = Some(diag);
    }

    /// Cached diagonal positions, if [`CsrMatrix::mark_diagonals`] ran and
    /// nothing has moved since.
    pub fn diagonal_positions(&self) -> Option<&[Option<usize>]> {
        self.diag.as_deref()
    }

    // ------------------------------------------------------------------
    // value access
    // ------------------------------------------------------------------

    /// Stored value at `(row, col)`; zero for an absent location.
    pub fn get_value(&self, row: usize, col: usize) -> Result<f64> {
        if row >= self.m || col >= self.n {
            return Err(Error::invalid_arg(format!(
                "index ({}, {}) out of range for {} x {}",
                row, col, self.m, self.n
            )));
        }
        let (cols, vals) = self.row(row);
        Ok(match cols.binary_search(&col) {
            Ok(p) => vals[p],
            Err(_) => 0.0,
        })
    }

    /// Fills `out` (row-major, `rows.len()` x `cols.len()`) with stored
    /// values, zeros where no entry exists.
    pub fn get_values(&self, rows: &[usize], cols: &[usize], out: &mut [f64]) -> Result<()> {
        if out.len() != rows.len() * cols.len() {
            return Err(Error::invalid_arg("output block shape mismatch"));
        }
        for (bi, &r) in rows.iter().enumerate() {
            for (bj, &c) in cols.iter().enumerate() {
                out[bi * cols.len() + bj] = self.get_value(r, c)?;
            }
        }
        Ok(())
    }

    /// Zeroes all stored values, keeping the structure.
    pub fn zero_entries(&mut self) {
        for v in self.values.iter_mut() {
            *v = 0.0;
        }
    }

    /// Zeroes the given rows, then sets each row's diagonal entry to
    /// `diag_value` (skipped when zero). The diagonal write goes through the
    /// normal insertion path, so the nonzero policy applies.
    pub fn zero_rows(&mut self, rows: &[usize], diag_value: f64) -> Result<()> {
        for &r in rows {
            if r >= self.m {
                return Err(Error::invalid_arg(format!("row {} out of range", r)));
            }
            let lo = self.row_start[r];
            let hi = lo + self.used[r];
            for v in self.values[lo..hi].iter_mut() {
                *v = 0.0;
            }
        }
        if diag_value != 0.0 {
            for &r in rows {
                if r < self.n {
                    self.set_value(r, r, diag_value, InsertMode::Insert)?;
                }
            }
        }
        Ok(())
    }

    /// Multiplies every stored value by `alpha`.
    pub fn scale(&mut self, alpha: f64) {
        for v in self.values.iter_mut() {
            *v *= alpha;
        }
    }

    /// Adds `alpha` to every diagonal entry. Missing diagonal locations go
    /// through the insertion path, so the nonzero policy applies.
    pub fn shift_diagonal(&mut self, alpha: f64) -> Result<()> {
        for i in 0..self.m.min(self.n) {
            self.set_value(i, i, alpha, InsertMode::Add)?;
        }
        Ok(())
    }

    /// The diagonal as a dense vector, zeros where structurally absent.
    pub fn diagonal(&self) -> Vec<f64> {
        let mut d = vec![0.0; self.m.min(self.n)];
        if let Some(diag) = &self.diag {
            for (i, di) in d.iter_mut().enumerate() {
                if let Some(p) = diag[i] {
                    *di = self.values[p];
                }
            }
            return d;
        }
        for (i, di) in d.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            if let Ok(p) = cols.binary_search(&i) {
                *di = vals[p];
            }
        }
        d
    }

    /// Scales rows by `left` and/or columns by `right` in place.
    pub fn diagonal_scale(&mut self, left: Option<&[f64]>, right: Option<&[f64]>) -> Result<()> {
        if let Some(l) = left {
            if l.len() != self.m {
                return Err(Error::invalid_arg("left scaling length mismatch"));
            }
            for i in 0..self.m {
                let lo = self.row_start[i];
                let hi = lo + self.used[i];
                for v in self.values[lo..hi].iter_mut() {
                    *v *= l[i];
                }
            }
        }
        if let Some(r) = right {
            if r.len() != self.n {
                return Err(Error::invalid_arg("right scaling length mismatch"));
            }
            for i in 0..self.m {
                let lo = self.row_start[i];
                let hi = lo + self.used[i];
                for k in lo..hi {
                    self.values[k] *= r[self.col_index[k]];
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // matrix-vector products
    // ------------------------------------------------------------------

    /// `y = A x`.
    pub fn mult(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        self.check_mult_dims(x.len(), y.len())?;
        for i in 0..self.m {
            let (cols, vals) = self.row(i);
            let mut sum = 0.0;
            for (c, v) in cols.iter().zip(vals) {
                sum += v * x[*c];
            }
            y[i] = sum;
        }
        log::trace!("mult: {} flops", (2 * self.nz).saturating_sub(self.m));
        Ok(())
    }

    /// `z = y + A x`.
    pub fn mult_add(&self, x: &[f64], y: &[f64], z: &mut [f64]) -> Result<()> {
        self.check_mult_dims(x.len(), z.len())?;
        if y.len() != self.m {
            return Err(Error::invalid_arg("additive vector length mismatch"));
        }
        for i in 0..self.m {
            let (cols, vals) = self.row(i);
            let mut sum = y[i];
            for (c, v) in cols.iter().zip(vals) {
                sum += v * x[*c];
            }
            z[i] = sum;
        }
        Ok(())
    }

    /// `y = A^T x`.
    pub fn mult_transpose(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        self.check_mult_dims(y.len(), x.len())?;
        for v in y.iter_mut() {
            *v = 0.0;
        }
        self.scatter_transpose(x, y);
        Ok(())
    }

    /// `z = y + A^T x`.
    pub fn mult_transpose_add(&self, x: &[f64], y: &[f64], z: &mut [f64]) -> Result<()> {
        self.check_mult_dims(z.len(), x.len())?;
        if y.len() != self.n {
            return Err(Error::invalid_arg("additive vector length mismatch"));
        }
        z.copy_from_slice(y);
        self.scatter_transpose(x, z);
        Ok(())
    }

    fn scatter_transpose(&self, x: &[f64], y: &mut [f64]) {
        for i in 0..self.m {
            let (cols, vals) = self.row(i);
            let xi = x[i];
            for (c, v) in cols.iter().zip(vals) {
                y[*c] += v * xi;
            }
        }
    }

    fn check_mult_dims(&self, xlen: usize, ylen: usize) -> Result<()> {
        if xlen != self.n || ylen != self.m {
            return Err(Error::invalid_arg(format!(
                "product dimensions: matrix {} x {}, x {}, y {}",
                self.m, self.n, xlen, ylen
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // reductions and whole-matrix transforms
    // ------------------------------------------------------------------

    /// Matrix norm. The 2-norm is not computable on this format.
    pub fn norm(&self, kind: NormKind) -> Result<f64> {
        match kind {
            NormKind::Frobenius => {
                let mut sum = 0.0;
                for i in 0..self.m {
                    let (_, vals) = self.row(i);
                    for v in vals {
                        sum += v * v;
                    }
                }
                Ok(sum.sqrt())
            }
            NormKind::One => {
                let mut colsum = vec![0.0f64; self.n];
                for i in 0..self.m {
                    let (cols, vals) = self.row(i);
                    for (c, v) in cols.iter().zip(vals) {
                        colsum[*c] += v.abs();
                    }
                }
                Ok(colsum.iter().fold(0.0f64, |a, &b| a.max(b)))
            }
            NormKind::Infinity => {
                let mut best = 0.0f64;
                for i in 0..self.m {
                    let (_, vals) = self.row(i);
                    let rowsum: f64 = vals.iter().map(|v| v.abs()).sum();
                    best = best.max(rowsum);
                }
                Ok(best)
            }
            NormKind::Two => Err(Error::unsupported("2-norm of a sparse matrix")),
        }
    }

    /// Consumes the matrix and returns its transpose.
    pub fn into_transposed(self) -> Result<CsrMatrix> {
        let mut lens = vec![0usize; self.n];
        for i in 0..self.m {
            let (cols, _) = self.row(i);
            for &c in cols {
                lens[c] += 1;
            }
        }
        let mut t = CsrMatrix::with_row_nnz(self.n, self.m, &lens)?;
        // Columns arrive in ascending row order, so each target row fills
        // already sorted; append directly.
        for i in 0..self.m {
            let (cols, vals) = self.row(i);
            for (c, v) in cols.iter().zip(vals) {
                let pos = t.row_start[*c] + t.used[*c];
                t.col_index[pos] = i;
                t.values[pos] = *v;
                t.used[*c] += 1;
            }
        }
        t.assembly_end();
        Ok(t)
    }

    /// Non-consuming transpose convenience.
    pub fn transposed(&self) -> Result<CsrMatrix> {
        self.clone().into_transposed()
    }

    /// Deep copy of the structure, with or without the values.
    pub fn duplicate(&self, copy_values: bool) -> CsrMatrix {
        let mut dup = self.clone();
        dup.saved = None;
        dup.reallocs = 0;
        if !copy_values {
            dup.zero_entries();
        }
        dup
    }

    /// Structural and value equality: dimensions, row pointers, column
    /// indices and values must all match exactly.
    ///
    /// # Errors
    /// `InvalidState` if either matrix is unassembled.
    pub fn equal(&self, other: &CsrMatrix) -> Result<bool> {
        if !self.assembled || !other.assembled {
            return Err(Error::invalid_state("equality test on unassembled matrix"));
        }
        Ok(self.m == other.m
            && self.n == other.n
            && self.nz == other.nz
            && self.row_start == other.row_start
            && self.col_index == other.col_index
            && self.values == other.values)
    }

    // ------------------------------------------------------------------
    // store / retrieve
    // ------------------------------------------------------------------

    /// Saves a copy of the values for later [`CsrMatrix::retrieve_values`].
    ///
    /// Requires the `IgnoreNew` policy so the structure cannot drift between
    /// the store and the retrieve.
    pub fn store_values(&mut self) -> Result<()> {
        if self.policy != NonzeroPolicy::IgnoreNew {
            return Err(Error::invalid_state(
                "store_values requires the ignore-new-nonzero policy",
            ));
        }
        self.saved = Some(self.values.clone());
        Ok(())
    }

    /// Restores the values saved by [`CsrMatrix::store_values`].
    pub fn retrieve_values(&mut self) -> Result<()> {
        if self.policy != NonzeroPolicy::IgnoreNew {
            return Err(Error::invalid_state(
                "retrieve_values requires the ignore-new-nonzero policy",
            ));
        }
        match &self.saved {
            Some(saved) => {
                self.values.copy_from_slice(saved);
                Ok(())
            }
            None => Err(Error::invalid_state(
                "retrieve_values without a prior store_values",
            )),
        }
    }

    // ------------------------------------------------------------------
    // permutation and extraction
    // ------------------------------------------------------------------

    /// Builds `B` with `B[i, j] = A[rowp(i), colp(j)]`.
    ///
    /// Works through the inverted permutations so every target row length is
    /// known up front and no insertion ever reallocates.
    pub fn permute(&self, rowp: &Permutation, colp: &Permutation) -> Result<CsrMatrix> {
        if !self.assembled {
            return Err(Error::invalid_state("permute of unassembled matrix"));
        }
        if rowp.len() != self.m || colp.len() != self.n {
            return Err(Error::invalid_arg("permutation length mismatch"));
        }
        let rinv = rowp.invert();
        let cinv = colp.invert();
        let mut lens = vec![0usize; self.m];
        for i in 0..self.m {
            lens[rinv.apply(i)] = self.used[i];
        }
        let mut b = CsrMatrix::with_row_nnz(self.m, self.n, &lens)?;
        for i in 0..self.m {
            let (cols, vals) = self.row(i);
            let tr = rinv.apply(i);
            for (c, v) in cols.iter().zip(vals) {
                b.set_value(tr, cinv.apply(*c), *v, InsertMode::Insert)?;
            }
        }
        b.assembly_end();
        Ok(b)
    }

    /// Extracts the submatrix selected by sorted row and column index sets.
    ///
    /// A contiguous column window takes a fast path that slices each row
    /// directly; a general column set goes through a presence/renumber map.
    pub fn submatrix(&self, rows: &IndexSet, cols: &IndexSet) -> Result<CsrMatrix> {
        if !self.assembled {
            return Err(Error::invalid_state("submatrix of unassembled matrix"));
        }
        if !rows.is_sorted() || !cols.is_sorted() {
            return Err(Error::invalid_arg("submatrix index sets must be sorted"));
        }
        for r in rows.iter() {
            if r >= self.m {
                return Err(Error::invalid_arg(format!("row {} out of range", r)));
            }
        }
        for c in cols.iter() {
            if c >= self.n {
                return Err(Error::invalid_arg(format!("column {} out of range", c)));
            }
        }
        let sm = rows.len();
        let sn = cols.len();

        if let Some((cstart, clen)) = cols.contiguous_window() {
            let cend = cstart + clen;
            let mut lens = vec![0usize; sm];
            for (bi, r) in rows.iter().enumerate() {
                let (rcols, _) = self.row(r);
                lens[bi] = rcols.iter().filter(|&&c| c >= cstart && c < cend).count();
            }
            let mut sub = CsrMatrix::with_row_nnz(sm, sn, &lens)?;
            for (bi, r) in rows.iter().enumerate() {
                let (rcols, rvals) = self.row(r);
                let mut pos = sub.row_start[bi];
                for (c, v) in rcols.iter().zip(rvals) {
                    if *c >= cstart && *c < cend {
                        sub.col_index[pos] = c - cstart;
                        sub.values[pos] = *v;
                        pos += 1;
                    }
                }
                sub.used[bi] = lens[bi];
            }
            sub.assembly_end();
            return Ok(sub);
        }

        // General path: 1 + new column number per selected column, 0 absent.
        let mut smap = vec![0usize; self.n];
        for (bj, c) in cols.iter().enumerate() {
            smap[c] = bj + 1;
        }
        let mut lens = vec![0usize; sm];
        for (bi, r) in rows.iter().enumerate() {
            let (rcols, _) = self.row(r);
            lens[bi] = rcols.iter().filter(|&&c| smap[c] != 0).count();
        }
        let mut sub = CsrMatrix::with_row_nnz(sm, sn, &lens)?;
        for (bi, r) in rows.iter().enumerate() {
            let (rcols, rvals) = self.row(r);
            for (c, v) in rcols.iter().zip(rvals) {
                if smap[*c] != 0 {
                    sub.set_value(bi, smap[*c] - 1, *v, InsertMode::Insert)?;
                }
            }
        }
        sub.assembly_end();
        Ok(sub)
    }
}
