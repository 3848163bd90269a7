//! Permutations and index sets.
//!
//! Small value types used by row/column permutation, submatrix extraction
//! and the factorization orderings. All indices are zero-based.

use crate::error::{Error, Result};

/// A permutation of `0..len`. `perm[i]` is the image of `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    perm: Vec<usize>,
}

impl Permutation {
    /// Builds a permutation from its image vector, validating that it is a
    /// bijection on `0..perm.len()`.
    pub fn new(perm: Vec<usize>) -> Result<Self> {
        let n = perm.len();
        let mut seen = vec![false; n];
        for &p in &perm {
            if p >= n || seen[p] {
                return Err(Error::invalid_arg(format!(
                    "index vector of length {} is not a permutation",
                    n
                )));
            }
            seen[p] = true;
        }
        Ok(Permutation { perm })
    }

    /// The identity permutation on `0..n`.
    pub fn identity(n: usize) -> Self {
        Permutation {
            perm: (0..n).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.perm.iter().enumerate().all(|(i, &p)| i == p)
    }

    /// Image of index `i`.
    #[inline]
    pub fn apply(&self, i: usize) -> usize {
        self.perm[i]
    }

    pub fn indices(&self) -> &[usize] {
        &self.perm
    }

    /// The inverse permutation.
    pub fn invert(&self) -> Permutation {
        let mut inv = vec![0usize; self.perm.len()];
        for (i, &p) in self.perm.iter().enumerate() {
            inv[p] = i;
        }
        Permutation { perm: inv }
    }
}

/// A selection of row or column indices.
///
/// The `Stride` form keeps first/step/len implicitly; step-1 stride sets
/// enable the contiguous-window fast path in submatrix extraction.
#[derive(Debug, Clone)]
pub enum IndexSet {
    Stride {
        first: usize,
        step: usize,
        len: usize,
    },
    General {
        indices: Vec<usize>,
    },
}

impl IndexSet {
    pub fn stride(first: usize, step: usize, len: usize) -> Result<Self> {
        if step == 0 && len > 1 {
            return Err(Error::invalid_arg("stride index set with step 0"));
        }
        Ok(IndexSet::Stride { first, step, len })
    }

    pub fn general(indices: Vec<usize>) -> Self {
        IndexSet::General { indices }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexSet::Stride { len, .. } => *len,
            IndexSet::General { indices } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize) -> usize {
        match self {
            IndexSet::Stride { first, step, .. } => first + i * step,
            IndexSet::General { indices } => indices[i],
        }
    }

    /// True iff the indices are in strictly ascending order.
    pub fn is_sorted(&self) -> bool {
        match self {
            IndexSet::Stride { .. } => true,
            IndexSet::General { indices } => indices.windows(2).all(|w| w[0] < w[1]),
        }
    }

    /// `(first, len)` when this set is a contiguous step-1 window.
    pub fn contiguous_window(&self) -> Option<(usize, usize)> {
        match self {
            IndexSet::Stride { first, step: 1, len } => Some((*first, *len)),
            IndexSet::Stride { first, len, .. } if *len <= 1 => Some((*first, *len)),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map(move |i| self.index(i))
    }
}
