//! Linear algebra layer.
//!
//! Sparse storage, factorization, iterative solvers, and supporting index
//! types.

pub mod chol;
pub mod csr;
pub mod gmres;
pub mod index;
pub mod io;
pub mod solver;
