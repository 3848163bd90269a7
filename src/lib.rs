//! sparseqp: a sparse linear-algebra engine with an interior-point QP
//! solver on top.
//!
//! The crate has two layers:
//!
//! - **`linalg`**: compressed-row sparse storage with incremental assembly
//!   ([`CsrMatrix`]), symmetric incomplete Cholesky with permutation-aware
//!   block solve kernels, restarted GMRES with classical Gram-Schmidt
//!   orthogonalization, and a name-keyed registry of linear solver
//!   strategies.
//! - **`ipm`**: a Mehrotra predictor-corrector interior-point method for
//!   convex quadratic programs with equality and inequality constraints,
//!   guarded by a backtracking merit line search.
//!
//! # Example
//!
//! ```no_run
//! use sparseqp::{solve_qp, CsrMatrix, InsertMode, IpmSettings, QpProblem};
//!
//! // minimize x1 + x2 + 0.5 (x1^2 + x2^2)  s.t.  x1 + x2 = 1, x >= 0
//! let mut h = CsrMatrix::with_uniform_nnz(2, 2, 1)?;
//! h.set_value(0, 0, 1.0, InsertMode::Insert)?;
//! h.set_value(1, 1, 1.0, InsertMode::Insert)?;
//! h.assembly_end();
//! # let a_eq = h.duplicate(true);
//! # let a_in = h.duplicate(true);
//! let prob = QpProblem {
//!     h,
//!     d: vec![1.0, 1.0],
//!     a_eq: Some(a_eq),
//!     b_eq: vec![0.5, 0.5],
//!     a_in: Some(a_in),
//!     b_in: vec![0.0, 0.0],
//! };
//! let result = solve_qp(&prob, &[0.5, 0.5], &IpmSettings::default())?;
//! println!("{}: objective {}", result.status, result.objective);
//! # Ok::<(), sparseqp::Error>(())
//! ```

pub mod error;
pub mod ipm;
pub mod linalg;
pub mod problem;

pub use error::{Error, Result};
pub use ipm::kkt::{IpmState, KktResiduals};
pub use ipm::solve_qp;
pub use linalg::chol::{cholesky, icc, CholeskyFactor, IccInfo, SbMatrix};
pub use linalg::csr::{CsrMatrix, InsertMode, MatrixInfo, NonzeroPolicy, NormKind};
pub use linalg::gmres::{Gmres, GmresOutcome, GmresSettings};
pub use linalg::index::{IndexSet, Permutation};
pub use linalg::io::{read_binary, write_ascii, write_binary};
pub use linalg::solver::{DirectCholesky, KrylovGmres, LinearSolver, SolverRegistry};
pub use problem::{IpmSettings, QpProblem, SolveInfo, SolveResult, SolveStatus};
