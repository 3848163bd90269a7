//! Crate-wide error type.
//!
//! Every fallible operation in the matrix engine, the factorizations and the
//! solver layers returns `Result<_, Error>`. Solver termination outcomes
//! (line-search failure, iteration budgets) are *not* errors; they are
//! reported through [`crate::problem::SolveStatus`] so the caller still gets
//! the best iterate found.

use thiserror::Error;

/// Errors produced by the matrix engine and the solvers built on it.
#[derive(Error, Debug)]
pub enum Error {
    /// Backing storage could not be allocated or grown.
    #[error("allocation failure: {what}")]
    Allocation { what: &'static str },

    /// A caller-supplied argument is out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not legal in the object's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation or format combination is not implemented.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A matrix stream could not be read or written.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A duplicate column index was found while copying a matrix row
    /// into the factorization workspace.
    #[error("duplicate entry in row {row}, column {col}")]
    DuplicateEntry { row: usize, col: usize },

    /// Numeric factorization encountered a zero (or numerically zero) pivot.
    #[error("zero pivot in row {row}")]
    ZeroPivot { row: usize },
}

impl Error {
    pub(crate) fn invalid_arg(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedOperation(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
