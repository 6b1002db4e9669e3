// =============================================================================
// Error Types
// =============================================================================
//
// All fallible operations in this crate return `Result<T>` with the single
// error enum below. Errors are fatal for the caller: there is no retry or
// recovery logic anywhere in the library. The one condition that is reported
// rather than raised is optimizer non-convergence, which surfaces as a
// `converged: false` flag on the fit result instead of an error.
//
// =============================================================================

use thiserror::Error;

/// Convenient alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MorphMixError>;

/// Errors produced while building tables, parsing formulas or fitting models.
#[derive(Debug, Error)]
pub enum MorphMixError {
    /// Two inputs that must agree in length or shape do not.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An input table, column or vector was empty.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// A numeric value violated an invariant (non-finite, non-positive, ...).
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A formula or summary referenced a column the table does not have.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// An append-only column join collided with an existing column.
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    /// The model formula could not be parsed.
    #[error("formula error: {0}")]
    Formula(String),

    /// A factorization or solve failed, usually from a singular system.
    #[error("linear algebra error: {0}")]
    LinearAlgebra(String),

    /// A model structure this crate deliberately does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),
}
