//! # Errors
//!
//! $$
//! \text{input} \to \text{Result}\langle T, \text{PortfolioError} \rangle
//! $$
//!
//! Solver non-convergence is deliberately absent here: it is reported through
//! [`crate::types::SolverDiagnostics`] on a best-effort result.

use thiserror::Error;

/// Errors raised by risk models, objectives, the engine and the drivers built on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  /// Too few observations for the requested window.
  #[error("insufficient data for {context}: need at least {required} observations, got {available}")]
  InsufficientData {
    context: String,
    required: usize,
    available: usize,
  },

  /// A market view references an unknown asset or is malformed.
  #[error("invalid market view: {0}")]
  InvalidView(String),

  /// A matrix that has to be inverted is singular or not positive definite.
  #[error("singular matrix: {0}")]
  SingularMatrix(String),

  /// Constraint set is inconsistent (e.g. min > max).
  #[error("invalid constraints: {0}")]
  InvalidConstraints(String),

  /// Vector or matrix sizes do not line up with the asset universe.
  #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
  DimensionMismatch {
    context: String,
    expected: usize,
    found: usize,
  },

  /// A model or driver parameter is outside its valid range.
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),

  /// Unrecognised objective or risk model name.
  #[error("unknown method: {0}")]
  UnknownMethod(String),
}

impl PortfolioError {
  pub(crate) fn insufficient(context: impl Into<String>, required: usize, available: usize) -> Self {
    Self::InsufficientData {
      context: context.into(),
      required,
      available,
    }
  }

  pub(crate) fn mismatch(context: impl Into<String>, expected: usize, found: usize) -> Self {
    Self::DimensionMismatch {
      context: context.into(),
      expected,
      found,
    }
  }

  /// `true` for errors that only invalidate a single period or asset.
  pub fn is_data_insufficiency(&self) -> bool {
    matches!(self, Self::InsufficientData { .. })
  }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
