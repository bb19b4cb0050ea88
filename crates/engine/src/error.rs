//! Error types for the sheet API.

use thiserror::Error;

use crate::formula::FormulaParseError;
use crate::position::Position;

/// Errors surfaced by sheet operations.
///
/// Evaluation-time failures (`EvalError`) are not here: they are values,
/// observed through `get_value`/`print_values`, and never abort a mutation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("position ({}, {}) is outside the sheet", .0.row, .0.col)]
    InvalidPosition(Position),

    #[error("circular dependency through {0}")]
    CircularDependency(Position),

    #[error(transparent)]
    Parse(#[from] FormulaParseError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
