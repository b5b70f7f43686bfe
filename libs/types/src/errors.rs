//! Error types for the exchange simulator
//!
//! One enum per concern, composed upward with `#[from]`.

use thiserror::Error;

/// A core-logic bug: partner asymmetry, a non-bipartite edge, or a
/// participant matched twice. Always fatal for the run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invariant violated: {reason}")]
pub struct InvariantViolation {
    pub reason: String,
}

impl InvariantViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Compatibility graph errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Pair {pair} is already in the market")]
    DuplicatePair { pair: u64 },

    #[error("Invalid pair {pair}: {reason}")]
    InvalidPair { pair: u64, reason: String },
}

/// Weighted bipartite assignment errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssignmentError {
    #[error("Weight matrix is not square: {rows} rows, row {row} has {cols} columns")]
    NotSquare { rows: usize, row: usize, cols: usize },
}

/// Packing solver errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Formulation is infeasible")]
    Infeasible,

    #[error("Solver failed: {reason}")]
    Failed { reason: String },
}

/// Errors raised while computing a period's matching
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchingError {
    #[error("Candidate references unknown pair {pair}")]
    InvalidCandidate { pair: u64 },

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),
}

impl MatchingError {
    /// Fatal errors abort the run; everything else downgrades the period
    /// to zero matches.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MatchingError::InvariantViolation(_))
    }
}

/// Top-level simulation error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),

    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

impl SimulationError {
    pub fn config(reason: impl Into<String>) -> Self {
        SimulationError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for SimulationError {
    fn from(err: std::io::Error) -> Self {
        SimulationError::Io { reason: err.to_string() }
    }
}
