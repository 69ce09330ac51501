//! Error types for avalanche-analysis.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown extraction method: {0}")]
    UnknownMethod(String),

    #[error("unknown fit region: {0}")]
    UnknownRegion(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Solver(#[from] avalanche_solver::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
