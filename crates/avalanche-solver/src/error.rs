//! Error types for avalanche-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),

    #[error("integration failed: {0}")]
    IntegrationFailed(String),

    #[error("unknown level '{name}'; available levels: {available:?}")]
    UnknownLevel {
        name: String,
        available: Vec<String>,
    },

    #[error(transparent)]
    Core(#[from] avalanche_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
