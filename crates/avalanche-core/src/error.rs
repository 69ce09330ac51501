//! Error types for avalanche-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("species '{species}' has no level with index {level}")]
    InvalidLevelReference { species: String, level: usize },

    #[error("negative rate {rate:e} on transition {from} -> {to} of '{species}'")]
    NegativeRate {
        species: String,
        from: usize,
        to: usize,
        rate: f64,
    },

    #[error("invalid pump configuration: {0}")]
    InvalidPump(String),

    #[error("invalid material: {0}")]
    InvalidMaterial(String),
}

pub type Result<T> = std::result::Result<T, Error>;
