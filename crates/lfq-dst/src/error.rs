//! Errors raised while configuring a DST or stress run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DstError {
    #[error("{name} must be a valid unsigned integer, got {value:?}")]
    InvalidEnvVar { name: &'static str, value: String },

    #[error("DST_SEED must be non-zero")]
    ZeroSeed,

    #[error("{name} must be within [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("invalid stress configuration: {0}")]
    InvalidStressConfig(String),
}

pub type Result<T> = std::result::Result<T, DstError>;
