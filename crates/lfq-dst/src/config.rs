//! Environment-driven configuration for reproducible runs.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `DST_SEED` | Seed for every random decision | random |
//! | `DST_ITERATIONS` | Operations per DST scenario | 1000 |

use tracing::info;

use crate::error::{DstError, Result};

pub const ENV_SEED: &str = "DST_SEED";
pub const ENV_ITERATIONS: &str = "DST_ITERATIONS";

const ITERATIONS_DEFAULT: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstConfig {
    pub seed: u64,
    pub iterations: u64,
}

impl DstConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            seed: get_or_generate_seed()?,
            iterations: env_u64(ENV_ITERATIONS)?.unwrap_or(ITERATIONS_DEFAULT),
        })
    }
}

/// Seed from `DST_SEED`, or a fresh random one.
///
/// The seed is logged either way; rerun with `DST_SEED=<seed>` to reproduce.
/// Zero is rejected: counterexamples treat it as "no seed".
pub fn get_or_generate_seed() -> Result<u64> {
    seed_or_random(env_u64(ENV_SEED)?)
}

fn seed_or_random(configured: Option<u64>) -> Result<u64> {
    match configured {
        Some(0) => Err(DstError::ZeroSeed),
        Some(seed) => {
            info!(seed, "DST_SEED from environment");
            Ok(seed)
        }
        None => {
            let seed = rand::random::<u64>().max(1);
            info!(seed, "DST_SEED randomly generated");
            Ok(seed)
        }
    }
}

/// Read an unsigned integer environment variable; unset means `None`.
pub fn env_u64(name: &'static str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DstError::InvalidEnvVar { name, value: raw }),
        Err(_) => Ok(None),
    }
}
