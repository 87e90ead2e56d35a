//! Simulation environment bundling the seed, RNG and fault injector.

use std::fmt;

use crate::config::DstConfig;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;

pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    fault: FaultInjector,
    operations: u64,
}

impl DstEnv {
    /// Environment with the default fault configuration.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        // separate streams so fault rolls do not shift workload choices
        Self {
            seed,
            rng: DeterministicRng::new(seed),
            fault: FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config),
            operations: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &DstConfig, faults: FaultConfig) -> Self {
        Self::with_fault_config(config.seed, faults)
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    pub fn maybe_delay(&mut self) -> bool {
        self.fault.maybe_delay()
    }

    pub fn record_operation(&mut self) {
        self.operations += 1;
    }

    /// `DST_SEED=<seed>`, for assertion messages.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }

    #[must_use]
    pub fn stats(&self) -> EnvStats {
        EnvStats {
            seed: self.seed,
            operations: self.operations,
            faults_injected: self.fault.faults_injected(),
            delays_injected: self.fault.delays_injected(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvStats {
    pub seed: u64,
    pub operations: u64,
    pub faults_injected: u64,
    pub delays_injected: u64,
}

impl fmt::Display for EnvStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DST_SEED={} ops={} faults={} delays={}",
            self.seed, self.operations, self.faults_injected, self.delays_injected
        )
    }
}
