//! lfq-stress: stress and fault-injection runner for `ConcurrentQueue`.
//!
//! # Usage
//!
//! ```bash
//! lfq-stress --producers 8 --consumers 8 --ops-per-producer 100000
//! DST_SEED=12345 lfq-stress --fault-rate 0.05 --json
//! ```
//!
//! Two phases run against a fresh `ConcurrentQueue<u64>` each:
//!
//! 1. a single-threaded DST scenario with faults injected at operation
//!    boundaries, checked against every queue invariant
//! 2. the concurrent stress driver, with seeded delays between operations
//!
//! Exits non-zero when either phase observes a violation.

use std::process::ExitCode;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lfq_dst::{
    generate_ops, get_or_generate_seed, run_dst_scenario_with, run_stress, DeterministicRng, FaultConfig,
    StressConfig,
};
use lfq_queue::ConcurrentQueue;

/// Operations in the single-threaded DST phase.
const DST_OPS_DEFAULT: usize = 10_000;

/// Run the lock-free queue under concurrent stress and fault injection.
#[derive(Parser, Debug)]
#[command(name = "lfq-stress")]
#[command(about = "Stress and fault-injection runner for the lock-free queue")]
struct Cli {
    /// Producer threads.
    #[arg(long, env = "LFQ_PRODUCERS", default_value_t = 8)]
    producers: usize,

    /// Consumer threads.
    #[arg(long, env = "LFQ_CONSUMERS", default_value_t = 8)]
    consumers: usize,

    /// Values pushed by each producer.
    #[arg(long, env = "LFQ_OPS_PER_PRODUCER", default_value_t = 10_000)]
    ops_per_producer: u64,

    /// Seed for every random decision (random if not set).
    #[arg(long, env = "DST_SEED")]
    seed: Option<u64>,

    /// Probability of an injected fault or delay at each operation boundary.
    #[arg(long, default_value_t = 0.01)]
    fault_rate: f64,

    /// Operations in the single-threaded DST phase.
    #[arg(long, default_value_t = DST_OPS_DEFAULT)]
    dst_ops: usize,

    /// Print a JSON report instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let seed = match cli.seed {
        Some(seed) => {
            ensure!(seed != 0, "--seed must be non-zero");
            seed
        }
        None => get_or_generate_seed().context("failed to pick a DST seed")?,
    };

    let faults = FaultConfig {
        fault_probability: cli.fault_rate,
        delay_probability: cli.fault_rate,
        ..FaultConfig::default()
    };
    faults.validate().context("invalid --fault-rate")?;

    info!(seed, dst_ops = cli.dst_ops, fault_rate = cli.fault_rate, "DST phase");
    let ops = generate_ops(&mut DeterministicRng::new(seed), cli.dst_ops);
    let dst = run_dst_scenario_with::<ConcurrentQueue<u64>>(seed, ops, faults);

    let config = StressConfig::new(cli.producers, cli.consumers, cli.ops_per_producer, seed).with_faults(faults);
    let queue = ConcurrentQueue::new();
    let stress = run_stress(&queue, &config).context("stress run could not start")?;

    let passed = dst.passed && stress.passed();
    if cli.json {
        let report = json!({
            "seed": seed,
            "passed": passed,
            "dst": {
                "passed": dst.passed,
                "stats": dst.stats,
                "violations": dst.violations,
                "fault_errors": dst.fault_errors.len(),
            },
            "stress": stress,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        println!("{}", dst.format());
        println!("{}", stress.format());
    }

    if passed {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(seed, "queue invariants violated; rerun with DST_SEED={}", seed);
        Ok(ExitCode::FAILURE)
    }
}
