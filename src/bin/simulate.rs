//! Random-action mux simulator
//!
//! Run with: cargo run --bin simulate -- [OPTIONS]
//!
//! Examples:
//!   cargo run --bin simulate                          # one run, random seeds
//!   cargo run --bin simulate -- --seed1 4 --seed2 2   # reproduce a run
//!   cargo run --bin simulate -- --times 20            # 20 runs, random seeds
//!   cargo run --bin simulate -- --endless --debug     # soak until interrupted

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wsmux::sim::{Simulator, SimulatorConfig};

#[derive(Debug, Parser)]
#[command(name = "simulate", about = "Drive a mux with randomized user traffic")]
struct Args {
    /// First seed value (random when omitted)
    #[arg(long)]
    seed1: Option<u64>,

    /// Second seed value (random when omitted)
    #[arg(long)]
    seed2: Option<u64>,

    /// Steps per run
    #[arg(long, default_value_t = 100_000)]
    iterations: u32,

    /// Number of runs, each with fresh random seeds
    #[arg(long, default_value_t = 1)]
    times: u32,

    /// Keep running until interrupted
    #[arg(long)]
    endless: bool,

    /// Include debug logs
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let config = SimulatorConfig {
        iterations: args.iterations,
        ..SimulatorConfig::default()
    };

    if args.endless {
        loop {
            run_once(rand::random(), rand::random(), config.clone());
        }
    }

    for i in 0..args.times {
        // Explicit seeds only apply to the first run; later runs roll fresh
        // ones so repeated runs actually explore.
        let (seed1, seed2) = if i == 0 {
            (
                args.seed1.unwrap_or_else(rand::random),
                args.seed2.unwrap_or_else(rand::random),
            )
        } else {
            (rand::random(), rand::random())
        };
        run_once(seed1, seed2, config.clone());
    }
}

fn run_once(seed1: u64, seed2: u64, config: SimulatorConfig) {
    let mut simulator = Simulator::new(seed1, seed2, config);
    simulator.run();
    simulator.verify();
}
