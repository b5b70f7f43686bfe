//! Simulation runner
//!
//! Without a config file the defaults are used. `--train` runs the
//! weight-learning loop and prints the learned table instead of a run
//! summary. `RUST_LOG` overrides `--log-level`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use simulation::export::{build_export, write_to_file};
use simulation::weights::train;
use simulation::{Simulation, SimulationConfig};
use tracing_subscriber::EnvFilter;

/// Kidney paired donation market simulator
#[derive(Parser, Debug)]
#[command(name = "kpd-sim")]
#[command(about = "Kidney paired donation market simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON config file; defaults apply to missing fields
    #[arg(env = "KPD_CONFIG")]
    config: Option<PathBuf>,

    /// Write the run export (config and summary) to this path
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Learn a weight table over this many rounds and print it
    #[arg(long, value_name = "ROUNDS")]
    train: Option<u32>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => SimulationConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SimulationConfig::default(),
    };

    if let Some(rounds) = cli.train {
        let table = train(&config, rounds)?;
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    tracing::info!(seed = config.seed, periods = config.num_periods, "starting simulation");
    let summary = Simulation::new(config.clone())?.run()?;
    println!("{}", summary.summary());

    if let Some(path) = &cli.out {
        write_to_file(&build_export(&config, &summary), path)?;
        tracing::info!(path = %path.display(), "export written");
    }
    Ok(())
}
