//! Kidney Paired Donation Market Simulation
//!
//! Runs a kidney exchange market period by period: pairs and altruists
//! arrive, the configured matching strategy picks cycles and chains, and
//! matched pairs leave. Every run is reproducible from its config and seed.
//!
//! # Modules
//! - `config`: Run configuration, loaded from JSON
//! - `population`: Pair and altruist sampling
//! - `composition`: Running counts by CPRA bucket and blood types
//! - `scheduler`: The six stages of one period
//! - `simulation`: Whole-run driver
//! - `metrics`: Per-period reports and run summary
//! - `weights`: Learned pair weights and the training loop
//! - `replay`: Deterministic replay validation
//! - `export`: Run export to JSON

pub mod composition;
pub mod config;
pub mod export;
pub mod metrics;
pub mod population;
pub mod replay;
pub mod scheduler;
pub mod simulation;
pub mod weights;

pub use config::SimulationConfig;
pub use simulation::Simulation;

/// Crate version constant
pub const VERSION: &str = "1.0.0";
