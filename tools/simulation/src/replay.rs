//! Deterministic replay validation
//!
//! Same config and seed → same market. Runs a simulation twice and
//! compares the final market snapshots.

use std::collections::BTreeSet;

use kpd_types::errors::SimulationError;
use kpd_types::ids::PairId;
use kpd_types::match_result::CycleChainTally;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::simulation::Simulation;

/// A snapshot of market state for comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub pair_ids: BTreeSet<PairId>,
    pub altruists: BTreeSet<PairId>,
    pub edge_count: usize,
    pub total_transplants: u64,
    pub tally: CycleChainTally,
}

/// Run every period of `simulation` and capture the final market.
pub fn run_and_snapshot(mut simulation: Simulation) -> Result<MarketSnapshot, SimulationError> {
    let periods = simulation.config().num_periods;
    let mut total_transplants = 0;
    let mut tally = CycleChainTally::default();
    for period in 0..periods {
        let report = simulation.step(period)?;
        total_transplants += report.transplants as u64;
        tally.merge(&report.tally);
    }

    let graph = simulation.scheduler().graph();
    Ok(MarketSnapshot {
        pair_ids: graph.pair_ids(),
        altruists: graph.altruists().clone(),
        edge_count: graph.edge_count(),
        total_transplants,
        tally,
    })
}

/// Validate determinism: run the same config twice and compare snapshots.
pub fn validate_determinism(config: &SimulationConfig) -> Result<ReplayValidation, SimulationError> {
    let original = run_and_snapshot(Simulation::new(config.clone())?)?;
    let replayed = run_and_snapshot(Simulation::new(config.clone())?)?;
    Ok(ReplayValidation {
        matches: original == replayed,
        original,
        replayed,
    })
}

/// Result of replay validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayValidation {
    pub matches: bool,
    pub original: MarketSnapshot,
    pub replayed: MarketSnapshot,
}
