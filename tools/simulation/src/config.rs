//! Simulation configuration
//!
//! Every field has a default, so a JSON file only needs to name what it
//! overrides. Matching strategy and weight policy are built from the
//! config per run and handed to the scheduler.

use std::fs;
use std::path::Path;

use kpd_types::errors::SimulationError;
use kpd_types::participant::CPRA_BUCKETS;
use matching_engine::formulation::PackingObjective;
use matching_engine::solver::BranchAndBound;
use matching_engine::{
    AssignmentStrategy, ConstantWeight, KpdWeight, MatchingStrategy, PackingStrategy, RecipientWeight, WeightPolicy,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::weights::WeightTable;

/// Which matching strategy runs each period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Cycle/chain packing with caps
    #[default]
    Packing,
    /// Uncapped Hungarian assignment
    Assignment,
}

/// Edge weight mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightMode {
    /// Canadian KPD points
    #[default]
    Kpd,
    /// Every edge weighs 2
    Constant,
    /// Recipient's own pair weight
    Recipient,
    /// Recipient's pair weight, stamped from a learned table
    Learned,
}

/// Distributions the population generator samples from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Shares of blood types O, A, B, AB
    pub blood_type_shares: [f64; 4],
    /// Inclusive CPRA range per bucket
    pub cpra_ranges: [(f64, f64); CPRA_BUCKETS],
    pub cpra_shares: [f64; CPRA_BUCKETS],
    /// Poisson mean of time to expiry for arrivals and altruists
    pub expiry_mean: f64,
    /// Uniform `[low, high)` expiry for the start population
    pub initial_expiry: (u32, u32),
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            blood_type_shares: [0.46, 0.42, 0.09, 0.03],
            cpra_ranges: [(0.0, 0.0), (0.01, 0.50), (0.51, 0.94), (0.95, 0.96), (0.97, 1.0)],
            cpra_shares: [0.24, 0.29, 0.24, 0.10, 0.13],
            expiry_mean: 70.0,
            initial_expiry: (10, 70),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Pairs in the market before the first period
    pub start_size: usize,
    /// Poisson mean of new pairs per period
    pub arrival_rate: f64,
    pub num_periods: u32,
    /// Months per period
    pub period_length: u32,
    /// Poisson mean (or fixed count) of altruists per arrival period
    pub altruist_rate: f64,
    /// Altruists arrive every N-th period
    pub altruist_every: u32,
    /// Draw the altruist count from a Poisson instead of using the rate
    pub random_altruists: bool,
    pub max_cycle: usize,
    pub max_chain: usize,
    pub perish: bool,
    /// Probability that a preserved chain-tail donor returns as an altruist
    pub reuse_rate: f64,
    pub strategy: StrategyKind,
    pub weights: WeightMode,
    pub learned_weights: Option<WeightTable>,
    pub objective: PackingObjective,
    /// Penalty on edges leaving an altruist, and the placeholder weight
    pub altruist_weight: Decimal,
    pub solver_node_limit: u64,
    /// Most cycles, and most chains, enumerated per period; `None` is unbounded
    pub candidate_limit: Option<usize>,
    /// Audit graph invariants after every period in release builds too
    pub audit_invariants: bool,
    pub population: PopulationConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            start_size: 150,
            arrival_rate: 37.0,
            num_periods: 50,
            period_length: 4,
            altruist_rate: 4.562,
            altruist_every: 1,
            random_altruists: true,
            max_cycle: 5,
            max_chain: 5,
            perish: false,
            reuse_rate: 0.0,
            strategy: StrategyKind::default(),
            weights: WeightMode::default(),
            learned_weights: None,
            objective: PackingObjective::default(),
            altruist_weight: Decimal::from(-150),
            solver_node_limit: BranchAndBound::DEFAULT_NODE_LIMIT,
            candidate_limit: Some(Self::DEFAULT_CANDIDATE_LIMIT),
            audit_invariants: false,
            population: PopulationConfig::default(),
        }
    }
}

fn check_rate(name: &str, value: f64) -> Result<(), SimulationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SimulationError::config(format!("{name} must be a finite non-negative number, got {value}")));
    }
    Ok(())
}

fn check_shares(name: &str, shares: &[f64]) -> Result<(), SimulationError> {
    if shares.iter().any(|s| !s.is_finite() || *s < 0.0) || shares.iter().sum::<f64>() <= 0.0 {
        return Err(SimulationError::config(format!(
            "{name} must be non-negative with a positive sum"
        )));
    }
    Ok(())
}

impl SimulationConfig {
    pub const DEFAULT_CANDIDATE_LIMIT: usize = 50_000;

    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, SimulationError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SimulationError> {
        let config: SimulationConfig =
            serde_json::from_str(text).map_err(|e| SimulationError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        check_rate("arrival_rate", self.arrival_rate)?;
        check_rate("altruist_rate", self.altruist_rate)?;
        if self.altruist_every == 0 {
            return Err(SimulationError::config("altruist_every must be at least 1"));
        }
        if self.period_length == 0 {
            return Err(SimulationError::config("period_length must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.reuse_rate) {
            return Err(SimulationError::config(format!(
                "reuse_rate must lie in [0, 1], got {}",
                self.reuse_rate
            )));
        }
        if self.candidate_limit == Some(0) {
            return Err(SimulationError::config("candidate_limit must be at least 1"));
        }
        if self.altruist_weight.is_zero() {
            return Err(SimulationError::config("altruist_weight must not be zero"));
        }

        let population = &self.population;
        check_shares("blood_type_shares", &population.blood_type_shares)?;
        check_shares("cpra_shares", &population.cpra_shares)?;
        for (low, high) in population.cpra_ranges {
            if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
                return Err(SimulationError::config(format!("invalid CPRA range ({low}, {high})")));
            }
        }
        if !population.expiry_mean.is_finite() || population.expiry_mean <= 0.0 {
            return Err(SimulationError::config("expiry_mean must be positive"));
        }
        let (low, high) = population.initial_expiry;
        if low >= high {
            return Err(SimulationError::config(format!("initial_expiry range [{low}, {high}) is empty")));
        }
        Ok(())
    }

    /// Edge weight policy for this run.
    pub fn weight_policy(&self) -> Box<dyn WeightPolicy> {
        let penalty = self.altruist_weight;
        match self.weights {
            WeightMode::Kpd => Box::new(KpdWeight::new(penalty)),
            WeightMode::Constant => Box::new(ConstantWeight::new(Decimal::from(2), penalty)),
            WeightMode::Recipient | WeightMode::Learned => Box::new(RecipientWeight::new(penalty)),
        }
    }

    /// Matching strategy for this run.
    pub fn build_strategy(&self) -> Box<dyn MatchingStrategy> {
        match self.strategy {
            StrategyKind::Packing => Box::new(
                PackingStrategy::with_solver(
                    self.max_cycle,
                    self.max_chain,
                    BranchAndBound::new(self.solver_node_limit),
                )
                .objective(self.objective)
                .candidate_limit(self.candidate_limit),
            ),
            StrategyKind::Assignment => Box::new(AssignmentStrategy::new()),
        }
    }
}
