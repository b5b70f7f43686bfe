//! Learned pair weights
//!
//! A [`WeightTable`] holds one weight per CPRA bucket × recipient blood
//! type × donor blood type. Learning is a pure step over a finished run's
//! composition: categories that drained out of the market relative to
//! the first period get a low weight, categories that piled up get a
//! weight approaching 10.

use kpd_types::errors::SimulationError;
use kpd_types::participant::{cpra_bucket, BloodType, CPRA_BUCKETS};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::composition::ShareTable;
use crate::config::{SimulationConfig, WeightMode};
use crate::simulation::Simulation;

const BLOOD_TYPES: usize = 4;

/// Weight per `[cpra bucket][recipient type][donor type]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTable {
    pub cells: [[[Decimal; BLOOD_TYPES]; BLOOD_TYPES]; CPRA_BUCKETS],
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::uniform(Decimal::ONE)
    }
}

impl WeightTable {
    pub fn uniform(weight: Decimal) -> Self {
        Self {
            cells: [[[weight; BLOOD_TYPES]; BLOOD_TYPES]; CPRA_BUCKETS],
        }
    }

    /// Weight of a pair, or `None` for a placeholder blood type.
    pub fn lookup(&self, cpra: f64, recipient: BloodType, donor: BloodType) -> Option<Decimal> {
        let r = recipient.index()?;
        let d = donor.index()?;
        Some(self.cells[cpra_bucket(cpra)][r][d])
    }

    /// New table from one run's composition shares.
    ///
    /// Each cell with a positive initial share becomes
    /// `round3(10 - 9 * exp(-current / initial))`; other cells keep the
    /// prior weight.
    pub fn learn(prior: &WeightTable, initial: &ShareTable, current: &ShareTable) -> WeightTable {
        let mut next = prior.clone();
        for bucket in 0..CPRA_BUCKETS {
            for r in 0..BLOOD_TYPES {
                for d in 0..BLOOD_TYPES {
                    let init = initial[bucket][r][d];
                    if init <= 0.0 {
                        continue;
                    }
                    let ratio = current[bucket][r][d] / init;
                    let raw = 10.0 - 9.0 * (-ratio).exp();
                    if let Some(weight) = Decimal::from_f64(raw) {
                        next.cells[bucket][r][d] = weight.round_dp(3);
                    }
                }
            }
        }
        next
    }
}

/// Run `rounds` simulations in learned-weight mode, feeding each run's
/// learned table into the next.
pub fn train(config: &SimulationConfig, rounds: u32) -> Result<WeightTable, SimulationError> {
    let mut table = config.learned_weights.clone().unwrap_or_default();
    for round in 0..rounds {
        let mut run = config.clone();
        run.weights = WeightMode::Learned;
        run.learned_weights = Some(table.clone());
        run.seed = config.seed.wrapping_add(u64::from(round));

        let summary = Simulation::new(run)?.run()?;
        table = WeightTable::learn(&table, &summary.initial_shares, &summary.final_shares);
        info!(
            round,
            transplants = summary.total_transplants,
            "weight training round complete"
        );
    }
    Ok(table)
}
