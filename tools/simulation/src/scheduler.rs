//! One simulation period
//!
//! Stages run in a fixed order and each finishes before the next starts:
//!
//! 1. remove perished pairs (when perishing is enabled)
//! 2. compute the matching against the current graph
//! 3. detach matched pairs and chain tails, recording recipient wait times
//! 4. draw which preserved tail donors return as altruists
//! 5. age every remaining participant by one period
//! 6. admit arrivals and returning altruists
//!
//! Matching only reads the graph; stages 3 and 6 are the only mutators
//! besides perishing and aging.

use std::collections::BTreeSet;

use kpd_types::errors::{InvariantViolation, SimulationError};
use kpd_types::ids::{PairId, ParticipantKey};
use kpd_types::match_result::MatchResult;
use kpd_types::participant::{Pair, Participant};
use matching_engine::{CompatibilityGraph, MatchingStrategy};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::composition::Composition;
use crate::config::SimulationConfig;
use crate::population::Population;

/// Scheduler knobs taken from the run config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub perish: bool,
    pub period_length: u32,
    pub reuse_rate: f64,
    pub audit_invariants: bool,
}

impl From<&SimulationConfig> for SchedulerSettings {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            perish: config.perish,
            period_length: config.period_length,
            reuse_rate: config.reuse_rate,
            audit_invariants: config.audit_invariants,
        }
    }
}

/// Pairs and altruists entering the market at the end of a period.
#[derive(Debug, Clone, Default)]
pub struct Arrivals {
    pub pairs: Vec<Pair>,
    pub altruists: Vec<Pair>,
}

/// What happened during one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub period: u32,
    pub perished: usize,
    pub matching: MatchResult,
    /// The strategy returned a non-fatal error; the period matched nobody
    pub matching_failed: bool,
    /// Time in market of every real recipient transplanted this period
    pub wait_times: Vec<u32>,
    pub reused_altruists: usize,
    pub pairs_added: usize,
    pub altruists_added: usize,
}

#[derive(Debug)]
pub struct PeriodScheduler {
    graph: CompatibilityGraph,
    composition: Composition,
    strategy: Box<dyn MatchingStrategy>,
    settings: SchedulerSettings,
}

impl PeriodScheduler {
    pub fn new(graph: CompatibilityGraph, strategy: Box<dyn MatchingStrategy>, settings: SchedulerSettings) -> Self {
        Self {
            graph,
            composition: Composition::new(),
            strategy,
            settings,
        }
    }

    pub fn graph(&self) -> &CompatibilityGraph {
        &self.graph
    }

    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Admit pairs and altruists, keeping the composition in step.
    pub fn admit<R: Rng + ?Sized>(&mut self, arrivals: Arrivals, rng: &mut R) -> Result<(), SimulationError> {
        for pair in arrivals.pairs {
            self.composition.add(&pair);
            self.graph.add_pair(pair, rng)?;
        }
        for pair in arrivals.altruists {
            self.graph.add_altruist(pair, rng)?;
        }
        Ok(())
    }

    /// Run one period. Only an invariant violation or a rejected admission
    /// is an error; a failed matching yields an empty period.
    pub fn run_period<R: Rng + ?Sized>(
        &mut self,
        period: u32,
        mut arrivals: Arrivals,
        population: &Population,
        rng: &mut R,
    ) -> Result<PeriodOutcome, SimulationError> {
        // 1. perish
        let mut perished = 0;
        if self.settings.perish {
            for pair in self.graph.remove_perished() {
                self.composition.remove(&pair);
                perished += 1;
            }
        }

        // 2. match
        let (matching, matching_failed) = match self.strategy.compute_matching(&self.graph) {
            Ok(result) => (result, false),
            Err(error) if error.is_fatal() => return Err(error.into()),
            Err(error) => {
                warn!(period, %error, strategy = self.strategy.name(), "matching failed, period yields no transplants");
                (MatchResult::empty(), true)
            }
        };

        // 3. detach
        let (wait_times, preserved) = self.detach(&matching)?;
        self.audit()?;

        // 4. reuse
        let mut returning = Vec::new();
        if self.settings.reuse_rate > 0.0 {
            for donor in &preserved {
                if rng.gen_bool(self.settings.reuse_rate) {
                    returning.push(population.reuse_donor(donor, rng));
                }
            }
        }
        let reused_altruists = returning.len();

        // 5. age
        self.graph.advance_time(self.settings.period_length);

        // 6. admit
        let pairs_added = arrivals.pairs.len();
        let altruists_added = arrivals.altruists.len() + returning.len();
        arrivals.altruists.extend(returning);
        self.admit(arrivals, rng)?;
        self.audit()?;

        info!(
            period,
            transplants = matching.transplant_count(),
            cycles = matching.cycles.len(),
            chains = matching.chains.len(),
            perished,
            pairs_added,
            altruists_added,
            pairs_in_market = self.graph.pair_count(),
            "period complete"
        );

        Ok(PeriodOutcome {
            period,
            perished,
            matching,
            matching_failed,
            wait_times,
            reused_altruists,
            pairs_added,
            altruists_added,
        })
    }

    /// Remove every pair touched by the matching. Returns recipient wait
    /// times and the donors of preserved chain tails.
    fn detach(&mut self, matching: &MatchResult) -> Result<(Vec<u32>, Vec<Participant>), InvariantViolation> {
        let departing: BTreeSet<PairId> = matching
            .matched
            .iter()
            .map(|key| key.pair)
            .chain(matching.preserved_donors.iter().copied())
            .collect();

        let mut wait_times = Vec::new();
        let mut preserved = Vec::new();
        for id in departing {
            let pair = self
                .graph
                .pair(id)
                .ok_or_else(|| InvariantViolation::new(format!("matched pair {id} is not in the market")))?;
            if !pair.is_altruist() && matching.matched.contains(&ParticipantKey::recipient(id)) {
                wait_times.push(pair.recipient.time_in_market);
            }
            self.composition.remove(&pair);
            self.graph.remove_pair(id);
            if matching.preserved_donors.contains(&id) {
                preserved.push(pair.donor);
            }
        }
        debug!(
            removed = matching.matched.len(),
            preserved = preserved.len(),
            "matched participants detached"
        );
        Ok((wait_times, preserved))
    }

    fn audit(&self) -> Result<(), InvariantViolation> {
        if self.settings.audit_invariants || cfg!(debug_assertions) {
            self.graph.verify_invariants()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpd_types::participant::BloodType;
    use matching_engine::{PackingStrategy, RecipientWeight};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rust_decimal::Decimal;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            perish: false,
            period_length: 4,
            reuse_rate: 0.0,
            audit_invariants: true,
        }
    }

    fn scheduler(settings: SchedulerSettings) -> PeriodScheduler {
        PeriodScheduler::new(
            CompatibilityGraph::new(Box::new(RecipientWeight::default())),
            Box::new(PackingStrategy::new(3, 3)),
            settings,
        )
    }

    fn pair(id: u64, recipient: BloodType, donor: BloodType, expiry: u32) -> Pair {
        // CPRA 0 makes every blood-compatible crossmatch pass
        Pair::new(PairId::new(id), recipient, donor, 0.0, Decimal::from(2), expiry)
    }

    fn population() -> Population {
        Population::new(&SimulationConfig::default()).unwrap()
    }

    #[test]
    fn test_two_cycle_matched_and_removed() {
        let mut sched = scheduler(settings());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let arrivals = Arrivals {
            pairs: vec![pair(1, BloodType::A, BloodType::B, 70), pair(2, BloodType::B, BloodType::A, 70)],
            altruists: Vec::new(),
        };
        sched.admit(arrivals, &mut rng).unwrap();
        assert_eq!(sched.composition().total(), 2);

        let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
        assert_eq!(outcome.matching.transplant_count(), 2);
        assert_eq!(outcome.wait_times, vec![0, 0]);
        assert_eq!(sched.graph().pair_count(), 0);
        assert_eq!(sched.composition().total(), 0);
    }

    #[test]
    fn test_unmatched_pairs_age() {
        let mut sched = scheduler(settings());
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let arrivals = Arrivals {
            pairs: vec![pair(1, BloodType::A, BloodType::B, 70)],
            altruists: Vec::new(),
        };
        sched.admit(arrivals, &mut rng).unwrap();
        sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
        sched.run_period(1, Arrivals::default(), &population(), &mut rng).unwrap();
        let recipient = sched.graph().participant(ParticipantKey::recipient(PairId::new(1))).unwrap();
        assert_eq!(recipient.time_in_market, 8);
    }

    #[test]
    fn test_arrivals_admitted_after_matching() {
        let mut sched = scheduler(settings());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        sched
            .admit(
                Arrivals {
                    pairs: vec![pair(1, BloodType::A, BloodType::B, 70)],
                    altruists: Vec::new(),
                },
                &mut rng,
            )
            .unwrap();
        // The partner of pair 1 arrives this period, so nothing matches yet
        let arrivals = Arrivals {
            pairs: vec![pair(2, BloodType::B, BloodType::A, 70)],
            altruists: Vec::new(),
        };
        let outcome = sched.run_period(0, arrivals, &population(), &mut rng).unwrap();
        assert!(outcome.matching.is_empty());
        assert_eq!(outcome.pairs_added, 1);
        assert_eq!(sched.graph().pair_count(), 2);

        let outcome = sched.run_period(1, Arrivals::default(), &population(), &mut rng).unwrap();
        assert_eq!(outcome.matching.cycles.len(), 1);
        assert_eq!(outcome.wait_times, vec![4, 0]);
    }

    #[test]
    fn test_perished_removed_before_matching() {
        let mut sched = scheduler(SchedulerSettings {
            perish: true,
            ..settings()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let arrivals = Arrivals {
            pairs: vec![pair(1, BloodType::A, BloodType::B, 4), pair(2, BloodType::B, BloodType::A, 70)],
            altruists: Vec::new(),
        };
        sched.admit(arrivals, &mut rng).unwrap();
        sched.graph.advance_time(4);

        let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
        assert_eq!(outcome.perished, 1);
        assert!(outcome.matching.is_empty());
        assert!(!sched.graph().contains_pair(PairId::new(1)));
        assert_eq!(sched.composition().total(), 1);
    }

    #[test]
    fn test_chain_tail_reused_as_altruist() {
        let mut sched = scheduler(SchedulerSettings {
            reuse_rate: 1.0,
            ..settings()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        // altruist 9 (O) -> pair 1 (A recipient, B donor) -> pair 2 (B recipient, AB donor)
        let arrivals = Arrivals {
            pairs: vec![pair(1, BloodType::A, BloodType::B, 70), pair(2, BloodType::B, BloodType::AB, 70)],
            altruists: vec![Pair::altruist(PairId::new(9), BloodType::O, Decimal::from(-150), 70)],
        };
        sched.admit(arrivals, &mut rng).unwrap();

        let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
        assert_eq!(outcome.matching.chains.len(), 1);
        assert_eq!(outcome.matching.chains[0].len(), 2);
        assert_eq!(outcome.reused_altruists, 1);
        assert_eq!(outcome.wait_times.len(), 2);

        // Pair 2 is back as an altruist with its AB donor
        assert!(sched.graph().is_altruist(PairId::new(2)));
        assert!(!sched.graph().contains_pair(PairId::new(1)));
        assert!(!sched.graph().contains_pair(PairId::new(9)));
        let donor = sched.graph().participant(ParticipantKey::donor(PairId::new(2))).unwrap();
        assert_eq!(donor.blood_type, BloodType::AB);
        assert_eq!(donor.time_in_market, 0);
    }

    #[test]
    fn test_chain_tail_dropped_without_reuse() {
        let mut sched = scheduler(settings());
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let arrivals = Arrivals {
            pairs: vec![pair(1, BloodType::A, BloodType::B, 70)],
            altruists: vec![Pair::altruist(PairId::new(9), BloodType::O, Decimal::from(-150), 70)],
        };
        sched.admit(arrivals, &mut rng).unwrap();
        let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
        assert_eq!(outcome.matching.preserved_donors.len(), 1);
        assert_eq!(outcome.reused_altruists, 0);
        assert!(sched.graph().is_empty());
    }
}
