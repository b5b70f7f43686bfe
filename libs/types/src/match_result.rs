//! Matching outcome types

use crate::candidate::{Chain, Cycle};
use crate::ids::{PairId, ParticipantKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of cycle-length buckets: 2, 3, 4, 5, 6+
pub const CYCLE_LENGTH_BUCKETS: usize = 5;

/// Number of chain-length buckets: 1–5, 6–10, 11–15, 16–20, 21+
pub const CHAIN_LENGTH_BUCKETS: usize = 5;

/// A single donor → recipient transplant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transplant {
    pub donor: PairId,
    pub recipient: PairId,
    pub weight: Decimal,
}

/// Match counts by structure length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleChainTally {
    pub cycles_by_length: [u64; CYCLE_LENGTH_BUCKETS],
    pub chain_transplants: u64,
    pub chains_by_length: [u64; CHAIN_LENGTH_BUCKETS],
}

impl CycleChainTally {
    pub fn record_cycle(&mut self, len: usize) {
        if len < 2 {
            return;
        }
        let bucket = (len - 2).min(CYCLE_LENGTH_BUCKETS - 1);
        self.cycles_by_length[bucket] += 1;
    }

    pub fn record_chain(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.chain_transplants += len as u64;
        let bucket = ((len - 1) / 5).min(CHAIN_LENGTH_BUCKETS - 1);
        self.chains_by_length[bucket] += 1;
    }

    /// Transplants performed inside cycles, 6+ bucket counted as 6.
    pub fn cycle_transplants_lower_bound(&self) -> u64 {
        self.cycles_by_length
            .iter()
            .enumerate()
            .map(|(idx, count)| (idx as u64 + 2) * count)
            .sum()
    }

    pub fn merge(&mut self, other: &CycleChainTally) {
        for (acc, v) in self.cycles_by_length.iter_mut().zip(other.cycles_by_length.iter()) {
            *acc += v;
        }
        for (acc, v) in self.chains_by_length.iter_mut().zip(other.chains_by_length.iter()) {
            *acc += v;
        }
        self.chain_transplants += other.chain_transplants;
    }
}

/// Disjoint cycles and chains chosen for one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub cycles: Vec<Cycle>,
    pub chains: Vec<Chain>,
    pub transplants: Vec<Transplant>,
    /// Every participant that leaves the market this period
    pub matched: BTreeSet<ParticipantKey>,
    /// Tail pairs of chosen chains; their donors stay as future altruists
    pub preserved_donors: BTreeSet<PairId>,
    pub tally: CycleChainTally,
    pub objective: Decimal,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty() && self.chains.is_empty()
    }

    pub fn transplant_count(&self) -> usize {
        self.transplants.len()
    }

    /// Altruist roots consumed by chosen chains.
    pub fn altruists_used(&self) -> usize {
        self.chains.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_buckets() {
        let mut tally = CycleChainTally::default();
        tally.record_cycle(2);
        tally.record_cycle(5);
        tally.record_cycle(9);
        tally.record_cycle(1);
        assert_eq!(tally.cycles_by_length, [1, 0, 0, 1, 1]);
        assert_eq!(tally.cycle_transplants_lower_bound(), 2 + 5 + 6);
    }

    #[test]
    fn test_chain_buckets() {
        let mut tally = CycleChainTally::default();
        tally.record_chain(1);
        tally.record_chain(5);
        tally.record_chain(6);
        tally.record_chain(25);
        assert_eq!(tally.chains_by_length, [2, 1, 0, 0, 1]);
        assert_eq!(tally.chain_transplants, 37);
    }

    #[test]
    fn test_merge() {
        let mut a = CycleChainTally::default();
        a.record_cycle(3);
        let mut b = CycleChainTally::default();
        b.record_cycle(3);
        b.record_chain(2);
        a.merge(&b);
        assert_eq!(a.cycles_by_length[1], 2);
        assert_eq!(a.chain_transplants, 2);
    }

    #[test]
    fn test_empty_result() {
        let result = MatchResult::empty();
        assert!(result.is_empty());
        assert_eq!(result.transplant_count(), 0);
        assert_eq!(result.objective, Decimal::ZERO);
    }
}
