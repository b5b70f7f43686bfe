//! Bounded cycle and chain enumeration
//!
//! Cycles are found by a depth-first search from every pair in id order.
//! Whenever the search reaches a pair already on the current path, the
//! suffix from that pair closes a cycle, which is stored in canonical form
//! so repeated discoveries collapse. Pairs already explored as a root are
//! never extended into again; every cycle through them was found while
//! they were the root.
//!
//! Chains start at each altruist and extend along outgoing edges; every
//! prefix up to the chain cap is its own candidate.
//!
//! Candidate counts grow exponentially in the caps. Under a candidate limit
//! both searches deepen one length at a time, so every shorter cycle or
//! chain is kept before longer ones compete for the limit. Cycles stop at
//! the limit; chains split it evenly across altruists. A cut result is
//! flagged as truncated.

use std::collections::BTreeSet;

use kpd_types::candidate::{Chain, Cycle};
use kpd_types::ids::PairId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::Adjacency;

/// Candidate cycles and chains for one matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// Canonical cycles, sorted
    pub cycles: Vec<Cycle>,
    /// Chains grouped by altruist root, shorter chains first
    pub chains: Vec<Chain>,
    /// Set when enumeration stopped at the candidate limit
    #[serde(default)]
    pub truncated: bool,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty() && self.chains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cycles.len() + self.chains.len()
    }
}

/// Enumerator configured with a cycle cap `K` and a chain cap `L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleChainEnumerator {
    pub max_cycle: usize,
    pub max_chain: usize,
    /// Maximum cycles, and maximum chains, per run; `None` is unbounded
    pub limit: Option<usize>,
}

impl CycleChainEnumerator {
    pub fn new(max_cycle: usize, max_chain: usize) -> Self {
        Self {
            max_cycle,
            max_chain,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn enumerate(&self, adjacency: &Adjacency, altruists: &BTreeSet<PairId>) -> CandidateSet {
        let (cycles, cycles_cut) = self.bounded_cycles(adjacency);
        let (chains, chains_cut) = self.bounded_chains(adjacency, altruists);
        let truncated = cycles_cut || chains_cut;
        if truncated {
            warn!(
                cycles = cycles.len(),
                chains = chains.len(),
                limit = self.limit,
                "candidate limit reached, enumeration truncated"
            );
        }
        debug!(
            cycles = cycles.len(),
            chains = chains.len(),
            max_cycle = self.max_cycle,
            max_chain = self.max_chain,
            "candidates enumerated"
        );
        CandidateSet {
            cycles,
            chains,
            truncated,
        }
    }

    /// Simple cycles of length 2..=K, canonical and sorted.
    pub fn cycles(&self, adjacency: &Adjacency) -> Vec<Cycle> {
        self.bounded_cycles(adjacency).0
    }

    fn bounded_cycles(&self, adjacency: &Adjacency) -> (Vec<Cycle>, bool) {
        let mut found = BTreeSet::new();
        if self.max_cycle < 2 {
            return (Vec::new(), false);
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        // Unbounded runs go straight to the cap; the set collapses repeats
        let first = if self.limit.is_some() { 2 } else { self.max_cycle };
        for length in first..=self.max_cycle {
            let mut explored = BTreeSet::new();
            let mut path = Vec::with_capacity(length);
            for root in adjacency.nodes() {
                if found.len() >= limit {
                    return (found.into_iter().collect(), true);
                }
                let mut search = CycleSearch {
                    adjacency,
                    explored: &explored,
                    path: &mut path,
                    found: &mut found,
                    limit,
                };
                search.visit(root, length);
                explored.insert(root);
            }
        }
        let cut = found.len() >= limit;
        (found.into_iter().collect(), cut)
    }

    /// Altruist-rooted paths of 1..=L transplants.
    pub fn chains(&self, adjacency: &Adjacency, altruists: &BTreeSet<PairId>) -> Vec<Chain> {
        self.bounded_chains(adjacency, altruists).0
    }

    fn bounded_chains(&self, adjacency: &Adjacency, altruists: &BTreeSet<PairId>) -> (Vec<Chain>, bool) {
        let mut chains = Vec::new();
        if self.max_chain == 0 {
            return (chains, false);
        }

        let roots: Vec<PairId> = altruists.iter().copied().filter(|root| adjacency.contains(*root)).collect();
        // Each altruist gets an equal share so none is starved
        let share = match self.limit {
            Some(limit) => (limit / roots.len().max(1)).max(1),
            None => usize::MAX,
        };
        let mut cut = false;
        for root in roots {
            let mut growth = ChainGrowth {
                adjacency,
                altruists,
                root,
                target: 0,
                path: Vec::with_capacity(self.max_chain),
                out: &mut chains,
                remaining: share,
            };
            for target in 1..=self.max_chain {
                growth.target = target;
                growth.extend(root);
                if growth.remaining == 0 {
                    cut = true;
                    break;
                }
            }
        }
        (chains, cut)
    }
}

/// Depth-first chain growth from one altruist, one length at a time.
struct ChainGrowth<'a> {
    adjacency: &'a Adjacency,
    altruists: &'a BTreeSet<PairId>,
    root: PairId,
    /// Length of the chains recorded in this pass
    target: usize,
    path: Vec<PairId>,
    out: &'a mut Vec<Chain>,
    /// Chains this root may still record
    remaining: usize,
}

impl ChainGrowth<'_> {
    fn extend(&mut self, from: PairId) {
        for next in self.adjacency.successors(from) {
            if self.remaining == 0 {
                return;
            }
            if *next == self.root || self.altruists.contains(next) || self.path.contains(next) {
                continue;
            }
            self.path.push(*next);
            if self.path.len() == self.target {
                self.out.push(Chain::new(self.root, self.path.clone()));
                self.remaining -= 1;
            } else {
                self.extend(*next);
            }
            self.path.pop();
        }
    }
}

/// Depth-first cycle search state for one root.
struct CycleSearch<'a> {
    adjacency: &'a Adjacency,
    explored: &'a BTreeSet<PairId>,
    path: &'a mut Vec<PairId>,
    found: &'a mut BTreeSet<Cycle>,
    limit: usize,
}

impl CycleSearch<'_> {
    /// `budget` is the number of pairs the path may still grow to include,
    /// counting `node`.
    fn visit(&mut self, node: PairId, budget: usize) {
        for next in self.adjacency.successors(node) {
            if self.found.len() >= self.limit {
                return;
            }
            if let Some(start) = self.path.iter().position(|p| p == next) {
                let mut cycle: Vec<PairId> = self.path[start..].to_vec();
                cycle.push(node);
                self.found.insert(Cycle::new(&cycle));
            } else if *next != node && !self.explored.contains(next) && budget > 1 {
                self.path.push(node);
                self.visit(*next, budget - 1);
                self.path.pop();
            }
        }
    }
}

/// Convenience wrapper over [`CycleChainEnumerator`].
pub fn enumerate(
    adjacency: &Adjacency,
    max_cycle: usize,
    max_chain: usize,
    altruists: &BTreeSet<PairId>,
) -> CandidateSet {
    CycleChainEnumerator::new(max_cycle, max_chain).enumerate(adjacency, altruists)
}
