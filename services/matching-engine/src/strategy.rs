//! Matching strategies
//!
//! The scheduler only sees [`MatchingStrategy`]. Each variant owns the full
//! path from graph to [`MatchResult`]: candidate generation, solving, and
//! decoding the solution back into transplants.

use std::collections::{BTreeMap, BTreeSet};

use kpd_types::candidate::{Chain, Cycle};
use kpd_types::errors::{InvariantViolation, MatchingError, SolverError};
use kpd_types::ids::{PairId, ParticipantKey};
use kpd_types::match_result::{MatchResult, Transplant};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::assignment::{AssignmentSolver, WeightMatrix, NON_EDGE};
use crate::enumerate::{CandidateSet, CycleChainEnumerator};
use crate::formulation::{Formulation, PackingObjective};
use crate::graph::CompatibilityGraph;
use crate::solver::{BranchAndBound, SolveStatus, Solver};

/// Computes one period's matching from a read-only view of the market.
pub trait MatchingStrategy: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn compute_matching(&self, graph: &CompatibilityGraph) -> Result<MatchResult, MatchingError>;
}

// ============================================================================
// Packing (cycle/chain formulation)
// ============================================================================

/// Cap-respecting strategy: enumerate candidates, solve the packing
/// formulation, decode.
#[derive(Debug, Clone)]
pub struct PackingStrategy<S: Solver = BranchAndBound> {
    pub enumerator: CycleChainEnumerator,
    pub objective: PackingObjective,
    solver: S,
}

impl PackingStrategy<BranchAndBound> {
    pub fn new(max_cycle: usize, max_chain: usize) -> Self {
        Self::with_solver(max_cycle, max_chain, BranchAndBound::default())
    }
}

impl<S: Solver> PackingStrategy<S> {
    pub fn with_solver(max_cycle: usize, max_chain: usize, solver: S) -> Self {
        Self {
            enumerator: CycleChainEnumerator::new(max_cycle, max_chain),
            objective: PackingObjective::default(),
            solver,
        }
    }

    pub fn objective(mut self, objective: PackingObjective) -> Self {
        self.objective = objective;
        self
    }

    /// Bound the number of enumerated cycles and chains.
    pub fn candidate_limit(mut self, limit: Option<usize>) -> Self {
        self.enumerator = self.enumerator.with_limit(limit);
        self
    }

    /// Drop candidates that reference a pair no longer in the market.
    fn discard_invalid(graph: &CompatibilityGraph, candidates: CandidateSet) -> CandidateSet {
        let unknown = |pairs: &mut dyn Iterator<Item = PairId>| {
            for pair in pairs {
                if !graph.contains_pair(pair) {
                    return Some(pair);
                }
            }
            None
        };

        let mut kept = CandidateSet {
            truncated: candidates.truncated,
            ..CandidateSet::default()
        };
        for cycle in candidates.cycles {
            match unknown(&mut cycle.pairs().iter().copied()) {
                Some(pair) => {
                    let error = MatchingError::InvalidCandidate { pair: pair.value() };
                    debug!(%error, "cycle discarded");
                }
                None => kept.cycles.push(cycle),
            }
        }
        for chain in candidates.chains {
            match unknown(&mut std::iter::once(chain.root).chain(chain.pairs.iter().copied())) {
                Some(pair) => {
                    let error = MatchingError::InvalidCandidate { pair: pair.value() };
                    debug!(%error, "chain discarded");
                }
                None => kept.chains.push(chain),
            }
        }
        kept
    }
}

impl<S: Solver> MatchingStrategy for PackingStrategy<S> {
    fn name(&self) -> &'static str {
        "packing"
    }

    fn compute_matching(&self, graph: &CompatibilityGraph) -> Result<MatchResult, MatchingError> {
        let adjacency = graph.adjacency();
        let altruists = graph.altruists().clone();
        let candidates = self.enumerator.enumerate(&adjacency, &altruists);
        let candidates = Self::discard_invalid(graph, candidates);
        if candidates.is_empty() {
            return Ok(MatchResult::empty());
        }

        let formulation = Formulation::build(
            &candidates,
            &altruists,
            graph,
            self.enumerator.max_chain,
            self.objective,
        );
        let solution = self.solver.solve(&formulation)?;
        if solution.status == SolveStatus::Infeasible {
            return Err(SolverError::Infeasible.into());
        }
        if !formulation.is_feasible(&solution.values) {
            return Err(SolverError::Failed {
                reason: "solver returned an assignment that violates the formulation".to_string(),
            }
            .into());
        }

        let decoded = formulation.decode(&solution.values)?;
        let result = assemble(graph, decoded.cycles, decoded.chains, solution.objective)?;
        info!(
            strategy = self.name(),
            candidates = candidates.len(),
            truncated = candidates.truncated,
            variables = formulation.variable_count(),
            cycles = result.cycles.len(),
            chains = result.chains.len(),
            transplants = result.transplant_count(),
            "matching computed"
        );
        Ok(result)
    }
}

// ============================================================================
// Assignment (Hungarian, no caps)
// ============================================================================

/// Uncapped strategy: maximum-weight assignment over participants, each pair
/// collapsed by a unit-weight internal edge so it is never split.
///
/// Recipient of the i-th pair is index `2i`, its donor `2i + 1`.
#[derive(Debug, Clone, Default)]
pub struct AssignmentStrategy {
    solver: AssignmentSolver,
}

impl AssignmentStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_matrix(graph: &CompatibilityGraph, pairs: &[PairId]) -> WeightMatrix {
        let index: BTreeMap<PairId, usize> = pairs.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut matrix = WeightMatrix::filled(pairs.len() * 2, NON_EDGE);
        for i in 0..pairs.len() {
            matrix.set(2 * i, 2 * i + 1, Decimal::ONE);
            matrix.set(2 * i + 1, 2 * i, Decimal::ONE);
        }
        for (donor, recipient, weight) in graph.edges() {
            if let (Some(d), Some(r)) = (index.get(&donor), index.get(&recipient)) {
                matrix.set(2 * d + 1, 2 * r, weight);
            }
        }
        matrix
    }
}

impl MatchingStrategy for AssignmentStrategy {
    fn name(&self) -> &'static str {
        "assignment"
    }

    fn compute_matching(&self, graph: &CompatibilityGraph) -> Result<MatchResult, MatchingError> {
        // Pairs whose donor cannot give to anyone never leave the diagonal
        let pairs: Vec<PairId> = graph
            .pair_ids()
            .into_iter()
            .filter(|id| graph.out_degree(*id) > 0 && graph.pair(*id).is_some())
            .collect();
        if pairs.is_empty() {
            return Ok(MatchResult::empty());
        }

        let matrix = Self::build_matrix(graph, &pairs);
        let assignment = self.solver.solve(&matrix);
        if !assignment.is_dual_tight() {
            return Err(InvariantViolation::new(format!(
                "assignment duality gap: primal {} dual {}",
                assignment.total,
                assignment.dual_objective()
            ))
            .into());
        }

        // donor pair -> recipient pair
        let mut next: BTreeMap<PairId, PairId> = BTreeMap::new();
        for (u, v) in assignment.mu.iter().enumerate() {
            if matrix.get(u, *v) == NON_EDGE {
                return Err(InvariantViolation::new(format!("assignment uses non-edge ({u}, {v})")).into());
            }
            let (from, to) = (u / 2, *v / 2);
            if u % 2 == 1 && v % 2 == 0 && from != to {
                next.insert(pairs[from], pairs[to]);
            }
        }

        let mut cycles = Vec::new();
        let mut seen = BTreeSet::new();
        for start in next.keys() {
            if seen.contains(start) {
                continue;
            }
            let mut sequence = vec![*start];
            seen.insert(*start);
            let mut current = *start;
            loop {
                let Some(to) = next.get(&current).copied() else {
                    return Err(InvariantViolation::new(format!("assignment path from {start} does not close")).into());
                };
                if to == *start {
                    break;
                }
                if !seen.insert(to) {
                    return Err(InvariantViolation::new(format!("pair {to} reached twice in assignment")).into());
                }
                sequence.push(to);
                current = to;
            }
            cycles.push(Cycle::new(&sequence));
        }

        let result = assemble(graph, cycles, Vec::new(), assignment.total)?;
        info!(
            strategy = self.name(),
            pairs = pairs.len(),
            cycles = result.cycles.len(),
            transplants = result.transplant_count(),
            "matching computed"
        );
        Ok(result)
    }
}

// ============================================================================
// Result assembly
// ============================================================================

fn claim(matched: &mut BTreeSet<ParticipantKey>, key: ParticipantKey) -> Result<(), InvariantViolation> {
    if matched.insert(key) {
        Ok(())
    } else {
        Err(InvariantViolation::new(format!("{key} matched twice in one period")))
    }
}

fn transplant(graph: &CompatibilityGraph, donor: PairId, recipient: PairId) -> Result<Transplant, InvariantViolation> {
    let weight = graph
        .edge_weight(donor, recipient)
        .ok_or_else(|| InvariantViolation::new(format!("selected transplant {donor} -> {recipient} is not an edge")))?;
    Ok(Transplant {
        donor,
        recipient,
        weight,
    })
}

/// Turn selected cycles and chains into a `MatchResult`, rejecting any
/// participant used twice.
pub fn assemble(
    graph: &CompatibilityGraph,
    cycles: Vec<Cycle>,
    chains: Vec<Chain>,
    objective: Decimal,
) -> Result<MatchResult, InvariantViolation> {
    let mut result = MatchResult {
        objective,
        ..MatchResult::default()
    };

    for cycle in &cycles {
        for pair in cycle.pairs() {
            claim(&mut result.matched, ParticipantKey::recipient(*pair))?;
            claim(&mut result.matched, ParticipantKey::donor(*pair))?;
        }
        for (donor, recipient) in cycle.transplants() {
            result.transplants.push(transplant(graph, donor, recipient)?);
        }
        result.tally.record_cycle(cycle.len());
    }

    for chain in &chains {
        let Some(tail) = chain.tail() else {
            continue;
        };
        claim(&mut result.matched, ParticipantKey::recipient(chain.root))?;
        claim(&mut result.matched, ParticipantKey::donor(chain.root))?;
        for pair in &chain.pairs {
            claim(&mut result.matched, ParticipantKey::recipient(*pair))?;
            if *pair != tail {
                claim(&mut result.matched, ParticipantKey::donor(*pair))?;
            }
        }
        // The tail donor stays out of `matched` but may not be used elsewhere
        if result.matched.contains(&ParticipantKey::donor(tail)) || !result.preserved_donors.insert(tail) {
            return Err(InvariantViolation::new(format!("preserved donor {tail} is also matched")));
        }
        for (donor, recipient) in chain.edges() {
            result.transplants.push(transplant(graph, donor, recipient)?);
        }
        result.tally.record_chain(chain.len());
    }

    result.cycles = cycles;
    result.chains = chains;
    Ok(result)
}
