//! Cycle/chain packing formulation
//!
//! One binary variable per candidate cycle and one per `(edge, position)`
//! that occurs in some candidate chain. Position 1 edges leave an altruist;
//! positions 2..=L leave a pair that received at the previous position.
//!
//! Constraints:
//! - every non-altruist pair receives at most one kidney
//! - a pair only donates at position `l + 1` if it received at position `l`
//! - every altruist starts at most one chain
//!
//! The formulation is handed to a [`Solver`](crate::solver::Solver) and the
//! 1-valued variables are decoded back into cycles and chains.

use std::collections::{BTreeMap, BTreeSet};

use kpd_types::candidate::{Chain, Cycle};
use kpd_types::errors::InvariantViolation;
use kpd_types::ids::PairId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enumerate::CandidateSet;
use crate::graph::CompatibilityGraph;

/// What the packing maximises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PackingObjective {
    /// Number of transplants: cycle length, one per chain edge
    #[default]
    Transplants,
    /// Sum of stored edge weights
    EdgeWeight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// Index into `Formulation::cycles`
    Cycle(usize),
    ChainEdge {
        donor: PairId,
        recipient: PairId,
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub kind: VariableKind,
    pub objective: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    LessEq,
    GreaterEq,
}

/// `Σ coef · x  (≤ | ≥)  rhs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub terms: Vec<(usize, i64)>,
    pub sense: Sense,
    pub rhs: i64,
}

impl Constraint {
    pub fn is_satisfied(&self, values: &[bool]) -> bool {
        let activity: i64 = self
            .terms
            .iter()
            .filter(|(var, _)| values.get(*var).copied().unwrap_or(false))
            .map(|(_, coef)| coef)
            .sum();
        match self.sense {
            Sense::LessEq => activity <= self.rhs,
            Sense::GreaterEq => activity >= self.rhs,
        }
    }
}

/// Cycles and chains selected by a solution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPacking {
    pub cycles: Vec<Cycle>,
    pub chains: Vec<Chain>,
}

/// A maximisation problem over binary variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formulation {
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    cycles: Vec<Cycle>,
    altruists: BTreeSet<PairId>,
    max_chain: usize,
}

impl Formulation {
    pub fn build(
        candidates: &CandidateSet,
        altruists: &BTreeSet<PairId>,
        graph: &CompatibilityGraph,
        max_chain: usize,
        objective: PackingObjective,
    ) -> Self {
        let edge_value = |donor: PairId, recipient: PairId| match objective {
            PackingObjective::Transplants => Decimal::ONE,
            PackingObjective::EdgeWeight => graph.edge_weight(donor, recipient).unwrap_or(Decimal::ZERO),
        };

        let mut variables = Vec::new();
        // pair -> variables in which it receives
        let mut receives: BTreeMap<PairId, Vec<usize>> = BTreeMap::new();

        for (idx, cycle) in candidates.cycles.iter().enumerate() {
            let value: Decimal = cycle
                .transplants()
                .map(|(donor, recipient)| edge_value(donor, recipient))
                .sum();
            let var = variables.len();
            variables.push(Variable {
                kind: VariableKind::Cycle(idx),
                objective: value,
            });
            for pair in cycle.pairs() {
                receives.entry(*pair).or_default().push(var);
            }
        }

        // Distinct (donor, recipient, position) triples across chains
        let positioned: BTreeSet<(usize, PairId, PairId)> = candidates
            .chains
            .iter()
            .flat_map(|chain| {
                chain
                    .edges()
                    .enumerate()
                    .map(|(idx, (donor, recipient))| (idx + 1, donor, recipient))
            })
            .filter(|(position, _, _)| *position <= max_chain)
            .collect();

        // (pair, position) -> variables entering / leaving
        let mut inflow: BTreeMap<(PairId, usize), Vec<usize>> = BTreeMap::new();
        let mut outflow: BTreeMap<(PairId, usize), Vec<usize>> = BTreeMap::new();
        for (position, donor, recipient) in positioned {
            let var = variables.len();
            variables.push(Variable {
                kind: VariableKind::ChainEdge {
                    donor,
                    recipient,
                    position,
                },
                objective: edge_value(donor, recipient),
            });
            receives.entry(recipient).or_default().push(var);
            inflow.entry((recipient, position)).or_default().push(var);
            outflow.entry((donor, position)).or_default().push(var);
        }

        let mut constraints = Vec::new();

        // Each pair receives at most one kidney
        for (pair, vars) in &receives {
            if altruists.contains(pair) || vars.len() < 2 {
                continue;
            }
            constraints.push(Constraint {
                terms: vars.iter().map(|v| (*v, 1)).collect(),
                sense: Sense::LessEq,
                rhs: 1,
            });
        }

        // Chain flow: received at l >= donates at l + 1
        for ((donor, position), out_vars) in &outflow {
            if altruists.contains(donor) || *position < 2 {
                continue;
            }
            let mut terms: Vec<(usize, i64)> = inflow
                .get(&(*donor, position - 1))
                .map(|vars| vars.iter().map(|v| (*v, 1)).collect())
                .unwrap_or_default();
            terms.extend(out_vars.iter().map(|v| (*v, -1)));
            constraints.push(Constraint {
                terms,
                sense: Sense::GreaterEq,
                rhs: 0,
            });
        }

        // Each altruist starts at most one chain
        for altruist in altruists {
            if let Some(vars) = outflow.get(&(*altruist, 1)) {
                if vars.len() > 1 {
                    constraints.push(Constraint {
                        terms: vars.iter().map(|v| (*v, 1)).collect(),
                        sense: Sense::LessEq,
                        rhs: 1,
                    });
                }
            }
        }

        Self {
            variables,
            constraints,
            cycles: candidates.cycles.clone(),
            altruists: altruists.clone(),
            max_chain,
        }
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn evaluate(&self, values: &[bool]) -> Decimal {
        self.variables
            .iter()
            .zip(values)
            .filter(|(_, on)| **on)
            .map(|(var, _)| var.objective)
            .sum()
    }

    pub fn is_feasible(&self, values: &[bool]) -> bool {
        values.len() == self.variables.len() && self.constraints.iter().all(|c| c.is_satisfied(values))
    }

    /// Map selected variables back to cycles and altruist-rooted chains.
    pub fn decode(&self, values: &[bool]) -> Result<DecodedPacking, InvariantViolation> {
        if values.len() != self.variables.len() {
            return Err(InvariantViolation::new(format!(
                "solution has {} values for {} variables",
                values.len(),
                self.variables.len()
            )));
        }

        let mut decoded = DecodedPacking::default();
        // (donor, position) -> recipient
        let mut selected_edges: BTreeMap<(PairId, usize), PairId> = BTreeMap::new();

        for (var, _) in self.variables.iter().zip(values).filter(|(_, on)| **on) {
            match &var.kind {
                VariableKind::Cycle(idx) => {
                    let cycle = self
                        .cycles
                        .get(*idx)
                        .ok_or_else(|| InvariantViolation::new(format!("cycle variable {idx} out of range")))?;
                    decoded.cycles.push(cycle.clone());
                }
                VariableKind::ChainEdge {
                    donor,
                    recipient,
                    position,
                } => {
                    if selected_edges.insert((*donor, *position), *recipient).is_some() {
                        return Err(InvariantViolation::new(format!(
                            "pair {donor} donates twice at chain position {position}"
                        )));
                    }
                }
            }
        }

        let mut consumed = 0;
        for altruist in &self.altruists {
            let mut pairs = Vec::new();
            let mut current = *altruist;
            let mut position = 1;
            while let Some(next) = selected_edges.get(&(current, position)) {
                pairs.push(*next);
                current = *next;
                position += 1;
                if position > self.max_chain + 1 {
                    break;
                }
            }
            consumed += pairs.len();
            if !pairs.is_empty() {
                decoded.chains.push(Chain::new(*altruist, pairs));
            }
        }

        if consumed != selected_edges.len() {
            return Err(InvariantViolation::new(format!(
                "{} chain edges selected but only {consumed} reachable from an altruist",
                selected_edges.len()
            )));
        }

        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::enumerate;
    use crate::graph::Adjacency;
    use crate::weights::ConstantWeight;

    fn id(raw: u64) -> PairId {
        PairId::new(raw)
    }

    fn empty_graph() -> CompatibilityGraph {
        CompatibilityGraph::new(Box::new(ConstantWeight::new(Decimal::ONE, Decimal::ZERO)))
    }

    fn build(edges: &[(u64, u64)], altruists: &[u64], k: usize, l: usize) -> Formulation {
        let mut adj = Adjacency::new();
        for (a, b) in edges {
            adj.add_edge(id(*a), id(*b));
        }
        let altruists: BTreeSet<PairId> = altruists.iter().copied().map(id).collect();
        let candidates = enumerate(&adj, k, l, &altruists);
        Formulation::build(&candidates, &altruists, &empty_graph(), l, PackingObjective::Transplants)
    }

    fn chain_var(f: &Formulation, donor: u64, recipient: u64, position: usize) -> usize {
        f.variables
            .iter()
            .position(|v| {
                v.kind
                    == VariableKind::ChainEdge {
                        donor: id(donor),
                        recipient: id(recipient),
                        position,
                    }
            })
            .unwrap()
    }

    #[test]
    fn test_cycle_variables_weighted_by_length() {
        let f = build(&[(1, 2), (2, 3), (3, 1), (1, 3), (3, 2)], &[], 3, 0);
        let lengths: Vec<Decimal> = f.variables.iter().map(|v| v.objective).collect();
        assert!(lengths.contains(&Decimal::from(3)));
        assert!(lengths.contains(&Decimal::from(2)));
    }

    #[test]
    fn test_chain_positions() {
        let f = build(&[(9, 1), (1, 2)], &[9], 2, 2);
        assert_eq!(f.variable_count(), 2);
        chain_var(&f, 9, 1, 1);
        chain_var(&f, 1, 2, 2);
    }

    #[test]
    fn test_flow_blocks_orphan_continuation() {
        let f = build(&[(9, 1), (1, 2)], &[9], 2, 2);
        let mut values = vec![false; f.variable_count()];
        values[chain_var(&f, 1, 2, 2)] = true;
        assert!(!f.is_feasible(&values));
        values[chain_var(&f, 9, 1, 1)] = true;
        assert!(f.is_feasible(&values));
        assert_eq!(f.evaluate(&values), Decimal::from(2));
    }

    #[test]
    fn test_recipient_cap_across_cycle_and_chain() {
        // 1 <-> 2 cycle, and altruist 9 -> 1
        let f = build(&[(1, 2), (2, 1), (9, 1)], &[9], 2, 1);
        let cycle_var = f
            .variables
            .iter()
            .position(|v| matches!(v.kind, VariableKind::Cycle(_)))
            .unwrap();
        let mut values = vec![false; f.variable_count()];
        values[cycle_var] = true;
        values[chain_var(&f, 9, 1, 1)] = true;
        assert!(!f.is_feasible(&values));
    }

    #[test]
    fn test_altruist_starts_one_chain() {
        let f = build(&[(9, 1), (9, 2)], &[9], 2, 1);
        let mut values = vec![true; f.variable_count()];
        assert!(!f.is_feasible(&values));
        values[0] = false;
        assert!(f.is_feasible(&values));
    }

    #[test]
    fn test_decode_chain() {
        let f = build(&[(9, 1), (1, 2)], &[9], 2, 2);
        let values = vec![true; f.variable_count()];
        let decoded = f.decode(&values).unwrap();
        assert_eq!(decoded.chains, vec![Chain::new(id(9), vec![id(1), id(2)])]);
        assert!(decoded.cycles.is_empty());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let f = build(&[(9, 1)], &[9], 2, 1);
        assert!(f.decode(&[]).is_err());
    }
}
