//! Feasibility properties of both matching strategies on random markets

use std::collections::BTreeSet;

use kpd_types::ids::PairId;
use kpd_types::match_result::MatchResult;
use kpd_types::participant::{BloodType, Pair};
use matching_engine::{AssignmentStrategy, CompatibilityGraph, KpdWeight, MatchingStrategy, PackingStrategy};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;

const MAX_CYCLE: usize = 3;
const MAX_CHAIN: usize = 3;

fn blood(idx: usize) -> BloodType {
    BloodType::ALL[idx % 4]
}

fn market(seed: u64, pairs: &[(usize, usize, f64)], altruists: &[usize]) -> CompatibilityGraph {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut graph = CompatibilityGraph::new(Box::new(KpdWeight::default()));
    for (i, (r, d, cpra)) in pairs.iter().enumerate() {
        let pair = Pair::new(PairId::new(i as u64), blood(*r), blood(*d), *cpra, Decimal::from(2), 70);
        graph.add_pair(pair, &mut rng).unwrap();
    }
    for (j, d) in altruists.iter().enumerate() {
        let id = PairId::new(100 + j as u64);
        graph.add_altruist(Pair::altruist(id, blood(*d), Decimal::from(-150), 70), &mut rng).unwrap();
    }
    graph
}

/// Every recipient receives at most once, every transplant follows a
/// stored edge, and no pair shows up in two structures.
fn check_feasible(graph: &CompatibilityGraph, result: &MatchResult) -> Result<(), TestCaseError> {
    let mut recipients = BTreeSet::new();
    for transplant in &result.transplants {
        prop_assert!(recipients.insert(transplant.recipient), "{} receives twice", transplant.recipient);
        prop_assert_eq!(graph.edge_weight(transplant.donor, transplant.recipient), Some(transplant.weight));
    }

    let mut seen = BTreeSet::new();
    for cycle in &result.cycles {
        prop_assert!(cycle.len() >= 2);
        for pair in cycle.pairs() {
            prop_assert!(seen.insert(*pair));
        }
    }
    for chain in &result.chains {
        prop_assert!(graph.is_altruist(chain.root));
        prop_assert!(seen.insert(chain.root));
        for pair in &chain.pairs {
            prop_assert!(seen.insert(*pair));
        }
    }
    Ok(())
}

fn arb_pairs() -> impl Strategy<Value = Vec<(usize, usize, f64)>> {
    proptest::collection::vec((0usize..4, 0usize..4, 0.0f64..1.0), 0..10)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_packing_is_feasible(
        seed in any::<u64>(),
        pairs in arb_pairs(),
        altruists in proptest::collection::vec(0usize..4, 0..3),
    ) {
        let graph = market(seed, &pairs, &altruists);
        let result = PackingStrategy::new(MAX_CYCLE, MAX_CHAIN).compute_matching(&graph).unwrap();
        check_feasible(&graph, &result)?;
        for cycle in &result.cycles {
            prop_assert!(cycle.len() <= MAX_CYCLE);
        }
        for chain in &result.chains {
            prop_assert!(chain.len() <= MAX_CHAIN);
        }
        prop_assert_eq!(
            result.transplant_count() as u64,
            result.tally.chain_transplants + result.tally.cycle_transplants_lower_bound()
        );
    }

    #[test]
    fn prop_assignment_is_feasible(
        seed in any::<u64>(),
        pairs in arb_pairs(),
        altruists in proptest::collection::vec(0usize..4, 0..3),
    ) {
        let graph = market(seed, &pairs, &altruists);
        let result = AssignmentStrategy::new().compute_matching(&graph).unwrap();
        check_feasible(&graph, &result)?;
        prop_assert!(result.chains.is_empty());
        prop_assert!(result.preserved_donors.is_empty());
    }

    #[test]
    fn prop_strategies_leave_graph_untouched(
        seed in any::<u64>(),
        pairs in arb_pairs(),
    ) {
        let graph = market(seed, &pairs, &[]);
        let before: Vec<_> = graph.edges().collect();
        PackingStrategy::new(MAX_CYCLE, MAX_CHAIN).compute_matching(&graph).unwrap();
        AssignmentStrategy::new().compute_matching(&graph).unwrap();
        let after: Vec<_> = graph.edges().collect();
        prop_assert_eq!(before, after);
        prop_assert!(graph.verify_invariants().is_ok());
    }
}
