//! End-to-end market scenarios
//!
//! Small hand-built markets driven through the real scheduler and
//! packing strategy. CPRA is 0 everywhere, so every blood-compatible
//! donor/recipient crossmatch passes and the graph is fully determined.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use kpd_types::candidate::{Chain, Cycle};
use kpd_types::ids::{PairId, ParticipantKey};
use kpd_types::participant::{BloodType, Pair};
use matching_engine::{enumerate, CompatibilityGraph, MatchingStrategy, PackingStrategy, RecipientWeight};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use simulation::population::Population;
use simulation::scheduler::{Arrivals, PeriodScheduler, SchedulerSettings};
use simulation::{Simulation, SimulationConfig};

fn id(raw: u64) -> PairId {
    PairId::new(raw)
}

fn pair(raw: u64, recipient: BloodType, donor: BloodType, expiry: u32) -> Pair {
    Pair::new(id(raw), recipient, donor, 0.0, Decimal::from(2), expiry)
}

fn altruist(raw: u64, donor: BloodType) -> Pair {
    Pair::altruist(id(raw), donor, Decimal::from(-150), 70)
}

fn settings(perish: bool) -> SchedulerSettings {
    SchedulerSettings {
        perish,
        period_length: 4,
        reuse_rate: 0.0,
        audit_invariants: true,
    }
}

fn scheduler(max_cycle: usize, max_chain: usize, perish: bool) -> PeriodScheduler {
    PeriodScheduler::new(
        CompatibilityGraph::new(Box::new(RecipientWeight::default())),
        Box::new(PackingStrategy::new(max_cycle, max_chain)),
        settings(perish),
    )
}

fn population() -> Population {
    Population::new(&SimulationConfig::default()).unwrap()
}

#[test]
fn test_single_two_cycle_is_matched_and_removed() {
    let mut sched = scheduler(2, 0, false);
    let mut rng = ChaCha8Rng::seed_from_u64(100);
    sched
        .admit(
            Arrivals {
                pairs: vec![pair(1, BloodType::A, BloodType::B, 70), pair(2, BloodType::B, BloodType::A, 70)],
                altruists: Vec::new(),
            },
            &mut rng,
        )
        .unwrap();

    let graph = sched.graph();
    let candidates = enumerate(&graph.adjacency(), 2, 0, graph.altruists());
    assert_eq!(candidates.cycles, vec![Cycle::new(&[id(1), id(2)])]);
    assert!(candidates.chains.is_empty());

    let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
    assert_eq!(outcome.matching.cycles, vec![Cycle::new(&[id(1), id(2)])]);
    assert_eq!(outcome.matching.tally.cycles_by_length, [1, 0, 0, 0, 0]);
    assert!(!sched.graph().contains_pair(id(1)));
    assert!(!sched.graph().contains_pair(id(2)));
    assert!(sched.graph().is_empty());
}

#[test]
fn test_altruist_chain_prefers_longer_prefix() {
    // altruist 9 (A) -> R1 (A); D1 (B) -> R2 (B); D2 (AB) gives to nobody
    let mut sched = scheduler(2, 2, false);
    let mut rng = ChaCha8Rng::seed_from_u64(200);
    sched
        .admit(
            Arrivals {
                pairs: vec![pair(1, BloodType::A, BloodType::B, 70), pair(2, BloodType::B, BloodType::AB, 70)],
                altruists: vec![altruist(9, BloodType::A)],
            },
            &mut rng,
        )
        .unwrap();

    let graph = sched.graph();
    let candidates = enumerate(&graph.adjacency(), 2, 2, graph.altruists());
    assert_eq!(
        candidates.chains,
        vec![Chain::new(id(9), vec![id(1)]), Chain::new(id(9), vec![id(1), id(2)])]
    );
    assert!(candidates.cycles.is_empty());

    let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
    assert_eq!(outcome.matching.chains, vec![Chain::new(id(9), vec![id(1), id(2)])]);
    assert_eq!(outcome.matching.tally.chain_transplants, 2);
    assert_eq!(outcome.matching.preserved_donors, BTreeSet::from([id(2)]));
    assert!(!outcome.matching.matched.contains(&ParticipantKey::donor(id(2))));
    assert!(outcome.matching.matched.contains(&ParticipantKey::donor(id(1))));
    assert!(sched.graph().is_empty());
}

#[test]
fn test_perished_pair_leaves_candidate_graph() {
    let mut sched = scheduler(2, 0, true);
    let mut rng = ChaCha8Rng::seed_from_u64(300);
    // Pair 1 expires after one period of four months
    sched
        .admit(
            Arrivals {
                pairs: vec![pair(1, BloodType::A, BloodType::B, 4), pair(3, BloodType::O, BloodType::O, 70)],
                altruists: Vec::new(),
            },
            &mut rng,
        )
        .unwrap();

    // First period: nothing to match; aging brings pair 1 to its expiry
    let outcome = sched.run_period(0, Arrivals::default(), &population(), &mut rng).unwrap();
    assert!(outcome.matching.is_empty());
    let recipient = sched.graph().participant(ParticipantKey::recipient(id(1))).unwrap();
    assert_eq!(recipient.time_in_market, recipient.time_to_expiry);

    // Second period: pair 1 perishes before matching, then pair 2 arrives
    let arrivals = Arrivals {
        pairs: vec![pair(2, BloodType::B, BloodType::A, 70)],
        altruists: Vec::new(),
    };
    let outcome = sched.run_period(1, arrivals, &population(), &mut rng).unwrap();
    assert_eq!(outcome.perished, 1);
    assert!(outcome.matching.is_empty());

    // Pair 2 would have closed a 2-cycle with pair 1
    let graph = sched.graph();
    assert!(!graph.contains_pair(id(1)));
    assert!(!graph.adjacency().contains(id(1)));
    assert!(graph.contains_pair(id(2)));
    let candidates = enumerate(&graph.adjacency(), 2, 0, graph.altruists());
    assert!(candidates.cycles.is_empty());
}

#[test]
fn test_strategy_is_read_only() {
    let mut rng = ChaCha8Rng::seed_from_u64(400);
    let mut graph = CompatibilityGraph::new(Box::new(RecipientWeight::default()));
    graph.add_pair(pair(1, BloodType::A, BloodType::B, 70), &mut rng).unwrap();
    graph.add_pair(pair(2, BloodType::B, BloodType::A, 70), &mut rng).unwrap();
    let edges_before: Vec<_> = graph.edges().collect();

    let result = PackingStrategy::new(2, 0).compute_matching(&graph).unwrap();
    assert_eq!(result.transplant_count(), 2);
    let edges_after: Vec<_> = graph.edges().collect();
    assert_eq!(edges_before, edges_after);
    assert_eq!(graph.pair_count(), 2);
}

#[test]
fn test_default_market_matches_every_period() {
    // Full-size market with five-way cycles and chains
    let config = SimulationConfig {
        num_periods: 2,
        ..SimulationConfig::default()
    };
    assert_eq!((config.max_cycle, config.max_chain), (5, 5));

    let started = Instant::now();
    let summary = Simulation::new(config).unwrap().run().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.periods.len(), 2);
    assert_eq!(summary.failed_periods, 0);
    for report in &summary.periods {
        assert!(!report.matching_failed, "period {} failed to match", report.period);
        assert!(report.transplants > 0, "period {} matched nobody", report.period);
    }
    assert!(elapsed < Duration::from_secs(120), "two periods took {elapsed:?}");
}
