//! Population generator
//!
//! Samples new patient/donor pairs and altruists from the configured
//! blood type and CPRA distributions. Pair ids are handed out from one
//! counter, so every pair ever generated in a run has a distinct id.

use kpd_types::errors::SimulationError;
use kpd_types::ids::PairId;
use kpd_types::participant::{BloodType, Pair, Participant};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::Poisson;
use rust_decimal::Decimal;
use tracing::warn;

use crate::config::{PopulationConfig, SimulationConfig, WeightMode};
use crate::weights::WeightTable;

/// Rejected draws allowed per requested pair before giving up.
const MAX_ATTEMPTS_PER_PAIR: usize = 1_000;

/// Base weight of a pair outside learned mode.
const DEFAULT_PAIR_WEIGHT: i64 = 2;

/// Poisson draw that treats a zero mean as "always zero".
pub fn poisson<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> u32 {
    if mean <= 0.0 {
        return 0;
    }
    match Poisson::new(mean) {
        Ok(dist) => {
            let draw: f64 = dist.sample(rng);
            draw as u32
        }
        Err(_) => 0,
    }
}

#[derive(Debug, Clone)]
pub struct Population {
    config: PopulationConfig,
    table: Option<WeightTable>,
    altruist_weight: Decimal,
    blood_types: WeightedIndex<f64>,
    cpra_buckets: WeightedIndex<f64>,
    next_id: u64,
}

impl Population {
    pub fn new(config: &SimulationConfig) -> Result<Self, SimulationError> {
        let blood_types = WeightedIndex::new(config.population.blood_type_shares)
            .map_err(|e| SimulationError::config(format!("blood_type_shares: {e}")))?;
        let cpra_buckets = WeightedIndex::new(config.population.cpra_shares)
            .map_err(|e| SimulationError::config(format!("cpra_shares: {e}")))?;
        let table = match config.weights {
            WeightMode::Learned => Some(config.learned_weights.clone().unwrap_or_default()),
            _ => None,
        };
        Ok(Self {
            config: config.population.clone(),
            table,
            altruist_weight: config.altruist_weight,
            blood_types,
            cpra_buckets,
            next_id: 0,
        })
    }

    /// Number of ids handed out so far.
    pub fn generated(&self) -> u64 {
        self.next_id
    }

    fn next_id(&mut self) -> PairId {
        let id = PairId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn blood_type<R: Rng + ?Sized>(&self, rng: &mut R) -> BloodType {
        BloodType::ALL[self.blood_types.sample(rng)]
    }

    /// Time to expiry for an arrival or altruist.
    pub fn expiry<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        poisson(rng, self.config.expiry_mean)
    }

    fn initial_expiry<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let (low, high) = self.config.initial_expiry;
        rng.gen_range(low..high)
    }

    fn pair_weight(&self, cpra: f64, recipient: BloodType, donor: BloodType) -> Decimal {
        self.table
            .as_ref()
            .and_then(|table| table.lookup(cpra, recipient, donor))
            .unwrap_or_else(|| Decimal::from(DEFAULT_PAIR_WEIGHT))
    }

    /// Pairs present before the first period; expiry is uniform.
    pub fn initial_pairs<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) -> Vec<Pair> {
        self.generate(count, true, rng)
    }

    /// Pairs arriving during a period; expiry is Poisson.
    pub fn arrivals<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) -> Vec<Pair> {
        self.generate(count, false, rng)
    }

    fn generate<R: Rng + ?Sized>(&mut self, count: usize, initial: bool, rng: &mut R) -> Vec<Pair> {
        let mut pairs = Vec::with_capacity(count);
        let max_attempts = count.saturating_mul(MAX_ATTEMPTS_PER_PAIR);
        let mut attempts = 0;

        while pairs.len() < count {
            if attempts >= max_attempts {
                warn!(requested = count, generated = pairs.len(), "gave up sampling incompatible pairs");
                break;
            }
            attempts += 1;

            let (low, high) = self.config.cpra_ranges[self.cpra_buckets.sample(rng)];
            let cpra = if low < high { rng.gen_range(low..=high) } else { low };
            let donor_type = self.blood_type(rng);
            let recipient_type = self.blood_type(rng);
            let expiry = if initial {
                self.initial_expiry(rng)
            } else {
                self.expiry(rng)
            };

            // A blood-compatible pair only needs the exchange if the crossmatch fails
            if donor_type.can_donate_to(recipient_type) && !rng.gen_bool(cpra.clamp(0.0, 1.0)) {
                continue;
            }

            let weight = self.pair_weight(cpra, recipient_type, donor_type);
            let id = self.next_id();
            pairs.push(Pair::new(id, recipient_type, donor_type, cpra, weight, expiry));
        }
        pairs
    }

    /// A fresh altruist with a placeholder recipient.
    pub fn altruist<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Pair {
        let donor_type = self.blood_type(rng);
        let expiry = self.expiry(rng);
        let id = self.next_id();
        Pair::altruist(id, donor_type, self.altruist_weight, expiry)
    }

    /// A preserved chain-tail donor re-entering as an altruist under its
    /// own pair id.
    pub fn reuse_donor<R: Rng + ?Sized>(&self, donor: &Participant, rng: &mut R) -> Pair {
        let expiry = self.expiry(rng);
        Pair::altruist(donor.id(), donor.blood_type, self.altruist_weight, expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn population() -> Population {
        Population::new(&SimulationConfig::default()).unwrap()
    }

    #[test]
    fn test_ids_are_unique_and_sequential() {
        let mut pop = population();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut pairs = pop.initial_pairs(20, &mut rng);
        pairs.extend(pop.arrivals(10, &mut rng));
        pairs.push(pop.altruist(&mut rng));
        let ids: Vec<u64> = pairs.iter().map(|p| p.id().value()).collect();
        assert_eq!(ids, (0..31).collect::<Vec<_>>());
        assert_eq!(pop.generated(), 31);
    }

    #[test]
    fn test_pairs_are_valid() {
        let mut pop = population();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for pair in pop.arrivals(200, &mut rng) {
            assert!(pair.validate().is_ok());
            assert!(!pair.is_altruist());
            assert!((0.0..=1.0).contains(&pair.recipient.cpra));
        }
    }

    #[test]
    fn test_zero_cpra_compatible_pairs_never_admitted() {
        // With CPRA fixed at 0 the crossmatch always passes, so only
        // blood-incompatible pairs can enter
        let mut config = SimulationConfig::default();
        config.population.cpra_shares = [1.0, 0.0, 0.0, 0.0, 0.0];
        let mut pop = Population::new(&config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for pair in pop.arrivals(100, &mut rng) {
            assert!(!pair.donor.blood_type.can_donate_to(pair.recipient.blood_type));
        }
    }

    #[test]
    fn test_all_o_population_gives_up() {
        // O donors are compatible with everyone and CPRA 0 never fails
        let mut config = SimulationConfig::default();
        config.population.cpra_shares = [1.0, 0.0, 0.0, 0.0, 0.0];
        config.population.blood_type_shares = [1.0, 0.0, 0.0, 0.0];
        let mut pop = Population::new(&config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert!(pop.arrivals(2, &mut rng).is_empty());
    }

    #[test]
    fn test_initial_expiry_range() {
        let mut pop = population();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for pair in pop.initial_pairs(100, &mut rng) {
            assert!((10..70).contains(&pair.recipient.time_to_expiry));
        }
    }

    #[test]
    fn test_altruist_shape() {
        let mut pop = population();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let alt = pop.altruist(&mut rng);
        assert!(alt.is_altruist());
        assert_eq!(alt.recipient.edge_weight, Decimal::from(-150));
        assert!(alt.validate().is_ok());
    }

    #[test]
    fn test_learned_weights_stamped() {
        let config = SimulationConfig {
            weights: WeightMode::Learned,
            learned_weights: Some(WeightTable::uniform(Decimal::from(7))),
            ..SimulationConfig::default()
        };
        let mut pop = Population::new(&config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(pop.arrivals(10, &mut rng).iter().all(|p| p.recipient.edge_weight == Decimal::from(7)));
    }

    #[test]
    fn test_reuse_keeps_id_and_type() {
        let mut pop = population();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let pair = pop.arrivals(1, &mut rng).remove(0);
        let reused = pop.reuse_donor(&pair.donor, &mut rng);
        assert_eq!(reused.id(), pair.id());
        assert_eq!(reused.donor.blood_type, pair.donor.blood_type);
        assert!(reused.is_altruist());
    }

    #[test]
    fn test_poisson_zero_mean() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        assert_eq!(poisson(&mut rng, 0.0), 0);
    }
}
