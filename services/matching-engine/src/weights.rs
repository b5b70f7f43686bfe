//! Edge weight policies
//!
//! A policy is a pure function of the donor and recipient attributes.
//! The graph stores the value computed at link time and only re-derives
//! it when `CompatibilityGraph::recompute_weights` is called.

use kpd_types::participant::{BloodType, Participant};
use rust_decimal::Decimal;
use std::fmt::Debug;

/// Default penalty added to every edge leaving an altruist donor.
pub const DEFAULT_ALTRUIST_PENALTY: i64 = -150;

/// Weight of a donor → recipient edge.
pub trait WeightPolicy: Debug + Send + Sync {
    fn weight(&self, donor: &Participant, recipient: &Participant) -> Decimal;
}

fn altruist_adjustment(donor: &Participant, penalty: Decimal) -> Decimal {
    if donor.altruist {
        penalty
    } else {
        Decimal::ZERO
    }
}

/// Uses the recipient's own `edge_weight`.
#[derive(Debug, Clone)]
pub struct RecipientWeight {
    pub altruist_penalty: Decimal,
}

impl RecipientWeight {
    pub fn new(altruist_penalty: Decimal) -> Self {
        Self { altruist_penalty }
    }
}

impl Default for RecipientWeight {
    fn default() -> Self {
        Self::new(Decimal::from(DEFAULT_ALTRUIST_PENALTY))
    }
}

impl WeightPolicy for RecipientWeight {
    fn weight(&self, donor: &Participant, recipient: &Participant) -> Decimal {
        recipient.edge_weight + altruist_adjustment(donor, self.altruist_penalty)
    }
}

/// Same weight on every edge.
#[derive(Debug, Clone)]
pub struct ConstantWeight {
    pub value: Decimal,
    pub altruist_penalty: Decimal,
}

impl ConstantWeight {
    pub fn new(value: Decimal, altruist_penalty: Decimal) -> Self {
        Self { value, altruist_penalty }
    }
}

impl WeightPolicy for ConstantWeight {
    fn weight(&self, donor: &Participant, _recipient: &Participant) -> Decimal {
        self.value + altruist_adjustment(donor, self.altruist_penalty)
    }
}

/// Points schedule of the Canadian KPD programme.
///
/// - 100 base points
/// - +125 if the recipient's CPRA is at least 0.80
/// - +75 if both are blood type O, otherwise +5 for identical types
///
/// The total is truncated to an integer.
#[derive(Debug, Clone)]
pub struct KpdWeight {
    pub altruist_penalty: Decimal,
}

impl KpdWeight {
    const BASE: i64 = 100;
    const HIGH_CPRA_BONUS: i64 = 125;
    const HIGH_CPRA_THRESHOLD: f64 = 0.80;
    const BOTH_O_BONUS: i64 = 75;
    const SAME_TYPE_BONUS: i64 = 5;

    pub fn new(altruist_penalty: Decimal) -> Self {
        Self { altruist_penalty }
    }
}

impl Default for KpdWeight {
    fn default() -> Self {
        Self::new(Decimal::from(DEFAULT_ALTRUIST_PENALTY))
    }
}

impl WeightPolicy for KpdWeight {
    fn weight(&self, donor: &Participant, recipient: &Participant) -> Decimal {
        let mut points = Self::BASE;
        if recipient.cpra >= Self::HIGH_CPRA_THRESHOLD {
            points += Self::HIGH_CPRA_BONUS;
        }
        if donor.blood_type == BloodType::O && recipient.blood_type == BloodType::O {
            points += Self::BOTH_O_BONUS;
        } else if donor.blood_type == recipient.blood_type {
            points += Self::SAME_TYPE_BONUS;
        }
        (Decimal::from(points) + altruist_adjustment(donor, self.altruist_penalty)).trunc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpd_types::ids::PairId;
    use kpd_types::participant::Pair;

    fn pair(id: u64, recipient: BloodType, donor: BloodType, cpra: f64) -> Pair {
        Pair::new(PairId::new(id), recipient, donor, cpra, Decimal::from(2), 40)
    }

    #[test]
    fn test_kpd_points() {
        let policy = KpdWeight::default();
        let a = pair(1, BloodType::A, BloodType::O, 0.0);
        let b = pair(2, BloodType::O, BloodType::A, 0.9);
        // O donor → O recipient with high CPRA
        assert_eq!(policy.weight(&a.donor, &b.recipient), Decimal::from(300));
        // A donor → A recipient, low CPRA
        let c = pair(3, BloodType::A, BloodType::B, 0.1);
        assert_eq!(policy.weight(&b.donor, &c.recipient), Decimal::from(105));
        // O donor → A recipient
        assert_eq!(policy.weight(&a.donor, &c.recipient), Decimal::from(100));
    }

    #[test]
    fn test_altruist_penalty_applies_to_donor_side() {
        let policy = KpdWeight::default();
        let altruist = Pair::altruist(PairId::new(9), BloodType::O, Decimal::from(-150), 70);
        let target = pair(1, BloodType::A, BloodType::B, 0.0);
        assert_eq!(policy.weight(&altruist.donor, &target.recipient), Decimal::from(-50));
    }

    #[test]
    fn test_recipient_weight() {
        let policy = RecipientWeight::new(Decimal::from(-10));
        let a = pair(1, BloodType::A, BloodType::O, 0.0);
        let mut b = pair(2, BloodType::O, BloodType::A, 0.0);
        b.recipient.edge_weight = Decimal::new(7525, 3);
        assert_eq!(policy.weight(&a.donor, &b.recipient), Decimal::new(7525, 3));
    }

    #[test]
    fn test_constant_weight() {
        let policy = ConstantWeight::new(Decimal::from(2), Decimal::from(-150));
        let a = pair(1, BloodType::A, BloodType::O, 0.0);
        let b = pair(2, BloodType::AB, BloodType::A, 0.99);
        assert_eq!(policy.weight(&a.donor, &b.recipient), Decimal::from(2));
    }
}
