//! Participant and pair value types
//!
//! A `Pair` is the single ownership root for both of its halves: the
//! recipient and the donor are created, admitted and removed together.
//! Altruists are represented as a pair whose recipient is a placeholder.

use crate::errors::GraphError;
use crate::ids::{Half, PairId, ParticipantKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of CPRA buckets used by composition and weight tables.
pub const CPRA_BUCKETS: usize = 5;

/// Upper bounds of the CPRA buckets: exactly 0, ≤0.50, ≤0.94, ≤0.96, ≤1.
const CPRA_BUCKET_UPPER: [f64; CPRA_BUCKETS] = [0.0, 0.50, 0.94, 0.96, 1.0];

/// ABO blood type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    O,
    A,
    B,
    AB,
    /// Blood type of an altruist's placeholder recipient
    Placeholder,
}

impl BloodType {
    /// Real blood types in table order (O, A, B, AB).
    pub const ALL: [BloodType; 4] = [BloodType::O, BloodType::A, BloodType::B, BloodType::AB];

    /// Row/column index in composition and weight tables.
    pub fn index(&self) -> Option<usize> {
        match self {
            BloodType::O => Some(0),
            BloodType::A => Some(1),
            BloodType::B => Some(2),
            BloodType::AB => Some(3),
            BloodType::Placeholder => None,
        }
    }

    /// Coarse ABO rule: O donates to anyone, AB receives from anyone,
    /// otherwise types must be identical. Placeholders never match.
    pub fn can_donate_to(&self, recipient: BloodType) -> bool {
        if *self == BloodType::Placeholder || recipient == BloodType::Placeholder {
            return false;
        }
        *self == BloodType::O || recipient == BloodType::AB || *self == recipient
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BloodType::O => "O",
            BloodType::A => "A",
            BloodType::B => "B",
            BloodType::AB => "AB",
            BloodType::Placeholder => "X",
        };
        f.write_str(label)
    }
}

/// Bucket index (0..CPRA_BUCKETS) of a CPRA value.
pub fn cpra_bucket(cpra: f64) -> usize {
    if cpra <= CPRA_BUCKET_UPPER[0] {
        return 0;
    }
    CPRA_BUCKET_UPPER
        .iter()
        .position(|upper| cpra <= *upper)
        .unwrap_or(CPRA_BUCKETS - 1)
}

/// Role of a node in the compatibility graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Donor,
    Recipient,
    AltruistPlaceholder,
}

/// One half of a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub key: ParticipantKey,
    pub role: Role,
    pub blood_type: BloodType,
    /// Rejection probability proxy in [0, 1]
    pub cpra: f64,
    /// Base weight of edges where this participant is the recipient
    pub edge_weight: Decimal,
    pub time_in_market: u32,
    pub time_to_expiry: u32,
    pub altruist: bool,
}

impl Participant {
    pub fn id(&self) -> PairId {
        self.key.pair
    }

    pub fn partner_key(&self) -> ParticipantKey {
        self.key.partner()
    }

    pub fn is_donor(&self) -> bool {
        self.role == Role::Donor
    }

    /// True for real recipients only, never for placeholders
    pub fn is_recipient(&self) -> bool {
        self.role == Role::Recipient
    }

    pub fn is_placeholder(&self) -> bool {
        self.role == Role::AltruistPlaceholder
    }

    pub fn is_perished(&self) -> bool {
        self.time_in_market >= self.time_to_expiry
    }

    /// Probability that a blood-compatible crossmatch succeeds.
    pub fn crossmatch_pass_probability(&self) -> f64 {
        (1.0 - self.cpra).clamp(0.0, 1.0)
    }
}

/// A recipient/donor pair, admitted and removed as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub recipient: Participant,
    pub donor: Participant,
}

impl Pair {
    /// Incompatible patient/donor pair entering the exchange.
    pub fn new(
        id: PairId,
        recipient_type: BloodType,
        donor_type: BloodType,
        cpra: f64,
        edge_weight: Decimal,
        time_to_expiry: u32,
    ) -> Self {
        Self {
            recipient: Participant {
                key: ParticipantKey::recipient(id),
                role: Role::Recipient,
                blood_type: recipient_type,
                cpra,
                edge_weight,
                time_in_market: 0,
                time_to_expiry,
                altruist: false,
            },
            donor: Participant {
                key: ParticipantKey::donor(id),
                role: Role::Donor,
                blood_type: donor_type,
                cpra,
                edge_weight,
                time_in_market: 0,
                time_to_expiry,
                altruist: false,
            },
        }
    }

    /// Altruistic donor paired with a placeholder recipient.
    pub fn altruist(id: PairId, donor_type: BloodType, edge_weight: Decimal, time_to_expiry: u32) -> Self {
        Self {
            recipient: Participant {
                key: ParticipantKey::recipient(id),
                role: Role::AltruistPlaceholder,
                blood_type: BloodType::Placeholder,
                cpra: 0.0,
                edge_weight,
                time_in_market: 0,
                time_to_expiry,
                altruist: true,
            },
            donor: Participant {
                key: ParticipantKey::donor(id),
                role: Role::Donor,
                blood_type: donor_type,
                cpra: 0.0,
                edge_weight,
                time_in_market: 0,
                time_to_expiry,
                altruist: true,
            },
        }
    }

    pub fn id(&self) -> PairId {
        self.donor.key.pair
    }

    pub fn is_altruist(&self) -> bool {
        self.donor.altruist
    }

    pub fn half(&self, half: Half) -> &Participant {
        match half {
            Half::Donor => &self.donor,
            Half::Recipient => &self.recipient,
        }
    }

    /// Check that both halves agree on identity and roles.
    pub fn validate(&self) -> Result<(), GraphError> {
        let id = self.id();
        let invalid = |reason: &str| GraphError::InvalidPair {
            pair: id.value(),
            reason: reason.to_string(),
        };

        if self.recipient.key != ParticipantKey::recipient(id) || self.donor.key != ParticipantKey::donor(id) {
            return Err(invalid("halves carry different pair ids"));
        }
        if self.donor.role != Role::Donor {
            return Err(invalid("donor half does not have the donor role"));
        }
        if self.donor.altruist != self.recipient.altruist {
            return Err(invalid("halves disagree on altruist flag"));
        }
        match (self.donor.altruist, self.recipient.role) {
            (true, Role::AltruistPlaceholder) | (false, Role::Recipient) => {}
            (true, _) => return Err(invalid("altruist must be paired with a placeholder recipient")),
            (false, _) => return Err(invalid("placeholder recipient outside an altruist pair")),
        }
        if self.donor.blood_type == BloodType::Placeholder {
            return Err(invalid("donor cannot have placeholder blood type"));
        }
        if !(0.0..=1.0).contains(&self.recipient.cpra) || !(0.0..=1.0).contains(&self.donor.cpra) {
            return Err(invalid("cpra outside [0, 1]"));
        }
        Ok(())
    }
}
