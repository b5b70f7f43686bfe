//! Identifier types for exchange participants
//!
//! A pair id is shared by both halves of a patient/donor pair (and by an
//! altruist and its placeholder recipient). Individual graph nodes are
//! addressed by `ParticipantKey`, the pair id plus which half.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a pair in the market.
///
/// Ordered so that every map keyed by pair iterates deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(u64);

impl PairId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PairId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Which half of a pair a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Half {
    Recipient,
    Donor,
}

impl Half {
    /// The other half of the same pair
    pub fn other(&self) -> Self {
        match self {
            Half::Recipient => Half::Donor,
            Half::Donor => Half::Recipient,
        }
    }
}

/// Address of a single node in the compatibility graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantKey {
    pub pair: PairId,
    pub half: Half,
}

impl ParticipantKey {
    pub const fn donor(pair: PairId) -> Self {
        Self { pair, half: Half::Donor }
    }

    pub const fn recipient(pair: PairId) -> Self {
        Self { pair, half: Half::Recipient }
    }

    /// Key of the partner node. Always mutual: `k.partner().partner() == k`.
    pub fn partner(&self) -> Self {
        Self {
            pair: self.pair,
            half: self.half.other(),
        }
    }

    pub fn is_donor(&self) -> bool {
        self.half == Half::Donor
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.half {
            Half::Donor => write!(f, "{}/donor", self.pair),
            Half::Recipient => write!(f, "{}/recipient", self.pair),
        }
    }
}
