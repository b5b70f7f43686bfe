//! Candidate cycles and chains
//!
//! Candidates are sequences of pair ids. In a cycle `[a, b, c]` the donor
//! of `a` gives to the recipient of `b`, `b` to `c`, and `c` back to `a`.
//! In a chain the altruist root gives to the first pair, each pair's donor
//! gives to the next pair, and the donor of the last pair is preserved.

use crate::ids::PairId;
use serde::{Deserialize, Serialize};

/// Rotate a closed sequence so it starts at its minimum id.
///
/// Any rotation of the same cycle yields the same canonical vector.
pub fn canonicalize_cycle(pairs: &[PairId]) -> Vec<PairId> {
    let start = pairs
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    pairs[start..].iter().chain(pairs[..start].iter()).copied().collect()
}

/// A closed exchange among pairs, stored in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cycle(Vec<PairId>);

impl Cycle {
    pub fn new(pairs: &[PairId]) -> Self {
        Self(canonicalize_cycle(pairs))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pairs(&self) -> &[PairId] {
        &self.0
    }

    pub fn contains(&self, pair: PairId) -> bool {
        self.0.contains(&pair)
    }

    /// Donor → recipient transplants, one per pair.
    pub fn transplants(&self) -> impl Iterator<Item = (PairId, PairId)> + '_ {
        let n = self.0.len();
        (0..n).map(move |i| (self.0[i], self.0[(i + 1) % n]))
    }
}

/// An open chain started by an altruist donor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Chain {
    pub root: PairId,
    pub pairs: Vec<PairId>,
}

impl Chain {
    pub fn new(root: PairId, pairs: Vec<PairId>) -> Self {
        Self { root, pairs }
    }

    /// Number of transplants (root excluded).
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pair whose donor ends the chain unused.
    pub fn tail(&self) -> Option<PairId> {
        self.pairs.last().copied()
    }

    pub fn contains(&self, pair: PairId) -> bool {
        self.root == pair || self.pairs.contains(&pair)
    }

    pub fn edges(&self) -> impl Iterator<Item = (PairId, PairId)> + '_ {
        std::iter::once(self.root)
            .chain(self.pairs.iter().copied())
            .zip(self.pairs.iter().copied())
    }
}

/// Either kind of candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Candidate {
    Cycle(Cycle),
    Chain(Chain),
}

impl Candidate {
    pub fn transplants(&self) -> usize {
        match self {
            Candidate::Cycle(cycle) => cycle.len(),
            Candidate::Chain(chain) => chain.len(),
        }
    }

    /// Every pair the candidate touches, altruist root included.
    pub fn pairs(&self) -> Vec<PairId> {
        match self {
            Candidate::Cycle(cycle) => cycle.pairs().to_vec(),
            Candidate::Chain(chain) => std::iter::once(chain.root).chain(chain.pairs.iter().copied()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<PairId> {
        raw.iter().copied().map(PairId::new).collect()
    }

    #[test]
    fn test_canonical_rotation() {
        assert_eq!(canonicalize_cycle(&ids(&[5, 2, 9])), ids(&[2, 9, 5]));
        assert_eq!(canonicalize_cycle(&ids(&[2, 9, 5])), ids(&[2, 9, 5]));
        assert!(canonicalize_cycle(&[]).is_empty());
    }

    #[test]
    fn test_rotations_are_equal_cycles() {
        assert_eq!(Cycle::new(&ids(&[3, 1, 2])), Cycle::new(&ids(&[1, 2, 3])));
        assert_ne!(Cycle::new(&ids(&[1, 3, 2])), Cycle::new(&ids(&[1, 2, 3])));
    }

    #[test]
    fn test_cycle_transplants_wrap() {
        let cycle = Cycle::new(&ids(&[4, 7]));
        let edges: Vec<_> = cycle.transplants().collect();
        assert_eq!(edges, vec![(PairId::new(4), PairId::new(7)), (PairId::new(7), PairId::new(4))]);
    }

    #[test]
    fn test_chain_edges_and_tail() {
        let chain = Chain::new(PairId::new(10), ids(&[1, 2]));
        let edges: Vec<_> = chain.edges().collect();
        assert_eq!(edges, vec![(PairId::new(10), PairId::new(1)), (PairId::new(1), PairId::new(2))]);
        assert_eq!(chain.tail(), Some(PairId::new(2)));
        assert_eq!(chain.len(), 2);
        assert!(chain.contains(PairId::new(10)));
    }

    #[test]
    fn test_candidate_pairs() {
        let candidate = Candidate::Chain(Chain::new(PairId::new(10), ids(&[1])));
        assert_eq!(candidate.pairs(), ids(&[10, 1]));
        assert_eq!(candidate.transplants(), 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn canonical_form_is_rotation_invariant(
                raw in proptest::collection::btree_set(0u64..1000, 1..8),
                shift in 0usize..8,
            ) {
                let pairs: Vec<PairId> = raw.into_iter().map(PairId::new).collect();
                let mut rotated = pairs.clone();
                let k = shift % rotated.len();
                rotated.rotate_left(k);
                prop_assert_eq!(canonicalize_cycle(&pairs), canonicalize_cycle(&rotated));
                prop_assert_eq!(canonicalize_cycle(&rotated)[0], *pairs.iter().min().unwrap());
            }
        }
    }
}
