//! Compatibility graph (market state)
//!
//! Nodes are the donor and recipient halves of every pair in the market.
//! Directed edges only ever run from a donor node to a recipient node of a
//! different pair, so the graph is bipartite by construction. Edges are
//! keyed by pair id on both ends: an edge `a → b` means the donor of `a`
//! can give to the recipient of `b`.
//!
//! All maps are `BTreeMap`/`BTreeSet` so iteration order, and therefore
//! the order in which random compatibility draws are consumed, is fixed.

use std::collections::{BTreeMap, BTreeSet};

use kpd_types::errors::{GraphError, InvariantViolation};
use kpd_types::ids::{PairId, ParticipantKey};
use kpd_types::participant::{Pair, Participant, Role};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::weights::WeightPolicy;

/// Read-only pair-level view of the edges, as consumed by the enumerator.
///
/// Every pair whose donor is in the market has an entry, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    successors: BTreeMap<PairId, Vec<PairId>>,
}

impl Adjacency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a donor pair → recipient pair edge (used to build views in tests
    /// and by callers that do not own a graph).
    pub fn add_edge(&mut self, from: PairId, to: PairId) {
        self.successors.entry(to).or_default();
        let list = self.successors.entry(from).or_default();
        if let Err(pos) = list.binary_search(&to) {
            list.insert(pos, to);
        }
    }

    pub fn add_node(&mut self, id: PairId) {
        self.successors.entry(id).or_default();
    }

    pub fn successors(&self, id: PairId) -> &[PairId] {
        self.successors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes(&self) -> impl Iterator<Item = PairId> + '_ {
        self.successors.keys().copied()
    }

    pub fn contains(&self, id: PairId) -> bool {
        self.successors.contains_key(&id)
    }

    pub fn has_edge(&self, from: PairId, to: PairId) -> bool {
        self.successors(from).binary_search(&to).is_ok()
    }

    pub fn node_count(&self) -> usize {
        self.successors.len()
    }
}

/// The market: participants plus weighted donor → recipient edges.
#[derive(Debug)]
pub struct CompatibilityGraph {
    nodes: BTreeMap<ParticipantKey, Participant>,
    /// Donor pair → (recipient pair → weight)
    edges: BTreeMap<PairId, BTreeMap<PairId, Decimal>>,
    /// Recipient pair → donor pairs pointing at it
    incoming: BTreeMap<PairId, BTreeSet<PairId>>,
    altruists: BTreeSet<PairId>,
    policy: Box<dyn WeightPolicy>,
}

impl CompatibilityGraph {
    pub fn new(policy: Box<dyn WeightPolicy>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            incoming: BTreeMap::new(),
            altruists: BTreeSet::new(),
            policy,
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Admit an incompatible patient/donor pair.
    ///
    /// The new donor is linked against every recipient already in the market,
    /// then the new recipient against every donor already in the market.
    pub fn add_pair<R: Rng + ?Sized>(&mut self, pair: Pair, rng: &mut R) -> Result<usize, GraphError> {
        if pair.is_altruist() {
            return Err(GraphError::InvalidPair {
                pair: pair.id().value(),
                reason: "altruist pairs must be admitted with add_altruist".to_string(),
            });
        }
        self.insert(pair, rng)
    }

    /// Admit an altruist donor together with its placeholder recipient.
    ///
    /// The placeholder never receives edges, so the altruist only contributes
    /// outgoing edges.
    pub fn add_altruist<R: Rng + ?Sized>(&mut self, pair: Pair, rng: &mut R) -> Result<usize, GraphError> {
        if !pair.is_altruist() {
            return Err(GraphError::InvalidPair {
                pair: pair.id().value(),
                reason: "add_altruist requires a placeholder recipient".to_string(),
            });
        }
        self.insert(pair, rng)
    }

    fn insert<R: Rng + ?Sized>(&mut self, pair: Pair, rng: &mut R) -> Result<usize, GraphError> {
        pair.validate()?;
        let id = pair.id();
        if self.nodes.contains_key(&pair.donor.key) || self.nodes.contains_key(&pair.recipient.key) {
            return Err(GraphError::DuplicatePair { pair: id.value() });
        }

        // Outgoing edges of the new donor
        let mut linked = 0;
        let targets: Vec<PairId> = self
            .nodes
            .values()
            .filter(|node| node.is_recipient())
            .map(Participant::id)
            .collect();
        for target in targets {
            if let Some(recipient) = self.nodes.get(&ParticipantKey::recipient(target)) {
                if Self::compatible(&pair.donor, recipient, rng) {
                    let weight = self.policy.weight(&pair.donor, recipient);
                    self.link(id, target, weight);
                    linked += 1;
                }
            }
        }

        // Incoming edges of the new recipient
        if pair.recipient.is_recipient() {
            let sources: Vec<PairId> = self
                .nodes
                .values()
                .filter(|node| node.is_donor())
                .map(Participant::id)
                .collect();
            for source in sources {
                if let Some(donor) = self.nodes.get(&ParticipantKey::donor(source)) {
                    if Self::compatible(donor, &pair.recipient, rng) {
                        let weight = self.policy.weight(donor, &pair.recipient);
                        self.link(source, id, weight);
                        linked += 1;
                    }
                }
            }
        }

        if pair.is_altruist() {
            self.altruists.insert(id);
        }
        self.edges.entry(id).or_default();
        self.nodes.insert(pair.donor.key, pair.donor);
        self.nodes.insert(pair.recipient.key, pair.recipient);

        trace!(pair = %id, edges = linked, "pair admitted");
        Ok(linked)
    }

    /// Blood-type rule plus a crossmatch draw that passes with probability
    /// `1 - cpra`. Partners are never compared.
    fn compatible<R: Rng + ?Sized>(donor: &Participant, recipient: &Participant, rng: &mut R) -> bool {
        if donor.id() == recipient.id() || !recipient.is_recipient() {
            return false;
        }
        donor.blood_type.can_donate_to(recipient.blood_type)
            && rng.gen_bool(recipient.crossmatch_pass_probability())
    }

    fn link(&mut self, donor: PairId, recipient: PairId, weight: Decimal) {
        self.edges.entry(donor).or_default().insert(recipient, weight);
        self.incoming.entry(recipient).or_default().insert(donor);
    }

    /// Remove one node and every edge touching it.
    ///
    /// Returns `false` if the participant was already absent; that is not an
    /// error.
    pub fn remove_participant(&mut self, key: ParticipantKey) -> bool {
        let Some(node) = self.nodes.remove(&key) else {
            return false;
        };
        let id = node.id();

        if node.is_donor() {
            if let Some(targets) = self.edges.remove(&id) {
                for target in targets.keys() {
                    if let Some(sources) = self.incoming.get_mut(target) {
                        sources.remove(&id);
                    }
                }
            }
            self.altruists.remove(&id);
        } else if let Some(sources) = self.incoming.remove(&id) {
            for source in sources {
                if let Some(targets) = self.edges.get_mut(&source) {
                    targets.remove(&id);
                }
            }
        }
        true
    }

    /// Remove both halves of a pair. Returns the removed pair, if present.
    pub fn remove_pair(&mut self, id: PairId) -> Option<Pair> {
        let recipient = self.nodes.get(&ParticipantKey::recipient(id)).cloned();
        let donor = self.nodes.get(&ParticipantKey::donor(id)).cloned();
        self.remove_participant(ParticipantKey::recipient(id));
        self.remove_participant(ParticipantKey::donor(id));
        match (recipient, donor) {
            (Some(recipient), Some(donor)) => Some(Pair { recipient, donor }),
            _ => None,
        }
    }

    /// Age every participant by `delta` periods.
    pub fn advance_time(&mut self, delta: u32) {
        for node in self.nodes.values_mut() {
            node.time_in_market = node.time_in_market.saturating_add(delta);
        }
    }

    /// Remove every participant whose time in market has reached its expiry.
    ///
    /// Returns the removed pairs in id order.
    pub fn remove_perished(&mut self) -> Vec<Pair> {
        let expired: BTreeSet<PairId> = self
            .nodes
            .values()
            .filter(|node| node.is_perished())
            .map(Participant::id)
            .collect();

        let removed: Vec<Pair> = expired.into_iter().filter_map(|id| self.remove_pair(id)).collect();
        if !removed.is_empty() {
            debug!(count = removed.len(), "removed perished pairs");
        }
        removed
    }

    /// Swap the weight policy. Stored weights are untouched until
    /// `recompute_weights` is called.
    pub fn set_weight_policy(&mut self, policy: Box<dyn WeightPolicy>) {
        self.policy = policy;
    }

    /// Re-derive every stored edge weight from the current policy.
    pub fn recompute_weights(&mut self) {
        let nodes = &self.nodes;
        let policy = &self.policy;
        for (donor_id, targets) in self.edges.iter_mut() {
            let Some(donor) = nodes.get(&ParticipantKey::donor(*donor_id)) else {
                continue;
            };
            for (recipient_id, weight) in targets.iter_mut() {
                if let Some(recipient) = nodes.get(&ParticipantKey::recipient(*recipient_id)) {
                    *weight = policy.weight(donor, recipient);
                }
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn participant(&self, key: ParticipantKey) -> Option<&Participant> {
        self.nodes.get(&key)
    }

    /// Both halves of a pair, if both are present.
    pub fn pair(&self, id: PairId) -> Option<Pair> {
        let recipient = self.nodes.get(&ParticipantKey::recipient(id))?;
        let donor = self.nodes.get(&ParticipantKey::donor(id))?;
        Some(Pair {
            recipient: recipient.clone(),
            donor: donor.clone(),
        })
    }

    pub fn contains_pair(&self, id: PairId) -> bool {
        self.nodes.contains_key(&ParticipantKey::donor(id)) || self.nodes.contains_key(&ParticipantKey::recipient(id))
    }

    pub fn pair_ids(&self) -> BTreeSet<PairId> {
        self.nodes.keys().map(|key| key.pair).collect()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.nodes.values()
    }

    pub fn participant_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pair_ids().len()
    }

    pub fn altruists(&self) -> &BTreeSet<PairId> {
        &self.altruists
    }

    pub fn is_altruist(&self, id: PairId) -> bool {
        self.altruists.contains(&id)
    }

    pub fn edge_weight(&self, donor: PairId, recipient: PairId) -> Option<Decimal> {
        self.edges.get(&donor).and_then(|targets| targets.get(&recipient)).copied()
    }

    pub fn out_degree(&self, donor: PairId) -> usize {
        self.edges.get(&donor).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn edges(&self) -> impl Iterator<Item = (PairId, PairId, Decimal)> + '_ {
        self.edges
            .iter()
            .flat_map(|(donor, targets)| targets.iter().map(move |(recipient, w)| (*donor, *recipient, *w)))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pair-level adjacency snapshot for the enumerator.
    pub fn adjacency(&self) -> Adjacency {
        let mut adjacency = Adjacency::new();
        for node in self.nodes.values().filter(|node| node.is_donor()) {
            adjacency.add_node(node.id());
        }
        for (donor, targets) in &self.edges {
            for recipient in targets.keys() {
                adjacency.add_edge(*donor, *recipient);
            }
        }
        adjacency
    }

    // ========================================================================
    // Invariant audit
    // ========================================================================

    /// Check structural invariants: keys match node identities, partners are
    /// mutual, edges run donor → real recipient of another pair, the incoming
    /// index mirrors the edge map, and the altruist set matches the nodes.
    ///
    /// A lone donor (partner absent) is allowed; a lone recipient is not.
    pub fn verify_invariants(&self) -> Result<(), InvariantViolation> {
        for (key, node) in &self.nodes {
            if node.key != *key {
                return Err(InvariantViolation::new(format!("node stored under {key} claims {}", node.key)));
            }
            let role_ok = match node.role {
                Role::Donor => key.is_donor(),
                Role::Recipient | Role::AltruistPlaceholder => !key.is_donor(),
            };
            if !role_ok {
                return Err(InvariantViolation::new(format!("{key} has role {:?}", node.role)));
            }
            if node.partner_key().partner() != node.key {
                return Err(InvariantViolation::new(format!("partner of {key} is not mutual")));
            }
            if !key.is_donor() && !self.nodes.contains_key(&node.partner_key()) {
                return Err(InvariantViolation::new(format!("recipient {key} has no partner donor")));
            }
        }

        for (donor, targets) in &self.edges {
            if !targets.is_empty() && !self.nodes.contains_key(&ParticipantKey::donor(*donor)) {
                return Err(InvariantViolation::new(format!("edge source {donor} is not a donor in the market")));
            }
            for recipient in targets.keys() {
                if recipient == donor {
                    return Err(InvariantViolation::new(format!("edge between partners of {donor}")));
                }
                match self.nodes.get(&ParticipantKey::recipient(*recipient)) {
                    Some(node) if node.is_recipient() => {}
                    Some(_) => {
                        return Err(InvariantViolation::new(format!("placeholder {recipient} has an incoming edge")))
                    }
                    None => {
                        return Err(InvariantViolation::new(format!(
                            "edge {donor} -> {recipient} targets a missing recipient"
                        )))
                    }
                }
                let mirrored = self.incoming.get(recipient).is_some_and(|s| s.contains(donor));
                if !mirrored {
                    return Err(InvariantViolation::new(format!("edge {donor} -> {recipient} missing from index")));
                }
            }
        }

        let indexed: usize = self.incoming.values().map(BTreeSet::len).sum();
        if indexed != self.edge_count() {
            return Err(InvariantViolation::new("incoming index out of sync with edge map"));
        }

        for id in &self.altruists {
            match self.nodes.get(&ParticipantKey::donor(*id)) {
                Some(node) if node.altruist => {}
                _ => return Err(InvariantViolation::new(format!("altruist {id} is not an altruist donor"))),
            }
        }

        Ok(())
    }
}
