//! Running market composition
//!
//! Counts of real pairs currently in the market by CPRA bucket ×
//! recipient blood type × donor blood type. Altruist pairs are not
//! counted.

use kpd_types::participant::{cpra_bucket, Pair, CPRA_BUCKETS};
use serde::{Deserialize, Serialize};

const BLOOD_TYPES: usize = 4;

/// Share of the market per `[cpra bucket][recipient type][donor type]`.
pub type ShareTable = [[[f64; BLOOD_TYPES]; BLOOD_TYPES]; CPRA_BUCKETS];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub counts: [[[u64; BLOOD_TYPES]; BLOOD_TYPES]; CPRA_BUCKETS],
    total: u64,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(pair: &Pair) -> Option<(usize, usize, usize)> {
        if pair.is_altruist() {
            return None;
        }
        let r = pair.recipient.blood_type.index()?;
        let d = pair.donor.blood_type.index()?;
        Some((cpra_bucket(pair.recipient.cpra), r, d))
    }

    pub fn add(&mut self, pair: &Pair) {
        if let Some((c, r, d)) = Self::cell(pair) {
            self.counts[c][r][d] += 1;
            self.total += 1;
        }
    }

    /// Saturates at zero; removing a pair that was never counted is a no-op.
    pub fn remove(&mut self, pair: &Pair) {
        if let Some((c, r, d)) = Self::cell(pair) {
            if self.counts[c][r][d] > 0 {
                self.counts[c][r][d] -= 1;
                self.total -= 1;
            }
        }
    }

    /// Number of real pairs counted.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Pairs per CPRA bucket, summed over blood types.
    pub fn by_cpra(&self) -> [u64; CPRA_BUCKETS] {
        let mut out = [0; CPRA_BUCKETS];
        for (bucket, table) in self.counts.iter().enumerate() {
            out[bucket] = table.iter().flatten().sum();
        }
        out
    }

    /// Each cell divided by the total; all zero for an empty market.
    pub fn shares(&self) -> ShareTable {
        let mut shares = [[[0.0; BLOOD_TYPES]; BLOOD_TYPES]; CPRA_BUCKETS];
        if self.total == 0 {
            return shares;
        }
        let total = self.total as f64;
        for (c, table) in self.counts.iter().enumerate() {
            for (r, row) in table.iter().enumerate() {
                for (d, count) in row.iter().enumerate() {
                    shares[c][r][d] = *count as f64 / total;
                }
            }
        }
        shares
    }
}
