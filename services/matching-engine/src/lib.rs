//! Matching Engine Service
//!
//! Kidney exchange matching over a dynamic compatibility graph.
//!
//! **Components:**
//! - `graph`: market state, donor → recipient edges with pluggable weights
//! - `enumerate`: bounded cycle and altruist-chain enumeration
//! - `assignment`: Hungarian maximum-weight assignment
//! - `formulation` / `solver`: position-indexed packing model and a
//!   reference branch-and-bound solver
//! - `strategy`: the `MatchingStrategy` capability and its two variants
//!
//! **Key Invariants:**
//! - Edges only run donor → recipient, never between partners
//! - Cycles are stored in canonical (minimum-first) rotation
//! - No participant appears in two selected cycles or chains
//! - Deterministic output for a fixed seed (ordered maps throughout)

pub mod assignment;
pub mod enumerate;
pub mod formulation;
pub mod graph;
pub mod solver;
pub mod strategy;
pub mod weights;

pub use enumerate::{enumerate, CandidateSet, CycleChainEnumerator};
pub use graph::{Adjacency, CompatibilityGraph};
pub use strategy::{AssignmentStrategy, MatchingStrategy, PackingStrategy};
pub use weights::{ConstantWeight, KpdWeight, RecipientWeight, WeightPolicy};
