//! Types library for the kidney paired donation exchange simulator
//!
//! Core value types shared by the matching engine and the simulation
//! tool. Everything here is plain data with serde support; behaviour
//! beyond the compatibility rule lives in the engine.
//!
//! # Modules
//! - `ids`: Pair and participant identifiers
//! - `participant`: Participants, pairs, blood types, CPRA buckets
//! - `candidate`: Candidate cycles and chains, canonical cycle form
//! - `match_result`: Matching outcome and cycle/chain tallies
//! - `errors`: Error taxonomy

pub mod candidate;
pub mod errors;
pub mod ids;
pub mod match_result;
pub mod participant;
