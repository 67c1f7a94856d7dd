//! # qc-18-claim-trie
//!
//! Fork transitions for the name claim trie.
//!
//! ## Role in System
//!
//! - **Expiration fork**: lengthens claim and support lifetimes at a
//!   fixed height and re-homes every pending expiration
//! - **Normalization fork**: stores names NFD-normalized and case-folded
//!   from a fixed height, migrating existing names once
//! - **Exact undo**: every connected block can be disconnected back to
//!   the identical trie and expiration queues
//!
//! ## Pipeline
//!
//! ```text
//! NormalizationForkCache → ExpirationForkCache → MemoryClaimTrieCache → KeyValueStore
//! ```
//!
//! Each stage implements [`ClaimTrieCache`] and owns the next one.

pub mod adapters;
pub mod domain;
pub mod forks;
pub mod ports;

pub use adapters::*;
pub use domain::*;
pub use forks::{
    collect_expiration_rows, scan_for_normalization, ExpirationForkCache, NormalizationCandidate,
    NormalizationForkCache,
};
pub use ports::*;

#[cfg(test)]
mod test_utils;
