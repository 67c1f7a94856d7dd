//! # Domain Entities for the Claim Trie
//!
//! Names, claims, supports and the trie node that owns them.
//!
//! ## Type Decisions
//!
//! - `Height = u32` - block heights never exceed 2^32 and expiration
//!   arithmetic is checked where a fork can move it backwards.
//! - Names are raw byte strings. Before the normalization fork any byte
//!   sequence is a valid key; afterwards keys are NFD, case-folded UTF-8.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;

pub type Hash = [u8; 32];
pub type Height = u32;
pub type Name = Vec<u8>;

/// Reference to a transaction output carrying a claim or support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.index)
    }
}

/// 20-byte claim identifier, stable across claim updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub [u8; 20]);

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A claim on a name.
///
/// ## Fields
///
/// - `height`: block height at which the claim was created
/// - `valid_at_height`: height at which it enters the trie (may be delayed
///   past `height` when it challenges an existing owner)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimValue {
    pub outpoint: OutPoint,
    pub claim_id: ClaimId,
    pub amount: u64,
    pub height: Height,
    pub valid_at_height: Height,
}

impl ClaimValue {
    pub fn new(outpoint: OutPoint, claim_id: ClaimId, amount: u64, height: Height) -> Self {
        Self {
            outpoint,
            claim_id,
            amount,
            height,
            valid_at_height: height,
        }
    }

    /// Builder method to delay activation.
    pub fn with_valid_at_height(mut self, valid_at_height: Height) -> Self {
        self.valid_at_height = valid_at_height;
        self
    }
}

/// A stake backing a claim, stored beside (not inside) the trie node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportValue {
    pub outpoint: OutPoint,
    pub supported_claim_id: ClaimId,
    pub amount: u64,
    pub height: Height,
    pub valid_at_height: Height,
}

impl SupportValue {
    pub fn new(outpoint: OutPoint, supported_claim_id: ClaimId, amount: u64, height: Height) -> Self {
        Self {
            outpoint,
            supported_claim_id,
            amount,
            height,
            valid_at_height: height,
        }
    }

    pub fn with_valid_at_height(mut self, valid_at_height: Height) -> Self {
        self.valid_at_height = valid_at_height;
        self
    }
}

/// Trie node addressed by name.
///
/// Claims are kept ordered by `(height, outpoint)` so that removing and
/// re-inserting the same claim reproduces the node exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNode {
    pub claims: Vec<ClaimValue>,
    /// Height at which the current winning claim was last decided.
    pub last_takeover_height: Height,
}

impl TrieNode {
    pub fn new(last_takeover_height: Height) -> Self {
        Self {
            claims: Vec::new(),
            last_takeover_height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Insert a claim in canonical order. Returns false if the out point
    /// is already present.
    pub fn insert_claim(&mut self, claim: ClaimValue) -> bool {
        if self.claims.iter().any(|c| c.outpoint == claim.outpoint) {
            return false;
        }
        let position = self
            .claims
            .partition_point(|c| (c.height, c.outpoint) < (claim.height, claim.outpoint));
        self.claims.insert(position, claim);
        true
    }

    pub fn remove_claim(&mut self, outpoint: &OutPoint) -> Option<ClaimValue> {
        let position = self.claims.iter().position(|c| c.outpoint == *outpoint)?;
        Some(self.claims.remove(position))
    }

    /// Winning claim given the supports stored under the same name.
    ///
    /// Ranking: highest effective amount (own amount plus supports for the
    /// claim id), then earliest height, then lowest out point.
    pub fn best_claim<'a>(&'a self, supports: &[SupportValue]) -> Option<&'a ClaimValue> {
        self.claims
            .iter()
            .min_by_key(|c| (Reverse(effective_amount(c, supports)), c.height, c.outpoint))
    }
}

/// Claim amount plus every support stored for its claim id.
pub fn effective_amount(claim: &ClaimValue, supports: &[SupportValue]) -> u64 {
    supports
        .iter()
        .filter(|s| s.supported_claim_id == claim.claim_id)
        .fold(claim.amount, |total, s| total.saturating_add(s.amount))
}

/// `(name, outpoint)` pair scheduled in an expiration queue.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameOutPoint {
    pub name: Name,
    pub outpoint: OutPoint,
}

impl NameOutPoint {
    pub fn new(name: impl Into<Name>, outpoint: OutPoint) -> Self {
        Self {
            name: name.into(),
            outpoint,
        }
    }
}

impl fmt::Display for NameOutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", String::from_utf8_lossy(&self.name), self.outpoint)
    }
}

/// Entries expiring at one height.
pub type ExpirationQueueRow = Vec<NameOutPoint>;

/// Everything stored under one name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsForName {
    pub name: Name,
    pub claims: Vec<ClaimValue>,
    pub supports: Vec<SupportValue>,
    pub last_takeover_height: Height,
}

/// Inclusion proof for the winning claim of a name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTrieProof {
    pub name: Name,
    /// Winning claim, if the name has any.
    pub best: Option<OutPoint>,
    pub last_takeover_height: Height,
    /// Keccak-256 of the node; `None` when the name is absent.
    pub node_hash: Option<Hash>,
    pub root_hash: Hash,
}

/// Expiration height for an entry created at `height`.
pub fn expiration_height(height: Height, expiration_time: Height) -> Height {
    height.saturating_add(expiration_time)
}
