//! # Block Undo Records
//!
//! Everything `increment_block` changed, in the order it changed it.
//! `decrement_block` replays the lists backwards to reproduce the
//! pre-block trie and expiration queues exactly.

use super::{ClaimValue, Height, Name, OutPoint, SupportValue};
use serde::{Deserialize, Serialize};

/// An entry that entered the trie during the block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertUndo {
    pub name: Name,
    pub outpoint: OutPoint,
    /// Activation height to re-queue the entry at on disconnect.
    /// `None` when the entry was not taken from the activation queue
    /// (a rename during the normalization migration).
    pub valid_height: Option<Height>,
}

impl InsertUndo {
    pub fn activated(name: Name, outpoint: OutPoint, valid_height: Height) -> Self {
        Self {
            name,
            outpoint,
            valid_height: Some(valid_height),
        }
    }

    pub fn renamed(name: Name, outpoint: OutPoint) -> Self {
        Self {
            name,
            outpoint,
            valid_height: None,
        }
    }
}

/// Undo lists for one connected block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub claim_inserts: Vec<InsertUndo>,
    pub claim_expirations: Vec<(Name, ClaimValue)>,
    pub support_inserts: Vec<InsertUndo>,
    pub support_expirations: Vec<(Name, SupportValue)>,
    /// `(name, takeover height before the block)`.
    pub takeover_heights: Vec<(Name, Height)>,
}

impl BlockUndo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.claim_inserts.is_empty()
            && self.claim_expirations.is_empty()
            && self.support_inserts.is_empty()
            && self.support_expirations.is_empty()
            && self.takeover_heights.is_empty()
    }
}
