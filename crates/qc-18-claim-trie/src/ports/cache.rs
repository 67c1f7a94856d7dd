//! # Claim Trie Cache Port
//!
//! The operation set shared by the base cache and every fork layer
//! stacked on top of it. Layers own the next stage and forward whatever
//! they do not transform.

use crate::domain::{
    BlockUndo, ClaimId, ClaimTrieError, ClaimTrieProof, ClaimValue, ClaimsForName,
    ExpirationQueueRow, Height, NameOutPoint, OutPoint, QueueKind, SupportValue, TrieNode,
};
use crate::ports::KeyValueStore;
use std::borrow::Cow;

/// Key policy for the names a block call inserts and removes.
///
/// Built fresh for each `increment_block` / `decrement_block` call and
/// dropped when it returns.
pub trait NameKeys {
    fn insert_key<'a>(&self, name: &'a [u8]) -> Result<Cow<'a, [u8]>, ClaimTrieError>;
    fn remove_key<'a>(&self, name: &'a [u8]) -> Result<Cow<'a, [u8]>, ClaimTrieError>;
}

/// Names are stored exactly as given.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawKeys;

impl NameKeys for RawKeys {
    fn insert_key<'a>(&self, name: &'a [u8]) -> Result<Cow<'a, [u8]>, ClaimTrieError> {
        Ok(Cow::Borrowed(name))
    }

    fn remove_key<'a>(&self, name: &'a [u8]) -> Result<Cow<'a, [u8]>, ClaimTrieError> {
        Ok(Cow::Borrowed(name))
    }
}

pub trait ClaimTrieCache {
    // === Chain position ===

    /// Height of the next block to connect.
    fn next_height(&self) -> Height;

    /// Lifetime given to entries scheduled now.
    fn expiration_time(&self) -> Height;

    fn set_expiration_time(&mut self, expiration_time: Height);

    // === Trie mutation ===

    /// Returns false if the out point is already under `name`.
    fn insert_claim_into_trie(
        &mut self,
        name: &[u8],
        claim: ClaimValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError>;

    fn remove_claim_from_trie(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<ClaimValue>, ClaimTrieError>;

    fn insert_support_into_map(
        &mut self,
        name: &[u8],
        support: SupportValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError>;

    fn remove_support_from_map(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<SupportValue>, ClaimTrieError>;

    // === Activation queues ===

    /// Schedule a claim to enter the trie at its `valid_at_height`.
    fn add_claim_to_queues(&mut self, name: &[u8], claim: ClaimValue) -> Result<(), ClaimTrieError>;

    fn add_support_to_queues(
        &mut self,
        name: &[u8],
        support: SupportValue,
    ) -> Result<(), ClaimTrieError>;

    // === Expiration queues ===

    fn add_to_expiration_queue(
        &mut self,
        kind: QueueKind,
        height: Height,
        entry: NameOutPoint,
    ) -> Result<(), ClaimTrieError>;

    /// Returns false if the entry was not scheduled at `height`.
    fn remove_from_expiration_queue(
        &mut self,
        kind: QueueKind,
        name: &[u8],
        outpoint: &OutPoint,
        height: Height,
    ) -> Result<bool, ClaimTrieError>;

    /// Uncommitted rows, in height order. These shadow persisted rows.
    fn dirty_expiration_rows(&self, kind: QueueKind) -> Vec<(Height, ExpirationQueueRow)>;

    /// Store holding committed rows.
    fn persistent_store(&self) -> &dyn KeyValueStore;

    // === Queries ===

    fn get_proof_for_name(&self, name: &[u8]) -> Result<ClaimTrieProof, ClaimTrieError>;

    /// Winning claim for `name`.
    fn get_info_for_name(&self, name: &[u8]) -> Result<Option<ClaimValue>, ClaimTrieError>;

    fn get_claims_for_name(&self, name: &[u8]) -> Result<ClaimsForName, ClaimTrieError>;

    /// Activation delay a new claim `claim_id` on `name` would get now.
    fn get_delay_for_name(&self, name: &[u8], claim_id: &ClaimId) -> Result<Height, ClaimTrieError>;

    /// Supports stored under exactly `name`.
    fn get_supports_for_name(&self, name: &[u8]) -> Vec<SupportValue>;

    /// Visit every node with its key, in key order.
    fn iterate_trie(&self, visitor: &mut dyn FnMut(&[u8], &TrieNode));

    // === Blocks ===

    /// Connect block `next_height()`, appending to `undo`.
    fn increment_block(
        &mut self,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError>;

    /// Disconnect block `next_height() - 1` using the lists its connect
    /// produced.
    fn decrement_block(&mut self, undo: &BlockUndo, keys: &dyn NameKeys)
        -> Result<(), ClaimTrieError>;
}
