//! # Name Normalization Fork
//!
//! Above `normalized_name_fork_height` every name is stored and looked up
//! in normalized form (NFD, case-folded). Connecting the fork block runs
//! a one-time migration that moves every live claim and support from its
//! raw name to the normalized one, recording undo so the block can be
//! disconnected exactly.
//!
//! ## Key policy per block call
//!
//! | call                | inserts normalized | removes normalized |
//! |---------------------|--------------------|--------------------|
//! | connect block `h`   | `h >= fork`        | `h > fork`         |
//! | disconnect block `h`| `h > fork`         | `h >= fork`        |
//!
//! The policy is handed to the next stage as a [`NameKeys`] value that
//! lives for one call.

use crate::domain::{
    expiration_height, normalize_key, normalized_name, BlockUndo, ClaimId, ClaimTrieError,
    ClaimTrieProof, ClaimValue, ClaimsForName, ExpirationQueueRow, ForkParams, Height,
    InsertUndo, Name, NameNormalizer, NameOutPoint, OutPoint, QueueKind, SupportValue, TrieNode,
};
use crate::ports::{ClaimTrieCache, KeyValueStore, NameKeys};
use std::borrow::Cow;
use tracing::{debug, info};

/// Fork stage that maps names to their normalized form.
pub struct NormalizationForkCache<C, N> {
    inner: C,
    normalizer: N,
    params: ForkParams,
}

/// A trie node whose name changes under normalization, captured before
/// the migration touches anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizationCandidate {
    pub name: Name,
    pub normalized: Name,
    pub claims: Vec<ClaimValue>,
    pub supports: Vec<SupportValue>,
    pub last_takeover_height: Height,
}

/// Every node with at least one claim whose name normalizes to something
/// else, in trie order. Read-only.
pub fn scan_for_normalization<C, N>(
    cache: &C,
    normalizer: &N,
) -> Result<Vec<NormalizationCandidate>, ClaimTrieError>
where
    C: ClaimTrieCache + ?Sized,
    N: NameNormalizer + ?Sized,
{
    let mut candidates = Vec::new();
    let mut failure = None;
    cache.iterate_trie(&mut |name, node| {
        if failure.is_some() || node.is_empty() {
            return;
        }
        match normalized_name(normalizer, name) {
            Ok(Some(normalized)) => candidates.push(NormalizationCandidate {
                name: name.to_vec(),
                normalized,
                claims: node.claims.clone(),
                supports: cache.get_supports_for_name(name),
                last_takeover_height: node.last_takeover_height,
            }),
            Ok(None) => {}
            Err(e) => failure = Some(e),
        }
    });
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(candidates),
    }
}

impl<C: ClaimTrieCache, N: NameNormalizer> NormalizationForkCache<C, N> {
    pub fn new(inner: C, normalizer: N, params: ForkParams) -> Self {
        Self {
            inner,
            normalizer,
            params,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    pub fn normalizer(&self) -> &N {
        &self.normalizer
    }

    pub fn params(&self) -> &ForkParams {
        &self.params
    }

    /// True once the chain is past the fork block.
    pub fn should_normalize(&self) -> bool {
        self.inner.next_height() > self.params.normalized_name_fork_height
    }

    /// `name` as the trie stores it now, or normalized regardless of
    /// height when `force` is set. Malformed names come back unchanged.
    pub fn normalize_claim_name<'a>(
        &self,
        name: &'a [u8],
        force: bool,
    ) -> Result<Cow<'a, [u8]>, ClaimTrieError> {
        if !force && !self.should_normalize() {
            return Ok(Cow::Borrowed(name));
        }
        Ok(normalize_key(&self.normalizer, name)?)
    }

    /// Name an entry activating at `valid_height` will be stored under.
    pub fn adjust_name_for_valid_height<'a>(
        &self,
        name: &'a [u8],
        valid_height: Height,
    ) -> Result<Cow<'a, [u8]>, ClaimTrieError> {
        self.normalize_claim_name(name, valid_height > self.params.normalized_name_fork_height)
    }

    /// Run the one-time migration if the next block is the fork block.
    ///
    /// Returns whether it ran. Entries that are already due to expire stay
    /// under their raw name.
    ///
    /// # Panics
    ///
    /// If a captured entry cannot be moved. The scan and the move read the
    /// same trie, so this means the next stage lost or duplicated data.
    pub fn normalize_all_names_in_trie_if_necessary(
        &mut self,
        undo: &mut BlockUndo,
    ) -> Result<bool, ClaimTrieError> {
        let height = self.inner.next_height();
        if height != self.params.normalized_name_fork_height {
            return Ok(false);
        }

        let candidates = scan_for_normalization(&self.inner, &self.normalizer)?;
        let expiration_time = self.inner.expiration_time();
        let mut moved_claims = 0usize;
        let mut moved_supports = 0usize;

        for candidate in &candidates {
            for support in &candidate.supports {
                if expiration_height(support.height, expiration_time) <= height {
                    continue;
                }
                let removed =
                    self.inner
                        .remove_support_from_map(&candidate.name, &support.outpoint, false)?;
                assert!(
                    removed.is_some(),
                    "support {} vanished from {:?} during migration",
                    support.outpoint,
                    String::from_utf8_lossy(&candidate.name)
                );
                undo.support_expirations
                    .push((candidate.name.clone(), support.clone()));
                let inserted =
                    self.inner
                        .insert_support_into_map(&candidate.normalized, support.clone(), false)?;
                assert!(
                    inserted,
                    "support {} already under {:?}",
                    support.outpoint,
                    String::from_utf8_lossy(&candidate.normalized)
                );
                undo.support_inserts
                    .push(InsertUndo::renamed(candidate.name.clone(), support.outpoint));
                moved_supports += 1;
            }

            for claim in &candidate.claims {
                if expiration_height(claim.height, expiration_time) <= height {
                    continue;
                }
                let removed =
                    self.inner
                        .remove_claim_from_trie(&candidate.name, &claim.outpoint, false)?;
                assert!(
                    removed.is_some(),
                    "claim {} vanished from {:?} during migration",
                    claim.outpoint,
                    String::from_utf8_lossy(&candidate.name)
                );
                undo.claim_expirations
                    .push((candidate.name.clone(), claim.clone()));
                let inserted =
                    self.inner
                        .insert_claim_into_trie(&candidate.normalized, claim.clone(), true)?;
                assert!(
                    inserted,
                    "claim {} already under {:?}",
                    claim.outpoint,
                    String::from_utf8_lossy(&candidate.normalized)
                );
                undo.claim_inserts
                    .push(InsertUndo::renamed(candidate.name.clone(), claim.outpoint));
                moved_claims += 1;
            }

            undo.takeover_heights
                .push((candidate.name.clone(), candidate.last_takeover_height));
            debug!(
                from = %String::from_utf8_lossy(&candidate.name),
                to = %String::from_utf8_lossy(&candidate.normalized),
                "Normalized name"
            );
        }

        info!(
            height,
            names = candidates.len(),
            claims = moved_claims,
            supports = moved_supports,
            "Migrated claim trie to normalized names"
        );
        Ok(true)
    }
}

/// Key policy for one block call: the caller's policy, then normalization
/// where the flag says so.
struct ForkKeys<'a, N: ?Sized> {
    outer: &'a dyn NameKeys,
    normalizer: &'a N,
    normalize_inserts: bool,
    normalize_removes: bool,
}

impl<N: NameNormalizer + ?Sized> ForkKeys<'_, N> {
    fn apply<'k>(&self, key: Cow<'k, [u8]>, normalize: bool) -> Result<Cow<'k, [u8]>, ClaimTrieError> {
        if !normalize {
            return Ok(key);
        }
        Ok(match normalized_name(self.normalizer, &key)? {
            Some(normalized) => Cow::Owned(normalized),
            None => key,
        })
    }
}

impl<N: NameNormalizer + ?Sized> NameKeys for ForkKeys<'_, N> {
    fn insert_key<'k>(&self, name: &'k [u8]) -> Result<Cow<'k, [u8]>, ClaimTrieError> {
        let key = self.outer.insert_key(name)?;
        self.apply(key, self.normalize_inserts)
    }

    fn remove_key<'k>(&self, name: &'k [u8]) -> Result<Cow<'k, [u8]>, ClaimTrieError> {
        let key = self.outer.remove_key(name)?;
        self.apply(key, self.normalize_removes)
    }
}

impl<C: ClaimTrieCache, N: NameNormalizer> ClaimTrieCache for NormalizationForkCache<C, N> {
    fn next_height(&self) -> Height {
        self.inner.next_height()
    }

    fn expiration_time(&self) -> Height {
        self.inner.expiration_time()
    }

    fn set_expiration_time(&mut self, expiration_time: Height) {
        self.inner.set_expiration_time(expiration_time);
    }

    fn insert_claim_into_trie(
        &mut self,
        name: &[u8],
        claim: ClaimValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.insert_claim_into_trie(&key, claim, check_takeover)
    }

    fn remove_claim_from_trie(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<ClaimValue>, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.remove_claim_from_trie(&key, outpoint, check_takeover)
    }

    fn insert_support_into_map(
        &mut self,
        name: &[u8],
        support: SupportValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.insert_support_into_map(&key, support, check_takeover)
    }

    fn remove_support_from_map(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<SupportValue>, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.remove_support_from_map(&key, outpoint, check_takeover)
    }

    fn add_claim_to_queues(&mut self, name: &[u8], claim: ClaimValue) -> Result<(), ClaimTrieError> {
        let key = self.adjust_name_for_valid_height(name, claim.valid_at_height)?;
        self.inner.add_claim_to_queues(&key, claim)
    }

    fn add_support_to_queues(
        &mut self,
        name: &[u8],
        support: SupportValue,
    ) -> Result<(), ClaimTrieError> {
        let key = self.adjust_name_for_valid_height(name, support.valid_at_height)?;
        self.inner.add_support_to_queues(&key, support)
    }

    // Queue rows keep the name they were scheduled under.
    fn add_to_expiration_queue(
        &mut self,
        kind: QueueKind,
        height: Height,
        entry: NameOutPoint,
    ) -> Result<(), ClaimTrieError> {
        self.inner.add_to_expiration_queue(kind, height, entry)
    }

    fn remove_from_expiration_queue(
        &mut self,
        kind: QueueKind,
        name: &[u8],
        outpoint: &OutPoint,
        height: Height,
    ) -> Result<bool, ClaimTrieError> {
        self.inner
            .remove_from_expiration_queue(kind, name, outpoint, height)
    }

    fn dirty_expiration_rows(&self, kind: QueueKind) -> Vec<(Height, ExpirationQueueRow)> {
        self.inner.dirty_expiration_rows(kind)
    }

    fn persistent_store(&self) -> &dyn KeyValueStore {
        self.inner.persistent_store()
    }

    fn get_proof_for_name(&self, name: &[u8]) -> Result<ClaimTrieProof, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.get_proof_for_name(&key)
    }

    fn get_info_for_name(&self, name: &[u8]) -> Result<Option<ClaimValue>, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.get_info_for_name(&key)
    }

    fn get_claims_for_name(&self, name: &[u8]) -> Result<ClaimsForName, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.get_claims_for_name(&key)
    }

    fn get_delay_for_name(&self, name: &[u8], claim_id: &ClaimId) -> Result<Height, ClaimTrieError> {
        let key = self.normalize_claim_name(name, false)?;
        self.inner.get_delay_for_name(&key, claim_id)
    }

    /// Exact stored key, not normalized; the migration scan depends on it.
    fn get_supports_for_name(&self, name: &[u8]) -> Vec<SupportValue> {
        self.inner.get_supports_for_name(name)
    }

    fn iterate_trie(&self, visitor: &mut dyn FnMut(&[u8], &TrieNode)) {
        self.inner.iterate_trie(visitor)
    }

    fn increment_block(
        &mut self,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let fork_height = self.params.normalized_name_fork_height;
        let height = self.inner.next_height();
        let migrated = self.normalize_all_names_in_trie_if_necessary(undo)?;
        let fork_keys = ForkKeys {
            outer: keys,
            normalizer: &self.normalizer,
            normalize_inserts: migrated || height > fork_height,
            normalize_removes: height > fork_height,
        };
        self.inner.increment_block(undo, &fork_keys)
    }

    fn decrement_block(
        &mut self,
        undo: &BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let fork_height = self.params.normalized_name_fork_height;
        let height = self
            .inner
            .next_height()
            .checked_sub(1)
            .ok_or(ClaimTrieError::NothingToDecrement)?;
        let fork_keys = ForkKeys {
            outer: keys,
            normalizer: &self.normalizer,
            normalize_inserts: height > fork_height,
            normalize_removes: height >= fork_height,
        };
        self.inner.decrement_block(undo, &fork_keys)
    }
}
