//! # Expiration Extension Fork
//!
//! At `extended_expiration_fork_height` the claim lifetime grows from
//! `original_expiration_time` to `extended_expiration_time`. Every entry
//! still waiting in either expiration queue moves forward by the
//! difference when the fork block connects, and back when it disconnects.
//!
//! Rows are read from two tiers: the dirty overlay, then persisted rows
//! at heights the overlay does not shadow. All rows are gathered before
//! the first entry moves, so a row re-homed onto a height that is
//! visited later is never shifted twice.

use crate::domain::{
    decode_queue_key, decode_row, BlockUndo, ClaimId, ClaimTrieError, ClaimTrieProof, ClaimValue,
    ClaimsForName, ExpirationQueueRow, ForkParams, Height, NameOutPoint, OutPoint, QueueKind,
    SupportValue, TrieNode,
};
use crate::ports::{ClaimTrieCache, KeyValueStore, NameKeys};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Fork stage that re-homes pending expirations.
pub struct ExpirationForkCache<C> {
    inner: C,
    params: ForkParams,
}

impl<C: ClaimTrieCache> ExpirationForkCache<C> {
    pub fn new(mut inner: C, params: ForkParams) -> Self {
        inner.set_expiration_time(params.expiration_time(inner.next_height()));
        Self { inner, params }
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

    pub fn params(&self) -> &ForkParams {
        &self.params
    }

    /// Move every pending expiration by the fork's extension, forward if
    /// `increment` and backward otherwise.
    ///
    /// Fails without moving anything if a persisted row cannot be decoded.
    pub fn fork_for_expiration_change(&mut self, increment: bool) -> Result<(), ClaimTrieError> {
        let delta = self.params.expiration_extension();
        let rows = collect_expiration_rows(&self.inner)?;

        let mut moved = 0usize;
        for (kind, height, row) in &rows {
            let new_height = if increment {
                height.saturating_add(delta)
            } else {
                height
                    .checked_sub(delta)
                    .ok_or(ClaimTrieError::HeightUnderflow {
                        height: *height,
                        delta,
                    })?
            };
            self.reschedule_row(*kind, row, *height, new_height)?;
            moved += row.len();
        }

        info!(
            increment,
            delta,
            rows = rows.len(),
            entries = moved,
            "Rescheduled expiration queues for expiration fork"
        );
        Ok(())
    }

    fn reschedule_row(
        &mut self,
        kind: QueueKind,
        row: &ExpirationQueueRow,
        height: Height,
        new_height: Height,
    ) -> Result<(), ClaimTrieError> {
        for entry in row {
            self.inner
                .remove_from_expiration_queue(kind, &entry.name, &entry.outpoint, height)?;
            self.inner
                .add_to_expiration_queue(kind, new_height, entry.clone())?;
        }
        if !row.is_empty() {
            debug!(%kind, height, new_height, entries = row.len(), "Moved expiration row");
        }
        Ok(())
    }
}

/// Snapshot of every expiration row: dirty rows first, then persisted
/// rows at heights no dirty row of the same queue covers.
pub fn collect_expiration_rows<C: ClaimTrieCache + ?Sized>(
    cache: &C,
) -> Result<Vec<(QueueKind, Height, ExpirationQueueRow)>, ClaimTrieError> {
    let mut rows = Vec::new();

    let mut dirty_heights = BTreeSet::new();
    for (height, row) in cache.dirty_expiration_rows(QueueKind::Claim) {
        dirty_heights.insert(height);
        rows.push((QueueKind::Claim, height, row));
    }

    let mut dirty_support_heights = BTreeSet::new();
    for (height, row) in cache.dirty_expiration_rows(QueueKind::Support) {
        dirty_support_heights.insert(height);
        rows.push((QueueKind::Support, height, row));
    }

    // persisted copies of dirty heights are stale
    for (key, value) in cache.persistent_store().scan()? {
        let Some((kind, height)) = decode_queue_key(&key) else {
            continue;
        };
        let shadowed = match kind {
            QueueKind::Claim => dirty_heights.contains(&height),
            QueueKind::Support => dirty_support_heights.contains(&height),
        };
        if shadowed {
            continue;
        }
        let row = decode_row(&value).map_err(|e| ClaimTrieError::CorruptQueueRow {
            kind,
            height,
            reason: e.to_string(),
        })?;
        rows.push((kind, height, row));
    }

    Ok(rows)
}

impl<C: ClaimTrieCache> ClaimTrieCache for ExpirationForkCache<C> {
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
        self.inner.insert_claim_into_trie(name, claim, check_takeover)
    }

    fn remove_claim_from_trie(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<ClaimValue>, ClaimTrieError> {
        self.inner.remove_claim_from_trie(name, outpoint, check_takeover)
    }

    fn insert_support_into_map(
        &mut self,
        name: &[u8],
        support: SupportValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError> {
        self.inner.insert_support_into_map(name, support, check_takeover)
    }

    fn remove_support_from_map(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<SupportValue>, ClaimTrieError> {
        self.inner.remove_support_from_map(name, outpoint, check_takeover)
    }

    fn add_claim_to_queues(&mut self, name: &[u8], claim: ClaimValue) -> Result<(), ClaimTrieError> {
        self.inner.add_claim_to_queues(name, claim)
    }

    fn add_support_to_queues(
        &mut self,
        name: &[u8],
        support: SupportValue,
    ) -> Result<(), ClaimTrieError> {
        self.inner.add_support_to_queues(name, support)
    }

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
        self.inner.get_proof_for_name(name)
    }

    fn get_info_for_name(&self, name: &[u8]) -> Result<Option<ClaimValue>, ClaimTrieError> {
        self.inner.get_info_for_name(name)
    }

    fn get_claims_for_name(&self, name: &[u8]) -> Result<ClaimsForName, ClaimTrieError> {
        self.inner.get_claims_for_name(name)
    }

    fn get_delay_for_name(&self, name: &[u8], claim_id: &ClaimId) -> Result<Height, ClaimTrieError> {
        self.inner.get_delay_for_name(name, claim_id)
    }

    fn get_supports_for_name(&self, name: &[u8]) -> Vec<SupportValue> {
        self.inner.get_supports_for_name(name)
    }

    fn iterate_trie(&self, visitor: &mut dyn FnMut(&[u8], &TrieNode)) {
        self.inner.iterate_trie(visitor)
    }

    /// Connect the next block, extending pending expirations first if it
    /// is the fork block.
    fn increment_block(
        &mut self,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let height = self.inner.next_height();
        self.inner
            .set_expiration_time(self.params.expiration_time(height));
        if height == self.params.extended_expiration_fork_height {
            self.fork_for_expiration_change(true)?;
        }
        self.inner.increment_block(undo, keys)?;
        self.inner
            .set_expiration_time(self.params.expiration_time(height.saturating_add(1)));
        Ok(())
    }

    /// Disconnect the tip, withdrawing the extension afterwards if it is
    /// the fork block.
    fn decrement_block(
        &mut self,
        undo: &BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let height = self
            .inner
            .next_height()
            .checked_sub(1)
            .ok_or(ClaimTrieError::NothingToDecrement)?;
        self.inner
            .set_expiration_time(self.params.expiration_time(height));
        self.inner.decrement_block(undo, keys)?;
        if height == self.params.extended_expiration_fork_height {
            self.fork_for_expiration_change(false)?;
        }
        Ok(())
    }
}
