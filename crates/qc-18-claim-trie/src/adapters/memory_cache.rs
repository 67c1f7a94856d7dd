//! # In-Memory Claim Trie Cache
//!
//! Reference base stage for the fork layers. Nodes, supports and the
//! activation queues live in ordered maps; expiration queues are split
//! into a dirty overlay and the persistent `KeyValueStore`, and every
//! read of a row goes overlay first.
//!
//! ## Block connect (height `h`)
//!
//! 1. Activate claims, then supports, queued at `h`
//! 2. Expire claims, then supports, scheduled at `h`
//! 3. Settle takeovers for every name touched with a takeover check
//!
//! Disconnect replays the undo lists backwards.

use crate::domain::{
    decode_queue_key, decode_row, encode_queue_key, encode_row, expiration_height, BlockUndo,
    ClaimId, ClaimTrieError, ClaimTrieProof, ClaimValue, ClaimsForName, ExpirationQueueRow,
    ForkParams, Hash, Height, InsertUndo, Name, NameOutPoint, OutPoint, QueueKind, SupportValue,
    TrieNode,
};
use crate::ports::{BatchOperation, ClaimTrieCache, KeyValueStore, NameKeys};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

type ClaimQueueRow = Vec<(Name, ClaimValue)>;
type SupportQueueRow = Vec<(Name, SupportValue)>;

/// Base claim trie cache over an ordered key-value store.
pub struct MemoryClaimTrieCache<S> {
    store: S,
    params: ForkParams,
    next_height: Height,
    expiration_time: Height,
    nodes: BTreeMap<Name, TrieNode>,
    supports: BTreeMap<Name, Vec<SupportValue>>,
    claim_queue: BTreeMap<Height, ClaimQueueRow>,
    support_queue: BTreeMap<Height, SupportQueueRow>,
    dirty_claim_expirations: BTreeMap<Height, ExpirationQueueRow>,
    dirty_support_expirations: BTreeMap<Height, ExpirationQueueRow>,
    /// Winner and takeover height of each name before its first
    /// takeover-checked change in the current block. `None` if the name
    /// had no node.
    takeover_candidates: BTreeMap<Name, Option<(ClaimId, Height)>>,
}

impl<S: KeyValueStore> MemoryClaimTrieCache<S> {
    pub fn new(store: S, next_height: Height, params: ForkParams) -> Self {
        let expiration_time = params.expiration_time(next_height);
        Self {
            store,
            params,
            next_height,
            expiration_time,
            nodes: BTreeMap::new(),
            supports: BTreeMap::new(),
            claim_queue: BTreeMap::new(),
            support_queue: BTreeMap::new(),
            dirty_claim_expirations: BTreeMap::new(),
            dirty_support_expirations: BTreeMap::new(),
            takeover_candidates: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn node(&self, name: &[u8]) -> Option<&TrieNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> &BTreeMap<Name, TrieNode> {
        &self.nodes
    }

    pub fn supports(&self) -> &BTreeMap<Name, Vec<SupportValue>> {
        &self.supports
    }

    pub fn claim_queue(&self) -> &BTreeMap<Height, ClaimQueueRow> {
        &self.claim_queue
    }

    pub fn support_queue(&self) -> &BTreeMap<Height, SupportQueueRow> {
        &self.support_queue
    }

    /// Commit every dirty expiration row in one atomic batch.
    pub fn flush(&mut self) -> Result<(), ClaimTrieError> {
        let mut operations = Vec::new();
        for kind in QueueKind::ALL {
            for (height, row) in std::mem::take(self.dirty_mut(kind)) {
                let key = encode_queue_key(kind, height);
                if row.is_empty() {
                    operations.push(BatchOperation::delete(key.to_vec()));
                } else {
                    let value = encode_row(&row)
                        .map_err(|e| ClaimTrieError::SerializationError(e.to_string()))?;
                    operations.push(BatchOperation::put(key.to_vec(), value));
                }
            }
        }
        debug!(rows = operations.len(), "Flushing expiration queue rows");
        self.store.atomic_batch_write(operations)?;
        Ok(())
    }

    /// Effective contents of one expiration queue: persisted rows
    /// shadowed by dirty rows, empty rows omitted.
    pub fn expiration_queue(
        &self,
        kind: QueueKind,
    ) -> Result<BTreeMap<Height, ExpirationQueueRow>, ClaimTrieError> {
        let mut queue = BTreeMap::new();
        for (key, value) in self.store.scan()? {
            if let Some((row_kind, height)) = decode_queue_key(&key) {
                if row_kind == kind {
                    queue.insert(height, decode_persisted_row(kind, height, &value)?);
                }
            }
        }
        for (height, row) in self.dirty(kind) {
            queue.insert(*height, row.clone());
        }
        queue.retain(|_, row| !row.is_empty());
        Ok(queue)
    }

    /// Keccak-256 over every node hash in key order.
    pub fn root_hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        for (name, node) in &self.nodes {
            hasher.update(self.node_hash(name, node));
        }
        hasher.finalize().into()
    }

    fn node_hash(&self, name: &[u8], node: &TrieNode) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update((name.len() as u32).to_be_bytes());
        hasher.update(name);
        if let Some(best) = node.best_claim(self.supports_slice(name)) {
            hasher.update(best.outpoint.txid);
            hasher.update(best.outpoint.index.to_be_bytes());
        }
        hasher.update(node.last_takeover_height.to_be_bytes());
        hasher.finalize().into()
    }

    fn supports_slice(&self, name: &[u8]) -> &[SupportValue] {
        self.supports.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn best_claim_id(&self, name: &[u8]) -> Option<ClaimId> {
        let node = self.nodes.get(name)?;
        node.best_claim(self.supports_slice(name)).map(|c| c.claim_id)
    }

    fn note_takeover_candidate(&mut self, name: &[u8]) {
        if self.takeover_candidates.contains_key(name) {
            return;
        }
        let before = self.nodes.get(name).and_then(|node| {
            node.best_claim(self.supports_slice(name))
                .map(|c| (c.claim_id, node.last_takeover_height))
        });
        self.takeover_candidates.insert(name.to_vec(), before);
    }

    fn dirty(&self, kind: QueueKind) -> &BTreeMap<Height, ExpirationQueueRow> {
        match kind {
            QueueKind::Claim => &self.dirty_claim_expirations,
            QueueKind::Support => &self.dirty_support_expirations,
        }
    }

    fn dirty_mut(&mut self, kind: QueueKind) -> &mut BTreeMap<Height, ExpirationQueueRow> {
        match kind {
            QueueKind::Claim => &mut self.dirty_claim_expirations,
            QueueKind::Support => &mut self.dirty_support_expirations,
        }
    }

    fn persisted_row(
        &self,
        kind: QueueKind,
        height: Height,
    ) -> Result<ExpirationQueueRow, ClaimTrieError> {
        match self.store.get(&encode_queue_key(kind, height))? {
            Some(bytes) => decode_persisted_row(kind, height, &bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Row at `height` in the dirty overlay, loaded from the store first
    /// if needed.
    fn row_mut(
        &mut self,
        kind: QueueKind,
        height: Height,
    ) -> Result<&mut ExpirationQueueRow, ClaimTrieError> {
        if !self.dirty(kind).contains_key(&height) {
            let row = self.persisted_row(kind, height)?;
            self.dirty_mut(kind).insert(height, row);
        }
        Ok(self.dirty_mut(kind).entry(height).or_default())
    }

    fn take_expiration_row(
        &mut self,
        kind: QueueKind,
        height: Height,
    ) -> Result<ExpirationQueueRow, ClaimTrieError> {
        Ok(std::mem::take(self.row_mut(kind, height)?))
    }

    fn activate_claims(
        &mut self,
        height: Height,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let Some(row) = self.claim_queue.remove(&height) else {
            return Ok(());
        };
        for (name, claim) in row {
            let inserted = {
                let key = keys.insert_key(&name)?;
                self.insert_claim_into_trie(&key, claim.clone(), true)?
            };
            if !inserted {
                return Err(ClaimTrieError::duplicate("claim", &name, claim.outpoint));
            }
            let expires_at = expiration_height(claim.height, self.expiration_time);
            self.add_to_expiration_queue(
                QueueKind::Claim,
                expires_at,
                NameOutPoint::new(name.clone(), claim.outpoint),
            )?;
            undo.claim_inserts
                .push(InsertUndo::activated(name, claim.outpoint, claim.valid_at_height));
        }
        Ok(())
    }

    fn activate_supports(
        &mut self,
        height: Height,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let Some(row) = self.support_queue.remove(&height) else {
            return Ok(());
        };
        for (name, support) in row {
            let inserted = {
                let key = keys.insert_key(&name)?;
                self.insert_support_into_map(&key, support.clone(), true)?
            };
            if !inserted {
                return Err(ClaimTrieError::duplicate("support", &name, support.outpoint));
            }
            let expires_at = expiration_height(support.height, self.expiration_time);
            self.add_to_expiration_queue(
                QueueKind::Support,
                expires_at,
                NameOutPoint::new(name.clone(), support.outpoint),
            )?;
            undo.support_inserts
                .push(InsertUndo::activated(name, support.outpoint, support.valid_at_height));
        }
        Ok(())
    }

    fn expire_claims(
        &mut self,
        height: Height,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        for entry in self.take_expiration_row(QueueKind::Claim, height)? {
            let removed = {
                let key = keys.remove_key(&entry.name)?;
                self.remove_claim_from_trie(&key, &entry.outpoint, true)?
            };
            match removed {
                Some(claim) => undo.claim_expirations.push((entry.name, claim)),
                None => warn!(%entry, height, "Expiring claim in queue not found in trie"),
            }
        }
        Ok(())
    }

    fn expire_supports(
        &mut self,
        height: Height,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        for entry in self.take_expiration_row(QueueKind::Support, height)? {
            let removed = {
                let key = keys.remove_key(&entry.name)?;
                self.remove_support_from_map(&key, &entry.outpoint, true)?
            };
            match removed {
                Some(support) => undo.support_expirations.push((entry.name, support)),
                None => warn!(%entry, height, "Expiring support in queue not found in map"),
            }
        }
        Ok(())
    }

    fn settle_takeovers(&mut self, height: Height, undo: &mut BlockUndo) {
        for (name, before) in std::mem::take(&mut self.takeover_candidates) {
            let winner = self.best_claim_id(&name);
            if winner == before.map(|(claim_id, _)| claim_id) {
                continue;
            }
            if let Some((_, previous)) = before {
                undo.takeover_heights.push((name.clone(), previous));
            }
            if let Some(node) = self.nodes.get_mut(&name) {
                node.last_takeover_height = height;
            }
            debug!(name = %String::from_utf8_lossy(&name), height, "Takeover");
        }
    }
}

fn decode_persisted_row(
    kind: QueueKind,
    height: Height,
    bytes: &[u8],
) -> Result<ExpirationQueueRow, ClaimTrieError> {
    decode_row(bytes).map_err(|e| ClaimTrieError::CorruptQueueRow {
        kind,
        height,
        reason: e.to_string(),
    })
}

impl<S: KeyValueStore> ClaimTrieCache for MemoryClaimTrieCache<S> {
    fn next_height(&self) -> Height {
        self.next_height
    }

    fn expiration_time(&self) -> Height {
        self.expiration_time
    }

    fn set_expiration_time(&mut self, expiration_time: Height) {
        self.expiration_time = expiration_time;
    }

    fn insert_claim_into_trie(
        &mut self,
        name: &[u8],
        claim: ClaimValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError> {
        if check_takeover {
            self.note_takeover_candidate(name);
        }
        let next_height = self.next_height;
        let node = self
            .nodes
            .entry(name.to_vec())
            .or_insert_with(|| TrieNode::new(next_height));
        Ok(node.insert_claim(claim))
    }

    fn remove_claim_from_trie(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<ClaimValue>, ClaimTrieError> {
        if check_takeover {
            self.note_takeover_candidate(name);
        }
        let Some(node) = self.nodes.get_mut(name) else {
            return Ok(None);
        };
        let removed = node.remove_claim(outpoint);
        if node.is_empty() {
            self.nodes.remove(name);
        }
        Ok(removed)
    }

    fn insert_support_into_map(
        &mut self,
        name: &[u8],
        support: SupportValue,
        check_takeover: bool,
    ) -> Result<bool, ClaimTrieError> {
        if check_takeover {
            self.note_takeover_candidate(name);
        }
        let supports = self.supports.entry(name.to_vec()).or_default();
        if supports.iter().any(|s| s.outpoint == support.outpoint) {
            return Ok(false);
        }
        let position = supports
            .partition_point(|s| (s.height, s.outpoint) < (support.height, support.outpoint));
        supports.insert(position, support);
        Ok(true)
    }

    fn remove_support_from_map(
        &mut self,
        name: &[u8],
        outpoint: &OutPoint,
        check_takeover: bool,
    ) -> Result<Option<SupportValue>, ClaimTrieError> {
        if check_takeover {
            self.note_takeover_candidate(name);
        }
        let Some(supports) = self.supports.get_mut(name) else {
            return Ok(None);
        };
        let removed = supports
            .iter()
            .position(|s| s.outpoint == *outpoint)
            .map(|position| supports.remove(position));
        if supports.is_empty() {
            self.supports.remove(name);
        }
        Ok(removed)
    }

    fn add_claim_to_queues(&mut self, name: &[u8], claim: ClaimValue) -> Result<(), ClaimTrieError> {
        if claim.valid_at_height < self.next_height {
            return Err(ClaimTrieError::ActivationInPast {
                valid_at_height: claim.valid_at_height,
                next_height: self.next_height,
            });
        }
        self.claim_queue
            .entry(claim.valid_at_height)
            .or_default()
            .push((name.to_vec(), claim));
        Ok(())
    }

    fn add_support_to_queues(
        &mut self,
        name: &[u8],
        support: SupportValue,
    ) -> Result<(), ClaimTrieError> {
        if support.valid_at_height < self.next_height {
            return Err(ClaimTrieError::ActivationInPast {
                valid_at_height: support.valid_at_height,
                next_height: self.next_height,
            });
        }
        self.support_queue
            .entry(support.valid_at_height)
            .or_default()
            .push((name.to_vec(), support));
        Ok(())
    }

    fn add_to_expiration_queue(
        &mut self,
        kind: QueueKind,
        height: Height,
        entry: NameOutPoint,
    ) -> Result<(), ClaimTrieError> {
        self.row_mut(kind, height)?.push(entry);
        Ok(())
    }

    fn remove_from_expiration_queue(
        &mut self,
        kind: QueueKind,
        name: &[u8],
        outpoint: &OutPoint,
        height: Height,
    ) -> Result<bool, ClaimTrieError> {
        let row = self.row_mut(kind, height)?;
        match row
            .iter()
            .position(|e| e.name == name && e.outpoint == *outpoint)
        {
            Some(position) => {
                row.remove(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn dirty_expiration_rows(&self, kind: QueueKind) -> Vec<(Height, ExpirationQueueRow)> {
        self.dirty(kind)
            .iter()
            .map(|(height, row)| (*height, row.clone()))
            .collect()
    }

    fn persistent_store(&self) -> &dyn KeyValueStore {
        &self.store
    }

    fn get_proof_for_name(&self, name: &[u8]) -> Result<ClaimTrieProof, ClaimTrieError> {
        let node = self.nodes.get(name);
        Ok(ClaimTrieProof {
            name: name.to_vec(),
            best: node
                .and_then(|n| n.best_claim(self.supports_slice(name)))
                .map(|c| c.outpoint),
            last_takeover_height: node.map(|n| n.last_takeover_height).unwrap_or(0),
            node_hash: node.map(|n| self.node_hash(name, n)),
            root_hash: self.root_hash(),
        })
    }

    fn get_info_for_name(&self, name: &[u8]) -> Result<Option<ClaimValue>, ClaimTrieError> {
        Ok(self
            .nodes
            .get(name)
            .and_then(|node| node.best_claim(self.supports_slice(name)))
            .cloned())
    }

    fn get_claims_for_name(&self, name: &[u8]) -> Result<ClaimsForName, ClaimTrieError> {
        let node = self.nodes.get(name);
        Ok(ClaimsForName {
            name: name.to_vec(),
            claims: node.map(|n| n.claims.clone()).unwrap_or_default(),
            supports: self.get_supports_for_name(name),
            last_takeover_height: node.map(|n| n.last_takeover_height).unwrap_or(0),
        })
    }

    fn get_delay_for_name(&self, name: &[u8], claim_id: &ClaimId) -> Result<Height, ClaimTrieError> {
        let Some(node) = self.nodes.get(name) else {
            return Ok(0);
        };
        if self.best_claim_id(name) == Some(*claim_id) {
            return Ok(0);
        }
        let since_takeover = self.next_height.saturating_sub(node.last_takeover_height);
        let delay = since_takeover / self.params.proportional_delay_factor.max(1);
        Ok(delay.min(self.params.max_takeover_delay))
    }

    fn get_supports_for_name(&self, name: &[u8]) -> Vec<SupportValue> {
        self.supports_slice(name).to_vec()
    }

    fn iterate_trie(&self, visitor: &mut dyn FnMut(&[u8], &TrieNode)) {
        for (name, node) in &self.nodes {
            visitor(name, node);
        }
    }

    fn increment_block(
        &mut self,
        undo: &mut BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let height = self.next_height;
        self.activate_claims(height, undo, keys)?;
        self.activate_supports(height, undo, keys)?;
        self.expire_claims(height, undo, keys)?;
        self.expire_supports(height, undo, keys)?;
        self.settle_takeovers(height, undo);
        self.next_height = height + 1;
        debug!(
            height,
            claims_inserted = undo.claim_inserts.len(),
            claims_expired = undo.claim_expirations.len(),
            "Connected claim trie block"
        );
        Ok(())
    }

    fn decrement_block(
        &mut self,
        undo: &BlockUndo,
        keys: &dyn NameKeys,
    ) -> Result<(), ClaimTrieError> {
        let height = self
            .next_height
            .checked_sub(1)
            .ok_or(ClaimTrieError::NothingToDecrement)?;
        self.next_height = height;

        for (name, support) in undo.support_expirations.iter().rev() {
            let inserted = {
                let key = keys.insert_key(name)?;
                self.insert_support_into_map(&key, support.clone(), false)?
            };
            if !inserted {
                return Err(ClaimTrieError::inconsistent_undo("support", name, support.outpoint));
            }
        }
        // only entries that expired naturally go back into this row
        for (name, support) in &undo.support_expirations {
            if expiration_height(support.height, self.expiration_time) == height {
                let entry = NameOutPoint::new(name.clone(), support.outpoint);
                self.add_to_expiration_queue(QueueKind::Support, height, entry)?;
            }
        }

        for (name, claim) in undo.claim_expirations.iter().rev() {
            let inserted = {
                let key = keys.insert_key(name)?;
                self.insert_claim_into_trie(&key, claim.clone(), false)?
            };
            if !inserted {
                return Err(ClaimTrieError::inconsistent_undo("claim", name, claim.outpoint));
            }
        }
        for (name, claim) in &undo.claim_expirations {
            if expiration_height(claim.height, self.expiration_time) == height {
                let entry = NameOutPoint::new(name.clone(), claim.outpoint);
                self.add_to_expiration_queue(QueueKind::Claim, height, entry)?;
            }
        }

        for entry in undo.support_inserts.iter().rev() {
            let removed = {
                let key = keys.remove_key(&entry.name)?;
                self.remove_support_from_map(&key, &entry.outpoint, false)?
            };
            let support = removed.ok_or_else(|| {
                ClaimTrieError::inconsistent_undo("support", &entry.name, entry.outpoint)
            })?;
            if let Some(valid_height) = entry.valid_height {
                let expires_at = expiration_height(support.height, self.expiration_time);
                if !self.remove_from_expiration_queue(
                    QueueKind::Support,
                    &entry.name,
                    &entry.outpoint,
                    expires_at,
                )? {
                    warn!(outpoint = %entry.outpoint, expires_at, "Activated support missing from expiration queue");
                }
                self.support_queue
                    .entry(valid_height)
                    .or_default()
                    .insert(0, (entry.name.clone(), support));
            }
        }

        for entry in undo.claim_inserts.iter().rev() {
            let removed = {
                let key = keys.remove_key(&entry.name)?;
                self.remove_claim_from_trie(&key, &entry.outpoint, false)?
            };
            let claim = removed.ok_or_else(|| {
                ClaimTrieError::inconsistent_undo("claim", &entry.name, entry.outpoint)
            })?;
            if let Some(valid_height) = entry.valid_height {
                let expires_at = expiration_height(claim.height, self.expiration_time);
                if !self.remove_from_expiration_queue(
                    QueueKind::Claim,
                    &entry.name,
                    &entry.outpoint,
                    expires_at,
                )? {
                    warn!(outpoint = %entry.outpoint, expires_at, "Activated claim missing from expiration queue");
                }
                self.claim_queue
                    .entry(valid_height)
                    .or_default()
                    .insert(0, (entry.name.clone(), claim));
            }
        }

        for (name, previous) in undo.takeover_heights.iter().rev() {
            if let Some(node) = self.nodes.get_mut(name) {
                node.last_takeover_height = *previous;
            }
        }

        debug!(height, "Disconnected claim trie block");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
