use crate::adapters::{InMemoryKVStore, MemoryClaimTrieCache};
use crate::domain::{
    BlockUndo, ClaimId, ClaimValue, ExpirationQueueRow, ForkParams, Height, OutPoint, QueueKind,
    SupportValue, TrieNode,
};
use crate::ports::{ClaimTrieCache, RawKeys};
use std::collections::BTreeMap;

pub type TestCache = MemoryClaimTrieCache<InMemoryKVStore>;

/// Short lifetimes; both forks far away unless a test overrides them.
pub fn test_params() -> ForkParams {
    ForkParams {
        original_expiration_time: 10,
        extended_expiration_time: 30,
        extended_expiration_fork_height: 1_000,
        normalized_name_fork_height: 1_000,
        proportional_delay_factor: 1,
        max_takeover_delay: 100,
    }
}

pub fn make_cache(next_height: Height, params: ForkParams) -> TestCache {
    MemoryClaimTrieCache::new(InMemoryKVStore::new(), next_height, params)
}

pub fn outpoint(tag: u8) -> OutPoint {
    OutPoint::new([tag; 32], tag as u32)
}

pub fn claim_id(tag: u8) -> ClaimId {
    ClaimId([tag; 20])
}

pub fn make_claim(tag: u8, amount: u64, height: Height) -> ClaimValue {
    ClaimValue::new(outpoint(tag), claim_id(tag), amount, height)
}

pub fn make_support(tag: u8, supported: u8, amount: u64, height: Height) -> SupportValue {
    SupportValue::new(outpoint(tag), claim_id(supported), amount, height)
}

/// Connect one block with raw keys.
pub fn connect<C: ClaimTrieCache + ?Sized>(cache: &mut C) -> BlockUndo {
    let mut undo = BlockUndo::new();
    cache.increment_block(&mut undo, &RawKeys).unwrap();
    undo
}

/// Everything a reorg must restore.
#[derive(Debug, PartialEq, Eq)]
pub struct CacheState {
    pub next_height: Height,
    pub nodes: BTreeMap<Vec<u8>, TrieNode>,
    pub supports: BTreeMap<Vec<u8>, Vec<SupportValue>>,
    pub claim_expirations: BTreeMap<Height, ExpirationQueueRow>,
    pub support_expirations: BTreeMap<Height, ExpirationQueueRow>,
    pub claim_queue: BTreeMap<Height, Vec<(Vec<u8>, ClaimValue)>>,
    pub support_queue: BTreeMap<Height, Vec<(Vec<u8>, SupportValue)>>,
}

pub fn capture(cache: &TestCache) -> CacheState {
    CacheState {
        next_height: cache.next_height(),
        nodes: cache.nodes().clone(),
        supports: cache.supports().clone(),
        claim_expirations: cache.expiration_queue(QueueKind::Claim).unwrap(),
        support_expirations: cache.expiration_queue(QueueKind::Support).unwrap(),
        claim_queue: cache.claim_queue().clone(),
        support_queue: cache.support_queue().clone(),
    }
}
