//! Full pipeline: normalization over expiration over the base cache.

use super::*;
use crate::domain::{BlockUndo, ForkParams, Height, QueueKind, UnicodeNameNormalizer};
use crate::ports::{ClaimTrieCache, RawKeys};
use crate::test_utils::*;

type Pipeline = NormalizationForkCache<ExpirationForkCache<TestCache>, UnicodeNameNormalizer>;

const NAMES: [&str; 5] = ["Alpha", "alpha", "\u{00C0}BC", "plain", "Z\u{00EB}ta"];

fn both_forks() -> ForkParams {
    ForkParams {
        extended_expiration_fork_height: 25,
        normalized_name_fork_height: 20,
        ..test_params()
    }
}

fn pipeline(next_height: Height) -> Pipeline {
    let params = both_forks();
    NormalizationForkCache::new(
        ExpirationForkCache::new(make_cache(next_height, params.clone()), params.clone()),
        UnicodeNameNormalizer::new().unwrap(),
        params,
    )
}

fn base(cache: &Pipeline) -> &TestCache {
    cache.inner().inner()
}

/// One claim per block from 11 to 32, a support every third block and a
/// delayed claim straddling the normalization fork.
fn schedule(cache: &mut Pipeline) {
    for height in 11..=32u32 {
        let tag = height as u8;
        let name = NAMES[height as usize % NAMES.len()];
        let amount = u64::from(height % 7 + 1) * 10;
        cache
            .add_claim_to_queues(name.as_bytes(), make_claim(tag, amount, height))
            .unwrap();
        if height % 3 == 0 {
            let supported = NAMES[(height as usize - 1) % NAMES.len()];
            cache
                .add_support_to_queues(supported.as_bytes(), make_support(tag + 100, tag - 1, 25, height))
                .unwrap();
        }
    }
    cache
        .add_claim_to_queues(b"Delayed", make_claim(200, 10, 14).with_valid_at_height(22))
        .unwrap();
}

#[test]
fn test_reorg_across_both_forks() {
    let params = both_forks();
    let mut cache = pipeline(11);
    schedule(&mut cache);

    let mut history: Vec<(CacheState, BlockUndo)> = Vec::new();
    while cache.next_height() <= 32 {
        let before = capture(base(&cache));
        if cache.next_height() % 4 == 0 {
            cache.inner_mut().inner_mut().flush().unwrap();
        }
        let undo = connect(&mut cache);
        assert_eq!(cache.expiration_time(), params.expiration_time(cache.next_height()));
        history.push((before, undo));
    }

    let claim_rows = base(&cache).expiration_queue(QueueKind::Claim).unwrap();
    assert!(claim_rows.keys().any(|height| *height >= 45));
    assert!(base(&cache).nodes().keys().all(|name| name.as_slice() != b"Alpha"));

    while let Some((before, undo)) = history.pop() {
        cache.decrement_block(&undo, &RawKeys).unwrap();
        assert_eq!(capture(base(&cache)), before, "disconnect to {}", cache.next_height());
        assert_eq!(cache.expiration_time(), params.expiration_time(cache.next_height()));
    }
    assert_eq!(cache.next_height(), 11);
}

#[test]
fn test_disconnect_with_nothing_connected() {
    let mut cache = pipeline(0);
    let result = cache.decrement_block(&BlockUndo::new(), &RawKeys);
    assert!(matches!(result, Err(crate::domain::ClaimTrieError::NothingToDecrement)));
}
