use super::*;
use crate::ports::RawKeys;
use crate::test_utils::*;

const NAME: &[u8] = b"name";

#[test]
fn test_claim_activates_and_expires() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();

    let undo = connect(&mut cache);
    assert_eq!(
        undo.claim_inserts,
        vec![InsertUndo::activated(NAME.to_vec(), outpoint(1), 1)]
    );
    assert!(undo.takeover_heights.is_empty());
    assert_eq!(cache.get_info_for_name(NAME).unwrap().unwrap().outpoint, outpoint(1));
    assert_eq!(cache.node(NAME).unwrap().last_takeover_height, 1);

    let queue = cache.expiration_queue(QueueKind::Claim).unwrap();
    assert_eq!(queue.get(&11), Some(&vec![NameOutPoint::new(NAME, outpoint(1))]));

    for _ in 2..11 {
        connect(&mut cache);
    }
    assert!(cache.node(NAME).is_some());

    let undo = connect(&mut cache);
    assert_eq!(undo.claim_expirations, vec![(NAME.to_vec(), make_claim(1, 100, 1))]);
    assert_eq!(undo.takeover_heights, vec![(NAME.to_vec(), 1)]);
    assert!(cache.node(NAME).is_none());
    assert!(cache.expiration_queue(QueueKind::Claim).unwrap().is_empty());
}

#[test]
fn test_takeover_and_undo() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    connect(&mut cache);
    connect(&mut cache);

    cache
        .add_claim_to_queues(NAME, make_claim(2, 200, 3))
        .unwrap();
    let before = capture(&cache);
    let undo = connect(&mut cache);

    assert_eq!(cache.get_info_for_name(NAME).unwrap().unwrap().claim_id, claim_id(2));
    assert_eq!(cache.node(NAME).unwrap().last_takeover_height, 3);
    assert_eq!(undo.takeover_heights, vec![(NAME.to_vec(), 1)]);

    cache.decrement_block(&undo, &RawKeys).unwrap();
    assert_eq!(capture(&cache), before);
    assert_eq!(cache.node(NAME).unwrap().last_takeover_height, 1);
}

#[test]
fn test_support_changes_winner() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    cache.add_claim_to_queues(NAME, make_claim(2, 150, 1)).unwrap();
    connect(&mut cache);
    assert_eq!(cache.get_info_for_name(NAME).unwrap().unwrap().claim_id, claim_id(2));

    cache
        .add_support_to_queues(NAME, make_support(3, 1, 80, 2))
        .unwrap();
    let undo = connect(&mut cache);

    assert_eq!(cache.get_info_for_name(NAME).unwrap().unwrap().claim_id, claim_id(1));
    assert_eq!(undo.support_inserts.len(), 1);
    assert_eq!(undo.takeover_heights, vec![(NAME.to_vec(), 1)]);
    assert_eq!(cache.node(NAME).unwrap().last_takeover_height, 2);
}

#[test]
fn test_decrement_restores_mixed_block() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    cache.add_support_to_queues(NAME, make_support(2, 1, 10, 1)).unwrap();
    cache.add_claim_to_queues(b"other", make_claim(3, 5, 1)).unwrap();
    connect(&mut cache);
    cache.flush().unwrap();
    for _ in 2..11 {
        connect(&mut cache);
    }

    // block 11 expires everything from block 1 and activates a newcomer
    cache.add_claim_to_queues(NAME, make_claim(4, 1, 11)).unwrap();
    let before = capture(&cache);
    let undo = connect(&mut cache);
    assert_eq!(undo.claim_expirations.len(), 2);
    assert_eq!(undo.support_expirations.len(), 1);
    assert_eq!(cache.get_info_for_name(NAME).unwrap().unwrap().claim_id, claim_id(4));

    cache.decrement_block(&undo, &RawKeys).unwrap();
    assert_eq!(capture(&cache), before);
}

#[test]
fn test_flush_commits_rows() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    connect(&mut cache);
    let queue = cache.expiration_queue(QueueKind::Claim).unwrap();

    cache.flush().unwrap();

    assert!(cache.dirty_expiration_rows(QueueKind::Claim).is_empty());
    assert!(cache
        .store()
        .get(&encode_queue_key(QueueKind::Claim, 11))
        .unwrap()
        .is_some());
    assert_eq!(cache.expiration_queue(QueueKind::Claim).unwrap(), queue);
}

#[test]
fn test_emptied_row_deleted_on_flush() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    connect(&mut cache);
    cache.flush().unwrap();

    assert!(cache
        .remove_from_expiration_queue(QueueKind::Claim, NAME, &outpoint(1), 11)
        .unwrap());
    cache.flush().unwrap();
    assert!(cache.store().is_empty());
}

#[test]
fn test_corrupt_row_fails_block() {
    let mut cache = make_cache(3, test_params());
    cache
        .store_mut()
        .put(&encode_queue_key(QueueKind::Claim, 3), &[0xFF])
        .unwrap();

    let mut undo = BlockUndo::new();
    let result = cache.increment_block(&mut undo, &RawKeys);
    assert!(matches!(
        result,
        Err(ClaimTrieError::CorruptQueueRow { kind: QueueKind::Claim, height: 3, .. })
    ));
}

#[test]
fn test_activation_in_past_rejected() {
    let mut cache = make_cache(5, test_params());
    let result = cache.add_claim_to_queues(NAME, make_claim(1, 1, 3));
    assert!(matches!(result, Err(ClaimTrieError::ActivationInPast { .. })));
}

#[test]
fn test_delay_grows_with_owner_age() {
    let mut cache = make_cache(1, test_params());
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    for _ in 1..5 {
        connect(&mut cache);
    }

    assert_eq!(cache.get_delay_for_name(NAME, &claim_id(9)).unwrap(), 4);
    assert_eq!(cache.get_delay_for_name(NAME, &claim_id(1)).unwrap(), 0);
    assert_eq!(cache.get_delay_for_name(b"nobody", &claim_id(9)).unwrap(), 0);
}

#[test]
fn test_proof_tracks_root() {
    let mut cache = make_cache(1, test_params());
    let empty_root = cache.root_hash();
    cache.add_claim_to_queues(NAME, make_claim(1, 100, 1)).unwrap();
    connect(&mut cache);

    let proof = cache.get_proof_for_name(NAME).unwrap();
    assert_eq!(proof.best, Some(outpoint(1)));
    assert!(proof.node_hash.is_some());
    assert_eq!(proof.root_hash, cache.root_hash());
    assert_ne!(proof.root_hash, empty_root);

    let missing = cache.get_proof_for_name(b"missing").unwrap();
    assert_eq!(missing.best, None);
    assert_eq!(missing.node_hash, None);
}

#[test]
fn test_nothing_to_decrement() {
    let mut cache = make_cache(0, test_params());
    let result = cache.decrement_block(&BlockUndo::new(), &RawKeys);
    assert!(matches!(result, Err(ClaimTrieError::NothingToDecrement)));
}
