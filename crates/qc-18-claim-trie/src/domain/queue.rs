//! # Expiration Queue Keys and Rows
//!
//! Persisted rows live under `[kind | height (big-endian u32)]` so a key
//! scan visits each queue in height order. Rows are bincode-encoded.

use super::{ExpirationQueueRow, Height};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key prefix of persisted claim expiration rows.
pub const CLAIM_EXPIRATION_PREFIX: u8 = b'e';
/// Key prefix of persisted support expiration rows.
pub const SUPPORT_EXPIRATION_PREFIX: u8 = b'f';

const QUEUE_KEY_LEN: usize = 5;

/// Which of the two expiration queues a row belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Claim,
    Support,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Claim, QueueKind::Support];

    pub fn prefix(self) -> u8 {
        match self {
            QueueKind::Claim => CLAIM_EXPIRATION_PREFIX,
            QueueKind::Support => SUPPORT_EXPIRATION_PREFIX,
        }
    }

    fn from_prefix(prefix: u8) -> Option<Self> {
        match prefix {
            CLAIM_EXPIRATION_PREFIX => Some(QueueKind::Claim),
            SUPPORT_EXPIRATION_PREFIX => Some(QueueKind::Support),
            _ => None,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Claim => f.write_str("claim"),
            QueueKind::Support => f.write_str("support"),
        }
    }
}

pub fn encode_queue_key(kind: QueueKind, height: Height) -> [u8; QUEUE_KEY_LEN] {
    let mut key = [0u8; QUEUE_KEY_LEN];
    key[0] = kind.prefix();
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

/// Decode a store key. Keys of other record types yield `None`.
pub fn decode_queue_key(key: &[u8]) -> Option<(QueueKind, Height)> {
    if key.len() != QUEUE_KEY_LEN {
        return None;
    }
    let kind = QueueKind::from_prefix(key[0])?;
    let height = Height::from_be_bytes([key[1], key[2], key[3], key[4]]);
    Some((kind, height))
}

pub fn encode_row(row: &ExpirationQueueRow) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(row)
}

pub fn decode_row(bytes: &[u8]) -> Result<ExpirationQueueRow, bincode::Error> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NameOutPoint, OutPoint};

    #[test]
    fn test_queue_key_layout() {
        let key = encode_queue_key(QueueKind::Support, 0x0102_0304);
        assert_eq!(key, [b'f', 1, 2, 3, 4]);
        assert_eq!(decode_queue_key(&key), Some((QueueKind::Support, 0x0102_0304)));
    }

    #[test]
    fn test_keys_sort_by_height() {
        let low = encode_queue_key(QueueKind::Claim, 255);
        let high = encode_queue_key(QueueKind::Claim, 256);
        assert!(low < high);
    }

    #[test]
    fn test_foreign_keys_ignored() {
        assert_eq!(decode_queue_key(b"n"), None);
        assert_eq!(decode_queue_key(&[b'x', 0, 0, 0, 1]), None);
        assert_eq!(decode_queue_key(&[b'e', 0, 0, 0, 1, 9]), None);
    }

    #[test]
    fn test_truncated_row_fails() {
        let row = vec![NameOutPoint::new(b"name".to_vec(), OutPoint::new([7; 32], 1))];
        let bytes = encode_row(&row).unwrap();
        assert_eq!(decode_row(&bytes).unwrap(), row);
        assert!(decode_row(&bytes[..bytes.len() - 3]).is_err());
    }
}
