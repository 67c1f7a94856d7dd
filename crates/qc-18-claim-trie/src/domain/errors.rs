use super::{Height, OutPoint, QueueKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimTrieError {
    #[error("Corrupt {kind} expiration queue row at height {height}: {reason}")]
    CorruptQueueRow {
        kind: QueueKind,
        height: Height,
        reason: String,
    },

    #[error("Expiration height underflow: {height} - {delta}")]
    HeightUnderflow { height: Height, delta: Height },

    #[error("Activation height {valid_at_height} is before next block {next_height}")]
    ActivationInPast {
        valid_at_height: Height,
        next_height: Height,
    },

    #[error("Duplicate {what} {outpoint} under name {name}")]
    Duplicate {
        what: &'static str,
        name: String,
        outpoint: OutPoint,
    },

    #[error("Undo record does not match trie: {what} {outpoint} under name {name}")]
    InconsistentUndo {
        what: &'static str,
        name: String,
        outpoint: OutPoint,
    },

    #[error("No block to disconnect")]
    NothingToDecrement,

    #[error("Name normalization failed: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ClaimTrieError {
    pub(crate) fn inconsistent_undo(what: &'static str, name: &[u8], outpoint: OutPoint) -> Self {
        Self::InconsistentUndo {
            what,
            name: String::from_utf8_lossy(name).into_owned(),
            outpoint,
        }
    }

    pub(crate) fn duplicate(what: &'static str, name: &[u8], outpoint: OutPoint) -> Self {
        Self::Duplicate {
            what,
            name: String::from_utf8_lossy(name).into_owned(),
            outpoint,
        }
    }
}

/// Failure of the normalization engine itself (never bad input).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("Normalization engine unavailable: {0}")]
    EngineUnavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum KVStoreError {
    #[error("I/O error: {0}")]
    Io(String),
}
