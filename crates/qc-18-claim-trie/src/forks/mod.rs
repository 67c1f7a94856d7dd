//! Fork stages stacked on top of a base [`ClaimTrieCache`](crate::ports::ClaimTrieCache).
//!
//! ```text
//! NormalizationForkCache ──owns──→ ExpirationForkCache ──owns──→ base cache
//! ```

pub mod expiration;
pub mod normalization;

pub use expiration::*;
pub use normalization::*;

#[cfg(test)]
mod tests;
