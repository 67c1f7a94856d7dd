//! # Consensus Parameters for Claim Trie Forks
//!
//! Heights and durations every node must agree on. Values are in blocks.

use super::Height;
use serde::{Deserialize, Serialize};

/// Fork activation heights and expiration durations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkParams {
    /// Claim/support lifetime before the expiration fork.
    pub original_expiration_time: Height,
    /// Claim/support lifetime from the expiration fork onwards.
    pub extended_expiration_time: Height,
    /// First block connected with the extended lifetime.
    pub extended_expiration_fork_height: Height,
    /// Block at which every existing name is migrated to normalized form.
    /// Names are normalized for all blocks above it.
    pub normalized_name_fork_height: Height,
    /// Blocks since the last takeover per block of activation delay.
    pub proportional_delay_factor: Height,
    /// Upper bound on the activation delay.
    pub max_takeover_delay: Height,
}

impl Default for ForkParams {
    fn default() -> Self {
        Self {
            original_expiration_time: 262_974,
            extended_expiration_time: 2_102_400,
            extended_expiration_fork_height: 400_155,
            normalized_name_fork_height: 539_940,
            proportional_delay_factor: 32,
            max_takeover_delay: 4_032,
        }
    }
}

impl ForkParams {
    /// Short durations and early forks for local testing.
    pub fn regtest() -> Self {
        Self {
            original_expiration_time: 500,
            extended_expiration_time: 600,
            extended_expiration_fork_height: 800,
            normalized_name_fork_height: 250,
            proportional_delay_factor: 1,
            max_takeover_delay: 4_032,
        }
    }

    /// Lifetime applied to entries created while connecting block `height`.
    pub fn expiration_time(&self, height: Height) -> Height {
        if height < self.extended_expiration_fork_height {
            self.original_expiration_time
        } else {
            self.extended_expiration_time
        }
    }

    /// Distance every pending expiration moves when the fork activates.
    pub fn expiration_extension(&self) -> Height {
        self.extended_expiration_time
            .saturating_sub(self.original_expiration_time)
    }
}
