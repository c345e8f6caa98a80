// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Chain policy constants used by the commitment engine.

use std::time::Duration;

use fvm_shared::clock::ChainEpoch;

/// Duration of a chain epoch, fixed by the network.
pub const EPOCH_DURATION_SECONDS: u64 = 30;

/// Number of epochs in a day.
pub const EPOCHS_IN_DAY: ChainEpoch = (24 * 60 * 60 / EPOCH_DURATION_SECONDS) as ChainEpoch;

/// Minimum number of sectors for which prove-commit aggregation is attempted,
/// even when it is enabled. Below this the aggregate proof is more expensive
/// than individual messages.
pub const MIN_AGGREGATED_SECTORS: usize = 4;

/// Epochs between the pre-commit landing on chain and the interactive seed
/// becoming available.
pub const PRE_COMMIT_CHALLENGE_DELAY: ChainEpoch = 150;

/// Maximum epochs between a pre-commit and the corresponding prove-commit.
pub const MAX_PROVE_COMMIT_DURATION: ChainEpoch = EPOCHS_IN_DAY + PRE_COMMIT_CHALLENGE_DELAY;

/// Minimum commitment lifetime requested for a newly pre-committed sector.
pub const MIN_SECTOR_EXPIRATION: ChainEpoch = 180 * EPOCHS_IN_DAY;

/// Converts a wall-clock wait budget into epochs.
pub fn max_wait_epochs(max_wait: Duration) -> ChainEpoch {
    (max_wait.as_secs() / EPOCH_DURATION_SECONDS) as ChainEpoch
}
