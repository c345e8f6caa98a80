// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use crate::sector::SectorId;

/// Commitment engine error.
///
/// The per-sector kinds ([`Error::ParamsBuild`], [`Error::ChainQuery`] while
/// collecting a batch) only ever exclude the affected sector; the remaining
/// kinds fail the whole `process` call. The engine never retries: a failed
/// dispatch surfaces here and the sectors must be re-submitted upstream.
#[derive(Debug, Error)]
pub enum Error {
    /// Message params could not be built for a sector, usually because the
    /// sealing pipeline has not produced the required randomness or
    /// commitments yet.
    #[error("build params for sector {0}: {1}")]
    ParamsBuild(SectorId, String),
    /// A chain RPC query failed.
    #[error("chain query failed: {0}")]
    ChainQuery(#[source] anyhow::Error),
    /// Proof aggregation failed; fatal for the whole aggregate dispatch.
    #[error("aggregate seal proofs failed: {0}")]
    Prover(#[source] anyhow::Error),
    /// Message params could not be serialized.
    #[error(transparent)]
    Serialization(#[from] fvm_ipld_encoding::Error),
    /// The messaging service rejected the push; the batch is not re-queued.
    #[error("push message failed: {0}")]
    MessagerPush(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
