// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Dispatch strategies for the per-miner batcher.
//!
//! A [`Processor`] bundles the actual dispatch with the four policies the
//! batcher needs: the batch-full watermark, batch enablement, the deadline
//! timer and the expiration check. The batcher is a generic scheduler; it
//! neither knows nor cares whether it is flushing pre-commits or
//! prove-commits.

mod precommit;
mod prove;

pub use precommit::PreCommitProcessor;
pub use prove::CommitProcessor;

use std::pin::Pin;

use ahash::HashSet;
use async_trait::async_trait;
use fvm_shared::{ActorID, address::Address};
use tokio::time::Sleep;
use tracing::warn;

use crate::api::SectorStateManager;
use crate::error::Result;
use crate::sector::{SectorId, SectorState};

#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Buffered-sector watermark at which the batcher flushes everything.
    fn threshold(&self, mid: ActorID) -> usize;

    /// Whether the batched/aggregated message form is allowed for this
    /// miner. When disabled the batcher flushes on every event and the
    /// processor dispatches each sector individually.
    fn enable_batch(&self, mid: ActorID) -> bool;

    /// A fresh one-shot timer expiring after the miner's configured check
    /// interval.
    fn check_after(&self, mid: ActorID) -> Pin<Box<Sleep>>;

    /// The subset of `sectors` whose epoch-age exceeds the miner's wait
    /// budget and which must be dispatched now.
    async fn expire(
        &self,
        sectors: &[SectorState],
        mid: ActorID,
    ) -> anyhow::Result<HashSet<SectorId>>;

    /// Dispatches the batch. Successful sectors get their outbound message
    /// id stamped into `message_info`; per-sector failures leave it
    /// untouched. The updated states are reflected into the sector store
    /// before returning, even when the dispatch itself failed.
    async fn process(
        &self,
        sectors: Vec<SectorState>,
        mid: ActorID,
        ctrl_addr: Address,
    ) -> Result<()>;
}

/// Persists the outbound message ids after a dispatch attempt. Best-effort:
/// a store failure is logged and swallowed so that a flaky store never fails
/// an otherwise successful dispatch.
pub(crate) async fn reflect_sectors(smgr: &dyn SectorStateManager, sectors: &[SectorState]) {
    for sector in sectors {
        if let Err(e) = smgr.update(sector).await {
            warn!(sector = %sector.id, "persist sector state: {e:#}");
        }
    }
}
