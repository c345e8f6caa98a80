// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-miner commitment batcher.
//!
//! A [`Batcher`] owns a single coordinator task that multiplexes four event
//! sources (new submissions, the deadline tick, the operator force signal,
//! cancellation) and decides when to hand the buffered sectors to its
//! [`Processor`]. Dispatches run as separate tasks, concurrent with the
//! event loop and with each other; a sector is removed from the buffer
//! before its dispatch starts, so it can appear in at most one in-flight
//! dispatch until it is re-submitted.

use std::sync::Arc;

use fvm_shared::{ActorID, address::Address};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::processor::Processor;
use crate::sector::SectorState;

pub struct Batcher {
    sector_tx: flume::Sender<SectorState>,
    force_tx: flume::Sender<()>,
    handle: JoinHandle<()>,
}

impl Batcher {
    pub fn new(
        token: CancellationToken,
        mid: ActorID,
        ctrl_addr: Address,
        processor: Arc<dyn Processor>,
    ) -> Self {
        let (sector_tx, sector_rx) = flume::unbounded();
        let (force_tx, force_rx) = flume::bounded(1);
        let handle = tokio::spawn(run(token, mid, ctrl_addr, processor, sector_rx, force_rx));
        Batcher {
            sector_tx,
            force_tx,
            handle,
        }
    }

    /// Hands a sector to the coordinator. Never blocks on I/O; fails only
    /// after the batcher has shut down.
    pub fn add(&self, sector: SectorState) -> anyhow::Result<()> {
        self.sector_tx
            .send(sector)
            .map_err(|_| anyhow::anyhow!("batcher is shut down"))
    }

    /// Requests a flush of everything buffered. Coalesces with a force that
    /// is already queued.
    pub fn force(&self) {
        let _ = self.force_tx.try_send(());
    }

    /// Waits until the coordinator has drained its in-flight dispatches and
    /// stopped. Call after cancelling the token handed to [`Batcher::new`].
    pub async fn wait_stop(self) {
        if let Err(e) = self.handle.await {
            error!("batcher coordinator failed: {e}");
        }
    }
}

async fn run(
    token: CancellationToken,
    mid: ActorID,
    ctrl_addr: Address,
    processor: Arc<dyn Processor>,
    sector_rx: flume::Receiver<SectorState>,
    force_rx: flume::Receiver<()>,
) {
    let mut timer = processor.check_after(mid);
    let mut dispatches = JoinSet::new();

    let mut pending_cap = processor.threshold(mid);
    if pending_cap > 128 {
        pending_cap /= 4;
    }
    let mut pending: Vec<SectorState> = Vec::with_capacity(pending_cap);

    loop {
        let mut tick = false;
        let mut manual = false;

        tokio::select! {
            _ = token.cancelled() => break,
            res = force_rx.recv_async() => match res {
                Ok(()) => manual = true,
                Err(_) => break,
            },
            _ = timer.as_mut() => tick = true,
            res = sector_rx.recv_async() => match res {
                Ok(sector) => pending.push(sector),
                Err(_) => break,
            },
        }

        let full = pending.len() >= processor.threshold(mid);
        let mut clean_all = false;
        if !pending.is_empty() {
            let mut process_list = Vec::new();
            if full || manual || !processor.enable_batch(mid) {
                info!(miner = mid, count = pending.len(), "sending all pending sectors");
                process_list = std::mem::take(&mut pending);
                clean_all = true;
            } else if tick {
                debug!(miner = mid, count = pending.len(), "deadline check");
                match processor.expire(&pending, mid).await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(miner = mid, count = expired.len(), "sending sectors close to their deadline");
                        let mut remain = Vec::with_capacity(pending.len());
                        for sector in std::mem::take(&mut pending) {
                            if expired.contains(&sector.id) {
                                process_list.push(sector);
                            } else {
                                remain.push(sector);
                            }
                        }
                        pending = remain;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(miner = mid, "check expired sectors: {e:#}"),
                }
            }

            // upstream may re-submit a sector that is already buffered; the
            // first occurrence wins
            let process_list = dedup_by_id(process_list);
            if !process_list.is_empty() {
                let processor = processor.clone();
                dispatches.spawn(async move {
                    if let Err(e) = processor.process(process_list, mid, ctrl_addr).await {
                        error!(miner = mid, "process failed: {e}");
                    }
                });
            }
        }

        if tick || clean_all {
            timer = processor.check_after(mid);
        }
    }

    // every spawned dispatch is awaited before the batcher reports stopped
    while dispatches.join_next().await.is_some() {}
}

fn dedup_by_id(list: Vec<SectorState>) -> Vec<SectorState> {
    let mut seen = ahash::HashSet::default();
    list.into_iter().filter(|s| seen.insert(s.id)).collect()
}
