// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Pre-commit dispatch: builds `PreCommitSector` params per sector, sums the
//! required deposits and sends either one `PreCommitSectorBatch` message or
//! one message per sector.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use ahash::HashSet;
use async_trait::async_trait;
use fvm_shared::{ActorID, address::Address, econ::TokenAmount};
use num_traits::Zero;
use tokio::task::JoinSet;
use tokio::time::Sleep;
use tracing::{error, info};

use crate::api::{ChainToken, MessagerApi, SealingApi, SectorStateManager};
use crate::config::SafeConfig;
use crate::error::{Error, Result};
use crate::message::{Method, PreCommitSectorBatchParams, SectorPreCommitInfo, push_message};
use crate::policy;
use crate::processor::{Processor, reflect_sectors};
use crate::sector::{SectorId, SectorState};

/// One sector's contribution to a batch message.
struct PreCommitEntry {
    deposit: TokenAmount,
    pci: SectorPreCommitInfo,
}

pub struct PreCommitProcessor {
    api: Arc<dyn SealingApi>,
    messager: Arc<dyn MessagerApi>,
    smgr: Arc<dyn SectorStateManager>,
    config: SafeConfig,
}

impl PreCommitProcessor {
    pub fn new(
        api: Arc<dyn SealingApi>,
        messager: Arc<dyn MessagerApi>,
        smgr: Arc<dyn SectorStateManager>,
        config: SafeConfig,
    ) -> Self {
        PreCommitProcessor {
            api,
            messager,
            smgr,
            config,
        }
    }

    /// One message per sector. Per-sector failures are logged and isolated.
    async fn process_individually(&self, sectors: &mut [SectorState], from: Address, mid: ActorID) {
        let spec = self.config.miner_config(mid).commitment.pre.msg_spec();

        let mut tasks = JoinSet::new();
        for (idx, sector) in sectors.iter().enumerate() {
            let api = self.api.clone();
            let messager = self.messager.clone();
            let spec = spec.clone();
            let sector = sector.clone();
            tasks.spawn(async move {
                let (params, deposit, _) = match pre_commit_params(&*api, &sector).await {
                    Ok(built) => built,
                    Err(e) => {
                        error!(sector = %sector.id, "build pre-commit params: {e}");
                        return None;
                    }
                };
                let enc = match fvm_ipld_encoding::to_vec(&params) {
                    Ok(enc) => enc,
                    Err(e) => {
                        error!(sector = %sector.id, "serialize pre-commit params: {e}");
                        return None;
                    }
                };
                match push_message(
                    &*messager,
                    from,
                    mid,
                    deposit,
                    Method::PreCommitSector,
                    enc,
                    spec,
                )
                .await
                {
                    Ok(msg_id) => {
                        info!(sector = %sector.id, msg = %msg_id, "pre-commit message pushed");
                        Some((idx, msg_id))
                    }
                    Err(e) => {
                        error!(sector = %sector.id, "push pre-commit message: {e}");
                        None
                    }
                }
            });
        }

        while let Some(res) = tasks.join_next().await {
            if let Ok(Some((idx, msg_id))) = res {
                sectors[idx].message_info.pre_commit_msg = Some(msg_id);
            }
        }
    }

    async fn dispatch(
        &self,
        sectors: &mut [SectorState],
        mid: ActorID,
        ctrl_addr: Address,
    ) -> Result<()> {
        if !self.enable_batch(mid) {
            self.process_individually(sectors, ctrl_addr, mid).await;
            return Ok(());
        }

        let mut entries = Vec::with_capacity(sectors.len());
        let mut failed: HashSet<SectorId> = HashSet::default();
        for sector in sectors.iter() {
            match pre_commit_params(&*self.api, sector).await {
                Ok((pci, deposit, _)) => entries.push(PreCommitEntry { deposit, pci }),
                Err(e) => {
                    error!(sector = %sector.id, "build pre-commit params: {e}");
                    failed.insert(sector.id);
                }
            }
        }

        let mut params = PreCommitSectorBatchParams::default();
        let mut deposit = TokenAmount::zero();
        for entry in entries {
            params.sectors.push(entry.pci);
            deposit += entry.deposit;
        }

        let enc = fvm_ipld_encoding::to_vec(&params)?;
        let spec = self.config.miner_config(mid).commitment.pre.msg_spec();
        let msg_id = push_message(
            &*self.messager,
            ctrl_addr,
            mid,
            deposit,
            Method::PreCommitSectorBatch,
            enc,
            spec,
        )
        .await?;

        for sector in sectors.iter_mut() {
            if !failed.contains(&sector.id) {
                sector.message_info.pre_commit_msg = Some(msg_id.clone());
            }
        }
        info!(miner = mid, msg = %msg_id, count = params.sectors.len(), "pre-commit batch pushed");
        Ok(())
    }
}

#[async_trait]
impl Processor for PreCommitProcessor {
    fn threshold(&self, mid: ActorID) -> usize {
        self.config.miner_config(mid).commitment.pre.batch.threshold
    }

    fn enable_batch(&self, mid: ActorID) -> bool {
        self.config.miner_config(mid).commitment.pre.batch.enabled
    }

    fn check_after(&self, mid: ActorID) -> Pin<Box<Sleep>> {
        let interval = self
            .config
            .miner_config(mid)
            .commitment
            .pre
            .batch
            .check_interval;
        Box::pin(tokio::time::sleep(interval))
    }

    // A pre-commit ages from its ticket; the interactive seed does not exist
    // at this stage. Sectors without a ticket never expire.
    async fn expire(
        &self,
        sectors: &[SectorState],
        mid: ActorID,
    ) -> anyhow::Result<HashSet<SectorId>> {
        let max_wait = self.config.miner_config(mid).commitment.pre.batch.max_wait;
        let max_wait_epochs = policy::max_wait_epochs(max_wait);
        let (_, height) = self.api.chain_head().await?;
        Ok(sectors
            .iter()
            .filter(|s| matches!(&s.ticket, Some(t) if height - t.epoch > max_wait_epochs))
            .map(|s| s.id)
            .collect())
    }

    async fn process(
        &self,
        mut sectors: Vec<SectorState>,
        mid: ActorID,
        ctrl_addr: Address,
    ) -> Result<()> {
        let started = Instant::now();
        info!(proc = "pre", miner = mid, ctrl = %ctrl_addr, count = sectors.len(), "processing sectors");

        let res = self.dispatch(&mut sectors, mid, ctrl_addr).await;
        reflect_sectors(&*self.smgr, &sectors).await;

        info!(proc = "pre", miner = mid, elapsed = ?started.elapsed(), "finished processing");
        res
    }
}

/// Builds the pre-commit params for one sector and queries the deposit they
/// require, both pinned to the same chain head.
async fn pre_commit_params(
    api: &dyn SealingApi,
    sector: &SectorState,
) -> Result<(SectorPreCommitInfo, TokenAmount, ChainToken)> {
    let ticket = sector
        .ticket
        .as_ref()
        .ok_or_else(|| Error::ParamsBuild(sector.id, "no ticket".into()))?;
    let pre = sector
        .pre
        .as_ref()
        .ok_or_else(|| Error::ParamsBuild(sector.id, "no sealed commitments".into()))?;

    let (tok, height) = api.chain_head().await.map_err(Error::ChainQuery)?;

    let params = SectorPreCommitInfo {
        seal_proof: sector.sector_type,
        sector_number: sector.id.number,
        sealed_cid: pre.comm_r,
        seal_rand_epoch: ticket.epoch,
        deal_ids: sector.deal_ids.clone(),
        expiration: height + policy::MAX_PROVE_COMMIT_DURATION + policy::MIN_SECTOR_EXPIRATION,
        replace_capacity: false,
        replace_sector_deadline: 0,
        replace_sector_partition: 0,
        replace_sector_number: 0,
    };

    let deposit = api
        .pre_commit_deposit(sector.id.miner, &params, &tok)
        .await
        .map_err(Error::ChainQuery)?;

    Ok((params, deposit, tok))
}
