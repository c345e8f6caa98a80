// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Prove-commit dispatch: sends one `ProveCommitSector` message per sector,
//! or aggregates the seal proofs of a whole batch into a single SNARK and
//! sends one `ProveCommitAggregate` message.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use ahash::{HashMap, HashSet};
use async_trait::async_trait;
use fvm_ipld_encoding::RawBytes;
use fvm_shared::{
    ActorID,
    address::Address,
    econ::TokenAmount,
    sector::{AggregateSealVerifyInfo, RegisteredAggregateProof, RegisteredSealProof, SectorNumber},
};
use num_traits::Zero;
use tokio::task::JoinSet;
use tokio::time::Sleep;
use tracing::{error, info, warn};

use crate::api::{AggregateSealRequest, MessagerApi, Prover, SealingApi, SectorStateManager};
use crate::config::SafeConfig;
use crate::error::{Error, Result};
use crate::message::{BitField, Method, ProveCommitAggregateParams, ProveCommitSectorParams, push_message};
use crate::policy;
use crate::processor::{Processor, reflect_sectors};
use crate::sector::{SectorId, SectorState};

pub struct CommitProcessor {
    api: Arc<dyn SealingApi>,
    messager: Arc<dyn MessagerApi>,
    smgr: Arc<dyn SectorStateManager>,
    prover: Arc<dyn Prover>,
    config: SafeConfig,
}

impl CommitProcessor {
    pub fn new(
        api: Arc<dyn SealingApi>,
        messager: Arc<dyn MessagerApi>,
        smgr: Arc<dyn SectorStateManager>,
        prover: Arc<dyn Prover>,
        config: SafeConfig,
    ) -> Self {
        CommitProcessor {
            api,
            messager,
            smgr,
            prover,
            config,
        }
    }

    async fn process_individually(&self, sectors: &mut [SectorState], from: Address, mid: ActorID) {
        let spec = self.config.miner_config(mid).commitment.prove.msg_spec();

        let mut tasks = JoinSet::new();
        for (idx, sector) in sectors.iter().enumerate() {
            let api = self.api.clone();
            let messager = self.messager.clone();
            let spec = spec.clone();
            let sector = sector.clone();
            tasks.spawn(async move {
                let Some(proof) = sector.proof.as_ref() else {
                    error!(sector = %sector.id, "no proof to commit");
                    return None;
                };
                let params = ProveCommitSectorParams {
                    sector_number: sector.id.number,
                    proof: RawBytes::new(proof.proof.clone()),
                };
                let enc = match fvm_ipld_encoding::to_vec(&params) {
                    Ok(enc) => enc,
                    Err(e) => {
                        error!(sector = %sector.id, "serialize prove-commit params: {e}");
                        return None;
                    }
                };
                let tok = match api.chain_head().await {
                    Ok((tok, _)) => tok,
                    Err(e) => {
                        error!(sector = %sector.id, "get chain head: {e:#}");
                        return None;
                    }
                };
                let collateral = match api
                    .prove_commit_collateral(mid, sector.id.number, &tok)
                    .await
                {
                    Ok(collateral) => collateral,
                    Err(e) => {
                        error!(sector = %sector.id, "get sector collateral: {e:#}");
                        return None;
                    }
                };
                match push_message(
                    &*messager,
                    from,
                    mid,
                    collateral,
                    Method::ProveCommitSector,
                    enc,
                    spec,
                )
                .await
                {
                    Ok(msg_id) => {
                        info!(sector = %sector.id, msg = %msg_id, "prove-commit message pushed");
                        Some((idx, msg_id))
                    }
                    Err(e) => {
                        error!(sector = %sector.id, "push prove-commit message: {e}");
                        None
                    }
                }
            });
        }

        while let Some(res) = tasks.join_next().await {
            if let Ok(Some((idx, msg_id))) = res {
                sectors[idx].message_info.commit_msg = Some(msg_id);
            }
        }
    }

    async fn dispatch(
        &self,
        sectors: &mut [SectorState],
        mid: ActorID,
        ctrl_addr: Address,
    ) -> Result<()> {
        if !self.enable_batch(mid) || sectors.len() < policy::MIN_AGGREGATED_SECTORS {
            self.process_individually(sectors, ctrl_addr, mid).await;
            return Ok(());
        }

        let (tok, _) = self.api.chain_head().await.map_err(Error::ChainQuery)?;

        // (seal proof type, proof bytes) per sector number, for aligning the
        // proof array with the sorted infos below
        let mut by_number: HashMap<SectorNumber, (RegisteredSealProof, Vec<u8>)> =
            HashMap::default();
        let mut infos = Vec::with_capacity(sectors.len());
        let mut failed: HashSet<SectorId> = HashSet::default();
        let mut collateral = TokenAmount::zero();

        for sector in sectors.iter() {
            let parts = sector
                .ticket
                .as_ref()
                .zip(sector.seed.as_ref())
                .zip(sector.pre.as_ref())
                .zip(sector.proof.as_ref());
            let (((ticket, seed), pre), proof) = match parts {
                Some(parts) => parts,
                None => {
                    error!(sector = %sector.id, "sector not ready for prove-commit");
                    failed.insert(sector.id);
                    continue;
                }
            };

            let sc = match self
                .api
                .prove_commit_collateral(mid, sector.id.number, &tok)
                .await
            {
                Ok(sc) => sc,
                Err(e) => {
                    error!(sector = %sector.id, "get sector collateral: {e:#}");
                    failed.insert(sector.id);
                    continue;
                }
            };
            collateral += sc;

            by_number.insert(
                sector.id.number,
                (sector.sector_type, proof.proof.clone()),
            );
            infos.push(AggregateSealVerifyInfo {
                sector_number: sector.id.number,
                randomness: ticket.ticket.clone(),
                interactive_randomness: seed.seed.clone(),
                sealed_cid: pre.comm_r,
                unsealed_cid: pre.comm_d,
            });
        }

        if infos.is_empty() {
            warn!(miner = mid, "no usable sectors in aggregate batch");
            return Ok(());
        }

        // The on-chain verifier checks the aggregate against the bitfield in
        // ascending sector-number order; infos and proofs must both follow it.
        infos.sort_by_key(|i| i.sector_number);

        let mut sector_numbers = BitField::new();
        let mut proofs = Vec::with_capacity(infos.len());
        for info in &infos {
            sector_numbers.set(info.sector_number);
            proofs.push(by_number[&info.sector_number].1.clone());
        }

        let seal_proof = by_number[&infos[0].sector_number].0;
        let aggregate_proof = self
            .prover
            .aggregate_seal_proofs(
                AggregateSealRequest {
                    miner: mid,
                    seal_proof,
                    aggregate_proof_type: RegisteredAggregateProof::SnarkPackV1,
                    infos,
                },
                proofs,
            )
            .await
            .map_err(Error::Prover)?;

        let params = ProveCommitAggregateParams {
            sector_numbers,
            aggregate_proof: RawBytes::new(aggregate_proof),
        };
        let enc = fvm_ipld_encoding::to_vec(&params)?;

        let spec = self.config.miner_config(mid).commitment.prove.msg_spec();
        let msg_id = push_message(
            &*self.messager,
            ctrl_addr,
            mid,
            collateral,
            Method::ProveCommitAggregate,
            enc,
            spec,
        )
        .await?;

        for sector in sectors.iter_mut() {
            if !failed.contains(&sector.id) {
                sector.message_info.commit_msg = Some(msg_id.clone());
            }
        }
        info!(miner = mid, msg = %msg_id, count = sectors.len() - failed.len(), "prove-commit aggregate pushed");
        Ok(())
    }
}

#[async_trait]
impl Processor for CommitProcessor {
    fn threshold(&self, mid: ActorID) -> usize {
        self.config
            .miner_config(mid)
            .commitment
            .prove
            .batch
            .threshold
    }

    fn enable_batch(&self, mid: ActorID) -> bool {
        self.config.miner_config(mid).commitment.prove.batch.enabled
    }

    fn check_after(&self, mid: ActorID) -> Pin<Box<Sleep>> {
        let interval = self
            .config
            .miner_config(mid)
            .commitment
            .prove
            .batch
            .check_interval;
        Box::pin(tokio::time::sleep(interval))
    }

    // A prove-commit ages from its interactive seed, not the ticket: the
    // ticket may be arbitrarily old by the time the seed arrives. Sectors
    // without a seed never expire.
    async fn expire(
        &self,
        sectors: &[SectorState],
        mid: ActorID,
    ) -> anyhow::Result<HashSet<SectorId>> {
        let max_wait = self
            .config
            .miner_config(mid)
            .commitment
            .prove
            .batch
            .max_wait;
        let max_wait_epochs = policy::max_wait_epochs(max_wait);
        let (_, height) = self.api.chain_head().await?;
        Ok(sectors
            .iter()
            .filter(|s| matches!(&s.seed, Some(seed) if height - seed.epoch > max_wait_epochs))
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
        info!(proc = "prove", miner = mid, ctrl = %ctrl_addr, count = sectors.len(), "processing sectors");

        let res = self.dispatch(&mut sectors, mid, ctrl_addr).await;
        reflect_sectors(&*self.smgr, &sectors).await;

        info!(proc = "prove", miner = mid, elapsed = ?started.elapsed(), "finished processing");
        res
    }
}
