// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Routing of sector submissions to per-miner batchers.
//!
//! Batchers are keyed by `(miner, control address)`: different control
//! addresses pay gas from different accounts and are nonced independently,
//! so their sectors must never share a batch message.

use std::fmt;
use std::sync::Arc;

use ahash::HashMap;
use anyhow::{Context, bail};
use fvm_shared::{ActorID, address::Address};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{MessagerApi, Prover, SealingApi, SectorStateManager};
use crate::batcher::Batcher;
use crate::config::{CommitPolicyConfig, SafeConfig};
use crate::processor::{CommitProcessor, PreCommitProcessor, Processor};
use crate::sector::SectorState;

/// Which of the two commitment messages a registry dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Pre,
    Prove,
}

impl CommitKind {
    fn policy(self, config: &SafeConfig, mid: ActorID) -> CommitPolicyConfig {
        let commitment = config.miner_config(mid).commitment;
        match self {
            CommitKind::Pre => commitment.pre,
            CommitKind::Prove => commitment.prove,
        }
    }
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommitKind::Pre => "pre",
            CommitKind::Prove => "prove",
        })
    }
}

/// Lazily-populated map of batchers for one commitment message type.
pub struct BatcherRegistry {
    kind: CommitKind,
    config: SafeConfig,
    processor: Arc<dyn Processor>,
    token: CancellationToken,
    batchers: Mutex<HashMap<(ActorID, Address), Batcher>>,
}

impl BatcherRegistry {
    pub fn new(
        kind: CommitKind,
        config: SafeConfig,
        processor: Arc<dyn Processor>,
        token: CancellationToken,
    ) -> Self {
        BatcherRegistry {
            kind,
            config,
            processor,
            token,
            batchers: Mutex::new(HashMap::default()),
        }
    }

    /// Routes a sector to the batcher for its miner's configured control
    /// address, creating the batcher on first use.
    pub fn submit(&self, sector: SectorState) -> anyhow::Result<()> {
        let mid = sector.id.miner;
        let Some(ctrl_addr) = self.kind.policy(&self.config, mid).sender else {
            bail!("no {} commitment sender configured for miner {mid}", self.kind);
        };

        let mut batchers = self.batchers.lock();
        let batcher = batchers.entry((mid, ctrl_addr)).or_insert_with(|| {
            info!(kind = %self.kind, miner = mid, ctrl = %ctrl_addr, "starting batcher");
            Batcher::new(
                self.token.child_token(),
                mid,
                ctrl_addr,
                self.processor.clone(),
            )
        });
        batcher
            .add(sector)
            .with_context(|| format!("submit to {} batcher of miner {mid}", self.kind))
    }

    /// Signals the batcher for `(mid, ctrl_addr)` to flush everything.
    /// Returns false when no such batcher is running.
    pub fn force(&self, mid: ActorID, ctrl_addr: Address) -> bool {
        let batchers = self.batchers.lock();
        match batchers.get(&(mid, ctrl_addr)) {
            Some(batcher) => {
                batcher.force();
                true
            }
            None => false,
        }
    }

    /// Cancels every batcher and waits for their in-flight dispatches.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let drained: Vec<Batcher> = {
            let mut batchers = self.batchers.lock();
            batchers.drain().map(|(_, batcher)| batcher).collect()
        };
        for batcher in drained {
            batcher.wait_stop().await;
        }
    }
}

/// The engine's top-level entry point: one registry per commitment message
/// type, sharing the external collaborators and configuration.
pub struct CommitmentManager {
    pre: BatcherRegistry,
    prove: BatcherRegistry,
    token: CancellationToken,
}

impl CommitmentManager {
    pub fn new(
        api: Arc<dyn SealingApi>,
        messager: Arc<dyn MessagerApi>,
        smgr: Arc<dyn SectorStateManager>,
        prover: Arc<dyn Prover>,
        config: SafeConfig,
    ) -> Self {
        let token = CancellationToken::new();
        let pre_processor = Arc::new(PreCommitProcessor::new(
            api.clone(),
            messager.clone(),
            smgr.clone(),
            config.clone(),
        ));
        let prove_processor = Arc::new(CommitProcessor::new(
            api,
            messager,
            smgr,
            prover,
            config.clone(),
        ));
        CommitmentManager {
            pre: BatcherRegistry::new(
                CommitKind::Pre,
                config.clone(),
                pre_processor,
                token.child_token(),
            ),
            prove: BatcherRegistry::new(
                CommitKind::Prove,
                config,
                prove_processor,
                token.child_token(),
            ),
            token,
        }
    }

    pub fn submit_pre_commit(&self, sector: SectorState) -> anyhow::Result<()> {
        self.pre.submit(sector)
    }

    pub fn submit_prove_commit(&self, sector: SectorState) -> anyhow::Result<()> {
        self.prove.submit(sector)
    }

    pub fn force_pre_commit(&self, mid: ActorID, ctrl_addr: Address) -> bool {
        self.pre.force(mid, ctrl_addr)
    }

    pub fn force_prove_commit(&self, mid: ActorID, ctrl_addr: Address) -> bool {
        self.prove.force(mid, ctrl_addr)
    }

    pub async fn shutdown(&self) {
        self.token.cancel();
        self.pre.shutdown().await;
        self.prove.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MinerConfig};
    use crate::message::Method;
    use crate::sector::SectorId;
    use crate::test_utils::*;
    use fvm_shared::MethodNum;
    use std::time::Duration;

    const MINER: ActorID = 1000;

    fn config_with_sender(mid: ActorID, sender: Address) -> SafeConfig {
        let mut mc = MinerConfig::new(mid);
        mc.commitment.pre.sender = Some(sender);
        mc.commitment.prove.sender = Some(sender);
        SafeConfig::new(Config { miners: vec![mc] })
    }

    fn stub_registry(config: SafeConfig) -> BatcherRegistry {
        let stub = Arc::new(StubProcessor::new(100, true, Duration::from_secs(3600)));
        BatcherRegistry::new(CommitKind::Pre, config, stub, CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_share_one_batcher_per_key() {
        let registry = stub_registry(config_with_sender(MINER, Address::new_id(999)));

        registry.submit(bare_sector(MINER, 1)).unwrap();
        registry.submit(bare_sector(MINER, 2)).unwrap();
        assert_eq!(registry.batchers.lock().len(), 1);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn changing_the_sender_starts_a_new_batcher() {
        let config = config_with_sender(MINER, Address::new_id(999));
        let registry = stub_registry(config.clone());

        registry.submit(bare_sector(MINER, 1)).unwrap();
        config.modify(|c| c.miners[0].commitment.pre.sender = Some(Address::new_id(998)));
        registry.submit(bare_sector(MINER, 2)).unwrap();

        assert_eq!(registry.batchers.lock().len(), 2);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_without_sender_is_rejected() {
        let registry = stub_registry(SafeConfig::new(Config::default()));
        let err = registry.submit(bare_sector(MINER, 1)).unwrap_err();
        assert!(err.to_string().contains("no pre commitment sender"));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn force_reaches_only_existing_batchers() {
        let registry = stub_registry(config_with_sender(MINER, Address::new_id(999)));
        assert!(!registry.force(MINER, Address::new_id(999)));

        registry.submit(bare_sector(MINER, 1)).unwrap();
        assert!(registry.force(MINER, Address::new_id(999)));
        assert!(!registry.force(MINER, Address::new_id(998)));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manager_dispatches_both_message_types() {
        let chain = Arc::new(MockChain::new(500));
        let messager = Arc::new(MockMessager::default());
        let smgr = Arc::new(MemSectorStore::default());
        let prover = Arc::new(MockProver::default());
        // batching disabled by default: every submission flushes immediately
        // through the individual paths
        let manager = CommitmentManager::new(
            chain,
            messager.clone(),
            smgr.clone(),
            prover,
            config_with_sender(MINER, Address::new_id(999)),
        );

        manager.submit_pre_commit(ready_sector(MINER, 1)).unwrap();
        manager.submit_prove_commit(ready_sector(MINER, 2)).unwrap();

        wait_for(|| messager.pushed().len() == 2).await;
        manager.shutdown().await;

        let mut methods: Vec<MethodNum> = messager
            .pushed()
            .iter()
            .map(|(msg, _, _)| msg.method_num)
            .collect();
        methods.sort_unstable();
        assert_eq!(
            methods,
            vec![
                Method::PreCommitSector as MethodNum,
                Method::ProveCommitSector as MethodNum,
            ]
        );
        assert!(smgr
            .get(SectorId::new(MINER, 1))
            .unwrap()
            .message_info
            .pre_commit_msg
            .is_some());
        assert!(smgr
            .get(SectorId::new(MINER, 2))
            .unwrap()
            .message_info
            .commit_msg
            .is_some());
    }
}
