// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Scripted collaborators shared by the engine tests.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use ahash::{HashMap, HashSet};
use anyhow::bail;
use async_trait::async_trait;
use cid::Cid;
use fvm_shared::{
    ActorID,
    address::Address,
    clock::ChainEpoch,
    econ::TokenAmount,
    message::Message,
    randomness::Randomness,
    sector::{RegisteredSealProof, SectorNumber},
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Sleep;

use crate::api::{
    AggregateSealRequest, ChainToken, MessagerApi, MsgSpec, Prover, SealingApi, SectorStateManager,
};
use crate::message::SectorPreCommitInfo;
use crate::processor::Processor;
use crate::sector::{
    MessageId, SectorId, SectorPreCommitted, SectorProof, SectorState, Seed, Ticket,
};

/// Chain stub with a settable head; deposits cost `number` attoFIL and
/// collaterals `100 * number`, so sums are easy to assert on.
pub struct MockChain {
    height: Mutex<ChainEpoch>,
    fail_deposit: Mutex<HashSet<SectorNumber>>,
    fail_collateral: Mutex<HashSet<SectorNumber>>,
}

impl MockChain {
    pub fn new(height: ChainEpoch) -> Self {
        MockChain {
            height: Mutex::new(height),
            fail_deposit: Mutex::new(HashSet::default()),
            fail_collateral: Mutex::new(HashSet::default()),
        }
    }

    pub fn fail_deposit(&self, number: SectorNumber) {
        self.fail_deposit.lock().insert(number);
    }

    pub fn fail_collateral(&self, number: SectorNumber) {
        self.fail_collateral.lock().insert(number);
    }
}

#[async_trait]
impl SealingApi for MockChain {
    async fn chain_head(&self) -> anyhow::Result<(ChainToken, ChainEpoch)> {
        let height = *self.height.lock();
        Ok((height.to_be_bytes().to_vec(), height))
    }

    async fn pre_commit_deposit(
        &self,
        _mid: ActorID,
        params: &SectorPreCommitInfo,
        _tok: &ChainToken,
    ) -> anyhow::Result<TokenAmount> {
        if self.fail_deposit.lock().contains(&params.sector_number) {
            bail!("deposit query failed for sector {}", params.sector_number);
        }
        Ok(TokenAmount::from_atto(params.sector_number))
    }

    async fn prove_commit_collateral(
        &self,
        _mid: ActorID,
        number: SectorNumber,
        _tok: &ChainToken,
    ) -> anyhow::Result<TokenAmount> {
        if self.fail_collateral.lock().contains(&number) {
            bail!("collateral query failed for sector {number}");
        }
        Ok(TokenAmount::from_atto(100 * number))
    }
}

/// Recording messager handing out sequential `msg-N` ids.
#[derive(Default)]
pub struct MockMessager {
    pushed: Mutex<Vec<(Message, MsgSpec, MessageId)>>,
    next_id: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MockMessager {
    pub fn pushed(&self) -> Vec<(Message, MsgSpec, MessageId)> {
        self.pushed.lock().clone()
    }

    pub fn fail_next_pushes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagerApi for MockMessager {
    async fn push_message(&self, msg: Message, spec: MsgSpec) -> anyhow::Result<MessageId> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            bail!("messager unavailable");
        }
        let id = MessageId(format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.pushed.lock().push((msg, spec, id.clone()));
        Ok(id)
    }
}

#[derive(Default)]
pub struct MockProver {
    calls: Mutex<Vec<(AggregateSealRequest, Vec<Vec<u8>>)>>,
    fail: AtomicBool,
}

impl MockProver {
    pub fn calls(&self) -> Vec<(AggregateSealRequest, Vec<Vec<u8>>)> {
        self.calls.lock().clone()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Prover for MockProver {
    async fn aggregate_seal_proofs(
        &self,
        request: AggregateSealRequest,
        proofs: Vec<Vec<u8>>,
    ) -> anyhow::Result<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("aggregation failed");
        }
        self.calls.lock().push((request, proofs));
        Ok(vec![0xa6; 32])
    }
}

/// In-memory sector store keyed by sector id.
#[derive(Default)]
pub struct MemSectorStore {
    sectors: Mutex<HashMap<SectorId, SectorState>>,
    fail: AtomicBool,
}

impl MemSectorStore {
    pub fn get(&self, id: SectorId) -> Option<SectorState> {
        self.sectors.lock().get(&id).cloned()
    }

    pub fn fail_updates(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SectorStateManager for MemSectorStore {
    async fn update(&self, sector: &SectorState) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        self.sectors.lock().insert(sector.id, sector.clone());
        Ok(())
    }
}

/// Scripted [`Processor`] for driving the batcher directly.
pub struct StubProcessor {
    threshold: usize,
    enable_batch: AtomicBool,
    check_interval: Duration,
    expired: Mutex<HashSet<SectorId>>,
    expire_fails: AtomicBool,
    started: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    processed: Mutex<Vec<Vec<SectorId>>>,
}

impl StubProcessor {
    pub fn new(threshold: usize, enable_batch: bool, check_interval: Duration) -> Self {
        StubProcessor {
            threshold,
            enable_batch: AtomicBool::new(enable_batch),
            check_interval,
            expired: Mutex::new(HashSet::default()),
            expire_fails: AtomicBool::new(false),
            started: AtomicUsize::new(0),
            gate: Mutex::new(None),
            processed: Mutex::new(Vec::new()),
        }
    }

    /// Scripts which sector ids the next expiration checks return.
    pub fn set_expired(&self, ids: impl IntoIterator<Item = SectorId>) {
        *self.expired.lock() = ids.into_iter().collect();
    }

    pub fn fail_expire(&self, fail: bool) {
        self.expire_fails.store(fail, Ordering::SeqCst);
    }

    /// Blocks every subsequent `process` call until the returned handle is
    /// notified.
    pub fn gated(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn ungate(&self) {
        *self.gate.lock() = None;
    }

    /// Number of `process` calls that have started (including gated ones).
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Completed dispatches, in completion order.
    pub fn processed(&self) -> Vec<Vec<SectorId>> {
        self.processed.lock().clone()
    }
}

#[async_trait]
impl Processor for StubProcessor {
    fn threshold(&self, _mid: ActorID) -> usize {
        self.threshold
    }

    fn enable_batch(&self, _mid: ActorID) -> bool {
        self.enable_batch.load(Ordering::SeqCst)
    }

    fn check_after(&self, _mid: ActorID) -> Pin<Box<Sleep>> {
        Box::pin(tokio::time::sleep(self.check_interval))
    }

    async fn expire(
        &self,
        sectors: &[SectorState],
        _mid: ActorID,
    ) -> anyhow::Result<HashSet<SectorId>> {
        if self.expire_fails.load(Ordering::SeqCst) {
            bail!("expiration check unavailable");
        }
        let expired = self.expired.lock();
        Ok(sectors
            .iter()
            .filter(|s| expired.contains(&s.id))
            .map(|s| s.id)
            .collect())
    }

    async fn process(
        &self,
        sectors: Vec<SectorState>,
        _mid: ActorID,
        _ctrl_addr: Address,
    ) -> crate::error::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.processed
            .lock()
            .push(sectors.iter().map(|s| s.id).collect());
        Ok(())
    }
}

pub fn test_cid(seed: u8) -> Cid {
    let mh = cid::multihash::Multihash::<64>::wrap(0, &[seed; 8]).unwrap();
    Cid::new_v1(0x71, mh)
}

pub fn sector_proof_bytes(number: SectorNumber) -> Vec<u8> {
    vec![number as u8; 4]
}

/// A freshly submitted sector with nothing sealed yet.
pub fn bare_sector(miner: ActorID, number: SectorNumber) -> SectorState {
    SectorState::new(
        SectorId::new(miner, number),
        RegisteredSealProof::StackedDRG32GiBV1P1,
    )
}

/// A sector far enough through the sealing pipeline to build both message
/// types.
pub fn ready_sector(miner: ActorID, number: SectorNumber) -> SectorState {
    let mut sector = bare_sector(miner, number);
    sector.ticket = Some(Ticket {
        ticket: Randomness(vec![1; 32]),
        epoch: 10,
    });
    sector.seed = Some(Seed {
        seed: Randomness(vec![2; 32]),
        epoch: 20,
    });
    sector.pre = Some(SectorPreCommitted {
        comm_r: test_cid(number as u8),
        comm_d: test_cid((number as u8).wrapping_add(128)),
    });
    sector.proof = Some(SectorProof {
        proof: sector_proof_bytes(number),
    });
    sector
}

/// Polls `cond` until it holds, advancing the (possibly paused) clock.
pub async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was not reached in time");
}
