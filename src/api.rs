// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Contracts the engine consumes from external collaborators: the chain RPC,
//! the messaging service, the proof aggregator and the sector state store.
//!
//! The engine never signs, broadcasts or retries messages itself; the
//! messaging service owns nonce ordering and resubmission. All boundary
//! methods return `anyhow::Result` and are mapped onto the engine's error
//! taxonomy at the call sites.

use async_trait::async_trait;
use fvm_shared::{
    ActorID,
    clock::ChainEpoch,
    econ::TokenAmount,
    message::Message,
    sector::{
        AggregateSealVerifyInfo, RegisteredAggregateProof, RegisteredSealProof, SectorNumber,
    },
};

use crate::message::SectorPreCommitInfo;
use crate::sector::{MessageId, SectorState};

/// Opaque chain-head reference used to pin collateral and deposit queries to
/// a single state.
pub type ChainToken = Vec<u8>;

/// Chain queries needed while building commitment messages.
#[async_trait]
pub trait SealingApi: Send + Sync {
    /// Current head as an opaque token plus its height.
    async fn chain_head(&self) -> anyhow::Result<(ChainToken, ChainEpoch)>;

    /// Deposit required to pre-commit the described sector, at the given
    /// head.
    async fn pre_commit_deposit(
        &self,
        mid: ActorID,
        params: &SectorPreCommitInfo,
        tok: &ChainToken,
    ) -> anyhow::Result<TokenAmount>;

    /// Collateral required to prove-commit the sector, at the given head.
    async fn prove_commit_collateral(
        &self,
        mid: ActorID,
        number: SectorNumber,
        tok: &ChainToken,
    ) -> anyhow::Result<TokenAmount>;
}

/// Per-message knobs handed to the messaging service.
#[derive(Debug, Clone, PartialEq)]
pub struct MsgSpec {
    pub gas_over_estimation: f64,
    pub max_fee_cap: TokenAmount,
}

/// The external messaging service. It signs, nonces and broadcasts the
/// message and returns a durable id.
#[async_trait]
pub trait MessagerApi: Send + Sync {
    async fn push_message(&self, msg: Message, spec: MsgSpec) -> anyhow::Result<MessageId>;
}

/// Request for aggregating the seal proofs of one miner's sectors into a
/// single SNARK.
#[derive(Debug, Clone)]
pub struct AggregateSealRequest {
    pub miner: ActorID,
    /// Seal proof type shared by every sector in the batch.
    pub seal_proof: RegisteredSealProof,
    pub aggregate_proof_type: RegisteredAggregateProof,
    /// Verification infos, sorted ascending by sector number. The on-chain
    /// verifier is order-sensitive; `proofs[i]` must belong to `infos[i]`.
    pub infos: Vec<AggregateSealVerifyInfo>,
}

#[async_trait]
pub trait Prover: Send + Sync {
    async fn aggregate_seal_proofs(
        &self,
        request: AggregateSealRequest,
        proofs: Vec<Vec<u8>>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Persistence for sector state. Only the outbound `message_info` fields are
/// ever changed by the engine; the store serializes concurrent writes to the
/// same sector internally.
#[async_trait]
pub trait SectorStateManager: Send + Sync {
    async fn update(&self, sector: &SectorState) -> anyhow::Result<()>;
}
