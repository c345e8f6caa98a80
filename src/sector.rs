// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector state as seen by the commitment engine.
//!
//! A [`SectorState`] is a snapshot of a sector that is ready (or getting
//! ready) to be committed on-chain. The sealing pipeline fills in the
//! randomness commitments and the proof progressively; the engine only ever
//! mutates [`MessageInfo`], which records the outbound message ids of the
//! pre-commit and prove-commit dispatches.

use std::fmt;

use cid::Cid;
use fvm_shared::{
    ActorID,
    clock::ChainEpoch,
    deal::DealID,
    randomness::Randomness,
    sector::{RegisteredSealProof, SectorNumber},
};
use serde::{Deserialize, Serialize};

/// Globally unique sector identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[cfg_attr(test, derive(derive_quickcheck_arbitrary::Arbitrary))]
pub struct SectorId {
    pub miner: ActorID,
    pub number: SectorNumber,
}

impl SectorId {
    pub fn new(miner: ActorID, number: SectorNumber) -> Self {
        SectorId { miner, number }
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

/// Randomness bound at pre-commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket: Randomness,
    pub epoch: ChainEpoch,
}

/// Interactive randomness bound at prove-commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    pub seed: Randomness,
    pub epoch: ChainEpoch,
}

/// Outputs of the pre-commit phase of the sealing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorPreCommitted {
    /// Sealed sector commitment (`CommR`).
    pub comm_r: Cid,
    /// Unsealed data commitment (`CommD`).
    pub comm_d: Cid,
}

/// The zk-proof produced for a sector, present only at the prove stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorProof {
    pub proof: Vec<u8>,
}

/// Durable message id assigned by the messaging service.
///
/// This is not the message CID: the messager assigns ids before the final
/// (gas-estimated, nonced) message is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

/// Outbound message ids recorded by the engine after a dispatch attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub pre_commit_msg: Option<MessageId>,
    pub commit_msg: Option<MessageId>,
}

/// Immutable snapshot of a sector entering the engine via `submit`.
///
/// Optional fields follow the sealing lifecycle: a sector without a `ticket`
/// or `pre` cannot build pre-commit params yet, one without a `seed` or
/// `proof` cannot build prove-commit params. The processors surface those as
/// per-sector build errors rather than rejecting the submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorState {
    pub id: SectorId,
    pub sector_type: RegisteredSealProof,
    pub deal_ids: Vec<DealID>,
    pub ticket: Option<Ticket>,
    pub seed: Option<Seed>,
    pub pre: Option<SectorPreCommitted>,
    pub proof: Option<SectorProof>,
    pub message_info: MessageInfo,
}

impl SectorState {
    pub fn new(id: SectorId, sector_type: RegisteredSealProof) -> Self {
        SectorState {
            id,
            sector_type,
            deal_ids: Vec::new(),
            ticket: None,
            seed: None,
            pre: None,
            proof: None,
            message_info: MessageInfo::default(),
        }
    }
}
