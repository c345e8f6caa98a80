// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector commitment batching and dispatch engine for Filecoin storage
//! providers.
//!
//! Miners continuously produce sectors that are committed on-chain in two
//! phases: a pre-commit message binding the ticket and posting a deposit,
//! and a prove-commit message carrying the zk-proof and posting collateral.
//! Either message can be sent per sector or amortized into a batch
//! (`PreCommitSectorBatch`) or a proof aggregate (`ProveCommitAggregate`).
//!
//! The [`CommitmentManager`] routes submissions to per-`(miner, control
//! address)` [`Batcher`]s. Each batcher buffers sectors until a flush
//! condition (threshold reached, deadline tick, operator force, batching
//! disabled) and hands the snapshot to its [`Processor`], which builds the
//! on-chain params, queries deposits or collateral, optionally aggregates
//! proofs, pushes the message through the external messaging service and
//! stamps the returned id back into each sector's state.
//!
//! The engine does not sign, broadcast or retry messages, and it does not
//! verify proofs; those belong to the messaging service and the prover.

mod api;
mod batcher;
mod config;
mod error;
mod message;
mod policy;
mod processor;
mod registry;
mod sector;
#[cfg(test)]
mod test_utils;

pub use api::{
    AggregateSealRequest, ChainToken, MessagerApi, MsgSpec, Prover, SealingApi, SectorStateManager,
};
pub use batcher::Batcher;
pub use config::{
    BatchConfig, CommitPolicyConfig, CommitmentConfig, Config, MinerConfig, SafeConfig,
};
pub use error::Error;
pub use message::{
    BitField, Method, PreCommitSectorBatchParams, ProveCommitAggregateParams,
    ProveCommitSectorParams, SectorPreCommitInfo,
};
pub use policy::{EPOCH_DURATION_SECONDS, MIN_AGGREGATED_SECTORS};
pub use processor::{CommitProcessor, PreCommitProcessor, Processor};
pub use registry::{BatcherRegistry, CommitKind, CommitmentManager};
pub use sector::{
    MessageId, MessageInfo, SectorId, SectorPreCommitted, SectorProof, SectorState, Seed, Ticket,
};
