// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! On-chain message params for the miner actor's commitment methods, plus
//! the helper that assembles and pushes a message through the messaging
//! service.
//!
//! The params structs mirror the miner actor's CBOR tuple layout exactly;
//! they are what gets serialized into `Message::params`.

use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use fvm_ipld_encoding::tuple::*;
use fvm_shared::{
    ActorID, MethodNum,
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    message::Message,
    sector::{RegisteredSealProof, SectorNumber},
};
use tracing::debug;

use crate::api::{MessagerApi, MsgSpec};
use crate::error::{Error, Result};
use crate::sector::MessageId;

pub use fil_actor_miner_state::v8::Method;
pub use fil_actors_shared::fvm_ipld_bitfield::BitField;

/// Information about a sector to be pre-committed.
#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct SectorPreCommitInfo {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    /// `CommR`
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
    /// CC-upgrade fields; the engine never replaces capacity sectors.
    pub replace_capacity: bool,
    pub replace_sector_deadline: u64,
    pub replace_sector_partition: u64,
    pub replace_sector_number: SectorNumber,
}

#[derive(Debug, Clone, Default, Serialize_tuple, Deserialize_tuple)]
pub struct PreCommitSectorBatchParams {
    pub sectors: Vec<SectorPreCommitInfo>,
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitSectorParams {
    pub sector_number: SectorNumber,
    pub proof: RawBytes,
}

#[derive(Debug, Clone, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitAggregateParams {
    /// Sorted ascending; must stay aligned with the proof array handed to
    /// the aggregator.
    pub sector_numbers: BitField,
    pub aggregate_proof: RawBytes,
}

/// Assembles an unsigned message to the miner actor and hands it to the
/// messaging service. Gas fields and the nonce are left for the messager to
/// fill in.
pub(crate) async fn push_message(
    messager: &dyn MessagerApi,
    from: Address,
    mid: ActorID,
    value: TokenAmount,
    method: Method,
    params: Vec<u8>,
    spec: MsgSpec,
) -> Result<MessageId> {
    let method_num = method as MethodNum;
    let msg = Message {
        version: 0,
        from,
        to: Address::new_id(mid),
        sequence: 0,
        value,
        method_num,
        params: RawBytes::new(params),
        gas_limit: 0,
        gas_fee_cap: TokenAmount::from_atto(0),
        gas_premium: TokenAmount::from_atto(0),
    };

    let msg_id = messager
        .push_message(msg, spec)
        .await
        .map_err(Error::MessagerPush)?;
    debug!(miner = mid, method = method_num, %msg_id, "message pushed");
    Ok(msg_id)
}
