// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-miner configuration for the commitment engine.
//!
//! Configuration is read-mostly mutable shared state: the batchers and
//! processors clone the relevant [`MinerConfig`] out of [`SafeConfig`] under
//! a short read lock at every flush, and never hold the lock across I/O.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use fvm_shared::{ActorID, address::Address, econ::TokenAmount};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const DEFAULT_PRE_BATCH_THRESHOLD: usize = 256;
const DEFAULT_PROVE_BATCH_THRESHOLD: usize = 16;
const DEFAULT_BATCH_MAX_WAIT: Duration = Duration::from_secs(60 * 60);
const DEFAULT_BATCH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Batching policy for one message type of one miner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Whether the batched/aggregated message form is allowed at all.
    pub enabled: bool,
    /// Buffered-sector watermark at which a full flush is triggered.
    pub threshold: usize,
    /// How long a sector may wait in the buffer before a deadline tick
    /// forces it out.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// Interval of the deadline timer.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            enabled: false,
            threshold: DEFAULT_PROVE_BATCH_THRESHOLD,
            max_wait: DEFAULT_BATCH_MAX_WAIT,
            check_interval: DEFAULT_BATCH_CHECK_INTERVAL,
        }
    }
}

impl BatchConfig {
    fn default_pre() -> Self {
        BatchConfig {
            threshold: DEFAULT_PRE_BATCH_THRESHOLD,
            ..Default::default()
        }
    }
}

/// Commitment policy for one message type (pre-commit or prove-commit) of
/// one miner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitPolicyConfig {
    /// Control address the messages are sent from. Different control
    /// addresses pay gas from different accounts, so this also keys the
    /// batcher the sectors are routed to.
    #[serde(with = "address_str")]
    pub sender: Option<Address>,
    pub batch: BatchConfig,
    /// Gas estimation multiplier handed to the messaging service.
    pub gas_over_estimation: f64,
    /// Fee cap handed to the messaging service, in attoFIL. Zero leaves the
    /// cap to the messager.
    #[serde(with = "attofil_str")]
    pub max_fee_cap: TokenAmount,
}

impl Default for CommitPolicyConfig {
    fn default() -> Self {
        CommitPolicyConfig {
            sender: None,
            batch: BatchConfig::default(),
            gas_over_estimation: 0.0,
            max_fee_cap: TokenAmount::from_atto(0),
        }
    }
}

impl CommitPolicyConfig {
    fn default_pre() -> Self {
        CommitPolicyConfig {
            batch: BatchConfig::default_pre(),
            ..Default::default()
        }
    }

    /// Per-message knobs handed to the messaging service.
    pub fn msg_spec(&self) -> crate::api::MsgSpec {
        crate::api::MsgSpec {
            gas_over_estimation: self.gas_over_estimation,
            max_fee_cap: self.max_fee_cap.clone(),
        }
    }
}

/// Commitment configuration of one miner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentConfig {
    #[serde(default = "CommitPolicyConfig::default_pre")]
    pub pre: CommitPolicyConfig,
    #[serde(default)]
    pub prove: CommitPolicyConfig,
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        CommitmentConfig {
            pre: CommitPolicyConfig::default_pre(),
            prove: CommitPolicyConfig::default(),
        }
    }
}

/// Configuration of one miner actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerConfig {
    pub actor: ActorID,
    #[serde(default)]
    pub commitment: CommitmentConfig,
}

impl MinerConfig {
    pub fn new(actor: ActorID) -> Self {
        MinerConfig {
            actor,
            commitment: CommitmentConfig::default(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub miners: Vec<MinerConfig>,
}

impl Config {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Shared, read-mostly configuration handle.
#[derive(Clone, Default)]
pub struct SafeConfig(Arc<RwLock<Config>>);

impl SafeConfig {
    pub fn new(config: Config) -> Self {
        SafeConfig(Arc::new(RwLock::new(config)))
    }

    /// Clones the configuration of the given miner, falling back to defaults
    /// for miners that are not configured.
    pub fn miner_config(&self, mid: ActorID) -> MinerConfig {
        self.0
            .read()
            .miners
            .iter()
            .find(|m| m.actor == mid)
            .cloned()
            .unwrap_or_else(|| MinerConfig::new(mid))
    }

    /// Applies an external configuration update.
    pub fn modify(&self, f: impl FnOnce(&mut Config)) {
        f(&mut self.0.write());
    }
}

/// Serializes an optional address as its string form (`f01000`).
mod address_str {
    use super::*;
    use serde::{Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(v: &Option<Address>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(addr) => s.serialize_some(&addr.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| Address::from_str(&s).map_err(D::Error::custom))
            .transpose()
    }
}

/// Serializes a token amount as a decimal attoFIL string.
mod attofil_str {
    use super::*;
    use fvm_shared::bigint::BigInt;
    use serde::{Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(v: &TokenAmount, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.atto().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TokenAmount, D::Error> {
        let raw = String::deserialize(d)?;
        let atto = BigInt::from_str(&raw).map_err(D::Error::custom)?;
        Ok(TokenAmount::from_atto(atto))
    }
}
