//! Core data types shared by the pollers, caches and the digester.

use alloy_primitives::{Bytes, B256};
use serde::{Deserialize, Serialize};

/// Fixed-width identifier of one configuration generation.
pub type ConfigDigest = B256;

/// Logical deployment slot of a DON instance.
///
/// Assigned once when a poller is built. Whether the slot is currently
/// production or staging is never stored; it is re-derived per log from the
/// `isGreenProduction` flag the log carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceRole {
    Blue,
    Green,
}

impl InstanceRole {
    /// Routing rule: does a config-set log of `kind`, emitted while
    /// `is_green_production` held, belong to this role?
    ///
    /// | role  | ProductionConfigSet      | StagingConfigSet         |
    /// |-------|--------------------------|--------------------------|
    /// | Blue  | `!is_green_production`   | `is_green_production`    |
    /// | Green | `is_green_production`    | `!is_green_production`   |
    pub fn accepts(self, kind: EventKind, is_green_production: bool) -> bool {
        let green_slot = match kind {
            EventKind::ProductionConfigSet => is_green_production,
            EventKind::StagingConfigSet => !is_green_production,
        };
        match self {
            InstanceRole::Blue => !green_slot,
            InstanceRole::Green => green_slot,
        }
    }
}

impl core::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InstanceRole::Blue => write!(f, "blue"),
            InstanceRole::Green => write!(f, "green"),
        }
    }
}

/// Which slot of the contract a config-set log updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProductionConfigSet,
    StagingConfigSet,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ProductionConfigSet => "ProductionConfigSet",
            EventKind::StagingConfigSet => "StagingConfigSet",
        }
    }
}

/// One decoded `ProductionConfigSet` or `StagingConfigSet` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    /// Padded DON id (the indexed `configId` topic)
    pub don_id: B256,
    pub kind: EventKind,
    pub block_number: u64,
    pub log_index: u64,
    /// Informational only
    pub previous_config_block_number: u32,
    pub config_digest: ConfigDigest,
    pub config_count: u64,
    /// Onchain signer keys, in contract order
    pub signers: Vec<Bytes>,
    /// Offchain transmitter keys, in contract order
    pub offchain_transmitters: Vec<B256>,
    pub f: u8,
    pub onchain_config: Bytes,
    pub offchain_config_version: u64,
    pub offchain_config: Bytes,
    /// Snapshot of the contract flag at emission time
    pub is_green_production: bool,
}

impl ConfigurationRecord {
    /// Ordering key; ties within a block break on log index.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    /// The role this log is routed to.
    pub fn role(&self) -> InstanceRole {
        if InstanceRole::Green.accepts(self.kind, self.is_green_production) {
            InstanceRole::Green
        } else {
            InstanceRole::Blue
        }
    }

    pub fn to_contract_config(&self) -> ContractConfig {
        ContractConfig {
            config_digest: self.config_digest,
            config_count: self.config_count,
            signers: self.signers.clone(),
            transmitters: self
                .offchain_transmitters
                .iter()
                .map(Account::from_key)
                .collect(),
            f: self.f,
            onchain_config: self.onchain_config.clone(),
            offchain_config_version: self.offchain_config_version,
            offchain_config: self.offchain_config.clone(),
        }
    }
}

/// Offchain transmitter account: lowercase hex of the 32-byte key, no `0x`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Account(pub String);

impl Account {
    pub fn from_key(key: &B256) -> Self {
        Account(hex::encode(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Account {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration as handed to the oracle protocol driver.
///
/// The default value (zero digest, empty sets) means "not found".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractConfig {
    pub config_digest: ConfigDigest,
    pub config_count: u64,
    pub signers: Vec<Bytes>,
    pub transmitters: Vec<Account>,
    pub f: u8,
    pub onchain_config: Bytes,
    pub offchain_config_version: u64,
    pub offchain_config: Bytes,
}

impl ContractConfig {
    pub fn is_empty(&self) -> bool {
        self.config_digest == B256::ZERO
    }
}
