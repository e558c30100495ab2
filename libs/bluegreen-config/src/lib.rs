//! Blue/Green configuration tracking for a decentralized oracle network.
//!
//! A Configurator contract keeps two logical instances of a DON, Blue and
//! Green. One serves production traffic while the other stages the next
//! configuration; promotion swaps the roles. This crate derives everything
//! it knows from the contract's event logs:
//!
//! - [`InstanceConfigPoller`] answers "which configuration is assigned to my
//!   role" by folding `ProductionConfigSet`/`StagingConfigSet` logs.
//! - [`ShouldRetireCache`] polls `PromoteStagingConfig` logs in the
//!   background and serves retired-digest lookups.
//! - [`ConfigCache`] maps a digest to the signers and `f` seen for it.
//! - [`config_digest`] recomputes the digest the contract computes on-chain.
//!
//! # Usage
//!
//! ```ignore
//! use bluegreen_config::{ConfigCache, InstanceConfigPoller, InstanceRole};
//!
//! let cache = Arc::new(ConfigCache::new());
//! let blue = InstanceConfigPoller::new(source.clone(), cache.clone(), address, don_id, InstanceRole::Blue, from_block);
//! blue.register_filters().await?;
//! let (block, digest) = blue.latest_config_details().await?;
//! ```

pub mod config_cache;
pub mod digester;
pub mod error;
pub mod events;
pub mod log_source;
pub mod poller;
pub mod retire;
pub mod rpc;
pub mod types;

pub use config_cache::{CachedConfigEntry, ConfigCache};
pub use digester::{config_digest, OffchainConfigDigester, CONFIG_DIGEST_PREFIX_LLO};
pub use error::{LogSourceError, Result, TrackerError};
pub use events::{decode_config_log, decode_retired_digest, don_id_to_bytes32, EventSignatures};
pub use log_source::{IndexedLog, LogSource, MemoryLogSource};
pub use poller::InstanceConfigPoller;
pub use retire::{RetireCacheConfig, ServiceState, ShouldRetireCache};
pub use rpc::RpcLogSource;
pub use types::{
    Account, ConfigDigest, ConfigurationRecord, ContractConfig, EventKind, InstanceRole,
};
