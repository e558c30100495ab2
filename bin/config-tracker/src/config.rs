use bluegreen_config::RetireCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const RPC_URL_ENV: &str = "TRACKER_RPC_URL";
pub const CONTRACT_ADDRESS_ENV: &str = "TRACKER_CONTRACT_ADDRESS";
pub const DON_ID_ENV: &str = "TRACKER_DON_ID";
pub const FROM_BLOCK_ENV: &str = "TRACKER_FROM_BLOCK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Configurator contract address (0x-prefixed hex)
    pub contract_address: String,
    pub don_id: u32,
    /// Logs before this block are never read
    pub from_block: u64,
    pub report_interval_secs: u64,
    pub retire_poll_interval_ms: u64,
    pub retire_jitter_ms: u64,
}

impl TrackerConfig {
    pub async fn load_from_file(path: &Path) -> eyre::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `TRACKER_*` environment variables on top of file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(RPC_URL_ENV) {
            self.rpc_url = url;
        }
        if let Some(address) = lookup(CONTRACT_ADDRESS_ENV) {
            self.contract_address = address;
        }
        match lookup(DON_ID_ENV).map(|v| v.parse::<u32>()) {
            Some(Ok(don_id)) => self.don_id = don_id,
            Some(Err(e)) => tracing::warn!(error = %e, "Ignoring invalid {}", DON_ID_ENV),
            None => {}
        }
        match lookup(FROM_BLOCK_ENV).map(|v| v.parse::<u64>()) {
            Some(Ok(block)) => self.from_block = block,
            Some(Err(e)) => tracing::warn!(error = %e, "Ignoring invalid {}", FROM_BLOCK_ENV),
            None => {}
        }
        self
    }

    pub fn retire_cache_config(&self) -> RetireCacheConfig {
        RetireCacheConfig::default()
            .with_poll_interval_ms(self.retire_poll_interval_ms)
            .with_jitter_ms(self.retire_jitter_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let retire = RetireCacheConfig::default();
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 1337,
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
            don_id: 1,
            from_block: 0,
            report_interval_secs: 10,
            retire_poll_interval_ms: retire.poll_interval_ms,
            retire_jitter_ms: retire.jitter_ms,
        }
    }
}
