//! Per-role configuration poller.
//!
//! Each [`InstanceConfigPoller`] is a fold over the merged
//! `ProductionConfigSet`/`StagingConfigSet` stream for one DON. A log is
//! routed by its own `isGreenProduction` snapshot, so a promotion only
//! changes the routing of logs emitted after it. The role assignment itself
//! is never stored. A poller only keeps a cursor: the last block it folded
//! and the latest record routed to it, so each call reads just the blocks
//! appended since the previous one.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use tokio::sync::Mutex as AsyncMutex;

use crate::config_cache::ConfigCache;
use crate::error::Result;
use crate::events::{decode_config_log, don_id_to_bytes32, EventSignatures};
use crate::log_source::LogSource;
use crate::types::{ConfigDigest, ConfigurationRecord, ContractConfig, InstanceRole};

/// Progress of the incremental fold.
#[derive(Debug, Default)]
struct ScanCursor {
    /// Last block folded into `latest`
    scanned_to: Option<u64>,
    latest: Option<ConfigurationRecord>,
}

/// Tracks the configuration assigned to one Blue/Green role.
pub struct InstanceConfigPoller {
    log_source: Arc<dyn LogSource>,
    config_cache: Arc<ConfigCache>,
    address: Address,
    don_id: u32,
    don_id_topic: B256,
    role: InstanceRole,
    from_block: u64,
    cursor: AsyncMutex<ScanCursor>,
}

impl InstanceConfigPoller {
    /// Create a poller for `role`.
    ///
    /// # Arguments
    /// * `log_source` - Shared log source
    /// * `config_cache` - Digest cache fed by every scan
    /// * `address` - Configurator contract address
    /// * `don_id` - DON whose logs are tracked
    /// * `role` - Blue or Green, fixed for the poller's lifetime
    /// * `from_block` - Replay floor; earlier logs are never read
    pub fn new(
        log_source: Arc<dyn LogSource>,
        config_cache: Arc<ConfigCache>,
        address: Address,
        don_id: u32,
        role: InstanceRole,
        from_block: u64,
    ) -> Self {
        Self {
            log_source,
            config_cache,
            address,
            don_id,
            don_id_topic: don_id_to_bytes32(don_id),
            role,
            from_block,
            cursor: AsyncMutex::new(ScanCursor::default()),
        }
    }

    pub fn role(&self) -> InstanceRole {
        self.role
    }

    pub fn don_id(&self) -> u32 {
        self.don_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Register the config-set filter with the log source.
    pub async fn register_filters(&self) -> Result<()> {
        self.log_source
            .register_filter(self.address, EventSignatures::config_set_events())
            .await?;
        tracing::info!(
            role = %self.role,
            don_id = self.don_id,
            address = %self.address,
            from_block = self.from_block,
            "Registered config poller filter"
        );
        Ok(())
    }

    /// Decode every config-set log of our DON in `[from_block, to_block]`,
    /// in `(block_number, log_index)` order, feeding the config cache.
    ///
    /// Any decode failure or cache conflict fails the whole scan.
    async fn scan(&self, from_block: u64, to_block: u64) -> Result<Vec<ConfigurationRecord>> {
        let mut logs = self
            .log_source
            .logs_with_sigs(
                from_block,
                to_block,
                &EventSignatures::config_set_events(),
                self.address,
            )
            .await?;
        logs.sort_by_key(|log| log.position());

        let records = logs
            .iter()
            .filter(|log| log.topic(1) == Some(&self.don_id_topic))
            .map(decode_config_log)
            .collect::<Result<Vec<_>>>()?;

        for record in &records {
            self.config_cache
                .store_config(record.config_digest, &record.signers, record.f)?;
        }

        Ok(records)
    }

    /// Latest record routed to this role, if any.
    ///
    /// Scans `[scanned_to + 1, head]`, or `[from_block, head]` on the first
    /// call and after a replay. The cursor only moves once a scan succeeds.
    /// Logs appended later to an already scanned block are not read.
    pub async fn latest_record(&self) -> Result<Option<ConfigurationRecord>> {
        let mut cursor = self.cursor.lock().await;
        let head = self.log_source.latest_block().await?;
        let next_from = cursor.scanned_to.map_or(self.from_block, |block| block + 1);
        if head < next_from {
            return Ok(cursor.latest.clone());
        }

        let records = self.scan(next_from, head).await?;
        let newest = records
            .into_iter()
            .filter(|r| r.role() == self.role)
            .max_by_key(|r| r.position());

        if let Some(record) = newest {
            tracing::debug!(
                role = %self.role,
                block = record.block_number,
                log_index = record.log_index,
                digest = %record.config_digest,
                kind = record.kind.name(),
                "Latest accepted config"
            );
            cursor.latest = Some(record);
        }
        cursor.scanned_to = Some(head);

        Ok(cursor.latest.clone())
    }

    /// `(changed_in_block, config_digest)` of the latest record routed to
    /// this role, or `(0, zero digest)` if none has been seen.
    pub async fn latest_config_details(&self) -> Result<(u64, ConfigDigest)> {
        Ok(self
            .latest_record()
            .await?
            .map(|r| (r.block_number, r.config_digest))
            .unwrap_or((0, B256::ZERO)))
    }

    /// Configuration routed to this role that changed in `changed_in_block`.
    ///
    /// Returns [`ContractConfig::default`] if the block is out of range or
    /// holds no log for this role. If several do, the highest log index wins.
    pub async fn latest_config(&self, changed_in_block: u64) -> Result<ContractConfig> {
        if changed_in_block < self.from_block {
            return Ok(ContractConfig::default());
        }
        let head = self.log_source.latest_block().await?;
        if changed_in_block > head {
            return Ok(ContractConfig::default());
        }

        let records = self.scan(changed_in_block, changed_in_block).await?;
        Ok(records
            .iter()
            .filter(|r| r.role() == self.role)
            .max_by_key(|r| r.position())
            .map(ConfigurationRecord::to_contract_config)
            .unwrap_or_default())
    }

    pub async fn latest_block_height(&self) -> Result<u64> {
        Ok(self.log_source.latest_block().await?)
    }

    /// Ask the log source to re-index from `from_block`, never below the
    /// poller's replay floor. The next lookup rescans from the floor.
    pub async fn replay(&self, from_block: u64) -> Result<()> {
        let from_block = from_block.max(self.from_block);
        tracing::info!(role = %self.role, from_block, "Replaying config logs");
        let mut cursor = self.cursor.lock().await;
        self.log_source.replay(from_block).await?;
        *cursor = ScanCursor::default();
        Ok(())
    }
}
