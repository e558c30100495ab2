use bluegreen_config::{
    ConfigDigest, InstanceConfigPoller, InstanceRole, OffchainConfigDigester, ShouldRetireCache,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of one role's configuration, as printed for operators.
#[derive(Debug, Clone, Serialize)]
pub struct RoleReport {
    pub role: InstanceRole,
    pub don_id: u32,
    pub changed_in_block: u64,
    pub config_digest: ConfigDigest,
    pub config_count: u64,
    pub signers: usize,
    pub f: u8,
    /// Recomputed digest matches the one emitted on-chain
    pub digest_verified: bool,
    pub retired: bool,
    pub observed_at: DateTime<Utc>,
}

pub async fn build_report(
    poller: &InstanceConfigPoller,
    digester: &OffchainConfigDigester,
    retire_cache: &ShouldRetireCache,
) -> eyre::Result<RoleReport> {
    let (changed_in_block, config_digest) = poller.latest_config_details().await?;
    let config = poller.latest_config(changed_in_block).await?;

    let digest_verified = if config.is_empty() {
        false
    } else {
        let recomputed = digester.config_digest(&config)?;
        if recomputed != config_digest {
            tracing::error!(
                role = %poller.role(),
                emitted = %config_digest,
                %recomputed,
                "Config digest mismatch"
            );
        }
        recomputed == config_digest
    };

    Ok(RoleReport {
        role: poller.role(),
        don_id: poller.don_id(),
        changed_in_block,
        config_digest,
        config_count: config.config_count,
        signers: config.signers.len(),
        f: config.f,
        digest_verified,
        retired: retire_cache.should_retire(&config_digest),
        observed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, B256, U256};
    use bluegreen_config::events::{encode_config_log, encode_promote_log};
    use bluegreen_config::{
        don_id_to_bytes32, Account, ConfigCache, ConfigurationRecord, ContractConfig, EventKind,
        MemoryLogSource, RetireCacheConfig,
    };
    use std::sync::Arc;

    const DON_ID: u32 = 4;

    fn contract() -> Address {
        Address::repeat_byte(0x42)
    }

    fn digester() -> OffchainConfigDigester {
        OffchainConfigDigester::new(don_id_to_bytes32(DON_ID), U256::from(1u64), contract())
    }

    fn production_record(digest: ConfigDigest) -> ConfigurationRecord {
        ConfigurationRecord {
            don_id: don_id_to_bytes32(DON_ID),
            kind: EventKind::ProductionConfigSet,
            block_number: 10,
            log_index: 0,
            previous_config_block_number: 0,
            config_digest: digest,
            config_count: 1,
            signers: vec![Bytes::from(vec![1u8; 32]); 4],
            offchain_transmitters: vec![B256::repeat_byte(0x11); 4],
            f: 1,
            onchain_config: Bytes::new(),
            offchain_config_version: 1,
            offchain_config: Bytes::new(),
            is_green_production: false,
        }
    }

    fn valid_digest() -> ConfigDigest {
        let config = ContractConfig {
            config_count: 1,
            signers: vec![Bytes::from(vec![1u8; 32]); 4],
            transmitters: vec![Account::from_key(&B256::repeat_byte(0x11)); 4],
            f: 1,
            offchain_config_version: 1,
            ..ContractConfig::default()
        };
        digester().config_digest(&config).unwrap()
    }

    fn setup(record: &ConfigurationRecord) -> (Arc<MemoryLogSource>, InstanceConfigPoller, ShouldRetireCache) {
        let source = Arc::new(MemoryLogSource::new());
        source.push_log(encode_config_log(record, contract()));
        let poller = InstanceConfigPoller::new(
            source.clone(),
            Arc::new(ConfigCache::new()),
            contract(),
            DON_ID,
            InstanceRole::Blue,
            0,
        );
        let retire = ShouldRetireCache::new(
            source.clone(),
            contract(),
            DON_ID,
            0,
            RetireCacheConfig::default(),
        );
        (source, poller, retire)
    }

    #[tokio::test]
    async fn test_report_verifies_digest() {
        let record = production_record(valid_digest());
        let (_, poller, retire) = setup(&record);

        let report = build_report(&poller, &digester(), &retire).await.unwrap();
        assert_eq!(report.changed_in_block, 10);
        assert_eq!(report.config_digest, record.config_digest);
        assert_eq!(report.signers, 4);
        assert!(report.digest_verified);
        assert!(!report.retired);
    }

    #[tokio::test]
    async fn test_report_flags_mismatch_and_retirement() {
        let bogus = B256::repeat_byte(0xee);
        let (source, poller, retire) = setup(&production_record(bogus));
        source.push_log(encode_promote_log(contract(), don_id_to_bytes32(DON_ID), bogus, true, 11, 0));
        retire.poll_once().await.unwrap();

        let report = build_report(&poller, &digester(), &retire).await.unwrap();
        assert!(!report.digest_verified);
        assert!(report.retired);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["role"], "blue");
        assert_eq!(json["changed_in_block"], 10);
    }
}
