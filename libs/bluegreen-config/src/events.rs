//! Configurator contract events.
//!
//! The topic layout is part of the compatibility surface: `configId` (the
//! padded DON id) is always topic1, and `PromoteStagingConfig` carries the
//! retired digest as topic2.

use alloy_primitives::{Address, B256};
use alloy_sol_types::{sol, SolEvent};

use crate::error::{Result, TrackerError};
use crate::log_source::IndexedLog;
use crate::types::{ConfigDigest, ConfigurationRecord, EventKind};

sol! {
    /// Emitted when the production slot of a DON is (re)configured.
    #[derive(Debug)]
    event ProductionConfigSet(
        bytes32 indexed configId,
        uint32 previousConfigBlockNumber,
        bytes32 configDigest,
        uint64 configCount,
        bytes[] signers,
        bytes32[] offchainTransmitters,
        uint8 f,
        bytes onchainConfig,
        uint64 offchainConfigVersion,
        bytes offchainConfig,
        bool isGreenProduction
    );

    /// Emitted when the staging slot of a DON is (re)configured.
    #[derive(Debug)]
    event StagingConfigSet(
        bytes32 indexed configId,
        uint32 previousConfigBlockNumber,
        bytes32 configDigest,
        uint64 configCount,
        bytes[] signers,
        bytes32[] offchainTransmitters,
        uint8 f,
        bytes onchainConfig,
        uint64 offchainConfigVersion,
        bytes offchainConfig,
        bool isGreenProduction
    );

    /// Emitted when staging is promoted; the old production digest retires.
    #[derive(Debug)]
    event PromoteStagingConfig(
        bytes32 indexed configId,
        bytes32 indexed retiredConfigDigest,
        bool isGreenProduction
    );
}

/// Event signature constants
pub struct EventSignatures;

impl EventSignatures {
    /// ProductionConfigSet event signature (topic0)
    pub fn production_config_set() -> B256 {
        ProductionConfigSet::SIGNATURE_HASH
    }

    /// StagingConfigSet event signature (topic0)
    pub fn staging_config_set() -> B256 {
        StagingConfigSet::SIGNATURE_HASH
    }

    /// PromoteStagingConfig event signature (topic0)
    pub fn promote_staging_config() -> B256 {
        PromoteStagingConfig::SIGNATURE_HASH
    }

    /// Both config-set signatures, as polled by the instance pollers
    pub fn config_set_events() -> Vec<B256> {
        vec![Self::production_config_set(), Self::staging_config_set()]
    }
}

/// Left-pad a numeric DON id into the 32-byte `configId` topic.
pub fn don_id_to_bytes32(don_id: u32) -> B256 {
    B256::left_padding_from(&don_id.to_be_bytes())
}

fn decode_error(event: &str, reason: impl ToString) -> TrackerError {
    TrackerError::Decode {
        event: event.to_string(),
        reason: reason.to_string(),
    }
}

macro_rules! record_from_event {
    ($kind:expr, $log:expr, $event:expr) => {{
        let event = $event;
        ConfigurationRecord {
            don_id: event.configId,
            kind: $kind,
            block_number: $log.block_number,
            log_index: $log.log_index,
            previous_config_block_number: event.previousConfigBlockNumber,
            config_digest: event.configDigest,
            config_count: event.configCount,
            signers: event.signers,
            offchain_transmitters: event.offchainTransmitters,
            f: event.f,
            onchain_config: event.onchainConfig,
            offchain_config_version: event.offchainConfigVersion,
            offchain_config: event.offchainConfig,
            is_green_production: event.isGreenProduction,
        }
    }};
}

/// Decode a `ProductionConfigSet` or `StagingConfigSet` log.
pub fn decode_config_log(log: &IndexedLog) -> Result<ConfigurationRecord> {
    let topic0 = log
        .topic(0)
        .ok_or_else(|| decode_error("ConfigSet", "log has no topics"))?;

    let kind = if *topic0 == EventSignatures::production_config_set() {
        EventKind::ProductionConfigSet
    } else if *topic0 == EventSignatures::staging_config_set() {
        EventKind::StagingConfigSet
    } else {
        return Err(decode_error(
            "ConfigSet",
            format!("unexpected event signature {}", topic0),
        ));
    };

    let primitive = log
        .to_primitive()
        .ok_or_else(|| decode_error(kind.name(), "too many topics"))?;

    let record = match kind {
        EventKind::ProductionConfigSet => {
            let decoded = ProductionConfigSet::decode_log(&primitive)
                .map_err(|e| decode_error(kind.name(), e))?;
            record_from_event!(kind, log, decoded.data)
        }
        EventKind::StagingConfigSet => {
            let decoded = StagingConfigSet::decode_log(&primitive)
                .map_err(|e| decode_error(kind.name(), e))?;
            record_from_event!(kind, log, decoded.data)
        }
    };

    Ok(record)
}

/// Validate a `PromoteStagingConfig` log and return its retired digest (topic2).
pub fn decode_retired_digest(log: &IndexedLog) -> Result<ConfigDigest> {
    let name = "PromoteStagingConfig";
    match log.topic(0) {
        Some(topic0) if *topic0 == EventSignatures::promote_staging_config() => {}
        Some(topic0) => {
            return Err(decode_error(name, format!("unexpected event signature {}", topic0)))
        }
        None => return Err(decode_error(name, "log has no topics")),
    }

    let primitive = log
        .to_primitive()
        .ok_or_else(|| decode_error(name, "too many topics"))?;
    let decoded = PromoteStagingConfig::decode_log(&primitive).map_err(|e| decode_error(name, e))?;

    Ok(decoded.data.retiredConfigDigest)
}

/// Encode a config record back into the log the contract would emit.
///
/// Used to feed a [`MemoryLogSource`](crate::MemoryLogSource) in tests and
/// simulations.
pub fn encode_config_log(record: &ConfigurationRecord, address: Address) -> IndexedLog {
    let log_data = match record.kind {
        EventKind::ProductionConfigSet => ProductionConfigSet {
            configId: record.don_id,
            previousConfigBlockNumber: record.previous_config_block_number,
            configDigest: record.config_digest,
            configCount: record.config_count,
            signers: record.signers.clone(),
            offchainTransmitters: record.offchain_transmitters.clone(),
            f: record.f,
            onchainConfig: record.onchain_config.clone(),
            offchainConfigVersion: record.offchain_config_version,
            offchainConfig: record.offchain_config.clone(),
            isGreenProduction: record.is_green_production,
        }
        .encode_log_data(),
        EventKind::StagingConfigSet => StagingConfigSet {
            configId: record.don_id,
            previousConfigBlockNumber: record.previous_config_block_number,
            configDigest: record.config_digest,
            configCount: record.config_count,
            signers: record.signers.clone(),
            offchainTransmitters: record.offchain_transmitters.clone(),
            f: record.f,
            onchainConfig: record.onchain_config.clone(),
            offchainConfigVersion: record.offchain_config_version,
            offchainConfig: record.offchain_config.clone(),
            isGreenProduction: record.is_green_production,
        }
        .encode_log_data(),
    };

    IndexedLog {
        address,
        block_number: record.block_number,
        log_index: record.log_index,
        tx_hash: B256::ZERO,
        topics: log_data.topics().to_vec(),
        data: log_data.data,
    }
}

/// Encode a `PromoteStagingConfig` log.
pub fn encode_promote_log(
    address: Address,
    don_id: B256,
    retired_digest: ConfigDigest,
    is_green_production: bool,
    block_number: u64,
    log_index: u64,
) -> IndexedLog {
    let log_data = PromoteStagingConfig {
        configId: don_id,
        retiredConfigDigest: retired_digest,
        isGreenProduction: is_green_production,
    }
    .encode_log_data();

    IndexedLog {
        address,
        block_number,
        log_index,
        tx_hash: B256::ZERO,
        topics: log_data.topics().to_vec(),
        data: log_data.data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{b256, Bytes};

    fn sample_record(kind: EventKind) -> ConfigurationRecord {
        ConfigurationRecord {
            don_id: don_id_to_bytes32(7),
            kind,
            block_number: 100,
            log_index: 3,
            previous_config_block_number: 42,
            config_digest: B256::repeat_byte(0xd1),
            config_count: 2,
            signers: vec![Bytes::from(vec![1u8; 32]), Bytes::from(vec![2u8; 20])],
            offchain_transmitters: vec![B256::repeat_byte(0x11), B256::repeat_byte(0x22)],
            f: 1,
            onchain_config: Bytes::from(vec![0x01; 64]),
            offchain_config_version: 30,
            offchain_config: Bytes::from_static(b"offchain"),
            is_green_production: true,
        }
    }

    #[test]
    fn test_event_signatures_match_configurator_topics() {
        assert_eq!(
            EventSignatures::production_config_set(),
            b256!("261b20c2ecd99d86d6e936279e4f78db34603a3de3a4a84d6f3d4e0dd55e2478")
        );
        assert_eq!(
            EventSignatures::staging_config_set(),
            b256!("ef1b5f9d1b927b0fe871b12c7e7846457602d67b2bc36b0bc95feaf480e89056")
        );
        assert_eq!(
            EventSignatures::promote_staging_config(),
            b256!("1062aa08ac6046a0e69e3eafdf12d1eba63a67b71a874623e86eb06348a1d84f")
        );
    }

    #[test]
    fn test_don_id_is_left_padded() {
        let topic = don_id_to_bytes32(0x0102);
        assert_eq!(topic[30], 0x01);
        assert_eq!(topic[31], 0x02);
        assert!(topic[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_config_log_preserves_fields() {
        for kind in [EventKind::ProductionConfigSet, EventKind::StagingConfigSet] {
            let record = sample_record(kind);
            let log = encode_config_log(&record, Address::repeat_byte(0xaa));

            assert_eq!(log.topics.len(), 2);
            assert_eq!(log.topics[1], record.don_id);
            assert_eq!(decode_config_log(&log).unwrap(), record);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_signature() {
        let mut log = encode_config_log(
            &sample_record(EventKind::ProductionConfigSet),
            Address::ZERO,
        );
        log.topics[0] = B256::repeat_byte(0xee);

        let err = decode_config_log(&log).unwrap_err();
        assert!(matches!(err, TrackerError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let mut log = encode_config_log(&sample_record(EventKind::StagingConfigSet), Address::ZERO);
        log.data = Bytes::from(log.data[..64].to_vec());

        match decode_config_log(&log).unwrap_err() {
            TrackerError::Decode { event, .. } => assert_eq!(event, "StagingConfigSet"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_log_without_topics() {
        let log = IndexedLog {
            address: Address::ZERO,
            block_number: 1,
            log_index: 0,
            tx_hash: B256::ZERO,
            topics: vec![],
            data: Bytes::new(),
        };
        assert!(decode_config_log(&log).is_err());
        assert!(decode_retired_digest(&log).is_err());
    }

    #[test]
    fn test_decode_retired_digest_reads_second_indexed_topic() {
        let retired = B256::repeat_byte(0x77);
        let log = encode_promote_log(Address::ZERO, don_id_to_bytes32(7), retired, true, 12, 0);

        assert_eq!(log.topics.len(), 3);
        assert_eq!(log.topics[2], retired);
        assert_eq!(decode_retired_digest(&log).unwrap(), retired);
    }

    #[test]
    fn test_decode_retired_digest_rejects_config_set_log() {
        let log = encode_config_log(&sample_record(EventKind::ProductionConfigSet), Address::ZERO);
        assert!(decode_retired_digest(&log).is_err());
    }
}
