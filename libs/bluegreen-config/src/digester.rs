//! Chain-compatible config digest.
//!
//! Reproduces the Configurator's `_configDigestFromConfigData`: keccak256 of
//! `abi.encode(configId, chainId, contractAddress, configCount, signers,
//! offchainTransmitters, f, onchainConfig, offchainConfigVersion,
//! offchainConfig)` with the two leading bytes replaced by a family prefix.
//! The argument order below is fixed; changing it breaks agreement with
//! digests read from chain.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{sol_data, SolType};

use crate::error::{Result, TrackerError};
use crate::types::{Account, ConfigDigest, ContractConfig};

/// Digest prefix of the Blue/Green Configurator family.
pub const CONFIG_DIGEST_PREFIX_LLO: u16 = 0x0009;

/// Length of an offchain transmitter key in bytes.
const TRANSMITTER_KEY_LEN: usize = 32;

/// Argument tuple of the Configurator's `_configDigestFromConfigData`.
type ConfigDigestParams = (
    sol_data::FixedBytes<32>,
    sol_data::Uint<256>,
    sol_data::Address,
    sol_data::Uint<64>,
    sol_data::Array<sol_data::Bytes>,
    sol_data::Array<sol_data::FixedBytes<32>>,
    sol_data::Uint<8>,
    sol_data::Bytes,
    sol_data::Uint<64>,
    sol_data::Bytes,
);

fn decode_transmitters(transmitters: &[Account]) -> Result<Vec<B256>> {
    transmitters
        .iter()
        .enumerate()
        .map(|(index, account)| {
            let raw = hex::decode(account.as_str()).map_err(|e| TrackerError::InvalidTransmitter {
                index,
                reason: e.to_string(),
            })?;
            if raw.len() != TRANSMITTER_KEY_LEN {
                return Err(TrackerError::InvalidTransmitter {
                    index,
                    reason: format!(
                        "expected {} byte key, got {} bytes",
                        TRANSMITTER_KEY_LEN,
                        raw.len()
                    ),
                });
            }
            Ok(B256::from_slice(&raw))
        })
        .collect()
}

/// Compute the digest the contract would assign to this configuration.
///
/// Fails without producing a digest if any transmitter is not exactly 64
/// hex characters.
#[allow(clippy::too_many_arguments)]
pub fn config_digest(
    config_id: B256,
    chain_id: U256,
    contract_address: Address,
    config_count: u64,
    signers: &[Bytes],
    transmitters: &[Account],
    f: u8,
    onchain_config: &Bytes,
    offchain_config_version: u64,
    offchain_config: &Bytes,
    prefix: u16,
) -> Result<ConfigDigest> {
    let transmitter_keys = decode_transmitters(transmitters)?;

    let encoded = <ConfigDigestParams as SolType>::abi_encode_params(&(
        config_id,
        chain_id,
        contract_address,
        config_count,
        signers.to_vec(),
        transmitter_keys,
        f,
        onchain_config.clone(),
        offchain_config_version,
        offchain_config.clone(),
    ));

    let mut digest = keccak256(&encoded);
    digest[..2].copy_from_slice(&prefix.to_be_bytes());
    Ok(digest)
}

/// [`config_digest`] bound to one contract, DON and digest family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffchainConfigDigester {
    pub config_id: B256,
    pub chain_id: U256,
    pub contract_address: Address,
    pub prefix: u16,
}

impl OffchainConfigDigester {
    pub fn new(config_id: B256, chain_id: U256, contract_address: Address) -> Self {
        Self {
            config_id,
            chain_id,
            contract_address,
            prefix: CONFIG_DIGEST_PREFIX_LLO,
        }
    }

    pub fn with_prefix(mut self, prefix: u16) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn config_digest(&self, config: &ContractConfig) -> Result<ConfigDigest> {
        config_digest(
            self.config_id,
            self.chain_id,
            self.contract_address,
            config.config_count,
            &config.signers,
            &config.transmitters,
            config.f,
            &config.onchain_config,
            config.offchain_config_version,
            &config.offchain_config,
            self.prefix,
        )
    }

    pub fn config_digest_prefix(&self) -> u16 {
        self.prefix
    }
}
