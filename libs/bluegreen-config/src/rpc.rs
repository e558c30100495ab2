//! [`LogSource`] backed by a plain JSON-RPC node.
//!
//! There is no indexer behind `eth_getLogs`, so filter registration and
//! replay are bookkeeping only: every query goes straight to the node.

use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy_primitives::{Address, B256};
use parking_lot::RwLock;

use crate::error::LogSourceError;
use crate::log_source::{IndexedLog, LogSource};

/// Default upper bound on blocks per `eth_getLogs` request.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 10_000;

/// Split `[from, to]` into consecutive ranges of at most `max_range` blocks.
fn block_ranges(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let max_range = max_range.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    loop {
        let end = start.saturating_add(max_range - 1).min(to);
        ranges.push((start, end));
        if end >= to {
            break;
        }
        start = end + 1;
    }
    ranges
}

fn to_indexed_log(log: Log) -> Result<IndexedLog, LogSourceError> {
    let block_number = log
        .block_number
        .ok_or_else(|| LogSourceError::Rpc("log without block number".to_string()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| LogSourceError::Rpc("log without log index".to_string()))?;

    Ok(IndexedLog {
        address: log.address(),
        block_number,
        log_index,
        tx_hash: log.transaction_hash.unwrap_or(B256::ZERO),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
    })
}

pub struct RpcLogSource<P> {
    provider: P,
    max_block_range: u64,
    filters: RwLock<Vec<(Address, Vec<B256>)>>,
    replay_from: RwLock<Option<u64>>,
}

impl<P: Provider> RpcLogSource<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            filters: RwLock::new(Vec::new()),
            replay_from: RwLock::new(None),
        }
    }

    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range.max(1);
        self
    }

    pub fn registered_filters(&self) -> Vec<(Address, Vec<B256>)> {
        self.filters.read().clone()
    }

    /// Lowest block a replay was requested from, if any.
    pub fn replay_from(&self) -> Option<u64> {
        *self.replay_from.read()
    }
}

#[async_trait::async_trait]
impl<P: Provider + 'static> LogSource for RpcLogSource<P> {
    async fn register_filter(
        &self,
        address: Address,
        event_sigs: Vec<B256>,
    ) -> Result<(), LogSourceError> {
        let mut filters = self.filters.write();
        if !filters
            .iter()
            .any(|(a, sigs)| *a == address && *sigs == event_sigs)
        {
            tracing::debug!(%address, events = event_sigs.len(), "Registered log filter");
            filters.push((address, event_sigs));
        }
        Ok(())
    }

    async fn latest_block(&self) -> Result<u64, LogSourceError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| LogSourceError::Rpc(format!("Failed to get block number: {}", e)))
    }

    async fn logs_with_sigs(
        &self,
        from_block: u64,
        to_block: u64,
        event_sigs: &[B256],
        address: Address,
    ) -> Result<Vec<IndexedLog>, LogSourceError> {
        if from_block > to_block {
            return Err(LogSourceError::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        let mut logs = Vec::new();
        for (start, end) in block_ranges(from_block, to_block, self.max_block_range) {
            let filter = Filter::new()
                .address(address)
                .event_signature(event_sigs.to_vec())
                .from_block(start)
                .to_block(end);

            let batch = self
                .provider
                .get_logs(&filter)
                .await
                .map_err(|e| LogSourceError::Rpc(format!("Failed to get logs: {}", e)))?;

            tracing::trace!(from_block = start, to_block = end, count = batch.len(), "Fetched logs");
            for log in batch {
                logs.push(to_indexed_log(log)?);
            }
        }

        logs.sort_by_key(|log| log.position());
        Ok(logs)
    }

    async fn replay(&self, from_block: u64) -> Result<(), LogSourceError> {
        let mut replay_from = self.replay_from.write();
        *replay_from = Some(replay_from.map_or(from_block, |current| current.min(from_block)));
        tracing::info!(from_block, "Replay requested; queries are served directly by the node");
        Ok(())
    }
}
