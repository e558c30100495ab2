//! Log source abstraction.
//!
//! The pollers never talk to a node directly. They read ordered, filtered
//! logs through [`LogSource`], which may be a log indexer, a raw JSON-RPC
//! node ([`RpcLogSource`](crate::RpcLogSource)) or the in-memory
//! [`MemoryLogSource`] used by tests and simulations.

use alloy_primitives::{Address, Bytes, Log as PrimitiveLog, B256};
use parking_lot::RwLock;

use crate::error::LogSourceError;

/// A log as returned by the log source, with its ordering keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedLog {
    pub address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
    /// topic0 is the event signature; the rest are indexed fields
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed fields
    pub data: Bytes,
}

impl IndexedLog {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    pub fn topic(&self, index: usize) -> Option<&B256> {
        self.topics.get(index)
    }

    /// Convert into the alloy log type the sol! decoders expect.
    ///
    /// Returns `None` if the log carries more than four topics.
    pub fn to_primitive(&self) -> Option<PrimitiveLog> {
        PrimitiveLog::new(self.address, self.topics.clone(), self.data.clone())
    }
}

/// Filtered, ordered access to contract logs.
///
/// Implementations must be safe to share between tasks. Returned logs are
/// sorted by `(block_number, log_index)`. Every method is a plain future:
/// dropping it (for example from a `tokio::select!` on a cancellation token
/// or a `tokio::time::timeout`) abandons the query without side effects on
/// the caller's state.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    /// Ask the source to start indexing `event_sigs` emitted by `address`.
    async fn register_filter(
        &self,
        address: Address,
        event_sigs: Vec<B256>,
    ) -> Result<(), LogSourceError>;

    /// Chain head as known to the source.
    async fn latest_block(&self) -> Result<u64, LogSourceError>;

    /// Logs in `[from_block, to_block]` whose topic0 is one of `event_sigs`.
    async fn logs_with_sigs(
        &self,
        from_block: u64,
        to_block: u64,
        event_sigs: &[B256],
        address: Address,
    ) -> Result<Vec<IndexedLog>, LogSourceError>;

    /// Force re-indexing from `from_block`.
    async fn replay(&self, from_block: u64) -> Result<(), LogSourceError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    logs: Vec<IndexedLog>,
    head: u64,
    filters: Vec<(Address, Vec<B256>)>,
    replays: Vec<u64>,
    pending_failures: u32,
    stalled_queries: u32,
    stalled_registrations: u32,
    queries: u64,
    query_ranges: Vec<(u64, u64)>,
}

/// In-memory [`LogSource`] for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryLogSource {
    state: RwLock<MemoryState>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a log, keeping the store ordered and advancing the head.
    pub fn push_log(&self, log: IndexedLog) {
        let mut state = self.state.write();
        if log.block_number > state.head {
            state.head = log.block_number;
        }
        let at = state
            .logs
            .partition_point(|existing| existing.position() <= log.position());
        state.logs.insert(at, log);
    }

    pub fn set_latest_block(&self, block: u64) {
        self.state.write().head = block;
    }

    /// Make the next `count` queries fail with an RPC error.
    pub fn fail_next(&self, count: u32) {
        self.state.write().pending_failures = count;
    }

    /// Make the next `count` `logs_with_sigs` calls never complete.
    pub fn stall_queries(&self, count: u32) {
        self.state.write().stalled_queries = count;
    }

    /// Make the next `count` `register_filter` calls never complete.
    pub fn stall_registrations(&self, count: u32) {
        self.state.write().stalled_registrations = count;
    }

    pub fn registered_filters(&self) -> Vec<(Address, Vec<B256>)> {
        self.state.read().filters.clone()
    }

    pub fn replay_requests(&self) -> Vec<u64> {
        self.state.read().replays.clone()
    }

    /// Number of `logs_with_sigs` calls served, failed ones included.
    pub fn query_count(&self) -> u64 {
        self.state.read().queries
    }

    /// `(from_block, to_block)` of every `logs_with_sigs` call, in call order.
    pub fn query_ranges(&self) -> Vec<(u64, u64)> {
        self.state.read().query_ranges.clone()
    }

    fn take_failure(state: &mut MemoryState) -> Result<(), LogSourceError> {
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(LogSourceError::Rpc("injected failure".to_string()));
        }
        Ok(())
    }

    fn take_stall(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            return true;
        }
        false
    }
}

#[async_trait::async_trait]
impl LogSource for MemoryLogSource {
    async fn register_filter(
        &self,
        address: Address,
        event_sigs: Vec<B256>,
    ) -> Result<(), LogSourceError> {
        let stalled = Self::take_stall(&mut self.state.write().stalled_registrations);
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.write();
        if !state
            .filters
            .iter()
            .any(|(a, sigs)| *a == address && *sigs == event_sigs)
        {
            state.filters.push((address, event_sigs));
        }
        Ok(())
    }

    async fn latest_block(&self) -> Result<u64, LogSourceError> {
        let mut state = self.state.write();
        Self::take_failure(&mut state)?;
        Ok(state.head)
    }

    async fn logs_with_sigs(
        &self,
        from_block: u64,
        to_block: u64,
        event_sigs: &[B256],
        address: Address,
    ) -> Result<Vec<IndexedLog>, LogSourceError> {
        let stalled = {
            let mut state = self.state.write();
            state.queries += 1;
            state.query_ranges.push((from_block, to_block));
            Self::take_stall(&mut state.stalled_queries)
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.write();
        Self::take_failure(&mut state)?;

        if from_block > to_block {
            return Err(LogSourceError::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == address)
            .filter(|log| (from_block..=to_block).contains(&log.block_number))
            .filter(|log| log.topic(0).is_some_and(|t0| event_sigs.contains(t0)))
            .cloned()
            .collect())
    }

    async fn replay(&self, from_block: u64) -> Result<(), LogSourceError> {
        self.state.write().replays.push(from_block);
        Ok(())
    }
}
