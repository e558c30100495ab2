//! Background retired-digest cache.
//!
//! Polls `PromoteStagingConfig` logs for one DON and records the digest each
//! promotion retired. Lookups never touch the network; they read whatever the
//! last successful poll produced.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TrackerError};
use crate::events::{decode_retired_digest, don_id_to_bytes32, EventSignatures};
use crate::log_source::LogSource;
use crate::types::ConfigDigest;

/// Poll scheduling for [`ShouldRetireCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetireCacheConfig {
    /// Base delay between polls in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound of the random delay added to each tick
    pub jitter_ms: u64,
}

impl Default for RetireCacheConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            jitter_ms: 100,
        }
    }
}

impl RetireCacheConfig {
    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    fn next_delay(&self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.poll_interval_ms + jitter)
    }
}

/// Lifecycle of the background poll task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Default)]
struct RetiredSet {
    digests: HashSet<ConfigDigest>,
    /// Highest block included in a successful poll
    latest_block_num: u64,
}

struct Inner {
    log_source: Arc<dyn LogSource>,
    address: Address,
    don_id: u32,
    don_id_topic: B256,
    from_block: u64,
    retired: RwLock<RetiredSet>,
    /// Held for a whole tick so manual and background polls never overlap
    tick: AsyncMutex<()>,
}

impl Inner {
    async fn poll_once(&self) -> Result<usize> {
        let _tick = self.tick.lock().await;

        let from_block = {
            let retired = self.retired.read();
            if retired.latest_block_num > 0 {
                retired.latest_block_num + 1
            } else {
                self.from_block
            }
        };

        let head = self.log_source.latest_block().await?;
        if head < from_block {
            return Ok(0);
        }

        let logs = self
            .log_source
            .logs_with_sigs(
                from_block,
                head,
                &[EventSignatures::promote_staging_config()],
                self.address,
            )
            .await?;

        let digests = logs
            .iter()
            .filter(|log| log.topic(1) == Some(&self.don_id_topic))
            .map(decode_retired_digest)
            .collect::<Result<Vec<_>>>()?;
        let max_block = logs.iter().map(|log| log.block_number).max();

        // Nothing is mutated until the whole batch decoded.
        let mut retired = self.retired.write();
        let mut added = 0;
        for digest in digests {
            if retired.digests.insert(digest) {
                tracing::info!(don_id = self.don_id, %digest, "Config digest retired");
                added += 1;
            }
        }
        if let Some(block) = max_block {
            if block > retired.latest_block_num {
                retired.latest_block_num = block;
            }
        }

        tracing::trace!(
            from_block,
            to_block = head,
            latest_block_num = retired.latest_block_num,
            "Retire cache poll"
        );
        Ok(added)
    }

    async fn run(self: Arc<Self>, config: RetireCacheConfig, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = sleep(config.next_delay()) => {}
            }

            tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        tracing::warn!(don_id = self.don_id, error = %e, "Retire cache poll failed");
                    }
                }
            }
        }
        tracing::info!(don_id = self.don_id, "Retire cache loop stopped");
    }
}

struct Lifecycle {
    state: ServiceState,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Settles a transitional state (`Starting`, `Stopping`) back to `Stopped`
/// if the transition does not finish, including when its future is dropped.
struct TransitionGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    transitional: ServiceState,
    finished: bool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == self.transitional {
            lifecycle.state = ServiceState::Stopped;
        }
    }
}

/// Membership cache of retired config digests, filled by a background task.
pub struct ShouldRetireCache {
    inner: Arc<Inner>,
    config: RetireCacheConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl ShouldRetireCache {
    pub fn new(
        log_source: Arc<dyn LogSource>,
        address: Address,
        don_id: u32,
        from_block: u64,
        config: RetireCacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                log_source,
                address,
                don_id,
                don_id_topic: don_id_to_bytes32(don_id),
                from_block,
                retired: RwLock::new(RetiredSet::default()),
                tick: AsyncMutex::new(()),
            }),
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Stopped,
                task: None,
            }),
        }
    }

    /// Register the promotion filter and spawn the poll loop.
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ServiceState::Stopped {
                return Err(TrackerError::AlreadyStarted);
            }
            lifecycle.state = ServiceState::Starting;
        }
        let mut guard = TransitionGuard {
            lifecycle: &self.lifecycle,
            transitional: ServiceState::Starting,
            finished: false,
        };

        self.inner
            .log_source
            .register_filter(
                self.inner.address,
                vec![EventSignatures::promote_staging_config()],
            )
            .await?;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(
            self.inner
                .clone()
                .run(self.config.clone(), cancel_token.clone()),
        );

        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = ServiceState::Running;
            lifecycle.task = Some((cancel_token, handle));
        }
        guard.finished = true;

        tracing::info!(
            don_id = self.inner.don_id,
            address = %self.inner.address,
            from_block = self.inner.from_block,
            poll_interval_ms = self.config.poll_interval_ms,
            "Retire cache started"
        );
        Ok(())
    }

    /// Cancel the poll loop and wait for it to exit.
    pub async fn close(&self) -> Result<()> {
        let (cancel_token, handle) = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.task.take() {
                Some(task) if lifecycle.state == ServiceState::Running => {
                    lifecycle.state = ServiceState::Stopping;
                    task
                }
                other => {
                    lifecycle.task = other;
                    return Err(TrackerError::NotRunning);
                }
            }
        };
        // Settles `Stopping` to `Stopped` on every exit path.
        let _guard = TransitionGuard {
            lifecycle: &self.lifecycle,
            transitional: ServiceState::Stopping,
            finished: false,
        };

        cancel_token.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Retire cache task panicked");
        }

        tracing::info!(don_id = self.inner.don_id, "Retire cache closed");
        Ok(())
    }

    /// Whether `digest` was retired by a promotion seen so far.
    pub fn should_retire(&self, digest: &ConfigDigest) -> bool {
        self.inner.retired.read().digests.contains(digest)
    }

    /// Run one poll now, returning how many new digests were recorded.
    pub async fn poll_once(&self) -> Result<usize> {
        self.inner.poll_once().await
    }

    pub fn latest_block_num(&self) -> u64 {
        self.inner.retired.read().latest_block_num
    }

    pub fn retired_count(&self) -> usize {
        self.inner.retired.read().digests.len()
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.lock().state
    }
}

impl Drop for ShouldRetireCache {
    fn drop(&mut self) {
        if let Some((cancel_token, _)) = self.lifecycle.get_mut().task.take() {
            cancel_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogSourceError;
    use crate::events::encode_promote_log;
    use crate::log_source::MemoryLogSource;

    const DON_ID: u32 = 3;

    fn contract() -> Address {
        Address::repeat_byte(0xc0)
    }

    fn retire_cache(source: &Arc<MemoryLogSource>, from_block: u64) -> ShouldRetireCache {
        ShouldRetireCache::new(
            source.clone(),
            contract(),
            DON_ID,
            from_block,
            RetireCacheConfig::default(),
        )
    }

    fn promote(source: &MemoryLogSource, retired: u8, block: u64) {
        source.push_log(encode_promote_log(
            contract(),
            don_id_to_bytes32(DON_ID),
            B256::repeat_byte(retired),
            true,
            block,
            0,
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = RetireCacheConfig::default();
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.jitter_ms, 100);

        let config = config.with_poll_interval_ms(50).with_jitter_ms(0);
        assert_eq!(config.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_stays_within_jitter() {
        let config = RetireCacheConfig::default();
        for _ in 0..100 {
            let delay = config.next_delay();
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[tokio::test]
    async fn test_promotion_retires_digest() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);
        let d7 = B256::repeat_byte(7);

        assert!(!cache.should_retire(&d7));

        promote(&source, 7, 20);
        assert_eq!(cache.poll_once().await.unwrap(), 1);

        assert!(cache.should_retire(&d7));
        assert!(!cache.should_retire(&B256::repeat_byte(8)));
        assert_eq!(cache.latest_block_num(), 20);
    }

    #[tokio::test]
    async fn test_other_dons_do_not_retire() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);
        source.push_log(encode_promote_log(
            contract(),
            don_id_to_bytes32(DON_ID + 1),
            B256::repeat_byte(7),
            false,
            5,
            0,
        ));

        assert_eq!(cache.poll_once().await.unwrap(), 0);
        assert!(!cache.should_retire(&B256::repeat_byte(7)));
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_state() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);

        promote(&source, 1, 10);
        cache.poll_once().await.unwrap();

        promote(&source, 2, 12);
        source.fail_next(1);
        let err = cache.poll_once().await.unwrap_err();
        assert!(matches!(err, TrackerError::LogSource(LogSourceError::Rpc(_))));

        assert_eq!(cache.latest_block_num(), 10);
        assert!(cache.should_retire(&B256::repeat_byte(1)));
        assert!(!cache.should_retire(&B256::repeat_byte(2)));

        cache.poll_once().await.unwrap();
        assert_eq!(cache.latest_block_num(), 12);
        assert!(cache.should_retire(&B256::repeat_byte(2)));
    }

    #[tokio::test]
    async fn test_high_water_mark_is_monotonic() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);
        let mut last = 0;

        for (digest, block) in [(1u8, 3u64), (2, 9), (3, 11), (4, 15)] {
            promote(&source, digest, block);
            cache.poll_once().await.unwrap();
            assert!(cache.latest_block_num() >= last);
            last = cache.latest_block_num();
        }

        // Re-polling with no new logs changes nothing
        assert_eq!(cache.poll_once().await.unwrap(), 0);
        assert_eq!(cache.latest_block_num(), 15);
        assert_eq!(cache.retired_count(), 4);
    }

    #[tokio::test]
    async fn test_repeated_digest_is_idempotent() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);

        promote(&source, 5, 4);
        promote(&source, 5, 6);
        assert_eq!(cache.poll_once().await.unwrap(), 1);
        assert_eq!(cache.retired_count(), 1);
        assert_eq!(cache.latest_block_num(), 6);
    }

    #[tokio::test]
    async fn test_from_block_floor_applies_to_first_poll() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 50);

        promote(&source, 1, 10);
        promote(&source, 2, 60);
        cache.poll_once().await.unwrap();

        assert!(!cache.should_retire(&B256::repeat_byte(1)));
        assert!(cache.should_retire(&B256::repeat_byte(2)));
    }

    #[tokio::test]
    async fn test_lifecycle_state_machine() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);

        assert_eq!(cache.state(), ServiceState::Stopped);
        assert_eq!(cache.close().await.unwrap_err(), TrackerError::NotRunning);

        cache.start().await.unwrap();
        assert_eq!(cache.state(), ServiceState::Running);
        assert_eq!(cache.start().await.unwrap_err(), TrackerError::AlreadyStarted);
        assert_eq!(
            source.registered_filters(),
            vec![(contract(), vec![EventSignatures::promote_staging_config()])]
        );

        cache.close().await.unwrap();
        assert_eq!(cache.state(), ServiceState::Stopped);

        // Restart after close is allowed
        cache.start().await.unwrap();
        cache.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_picks_up_promotions() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);
        cache.start().await.unwrap();

        promote(&source, 7, 30);
        sleep(Duration::from_millis(2500)).await;
        assert!(cache.should_retire(&B256::repeat_byte(7)));

        // Failed ticks are skipped and the loop keeps running
        promote(&source, 8, 31);
        source.fail_next(1);
        sleep(Duration::from_millis(5000)).await;
        assert!(cache.should_retire(&B256::repeat_byte(8)));
        assert_eq!(cache.state(), ServiceState::Running);

        cache.close().await.unwrap();
        let queries = source.query_count();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(source.query_count(), queries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_long_interval() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = ShouldRetireCache::new(
            source.clone(),
            contract(),
            DON_ID,
            0,
            RetireCacheConfig::default().with_poll_interval_ms(3_600_000),
        );
        cache.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), cache.close())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_start_leaves_service_stopped() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);
        source.stall_registrations(1);

        let pending = tokio::time::timeout(Duration::from_millis(50), cache.start()).await;
        assert!(pending.is_err());
        assert_eq!(cache.state(), ServiceState::Stopped);
        assert_eq!(cache.close().await.unwrap_err(), TrackerError::NotRunning);

        cache.start().await.unwrap();
        assert_eq!(cache.state(), ServiceState::Running);
        cache.close().await.unwrap();
        assert_eq!(cache.state(), ServiceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_poll_keeps_previous_state() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = retire_cache(&source, 0);

        promote(&source, 1, 10);
        cache.poll_once().await.unwrap();

        promote(&source, 2, 12);
        source.stall_queries(1);
        let pending = tokio::time::timeout(Duration::from_millis(50), cache.poll_once()).await;
        assert!(pending.is_err());

        assert_eq!(cache.latest_block_num(), 10);
        assert_eq!(cache.retired_count(), 1);
        assert!(!cache.should_retire(&B256::repeat_byte(2)));

        assert_eq!(cache.poll_once().await.unwrap(), 1);
        assert_eq!(cache.latest_block_num(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_do_not_overlap() {
        let source = Arc::new(MemoryLogSource::new());
        let cache = Arc::new(retire_cache(&source, 0));
        promote(&source, 1, 10);
        source.stall_queries(1);

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.poll_once().await }
        });
        sleep(Duration::from_millis(1)).await;
        assert_eq!(source.query_count(), 1);

        // A second poll waits for the stalled one instead of querying
        let second = tokio::time::timeout(Duration::from_millis(50), cache.poll_once()).await;
        assert!(second.is_err());
        assert_eq!(source.query_count(), 1);

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        assert_eq!(cache.poll_once().await.unwrap(), 1);
        assert_eq!(source.query_count(), 2);
    }
}
