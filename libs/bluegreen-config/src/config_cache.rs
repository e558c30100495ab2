//! Shared digest -> (signers, f) store.
//!
//! Written by every poller that observes a configuration, read by consumers
//! that only hold a digest (for example report verification). Entries live
//! for the process lifetime; there is no delete.

use std::collections::HashMap;

use alloy_primitives::Bytes;
use parking_lot::RwLock;

use crate::error::{Result, TrackerError};
use crate::types::ConfigDigest;

/// Signer set and fault tolerance recorded for one digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedConfigEntry {
    pub digest: ConfigDigest,
    pub signers: Vec<Bytes>,
    pub f: u8,
}

/// Thread-safe digest cache using RwLock.
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: RwLock<HashMap<ConfigDigest, CachedConfigEntry>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `signers` and `f` for `digest`.
    ///
    /// Storing identical data again is a no-op. Storing different data under
    /// an existing digest is rejected and leaves the first entry in place.
    pub fn store_config(&self, digest: ConfigDigest, signers: &[Bytes], f: u8) -> Result<()> {
        if let Some(existing) = self.entries.read().get(&digest) {
            return Self::check_same(existing, signers, f);
        }

        let mut entries = self.entries.write();
        // Another writer may have won the race between the two locks.
        if let Some(existing) = entries.get(&digest) {
            return Self::check_same(existing, signers, f);
        }
        entries.insert(
            digest,
            CachedConfigEntry {
                digest,
                signers: signers.to_vec(),
                f,
            },
        );
        tracing::debug!(%digest, signers = signers.len(), f, "Cached config");
        Ok(())
    }

    fn check_same(existing: &CachedConfigEntry, signers: &[Bytes], f: u8) -> Result<()> {
        if existing.f == f && existing.signers == signers {
            Ok(())
        } else {
            tracing::error!(digest = %existing.digest, "Conflicting config stored under the same digest");
            Err(TrackerError::CacheConflict {
                digest: existing.digest,
            })
        }
    }

    pub fn get(&self, digest: &ConfigDigest) -> Option<CachedConfigEntry> {
        self.entries.read().get(digest).cloned()
    }

    pub fn contains(&self, digest: &ConfigDigest) -> bool {
        self.entries.read().contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
