//! Error types for configuration tracking.

use alloy_primitives::B256;

/// Errors surfaced by a [`LogSource`](crate::LogSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSourceError {
    /// The node or indexer failed the query
    Rpc(String),
    /// The query was abandoned because the caller cancelled it
    Cancelled,
    /// `from` is past `to`
    InvalidRange { from: u64, to: u64 },
}

impl core::fmt::Display for LogSourceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LogSourceError::Rpc(msg) => write!(f, "RPC error: {}", msg),
            LogSourceError::Cancelled => write!(f, "Log query cancelled"),
            LogSourceError::InvalidRange { from, to } => {
                write!(f, "Invalid block range: {} > {}", from, to)
            }
        }
    }
}

impl std::error::Error for LogSourceError {}

/// Errors returned by pollers, caches and the digester
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Log source query failed; not retried at this layer
    LogSource(LogSourceError),
    /// A log matched our filter but its payload could not be decoded
    Decode { event: String, reason: String },
    /// A transmitter account is not a 32-byte hex key
    InvalidTransmitter { index: usize, reason: String },
    /// The same digest was stored with different signers or f
    CacheConflict { digest: B256 },
    /// Service was started twice
    AlreadyStarted,
    /// Service is not running
    NotRunning,
}

impl core::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TrackerError::LogSource(e) => write!(f, "Log source error: {}", e),
            TrackerError::Decode { event, reason } => {
                write!(f, "Failed to decode {} log: {}", event, reason)
            }
            TrackerError::InvalidTransmitter { index, reason } => {
                write!(f, "Invalid transmitter at index {}: {}", index, reason)
            }
            TrackerError::CacheConflict { digest } => {
                write!(f, "Config cache conflict: digest {} stored with different contents", digest)
            }
            TrackerError::AlreadyStarted => write!(f, "Service already started"),
            TrackerError::NotRunning => write!(f, "Service is not running"),
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::LogSource(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LogSourceError> for TrackerError {
    fn from(e: LogSourceError) -> Self {
        TrackerError::LogSource(e)
    }
}

pub type Result<T, E = TrackerError> = core::result::Result<T, E>;
