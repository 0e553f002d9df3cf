//! Error types for the device spine

use thiserror::Error;

/// Core Kestrel errors
///
/// Every variant is recoverable. Callers fall back to their own defaults;
/// nothing here is allowed to abort the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KestrelError {
    // Storage errors
    #[error("Storage mount failed: {0}")]
    MountFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Entry expired: {0}")]
    Expired(String),

    #[error("Read failed for {path}: {reason}")]
    ReadFailure { path: String, reason: String },

    #[error("Malformed document {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    #[error("Write failed for {path}: {reason}")]
    WriteFailure { path: String, reason: String },

    #[error("Rename {from} -> {to} failed: {reason}")]
    RenameFailure {
        from: String,
        to: String,
        reason: String,
    },

    // Validation errors
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Document too large: {len} bytes (max {max})")]
    DocumentTooLarge { len: usize, max: usize },

    #[error("Invalid TTL: {0}ms exceeds half the counter range")]
    InvalidTtl(u32),

    // Bus errors
    #[error("Unknown event kind: {0}")]
    InvalidEventKind(u8),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("Handler already subscribed to {0}")]
    DuplicateSubscription(&'static str),

    // Time sync errors
    #[error("Service not initialized")]
    NotInitialized,

    #[error("Network not connected")]
    NotConnected,

    #[error("Time sync already in progress")]
    SyncInProgress,

    #[error("Time sync retry interval not elapsed ({remaining_ms}ms left)")]
    SyncTooSoon { remaining_ms: u32 },

    #[error("Transport timed out after {0}ms")]
    TransportTimeout(u32),

    #[error("Transport error: {0}")]
    TransportError(String),
}

impl KestrelError {
    /// Absent and expired entries are expected outcomes, not faults.
    pub fn is_absent(&self) -> bool {
        matches!(self, KestrelError::NotFound(_) | KestrelError::Expired(_))
    }
}

/// Result type for Kestrel operations
pub type KestrelResult<T> = Result<T, KestrelError>;
