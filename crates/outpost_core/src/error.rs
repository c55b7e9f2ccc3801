//! Error types for Outpost core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Outpost core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The durable medium failed (disk full, device removed).
    #[error("storage error: {0}")]
    StoreIo(#[from] outpost_storage::StorageError),

    /// Filesystem error outside a storage backend (directories, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The write-ahead log or checkpoint image cannot be decoded.
    #[error("store corruption: {message}")]
    StoreCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A migration step failed; its transaction was aborted.
    #[error("migration to version {version} ({name}) failed: {message}")]
    Migration {
        /// Target version of the failing migration.
        version: u32,
        /// Name of the failing migration.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// The store was written by a newer release.
    #[error("store is at protocol version {stored}, this build supports up to {current}")]
    IncompatibleVersion {
        /// Version found in the store.
        stored: u32,
        /// Version compiled into this build.
        current: u32,
    },

    /// Maintenance found an inconsistency it cannot repair.
    #[error("integrity violation: {message}")]
    IntegrityViolation {
        /// Description of the violation.
        message: String,
    },

    /// A typed record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Another process holds the database directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The database has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a store corruption error.
    pub fn store_corruption(message: impl Into<String>) -> Self {
        Self::StoreCorruption {
            message: message.into(),
        }
    }

    /// Creates a migration error.
    pub fn migration(version: u32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            version,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an integrity violation error.
    pub fn integrity_violation(message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for failures of the durable medium.
    ///
    /// Hosts use this to tell "retry later" apart from "reset the store".
    #[must_use]
    pub fn is_store_io(&self) -> bool {
        matches!(self, Self::StoreIo(_) | Self::Io(_))
    }

    /// Returns true when the recommended recovery is a destructive reset.
    #[must_use]
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            Self::StoreCorruption { .. } | Self::ChecksumMismatch { .. } | Self::Migration { .. }
        )
    }
}
