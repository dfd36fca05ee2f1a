//! Persistence interface consumed by the core.
//!
//! The core only ever stores small fixed-layout blobs (the fabric table,
//! the discriminator), so the interface is a synchronous key/value
//! store. Backends live in the bridge crate; tests use the in-memory
//! implementation there.

use thiserror::Error;

/// Errors surfaced by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend could not complete a read or write
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored record is larger than the caller's buffer
    #[error("record under key '{key}' needs {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall {
        /// Key being read
        key: String,
        /// Size of the stored record
        needed: usize,
        /// Capacity the caller provided
        capacity: usize,
    },
}

/// Synchronous key/value blob storage.
///
/// Writes are atomic per key and a later read returns the most recent
/// write. A missing key is not an error: reads return `None` so callers
/// can treat absence as "first boot".
pub trait KvStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous record.
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read the record under `key` into `buf`.
    ///
    /// Returns the record length, or `None` if the key has never been
    /// written.
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StorageError>;
}
