//! In-memory storage backend for tests and simulation.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use hearth_core::{KvStore, StorageError};

/// In-memory key/value store.
///
/// All state is behind `Arc<Mutex<_>>`, so clones share the same
/// records - a test can hand one clone to the coordinator and inspect
/// writes through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for MemoryStorage {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        match self.lock().get(key) {
            None => Ok(None),
            Some(data) if data.len() <= buf.len() => {
                buf[..data.len()].copy_from_slice(data);
                Ok(Some(data.len()))
            },
            Some(data) => Err(StorageError::BufferTooSmall {
                key: key.to_string(),
                needed: data.len(),
                capacity: buf.len(),
            }),
        }
    }
}
