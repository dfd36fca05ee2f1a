//! Persistent storage backend on `redb`.
//!
//! Stands in for the device flash: a single table of key to blob, with
//! each write committed before the call returns so a power cut never
//! loses an acknowledged write.

use std::{path::Path, sync::Arc};

use redb::{Database, TableDefinition};

use hearth_core::{KvStore, StorageError};

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hearth_kv");

/// `redb`-backed key/value store.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RedbStorage {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table =
                txn.open_table(KV_TABLE).map_err(|e| StorageError::Backend(e.to_string()))?;
            table.insert(key, data).map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn read(&self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = match txn.open_table(KV_TABLE) {
            Ok(table) => table,
            // First boot: the table does not exist until the first write.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StorageError::Backend(e.to_string())),
        };

        match table.get(key).map_err(|e| StorageError::Backend(e.to_string()))? {
            None => Ok(None),
            Some(guard) => {
                let data = guard.value();
                if data.len() > buf.len() {
                    return Err(StorageError::BufferTooSmall {
                        key: key.to_string(),
                        needed: data.len(),
                        capacity: buf.len(),
                    });
                }
                buf[..data.len()].copy_from_slice(data);
                Ok(Some(data.len()))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hearth-redb-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn records_survive_reopen() {
        let path = temp_db_path("reopen");
        {
            let store = RedbStorage::open(&path).unwrap();
            store.write("matter_discriminator", &[0x34, 0x0B]).unwrap();
        }

        let store = RedbStorage::open(&path).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(store.read("matter_discriminator", &mut buf).unwrap(), Some(2));
        assert_eq!(buf, [0x34, 0x0B]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_key_is_none_on_fresh_database() {
        let path = temp_db_path("fresh");
        let store = RedbStorage::open(&path).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(store.read("matter_fabrics", &mut buf).unwrap(), None);
        let _ = std::fs::remove_file(&path);
    }
}
