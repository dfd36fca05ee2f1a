//! Fabric table and its persistence blob.
//!
//! A fabric records the trust domain a commissioner installed: its id,
//! the vendor, and the root public key. The table survives reboots as a
//! single fixed-layout blob under [`FABRICS_KEY`]; a missing record
//! simply means the device has never been commissioned.
//!
//! Blob layout (little-endian): one count byte, then `count` records of
//! `fabric_id: u64`, `vendor_id: u16`, `root_public_key: [u8; 65]`,
//! `last_seen: u32` - 79 bytes per record, at most [`MAX_FABRICS`]
//! records.

use crate::error::CoreError;
use crate::storage::KvStore;

/// Fixed fabric table capacity.
pub const MAX_FABRICS: usize = 5;

/// Storage key for the fabric blob.
pub const FABRICS_KEY: &str = "matter_fabrics";

const RECORD_SIZE: usize = 8 + 2 + 65 + 4;

/// One commissioned fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fabric {
    /// Fabric identifier chosen by the commissioner
    pub fabric_id: u64,
    /// Vendor id of the commissioner
    pub vendor_id: u16,
    /// Root CA public key, uncompressed P-256
    pub root_public_key: [u8; 65],
    /// Unix time (seconds, truncated) the fabric was last active
    pub last_seen: u32,
}

/// Fixed-capacity fabric table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FabricTable {
    fabrics: Vec<Fabric>,
}

impl FabricTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active fabrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fabrics.len()
    }

    /// True if no fabric is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fabrics.is_empty()
    }

    /// A device with at least one fabric is commissioned.
    #[must_use]
    pub fn is_commissioned(&self) -> bool {
        !self.fabrics.is_empty()
    }

    /// Look up a fabric by id.
    #[must_use]
    pub fn get(&self, fabric_id: u64) -> Option<&Fabric> {
        self.fabrics.iter().find(|f| f.fabric_id == fabric_id)
    }

    /// Install or refresh a fabric.
    ///
    /// An existing fabric with the same id is updated in place (the
    /// commissioner re-commissioned); a new fabric takes a free slot.
    ///
    /// # Errors
    ///
    /// [`CoreError::ResourceExhausted`] when all slots are taken.
    pub fn add(&mut self, fabric: Fabric) -> Result<(), CoreError> {
        if let Some(existing) = self.fabrics.iter_mut().find(|f| f.fabric_id == fabric.fabric_id) {
            *existing = fabric;
            return Ok(());
        }
        if self.fabrics.len() >= MAX_FABRICS {
            return Err(CoreError::ResourceExhausted {
                resource: "fabrics",
                capacity: MAX_FABRICS,
            });
        }
        self.fabrics.push(fabric);
        Ok(())
    }

    /// Remove a fabric. Returns false if the id is unknown.
    pub fn remove(&mut self, fabric_id: u64) -> bool {
        let before = self.fabrics.len();
        self.fabrics.retain(|f| f.fabric_id != fabric_id);
        self.fabrics.len() != before
    }

    /// Drop every fabric (factory reset path).
    pub fn clear(&mut self) {
        self.fabrics.clear();
    }

    /// Serialize to the persistence blob.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(1 + self.fabrics.len() * RECORD_SIZE);
        blob.push(self.fabrics.len() as u8);
        for fabric in &self.fabrics {
            blob.extend_from_slice(&fabric.fabric_id.to_le_bytes());
            blob.extend_from_slice(&fabric.vendor_id.to_le_bytes());
            blob.extend_from_slice(&fabric.root_public_key);
            blob.extend_from_slice(&fabric.last_seen.to_le_bytes());
        }
        blob
    }

    /// Parse a persistence blob.
    ///
    /// # Errors
    ///
    /// [`CoreError::MalformedPayload`] if the count byte disagrees with
    /// the blob length or exceeds [`MAX_FABRICS`].
    pub fn decode(blob: &[u8]) -> Result<Self, CoreError> {
        let Some((&count, mut records)) = blob.split_first() else {
            return Err(CoreError::MalformedPayload("empty fabric blob"));
        };
        let count = usize::from(count);
        if count > MAX_FABRICS {
            return Err(CoreError::MalformedPayload("fabric count exceeds capacity"));
        }
        if records.len() != count * RECORD_SIZE {
            return Err(CoreError::MalformedPayload("fabric blob length mismatch"));
        }

        let mut fabrics = Vec::with_capacity(count);
        for _ in 0..count {
            let (record, rest) = records.split_at(RECORD_SIZE);
            records = rest;

            let mut fabric_id = [0u8; 8];
            fabric_id.copy_from_slice(&record[0..8]);
            let mut vendor_id = [0u8; 2];
            vendor_id.copy_from_slice(&record[8..10]);
            let mut root_public_key = [0u8; 65];
            root_public_key.copy_from_slice(&record[10..75]);
            let mut last_seen = [0u8; 4];
            last_seen.copy_from_slice(&record[75..79]);

            fabrics.push(Fabric {
                fabric_id: u64::from_le_bytes(fabric_id),
                vendor_id: u16::from_le_bytes(vendor_id),
                root_public_key,
                last_seen: u32::from_le_bytes(last_seen),
            });
        }
        Ok(Self { fabrics })
    }

    /// Load the table from storage; a missing record is an empty table.
    pub fn load(store: &dyn KvStore) -> Result<Self, CoreError> {
        let mut buf = [0u8; 1 + MAX_FABRICS * RECORD_SIZE];
        match store.read(FABRICS_KEY, &mut buf)? {
            None => Ok(Self::new()),
            Some(len) => Self::decode(&buf[..len]),
        }
    }

    /// Persist the table.
    pub fn save(&self, store: &dyn KvStore) -> Result<(), CoreError> {
        store.write(FABRICS_KEY, &self.encode())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric(id: u64) -> Fabric {
        let mut root_public_key = [0u8; 65];
        root_public_key[0] = 0x04;
        root_public_key[1] = id as u8;
        Fabric { fabric_id: id, vendor_id: 0xFFF1, root_public_key, last_seen: 1000 + id as u32 }
    }

    #[test]
    fn blob_round_trip() {
        let mut table = FabricTable::new();
        table.add(fabric(1)).unwrap();
        table.add(fabric(2)).unwrap();

        let decoded = FabricTable::decode(&table.encode()).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.get(2), Some(&fabric(2)));
    }

    #[test]
    fn empty_table_encodes_one_byte()  {
        let table = FabricTable::new();
        assert_eq!(table.encode(), vec![0]);
        assert_eq!(FabricTable::decode(&[0]).unwrap(), table);
    }

    #[test]
    fn capacity_is_five() {
        let mut table = FabricTable::new();
        for id in 1..=5 {
            table.add(fabric(id)).unwrap();
        }
        assert!(matches!(
            table.add(fabric(6)),
            Err(CoreError::ResourceExhausted { resource: "fabrics", .. })
        ));
        assert!(table.remove(4));
        table.add(fabric(6)).unwrap();
    }

    #[test]
    fn same_fabric_id_updates_in_place() {
        let mut table = FabricTable::new();
        table.add(fabric(1)).unwrap();
        let mut refreshed = fabric(1);
        refreshed.last_seen = 9999;
        table.add(refreshed).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).map(|f| f.last_seen), Some(9999));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let mut table = FabricTable::new();
        table.add(fabric(1)).unwrap();
        let blob = table.encode();

        assert!(FabricTable::decode(&blob[..blob.len() - 1]).is_err());
        assert!(FabricTable::decode(&[]).is_err());
        assert!(FabricTable::decode(&[6]).is_err());
    }

    #[test]
    fn commissioned_means_at_least_one_fabric() {
        let mut table = FabricTable::new();
        assert!(!table.is_commissioned());
        table.add(fabric(1)).unwrap();
        assert!(table.is_commissioned());
        table.clear();
        assert!(!table.is_commissioned());
    }
}
