//! Record sources: where refresh reads package records from and where the
//! write path puts them.

use crate::document::{build_document, PackageRecord};
use crate::error::StoreError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Bulk read of every current package record.
pub trait RecordSource: Send + Sync {
    fn scan_all(&self) -> Result<Vec<PackageRecord>, StoreError>;
}

/// A record source that also accepts new records.
pub trait RecordStore: RecordSource {
    /// Validate and store a record. Returns `false` when a record with the same
    /// package path and version is already stored; records are immutable.
    fn put(&self, record: PackageRecord) -> Result<bool, StoreError>;
}

/// Rejects records that cannot be indexed.
pub fn validate(record: &PackageRecord) -> Result<(), StoreError> {
    build_document(record)?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<(String, String), PackageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.records.read().len() }

    pub fn is_empty(&self) -> bool { self.records.read().is_empty() }
}

impl FromIterator<PackageRecord> for MemoryStore {
    /// Collects without validation, so a source can hold records refresh must skip.
    fn from_iter<I: IntoIterator<Item = PackageRecord>>(iter: I) -> Self {
        let records = iter
            .into_iter()
            .map(|r| ((r.package_path.clone(), r.version.clone()), r))
            .collect();
        MemoryStore { records: RwLock::new(records) }
    }
}

impl RecordSource for MemoryStore {
    fn scan_all(&self) -> Result<Vec<PackageRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, record: PackageRecord) -> Result<bool, StoreError> {
        validate(&record)?;
        let key = (record.package_path.clone(), record.version.clone());
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record);
        Ok(true)
    }
}
