use crate::document::PackageRecord;
use crate::error::StoreError;
use crate::store::{validate, RecordSource, RecordStore};
use std::path::Path;

const RECORDS_TREE: &str = "records";

/// sled-backed record store. Values are bincode-encoded `PackageRecord`s keyed
/// by `package_path \0 version`.
pub struct SledStore {
    db: sled::Db,
    records: sled::Tree,
}

fn record_key(record: &PackageRecord) -> Vec<u8> {
    let mut key = Vec::with_capacity(record.package_path.len() + record.version.len() + 1);
    key.extend_from_slice(record.package_path.as_bytes());
    key.push(0);
    key.extend_from_slice(record.version.as_bytes());
    key
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let db = sled::open(root.as_ref())?;
        let records = db.open_tree(RECORDS_TREE)?;
        Ok(Self { db, records })
    }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl RecordSource for SledStore {
    fn scan_all(&self) -> Result<Vec<PackageRecord>, StoreError> {
        let mut out = Vec::with_capacity(self.records.len());
        for entry in self.records.iter() {
            let (_key, value) = entry?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }
}

impl RecordStore for SledStore {
    fn put(&self, record: PackageRecord) -> Result<bool, StoreError> {
        validate(&record)?;
        let bytes = bincode::serialize(&record)?;
        let inserted = self
            .records
            .compare_and_swap(record_key(&record), None as Option<&[u8]>, Some(bytes))?
            .is_ok();
        Ok(inserted)
    }
}
