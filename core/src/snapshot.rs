//! The published search snapshot.
//!
//! Readers clone the current `Arc<Snapshot>` and keep using it for as long as
//! they need; publishing swaps the pointer and never touches a snapshot that
//! was already handed out. A retired snapshot is freed when its last reader
//! drops it.

use crate::index::InvertedIndex;
use parking_lot::RwLock;
use std::sync::Arc;
use time::OffsetDateTime;

/// One immutable, fully built index generation.
#[derive(Debug)]
pub struct Snapshot {
    pub generation: u64,
    pub built_at: OffsetDateTime,
    pub index: InvertedIndex,
}

impl Snapshot {
    pub fn empty() -> Self {
        Snapshot { generation: 0, built_at: OffsetDateTime::now_utc(), index: InvertedIndex::new() }
    }
}

#[derive(Debug)]
pub(crate) struct SnapshotCell {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotCell {
    pub(crate) fn new(initial: Snapshot) -> Self {
        SnapshotCell { current: RwLock::new(Arc::new(initial)) }
    }

    pub(crate) fn load(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Swap in `next` and hand back the retired snapshot.
    pub(crate) fn publish(&self, next: Arc<Snapshot>) -> Arc<Snapshot> {
        let mut current = self.current.write();
        std::mem::replace(&mut *current, next)
    }
}

/// Read-only handle on the current snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    cell: Arc<SnapshotCell>,
}

impl SnapshotReader {
    pub(crate) fn new(cell: Arc<SnapshotCell>) -> Self { SnapshotReader { cell } }

    pub fn load(&self) -> Arc<Snapshot> { self.cell.load() }
}
