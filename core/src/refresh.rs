//! Snapshot rebuild and publication.
//!
//! A refresh scans every record from the source, builds a private index, and
//! publishes it with a single pointer swap. Readers of the previous snapshot
//! are never blocked and keep their snapshot until they finish with it.

use crate::document::{build_document, PackageRecord};
use crate::error::{RefreshError, StoreError};
use crate::index::{InsertOutcome, InvertedIndex};
use crate::snapshot::{Snapshot, SnapshotCell, SnapshotReader};
use crate::store::{RecordSource, RecordStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub records: usize,
    pub documents: usize,
    /// Records rejected by document construction.
    pub skipped: usize,
    /// Records superseded by a newer version of the same package path.
    pub superseded: usize,
}

/// Build a fresh index from `records`. Invalid records are logged and skipped.
pub fn build_index<I>(records: I) -> (InvertedIndex, BuildReport)
where
    I: IntoIterator<Item = PackageRecord>,
{
    let mut index = InvertedIndex::new();
    let mut report = BuildReport::default();
    for record in records {
        report.records += 1;
        match build_document(&record) {
            Ok(doc) => {
                if index.insert(doc) != InsertOutcome::Inserted {
                    report.superseded += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "skipping record");
                report.skipped += 1;
            }
        }
    }
    report.documents = index.len();
    (index, report)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshStats {
    pub generation: u64,
    pub elapsed_s: f64,
    #[serde(flatten)]
    pub report: BuildReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Published(RefreshStats),
    /// A build that started after this trigger already covered it.
    Coalesced,
}

/// Owns the current snapshot pointer and the source it is rebuilt from.
pub struct RefreshCoordinator<S> {
    source: S,
    cell: Arc<SnapshotCell>,
    build_lock: Mutex<()>,
    requested: AtomicU64,
    covered: AtomicU64,
}

impl<S: RecordSource> RefreshCoordinator<S> {
    /// Starts out serving an empty snapshot.
    pub fn new(source: S) -> Self {
        RefreshCoordinator {
            source,
            cell: Arc::new(SnapshotCell::new(Snapshot::empty())),
            build_lock: Mutex::new(()),
            requested: AtomicU64::new(0),
            covered: AtomicU64::new(0),
        }
    }

    pub fn reader(&self) -> SnapshotReader { SnapshotReader::new(self.cell.clone()) }

    pub fn current(&self) -> Arc<Snapshot> { self.cell.load() }

    pub fn source(&self) -> &S { &self.source }

    /// Rebuild from a full scan of the source and publish the result. On failure
    /// the previously published snapshot stays in place.
    pub fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let _build = self.build_lock.lock();
        if self.covered.load(Ordering::SeqCst) >= ticket {
            debug!(ticket, "refresh coalesced");
            return Ok(RefreshOutcome::Coalesced);
        }
        // every trigger up to here is registered before the scan starts
        let upto = self.requested.load(Ordering::SeqCst);

        let start = Instant::now();
        let records = self.source.scan_all().map_err(|e| {
            warn!(error = %e, "refresh aborted, keeping current snapshot");
            RefreshError::RefreshFailed(e)
        })?;
        let (index, report) = build_index(records);

        let generation = self.cell.load().generation + 1;
        let retired = self.cell.publish(Arc::new(Snapshot {
            generation,
            built_at: OffsetDateTime::now_utc(),
            index,
        }));
        self.covered.store(upto, Ordering::SeqCst);

        let elapsed = start.elapsed();
        info!(
            generation,
            documents = report.documents,
            skipped = report.skipped,
            superseded = report.superseded,
            elapsed_ms = elapsed.as_millis() as u64,
            "published search snapshot"
        );
        debug!(readers = Arc::strong_count(&retired) - 1, "retiring snapshot {}", retired.generation);

        Ok(RefreshOutcome::Published(RefreshStats {
            generation,
            elapsed_s: elapsed.as_secs_f64(),
            report,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Generation serving the batch; unchanged when every record was stale.
    pub generation: u64,
    /// One outcome per record, in input order.
    pub outcomes: Vec<InsertOutcome>,
}

impl<S: RecordStore> RefreshCoordinator<S> {
    /// Store a record and publish it without waiting for the next full refresh.
    pub fn insert(&self, record: PackageRecord) -> Result<InsertOutcome, StoreError> {
        let report = self.insert_many(vec![record])?;
        Ok(report.outcomes.into_iter().next().unwrap_or(InsertOutcome::Stale))
    }

    /// Store a batch of records, typically every package of one module version,
    /// and publish them together as one new generation.
    ///
    /// The whole batch is validated before anything is stored, so one invalid
    /// record rejects all of them. The current index is copied once, every
    /// document is applied to the copy, and the copy is swapped in.
    pub fn insert_many(&self, records: Vec<PackageRecord>) -> Result<BatchReport, StoreError> {
        let docs = records.iter().map(build_document).collect::<Result<Vec<_>, _>>()?;
        let _build = self.build_lock.lock();
        for record in records {
            self.source.put(record)?;
        }

        let current = self.cell.load();
        if docs.is_empty() {
            return Ok(BatchReport { generation: current.generation, outcomes: Vec::new() });
        }
        let mut index = current.index.clone();
        let outcomes: Vec<InsertOutcome> = docs.into_iter().map(|doc| index.insert(doc)).collect();
        if outcomes.iter().all(|o| *o == InsertOutcome::Stale) {
            return Ok(BatchReport { generation: current.generation, outcomes });
        }

        let generation = current.generation + 1;
        self.cell.publish(Arc::new(Snapshot { generation, built_at: OffsetDateTime::now_utc(), index }));
        debug!(generation, records = outcomes.len(), "published inserted batch");
        Ok(BatchReport { generation, outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rec(path: &str, version: &str, synopsis: &str) -> PackageRecord {
        PackageRecord {
            module_path: "example.com".into(),
            package_path: path.into(),
            version: version.into(),
            name: path.rsplit('/').next().unwrap_or_default().into(),
            synopsis: synopsis.into(),
            readme: String::new(),
            licenses: vec![],
            commit_time: OffsetDateTime::UNIX_EPOCH,
            num_imported_by: 0,
        }
    }

    #[test]
    fn build_keeps_latest_version_and_skips_invalid() {
        let (index, report) = build_index(vec![
            rec("example.com/a", "v1.0.0", "old"),
            rec("example.com/a", "v1.2.0", "new"),
            rec("example.com/b", "garbage", "broken"),
            rec("", "v1.0.0", "nameless"),
        ]);
        assert_eq!(report, BuildReport { records: 4, documents: 1, skipped: 2, superseded: 1 });
        assert_eq!(index.get_by_path("example.com/a").unwrap().version, "v1.2.0");
    }

    #[test]
    fn sequential_refreshes_publish_new_generations() {
        let coordinator = RefreshCoordinator::new(MemoryStore::new());
        assert_eq!(coordinator.current().generation, 0);
        assert!(matches!(coordinator.refresh().unwrap(), RefreshOutcome::Published(s) if s.generation == 1));
        assert!(matches!(coordinator.refresh().unwrap(), RefreshOutcome::Published(s) if s.generation == 2));
    }

    #[test]
    fn insert_publishes_immediately() {
        let coordinator = RefreshCoordinator::new(MemoryStore::new());
        let reader = coordinator.reader();
        let before = reader.load();
        assert_eq!(
            coordinator.insert(rec("example.com/a", "v1.0.0", "widgets")).unwrap(),
            InsertOutcome::Inserted
        );
        assert!(before.index.is_empty());
        assert_eq!(reader.load().index.query("widgets").len(), 1);
        assert_eq!(coordinator.source().len(), 1);

        assert_eq!(
            coordinator.insert(rec("example.com/a", "v0.9.0", "gadgets")).unwrap(),
            InsertOutcome::Stale
        );
        assert!(reader.load().index.query("gadgets").is_empty());
    }

    #[test]
    fn batch_is_published_as_one_generation() {
        let coordinator = RefreshCoordinator::new(MemoryStore::new());
        coordinator.insert(rec("example.com/a", "v1.0.0", "widgets")).unwrap();
        let reader = coordinator.reader();
        let before = reader.load();

        let report = coordinator
            .insert_many(vec![
                rec("example.com/a", "v1.1.0", "widgets"),
                rec("example.com/b", "v1.0.0", "widgets"),
                rec("example.com/c", "v1.0.0", "widgets"),
                rec("example.com/a", "v0.1.0", "widgets"),
            ])
            .unwrap();
        assert_eq!(report.generation, before.generation + 1);
        assert_eq!(
            report.outcomes,
            vec![InsertOutcome::Replaced, InsertOutcome::Inserted, InsertOutcome::Inserted, InsertOutcome::Stale]
        );
        assert_eq!(before.index.query("widgets").len(), 1);
        let after = reader.load();
        assert_eq!(after.generation, report.generation);
        assert_eq!(after.index.query("widgets").len(), 3);
        assert_eq!(coordinator.source().len(), 5);
    }

    #[test]
    fn invalid_record_rejects_the_whole_batch() {
        let coordinator = RefreshCoordinator::new(MemoryStore::new());
        let err = coordinator.insert_many(vec![
            rec("example.com/a", "v1.0.0", "fine"),
            rec("example.com/b", "not-a-version", "broken"),
        ]);
        assert!(matches!(err, Err(StoreError::Invalid(_))));
        assert!(coordinator.source().is_empty());
        assert_eq!(coordinator.current().generation, 0);

        let empty = coordinator.insert_many(Vec::new()).unwrap();
        assert_eq!(empty, BatchReport { generation: 0, outcomes: Vec::new() });
    }

    #[test]
    fn insert_rejects_invalid_record() {
        let coordinator = RefreshCoordinator::new(MemoryStore::new());
        assert!(matches!(coordinator.insert(rec("", "v1.0.0", "x")), Err(StoreError::Invalid(_))));
        assert_eq!(coordinator.current().generation, 0);
    }
}
