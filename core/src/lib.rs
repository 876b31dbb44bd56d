//! Package search core: weighted search documents, the inverted index, ranked
//! queries, and snapshot refresh that never blocks readers.

pub mod document;
pub mod error;
pub mod index;
pub mod persist;
pub mod query;
pub mod refresh;
pub mod snapshot;
pub mod store;
pub mod tokenizer;
pub mod version;

pub use document::{build_document, sub_paths, PackageRecord, SearchDocument, Weight};
pub use error::{DocumentError, RefreshError, SearchError, StoreError};
pub use index::{DocId, InsertOutcome, InvertedIndex, Posting};
pub use persist::SledStore;
pub use query::{QueryEngine, SearchPage, SearchResult};
pub use refresh::{BatchReport, RefreshCoordinator, RefreshOutcome, RefreshStats};
pub use snapshot::{Snapshot, SnapshotReader};
pub use store::{MemoryStore, RecordSource, RecordStore};
