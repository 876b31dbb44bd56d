//! Ranked, paginated search over the published snapshot.

use crate::document::SearchDocument;
use crate::error::SearchError;
use crate::index::SCORE_FLOOR;
use crate::snapshot::{Snapshot, SnapshotReader};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub package_path: String,
    pub module_path: String,
    pub version: String,
    pub synopsis: String,
    pub licenses: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub commit_time: OffsetDateTime,
    pub num_imported_by: u64,
    pub rank: f64,
    /// Size of the whole match set, not just this page.
    pub total_matches: u64,
}

impl SearchResult {
    fn from_document(doc: &SearchDocument, rank: f64, total_matches: u64) -> Self {
        SearchResult {
            name: doc.name.clone(),
            package_path: doc.package_path.clone(),
            module_path: doc.module_path.clone(),
            version: doc.version.clone(),
            synopsis: doc.synopsis.clone(),
            licenses: doc.licenses.clone(),
            commit_time: doc.commit_time,
            num_imported_by: doc.popularity,
            rank,
            total_matches,
        }
    }
}

/// One page of results and the size of the whole match set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub total_matches: u64,
    pub results: Vec<SearchResult>,
}

/// `text_score × ln(e + popularity)`. The popularity factor is at least 1 and
/// grows slowly, so it reorders similar matches without rescuing weak ones.
pub fn rank(text_score: f64, popularity: u64) -> f64 {
    text_score * (std::f64::consts::E + popularity as f64).ln()
}

/// Rank descending, then package path ascending.
fn compare(a: &(f64, &SearchDocument), b: &(f64, &SearchDocument)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.package_path.cmp(&b.1.package_path))
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    snapshots: SnapshotReader,
}

impl QueryEngine {
    pub fn new(snapshots: SnapshotReader) -> Self { QueryEngine { snapshots } }

    pub fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<SearchResult>, SearchError> {
        let snapshot = self.snapshots.load();
        Ok(search_snapshot(&snapshot, query, limit, offset, None)?.results)
    }

    /// Like [`QueryEngine::search`], but gives up with [`SearchError::Cancelled`]
    /// once `token` is cancelled.
    pub fn search_cancellable(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        token: &CancellationToken,
    ) -> Result<Vec<SearchResult>, SearchError> {
        Ok(self.search_page(query, limit, offset, token)?.results)
    }

    /// Cancellable search that also reports the match total when the page is
    /// past the end.
    pub fn search_page(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        token: &CancellationToken,
    ) -> Result<SearchPage, SearchError> {
        let snapshot = self.snapshots.load();
        search_snapshot(&snapshot, query, limit, offset, Some(token))
    }
}

/// Search one specific snapshot. Every result carries the same `total_matches`.
pub fn search_snapshot(
    snapshot: &Snapshot,
    query: &str,
    limit: usize,
    offset: usize,
    token: Option<&CancellationToken>,
) -> Result<SearchPage, SearchError> {
    if limit == 0 {
        return Err(SearchError::InvalidArgument("cannot search: limit cannot be 0".into()));
    }

    let index = &snapshot.index;
    let hits = match token {
        Some(token) => index.query_cancellable(query, token)?,
        None => index.query(query),
    };

    let mut ranked: Vec<(f64, &SearchDocument)> = hits
        .into_iter()
        .filter_map(|(id, t)| index.get(id).map(|doc| (rank(t, doc.popularity), doc)))
        .filter(|(r, _)| *r > SCORE_FLOOR)
        .collect();
    if token.is_some_and(CancellationToken::is_cancelled) {
        return Err(SearchError::Cancelled);
    }
    ranked.sort_by(compare);

    let total = ranked.len() as u64;
    debug!(query, generation = snapshot.generation, total, limit, offset, "search");
    let results = ranked
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(r, doc)| SearchResult::from_document(doc, r, total))
        .collect();
    Ok(SearchPage { total_matches: total, results })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_is_monotone_in_popularity() {
        for t in [1e-6, 0.2, 1.0, 1.7] {
            let mut prev = rank(t, 0);
            assert!((prev - t).abs() < 1e-12, "ln(e) == 1");
            for p in [1u64, 2, 10, 500, 1_000_000, u64::MAX] {
                let r = rank(t, p);
                assert!(r >= prev, "rank({t}, {p}) = {r} < {prev}");
                prev = r;
            }
        }
    }

    #[test]
    fn weak_match_stays_weak() {
        assert!(rank(1e-12, 1_000_000_000) < 1e-9);
        assert_eq!(rank(0.0, u64::MAX), 0.0);
    }
}
