//! Package records and their weighted search documents.

use crate::error::DocumentError;
use crate::tokenizer::{normalize, tokenize_with_parts};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;

/// Deepest package path accepted for indexing. Sub-path expansion emits
/// O(n²) tokens for n segments.
pub const MAX_PATH_SEGMENTS: usize = 64;

/// One validated version of one package, as delivered by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub module_path: String,
    pub package_path: String,
    pub version: String,
    /// Display name, e.g. `http` for `net/http`.
    pub name: String,
    #[serde(default)]
    pub synopsis: String,
    /// Free-text description, usually the module README.
    #[serde(default)]
    pub readme: String,
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub commit_time: OffsetDateTime,
    /// Number of packages importing this one.
    #[serde(default)]
    pub num_imported_by: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weight {
    Low,
    Mid,
    High,
}

impl Weight {
    pub fn factor(self) -> f64 {
        match self {
            Weight::High => 1.0,
            Weight::Mid => 0.4,
            Weight::Low => 0.2,
        }
    }
}

/// The searchable unit for the latest version of a package path.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDocument {
    pub package_path: String,
    pub module_path: String,
    pub version: String,
    pub parsed_version: Version,
    pub name: String,
    pub synopsis: String,
    pub licenses: Vec<String>,
    pub commit_time: OffsetDateTime,
    pub popularity: u64,
    pub tokens_high: BTreeSet<String>,
    /// token -> term frequency
    pub tokens_mid: BTreeMap<String, u32>,
    pub tokens_low: BTreeMap<String, u32>,
}

impl SearchDocument {
    /// Every indexed token with its field and term frequency. A token appears once,
    /// under its highest-weight field.
    pub fn terms(&self) -> impl Iterator<Item = (&str, Weight, u32)> + '_ {
        let high = self.tokens_high.iter().map(|t| (t.as_str(), Weight::High, 1));
        let mid = self.tokens_mid.iter().map(|(t, tf)| (t.as_str(), Weight::Mid, *tf));
        let low = self.tokens_low.iter().map(|(t, tf)| (t.as_str(), Weight::Low, *tf));
        high.chain(mid).chain(low)
    }

    pub fn term_count(&self) -> usize {
        self.tokens_high.len() + self.tokens_mid.len() + self.tokens_low.len()
    }
}

/// Returns the path itself and every contiguous run of its `/`-separated
/// segments, deduplicated. `a/b/c` yields `a, b, c, a/b, b/c, a/b/c`.
pub fn sub_paths(package_path: &str) -> BTreeSet<String> {
    let trimmed = package_path.trim_matches('/');
    let parts: Vec<&str> = trimmed.split('/').collect();
    let mut set = BTreeSet::new();
    for i in 0..parts.len() {
        set.insert(parts[i].to_string());
        for j in i + 1..=parts.len() {
            set.insert(parts[i..j].join("/").trim_matches('/').to_string());
        }
    }
    set.retain(|p| !p.is_empty());
    set
}

fn term_frequencies(text: &str, skip: impl Fn(&str) -> bool) -> BTreeMap<String, u32> {
    let mut tf = BTreeMap::new();
    for token in tokenize_with_parts(text) {
        if skip(&token) {
            continue;
        }
        *tf.entry(token).or_insert(0) += 1;
    }
    tf
}

/// Build the weighted document for a record. Pure and deterministic.
pub fn build_document(record: &PackageRecord) -> Result<SearchDocument, DocumentError> {
    let path = record.package_path.trim_matches('/');
    if path.is_empty() {
        return Err(DocumentError::invalid(&record.package_path, "empty package path"));
    }
    if record.version.trim().is_empty() {
        return Err(DocumentError::invalid(path, "missing version"));
    }
    let parsed_version: Version = record
        .version
        .parse()
        .map_err(|e| DocumentError::invalid(path, format!("{e}")))?;
    let depth = path.split('/').count();
    if depth > MAX_PATH_SEGMENTS {
        return Err(DocumentError::invalid(
            path,
            format!("{depth} path segments exceeds limit of {MAX_PATH_SEGMENTS}"),
        ));
    }

    let mut tokens_high: BTreeSet<String> = sub_paths(path).iter().map(|p| normalize(p)).collect();
    let name = normalize(record.name.trim());
    if !name.is_empty() {
        tokens_high.insert(name);
    }

    let tokens_mid = term_frequencies(&record.synopsis, |t| tokens_high.contains(t));
    let tokens_low = term_frequencies(&record.readme, |t| {
        tokens_high.contains(t) || tokens_mid.contains_key(t)
    });

    Ok(SearchDocument {
        package_path: path.to_string(),
        module_path: record.module_path.clone(),
        version: record.version.clone(),
        parsed_version,
        name: record.name.clone(),
        synopsis: record.synopsis.clone(),
        licenses: record.licenses.clone(),
        commit_time: record.commit_time,
        popularity: record.num_imported_by,
        tokens_high,
        tokens_mid,
        tokens_low,
    })
}
