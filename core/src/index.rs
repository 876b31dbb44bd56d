use crate::document::{SearchDocument, Weight};
use crate::error::SearchError;
use crate::tokenizer::{is_stopword, normalize, tokenize};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio_util::sync::CancellationToken;

pub type DocId = u32;

/// Matches scoring at or below this are not reported.
pub const SCORE_FLOOR: f64 = 1e-10;

// postings visited between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    pub doc_id: DocId,
    pub weight: Weight,
    pub tf: u32,
}

impl Posting {
    /// Field weight scaled by a saturating term-frequency factor in `[1, 2)`.
    /// The factor never lifts a token above the next field's base weight.
    pub fn score(&self) -> f64 {
        let tf = self.tf.max(1) as f64;
        self.weight.factor() * (2.0 * tf / (tf + 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    Replaced,
    /// The stored document has a newer version; nothing changed.
    Stale,
}

/// Token -> postings map over the latest document of each package path.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, Vec<Posting>>,
    docs: HashMap<DocId, SearchDocument>,
    by_path: HashMap<String, DocId>,
    next_doc_id: DocId,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.docs.len() }

    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    pub fn num_terms(&self) -> usize { self.postings.len() }

    pub fn get(&self, doc_id: DocId) -> Option<&SearchDocument> { self.docs.get(&doc_id) }

    pub fn get_by_path(&self, package_path: &str) -> Option<&SearchDocument> {
        self.by_path.get(package_path).and_then(|id| self.docs.get(id))
    }

    /// Insert a document, replacing the one stored for the same package path
    /// unless the stored one has a newer version.
    pub fn insert(&mut self, doc: SearchDocument) -> InsertOutcome {
        let (doc_id, outcome) = match self.by_path.get(&doc.package_path).copied() {
            Some(existing) => {
                if let Some(old) = self.docs.get(&existing) {
                    if old.parsed_version > doc.parsed_version {
                        return InsertOutcome::Stale;
                    }
                }
                self.remove_postings(existing);
                (existing, InsertOutcome::Replaced)
            }
            None => {
                let id = self.next_doc_id;
                self.next_doc_id += 1;
                self.by_path.insert(doc.package_path.clone(), id);
                (id, InsertOutcome::Inserted)
            }
        };

        for (token, weight, tf) in doc.terms() {
            self.postings
                .entry(token.to_string())
                .or_default()
                .push(Posting { doc_id, weight, tf });
        }
        self.docs.insert(doc_id, doc);
        outcome
    }

    fn remove_postings(&mut self, doc_id: DocId) {
        let Some(old) = self.docs.get(&doc_id) else { return };
        for (token, _, _) in old.terms() {
            if let Some(list) = self.postings.get_mut(token) {
                list.retain(|p| p.doc_id != doc_id);
                if list.is_empty() {
                    self.postings.remove(token);
                }
            }
        }
    }

    /// Documents containing every term of `terms`, with their text relevance.
    /// Unordered.
    pub fn query(&self, terms: &str) -> Vec<(DocId, f64)> {
        match self.score(terms, || false) {
            Ok(hits) => hits,
            Err(_) => Vec::new(),
        }
    }

    pub fn query_cancellable(&self, terms: &str, token: &CancellationToken) -> Result<Vec<(DocId, f64)>, SearchError> {
        self.score(terms, || token.is_cancelled())
    }

    /// Distinct query terms. A whitespace-separated word that is itself an
    /// indexed token (an import path with `~` or `+`, say) is kept whole;
    /// anything else goes through the tokenizer.
    fn query_terms(&self, terms: &str) -> BTreeSet<String> {
        let mut unique = BTreeSet::new();
        for word in terms.split_whitespace() {
            let folded = normalize(word);
            if !is_stopword(&folded) && self.postings.contains_key(&folded) {
                unique.insert(folded);
            } else {
                unique.extend(tokenize(word));
            }
        }
        unique
    }

    fn score(&self, terms: &str, cancelled: impl Fn() -> bool) -> Result<Vec<(DocId, f64)>, SearchError> {
        let unique = self.query_terms(terms);
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let mut lists = Vec::with_capacity(unique.len());
        for term in &unique {
            match self.postings.get(term) {
                Some(list) => lists.push(list),
                // every term must match
                None => return Ok(Vec::new()),
            }
        }
        lists.sort_by_key(|l| l.len());

        let mut acc: HashMap<DocId, f64> = lists[0].iter().map(|p| (p.doc_id, p.score())).collect();
        let mut visited = 0usize;
        for list in &lists[1..] {
            let mut next = HashMap::with_capacity(acc.len().min(list.len()));
            for p in list.iter() {
                visited += 1;
                if visited % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                    return Err(SearchError::Cancelled);
                }
                if let Some(sum) = acc.get(&p.doc_id) {
                    next.insert(p.doc_id, sum + p.score());
                }
            }
            acc = next;
            if acc.is_empty() {
                return Ok(Vec::new());
            }
        }
        if cancelled() {
            return Err(SearchError::Cancelled);
        }

        let n = unique.len() as f64;
        Ok(acc
            .into_iter()
            .map(|(id, sum)| (id, sum / n))
            .filter(|(_, t)| *t > SCORE_FLOOR)
            .collect())
    }
}
