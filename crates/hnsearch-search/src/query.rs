//! Query engine
//!
//! [`SearchEngine`] is the read-only side: it owns the encoder, an
//! immutable snapshot of both index tiers, and a read-only mirror
//! connection, all opened once at construction. Rebuilds running
//! concurrently publish new files by rename and never disturb an open
//! engine.

use std::collections::HashMap;
use std::path::Path;

use hnsearch_core::{Mirror, Record, RecordKind, MIRROR_FILE};
use tracing::{debug, warn};

use crate::embeddings::TextEncoder;
use crate::error::{Result, SearchError};
use crate::index::IndexSnapshot;
use crate::layout::IndexLayout;

/// Candidate multiplier when a kind filter may discard hits
const FILTER_OVERFETCH: usize = 10;

/// One hydrated search result, ordered by similarity.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: u32,
    pub kind: RecordKind,
    pub author: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub url: Option<String>,
    /// Hacker News points, not the similarity
    pub score_hn: Option<u32>,
    /// Inner product of unit-norm embeddings (cosine similarity)
    pub similarity: f32,
}

impl SearchHit {
    fn new(record: Record, similarity: f32) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            author: record.author,
            title: record.title,
            text: record.text,
            url: record.url,
            score_hn: record.score,
            similarity,
        }
    }
}

/// Read-only semantic query engine over one working directory.
pub struct SearchEngine {
    encoder: Box<dyn TextEncoder>,
    snapshot: IndexSnapshot,
    mirror: Mirror,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine").finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// Open an engine over the given working directory.
    ///
    /// Fails with [`SearchError::NotReady`] when no index image or no
    /// mirror exists yet.
    pub fn open(data_dir: impl AsRef<Path>, encoder: Box<dyn TextEncoder>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let layout = IndexLayout::new(data_dir);

        let snapshot = IndexSnapshot::load(&layout)?;
        if snapshot.is_empty() {
            return Err(SearchError::NotReady(format!(
                "no index found under {}; run ingestion first",
                layout.dir().display()
            )));
        }

        let mirror_path = data_dir.join(MIRROR_FILE);
        if !mirror_path.exists() {
            return Err(SearchError::NotReady(format!(
                "mirror database {} not found; run ingestion first",
                mirror_path.display()
            )));
        }
        let mirror = Mirror::open_read_only(&mirror_path)
            .map_err(|e| SearchError::Hydrate(e.to_string()))?;

        let (main, incremental) = snapshot.tier_sizes();
        debug!(
            "Engine ready: main tier {} vectors, incremental tier {} vectors",
            main, incremental
        );

        Ok(Self {
            encoder,
            snapshot,
            mirror,
        })
    }

    /// The loaded index snapshot (status reporting).
    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    /// Semantic k-NN with optional kind filtering.
    ///
    /// Results are ordered by similarity descending and truncated to `k`
    /// after filtering and hydration; ids the mirror cannot hydrate are
    /// dropped.
    pub fn query(
        &self,
        text: &str,
        k: usize,
        kind: Option<RecordKind>,
    ) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Err(SearchError::BadInput("empty query".to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let embeddings = self.encoder.encode(&[text.to_string()])?;
        let query_vector = embeddings
            .first()
            .ok_or_else(|| SearchError::Embed("no embedding returned for query".to_string()))?;

        // Over-fetch when a filter may discard candidates
        let fetch = if kind.is_some() { k * FILTER_OVERFETCH } else { k };
        let candidates = self.snapshot.search(query_vector, fetch);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<u32> = candidates.iter().map(|(id, _)| *id).collect();
        let rows = self
            .mirror
            .hydrate(&ids, kind)
            .map_err(|e| SearchError::Hydrate(e.to_string()))?;
        let mut by_id: HashMap<u32, Record> = rows.into_iter().map(|r| (r.id, r)).collect();

        let mut hits = Vec::with_capacity(k);
        for (id, similarity) in candidates {
            let Some(record) = by_id.remove(&id) else {
                if kind.is_none() {
                    // Every indexed id should exist in the mirror
                    warn!("Indexed id {} missing from mirror; dropping result", id);
                }
                continue;
            };
            hits.push(SearchHit::new(record, similarity));
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }
}
