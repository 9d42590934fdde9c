//! Index management for both tiers
//!
//! [`IndexManager`] owns the trained main index (IVF+PQ, or flat for small
//! corpora), the flat incremental index, and their disk images. Mutation
//! is writer-only: the ingestion pipeline appends to the incremental tier
//! and triggers rebuilds; queries read an immutable [`IndexSnapshot`]
//! loaded from whatever images are on disk.
//!
//! Index images share one container format: magic, version, index kind,
//! then the index's own payload, always published by atomic rename.

mod flat;
mod ivf_pq;
mod kmeans;

pub use flat::FlatIndex;
pub use ivf_pq::{IvfPqIndex, IvfPqParams};

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::error::{Result, SearchError};
use crate::layout::IndexLayout;
use crate::vectors::{write_atomic, Tier, VectorStore};

const INDEX_MAGIC: &[u8; 4] = b"HNIX";
const INDEX_VERSION: u32 = 1;
const KIND_FLAT: u8 = 0;
const KIND_IVF_PQ: u8 = 1;

/// Below this list count IVF+PQ is not worth training; the main tier
/// falls back to an exact flat index.
const MIN_NLIST: usize = 64;

/// Parameters of the trained main index.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    /// Upper bound on inverted lists; effective `nlist = min(cap, n/100)`
    pub nlist_cap: usize,
    /// Product-quantiser subquantisers; must divide the vector dimension
    pub subquantizers: usize,
    /// Lists probed per query
    pub nprobe: usize,
    /// Training sample bound, drawn without replacement
    pub train_sample: usize,
    /// Seed for sampling and k-means, fixed so rebuilds are reproducible
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            nlist_cap: 4096,
            subquantizers: 48,
            nprobe: 64,
            train_sample: 500_000,
            seed: 0x686e_7365,
        }
    }
}

/// The main tier's index: trained IVF+PQ, or exact flat for small corpora.
pub enum MainIndex {
    Flat(FlatIndex),
    IvfPq(IvfPqIndex),
}

impl MainIndex {
    /// k-NN by inner product, `(position, score)` sorted descending.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        match self {
            Self::Flat(index) => index.search(query, k),
            Self::IvfPq(index) => index.search(query, k),
        }
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> u64 {
        match self {
            Self::Flat(index) => index.len() as u64,
            Self::IvfPq(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short human-readable description for status output.
    pub fn describe(&self) -> String {
        match self {
            Self::Flat(index) => format!("flat ({} vectors)", index.len()),
            Self::IvfPq(index) => {
                format!("IVF{},PQ ({} vectors)", index.nlist(), index.len())
            }
        }
    }
}

/// Persist an index image atomically.
fn save_index(path: &Path, index: &MainIndex) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(INDEX_MAGIC)?;
        w.write_all(&INDEX_VERSION.to_le_bytes())?;
        match index {
            MainIndex::Flat(flat) => {
                w.write_all(&[KIND_FLAT])?;
                flat.write_to(w)
            }
            MainIndex::IvfPq(ivf) => {
                w.write_all(&[KIND_IVF_PQ])?;
                ivf.write_to(w)
            }
        }
    })
}

/// Load an index image written by [`save_index`].
fn load_index(path: &Path) -> Result<MainIndex> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(SearchError::corrupt(path, "bad index magic"));
    }
    let mut buf4 = [0u8; 4];
    reader.read_exact(&mut buf4)?;
    let version = u32::from_le_bytes(buf4);
    if version != INDEX_VERSION {
        return Err(SearchError::corrupt(
            path,
            format!("unsupported index version {version}"),
        ));
    }
    let mut kind = [0u8; 1];
    reader.read_exact(&mut kind)?;
    match kind[0] {
        KIND_FLAT => Ok(MainIndex::Flat(FlatIndex::read_from(&mut reader)?)),
        KIND_IVF_PQ => Ok(MainIndex::IvfPq(IvfPqIndex::read_from(&mut reader)?)),
        other => Err(SearchError::corrupt(path, format!("unknown index kind {other}"))),
    }
}

/// Outcome of a main-tier rebuild.
#[derive(Debug, Clone, Copy)]
pub struct RebuildStats {
    /// Vectors in the rebuilt main tier
    pub total: u64,
    /// Effective inverted-list count (0 when the flat fallback was used)
    pub nlist: usize,
    /// Whether the flat fallback was used instead of IVF+PQ
    pub flat: bool,
}

/// Writer-side owner of both index tiers.
pub struct IndexManager {
    store: VectorStore,
    params: IndexParams,
}

impl IndexManager {
    pub fn new(layout: IndexLayout, params: IndexParams) -> Self {
        Self {
            store: VectorStore::new(layout),
            params,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Append freshly embedded vectors to the incremental tier, then
    /// rebuild and persist the incremental flat index.
    ///
    /// Returns the incremental tier's committed row count.
    pub fn add_incremental(&self, new_ids: &[u32], new_vectors: &[f32], dim: usize) -> Result<u64> {
        let count = self.store.append(Tier::Incremental, new_ids, new_vectors, dim)?;

        let (_, vectors, dim) = self.store.load(Tier::Incremental)?.ok_or_else(|| {
            SearchError::corrupt(
                self.store.layout().incremental_ids(),
                "incremental tier missing after append",
            )
        })?;
        let index = MainIndex::Flat(FlatIndex::from_vectors(dim, vectors)?);
        save_index(&self.store.layout().incremental_index(), &index)?;
        Ok(count)
    }

    /// Merge the incremental tier into the main tier and retrain.
    ///
    /// Concatenates both tiers, trains IVF+PQ on a uniform sample (or
    /// falls back to a flat index when the effective `nlist` would be
    /// tiny), persists the index image and the main arrays, then clears
    /// the incremental tier. A no-op when there are no vectors at all.
    pub fn rebuild(&self) -> Result<RebuildStats> {
        let main = self.store.load(Tier::Main)?;
        let incremental = self.store.load(Tier::Incremental)?;

        let (ids, vectors, dim) = match (main, incremental) {
            (Some((ids, vectors, dim)), incr) => {
                let mut ids = ids;
                let mut vectors = vectors;
                if let Some((incr_ids, incr_vectors, incr_dim)) = incr {
                    if incr_dim != dim {
                        return Err(SearchError::corrupt(
                            self.store.layout().incremental_vectors(),
                            format!("incremental dim {incr_dim} != main dim {dim}"),
                        ));
                    }
                    // A crash between a finished rebuild and the incremental
                    // clear can leave ids in both tiers; keep the main copy.
                    let seen: HashSet<u32> = ids.iter().copied().collect();
                    for (id, row) in incr_ids.iter().zip(incr_vectors.chunks(dim)) {
                        if !seen.contains(id) {
                            ids.push(*id);
                            vectors.extend_from_slice(row);
                        }
                    }
                }
                (ids, vectors, dim)
            }
            (None, Some((ids, vectors, dim))) => (ids, vectors, dim),
            (None, None) => {
                warn!("Rebuild requested with no vectors in either tier");
                return Ok(RebuildStats {
                    total: 0,
                    nlist: 0,
                    flat: true,
                });
            }
        };

        let n = ids.len();
        let nlist = self.params.nlist_cap.min(n / 100);
        info!("Rebuilding main index for {} vectors", n);

        let (index, stats) = if nlist < MIN_NLIST {
            info!("Corpus too small for IVF+PQ (nlist would be {nlist}); building flat index");
            (
                MainIndex::Flat(FlatIndex::from_vectors(dim, vectors.clone())?),
                RebuildStats {
                    total: n as u64,
                    nlist: 0,
                    flat: true,
                },
            )
        } else {
            let params = IvfPqParams {
                nlist,
                m: self.params.subquantizers,
                nprobe: self.params.nprobe,
            };
            let sample = sample_rows(&vectors, dim, self.params.train_sample.min(n), self.params.seed);
            let mut index = IvfPqIndex::train(&sample, dim, &params, self.params.seed)?;
            index.add(&vectors)?;
            (
                MainIndex::IvfPq(index),
                RebuildStats {
                    total: n as u64,
                    nlist,
                    flat: false,
                },
            )
        };

        // Persist the image first, then commit the arrays, then retire the
        // incremental tier; readers tolerate positions beyond the id array.
        save_index(&self.store.layout().main_index(), &index)?;
        self.store.replace(Tier::Main, &ids, &vectors, dim)?;
        self.store.clear(Tier::Incremental)?;
        let incr_index = self.store.layout().incremental_index();
        if incr_index.exists() {
            std::fs::remove_file(&incr_index)?;
        }

        info!(
            "Main index rebuilt with {} vectors ({})",
            stats.total,
            if stats.flat { "flat".to_string() } else { format!("nlist={}", stats.nlist) }
        );
        Ok(stats)
    }

    /// Load a read-only snapshot of whatever index images exist.
    pub fn snapshot(&self) -> Result<IndexSnapshot> {
        IndexSnapshot::load(self.store.layout())
    }
}

/// Gather a uniform without-replacement sample of rows.
fn sample_rows(vectors: &[f32], dim: usize, sample_size: usize, seed: u64) -> Vec<f32> {
    let n = vectors.len() / dim;
    if sample_size >= n {
        return vectors.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let picks = rand::seq::index::sample(&mut rng, n, sample_size);
    let mut sample = Vec::with_capacity(sample_size * dim);
    for p in picks {
        sample.extend_from_slice(&vectors[p * dim..(p + 1) * dim]);
    }
    sample
}

/// Immutable view of both tiers for the query path.
///
/// Loaded once per engine; subsequent rebuilds replace files by rename and
/// do not disturb an open snapshot.
pub struct IndexSnapshot {
    main: Option<(MainIndex, Vec<u32>)>,
    incremental: Option<(FlatIndex, Vec<u32>)>,
}

impl IndexSnapshot {
    /// Load whichever tier images exist under the layout.
    pub fn load(layout: &IndexLayout) -> Result<Self> {
        let store = VectorStore::new(layout.clone());

        let main = if layout.main_index().exists() {
            let index = load_index(&layout.main_index())?;
            let ids = store.load_ids(Tier::Main)?;
            Some((index, ids))
        } else {
            None
        };

        let incremental = if layout.incremental_index().exists() {
            match load_index(&layout.incremental_index())? {
                MainIndex::Flat(flat) => {
                    let ids = store.load_ids(Tier::Incremental)?;
                    Some((flat, ids))
                }
                MainIndex::IvfPq(_) => {
                    return Err(SearchError::corrupt(
                        layout.incremental_index(),
                        "incremental index image is not flat",
                    ))
                }
            }
        } else {
            None
        };

        Ok(Self { main, incremental })
    }

    /// Whether any tier is present.
    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.incremental.is_none()
    }

    /// Sizes of `(main, incremental)` tiers.
    pub fn tier_sizes(&self) -> (u64, u64) {
        (
            self.main.as_ref().map_or(0, |(index, _)| index.len()),
            self.incremental
                .as_ref()
                .map_or(0, |(index, _)| index.len() as u64),
        )
    }

    /// Description of the main tier for status output.
    pub fn describe_main(&self) -> Option<String> {
        self.main.as_ref().map(|(index, _)| index.describe())
    }

    /// Two-tier k-NN: request `k` from each tier, map positions to
    /// external ids, keep the best score per id, sort descending, top `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        let mut best: HashMap<u32, f32> = HashMap::new();
        let mut merge = |hits: Vec<(u32, f32)>, ids: &[u32]| {
            for (position, score) in hits {
                // Positions past the id array belong to a half-published
                // rebuild; drop them rather than misattribute.
                let Some(&id) = ids.get(position as usize) else {
                    continue;
                };
                best.entry(id)
                    .and_modify(|s| *s = s.max(score))
                    .or_insert(score);
            }
        };

        if let Some((index, ids)) = &self.main {
            merge(index.search(query, k), ids);
        }
        if let Some((index, ids)) = &self.incremental {
            merge(index.search(query, k), ids);
        }

        let mut out: Vec<(u32, f32)> = best.into_iter().collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        out.truncate(k);
        out
    }
}

/// Keep the `k` highest-scoring items, ties broken by lower position.
pub(crate) fn top_k(items: impl Iterator<Item = (u32, f32)>, k: usize) -> Vec<(u32, f32)> {
    use std::cmp::Ordering;
    use std::collections::BinaryHeap;

    struct Entry(f32, u32);
    impl PartialEq for Entry {
        fn eq(&self, other: &Self) -> bool {
            self.cmp(other) == Ordering::Equal
        }
    }
    impl Eq for Entry {}
    impl PartialOrd for Entry {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for Entry {
        fn cmp(&self, other: &Self) -> Ordering {
            // Min-heap on score: the root is the current worst entry
            other.0.total_cmp(&self.0).then(self.1.cmp(&other.1))
        }
    }

    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Entry> = BinaryHeap::with_capacity(k + 1);
    for (position, score) in items {
        heap.push(Entry(score, position));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut out: Vec<(u32, f32)> = heap.into_iter().map(|Entry(s, p)| (p, s)).collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_top_k_orders_and_truncates() {
        let items = vec![(0, 0.1), (1, 0.9), (2, 0.5), (3, 0.7)];
        let top = top_k(items.into_iter(), 2);
        assert_eq!(top, vec![(1, 0.9), (3, 0.7)]);
    }

    #[test]
    fn test_top_k_handles_short_input() {
        let top = top_k(vec![(0, 0.3)].into_iter(), 5);
        assert_eq!(top, vec![(0, 0.3)]);
        assert!(top_k(std::iter::empty(), 5).is_empty());
    }

    #[test]
    fn test_add_incremental_persists_index() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new(IndexLayout::new(dir.path()), IndexParams::default());

        let vectors: Vec<f32> = [unit(4, 0), unit(4, 1)].concat();
        let count = manager.add_incremental(&[10, 11], &vectors, 4).unwrap();
        assert_eq!(count, 2);

        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.tier_sizes(), (0, 2));
        let hits = snapshot.search(&unit(4, 1), 1);
        assert_eq!(hits[0].0, 11);
    }

    #[test]
    fn test_rebuild_small_corpus_uses_flat_and_clears_incremental() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new(IndexLayout::new(dir.path()), IndexParams::default());

        let vectors: Vec<f32> = [unit(4, 0), unit(4, 1), unit(4, 2)].concat();
        manager.add_incremental(&[1, 2, 3], &vectors, 4).unwrap();

        let stats = manager.rebuild().unwrap();
        assert_eq!(stats.total, 3);
        assert!(stats.flat);

        // Incremental tier fully retired
        assert!(!manager.store().exists(Tier::Incremental));
        assert!(!manager.store().layout().incremental_index().exists());

        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.tier_sizes(), (3, 0));
        let hits = snapshot.search(&unit(4, 2), 1);
        assert_eq!(hits[0].0, 3);
    }

    #[test]
    fn test_rebuild_dedupes_overlapping_tiers() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new(IndexLayout::new(dir.path()), IndexParams::default());
        let store = manager.store();

        store.replace(Tier::Main, &[1, 2], &[unit(2, 0), unit(2, 1)].concat(), 2).unwrap();
        // Id 2 stuck in the incremental tier from an interrupted rebuild
        store
            .replace(Tier::Incremental, &[2, 3], &[unit(2, 1), unit(2, 0)].concat(), 2)
            .unwrap();

        let stats = manager.rebuild().unwrap();
        assert_eq!(stats.total, 3);

        let ids = store.load_ids(Tier::Main).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_rebuild_with_no_vectors_is_noop() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new(IndexLayout::new(dir.path()), IndexParams::default());
        let stats = manager.rebuild().unwrap();
        assert_eq!(stats.total, 0);
        assert!(!dir.path().join("embeddings/faiss_index_ivf_pq.bin").exists());
    }

    #[test]
    fn test_snapshot_merge_dedupes_by_max_score() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new(IndexLayout::new(dir.path()), IndexParams::default());

        // Same id in both tiers (mid-rebuild overlap); search keeps one hit
        manager.store().replace(Tier::Main, &[5], &unit(2, 0), 2).unwrap();
        save_index(
            &manager.store().layout().main_index(),
            &MainIndex::Flat(FlatIndex::from_vectors(2, unit(2, 0)).unwrap()),
        )
        .unwrap();
        manager.add_incremental(&[5], &unit(2, 0), 2).unwrap();

        let snapshot = manager.snapshot().unwrap();
        let hits = snapshot.search(&unit(2, 0), 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 5);
    }

    #[test]
    fn test_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let snapshot = IndexSnapshot::load(&IndexLayout::new(dir.path())).unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.search(&[1.0, 0.0], 3).is_empty());
    }
}
