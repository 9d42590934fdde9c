//! End-to-end ingestion and query scenarios.
//!
//! Each test drives the real pipeline over synthesised incremental files
//! in a temporary working directory, using the deterministic test encoder
//! from `common`. Covers idempotence, checkpoint crash-recovery, tier
//! disjointness, rebuild behaviour, and the query engine's error surface.

mod common;

use common::{record, run_ingest, write_incremental, VocabEncoder, DIM};

use hnsearch_core::{Mirror, RecordKind, ARCHIVE_DIR, MIRROR_FILE};
use hnsearch_search::{
    Checkpoint, IndexLayout, IndexManager, IndexParams, PipelineOptions, SearchEngine,
    SearchError, Tier, VectorStore,
};
use tempfile::TempDir;

fn store(dir: &TempDir) -> VectorStore {
    VectorStore::new(IndexLayout::new(dir.path()))
}

fn engine(dir: &TempDir) -> SearchEngine {
    SearchEngine::open(dir.path(), Box::new(VocabEncoder)).unwrap()
}

/// A three-record seed batch: id 3 is a text-duplicate of id 1, and all
/// three ids are distinct.
fn seed_records() -> Vec<hnsearch_core::Record> {
    vec![
        record(1, RecordKind::Comment, "", "rust async runtime"),
        record(2, RecordKind::Comment, "", "python data pipeline"),
        record(3, RecordKind::Comment, "", "rust async runtime"),
    ]
}

#[test]
fn seed_ingest_embeds_all_new_rows_and_answers_queries() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());

    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 3);
    assert_eq!(summary.errors, 0);
    assert!(!summary.rebuilt);

    // Incremental tier holds all three; the main tier is untouched
    let store = store(&dir);
    assert_eq!(store.count(Tier::Incremental).unwrap(), 3);
    assert_eq!(store.count(Tier::Main).unwrap(), 0);

    // Unit-norm invariant on every persisted vector
    let (_, vectors, dim) = store.load(Tier::Incremental).unwrap().unwrap();
    assert_eq!(dim, DIM);
    for row in vectors.chunks(dim) {
        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    // Inputs consumed: corpus merged, file archived, checkpoint gone
    assert!(dir.path().join("hacker-news.parquet").exists());
    assert!(dir
        .path()
        .join(ARCHIVE_DIR)
        .join("incremental_20240101_000000.parquet")
        .exists());
    assert!(!dir.path().join("embeddings/incremental_checkpoint.json").exists());

    // Query "async" with k = 2 surfaces the two duplicates
    let hits = engine(&dir).query("async", 2, None).unwrap();
    let mut ids: Vec<u32> = hits.iter().map(|h| h.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
    for hit in &hits {
        assert!(hit.similarity >= 0.5, "similarity {} too low", hit.similarity);
    }
}

#[test]
fn already_indexed_ids_are_not_reembedded() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(dir.path(), PipelineOptions::default());

    // Second sync repeats id 2 and introduces id 4
    write_incremental(
        dir.path(),
        "incremental_20240102_000000.parquet",
        &[
            record(2, RecordKind::Comment, "", "python data pipeline"),
            record(4, RecordKind::Story, "borrow checker error handling", ""),
        ],
    );
    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 1);
    assert_eq!(summary.skipped, 1);

    let store = store(&dir);
    assert_eq!(store.count(Tier::Incremental).unwrap(), 4);
    let ids = store.load_ids(Tier::Incremental).unwrap();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert!(!dir.path().join("embeddings/incremental_checkpoint.json").exists());
}

#[test]
fn forced_rebuild_promotes_incremental_tier_into_main() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(dir.path(), PipelineOptions::default());
    write_incremental(
        dir.path(),
        "incremental_20240102_000000.parquet",
        &[record(4, RecordKind::Story, "borrow checker error handling", "")],
    );
    let summary = run_ingest(
        dir.path(),
        PipelineOptions {
            force_rebuild: true,
            rebuild_threshold: 3,
            ..PipelineOptions::default()
        },
    );
    assert!(summary.rebuilt);

    let store = store(&dir);
    assert_eq!(store.count(Tier::Main).unwrap(), 4);
    assert_eq!(store.count(Tier::Incremental).unwrap(), 0);
    assert!(!dir.path().join("embeddings/faiss_index_incremental.bin").exists());

    // Disjointness is trivial post-rebuild; every id lives in the main tier
    let main_ids = store.load_ids(Tier::Main).unwrap();
    let mut sorted = main_ids.clone();
    sorted.sort();
    assert_eq!(sorted, vec![1, 2, 3, 4]);
    assert!(store.load_ids(Tier::Incremental).unwrap().is_empty());

    // Rebuild equivalence: a previously-incremental record retrieves
    // itself on its own text with near-perfect similarity
    let hits = engine(&dir)
        .query("borrow checker error handling", 1, None)
        .unwrap();
    assert_eq!(hits[0].id, 4);
    assert!(hits[0].similarity >= 0.99);
}

#[test]
fn crash_between_append_and_checkpoint_recovers_without_duplicates() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());

    // Simulate the crash window: vectors for ids 1 and 3 were appended
    // durably, but the checkpoint write never happened.
    let manager = IndexManager::new(IndexLayout::new(dir.path()), IndexParams::default());
    let encoder = VocabEncoder;
    use hnsearch_search::TextEncoder;
    let vectors = encoder
        .encode(&["rust async runtime".to_string(), "rust async runtime".to_string()])
        .unwrap();
    let flat: Vec<f32> = vectors.into_iter().flatten().collect();
    manager.add_incremental(&[1, 3], &flat, DIM).unwrap();

    // Restarted run embeds only id 2; no duplicate work, no missing id
    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 1);

    let ids = store(&dir).load_ids(Tier::Incremental).unwrap();
    assert_eq!(ids.len(), 3);
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, vec![1, 2, 3]);
}

#[test]
fn kind_filter_excluding_everything_yields_empty_result() {
    let dir = TempDir::new().unwrap();
    // No stored record has kind = story
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(dir.path(), PipelineOptions::default());

    let hits = engine(&dir)
        .query("nonexistent gibberish xyzzy", 5, Some(RecordKind::Story))
        .unwrap();
    assert!(hits.is_empty());
}

#[test]
fn reingesting_identical_content_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        record(10, RecordKind::Story, "rust web framework", ""),
        record(11, RecordKind::Comment, "", "http server advice"),
    ];
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &records);
    run_ingest(dir.path(), PipelineOptions::default());

    let store = store(&dir);
    let (ids_before, vectors_before, _) = store.load(Tier::Incremental).unwrap().unwrap();

    // The same rows arrive again under a new sync name
    write_incremental(dir.path(), "incremental_20240102_000000.parquet", &records);
    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 0);
    assert_eq!(summary.skipped, 2);

    let (ids_after, vectors_after, _) = store.load(Tier::Incremental).unwrap().unwrap();
    assert_eq!(ids_before, ids_after);
    assert_eq!(vectors_before, vectors_after);

    // Mirror kept exactly one copy of each row
    let mirror = Mirror::open_read_only(dir.path().join(MIRROR_FILE)).unwrap();
    assert_eq!(mirror.count().unwrap(), 2);
}

#[test]
fn interrupted_run_converges_to_uninterrupted_state() {
    let records: Vec<hnsearch_core::Record> = (1..=5)
        .map(|id| record(id, RecordKind::Comment, "", &format!("story about startup {id}")))
        .collect();
    let options = PipelineOptions {
        batch_size: 2,
        checkpoint_every: 2,
        ..PipelineOptions::default()
    };

    // Reference: one uninterrupted run
    let full = TempDir::new().unwrap();
    write_incremental(full.path(), "incremental_20240101_000000.parquet", &records);
    run_ingest(full.path(), options.clone());
    let mut expected = store(&full).load_ids(Tier::Incremental).unwrap();
    expected.sort();

    // Interrupted: the first checkpoint landed (two rows durable), then
    // the process died; the input file was never consumed.
    let interrupted = TempDir::new().unwrap();
    write_incremental(
        interrupted.path(),
        "incremental_20240101_000000.parquet",
        &records,
    );
    let manager = IndexManager::new(IndexLayout::new(interrupted.path()), IndexParams::default());
    use hnsearch_search::TextEncoder;
    let encoder = VocabEncoder;
    let vectors = encoder
        .encode(&[
            "story about startup 1".to_string(),
            "story about startup 2".to_string(),
        ])
        .unwrap();
    let flat: Vec<f32> = vectors.into_iter().flatten().collect();
    manager.add_incremental(&[1, 2], &flat, DIM).unwrap();
    IndexLayout::new(interrupted.path()).ensure_dir().unwrap();
    Checkpoint {
        total_processed: 2,
        row_offset: 2,
        current_file: Some("incremental_20240101_000000.parquet".to_string()),
        completed_files: vec![],
    }
    .save(&IndexLayout::new(interrupted.path()).checkpoint())
    .unwrap();

    let summary = run_ingest(interrupted.path(), options);
    assert_eq!(summary.embedded, 3);

    let ids = store(&interrupted).load_ids(Tier::Incremental).unwrap();
    assert_eq!(ids.len(), 5, "no id embedded twice");
    let mut sorted = ids;
    sorted.sort();
    assert_eq!(sorted, expected);
}

#[test]
fn tiers_stay_disjoint_across_batches() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(
        dir.path(),
        PipelineOptions {
            force_rebuild: true,
            ..PipelineOptions::default()
        },
    );

    // A later batch repeats promoted ids and adds a fresh one
    write_incremental(
        dir.path(),
        "incremental_20240102_000000.parquet",
        &[
            record(1, RecordKind::Comment, "", "rust async runtime"),
            record(6, RecordKind::Comment, "", "garbage collector design"),
        ],
    );
    run_ingest(dir.path(), PipelineOptions::default());

    let store = store(&dir);
    let main: std::collections::HashSet<u32> =
        store.load_ids(Tier::Main).unwrap().into_iter().collect();
    let incremental: std::collections::HashSet<u32> =
        store.load_ids(Tier::Incremental).unwrap().into_iter().collect();
    assert!(main.is_disjoint(&incremental));
    assert!(incremental.contains(&6));
    assert!(!incremental.contains(&1));
}

#[test]
fn every_search_result_hydrates_from_the_mirror() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(dir.path(), PipelineOptions::default());

    let hits = engine(&dir).query("rust async runtime", 3, None).unwrap();
    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.author, format!("user{}", hit.id));
        assert_eq!(hit.kind, RecordKind::Comment);
        assert!(hit.score_hn.is_some());
    }
    // Ordered by similarity descending
    for pair in hits.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn duplicate_id_within_one_file_keeps_first_occurrence() {
    let dir = TempDir::new().unwrap();
    write_incremental(
        dir.path(),
        "incremental_20240101_000000.parquet",
        &[
            record(7, RecordKind::Comment, "", "rust borrow checker"),
            record(7, RecordKind::Comment, "", "python garbage collector"),
        ],
    );
    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 1);
    assert_eq!(summary.skipped, 1);

    let hits = engine(&dir).query("rust borrow checker", 1, None).unwrap();
    assert_eq!(hits[0].id, 7);
    assert!(hits[0].similarity >= 0.99, "first occurrence must win");
}

#[test]
fn empty_text_rows_are_skipped_not_errors() {
    let dir = TempDir::new().unwrap();
    let mut blank = record(8, RecordKind::Comment, "", "");
    blank.text = Some("<p></p>".to_string());
    write_incremental(
        dir.path(),
        "incremental_20240101_000000.parquet",
        &[blank, record(9, RecordKind::Comment, "", "database index design")],
    );
    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors, 0);
}

#[test]
fn engine_open_without_indices_is_not_ready() {
    let dir = TempDir::new().unwrap();
    let err = SearchEngine::open(dir.path(), Box::new(VocabEncoder)).unwrap_err();
    assert!(matches!(err, SearchError::NotReady(_)));
}

#[test]
fn empty_query_is_bad_input() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(dir.path(), PipelineOptions::default());

    let err = engine(&dir).query("   ", 5, None).unwrap_err();
    assert!(matches!(err, SearchError::BadInput(_)));
}

#[test]
fn ingest_with_no_inputs_exits_cleanly() {
    let dir = TempDir::new().unwrap();
    let summary = run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(summary.embedded, 0);
    assert_eq!(summary.files, 0);
    assert!(!dir.path().join("hacker-news.parquet").exists());
}

#[test]
fn reset_checkpoint_discards_incremental_progress() {
    let dir = TempDir::new().unwrap();
    write_incremental(dir.path(), "incremental_20240101_000000.parquet", &seed_records());
    run_ingest(dir.path(), PipelineOptions::default());
    assert_eq!(store(&dir).count(Tier::Incremental).unwrap(), 3);

    // Re-deliver the same rows and reset: everything is embedded anew
    write_incremental(dir.path(), "incremental_20240102_000000.parquet", &seed_records());
    let summary = run_ingest(
        dir.path(),
        PipelineOptions {
            reset_checkpoint: true,
            ..PipelineOptions::default()
        },
    );
    assert_eq!(summary.embedded, 3);
    assert_eq!(store(&dir).count(Tier::Incremental).unwrap(), 3);
}
