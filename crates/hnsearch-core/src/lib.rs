//! hnsearch-core - Canonical records, corpus store, and relational mirror
//!
//! This crate owns the storage side of the search system:
//!
//! - **Record model**: a statically-typed [`Record`] with the canonical
//!   Hacker News columns, plus the embedding-text derivation (HTML entity
//!   cleanup, title/text concatenation).
//! - **Corpus store**: the append-only Parquet corpus (`hacker-news.parquet`)
//!   and the pending `incremental_*.parquet` inputs, with streaming
//!   row-group reads, merge-and-archive, and `.bak` rotation.
//! - **Relational mirror**: a SQLite table of the same records used for
//!   filtered hydration of search candidates by id.
//!
//! The vector side (embedding, indexing, querying) lives in
//! `hnsearch-search`; the two meet only through [`Record`] values and ids.

pub mod corpus;
pub mod error;
pub mod mirror;
pub mod record;

// Re-exports for convenience
pub use corpus::{CorpusStore, MergeStats, RecordChunk, ARCHIVE_DIR, MAIN_CORPUS_FILE};
pub use error::{CoreError, Result};
pub use mirror::{Mirror, UpsertStats, MIRROR_FILE};
pub use record::{clean_entities, display_preview, Record, RecordKind};
