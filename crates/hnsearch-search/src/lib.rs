//! hnsearch-search - Embedding, indexing, ingestion, and querying
//!
//! The vector side of the search system, layered leaves-first:
//!
//! - [`embeddings`]: the [`TextEncoder`] trait and the local Candle-backed
//!   sentence encoder (384-dim, L2-normalised, inner product = cosine).
//! - [`vectors`]: durable `(ids, vectors)` arrays for the main and
//!   incremental tiers, published by atomic rename.
//! - [`index`]: the flat exact index, the trained IVF+PQ index, and the
//!   [`IndexManager`] that owns both tiers and the rebuild/merge path.
//! - [`pipeline`]: the single-writer ingestion loop: skip set, streamed
//!   row chunks, batched embedding, checkpointing, mirror and corpus
//!   updates.
//! - [`query`]: the read-only [`SearchEngine`] that fans a query out over
//!   both tiers and hydrates results from the mirror.
//!
//! Concurrency model: one writer (pipeline/rebuild) at a time, any number
//! of read-only query engines. Every durable write in this crate goes
//! through a temporary file and a rename, so a reader that opened the old
//! files keeps a consistent snapshot.

pub mod checkpoint;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod layout;
pub mod pipeline;
pub mod query;
pub mod vectors;

// Re-exports for convenience
pub use checkpoint::Checkpoint;
pub use embeddings::{LocalEncoder, TextEncoder};
pub use error::{Result, SearchError};
pub use index::{IndexManager, IndexParams, IndexSnapshot};
pub use layout::IndexLayout;
pub use pipeline::{IngestPipeline, IngestSummary, PipelineOptions};
pub use query::{SearchEngine, SearchHit};
pub use vectors::{Tier, VectorStore};
