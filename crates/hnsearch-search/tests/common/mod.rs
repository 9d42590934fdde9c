//! Shared fixtures for the integration suites.
//!
//! Tests run against [`VocabEncoder`], a deterministic bag-of-words
//! encoder: every known token owns a dimension, unknown tokens hash into
//! the remaining range, vectors are L2-normalised. Token overlap between
//! two texts then yields a positive inner product, so relevance
//! expectations ("async" matches "rust async runtime") hold without any
//! model download.

use std::path::Path;

use hnsearch_core::{CorpusStore, Record, RecordKind};
use hnsearch_search::{
    IndexParams, IngestPipeline, IngestSummary, PipelineOptions, Result, TextEncoder,
};

/// Matches the production model dimension so IVF+PQ parameters divide.
pub const DIM: usize = 384;

/// Tokens with reserved dimensions; everything else hashes above them.
const VOCAB: &[&str] = &[
    "rust",
    "async",
    "runtime",
    "python",
    "data",
    "pipeline",
    "borrow",
    "checker",
    "error",
    "handling",
    "garbage",
    "collector",
    "web",
    "framework",
    "http",
    "server",
    "database",
    "index",
    "query",
    "startup",
    "advice",
    "story",
    "about",
    "failing",
];

/// Deterministic bag-of-words encoder for tests.
pub struct VocabEncoder;

impl TextEncoder for VocabEncoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| embed_one(text)).collect())
    }

    fn dim(&self) -> usize {
        DIM
    }
}

fn embed_one(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for token in text.split_whitespace() {
        let token = token.to_lowercase();
        let slot = match VOCAB.iter().position(|t| *t == token) {
            Some(i) => i,
            None => VOCAB.len() + (fnv1a(token.as_bytes()) as usize) % (DIM - VOCAB.len()),
        };
        v[slot] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    } else {
        v[0] = 1.0;
    }
    v
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// A live record; empty title/text become `None`.
pub fn record(id: u32, kind: RecordKind, title: &str, text: &str) -> Record {
    Record {
        id,
        kind,
        author: format!("user{id}"),
        time: 1_700_000_000 + id,
        title: (!title.is_empty()).then(|| title.to_string()),
        text: (!text.is_empty()).then(|| text.to_string()),
        url: None,
        score: Some(id * 10),
        deleted: false,
        dead: false,
    }
}

/// Write an incremental input file into the working directory.
pub fn write_incremental(dir: &Path, name: &str, records: &[Record]) {
    CorpusStore::write_records(&dir.join(name), records).unwrap();
}

/// Run one ingestion batch with the test encoder.
pub fn run_ingest(dir: &Path, options: PipelineOptions) -> IngestSummary {
    let encoder = VocabEncoder;
    IngestPipeline::new(dir, &encoder, IndexParams::default(), options)
        .run()
        .unwrap()
}
