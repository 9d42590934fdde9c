//! Ingestion pipeline
//!
//! Single-writer loop that turns pending incremental files into indexed
//! vectors:
//!
//! 1. list inputs in lexicographic order, load the skip set from the
//!    on-disk id arrays of both tiers
//! 2. stream each file in row-group-sized chunks, collecting embeddable
//!    rows not in the skip set
//! 3. embed in fixed-size batches; every `checkpoint_every` embedded items,
//!    append to the incremental tier and persist the checkpoint
//! 4. after the last file: flush the final partial batch, clear the
//!    checkpoint, rebuild the main tier if the threshold is reached,
//!    upsert the mirror, then merge and archive the corpus files
//!
//! The order of step 4 is load-bearing: vectors are durable before the
//! mirror sees the rows, and the mirror is updated before the corpus file
//! is replaced, so after any crash an id in the main corpus is either
//! fully indexed or still waiting in an incremental file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use hnsearch_core::{CorpusStore, Mirror, MIRROR_FILE};
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::embeddings::TextEncoder;
use crate::error::{Result, SearchError};
use crate::index::{IndexManager, IndexParams};
use crate::layout::IndexLayout;
use crate::vectors::Tier;

/// Progress log cadence
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Tunables and flags for one ingestion run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Texts per embedding batch
    pub batch_size: usize,
    /// Embedded items between durable checkpoints
    pub checkpoint_every: usize,
    /// Incremental-tier size that triggers a main rebuild
    pub rebuild_threshold: u64,
    /// Rows per streamed chunk
    pub chunk_rows: usize,
    /// Rebuild the main tier even below the threshold
    pub force_rebuild: bool,
    /// Discard checkpoint and incremental tier before starting
    pub reset_checkpoint: bool,
    /// Skip embedding entirely (debugging the store/mirror path)
    pub skip_embeddings: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 512,
            checkpoint_every: 100_000,
            rebuild_threshold: 1_000_000,
            chunk_rows: 50_000,
            force_rebuild: false,
            reset_checkpoint: false,
            skip_embeddings: false,
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    /// Items embedded this run
    pub embedded: u64,
    /// Rows skipped: already indexed, duplicate, or empty after cleanup
    pub skipped: u64,
    /// Corrupt rows dropped
    pub errors: u64,
    /// Whether the main tier was rebuilt
    pub rebuilt: bool,
    /// Incremental files consumed
    pub files: usize,
}

/// A collected row waiting for its embedding batch.
struct PendingText {
    id: u32,
    text: String,
    file_index: usize,
    row: u64,
}

/// Mutable state threaded through one embedding pass.
struct EmbedState {
    /// Collected texts not yet encoded
    buffer: Vec<PendingText>,
    /// Encoded rows not yet durably appended
    pending_ids: Vec<u32>,
    pending_vectors: Vec<f32>,
    since_checkpoint: usize,
    total_processed: u64,
    embedded: u64,
    skipped: u64,
    errors: u64,
    rows_scanned: u64,
    started: Instant,
    last_report: Instant,
}

impl EmbedState {
    fn new(total_processed: u64) -> Self {
        let now = Instant::now();
        Self {
            buffer: Vec::new(),
            pending_ids: Vec::new(),
            pending_vectors: Vec::new(),
            since_checkpoint: 0,
            total_processed,
            embedded: 0,
            skipped: 0,
            errors: 0,
            rows_scanned: 0,
            started: now,
            last_report: now,
        }
    }

    fn maybe_report(&mut self, total_rows: u64) {
        if self.last_report.elapsed() < REPORT_INTERVAL {
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let item_rate = self.embedded as f64 / elapsed.max(1e-9);
        let row_rate = self.rows_scanned as f64 / elapsed.max(1e-9);
        let remaining = total_rows.saturating_sub(self.rows_scanned) as f64;
        let eta_min = if row_rate > 0.0 {
            remaining / row_rate / 60.0
        } else {
            0.0
        };
        info!(
            "Embedded {} items ({:.0} items/sec, ETA {:.1} min)",
            self.embedded, item_rate, eta_min
        );
        self.last_report = Instant::now();
    }

    fn into_summary(self) -> IngestSummary {
        IngestSummary {
            embedded: self.embedded,
            skipped: self.skipped,
            errors: self.errors,
            rebuilt: false,
            files: 0,
        }
    }
}

/// Single-writer ingestion over a working directory.
pub struct IngestPipeline<'a> {
    encoder: &'a dyn TextEncoder,
    corpus: CorpusStore,
    manager: IndexManager,
    layout: IndexLayout,
    data_dir: PathBuf,
    options: PipelineOptions,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        encoder: &'a dyn TextEncoder,
        params: IndexParams,
        options: PipelineOptions,
    ) -> Self {
        let data_dir = data_dir.into();
        let layout = IndexLayout::new(&data_dir);
        Self {
            encoder,
            corpus: CorpusStore::new(&data_dir),
            manager: IndexManager::new(layout.clone(), params),
            layout,
            data_dir,
            options,
        }
    }

    /// Access to the index manager (status reporting).
    pub fn manager(&self) -> &IndexManager {
        &self.manager
    }

    /// Run one ingestion batch to completion.
    pub fn run(&self) -> Result<IngestSummary> {
        self.layout.ensure_dir()?;

        let files = self.corpus.list_incremental()?;
        if files.is_empty() && !self.options.force_rebuild {
            info!("No incremental files found; nothing to do");
            return Ok(IngestSummary::default());
        }
        info!("Found {} incremental file(s) to process", files.len());

        if self.options.reset_checkpoint {
            Checkpoint::clear(&self.layout.checkpoint())?;
            self.manager.store().clear(Tier::Incremental)?;
            let incr_index = self.layout.incremental_index();
            if incr_index.exists() {
                std::fs::remove_file(&incr_index)?;
            }
            info!("Checkpoint reset, starting fresh");
        }

        let mut summary = if self.options.skip_embeddings {
            info!("Skipping embedding generation (--skip-embeddings)");
            IngestSummary::default()
        } else {
            let summary = self.embed_files(&files)?;
            Checkpoint::clear(&self.layout.checkpoint())?;
            summary
        };

        let incremental = self.manager.store().count(Tier::Incremental)?;
        if self.options.force_rebuild || incremental >= self.options.rebuild_threshold {
            info!(
                "Incremental tier has {} vectors (threshold {})",
                incremental, self.options.rebuild_threshold
            );
            self.manager.rebuild()?;
            summary.rebuilt = true;
        }

        self.update_mirror(&files)?;
        self.corpus.merge_incremental(&files)?;
        self.corpus.archive(&files)?;

        summary.files = files.len();
        info!(
            "Ingest complete: {} embedded, {} skipped, {} errors",
            summary.embedded, summary.skipped, summary.errors
        );
        Ok(summary)
    }

    /// Stream, filter, embed, and checkpoint all pending files.
    fn embed_files(&self, files: &[PathBuf]) -> Result<IngestSummary> {
        let checkpoint = Checkpoint::load(&self.layout.checkpoint());

        // Skip set from the on-disk id arrays, the source of truth for
        // what is already embedded.
        let mut skip: HashSet<u32> = self
            .manager
            .store()
            .load_ids(Tier::Main)?
            .into_iter()
            .collect();
        skip.extend(self.manager.store().load_ids(Tier::Incremental)?);
        info!("Already indexed: {} items", skip.len());
        if checkpoint.total_processed > 0 {
            info!(
                "Resuming from checkpoint: {} items already processed",
                checkpoint.total_processed
            );
        }

        let total_rows: u64 = files
            .iter()
            .filter_map(|f| CorpusStore::count_rows(f).ok())
            .sum();

        let mut state = EmbedState::new(checkpoint.total_processed);

        for (file_index, file) in files.iter().enumerate() {
            let name = file_name(file);
            if checkpoint.is_completed(&name) {
                debug!("Skipping completed file {}", name);
                continue;
            }
            let start_row = if checkpoint.current_file.as_deref() == Some(name.as_str()) {
                checkpoint.row_offset
            } else {
                0
            };
            if start_row > 0 {
                info!("Resuming {} from row {}", name, start_row);
            } else {
                info!("Processing {}...", name);
            }

            for chunk in CorpusStore::read_chunks(file, self.options.chunk_rows, start_row)? {
                let chunk = chunk?;
                for (i, row) in chunk.rows.iter().enumerate() {
                    let row_index = chunk.start_row + i as u64;
                    match row {
                        None => state.errors += 1,
                        Some(record) => {
                            if skip.contains(&record.id) {
                                state.skipped += 1;
                            } else if let Some(text) = record.embedding_text() {
                                // First occurrence of an id wins
                                skip.insert(record.id);
                                state.buffer.push(PendingText {
                                    id: record.id,
                                    text,
                                    file_index,
                                    row: row_index,
                                });
                            } else {
                                state.skipped += 1;
                            }
                        }
                    }
                    state.rows_scanned += 1;

                    if state.buffer.len() >= self.options.batch_size {
                        self.drain_batches(&mut state, false)?;
                    }
                    if state.since_checkpoint >= self.options.checkpoint_every {
                        self.take_checkpoint(&mut state, files, (file_index, row_index + 1))?;
                    }
                    state.maybe_report(total_rows);
                }
            }
        }

        // End of stream: the one place a partial batch is allowed
        self.drain_batches(&mut state, true)?;
        if !state.pending_ids.is_empty() {
            let count = self.manager.add_incremental(
                &state.pending_ids,
                &state.pending_vectors,
                self.encoder.dim(),
            )?;
            info!("Incremental tier now has {} vectors", count);
            state.pending_ids.clear();
            state.pending_vectors.clear();
        }
        Ok(state.into_summary())
    }

    /// Encode buffered texts in full batches; with `include_partial`, also
    /// the final short batch.
    fn drain_batches(&self, state: &mut EmbedState, include_partial: bool) -> Result<()> {
        let batch_size = self.options.batch_size;
        let dim = self.encoder.dim();
        loop {
            let take = if state.buffer.len() >= batch_size {
                batch_size
            } else if include_partial && !state.buffer.is_empty() {
                state.buffer.len()
            } else {
                break;
            };

            let items: Vec<PendingText> = state.buffer.drain(..take).collect();
            let mut ids = Vec::with_capacity(take);
            let mut texts = Vec::with_capacity(take);
            for item in items {
                ids.push(item.id);
                texts.push(item.text);
            }

            let vectors = self.encoder.encode(&texts)?;
            if vectors.len() != ids.len() {
                return Err(SearchError::Embed(format!(
                    "encoder returned {} vectors for {} texts",
                    vectors.len(),
                    ids.len()
                )));
            }
            for vector in &vectors {
                if vector.len() != dim {
                    return Err(SearchError::Embed(format!(
                        "encoder returned dimension {} (expected {dim})",
                        vector.len()
                    )));
                }
                state.pending_vectors.extend_from_slice(vector);
            }
            state.pending_ids.extend_from_slice(&ids);
            state.embedded += take as u64;
            state.total_processed += take as u64;
            state.since_checkpoint += take;
        }
        Ok(())
    }

    /// Durably append everything encoded so far, then record the resume
    /// position.
    fn take_checkpoint(
        &self,
        state: &mut EmbedState,
        files: &[PathBuf],
        cursor: (usize, u64),
    ) -> Result<()> {
        if !state.pending_ids.is_empty() {
            self.manager.add_incremental(
                &state.pending_ids,
                &state.pending_vectors,
                self.encoder.dim(),
            )?;
            state.pending_ids.clear();
            state.pending_vectors.clear();
        }

        // The oldest still-buffered row bounds the safe resume position;
        // with an empty buffer the cursor itself does. Rows re-scanned on
        // resume are deduplicated by the skip set.
        let (file_index, row) = state
            .buffer
            .first()
            .map(|p| (p.file_index, p.row))
            .unwrap_or(cursor);
        let checkpoint = Checkpoint {
            total_processed: state.total_processed,
            row_offset: row,
            current_file: files.get(file_index).map(|f| file_name(f)),
            completed_files: files[..file_index.min(files.len())]
                .iter()
                .map(|f| file_name(f))
                .collect(),
        };
        checkpoint.save(&self.layout.checkpoint())?;
        state.since_checkpoint = 0;
        info!("Checkpoint saved at {} items", state.total_processed);
        Ok(())
    }

    /// Bring the relational mirror up to date with the consumed files.
    fn update_mirror(&self, files: &[PathBuf]) -> Result<()> {
        let path = self.data_dir.join(MIRROR_FILE);
        let existed = path.exists();
        let mut mirror = Mirror::open(&path)?;
        if !existed {
            mirror.create_from_corpus(&self.corpus)?;
        }
        for file in files {
            let stats = mirror.upsert_file(file)?;
            debug!(
                "Mirror: +{} rows from {} ({} skipped)",
                stats.inserted,
                file.display(),
                stats.skipped
            );
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
