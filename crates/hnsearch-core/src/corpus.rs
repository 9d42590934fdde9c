//! Parquet corpus store
//!
//! Owns the canonical `hacker-news.parquet` file plus the pending
//! `incremental_*.parquet` inputs dropped off by the upstream sync. Reads
//! are streamed in row-group-sized chunks so a 40M-row corpus never has to
//! fit in memory; writes go through a temporary file and a rename, with the
//! previous main file kept as a `.bak` sibling.
//!
//! Incremental inputs carry extra upstream columns (`timestamp`, `parent`,
//! `descendants`, `ranking`); merging projects every source onto the
//! canonical column set of [`Record`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Int32Array, Int64Array, LargeStringArray, StringArray,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::record::{Record, RecordKind};

/// Canonical corpus file name
pub const MAIN_CORPUS_FILE: &str = "hacker-news.parquet";

/// Directory consumed incremental files are archived into
pub const ARCHIVE_DIR: &str = "processed_incremental";

/// Prefix of pending incremental input files
const INCREMENTAL_PREFIX: &str = "incremental_";

/// Rows per streamed chunk (matches one half of a corpus row group)
pub const DEFAULT_CHUNK_ROWS: usize = 50_000;

/// Rows per row group written to the merged corpus
const ROW_GROUP_SIZE: usize = 100_000;

/// Corpus store rooted at a working directory.
pub struct CorpusStore {
    root: PathBuf,
}

/// One decoded chunk of rows from a columnar file.
///
/// `rows[i]` is `None` when row `start_row + i` failed to decode; positions
/// are preserved so callers can keep exact row offsets for checkpointing.
pub struct RecordChunk {
    /// Absolute row index of `rows[0]` within the source file
    pub start_row: u64,
    pub rows: Vec<Option<Record>>,
}

/// Streaming chunk reader over one columnar file.
pub struct RecordChunks {
    reader: ParquetRecordBatchReader,
    next_row: u64,
}

impl Iterator for RecordChunks {
    type Item = Result<RecordChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = match self.reader.next()? {
            Ok(batch) => batch,
            Err(e) => return Some(Err(e.into())),
        };
        let start_row = self.next_row;
        self.next_row += batch.num_rows() as u64;
        Some(Ok(RecordChunk {
            start_row,
            rows: decode_batch(&batch),
        }))
    }
}

impl CorpusStore {
    /// Create a store rooted at the given working directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the canonical corpus file.
    pub fn main_path(&self) -> PathBuf {
        self.root.join(MAIN_CORPUS_FILE)
    }

    /// List pending incremental files in lexicographic order.
    ///
    /// File ordering is the processing order; names embed a UTC timestamp
    /// so lexicographic and chronological order coincide.
    pub fn list_incremental(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(INCREMENTAL_PREFIX) && name.ends_with(".parquet") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Total row count of a columnar file, from metadata only.
    pub fn count_rows(path: &Path) -> Result<u64> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        Ok(builder.metadata().file_metadata().num_rows() as u64)
    }

    /// Stream a columnar file in `chunk_rows`-sized chunks, starting at
    /// `start_row` (rows before it are skipped at the reader level).
    pub fn read_chunks(path: &Path, chunk_rows: usize, start_row: u64) -> Result<RecordChunks> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(chunk_rows)
            .with_offset(start_row as usize)
            .build()?;
        Ok(RecordChunks {
            reader,
            next_row: start_row,
        })
    }

    /// Write records to a columnar file with the canonical schema.
    ///
    /// Used by the merge path and by tests that synthesise incremental
    /// inputs.
    pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
        let file = File::create(path)?;
        let schema = canonical_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(ROW_GROUP_SIZE)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        if !records.is_empty() {
            writer.write(&encode_batch(&schema, records)?)?;
        }
        writer.close()?;
        Ok(())
    }

    /// Merge consumed incremental files into the main corpus.
    ///
    /// The merged corpus is written to a temporary sibling first; the old
    /// main file becomes `hacker-news.parquet.bak` and the temporary is
    /// renamed into place. A failure anywhere before the final rename
    /// leaves the previous main file untouched.
    pub fn merge_incremental(&self, files: &[PathBuf]) -> Result<MergeStats> {
        if files.is_empty() {
            return Ok(MergeStats::default());
        }

        let main = self.main_path();
        let tmp = self.root.join(format!("{MAIN_CORPUS_FILE}.tmp"));
        let bak = self.root.join(format!("{MAIN_CORPUS_FILE}.bak"));

        let schema = canonical_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(ROW_GROUP_SIZE)
            .build();

        let mut stats = MergeStats::default();
        let result = (|| -> Result<()> {
            let mut writer = ArrowWriter::try_new(File::create(&tmp)?, schema.clone(), Some(props))?;

            let mut sources: Vec<&Path> = Vec::with_capacity(files.len() + 1);
            if main.exists() {
                sources.push(main.as_path());
            }
            sources.extend(files.iter().map(PathBuf::as_path));

            for source in sources {
                for chunk in Self::read_chunks(source, ROW_GROUP_SIZE, 0)? {
                    let chunk = chunk?;
                    let total = chunk.rows.len();
                    let records: Vec<Record> = chunk.rows.into_iter().flatten().collect();
                    stats.skipped += (total - records.len()) as u64;
                    stats.rows += records.len() as u64;
                    if !records.is_empty() {
                        writer.write(&encode_batch(&schema, &records)?)?;
                    }
                }
            }
            writer.close()?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        if main.exists() {
            std::fs::rename(&main, &bak)?;
        }
        std::fs::rename(&tmp, &main)?;

        if stats.skipped > 0 {
            warn!("Skipped {} corrupt rows while merging corpus", stats.skipped);
        }
        info!("Main corpus now has {} rows", stats.rows);
        Ok(stats)
    }

    /// Move consumed incremental files into the archive directory.
    pub fn archive(&self, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let archive = self.root.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archive)?;
        for file in files {
            let name = file.file_name().ok_or_else(|| {
                CoreError::corrupt(file.clone(), "incremental file has no file name")
            })?;
            std::fs::rename(file, archive.join(name))?;
        }
        debug!("Archived {} incremental file(s)", files.len());
        Ok(())
    }
}

/// Merge outcome counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    /// Rows written to the merged corpus
    pub rows: u64,
    /// Corrupt rows dropped during the merge
    pub skipped: u64,
}

/// Canonical corpus schema: the [`Record`] columns under upstream names.
fn canonical_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt32, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("by", DataType::Utf8, true),
        Field::new("time", DataType::UInt32, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("text", DataType::Utf8, true),
        Field::new("url", DataType::Utf8, true),
        Field::new("score", DataType::UInt32, true),
        Field::new("deleted", DataType::Boolean, true),
        Field::new("dead", DataType::Boolean, true),
    ]))
}

/// Encode records into one canonical batch.
fn encode_batch(schema: &SchemaRef, records: &[Record]) -> Result<RecordBatch> {
    let ids: UInt32Array = records.iter().map(|r| Some(r.id)).collect();
    let kinds: StringArray = records.iter().map(|r| Some(r.kind.as_str())).collect();
    let authors: StringArray = records.iter().map(|r| Some(r.author.as_str())).collect();
    let times: UInt32Array = records.iter().map(|r| Some(r.time)).collect();
    let titles: StringArray = records.iter().map(|r| r.title.as_deref()).collect();
    let texts: StringArray = records.iter().map(|r| r.text.as_deref()).collect();
    let urls: StringArray = records.iter().map(|r| r.url.as_deref()).collect();
    let scores: UInt32Array = records.iter().map(|r| r.score).collect();
    let deleted: BooleanArray = records.iter().map(|r| r.deleted.then_some(true)).collect();
    let dead: BooleanArray = records.iter().map(|r| r.dead.then_some(true)).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(ids),
            Arc::new(kinds),
            Arc::new(authors),
            Arc::new(times),
            Arc::new(titles),
            Arc::new(texts),
            Arc::new(urls),
            Arc::new(scores),
            Arc::new(deleted),
            Arc::new(dead),
        ],
    )?;
    Ok(batch)
}

/// Decode one batch into per-row records, `None` for corrupt rows.
///
/// Upstream files vary in physical types (BigQuery exports use Int64 where
/// the canonical schema says UInt32), so numeric columns accept any integer
/// width that fits.
pub fn decode_batch(batch: &RecordBatch) -> Vec<Option<Record>> {
    let id = batch.column_by_name("id");
    let kind = batch.column_by_name("type");
    let by = batch.column_by_name("by");
    let time = batch.column_by_name("time");
    let title = batch.column_by_name("title");
    let text = batch.column_by_name("text");
    let url = batch.column_by_name("url");
    let score = batch.column_by_name("score");
    let deleted = batch.column_by_name("deleted");
    let dead = batch.column_by_name("dead");

    (0..batch.num_rows())
        .map(|i| {
            let id = u32_at(id, i)?;
            let kind = RecordKind::parse(str_at(kind, i)?)?;
            Some(Record {
                id,
                kind,
                author: str_at(by, i).unwrap_or("").to_string(),
                time: u32_at(time, i).unwrap_or(0),
                title: str_at(title, i).map(String::from),
                text: str_at(text, i).map(String::from),
                url: str_at(url, i).map(String::from),
                score: u32_at(score, i),
                deleted: bool_at(deleted, i).unwrap_or(false),
                dead: bool_at(dead, i).unwrap_or(false),
            })
        })
        .collect()
}

fn u32_at(col: Option<&ArrayRef>, i: usize) -> Option<u32> {
    let col = col?;
    if col.is_null(i) {
        return None;
    }
    match col.data_type() {
        DataType::UInt32 => Some(col.as_any().downcast_ref::<UInt32Array>()?.value(i)),
        DataType::UInt64 => u32::try_from(col.as_any().downcast_ref::<UInt64Array>()?.value(i)).ok(),
        DataType::Int32 => u32::try_from(col.as_any().downcast_ref::<Int32Array>()?.value(i)).ok(),
        DataType::Int64 => u32::try_from(col.as_any().downcast_ref::<Int64Array>()?.value(i)).ok(),
        _ => None,
    }
}

fn str_at(col: Option<&ArrayRef>, i: usize) -> Option<&str> {
    let col = col?;
    if col.is_null(i) {
        return None;
    }
    match col.data_type() {
        DataType::Utf8 => Some(col.as_any().downcast_ref::<StringArray>()?.value(i)),
        DataType::LargeUtf8 => Some(col.as_any().downcast_ref::<LargeStringArray>()?.value(i)),
        _ => None,
    }
}

fn bool_at(col: Option<&ArrayRef>, i: usize) -> Option<bool> {
    let col = col?;
    if col.is_null(i) {
        return None;
    }
    col.as_any()
        .downcast_ref::<BooleanArray>()
        .map(|a| a.value(i))
}
