//! SQLite relational mirror
//!
//! A file-backed copy of the live records used to hydrate search candidates
//! by id, with optional kind filtering. The mirror is populated once from
//! the main corpus and kept current by idempotent upserts from each
//! consumed incremental file: insert-if-absent keyed by `id`, never
//! overwriting, so the earliest-seen copy of a row wins.
//!
//! Queries open the database read-only; only the ingestion writer opens it
//! read-write.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use crate::corpus::{CorpusStore, DEFAULT_CHUNK_ROWS};
use crate::error::Result;
use crate::record::{Record, RecordKind};

/// Mirror database file name
pub const MIRROR_FILE: &str = "hn_search.db";

/// SQLite variable limit headroom for chunked `IN (...)` hydration
const HYDRATE_CHUNK: usize = 512;

const CREATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS records (
    id     INTEGER PRIMARY KEY,
    kind   TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    time   INTEGER NOT NULL DEFAULT 0,
    title  TEXT,
    text   TEXT,
    url    TEXT,
    score  INTEGER
)";

/// File-backed mirror of the live corpus records.
pub struct Mirror {
    conn: Connection,
    path: PathBuf,
}

/// Counters from one idempotent upsert pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertStats {
    /// Rows newly inserted
    pub inserted: u64,
    /// Rows skipped: already present, soft-deleted, or corrupt
    pub skipped: u64,
}

impl Mirror {
    /// Open (or create) the mirror read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(CREATE_SQL)?;
        Ok(Self { conn, path })
    }

    /// Open an existing mirror read-only (query-side connections).
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn, path })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bulk-populate from the main corpus file, filtering soft-deleted rows.
    ///
    /// Called when the mirror does not exist yet; a no-op when the corpus
    /// file is absent.
    pub fn create_from_corpus(&mut self, corpus: &CorpusStore) -> Result<UpsertStats> {
        let main = corpus.main_path();
        if !main.exists() {
            return Ok(UpsertStats::default());
        }
        info!("Creating mirror from {}", main.display());
        let mut total = UpsertStats::default();
        for chunk in CorpusStore::read_chunks(&main, DEFAULT_CHUNK_ROWS, 0)? {
            let chunk = chunk?;
            let stats = self.upsert(chunk.rows.iter().flatten())?;
            total.inserted += stats.inserted;
            total.skipped += stats.skipped + chunk.rows.iter().filter(|r| r.is_none()).count() as u64;
        }
        info!("Mirror created with {} rows", total.inserted);
        Ok(total)
    }

    /// Idempotently upsert one consumed incremental file.
    pub fn upsert_file(&mut self, path: &Path) -> Result<UpsertStats> {
        let mut total = UpsertStats::default();
        for chunk in CorpusStore::read_chunks(path, DEFAULT_CHUNK_ROWS, 0)? {
            let chunk = chunk?;
            let stats = self.upsert(chunk.rows.iter().flatten())?;
            total.inserted += stats.inserted;
            total.skipped += stats.skipped + chunk.rows.iter().filter(|r| r.is_none()).count() as u64;
        }
        debug!(
            "Upserted {} from {} ({} skipped)",
            total.inserted,
            path.display(),
            total.skipped
        );
        Ok(total)
    }

    /// Insert-if-absent for a batch of records, inside one transaction.
    ///
    /// Soft-deleted rows are skipped; an id already present keeps its
    /// earliest-seen row.
    pub fn upsert<'a>(&mut self, records: impl Iterator<Item = &'a Record>) -> Result<UpsertStats> {
        let tx = self.conn.transaction()?;
        let mut stats = UpsertStats::default();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO records (id, kind, author, time, title, text, url, score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                if !record.is_live() {
                    stats.skipped += 1;
                    continue;
                }
                let inserted = stmt.execute(params![
                    record.id,
                    record.kind.as_str(),
                    record.author,
                    record.time,
                    record.title,
                    record.text,
                    record.url,
                    record.score,
                ])?;
                if inserted == 1 {
                    stats.inserted += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }
        tx.commit()?;
        Ok(stats)
    }

    /// Fetch live rows whose id is in `ids`, optionally restricted to one
    /// kind. Missing ids yield no row; order is unspecified.
    pub fn hydrate(&self, ids: &[u32], kind: Option<RecordKind>) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(ids.len().min(HYDRATE_CHUNK));
        for chunk in ids.chunks(HYDRATE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = match kind {
                Some(_) => format!(
                    "SELECT id, kind, author, time, title, text, url, score
                     FROM records WHERE id IN ({placeholders}) AND kind = ?"
                ),
                None => format!(
                    "SELECT id, kind, author, time, title, text, url, score
                     FROM records WHERE id IN ({placeholders})"
                ),
            };
            let mut stmt = self.conn.prepare(&sql)?;
            let mut values: Vec<rusqlite::types::Value> =
                chunk.iter().map(|id| (*id as i64).into()).collect();
            if let Some(kind) = kind {
                values.push(kind.as_str().to_string().into());
            }
            let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_record)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// Number of rows in the mirror.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let kind: String = row.get(1)?;
    Ok(Record {
        id: row.get(0)?,
        // Kinds were validated on the way in; an unknown value here means
        // the database was edited out-of-band, so surface it as a type error.
        kind: RecordKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown record kind '{kind}'").into(),
            )
        })?,
        author: row.get(2)?,
        time: row.get(3)?,
        title: row.get(4)?,
        text: row.get(5)?,
        url: row.get(6)?,
        score: row.get(7)?,
        deleted: false,
        dead: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: u32, kind: RecordKind) -> Record {
        Record {
            id,
            kind,
            author: format!("user{id}"),
            time: 1_600_000_000,
            title: Some(format!("title {id}")),
            text: None,
            url: None,
            score: Some(10),
            deleted: false,
            dead: false,
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();

        let records = vec![record(1, RecordKind::Story), record(2, RecordKind::Comment)];
        let stats = mirror.upsert(records.iter()).unwrap();
        assert_eq!(stats.inserted, 2);

        // Second pass inserts nothing
        let stats = mirror.upsert(records.iter()).unwrap();
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(mirror.count().unwrap(), 2);
    }

    #[test]
    fn test_upsert_preserves_earliest_copy() {
        let dir = TempDir::new().unwrap();
        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();

        let first = record(1, RecordKind::Story);
        mirror.upsert(std::iter::once(&first)).unwrap();

        let mut second = record(1, RecordKind::Story);
        second.title = Some("edited".to_string());
        mirror.upsert(std::iter::once(&second)).unwrap();

        let rows = mirror.hydrate(&[1], None).unwrap();
        assert_eq!(rows[0].title.as_deref(), Some("title 1"));
    }

    #[test]
    fn test_upsert_filters_soft_deleted() {
        let dir = TempDir::new().unwrap();
        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();

        let mut dead = record(1, RecordKind::Story);
        dead.dead = true;
        let mut deleted = record(2, RecordKind::Story);
        deleted.deleted = true;

        let stats = mirror.upsert([&dead, &deleted].into_iter()).unwrap();
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.skipped, 2);
        assert_eq!(mirror.count().unwrap(), 0);
    }

    #[test]
    fn test_hydrate_missing_id_yields_no_row() {
        let dir = TempDir::new().unwrap();
        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();
        mirror.upsert(std::iter::once(&record(1, RecordKind::Story))).unwrap();

        let rows = mirror.hydrate(&[1, 999], None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[test]
    fn test_hydrate_kind_filter() {
        let dir = TempDir::new().unwrap();
        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();
        mirror
            .upsert([&record(1, RecordKind::Story), &record(2, RecordKind::Comment)].into_iter())
            .unwrap();

        let rows = mirror.hydrate(&[1, 2], Some(RecordKind::Comment)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 2);
    }

    #[test]
    fn test_hydrate_chunks_large_id_sets() {
        let dir = TempDir::new().unwrap();
        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();
        let records: Vec<Record> = (0..1500).map(|id| record(id, RecordKind::Story)).collect();
        mirror.upsert(records.iter()).unwrap();

        let ids: Vec<u32> = (0..1500).collect();
        let rows = mirror.hydrate(&ids, None).unwrap();
        assert_eq!(rows.len(), 1500);
    }

    #[test]
    fn test_create_from_corpus_filters_soft_deleted() {
        let dir = TempDir::new().unwrap();
        let corpus = CorpusStore::new(dir.path());
        let mut gone = record(3, RecordKind::Story);
        gone.deleted = true;
        CorpusStore::write_records(
            &corpus.main_path(),
            &[record(1, RecordKind::Story), record(2, RecordKind::Comment), gone],
        )
        .unwrap();

        let mut mirror = Mirror::open(dir.path().join(MIRROR_FILE)).unwrap();
        let stats = mirror.create_from_corpus(&corpus).unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(mirror.count().unwrap(), 2);
    }

    #[test]
    fn test_read_only_connection_can_hydrate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MIRROR_FILE);
        {
            let mut mirror = Mirror::open(&path).unwrap();
            mirror.upsert(std::iter::once(&record(1, RecordKind::Story))).unwrap();
        }
        let mirror = Mirror::open_read_only(&path).unwrap();
        assert_eq!(mirror.hydrate(&[1], None).unwrap().len(), 1);
    }
}
