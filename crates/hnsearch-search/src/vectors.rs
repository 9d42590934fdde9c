//! Durable id/vector arrays for both index tiers
//!
//! Each tier is a pair of files: a `u32` id array and a row-major `f32`
//! vector array, parallel by position. Files carry a small versioned
//! header (magic, dtype, dimension, count) followed by raw little-endian
//! elements.
//!
//! Writes build complete temporary files, fsync them, and rename into
//! place. The vector file is renamed before the id file, so the id array
//! is the commit record: a crash between the two renames leaves a vector
//! file longer than the id file, and loading truncates the vectors back to
//! the id count, which is exactly the pre-append state.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, SearchError};
use crate::layout::IndexLayout;

const MAGIC: &[u8; 4] = b"HNSA";
const VERSION: u32 = 1;
const DTYPE_U32: u8 = 0;
const DTYPE_F32: u8 = 1;

/// Which tier a vector-store operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Bulk tier behind the trained index
    Main,
    /// Growing exact-search tier
    Incremental,
}

/// On-disk `(ids, vectors)` arrays for both tiers.
pub struct VectorStore {
    layout: IndexLayout,
}

impl VectorStore {
    pub fn new(layout: IndexLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    fn ids_path(&self, tier: Tier) -> PathBuf {
        match tier {
            Tier::Main => self.layout.main_ids(),
            Tier::Incremental => self.layout.incremental_ids(),
        }
    }

    fn vectors_path(&self, tier: Tier) -> PathBuf {
        match tier {
            Tier::Main => self.layout.main_vectors(),
            Tier::Incremental => self.layout.incremental_vectors(),
        }
    }

    /// Whether the tier has any persisted arrays.
    pub fn exists(&self, tier: Tier) -> bool {
        self.ids_path(tier).exists()
    }

    /// Number of committed rows in a tier, from the id-file header alone.
    pub fn count(&self, tier: Tier) -> Result<u64> {
        let path = self.ids_path(tier);
        if !path.exists() {
            return Ok(0);
        }
        let (_, _, count) = read_header(&path)?;
        Ok(count)
    }

    /// Load a tier's id array only (skip-set construction).
    pub fn load_ids(&self, tier: Tier) -> Result<Vec<u32>> {
        let path = self.ids_path(tier);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_u32_array(&path)
    }

    /// Load a tier's arrays: `(ids, row-major vectors, dim)`.
    ///
    /// Returns `None` when the tier has never been written. A torn append
    /// (vector rows beyond the id count) is repaired by truncation.
    pub fn load(&self, tier: Tier) -> Result<Option<(Vec<u32>, Vec<f32>, usize)>> {
        let ids_path = self.ids_path(tier);
        let vecs_path = self.vectors_path(tier);
        if !ids_path.exists() || !vecs_path.exists() {
            return Ok(None);
        }

        let ids = read_u32_array(&ids_path)?;
        let (dim, mut vectors) = read_f32_array(&vecs_path)?;
        let rows = vectors.len() / dim.max(1);

        if rows < ids.len() {
            return Err(SearchError::corrupt(
                vecs_path,
                format!("vector file has {rows} rows but id file has {}", ids.len()),
            ));
        }
        if rows > ids.len() {
            warn!(
                "Vector file for {:?} tier has {} uncommitted rows; truncating to {}",
                tier,
                rows - ids.len(),
                ids.len()
            );
            vectors.truncate(ids.len() * dim);
        }
        Ok(Some((ids, vectors, dim)))
    }

    /// Append rows to a tier and publish atomically.
    ///
    /// `new_vectors` is row-major with `new_ids.len() * dim` elements.
    /// Returns the tier's committed row count after the append.
    pub fn append(&self, tier: Tier, new_ids: &[u32], new_vectors: &[f32], dim: usize) -> Result<u64> {
        if new_ids.len() * dim != new_vectors.len() {
            return Err(SearchError::corrupt(
                self.vectors_path(tier),
                format!(
                    "append of {} ids with {} vector elements (dim {dim})",
                    new_ids.len(),
                    new_vectors.len()
                ),
            ));
        }

        let (mut ids, mut vectors) = match self.load(tier)? {
            Some((ids, vectors, existing_dim)) => {
                if existing_dim != dim {
                    return Err(SearchError::corrupt(
                        self.vectors_path(tier),
                        format!("dimension mismatch: existing {existing_dim}, appending {dim}"),
                    ));
                }
                (ids, vectors)
            }
            None => (Vec::new(), Vec::new()),
        };
        ids.extend_from_slice(new_ids);
        vectors.extend_from_slice(new_vectors);

        self.replace(tier, &ids, &vectors, dim)?;
        debug!("{:?} tier now has {} vectors", tier, ids.len());
        Ok(ids.len() as u64)
    }

    /// Replace a tier's arrays wholesale (rebuild path) and publish
    /// atomically. For the main tier the id-mapping alias is written too.
    pub fn replace(&self, tier: Tier, ids: &[u32], vectors: &[f32], dim: usize) -> Result<()> {
        if ids.len() * dim != vectors.len() {
            return Err(SearchError::corrupt(
                self.vectors_path(tier),
                format!(
                    "replace of {} ids with {} vector elements (dim {dim})",
                    ids.len(),
                    vectors.len()
                ),
            ));
        }
        self.layout.ensure_dir()?;

        // Vectors first, ids last: the id file commits the append.
        write_f32_array(&self.vectors_path(tier), dim, vectors)?;
        write_u32_array(&self.ids_path(tier), ids)?;
        if tier == Tier::Main {
            write_u32_array(&self.layout.id_mapping(), ids)?;
        }
        Ok(())
    }

    /// Remove a tier's files (after a merge into the main tier).
    pub fn clear(&self, tier: Tier) -> Result<()> {
        for path in [self.ids_path(tier), self.vectors_path(tier)] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a complete file under a temporary name, fsync, and rename over
/// the destination. Shared by the vector arrays and the index images.
pub(crate) fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<()> {
    let tmp = tmp_path(path);
    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn write_header(w: &mut impl Write, dtype: u8, dim: u32, count: u64) -> std::io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&[dtype])?;
    w.write_all(&dim.to_le_bytes())?;
    w.write_all(&count.to_le_bytes())
}

fn write_u32_array(path: &Path, data: &[u32]) -> Result<()> {
    write_atomic(path, |w| {
        write_header(w, DTYPE_U32, 1, data.len() as u64)?;
        for value in data {
            w.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    })
}

fn write_f32_array(path: &Path, dim: usize, data: &[f32]) -> Result<()> {
    let count = if dim == 0 { 0 } else { (data.len() / dim) as u64 };
    write_atomic(path, |w| {
        write_header(w, DTYPE_F32, dim as u32, count)?;
        for value in data {
            w.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    })
}

/// Parse and validate a header, returning `(dtype, dim, count)`.
fn read_header_from(reader: &mut impl Read, path: &Path) -> Result<(u8, u32, u64)> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SearchError::corrupt(path, "bad magic"));
    }
    let mut buf4 = [0u8; 4];
    reader.read_exact(&mut buf4)?;
    let version = u32::from_le_bytes(buf4);
    if version != VERSION {
        return Err(SearchError::corrupt(path, format!("unsupported version {version}")));
    }
    let mut dtype = [0u8; 1];
    reader.read_exact(&mut dtype)?;
    reader.read_exact(&mut buf4)?;
    let dim = u32::from_le_bytes(buf4);
    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    let count = u64::from_le_bytes(buf8);
    Ok((dtype[0], dim, count))
}

fn read_header(path: &Path) -> Result<(u8, u32, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    read_header_from(&mut reader, path)
}

fn read_u32_array(path: &Path) -> Result<Vec<u32>> {
    let mut reader = BufReader::new(File::open(path)?);
    let (dtype, dim, count) = read_header_from(&mut reader, path)?;
    if dtype != DTYPE_U32 || dim != 1 {
        return Err(SearchError::corrupt(path, "expected a u32 id array"));
    }
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() != count as usize * 4 {
        return Err(SearchError::corrupt(
            path,
            format!("expected {} elements, file holds {} bytes", count, bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn read_f32_array(path: &Path) -> Result<(usize, Vec<f32>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let (dtype, dim, count) = read_header_from(&mut reader, path)?;
    if dtype != DTYPE_F32 || dim == 0 {
        return Err(SearchError::corrupt(path, "expected an f32 vector array"));
    }
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let expected = count as usize * dim as usize * 4;
    if bytes.len() != expected {
        return Err(SearchError::corrupt(
            path,
            format!("expected {expected} payload bytes, file holds {}", bytes.len()),
        ));
    }
    let data = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((dim as usize, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> VectorStore {
        VectorStore::new(IndexLayout::new(dir.path()))
    }

    #[test]
    fn test_append_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .append(Tier::Incremental, &[1, 2], &[1.0, 0.0, 0.0, 1.0], 2)
            .unwrap();
        let count = store
            .append(Tier::Incremental, &[3], &[0.5, 0.5], 2)
            .unwrap();
        assert_eq!(count, 3);

        let (ids, vectors, dim) = store.load(Tier::Incremental).unwrap().unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(dim, 2);
        assert_eq!(vectors, vec![1.0, 0.0, 0.0, 1.0, 0.5, 0.5]);
    }

    #[test]
    fn test_append_rejects_misaligned_input() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.append(Tier::Incremental, &[1, 2], &[1.0, 0.0, 0.0], 2);
        assert!(matches!(err, Err(SearchError::Corrupt { .. })));
        // Nothing written
        assert!(!store.exists(Tier::Incremental));
    }

    #[test]
    fn test_load_missing_tier_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.load(Tier::Main).unwrap().is_none());
        assert_eq!(store.count(Tier::Main).unwrap(), 0);
    }

    #[test]
    fn test_clear_removes_tier() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(Tier::Incremental, &[1], &[1.0], 1).unwrap();
        store.clear(Tier::Incremental).unwrap();
        assert!(store.load(Tier::Incremental).unwrap().is_none());
    }

    #[test]
    fn test_main_replace_writes_id_mapping_alias() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.replace(Tier::Main, &[7, 8], &[1.0, 0.0, 0.0, 1.0], 2).unwrap();

        let alias = read_u32_array(&store.layout().id_mapping()).unwrap();
        assert_eq!(alias, vec![7, 8]);
    }

    #[test]
    fn test_torn_append_truncates_to_id_count() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(Tier::Incremental, &[1], &[1.0, 0.0], 2).unwrap();

        // Simulate a crash after the vector rename but before the id rename:
        // the vector file carries an extra row the id file never committed.
        write_f32_array(
            &store.layout().incremental_vectors(),
            2,
            &[1.0, 0.0, 0.25, 0.75],
        )
        .unwrap();

        let (ids, vectors, _) = store.load(Tier::Incremental).unwrap().unwrap();
        assert_eq!(ids, vec![1]);
        assert_eq!(vectors, vec![1.0, 0.0]);
    }

    #[test]
    fn test_leftover_tmp_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(Tier::Incremental, &[1], &[1.0], 1).unwrap();

        // A partial temporary from an interrupted write must not be read.
        std::fs::write(tmp_path(&store.layout().incremental_ids()), b"garbage").unwrap();

        let (ids, _, _) = store.load(Tier::Incremental).unwrap().unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_ids_longer_than_vectors_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(Tier::Incremental, &[1, 2], &[1.0, 0.0], 1).unwrap();
        write_f32_array(&store.layout().incremental_vectors(), 1, &[1.0]).unwrap();

        assert!(matches!(
            store.load(Tier::Incremental),
            Err(SearchError::Corrupt { .. })
        ));
    }
}
