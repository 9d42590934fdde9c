//! On-disk layout of the embeddings directory
//!
//! All vector-side state lives under `<data_dir>/embeddings/`. File names
//! are part of the external interface and stay stable across versions:
//!
//! ```text
//! embeddings/
//!   ids.bin                      # main tier id array
//!   embeddings.bin               # main tier vector array
//!   id_mapping.bin               # alias of the main id array, read by queries
//!   faiss_index_ivf_pq.bin       # main index image (IVF+PQ or flat fallback)
//!   incremental_ids.bin          # incremental tier id array
//!   incremental_embeddings.bin   # incremental tier vector array
//!   faiss_index_incremental.bin  # incremental flat index image
//!   incremental_checkpoint.json  # ingestion progress
//! ```

use std::path::{Path, PathBuf};

/// Subdirectory of the working dir holding vector-side state
pub const EMBEDDINGS_DIR: &str = "embeddings";

/// Paths of every vector-side file under one working directory.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    dir: PathBuf,
}

impl IndexLayout {
    /// Layout rooted at a working directory.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(EMBEDDINGS_DIR),
        }
    }

    /// Create the embeddings directory if missing.
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// The embeddings directory itself.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn main_ids(&self) -> PathBuf {
        self.dir.join("ids.bin")
    }

    pub fn main_vectors(&self) -> PathBuf {
        self.dir.join("embeddings.bin")
    }

    /// Alias of the main id array kept for the query path.
    pub fn id_mapping(&self) -> PathBuf {
        self.dir.join("id_mapping.bin")
    }

    pub fn main_index(&self) -> PathBuf {
        self.dir.join("faiss_index_ivf_pq.bin")
    }

    pub fn incremental_ids(&self) -> PathBuf {
        self.dir.join("incremental_ids.bin")
    }

    pub fn incremental_vectors(&self) -> PathBuf {
        self.dir.join("incremental_embeddings.bin")
    }

    pub fn incremental_index(&self) -> PathBuf {
        self.dir.join("faiss_index_incremental.bin")
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.dir.join("incremental_checkpoint.json")
    }
}
