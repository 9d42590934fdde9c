//! hnsearch configuration management
//!
//! Provides the typed configuration value shared by the CLI and the
//! libraries, loaded from an optional `hnsearch.toml` in the working
//! directory (or an explicit `--config` path) and then merged with CLI
//! overrides. Every recognised option is enumerated here; unknown keys
//! are a hard error rather than silently ignored.
//!
//! # Example TOML
//!
//! ```toml
//! data_dir = "/srv/hnsearch"
//!
//! [embedding]
//! model = "sentence-transformers/all-MiniLM-L6-v2"
//! batch_size = 512
//!
//! [ingest]
//! checkpoint_every = 100000
//! rebuild_threshold = 1000000
//!
//! [index]
//! nlist = 4096
//! m = 48
//! nprobe = 64
//! metric = "inner-product"
//! ```

mod error;

pub use error::ConfigError;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "hnsearch.toml";

/// Root configuration for hnsearch.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Working directory holding the corpus, mirror, and embeddings
    pub data_dir: Option<PathBuf>,

    /// Embedding model settings
    pub embedding: EmbeddingConfig,

    /// Ingestion pipeline settings
    pub ingest: IngestConfig,

    /// Main index training and search settings
    pub index: IndexConfig,
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Sentence model on the HuggingFace Hub
    pub model: String,

    /// Texts per embedding batch
    pub batch_size: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            batch_size: 512,
        }
    }
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Embedded items between durable checkpoints
    pub checkpoint_every: u32,

    /// Incremental-tier size that triggers a main rebuild
    pub rebuild_threshold: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 100_000,
            rebuild_threshold: 1_000_000,
        }
    }
}

/// Main index settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Upper bound on inverted lists (effective nlist = min(nlist, n/100))
    pub nlist: u32,

    /// Product-quantiser subquantisers; must divide the model dimension
    pub m: u32,

    /// Inverted lists probed per query
    pub nprobe: u32,

    /// Similarity metric; inner product is the only recognised value
    pub metric: Metric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            nlist: 4096,
            m: 48,
            nprobe: 64,
            metric: Metric::InnerProduct,
        }
    }
}

/// Similarity metric of the vector index.
///
/// Embeddings are L2-normalised, so inner product equals cosine
/// similarity; no other metric is supported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    #[default]
    InnerProduct,
}

/// CLI-provided overrides, merged over the loaded file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub batch_size: Option<u32>,
    pub rebuild_threshold: Option<u64>,
}

impl SearchConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist; otherwise
    /// `hnsearch.toml` in the current directory is used when present, and
    /// defaults apply when it is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                path.to_path_buf()
            }
            None => {
                let default = PathBuf::from(CONFIG_FILE);
                if !default.exists() {
                    debug!("No {} found; using defaults", CONFIG_FILE);
                    return Ok(Self::default());
                }
                default
            }
        };

        let contents =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::read_file(&path, e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::parse_toml(&path, e))?;
        debug!("Loaded configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI overrides over this configuration.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(data_dir) = overrides.data_dir {
            self.data_dir = Some(data_dir);
        }
        if let Some(model) = overrides.model {
            self.embedding.model = model;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.embedding.batch_size = batch_size;
        }
        if let Some(threshold) = overrides.rebuild_threshold {
            self.ingest.rebuild_threshold = threshold;
        }
        self
    }

    /// The effective working directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.model.is_empty() {
            return Err(ConfigError::Validation(
                "embedding.model must not be empty".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Validation(
                "embedding.batch_size must be positive".to_string(),
            ));
        }
        if self.ingest.checkpoint_every == 0 {
            return Err(ConfigError::Validation(
                "ingest.checkpoint_every must be positive".to_string(),
            ));
        }
        if self.index.m == 0 {
            return Err(ConfigError::Validation(
                "index.m must be positive".to_string(),
            ));
        }
        if self.index.nlist == 0 {
            return Err(ConfigError::Validation(
                "index.nlist must be positive".to_string(),
            ));
        }
        if self.index.nprobe == 0 {
            return Err(ConfigError::Validation(
                "index.nprobe must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.embedding.batch_size, 512);
        assert_eq!(config.ingest.checkpoint_every, 100_000);
        assert_eq!(config.ingest.rebuild_threshold, 1_000_000);
        assert_eq!(config.index.nlist, 4096);
        assert_eq!(config.index.m, 48);
        assert_eq!(config.index.nprobe, 64);
        assert_eq!(config.index.metric, Metric::InnerProduct);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/hn"

[embedding]
batch_size = 128

[ingest]
rebuild_threshold = 500000
"#,
        )
        .unwrap();

        let config = SearchConfig::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/srv/hn"));
        assert_eq!(config.embedding.batch_size, 128);
        assert_eq!(config.ingest.rebuild_threshold, 500_000);
        // Untouched sections keep defaults
        assert_eq!(config.index.m, 48);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let err = SearchConfig::load(Some(Path::new("/nonexistent/hnsearch.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[embedding]\nmodle = \"typo\"\n").unwrap();

        let err = SearchConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn test_overrides_win() {
        let config = SearchConfig::default().with_overrides(ConfigOverrides {
            data_dir: Some(PathBuf::from("/tmp/hn")),
            model: None,
            batch_size: Some(64),
            rebuild_threshold: Some(10),
        });
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/hn"));
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.ingest.rebuild_threshold, 10);
        assert_eq!(
            config.embedding.model,
            "sentence-transformers/all-MiniLM-L6-v2"
        );
    }

    #[test]
    fn test_validation_rejects_zero_m() {
        let mut config = SearchConfig::default();
        config.index.m = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_metric_parses_kebab_case() {
        let config: SearchConfig =
            toml::from_str("[index]\nmetric = \"inner-product\"\n").unwrap();
        assert_eq!(config.index.metric, Metric::InnerProduct);
        assert!(toml::from_str::<SearchConfig>("[index]\nmetric = \"l2\"\n").is_err());
    }
}
