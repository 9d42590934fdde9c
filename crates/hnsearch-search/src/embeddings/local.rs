//! Local embedding encoder using Candle and a MiniLM sentence model
//!
//! Runs `all-MiniLM-L6-v2` (384 dimensions) locally: tokenize with
//! batch-longest padding, one BERT forward pass, mean pooling over the
//! attention mask, L2 normalisation. With unit-norm outputs the inner
//! product of two embeddings is their cosine similarity.
//!
//! GPU acceleration via compile-time features:
//! - `--features cuda` for NVIDIA CUDA
//! - `--features metal` for macOS Metal/MPS
//!
//! Device selection never changes the output contract; per-coordinate
//! drift across accelerator classes stays within 1e-4.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use once_cell::sync::OnceCell;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};
use tracing::{debug, info};

use crate::error::{Result, SearchError};

use super::TextEncoder;

/// Output dimension of the sentence model
pub const EMBEDDING_DIM: usize = 384;

/// Default sentence model on the HuggingFace Hub
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Local encoder backed by Candle inference.
///
/// Thread-safe: the model is loaded lazily behind a `OnceCell` on first
/// use, so constructing the encoder is cheap and never touches the
/// network.
pub struct LocalEncoder {
    model_id: String,
    device: Device,
    loaded: OnceCell<LoadedModel>,
}

/// Loaded model state
struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
}

impl LocalEncoder {
    /// Create an encoder for the default model.
    ///
    /// Device is selected automatically: CUDA > Metal > CPU.
    pub fn new() -> Result<Self> {
        Self::with_model(DEFAULT_MODEL_ID)
    }

    /// Create an encoder for a specific Hub model id.
    pub fn with_model(model_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            model_id: model_id.into(),
            device: select_device()?,
            loaded: OnceCell::new(),
        })
    }

    /// The device inference runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Whether the model weights are resident.
    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Load the model eagerly instead of on the first `encode` call.
    pub fn warmup(&self) -> Result<()> {
        self.ensure_loaded().map(|_| ())
    }

    fn ensure_loaded(&self) -> Result<&LoadedModel> {
        self.loaded
            .get_or_try_init(|| load_model(&self.model_id, &self.device))
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let loaded = self.ensure_loaded()?;
        debug!("Encoding {} texts", texts.len());

        let mut tokenizer = loaded.tokenizer.clone();
        let padding = PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        };
        tokenizer.with_padding(Some(padding));

        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| SearchError::Embed(format!("tokenization failed: {e}")))?;

        let token_ids: Vec<Tensor> = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_ids(), &self.device))
            .collect::<candle_core::Result<_>>()?;
        let attention_masks: Vec<Tensor> = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<_>>()?;

        let token_ids = Tensor::stack(&token_ids, 0)?;
        let attention_mask = Tensor::stack(&attention_masks, 0)?;
        let token_type_ids = token_ids.zeros_like()?;

        let hidden = loaded
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = mean_pool(&hidden, &attention_mask)?;
        let normalized = normalize_l2(&pooled)?;

        let rows = normalized.dim(0)?;
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            out.push(normalized.get(i)?.to_vec1::<f32>()?);
        }
        Ok(out)
    }
}

impl TextEncoder for LocalEncoder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_batch(texts)
    }

    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Select the best available device for inference
fn select_device() -> Result<Device> {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("Using CUDA GPU acceleration");
                return Ok(device);
            }
            Err(e) => {
                debug!("CUDA not available: {}", e);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("Using Metal/MPS GPU acceleration");
                return Ok(device);
            }
            Err(e) => {
                debug!("Metal not available: {}", e);
            }
        }
    }

    info!("Using CPU (no GPU acceleration available)");
    Ok(Device::Cpu)
}

/// Download model files from the HuggingFace Hub (cached locally)
fn download_model_files(model_id: &str) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let api =
        Api::new().map_err(|e| SearchError::Embed(format!("failed to create HF API: {e}")))?;
    let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
    let api_repo = api.repo(repo);

    let config = api_repo
        .get("config.json")
        .map_err(|e| SearchError::Embed(format!("failed to download config.json: {e}")))?;
    let tokenizer = api_repo
        .get("tokenizer.json")
        .map_err(|e| SearchError::Embed(format!("failed to download tokenizer.json: {e}")))?;
    let weights = api_repo
        .get("model.safetensors")
        .map_err(|e| SearchError::Embed(format!("failed to download model.safetensors: {e}")))?;

    Ok((config, tokenizer, weights))
}

fn load_model(model_id: &str, device: &Device) -> Result<LoadedModel> {
    info!("Loading sentence model ({})...", model_id);

    let (config_path, tokenizer_path, weights_path) = download_model_files(model_id)?;

    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| SearchError::Embed(format!("failed to read config: {e}")))?;
    let config: BertConfig = serde_json::from_str(&config_str)
        .map_err(|e| SearchError::Embed(format!("failed to parse config: {e}")))?;

    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| SearchError::Embed(format!("failed to load tokenizer: {e}")))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, device)
            .map_err(|e| SearchError::Embed(format!("failed to load weights: {e}")))?
    };

    let model = BertModel::load(vb, &config)
        .map_err(|e| SearchError::Embed(format!("failed to create model: {e}")))?;

    info!("Sentence model loaded (dim={})", EMBEDDING_DIM);

    Ok(LoadedModel { model, tokenizer })
}

/// Mean pooling with attention mask
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?;
    summed
        .broadcast_div(&counts)
        .map_err(|e| SearchError::Embed(format!("mean pooling failed: {e}")))
}

/// L2 normalize embeddings
fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)
        .map_err(|e| SearchError::Embed(format!("L2 normalization failed: {e}")))
}
