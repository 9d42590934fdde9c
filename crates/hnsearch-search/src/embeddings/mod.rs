//! Text embedding
//!
//! [`TextEncoder`] is the seam between the pipeline/query engine and the
//! model runtime: a pure batch transform from texts to unit-norm float32
//! vectors. The production implementation is [`LocalEncoder`] (Candle
//! inference, model pulled from the HuggingFace Hub); tests substitute
//! deterministic encoders through the same trait.

mod local;

pub use local::{LocalEncoder, DEFAULT_MODEL_ID, EMBEDDING_DIM};

use crate::error::Result;

/// Batched text-to-vector transform.
///
/// Implementations must be deterministic given the same texts and model,
/// and must return row-major unit-L2-norm vectors of a fixed dimension.
pub trait TextEncoder: Send + Sync {
    /// Embed a batch of texts. `out.len() == texts.len()`, each row of
    /// length [`TextEncoder::dim`].
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimension of every vector this encoder produces.
    fn dim(&self) -> usize;
}
