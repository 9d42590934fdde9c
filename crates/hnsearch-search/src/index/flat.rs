//! Exact inner-product index
//!
//! An exhaustive scan over row-major unit-norm vectors. Used for the
//! incremental tier (bounded by the rebuild threshold) and as the main
//! tier's fallback when the corpus is too small to train IVF+PQ.

use std::io::{Read, Write};

use rayon::prelude::*;

use crate::error::{Result, SearchError};

use super::top_k;

/// Exact exhaustive-scan index over inner products.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Build from a row-major vector array.
    pub fn from_vectors(dim: usize, vectors: Vec<f32>) -> Result<Self> {
        if dim == 0 || vectors.len() % dim != 0 {
            return Err(SearchError::Index(format!(
                "flat index: {} elements do not divide into rows of dim {dim}",
                vectors.len()
            )));
        }
        Ok(Self { dim, vectors })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.vectors.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Exact k-NN by inner product, returning `(position, score)` pairs
    /// sorted by score descending.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if query.len() != self.dim || k == 0 || self.is_empty() {
            return Vec::new();
        }
        let scores: Vec<f32> = self
            .vectors
            .par_chunks(self.dim)
            .map(|row| dot(query, row))
            .collect();
        top_k(scores.into_iter().enumerate().map(|(i, s)| (i as u32, s)), k)
    }

    pub(super) fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(&(self.dim as u32).to_le_bytes())?;
        w.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.vectors {
            w.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    pub(super) fn read_from(r: &mut impl Read) -> std::io::Result<Self> {
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let dim = u32::from_le_bytes(buf4) as usize;
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let count = u64::from_le_bytes(buf8) as usize;

        let mut bytes = vec![0u8; count * dim * 4];
        r.read_exact(&mut bytes)?;
        let vectors = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { dim, vectors })
    }
}

#[inline]
pub(super) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
