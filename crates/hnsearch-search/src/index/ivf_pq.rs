//! Trained IVF+PQ index
//!
//! Inverted-file index with product quantisation over unit-norm vectors,
//! inner-product metric throughout. Vectors are assigned to the coarse
//! centroid with the highest inner product and stored as `m` one-byte
//! codes (non-residual encoding: codes are taken on the raw vector, so a
//! single per-query lookup table scores every probed entry).
//!
//! Memory per vector is `m` bytes plus a u32 position, which is what lets
//! the main tier hold tens of millions of rows.

use std::io::{Read, Write};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, SearchError};

use super::flat::dot;
use super::kmeans::{best_inner_product, kmeans, nearest_centroid, Assignment};
use super::top_k;

/// Centroids per product-quantiser subspace (8-bit codes)
const KSUB: usize = 256;

/// Lloyd iterations for the coarse quantiser
const COARSE_ITERS: usize = 25;

/// Lloyd iterations per subspace codebook
const PQ_ITERS: usize = 20;

/// Training parameters for [`IvfPqIndex`].
#[derive(Debug, Clone, Copy)]
pub struct IvfPqParams {
    /// Number of inverted lists
    pub nlist: usize,
    /// Number of subquantisers; must divide the vector dimension
    pub m: usize,
    /// Lists probed per query
    pub nprobe: usize,
}

/// One inverted list: parallel positions and `m`-byte codes.
#[derive(Debug, Clone, Default, PartialEq)]
struct PostingList {
    positions: Vec<u32>,
    codes: Vec<u8>,
}

/// IVF+PQ index over unit-norm vectors, inner-product metric.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfPqIndex {
    dim: usize,
    nlist: usize,
    m: usize,
    dsub: usize,
    nprobe: usize,
    ntotal: u64,
    /// Coarse centroids, `nlist * dim`
    centroids: Vec<f32>,
    /// Subspace codebooks, `m * KSUB * dsub`
    codebooks: Vec<f32>,
    lists: Vec<PostingList>,
}

impl IvfPqIndex {
    /// Train coarse centroids and subspace codebooks from a sample.
    ///
    /// The sample is row-major `dim`-dimensional; the index starts empty
    /// and vectors are added afterwards with [`IvfPqIndex::add`].
    pub fn train(sample: &[f32], dim: usize, params: &IvfPqParams, seed: u64) -> Result<Self> {
        if params.m == 0 || dim % params.m != 0 {
            return Err(SearchError::Index(format!(
                "subquantiser count {} does not divide dimension {dim}",
                params.m
            )));
        }
        if params.nlist == 0 || sample.is_empty() || sample.len() % dim != 0 {
            return Err(SearchError::Index(
                "IVF+PQ training requires a non-empty sample and nlist > 0".to_string(),
            ));
        }
        let n = sample.len() / dim;
        let dsub = dim / params.m;
        info!(
            "Training IVF{},PQ{} on {} vectors of dimension {}",
            params.nlist, params.m, n, dim
        );

        // Coarse centroids are trained with the same inner-product
        // assignment used to route vectors into lists later
        let centroids = kmeans(
            sample,
            dim,
            params.nlist,
            COARSE_ITERS,
            seed,
            Assignment::InnerProduct,
        );

        // One codebook per subspace, trained on the sample's subvectors;
        // codebooks minimise L2 reconstruction error regardless of the
        // index metric
        let codebooks: Vec<f32> = (0..params.m)
            .into_par_iter()
            .flat_map_iter(|j| {
                let mut sub = Vec::with_capacity(n * dsub);
                for row in sample.chunks(dim) {
                    sub.extend_from_slice(&row[j * dsub..(j + 1) * dsub]);
                }
                kmeans(
                    &sub,
                    dsub,
                    KSUB,
                    PQ_ITERS,
                    seed.wrapping_add(1 + j as u64),
                    Assignment::L2,
                )
            })
            .collect();

        Ok(Self {
            dim,
            nlist: params.nlist,
            m: params.m,
            dsub,
            nprobe: params.nprobe,
            ntotal: 0,
            centroids,
            codebooks,
            lists: vec![PostingList::default(); params.nlist],
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> u64 {
        self.ntotal
    }

    pub fn is_empty(&self) -> bool {
        self.ntotal == 0
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Adjust the number of probed lists (search-time parameter).
    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.clamp(1, self.nlist);
    }

    /// Encode and add row-major vectors; positions continue from the
    /// current total.
    pub fn add(&mut self, vectors: &[f32]) -> Result<()> {
        if vectors.len() % self.dim != 0 {
            return Err(SearchError::Index(format!(
                "add of {} elements does not divide into rows of dim {}",
                vectors.len(),
                self.dim
            )));
        }
        let encoded: Vec<(usize, Vec<u8>)> = vectors
            .par_chunks(self.dim)
            .map(|row| self.encode(row))
            .collect();

        for (list, codes) in encoded {
            let posting = &mut self.lists[list];
            posting.positions.push(self.ntotal as u32);
            posting.codes.extend_from_slice(&codes);
            self.ntotal += 1;
        }
        debug!("IVF+PQ index now has {} vectors", self.ntotal);
        Ok(())
    }

    /// Coarse-assign by inner product, then PQ-encode per subspace.
    fn encode(&self, row: &[f32]) -> (usize, Vec<u8>) {
        let best_list = best_inner_product(row, &self.centroids, self.dim);

        let mut codes = Vec::with_capacity(self.m);
        for j in 0..self.m {
            let sub = &row[j * self.dsub..(j + 1) * self.dsub];
            let codebook = &self.codebooks[j * KSUB * self.dsub..(j + 1) * KSUB * self.dsub];
            codes.push(nearest_centroid(sub, codebook, self.dsub) as u8);
        }
        (best_list, codes)
    }

    /// Approximate k-NN by inner product over the `nprobe` most promising
    /// lists, returning `(position, score)` sorted by score descending.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        if query.len() != self.dim || k == 0 || self.is_empty() {
            return Vec::new();
        }

        // Probe the lists whose centroids best match the query
        let coarse = top_k(
            self.centroids
                .chunks(self.dim)
                .enumerate()
                .map(|(i, c)| (i as u32, dot(query, c))),
            self.nprobe,
        );

        // Per-query ADC lookup table: score contribution of every code
        let mut lut = vec![0.0f32; self.m * KSUB];
        for j in 0..self.m {
            let sub = &query[j * self.dsub..(j + 1) * self.dsub];
            for c in 0..KSUB {
                let centroid =
                    &self.codebooks[(j * KSUB + c) * self.dsub..(j * KSUB + c + 1) * self.dsub];
                lut[j * KSUB + c] = dot(sub, centroid);
            }
        }

        let candidates = coarse.into_iter().flat_map(|(list, _)| {
            let posting = &self.lists[list as usize];
            posting
                .positions
                .iter()
                .zip(posting.codes.chunks(self.m))
                .map(|(&position, codes)| {
                    let score: f32 = codes
                        .iter()
                        .enumerate()
                        .map(|(j, &c)| lut[j * KSUB + c as usize])
                        .sum();
                    (position, score)
                })
        });
        top_k(candidates, k)
    }

    pub(super) fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(&(self.dim as u32).to_le_bytes())?;
        w.write_all(&(self.nlist as u32).to_le_bytes())?;
        w.write_all(&(self.m as u32).to_le_bytes())?;
        w.write_all(&(self.nprobe as u32).to_le_bytes())?;
        w.write_all(&self.ntotal.to_le_bytes())?;
        for value in self.centroids.iter().chain(&self.codebooks) {
            w.write_all(&value.to_le_bytes())?;
        }
        for list in &self.lists {
            w.write_all(&(list.positions.len() as u64).to_le_bytes())?;
            for position in &list.positions {
                w.write_all(&position.to_le_bytes())?;
            }
            w.write_all(&list.codes)?;
        }
        Ok(())
    }

    pub(super) fn read_from(r: &mut impl Read) -> std::io::Result<Self> {
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf4)?;
        let dim = u32::from_le_bytes(buf4) as usize;
        r.read_exact(&mut buf4)?;
        let nlist = u32::from_le_bytes(buf4) as usize;
        r.read_exact(&mut buf4)?;
        let m = u32::from_le_bytes(buf4) as usize;
        r.read_exact(&mut buf4)?;
        let nprobe = u32::from_le_bytes(buf4) as usize;
        r.read_exact(&mut buf8)?;
        let ntotal = u64::from_le_bytes(buf8);
        let dsub = dim / m.max(1);

        let centroids = read_f32s(r, nlist * dim)?;
        let codebooks = read_f32s(r, m * KSUB * dsub)?;

        let mut lists = Vec::with_capacity(nlist);
        for _ in 0..nlist {
            r.read_exact(&mut buf8)?;
            let len = u64::from_le_bytes(buf8) as usize;
            let mut positions = Vec::with_capacity(len);
            for _ in 0..len {
                r.read_exact(&mut buf4)?;
                positions.push(u32::from_le_bytes(buf4));
            }
            let mut codes = vec![0u8; len * m];
            r.read_exact(&mut codes)?;
            lists.push(PostingList { positions, codes });
        }

        Ok(Self {
            dim,
            nlist,
            m,
            dsub,
            nprobe,
            ntotal,
            centroids,
            codebooks,
            lists,
        })
    }
}

fn read_f32s(r: &mut impl Read, count: usize) -> std::io::Result<Vec<f32>> {
    let mut bytes = vec![0u8; count * 4];
    r.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
