//! Seeded Lloyd k-means for index training
//!
//! Used twice per rebuild: once for the coarse quantiser centroids and
//! once per product-quantiser subspace. The assignment rule is a
//! parameter because the two uses differ: the coarse quantiser must be
//! trained with the same inner-product assignment used to route vectors
//! into lists at encode and query time, while the subspace codebooks
//! minimise squared-L2 reconstruction error. Assignment is
//! rayon-parallel; the seed fixes both initialisation and empty-cluster
//! reseeding so a rebuild over the same vectors reproduces the same
//! index.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Assignment rule used during Lloyd's iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// Nearest centroid by squared L2 distance (codebook training)
    L2,
    /// Highest inner product (coarse quantiser; matches list probing)
    InnerProduct,
}

impl Assignment {
    fn assign(self, point: &[f32], centroids: &[f32], dim: usize) -> usize {
        match self {
            Self::L2 => nearest_centroid(point, centroids, dim),
            Self::InnerProduct => best_inner_product(point, centroids, dim),
        }
    }
}

/// Run `iterations` of Lloyd's algorithm over `n = data.len() / dim`
/// points, returning `k * dim` centroid coordinates.
///
/// When there are fewer points than clusters the centroids cycle through
/// the points; callers size `k` against the training sample, so that case
/// only arises in tests.
pub fn kmeans(
    data: &[f32],
    dim: usize,
    k: usize,
    iterations: usize,
    seed: u64,
    assignment: Assignment,
) -> Vec<f32> {
    debug_assert!(dim > 0 && data.len() % dim == 0);
    let n = data.len() / dim;
    let mut rng = StdRng::seed_from_u64(seed);

    if n == 0 || k == 0 {
        return vec![0.0; k * dim];
    }
    if n <= k {
        let mut centroids = Vec::with_capacity(k * dim);
        for i in 0..k {
            let p = i % n;
            centroids.extend_from_slice(&data[p * dim..(p + 1) * dim]);
        }
        return centroids;
    }

    // Initialise from k distinct points
    let picks = rand::seq::index::sample(&mut rng, n, k);
    let mut centroids = Vec::with_capacity(k * dim);
    for p in picks {
        centroids.extend_from_slice(&data[p * dim..(p + 1) * dim]);
    }

    for _ in 0..iterations {
        // Assignment step
        let assignments: Vec<usize> = data
            .par_chunks(dim)
            .map(|point| assignment.assign(point, &centroids, dim))
            .collect();

        // Update step
        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0u64; k];
        for (point, &cluster) in data.chunks(dim).zip(&assignments) {
            counts[cluster] += 1;
            let sum = &mut sums[cluster * dim..(cluster + 1) * dim];
            for (s, &x) in sum.iter_mut().zip(point) {
                *s += x as f64;
            }
        }
        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Reseed empty clusters from a random point
                let p = rng.gen_range(0..n);
                centroids[cluster * dim..(cluster + 1) * dim]
                    .copy_from_slice(&data[p * dim..(p + 1) * dim]);
            } else {
                let inv = 1.0 / counts[cluster] as f64;
                for (c, &s) in centroids[cluster * dim..(cluster + 1) * dim]
                    .iter_mut()
                    .zip(&sums[cluster * dim..(cluster + 1) * dim])
                {
                    *c = (s * inv) as f32;
                }
            }
        }
    }
    centroids
}

/// Index of the centroid closest to `point` in squared L2 distance.
pub fn nearest_centroid(point: &[f32], centroids: &[f32], dim: usize) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, centroid) in centroids.chunks(dim).enumerate() {
        let dist: f32 = point
            .iter()
            .zip(centroid)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// Index of the centroid with the highest inner product against `point`.
pub fn best_inner_product(point: &[f32], centroids: &[f32], dim: usize) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.chunks(dim).enumerate() {
        let score: f32 = point.iter().zip(centroid).map(|(a, b)| a * b).sum();
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}
