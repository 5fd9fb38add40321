//! K-means with k-means++ seeding and multiple restarts.
//!
//! Objective: minimize the within-cluster sum of squares
//!
//! ```text
//! J = Σ_k Σ_{x ∈ C_k} ||x - μ_k||²
//! ```
//!
//! Each restart draws its own seed from a ChaCha RNG seeded with
//! [`KmeansOptions::seed`], so a fixed seed reproduces the same model on the
//! same rows regardless of how many threads run the restarts.

use super::{ModelError, Result, check_fields};
use crate::fingerprint::{DIM, FIELD_NAMES};
use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_K: usize = 4;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_N_INIT: usize = 10;
pub const DEFAULT_MAX_ITER: usize = 300;
pub const DEFAULT_TOL: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeansOptions {
    pub k: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence threshold, relative to the mean per-dimension variance.
    pub tol: f64,
}

impl Default for KmeansOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            seed: DEFAULT_SEED,
            n_init: DEFAULT_N_INIT,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
        }
    }
}

/// Fitted partition of normalized fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub k: usize,
    pub fields: Vec<String>,
    /// `k` centroids in normalized space.
    pub centroids: Vec<Vec<f64>>,
    /// Cluster of each training row, in training order.
    pub labels: Vec<usize>,
    pub inertia: f64,
    pub n_iter: usize,
    pub seed: u64,
    pub n_init: usize,
    pub fitted_at: DateTime<Utc>,
}

/// Outcome of one restart.
struct Run {
    centroids: Vec<[f64; DIM]>,
    labels: Vec<usize>,
    inertia: f64,
    n_iter: usize,
}

impl ClusterModel {
    /// Fit `options.k` clusters over normalized rows.
    pub fn fit(rows: &[[f64; DIM]], options: &KmeansOptions) -> Result<Self> {
        let k = options.k;
        if k == 0 {
            return Err(ModelError::InvalidK);
        }
        if rows.is_empty() {
            return Err(ModelError::EmptyInput);
        }
        if rows.len() < k {
            return Err(ModelError::InsufficientData { rows: rows.len(), k });
        }

        let tol = options.tol * mean_variance(rows);
        let n_init = options.n_init.max(1);
        let mut master = ChaCha8Rng::seed_from_u64(options.seed);
        let seeds: Vec<u64> = (0..n_init).map(|_| master.random()).collect();

        let runs: Vec<Run> = seeds
            .par_iter()
            .map(|&seed| lloyd(rows, k, options.max_iter, tol, seed))
            .collect();

        // Lowest inertia wins; the earliest run wins ties.
        let mut best: Option<Run> = None;
        for (i, run) in runs.into_iter().enumerate() {
            log::debug!(
                "k-means run {}: inertia {:.6} after {} iterations",
                i,
                run.inertia,
                run.n_iter
            );
            if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }
        let Some(best) = best else {
            return Err(ModelError::EmptyInput);
        };

        log::info!(
            "k-means: k={} over {} rows, inertia {:.4}, {} iterations",
            k,
            rows.len(),
            best.inertia,
            best.n_iter
        );

        Ok(Self {
            k,
            fields: FIELD_NAMES.iter().map(|s| s.to_string()).collect(),
            centroids: best.centroids.iter().map(|c| c.to_vec()).collect(),
            labels: best.labels,
            inertia: best.inertia,
            n_iter: best.n_iter,
            seed: options.seed,
            n_init,
            fitted_at: Utc::now(),
        })
    }

    /// Index of the nearest centroid and its squared distance. Ties go to
    /// the lowest index.
    pub fn nearest(&self, x: &[f64]) -> (usize, f64) {
        nearest(self.centroids.iter().map(|c| c.as_slice()), x)
    }

    /// Number of training rows in each cluster.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.k];
        for &l in &self.labels {
            if l < self.k {
                sizes[l] += 1;
            }
        }
        sizes
    }

    /// Training identifiers grouped by cluster. `names` must be in training
    /// order.
    pub fn members<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<Vec<&'a str>> {
        let mut groups = vec![Vec::new(); self.k];
        for (name, &label) in names.into_iter().zip(&self.labels) {
            if label < self.k {
                groups[label].push(name);
            }
        }
        groups
    }

    /// Check that a loaded model is internally consistent: fingerprint
    /// field order, `k` centroids of the right width, labels below `k`.
    pub fn validate(&self) -> Result<()> {
        check_fields(&self.fields)?;
        if self.k == 0 {
            return Err(ModelError::InvalidK);
        }
        if self.centroids.len() != self.k {
            return Err(ModelError::CentroidCount {
                k: self.k,
                found: self.centroids.len(),
            });
        }
        if let Some(bad) = self.centroids.iter().find(|c| c.len() != DIM) {
            return Err(ModelError::ShapeMismatch {
                expected: DIM,
                found: bad.len(),
            });
        }
        if let Some(&label) = self.labels.iter().find(|&&l| l >= self.k) {
            return Err(ModelError::LabelOutOfRange { label, k: self.k });
        }
        Ok(())
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest<'a>(centroids: impl Iterator<Item = &'a [f64]>, x: &[f64]) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (c, centroid) in centroids.enumerate() {
        let d = squared_distance(x, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// Mean over dimensions of each column's variance.
fn mean_variance(rows: &[[f64; DIM]]) -> f64 {
    let n = rows.len() as f64;
    let mut total = 0.0;
    for d in 0..DIM {
        let mean = rows.iter().map(|r| r[d]).sum::<f64>() / n;
        total += rows.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / n;
    }
    total / DIM as f64
}

/// k-means++: first centroid uniform, each next one drawn with probability
/// proportional to its squared distance from the nearest chosen centroid.
fn kmeans_plus_plus(rows: &[[f64; DIM]], k: usize, rng: &mut ChaCha8Rng) -> Vec<[f64; DIM]> {
    let n = rows.len();
    let mut chosen = vec![false; n];
    let first = rng.random_range(0..n);
    chosen[first] = true;
    let mut centroids = vec![rows[first]];

    let mut closest: Vec<f64> = rows.iter().map(|r| squared_distance(r, &rows[first])).collect();

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut pick = None;
            for (i, &d) in closest.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                pick = Some(i);
                if target < d {
                    break;
                }
                target -= d;
            }
            pick
        } else {
            None
        };
        // All remaining rows coincide with a centroid: pick any unused row.
        let pick = match pick {
            Some(i) => i,
            None => {
                let unused: Vec<usize> = (0..n).filter(|&i| !chosen[i]).collect();
                unused[rng.random_range(0..unused.len())]
            }
        };

        chosen[pick] = true;
        centroids.push(rows[pick]);
        for (d, r) in closest.iter_mut().zip(rows) {
            *d = d.min(squared_distance(r, &rows[pick]));
        }
    }
    centroids
}

/// Nearest-centroid labels, then make sure no cluster is empty by moving the
/// row farthest from its centroid (taken from a cluster with more than one
/// member) into each empty cluster.
fn assign(rows: &[[f64; DIM]], centroids: &mut [[f64; DIM]], labels: &mut [usize]) -> f64 {
    let k = centroids.len();
    let mut dist = vec![0.0f64; rows.len()];
    for (i, r) in rows.iter().enumerate() {
        let (c, d) = nearest(centroids.iter().map(|c| c.as_slice()), r);
        labels[i] = c;
        dist[i] = d;
    }

    let mut counts = vec![0usize; k];
    for &l in labels.iter() {
        counts[l] += 1;
    }
    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = (0..rows.len())
            .filter(|&i| counts[labels[i]] > 1)
            .max_by(|&a, &b| dist[a].total_cmp(&dist[b]).then(b.cmp(&a)));
        if let Some(i) = donor {
            counts[labels[i]] -= 1;
            counts[empty] = 1;
            labels[i] = empty;
            dist[i] = 0.0;
            centroids[empty] = rows[i];
        }
    }

    dist.iter().sum()
}

/// One restart: seeding plus Lloyd iterations.
fn lloyd(rows: &[[f64; DIM]], k: usize, max_iter: usize, tol: f64, seed: u64) -> Run {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut centroids = kmeans_plus_plus(rows, k, &mut rng);
    let mut labels = vec![0usize; rows.len()];
    let mut n_iter = 0;

    for _ in 0..max_iter.max(1) {
        n_iter += 1;
        assign(rows, &mut centroids, &mut labels);

        let mut sums = vec![[0.0f64; DIM]; k];
        let mut counts = vec![0usize; k];
        for (r, &l) in rows.iter().zip(&labels) {
            counts[l] += 1;
            for d in 0..DIM {
                sums[l][d] += r[d];
            }
        }

        let mut shift = 0.0;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let mut updated = sums[c];
            for v in updated.iter_mut() {
                *v /= counts[c] as f64;
            }
            shift += squared_distance(&updated, &centroids[c]);
            centroids[c] = updated;
        }

        if shift <= tol {
            break;
        }
    }

    // Labels must agree with the final centroids.
    let inertia = assign(rows, &mut centroids, &mut labels);
    Run {
        centroids,
        labels,
        inertia,
        n_iter,
    }
}
