//! Partitional clustering primitives
//!
//! - `kmeans` - Lloyd's algorithm with k-means++ seeding, restarted several
//!   times; the lowest-inertia restart wins
//! - `silhouette_score` - mean silhouette coefficient of a labelling
//! - `percentile` - linear-interpolation percentile (same convention as numpy)
//!
//! Everything here is a pure function of its inputs. Randomness comes only from
//! the explicit seed: restart `i` draws from `ChaCha8Rng::seed_from_u64(seed + i)`,
//! so running the restarts in parallel does not change the result.

use crate::domain::types::Point;
use crate::error::{EngineError, Result};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

/// Restart and convergence parameters for `kmeans`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    /// Independent restarts from fresh k-means++ seeds (at least 1)
    pub restarts: usize,
    /// Lloyd iterations per restart
    pub max_iterations: usize,
    /// Converged once no centroid moves farther than this (meters)
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self { restarts: 10, max_iterations: 300, tolerance: 1e-4, seed: 42 }
    }
}

/// Result of a k-means fit
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub centroids: Vec<Point>,
    /// Cluster index per input point
    pub labels: Vec<usize>,
    /// Sum of squared distances of points to their centroid
    pub inertia: f64,
}

impl KMeansFit {
    /// Indices of the points assigned to `cluster`
    pub fn members(&self, cluster: usize) -> impl Iterator<Item = usize> + '_ {
        self.labels.iter().enumerate().filter(move |&(_, &l)| l == cluster).map(|(i, _)| i)
    }
}

/// Number of distinct (x, y) positions
pub fn distinct_positions(points: &[Point]) -> usize {
    // +0.0 folds -0.0 into 0.0 so both hash the same
    points
        .iter()
        .map(|p| ((p.x + 0.0).to_bits(), (p.y + 0.0).to_bits()))
        .collect::<FxHashSet<_>>()
        .len()
}

/// Cluster `points` into `k` groups minimizing within-cluster squared distance
pub fn kmeans(points: &[Point], k: usize, params: &KMeansParams) -> Result<KMeansFit> {
    if k == 0 {
        return Err(EngineError::invalid_parameter("k must be at least 1"));
    }
    if params.max_iterations == 0 {
        return Err(EngineError::invalid_parameter("max_iterations must be at least 1"));
    }
    let distinct = distinct_positions(points);
    if distinct < k {
        return Err(EngineError::insufficient_data(k, distinct));
    }

    let restarts = params.restarts.max(1);
    let fits: Vec<KMeansFit> = (0..restarts)
        .into_par_iter()
        .map(|i| lloyd(points, k, params, params.seed.wrapping_add(i as u64)))
        .collect();

    // min_by keeps the first of equal minima, so ties go to the lowest restart index
    fits.into_iter()
        .min_by(|a, b| a.inertia.total_cmp(&b.inertia))
        .ok_or_else(|| EngineError::invalid_parameter("no k-means restarts ran"))
}

/// One Lloyd run from a k-means++ seed
fn lloyd(points: &[Point], k: usize, params: &KMeansParams, seed: u64) -> KMeansFit {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut centroids = seed_plus_plus(points, k, &mut rng);
    let mut labels = vec![0usize; points.len()];
    let tolerance_sq = params.tolerance * params.tolerance;

    for _ in 0..params.max_iterations {
        assign_labels(points, &centroids, &mut labels);
        let updated = update_centroids(points, &labels, &centroids);
        let shift = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| old.distance_sq(new))
            .fold(0.0, f64::max);
        centroids = updated;
        if shift <= tolerance_sq {
            break;
        }
    }

    // Final assignment, then pin each non-empty centroid to the mean of its members
    assign_labels(points, &centroids, &mut labels);
    let centroids = member_means(points, &labels, &centroids);
    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, &l)| p.distance_sq(&centroids[l]))
        .sum();

    KMeansFit { centroids, labels, inertia }
}

/// k-means++ seeding: each next center is drawn with probability proportional
/// to its squared distance from the nearest center chosen so far
fn seed_plus_plus(points: &[Point], k: usize, rng: &mut ChaCha8Rng) -> Vec<Point> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);

    let mut nearest_sq: Vec<f64> = points.iter().map(|p| p.distance_sq(&centers[0])).collect();

    while centers.len() < k {
        let total: f64 = nearest_sq.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            nearest_sq
                .iter()
                .position(|&d| {
                    acc += d;
                    acc > target
                })
                // Rounding can leave target just above the final sum
                .unwrap_or_else(|| {
                    nearest_sq.iter().rposition(|&d| d > 0.0).unwrap_or(points.len() - 1)
                })
        } else {
            rng.gen_range(0..points.len())
        };

        let center = points[chosen];
        for (d, p) in nearest_sq.iter_mut().zip(points) {
            *d = d.min(p.distance_sq(&center));
        }
        centers.push(center);
    }

    centers
}

#[inline]
fn nearest_centroid(centroids: &[Point], p: &Point) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = p.distance_sq(c);
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

fn assign_labels(points: &[Point], centroids: &[Point], labels: &mut [usize]) {
    for (label, p) in labels.iter_mut().zip(points) {
        *label = nearest_centroid(centroids, p);
    }
}

/// Mean of each cluster's members; empty clusters keep their previous centroid
fn member_means(points: &[Point], labels: &[usize], previous: &[Point]) -> Vec<Point> {
    let mut sums = vec![(0.0f64, 0.0f64, 0usize); previous.len()];
    for (p, &l) in points.iter().zip(labels) {
        let s = &mut sums[l];
        s.0 += p.x;
        s.1 += p.y;
        s.2 += 1;
    }
    sums.iter()
        .zip(previous)
        .map(|(&(sx, sy, n), prev)| if n == 0 { *prev } else { Point::new(sx / n as f64, sy / n as f64) })
        .collect()
}

/// Lloyd update step; an emptied cluster is re-seeded at the point farthest
/// from its current centroid
fn update_centroids(points: &[Point], labels: &[usize], previous: &[Point]) -> Vec<Point> {
    let mut counts = vec![0usize; previous.len()];
    for &l in labels {
        counts[l] += 1;
    }
    let mut centroids = member_means(points, labels, previous);

    let mut taken: FxHashSet<usize> = FxHashSet::default();
    for cluster in (0..previous.len()).filter(|&c| counts[c] == 0) {
        let farthest = points
            .iter()
            .enumerate()
            .filter(|(i, _)| !taken.contains(i))
            .map(|(i, p)| (i, p.distance_sq(&centroids[labels[i]])))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((i, _)) = farthest {
            taken.insert(i);
            centroids[cluster] = points[i];
        }
    }

    centroids
}

/// Mean silhouette coefficient over every point
///
/// For each point `s = (b - a) / max(a, b)` where `a` is the mean distance to
/// the other members of its cluster and `b` the mean distance to the members
/// of the nearest other cluster. Points in singleton clusters score 0. With
/// fewer than two non-empty clusters the score is 0.
pub fn silhouette_score(points: &[Point], labels: &[usize], k: usize) -> f64 {
    if points.is_empty() || points.len() != labels.len() {
        return 0.0;
    }

    let mut sizes = vec![0usize; k];
    for &l in labels {
        sizes[l] += 1;
    }
    if sizes.iter().filter(|&&n| n > 0).count() < 2 {
        return 0.0;
    }

    let total: f64 = points
        .par_iter()
        .zip(labels.par_iter())
        .map(|(p, &own)| {
            if sizes[own] <= 1 {
                return 0.0;
            }

            let mut sums = vec![0.0f64; k];
            for (q, &l) in points.iter().zip(labels) {
                sums[l] += p.distance(q);
            }

            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = (0..k)
                .filter(|&c| c != own && sizes[c] > 0)
                .map(|c| sums[c] / sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);

            let denom = a.max(b);
            if !b.is_finite() || denom <= 0.0 {
                0.0
            } else {
                (b - a) / denom
            }
        })
        .sum();

    total / points.len() as f64
}

/// Silhouette over a seeded random subset of at most `sample_size` points
///
/// `sample_size == 0` or a subset at least as large as the input scores every
/// point. The full score is quadratic in the number of points.
pub fn silhouette_sampled(
    points: &[Point],
    labels: &[usize],
    k: usize,
    sample_size: usize,
    seed: u64,
) -> f64 {
    if sample_size == 0 || points.len() <= sample_size {
        return silhouette_score(points, labels, k);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, points.len(), sample_size).into_vec();
    picked.sort_unstable();

    let sub_points: Vec<Point> = picked.iter().map(|&i| points[i]).collect();
    let sub_labels: Vec<usize> = picked.iter().map(|&i| labels[i]).collect();
    silhouette_score(&sub_points, &sub_labels, k)
}

/// Percentile with linear interpolation between closest ranks
///
/// `pct` is in [0, 100]. Returns `None` for an empty input.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
