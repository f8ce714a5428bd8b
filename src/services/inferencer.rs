//! Station inference - number and extent of work stations from raw positions
//!
//! Model order is chosen by mean silhouette score over a set of candidate
//! station counts. The winning count is then fit on the target population
//! (the whole batch in shared mode, one entity in individual mode) and every
//! cluster becomes a circular boundary:
//! - center = cluster centroid
//! - radius = configured percentile (default 75th) of member distances, so a
//!   single wild excursion cannot inflate a boundary over its neighbour

use crate::domain::station::{ModelSelection, StationBoundary, StationSet};
use crate::domain::types::{EntityId, Point, PositionSample, StationId};
use crate::error::{EngineError, Result};
use crate::infra::metrics::Metrics;
use crate::services::clustering::{self, KMeansFit, KMeansParams};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How cluster indices are turned into station ids
///
/// The segmenter's forward-progress filter treats a lower id as an earlier
/// station, so this policy defines transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationOrdering {
    /// Raw k-means output order
    Cluster,
    /// Ascending center x (workshops laid out left to right)
    #[default]
    AxisX,
    /// Ascending mean progress through each entity's cycle at which the
    /// cluster's samples were recorded
    FirstVisit,
}

impl StationOrdering {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationOrdering::Cluster => "cluster",
            StationOrdering::AxisX => "axis_x",
            StationOrdering::FirstVisit => "first_visit",
        }
    }
}

/// Inference policy, passed explicitly so batches with different policies can
/// run side by side
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Candidate station counts, each at least 2
    pub k_candidates: BTreeSet<usize>,
    pub kmeans: KMeansParams,
    /// Percentile of member distances used as the station radius, in [0, 100]
    pub radius_percentile: f64,
    /// Points scored per silhouette evaluation (0 = all)
    pub silhouette_sample_size: usize,
    /// Scores below this only produce a warning
    pub min_quality: Option<f64>,
    pub ordering: StationOrdering,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            k_candidates: (3..=9).collect(),
            kmeans: KMeansParams::default(),
            radius_percentile: 75.0,
            silhouette_sample_size: 2000,
            min_quality: None,
            ordering: StationOrdering::AxisX,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k_candidates.is_empty() {
            return Err(EngineError::invalid_parameter("k_candidates is empty"));
        }
        if let Some(&k) = self.k_candidates.iter().find(|&&k| k < 2) {
            return Err(EngineError::invalid_parameter(format!(
                "k candidate {} is below 2",
                k
            )));
        }
        if !(0.0..=100.0).contains(&self.radius_percentile) {
            return Err(EngineError::invalid_parameter(format!(
                "radius_percentile {} outside [0, 100]",
                self.radius_percentile
            )));
        }
        Ok(())
    }

    fn max_k(&self) -> usize {
        self.k_candidates.last().copied().unwrap_or(0)
    }
}

/// Station set together with the model-order evidence behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub stations: StationSet,
    pub selection: ModelSelection,
}

/// Fits station boundaries from position samples
pub struct StationInferencer {
    config: InferenceConfig,
    metrics: Option<Arc<Metrics>>,
}

impl StationInferencer {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config, metrics: None }
    }

    /// Create an inferencer with metrics recording
    pub fn with_metrics(config: InferenceConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics: Some(metrics) }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Select the station count and fit boundaries on the same samples
    pub fn infer(&self, samples: &[PositionSample]) -> Result<Inference> {
        let selection = self.select_model_order(samples)?;
        let stations = self.fit_stations(samples, selection.k)?;
        Ok(Inference { stations, selection })
    }

    /// Score every candidate k and return the best one
    ///
    /// Fails with `InsufficientData` when the samples hold fewer distinct
    /// positions than the largest candidate.
    pub fn select_model_order(&self, samples: &[PositionSample]) -> Result<ModelSelection> {
        self.config.validate()?;
        if samples.is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let points: Vec<Point> = samples.iter().map(PositionSample::point).collect();
        let distinct = clustering::distinct_positions(&points);
        let required = self.config.max_k();
        if distinct < required {
            warn!(required, actual = distinct, samples = samples.len(), "insufficient_positions");
            return Err(EngineError::insufficient_data(required, distinct));
        }

        let mut scores = Vec::with_capacity(self.config.k_candidates.len());
        for &k in &self.config.k_candidates {
            let fit = clustering::kmeans(&points, k, &self.config.kmeans)?;
            let score = clustering::silhouette_sampled(
                &points,
                &fit.labels,
                k,
                self.config.silhouette_sample_size,
                self.config.kmeans.seed,
            );
            debug!(k, score = %format!("{:.4}", score), inertia = %format!("{:.3}", fit.inertia), "silhouette_scored");
            scores.push((k, score));
        }

        let (k, score) = best_candidate(&scores)
            .ok_or_else(|| EngineError::invalid_parameter("k_candidates is empty"))?;

        if let Some(min_quality) = self.config.min_quality {
            if scores.iter().all(|&(_, s)| s < min_quality) {
                warn!(
                    best_k = k,
                    best_score = %format!("{:.4}", score),
                    min_quality,
                    "station_quality_below_threshold"
                );
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_inference();
        }

        info!(k, score = %format!("{:.4}", score), candidates = scores.len(), samples = samples.len(), "model_order_selected");
        Ok(ModelSelection { k, score, scores })
    }

    /// Fit exactly `k` stations on `samples`
    pub fn fit_stations(&self, samples: &[PositionSample], k: usize) -> Result<StationSet> {
        if samples.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        if k == 0 {
            return Err(EngineError::invalid_parameter("k must be at least 1"));
        }

        let points: Vec<Point> = samples.iter().map(PositionSample::point).collect();
        let fit = clustering::kmeans(&points, k, &self.config.kmeans)?;

        let mut clusters: Vec<StationBoundary> = Vec::with_capacity(k);
        for (cluster, center) in fit.centroids.iter().enumerate() {
            let distances: Vec<f64> = fit.members(cluster).map(|i| points[i].distance(center)).collect();
            let radius = clustering::percentile(&distances, self.config.radius_percentile).unwrap_or(0.0);
            clusters.push(StationBoundary {
                station_id: StationId(0),
                center: *center,
                radius,
                num_points: distances.len(),
            });
        }

        let order = self.station_order(samples, &fit, &clusters);
        let boundaries = order.into_iter().enumerate().map(|(rank, cluster)| {
            let mut boundary = clusters[cluster].clone();
            boundary.station_id = StationId(rank as u32 + 1);
            boundary
        });
        let stations = StationSet::new(boundaries);

        for b in stations.iter() {
            debug!(
                station = %b.station_id,
                x = %format!("{:.2}", b.center.x),
                y = %format!("{:.2}", b.center.y),
                radius = %format!("{:.2}", b.radius),
                points = b.num_points,
                "station_fitted"
            );
        }

        Ok(stations)
    }

    /// Cluster indices in station id order
    fn station_order(
        &self,
        samples: &[PositionSample],
        fit: &KMeansFit,
        clusters: &[StationBoundary],
    ) -> Vec<usize> {
        let keys: Vec<(f64, f64)> = match self.config.ordering {
            StationOrdering::Cluster => (0..clusters.len()).map(|c| (c as f64, 0.0)).collect(),
            StationOrdering::AxisX => clusters.iter().map(|b| (b.center.x, b.center.y)).collect(),
            StationOrdering::FirstVisit => {
                let progress = cycle_progress(samples);
                (0..clusters.len())
                    .map(|c| {
                        let (sum, n) = fit
                            .members(c)
                            .fold((0.0, 0usize), |(s, n), i| (s + progress[i], n + 1));
                        let mean = if n == 0 { f64::INFINITY } else { sum / n as f64 };
                        (mean, 0.0)
                    })
                    .collect()
            }
        };

        let mut order: Vec<usize> = (0..clusters.len()).collect();
        order.sort_by(|&a, &b| {
            keys[a].0.total_cmp(&keys[b].0).then(keys[a].1.total_cmp(&keys[b].1)).then(a.cmp(&b))
        });
        order
    }
}

/// Position of each sample within its entity's recording, in [0, 1]
fn cycle_progress(samples: &[PositionSample]) -> Vec<f64> {
    let mut spans: FxHashMap<&EntityId, (DateTime<Utc>, DateTime<Utc>)> = FxHashMap::default();
    for s in samples {
        spans
            .entry(&s.entity_id)
            .and_modify(|(start, end)| {
                *start = (*start).min(s.t);
                *end = (*end).max(s.t);
            })
            .or_insert((s.t, s.t));
    }

    samples
        .iter()
        .map(|s| {
            let Some(&(start, end)) = spans.get(&s.entity_id) else {
                return 0.0;
            };
            let span_ms = (end - start).num_milliseconds();
            if span_ms <= 0 {
                0.0
            } else {
                (s.t - start).num_milliseconds() as f64 / span_ms as f64
            }
        })
        .collect()
}

/// Highest score wins; candidates are ascending so ties keep the smaller k
fn best_candidate(scores: &[(usize, f64)]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for &(k, score) in scores {
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((k, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clustering::tests::blobs;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    /// One sample per second, in the order the points are given
    fn samples_for(entity: &str, points: &[Point]) -> Vec<PositionSample> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| PositionSample::new(entity, p.x, p.y, t0() + chrono::TimeDelta::seconds(i as i64)))
            .collect()
    }

    fn config_with_range(range: std::ops::RangeInclusive<usize>) -> InferenceConfig {
        InferenceConfig { k_candidates: range.collect(), ..InferenceConfig::default() }
    }

    #[test]
    fn test_selects_true_station_count() {
        let points = blobs(&[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (10.0, 10.0)], 30, 0.8, 21);
        let samples = samples_for("w1_g1", &points);
        let inferencer = StationInferencer::new(config_with_range(2..=6));

        let inference = inferencer.infer(&samples).unwrap();
        assert_eq!(inference.selection.k, 4);
        assert_eq!(inference.stations.len(), 4);
        assert_eq!(inference.selection.scores.len(), 5);
        let best = inference.selection.scores.iter().map(|s| s.1).fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(inference.selection.score, best);
    }

    #[test]
    fn test_best_candidate_prefers_smaller_k_on_tie() {
        let scores = [(3, 0.5), (4, 0.7), (5, 0.7), (6, 0.2)];
        assert_eq!(best_candidate(&scores), Some((4, 0.7)));
        assert_eq!(best_candidate(&[]), None);
    }

    #[test]
    fn test_two_unique_positions_is_insufficient() {
        let points: Vec<Point> =
            (0..50).map(|i| if i % 2 == 0 { Point::new(1.0, 1.0) } else { Point::new(4.0, 2.0) }).collect();
        let samples = samples_for("w1_g2", &points);
        let inferencer = StationInferencer::new(InferenceConfig::default());

        let err = inferencer.infer(&samples).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { required: 9, actual: 2 }));
    }

    #[test]
    fn test_empty_samples_rejected() {
        let inferencer = StationInferencer::new(InferenceConfig::default());
        assert!(matches!(inferencer.infer(&[]), Err(EngineError::EmptyInput)));
    }

    #[test]
    fn test_invalid_candidates_rejected() {
        let mut config = config_with_range(1..=3);
        assert!(config.validate().is_err());
        config.k_candidates.clear();
        assert!(config.validate().is_err());
        let config = InferenceConfig { radius_percentile: 120.0, ..InferenceConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_radius_is_percentile_of_member_distances() {
        let points = blobs(&[(0.0, 0.0), (30.0, 0.0)], 25, 2.0, 13);
        let samples = samples_for("w1_g1", &points);
        let inferencer = StationInferencer::new(config_with_range(2..=2));
        let stations = inferencer.fit_stations(&samples, 2).unwrap();

        for b in stations.iter() {
            let distances: Vec<f64> = points
                .iter()
                .filter(|p| p.distance(&b.center) < 10.0)
                .map(|p| p.distance(&b.center))
                .collect();
            assert_eq!(distances.len(), b.num_points);
            let expected = clustering::percentile(&distances, 75.0).unwrap();
            let max = distances.iter().copied().fold(0.0, f64::max);
            assert!((b.radius - expected).abs() < 1e-12);
            assert!(b.radius < max);
        }
    }

    #[test]
    fn test_axis_x_ordering_numbers_left_to_right() {
        let points = blobs(&[(20.0, 0.0), (0.0, 5.0), (10.0, -5.0)], 20, 0.5, 17);
        let samples = samples_for("w1_g1", &points);
        let inferencer = StationInferencer::new(config_with_range(3..=3));
        let stations = inferencer.fit_stations(&samples, 3).unwrap();

        let xs: Vec<f64> = stations.iter().map(|b| b.center.x).collect();
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stations.ids().collect::<Vec<_>>(), vec![StationId(1), StationId(2), StationId(3)]);
    }

    #[test]
    fn test_first_visit_ordering_follows_time() {
        // Entity walks right to left: the rightmost blob is visited first
        let points = blobs(&[(20.0, 0.0), (10.0, 0.0), (0.0, 0.0)], 20, 0.5, 19);
        let samples = samples_for("w1_g1", &points);
        let config = InferenceConfig { ordering: StationOrdering::FirstVisit, ..config_with_range(3..=3) };
        let stations = StationInferencer::new(config).fit_stations(&samples, 3).unwrap();

        let first = stations.get(StationId(1)).unwrap();
        let last = stations.get(StationId(3)).unwrap();
        assert!((first.center.x - 20.0).abs() < 1.0);
        assert!(last.center.x.abs() < 1.0);
    }

    #[test]
    fn test_low_quality_only_warns() {
        let points = blobs(&[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)], 20, 0.5, 23);
        let samples = samples_for("w1_g1", &points);
        let config = InferenceConfig { min_quality: Some(1.1), ..config_with_range(2..=4) };
        let metrics = Arc::new(Metrics::new());
        let inferencer = StationInferencer::with_metrics(config, metrics.clone());

        assert!(inferencer.infer(&samples).is_ok());
        assert_eq!(metrics.report().inference_runs, 1);
    }

    #[test]
    fn test_cycle_progress_is_per_entity() {
        let mut samples = samples_for("w1_g1", &[Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(2.0, 0.0)]);
        samples.push(PositionSample::new("w1_g2", 5.0, 5.0, t0()));
        let progress = cycle_progress(&samples);
        assert_eq!(progress, vec![0.0, 0.5, 1.0, 0.0]);
    }
}
