//! Workshop analysis - Inferencer → Segmenter → Metrics for a whole batch
//!
//! Two scoping modes:
//! - Shared: one station set fit over every entity of the workshop
//! - Individual: station count chosen over the whole workshop, boundaries
//!   refit per entity
//!
//! Inference failures on the workshop batch abort that workshop. Everything
//! that goes wrong for a single entity is recorded and the rest carry on.

use crate::domain::station::{ModelSelection, StationSet};
use crate::domain::types::{EntityId, PositionSample};
use crate::error::{EngineError, Result};
use crate::infra::metrics::Metrics;
use crate::services::inferencer::{InferenceConfig, StationInferencer};
use crate::services::interval_metrics::EntityReport;
use crate::services::segmenter::{SegmentConfig, VisitSegmenter};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Shared,
    Individual,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Shared => "shared",
            AnalysisMode::Individual => "individual",
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shared" => Ok(AnalysisMode::Shared),
            "individual" => Ok(AnalysisMode::Individual),
            other => Err(EngineError::invalid_parameter(format!("unknown analysis mode {}", other))),
        }
    }
}

/// Everything one analysis run needs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisConfig {
    pub inference: InferenceConfig,
    pub segmentation: SegmentConfig,
    pub mode: AnalysisMode,
    /// Process entities on the rayon pool
    pub parallel: bool,
}

/// Result for one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityAnalysis {
    pub report: EntityReport,
    /// Entity-specific stations (individual mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stations: Option<StationSet>,
}

/// An entity that could not be analyzed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub entity_id: EntityId,
    pub reason: String,
}

/// Result for one workshop batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkshopAnalysis {
    /// UUIDv7, time sortable
    pub run_id: String,
    pub workshop: Option<u32>,
    pub mode: AnalysisMode,
    pub selection: ModelSelection,
    /// Workshop-wide stations (shared mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_stations: Option<StationSet>,
    pub entities: Vec<EntityAnalysis>,
    pub failures: Vec<EntityFailure>,
}

impl WorkshopAnalysis {
    /// Station set used for `entity`
    pub fn stations_for(&self, entity: &EntityId) -> Option<&StationSet> {
        self.shared_stations.as_ref().or_else(|| {
            self.entities
                .iter()
                .find(|e| &e.report.entity_id == entity)
                .and_then(|e| e.stations.as_ref())
        })
    }

    pub fn report(&self, entity: &EntityId) -> Option<&EntityReport> {
        self.entities.iter().map(|e| &e.report).find(|r| &r.entity_id == entity)
    }
}

/// Group samples by entity, each group sorted by time
pub fn group_by_entity(samples: &[PositionSample]) -> BTreeMap<EntityId, Vec<PositionSample>> {
    let mut groups: BTreeMap<EntityId, Vec<PositionSample>> = BTreeMap::new();
    for s in samples {
        groups.entry(s.entity_id.clone()).or_default().push(s.clone());
    }
    for group in groups.values_mut() {
        group.sort_by_key(|s| s.t);
    }
    groups
}

/// Split a mixed batch by the workshop number in each entity id
///
/// Entities whose id does not follow `w{workshop}_g{group}` land under `None`.
pub fn partition_by_workshop(samples: &[PositionSample]) -> BTreeMap<Option<u32>, Vec<PositionSample>> {
    let mut workshops: BTreeMap<Option<u32>, Vec<PositionSample>> = BTreeMap::new();
    for s in samples {
        workshops.entry(s.entity_id.workshop()).or_default().push(s.clone());
    }
    workshops
}

/// Runs the full engine over workshop batches
pub struct WorkshopAnalyzer {
    config: AnalysisConfig,
    inferencer: StationInferencer,
    segmenter: VisitSegmenter,
    metrics: Arc<Metrics>,
}

impl WorkshopAnalyzer {
    pub fn new(config: AnalysisConfig, metrics: Arc<Metrics>) -> Self {
        let inferencer = StationInferencer::with_metrics(config.inference.clone(), metrics.clone());
        let segmenter = VisitSegmenter::with_metrics(config.segmentation, metrics.clone());
        Self { config, inferencer, segmenter, metrics }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze every workshop of a mixed batch independently
    ///
    /// A workshop whose inference fails yields an `Err` entry; the other
    /// workshops are unaffected.
    pub fn analyze_batch(&self, samples: &[PositionSample]) -> BTreeMap<Option<u32>, Result<WorkshopAnalysis>> {
        partition_by_workshop(samples)
            .into_iter()
            .map(|(workshop, batch)| {
                let result = self.analyze_workshop(workshop, &batch);
                if let Err(e) = &result {
                    warn!(workshop = ?workshop, error = %e, "workshop_analysis_failed");
                }
                (workshop, result)
            })
            .collect()
    }

    /// Analyze one workshop's samples
    pub fn analyze_workshop(&self, workshop: Option<u32>, samples: &[PositionSample]) -> Result<WorkshopAnalysis> {
        let groups = group_by_entity(samples);
        let run_id = Uuid::now_v7().to_string();

        let (selection, shared_stations) = match self.config.mode {
            AnalysisMode::Shared => {
                let inference = self.inferencer.infer(samples)?;
                (inference.selection, Some(inference.stations))
            }
            AnalysisMode::Individual => (self.inferencer.select_model_order(samples)?, None),
        };

        let entities: Vec<(&EntityId, &Vec<PositionSample>)> = groups.iter().collect();
        let analyze = |(entity_id, entity_samples): &(&EntityId, &Vec<PositionSample>)| {
            self.analyze_entity(entity_id, entity_samples, selection.k, shared_stations.as_ref())
        };
        let outcomes: Vec<std::result::Result<EntityAnalysis, EntityFailure>> = if self.config.parallel {
            entities.par_iter().map(analyze).collect()
        } else {
            entities.iter().map(analyze).collect()
        };

        let mut analyzed = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(entity) => analyzed.push(entity),
                Err(failure) => failures.push(failure),
            }
        }

        info!(
            run_id = %run_id,
            workshop = ?workshop,
            mode = self.config.mode.as_str(),
            k = selection.k,
            score = %format!("{:.4}", selection.score),
            entities = analyzed.len(),
            failures = failures.len(),
            "analysis_complete"
        );

        Ok(WorkshopAnalysis {
            run_id,
            workshop,
            mode: self.config.mode,
            selection,
            shared_stations,
            entities: analyzed,
            failures,
        })
    }

    fn analyze_entity(
        &self,
        entity_id: &EntityId,
        samples: &[PositionSample],
        k: usize,
        shared: Option<&StationSet>,
    ) -> std::result::Result<EntityAnalysis, EntityFailure> {
        let own = match shared {
            Some(_) => None,
            None => Some(self.inferencer.fit_stations(samples, k).map_err(|e| {
                self.metrics.record_refit_failure();
                warn!(entity = %entity_id, k, error = %e, "entity_refit_failed");
                EntityFailure { entity_id: entity_id.clone(), reason: e.to_string() }
            })?),
        };
        let Some(stations) = shared.or(own.as_ref()) else {
            return Err(EntityFailure { entity_id: entity_id.clone(), reason: "no station set".to_string() });
        };

        let visits = self.segmenter.segment(samples, stations);
        let report = EntityReport::build(entity_id.clone(), visits, stations, samples);
        Ok(EntityAnalysis { report, stations: own })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::StationId;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    /// Entity walking stations at x = 0, 10, 20, 30 in order, 60s each,
    /// out of range for 5s between stations
    fn walk(entity: &str, seed: u64) -> Vec<PositionSample> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut samples = Vec::new();
        let mut clock = 0i64;
        for station in 0..4 {
            let cx = 10.0 * station as f64;
            for _ in 0..60 {
                let x = cx + rng.gen_range(-0.5..0.5);
                let y = rng.gen_range(-0.5..0.5);
                samples.push(PositionSample::new(entity, x, y, t(clock)));
                clock += 1;
            }
            clock += 5;
        }
        samples
    }

    fn config(mode: AnalysisMode, parallel: bool) -> AnalysisConfig {
        AnalysisConfig {
            inference: InferenceConfig { k_candidates: (3..=5).collect(), ..InferenceConfig::default() },
            segmentation: SegmentConfig::default(),
            mode,
            parallel,
        }
    }

    #[test]
    fn test_group_by_entity_sorts_each_group() {
        let samples = vec![
            PositionSample::new("w1_g2", 0.0, 0.0, t(5)),
            PositionSample::new("w1_g1", 0.0, 0.0, t(3)),
            PositionSample::new("w1_g2", 0.0, 0.0, t(1)),
        ];
        let groups = group_by_entity(&samples);
        assert_eq!(groups.len(), 2);
        let g2 = &groups[&EntityId::new("w1_g2")];
        assert_eq!(g2[0].t, t(1));
        assert_eq!(g2[1].t, t(5));
    }

    #[test]
    fn test_partition_by_workshop() {
        let samples = vec![
            PositionSample::new("w1_g1", 0.0, 0.0, t(0)),
            PositionSample::new("w2_g1", 0.0, 0.0, t(0)),
            PositionSample::new("w2_g3", 0.0, 0.0, t(0)),
            PositionSample::new("visitor", 0.0, 0.0, t(0)),
        ];
        let parts = partition_by_workshop(&samples);
        assert_eq!(parts[&Some(1)].len(), 1);
        assert_eq!(parts[&Some(2)].len(), 2);
        assert_eq!(parts[&None].len(), 1);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("shared".parse::<AnalysisMode>().unwrap(), AnalysisMode::Shared);
        assert_eq!("individual".parse::<AnalysisMode>().unwrap(), AnalysisMode::Individual);
        assert!("other".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn test_shared_mode_reuses_one_station_set() {
        let mut samples = walk("w1_g1", 1);
        samples.extend(walk("w1_g2", 2));
        let analyzer = WorkshopAnalyzer::new(config(AnalysisMode::Shared, false), Arc::new(Metrics::new()));

        let analysis = analyzer.analyze_workshop(Some(1), &samples).unwrap();
        assert_eq!(analysis.selection.k, 4);
        assert!(analysis.shared_stations.is_some());
        assert_eq!(analysis.entities.len(), 2);
        assert!(analysis.failures.is_empty());

        let report = analysis.report(&EntityId::new("w1_g1")).unwrap();
        let visited: Vec<StationId> = report.visits.iter().map(|v| v.station_id).collect();
        assert_eq!(visited, vec![StationId(1), StationId(2), StationId(3), StationId(4)]);
        assert!(report.missing_stations.is_empty());
        assert!(report.production_seconds.is_some());
        assert!(analysis.entities.iter().all(|e| e.stations.is_none()));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut samples = walk("w1_g1", 3);
        samples.extend(walk("w1_g2", 4));
        samples.extend(walk("w1_g3", 5));

        let sequential = WorkshopAnalyzer::new(config(AnalysisMode::Shared, false), Arc::new(Metrics::new()))
            .analyze_workshop(Some(1), &samples)
            .unwrap();
        let parallel = WorkshopAnalyzer::new(config(AnalysisMode::Shared, true), Arc::new(Metrics::new()))
            .analyze_workshop(Some(1), &samples)
            .unwrap();

        assert_eq!(sequential.entities, parallel.entities);
        assert_eq!(sequential.shared_stations, parallel.shared_stations);
    }

    #[test]
    fn test_individual_mode_refits_per_entity_and_absorbs_failures() {
        let mut samples = walk("w1_g1", 6);
        samples.extend(walk("w1_g2", 7));
        // Only two distinct positions: cannot be refit with k = 4
        samples.extend((0..40).map(|i| PositionSample::new("w1_g3", (i % 2) as f64, 0.0, t(i))));

        let metrics = Arc::new(Metrics::new());
        let analyzer = WorkshopAnalyzer::new(config(AnalysisMode::Individual, true), metrics.clone());
        let analysis = analyzer.analyze_workshop(Some(1), &samples).unwrap();

        assert!(analysis.shared_stations.is_none());
        assert_eq!(analysis.entities.len(), 2);
        assert_eq!(analysis.failures.len(), 1);
        assert_eq!(analysis.failures[0].entity_id, EntityId::new("w1_g3"));
        assert_eq!(metrics.report().refit_failures, 1);

        for entity in &analysis.entities {
            let stations = entity.stations.as_ref().unwrap();
            assert_eq!(stations.len(), analysis.selection.k);
            assert_eq!(analysis.stations_for(&entity.report.entity_id), Some(stations));
        }
    }

    #[test]
    fn test_batch_isolates_failing_workshop() {
        let mut samples = walk("w1_g1", 8);
        samples.extend((0..10).map(|i| PositionSample::new("w2_g1", 1.0, 1.0, t(i))));

        let analyzer = WorkshopAnalyzer::new(config(AnalysisMode::Shared, false), Arc::new(Metrics::new()));
        let results = analyzer.analyze_batch(&samples);

        assert!(results[&Some(1)].is_ok());
        assert!(matches!(results[&Some(2)], Err(EngineError::InsufficientData { .. })));
    }
}
