//! Visit segmentation - raw position stream to cleaned station visits
//!
//! Pipeline per entity:
//! 1. Assign each sample to the nearest station if inside its radius,
//!    otherwise leave it unassigned (transit)
//! 2. Collapse consecutive equal assignments into runs
//! 3. Forward-progress filter: a run whose station id is not above the
//!    highest id reached so far is drift, and extends the open visit instead
//!    of starting a new one
//! 4. Drop runs shorter than the minimum dwell (boundary inclusive)
//!
//! Visits come out ordered by entry time and strictly increasing in station id.

use crate::domain::station::StationSet;
use crate::domain::types::{PositionSample, StationId};
use crate::domain::visit::Visit;
use crate::infra::metrics::{Metrics, SegmentStats};
use chrono::{DateTime, TimeDelta, Utc};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Segmentation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Runs shorter than this are noise, not visits
    pub min_dwell: TimeDelta,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { min_dwell: TimeDelta::seconds(30) }
    }
}

/// Maximal stretch of consecutive samples with the same assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    station: Option<StationId>,
    first_t: DateTime<Utc>,
    last_t: DateTime<Utc>,
}

impl Run {
    #[inline]
    fn duration(&self) -> TimeDelta {
        self.last_t - self.first_t
    }
}

/// Visits plus the tallies behind them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    pub visits: Vec<Visit>,
    pub stats: SegmentStats,
}

/// Turns one entity's samples into station visits
pub struct VisitSegmenter {
    config: SegmentConfig,
    metrics: Option<Arc<Metrics>>,
}

impl VisitSegmenter {
    pub fn new(config: SegmentConfig) -> Self {
        Self { config, metrics: None }
    }

    /// Create a segmenter with metrics recording
    pub fn with_metrics(config: SegmentConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics: Some(metrics) }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    pub fn segment(&self, samples: &[PositionSample], stations: &StationSet) -> Vec<Visit> {
        self.segment_with_stats(samples, stations).visits
    }

    /// Segment one entity's samples against a station set
    ///
    /// Samples need not be time ordered. An entity with no qualifying runs
    /// yields an empty visit list.
    pub fn segment_with_stats(&self, samples: &[PositionSample], stations: &StationSet) -> Segmentation {
        let Some(first) = samples.first() else {
            return Segmentation { visits: Vec::new(), stats: SegmentStats::default() };
        };
        let entity_id = first.entity_id.clone();

        let samples = time_ordered(samples);
        let mut stats = SegmentStats::default();

        let assignments: Vec<Option<StationId>> =
            samples.iter().map(|s| stations.assign(&s.point())).collect();
        stats.samples_assigned = assignments.iter().filter(|a| a.is_some()).count() as u64;
        stats.samples_unassigned = assignments.len() as u64 - stats.samples_assigned;

        let runs = collapse_runs(&samples, &assignments);
        let (candidates, drift) = filter_drift(&runs);
        stats.drift_runs_merged = drift;

        let mut visits = Vec::with_capacity(candidates.len());
        for run in candidates {
            let Some(station_id) = run.station else {
                continue;
            };
            if run.duration() < self.config.min_dwell {
                stats.short_runs_discarded += 1;
                continue;
            }
            visits.push(Visit {
                entity_id: entity_id.clone(),
                station_id,
                enter_t: run.first_t,
                exit_t: run.last_t,
            });
        }
        stats.visits_emitted = visits.len() as u64;

        if visits.is_empty() {
            debug!(entity = %entity_id, samples = samples.len(), "entity_has_no_visits");
        }
        debug!(
            entity = %entity_id,
            samples = samples.len(),
            runs = runs.len(),
            drift_merged = stats.drift_runs_merged,
            short_discarded = stats.short_runs_discarded,
            visits = visits.len(),
            "entity_segmented"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_segmentation(&stats);
        }

        Segmentation { visits, stats }
    }
}

/// Segment with a one-off segmenter and no metrics
pub fn segment(samples: &[PositionSample], stations: &StationSet, min_dwell: TimeDelta) -> Vec<Visit> {
    VisitSegmenter::new(SegmentConfig { min_dwell }).segment(samples, stations)
}

/// Borrow when already ordered, otherwise a stably sorted copy
fn time_ordered(samples: &[PositionSample]) -> Cow<'_, [PositionSample]> {
    if samples.windows(2).all(|w| w[0].t <= w[1].t) {
        Cow::Borrowed(samples)
    } else {
        let mut sorted = samples.to_vec();
        sorted.sort_by_key(|s| s.t);
        Cow::Owned(sorted)
    }
}

fn collapse_runs(samples: &[PositionSample], assignments: &[Option<StationId>]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for (sample, &station) in samples.iter().zip(assignments) {
        match runs.last_mut() {
            Some(run) if run.station == station => run.last_t = sample.t,
            _ => runs.push(Run { station, first_t: sample.t, last_t: sample.t }),
        }
    }
    runs
}

/// Keep station runs that advance past the highest id reached; fold the rest
/// into the open run
///
/// Transit runs are dropped here: between two visits they are transition
/// time, and a drift run that follows them re-attaches the gap to the open
/// visit by extending its exit. Returns the kept runs and the number of drift
/// runs merged.
fn filter_drift(runs: &[Run]) -> (Vec<Run>, u64) {
    let mut kept: Vec<Run> = Vec::new();
    let mut highest: Option<StationId> = None;
    let mut drift = 0u64;

    for run in runs {
        let Some(station) = run.station else {
            continue;
        };
        match highest {
            Some(h) if station <= h => {
                if let Some(open) = kept.last_mut() {
                    open.last_t = open.last_t.max(run.last_t);
                }
                drift += 1;
            }
            _ => {
                highest = Some(station);
                kept.push(*run);
            }
        }
    }

    (kept, drift)
}
