//! Interval metrics over a visit sequence
//!
//! - dwell per station: sum of visit durations
//! - transition: gap between consecutive visits to distinct stations
//!   (`transition_time` for any pair)
//! - production time: first entry to last exit, absent for an empty sequence
//!
//! Missing stations and empty sequences are reported as gaps (`None`, empty
//! lists), never as zero and never as errors.

use crate::domain::station::StationSet;
use crate::domain::types::{secs_f64, EntityId, PositionSample, StationId};
use crate::domain::visit::{Transition, Visit};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Total dwell per station that has at least one visit
pub fn dwell_times(visits: &[Visit]) -> BTreeMap<StationId, TimeDelta> {
    let mut dwell: BTreeMap<StationId, TimeDelta> = BTreeMap::new();
    for v in visits {
        *dwell.entry(v.station_id).or_insert_with(TimeDelta::zero) += v.duration();
    }
    dwell
}

/// Total dwell at one station, `None` when the station was never visited
pub fn dwell_time(visits: &[Visit], station: StationId) -> Option<TimeDelta> {
    visits
        .iter()
        .filter(|v| v.station_id == station)
        .map(Visit::duration)
        .reduce(|a, b| a + b)
}

/// Gap between leaving `from` and entering `to`
#[inline]
pub fn transition_time(from: &Visit, to: &Visit) -> TimeDelta {
    to.enter_t - from.exit_t
}

/// Transitions between adjacent visits to distinct stations
pub fn transitions(visits: &[Visit]) -> Vec<Transition> {
    visits
        .windows(2)
        .filter(|w| w[0].station_id != w[1].station_id)
        .map(|w| Transition {
            from: w[0].station_id,
            to: w[1].station_id,
            duration: transition_time(&w[0], &w[1]),
        })
        .collect()
}

/// Last exit minus first entry, `None` for an empty sequence
pub fn production_time(visits: &[Visit]) -> Option<TimeDelta> {
    let first = visits.first()?;
    let last = visits.last()?;
    Some(last.exit_t - first.enter_t)
}

/// Dwell measured per sample rather than per visit
///
/// Each sample inside a station contributes the time since the previous
/// sample; the first sample contributes nothing. No drift or minimum-dwell
/// filtering is applied. Samples must be time ordered.
pub fn sample_dwell_times(samples: &[PositionSample], stations: &StationSet) -> BTreeMap<StationId, TimeDelta> {
    let mut dwell: BTreeMap<StationId, TimeDelta> = BTreeMap::new();
    let mut previous: Option<DateTime<Utc>> = None;
    for s in samples {
        if let Some(station) = stations.assign(&s.point()) {
            let delta = previous.map_or_else(TimeDelta::zero, |p| s.t - p);
            *dwell.entry(station).or_insert_with(TimeDelta::zero) += delta;
        }
        previous = Some(s.t);
    }
    dwell
}

/// Dwell at one station of the set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationDwell {
    pub station_id: StationId,
    /// `None` when the entity never visited the station
    pub dwell_seconds: Option<f64>,
    pub visits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from_station: StationId,
    pub to_station: StationId,
    pub seconds: f64,
}

impl From<Transition> for TransitionRecord {
    fn from(t: Transition) -> Self {
        Self { from_station: t.from, to_station: t.to, seconds: secs_f64(t.duration) }
    }
}

/// Everything the reporting layer needs about one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub entity_id: EntityId,
    pub visits: Vec<Visit>,
    /// One entry per station of the set, ascending id
    pub dwell: Vec<StationDwell>,
    /// Stations of the set without any visit
    pub missing_stations: Vec<StationId>,
    pub transitions: Vec<TransitionRecord>,
    pub production_seconds: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub stations_visited: usize,
    /// Per-sample dwell, see `sample_dwell_times`
    pub sample_dwell_seconds: BTreeMap<StationId, f64>,
}

impl EntityReport {
    /// Build the report from a segmented visit sequence
    ///
    /// `samples` feed only the per-sample dwell and must be time ordered.
    pub fn build(
        entity_id: EntityId,
        visits: Vec<Visit>,
        stations: &StationSet,
        samples: &[PositionSample],
    ) -> Self {
        let dwell_by_station = dwell_times(&visits);

        let mut dwell = Vec::with_capacity(stations.len());
        let mut missing_stations = Vec::new();
        for station_id in stations.ids() {
            let total = dwell_by_station.get(&station_id).copied();
            if total.is_none() {
                missing_stations.push(station_id);
            }
            dwell.push(StationDwell {
                station_id,
                dwell_seconds: total.map(secs_f64),
                visits: visits.iter().filter(|v| v.station_id == station_id).count(),
            });
        }

        if !missing_stations.is_empty() {
            debug!(entity = %entity_id, missing = ?missing_stations, "stations_missing_for_entity");
        }

        let sample_dwell_seconds = sample_dwell_times(samples, stations)
            .into_iter()
            .map(|(id, d)| (id, secs_f64(d)))
            .collect();

        Self {
            transitions: transitions(&visits).into_iter().map(TransitionRecord::from).collect(),
            production_seconds: production_time(&visits).map(secs_f64),
            start_time: visits.first().map(|v| v.enter_t),
            end_time: visits.last().map(|v| v.exit_t),
            stations_visited: dwell_by_station.len(),
            entity_id,
            visits,
            dwell,
            missing_stations,
            sample_dwell_seconds,
        }
    }

    pub fn has_visits(&self) -> bool {
        !self.visits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::station::StationBoundary;
    use crate::domain::types::Point;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn visit(station: u32, enter: i64, exit: i64) -> Visit {
        Visit { entity_id: EntityId::new("w1_g1"), station_id: StationId(station), enter_t: t(enter), exit_t: t(exit) }
    }

    fn stations(n: u32) -> StationSet {
        StationSet::new((1..=n).map(|i| StationBoundary {
            station_id: StationId(i),
            center: Point::new(10.0 * i as f64, 0.0),
            radius: 1.0,
            num_points: 0,
        }))
    }

    #[test]
    fn test_dwell_sums_multiple_visits() {
        let visits = vec![visit(1, 0, 60), visit(2, 90, 150), visit(1, 200, 230)];
        let dwell = dwell_times(&visits);
        assert_eq!(dwell[&StationId(1)], TimeDelta::seconds(90));
        assert_eq!(dwell[&StationId(2)], TimeDelta::seconds(60));
        assert_eq!(dwell_time(&visits, StationId(1)), Some(TimeDelta::seconds(90)));
        assert_eq!(dwell_time(&visits, StationId(3)), None);
    }

    #[test]
    fn test_transitions_between_adjacent_visits() {
        let visits = vec![visit(1, 0, 60), visit(2, 90, 150), visit(3, 155, 300)];
        let result = transitions(&visits);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0], Transition { from: StationId(1), to: StationId(2), duration: TimeDelta::seconds(30) });
        assert_eq!(result[1].duration, TimeDelta::seconds(5));
        assert_eq!(transition_time(&visits[0], &visits[1]), TimeDelta::seconds(30));
    }

    #[test]
    fn test_transitions_skip_same_station_pairs() {
        let visits = vec![visit(1, 0, 60), visit(1, 70, 100), visit(2, 130, 200)];
        let result = transitions(&visits);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].from, StationId(1));
        assert_eq!(result[0].duration, TimeDelta::seconds(30));
    }

    #[test]
    fn test_production_time_spans_sequence() {
        let visits = vec![visit(1, 10, 60), visit(2, 90, 150), visit(4, 400, 420)];
        assert_eq!(production_time(&visits), Some(TimeDelta::seconds(410)));
        assert_eq!(production_time(&visits[..1]), Some(TimeDelta::seconds(50)));
        assert_eq!(production_time(&[]), None);
    }

    #[test]
    fn test_sample_dwell_counts_deltas_into_station() {
        let samples = vec![
            PositionSample::new("w1_g1", 10.0, 0.0, t(0)),
            PositionSample::new("w1_g1", 10.0, 0.0, t(5)),
            PositionSample::new("w1_g1", 15.0, 0.0, t(7)),
            PositionSample::new("w1_g1", 20.0, 0.0, t(10)),
        ];
        let dwell = sample_dwell_times(&samples, &stations(2));
        assert_eq!(dwell[&StationId(1)], TimeDelta::seconds(5));
        assert_eq!(dwell[&StationId(2)], TimeDelta::seconds(3));
    }

    #[test]
    fn test_report_marks_missing_stations() {
        let visits = vec![visit(1, 0, 60), visit(3, 100, 160)];
        let report = EntityReport::build(EntityId::new("w1_g1"), visits, &stations(3), &[]);

        assert_eq!(report.missing_stations, vec![StationId(2)]);
        assert_eq!(report.dwell.len(), 3);
        assert_eq!(report.dwell[0].dwell_seconds, Some(60.0));
        assert_eq!(report.dwell[1].dwell_seconds, None);
        assert_eq!(report.dwell[1].visits, 0);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].seconds, 40.0);
        assert_eq!(report.production_seconds, Some(160.0));
        assert_eq!(report.stations_visited, 2);
    }

    #[test]
    fn test_report_for_empty_sequence() {
        let report = EntityReport::build(EntityId::new("w1_g9"), Vec::new(), &stations(2), &[]);
        assert!(!report.has_visits());
        assert_eq!(report.production_seconds, None);
        assert_eq!(report.start_time, None);
        assert!(report.transitions.is_empty());
        assert_eq!(report.missing_stations.len(), 2);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["production_seconds"].is_null());
    }
}
