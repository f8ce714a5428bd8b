//! Station boundaries and the station set produced by inference

use crate::domain::types::{Point, StationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Circular boundary of one work station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationBoundary {
    pub station_id: StationId,
    pub center: Point,
    /// Percentile distance of member points to the center (meters)
    pub radius: f64,
    /// Number of samples the cluster was fit on
    #[serde(default)]
    pub num_points: usize,
}

impl StationBoundary {
    #[inline]
    pub fn contains(&self, p: &Point) -> bool {
        self.center.distance(p) <= self.radius
    }
}

/// Immutable mapping from station id to boundary
///
/// Fit once per batch, then shared read-only by every entity segmented
/// against it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationSet {
    stations: BTreeMap<StationId, StationBoundary>,
}

impl StationSet {
    pub fn new(boundaries: impl IntoIterator<Item = StationBoundary>) -> Self {
        Self { stations: boundaries.into_iter().map(|b| (b.station_id, b)).collect() }
    }

    pub fn get(&self, id: StationId) -> Option<&StationBoundary> {
        self.stations.get(&id)
    }

    /// Boundaries in ascending station id order
    pub fn iter(&self) -> impl Iterator<Item = &StationBoundary> {
        self.stations.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = StationId> + '_ {
        self.stations.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Station whose center is nearest to `p`, if `p` lies within its radius
    ///
    /// Only the nearest center is considered: a point outside the nearest
    /// station's radius is unassigned even if a farther, wider station covers it.
    pub fn assign(&self, p: &Point) -> Option<StationId> {
        let mut nearest: Option<(&StationBoundary, f64)> = None;
        for boundary in self.stations.values() {
            let d = boundary.center.distance(p);
            if nearest.map_or(true, |(_, best)| d < best) {
                nearest = Some((boundary, d));
            }
        }
        let (boundary, d) = nearest?;
        (d <= boundary.radius).then_some(boundary.station_id)
    }
}

/// Outcome of silhouette-based model-order selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Selected number of stations
    pub k: usize,
    /// Mean silhouette score of the selected k
    pub score: f64,
    /// Score of every candidate, ascending by k
    pub scores: Vec<(usize, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary(id: u32, x: f64, y: f64, radius: f64) -> StationBoundary {
        StationBoundary { station_id: StationId(id), center: Point::new(x, y), radius, num_points: 0 }
    }

    #[test]
    fn test_assign_within_radius() {
        let set = StationSet::new([boundary(1, 0.0, 0.0, 1.0), boundary(2, 10.0, 0.0, 1.0)]);
        assert_eq!(set.assign(&Point::new(0.5, 0.5)), Some(StationId(1)));
        assert_eq!(set.assign(&Point::new(9.2, 0.0)), Some(StationId(2)));
        assert_eq!(set.assign(&Point::new(5.0, 0.0)), None);
    }

    #[test]
    fn test_assign_radius_is_inclusive() {
        let set = StationSet::new([boundary(1, 0.0, 0.0, 2.0)]);
        assert_eq!(set.assign(&Point::new(2.0, 0.0)), Some(StationId(1)));
    }

    #[test]
    fn test_assign_uses_nearest_center_only() {
        // Point is inside station 2's wide radius but nearer to station 1's center
        let set = StationSet::new([boundary(1, 0.0, 0.0, 0.5), boundary(2, 3.0, 0.0, 5.0)]);
        assert_eq!(set.assign(&Point::new(1.0, 0.0)), None);
    }

    #[test]
    fn test_empty_set_assigns_nothing() {
        let set = StationSet::default();
        assert!(set.is_empty());
        assert_eq!(set.assign(&Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn test_serializes_as_id_map() {
        let set = StationSet::new([boundary(1, 0.0, 0.0, 1.0)]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["1"]["radius"], 1.0);
        assert_eq!(json["1"]["center"]["x"], 0.0);
    }
}
