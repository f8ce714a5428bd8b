//! Shared types for the station analysis engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for entity (workshop group) identifiers
///
/// Names follow the `w{workshop}_g{group}` scheme, e.g. `w1_g4`. Names that do
/// not follow it are still accepted; their workshop and group are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Build the canonical id for a workshop/group pair
    pub fn from_parts(workshop: u32, group: u32) -> Self {
        Self(format!("w{}_g{}", workshop, group))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Workshop number parsed from the `w{workshop}_g{group}` name
    pub fn workshop(&self) -> Option<u32> {
        self.parts().map(|(w, _)| w)
    }

    /// Group number parsed from the `w{workshop}_g{group}` name
    pub fn group(&self) -> Option<u32> {
        self.parts().map(|(_, g)| g)
    }

    fn parts(&self) -> Option<(u32, u32)> {
        let (w, g) = self.0.split_once('_')?;
        let workshop = w.strip_prefix('w')?.parse().ok()?;
        let group = g.strip_prefix('g')?.parse().ok()?;
        Some((workshop, group))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Newtype wrapper for station ids
///
/// The numeric value carries the ordering chosen by the inferencer's
/// `StationOrdering` policy; the segmenter's forward-progress filter relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct StationId(pub u32);

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A planar position in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        self.distance_sq(other).sqrt()
    }

    #[inline]
    pub fn distance_sq(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// One positional-tracking record as produced by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub entity_id: EntityId,
    pub x: f64,
    pub y: f64,
    pub t: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(entity_id: impl Into<EntityId>, x: f64, y: f64, t: DateTime<Utc>) -> Self {
        Self { entity_id: entity_id.into(), x, y, t }
    }

    #[inline]
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Convert a signed duration to fractional seconds
#[inline]
pub fn secs_f64(duration: chrono::TimeDelta) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_parts() {
        let id = EntityId::new("w2_g7");
        assert_eq!(id.workshop(), Some(2));
        assert_eq!(id.group(), Some(7));
        assert_eq!(EntityId::from_parts(2, 7), id);
    }

    #[test]
    fn test_entity_id_non_conforming() {
        let id = EntityId::new("Group 3");
        assert_eq!(id.workshop(), None);
        assert_eq!(id.group(), None);
        assert_eq!(EntityId::new("wx_g1").workshop(), None);
    }

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(a.distance_sq(&b), 25.0);
    }

    #[test]
    fn test_sample_deserializes_rfc3339() {
        let json = r#"{"entity_id":"w1_g1","x":1.5,"y":-2.0,"t":"2024-03-01T09:00:00Z"}"#;
        let sample: PositionSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.entity_id.as_str(), "w1_g1");
        assert_eq!(sample.point(), Point::new(1.5, -2.0));
    }
}
