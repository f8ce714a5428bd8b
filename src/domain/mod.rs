//! Domain models - core analysis types
//!
//! This module contains the canonical data types used throughout the engine:
//! - `PositionSample` - one timestamped 2D position of an entity
//! - `EntityId` / `StationId` - typed identifiers
//! - `StationBoundary` / `StationSet` - inferred station geometry
//! - `Visit` / `Transition` - segmented station stays and the moves between them

pub mod station;
pub mod types;
pub mod visit;

// Re-export commonly used types at module level
pub use station::{ModelSelection, StationBoundary, StationSet};
pub use types::{EntityId, Point, PositionSample, StationId};
pub use visit::{Transition, Visit};
