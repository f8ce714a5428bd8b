//! Station visits and the intervals derived from them

use crate::domain::types::{EntityId, StationId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A cleaned stay of one entity at one station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub entity_id: EntityId,
    pub station_id: StationId,
    pub enter_t: DateTime<Utc>,
    pub exit_t: DateTime<Utc>,
}

impl Visit {
    #[inline]
    pub fn duration(&self) -> TimeDelta {
        self.exit_t - self.enter_t
    }
}

/// Forward movement between two consecutive visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: StationId,
    pub to: StationId,
    pub duration: TimeDelta,
}
