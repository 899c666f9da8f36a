use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::geo::{Coordinate, Geometry};

/// Immutable reference data, seeded out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
    pub centroid: Coordinate,
    /// Size of the city's question bank; indices are `0..question_count`.
    pub question_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Building,
    Area,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Building => "building",
            LocationKind::Area => "area",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub city_id: String,
    pub name: String,
    pub kind: LocationKind,
    pub geometry: Geometry,
    pub owner_id: Option<String>,
    pub contest: Option<Contest>,
    /// Bumped by every committed write; orders live updates per location.
    #[serde(default)]
    pub revision: u64,
}

impl Location {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }
}

/// An attack window opened by a challenger against an owned location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contest {
    pub location_id: String,
    pub attacker_id: String,
    pub attacker_name: String,
    /// Owner at the time the contest began.
    pub defender_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Contest {
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_minutes()
    }

    /// Whole minutes left in the window; zero or negative means expired.
    pub fn remaining_minutes(&self, now: DateTime<Utc>, limit_minutes: i64) -> i64 {
        limit_minutes - self.elapsed_minutes(now)
    }

    pub fn is_active(&self, now: DateTime<Utc>, limit_minutes: i64) -> bool {
        self.remaining_minutes(now, limit_minutes) > 0
    }

    pub fn expires_at(&self, limit_minutes: i64) -> DateTime<Utc> {
        self.started_at + Duration::minutes(limit_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// Live-update diff, keyed by location id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationChange {
    pub kind: ChangeKind,
    pub location: Location,
}

impl LocationChange {
    pub fn added(location: Location) -> Self {
        Self {
            kind: ChangeKind::Added,
            location,
        }
    }

    pub fn modified(location: Location) -> Self {
        Self {
            kind: ChangeKind::Modified,
            location,
        }
    }

    pub fn removed(location: Location) -> Self {
        Self {
            kind: ChangeKind::Removed,
            location,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self.kind {
            ChangeKind::Added => "location-added",
            ChangeKind::Modified => "location-modified",
            ChangeKind::Removed => "location-removed",
        }
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearestCityResponse {
    pub city: City,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContestStatus {
    pub location_id: String,
    pub contest: Option<Contest>,
    pub active: bool,
    pub remaining_minutes: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub kind: Option<LocationKind>,
}

#[derive(Debug, Deserialize)]
pub struct CoordinateQuery {
    pub lat: f64,
    pub lon: f64,
}
