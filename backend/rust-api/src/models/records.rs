//! Wire/storage schema for reference data and persisted state.
//!
//! Every record coming from a seed file or the database is decoded into one
//! of these types and then validated into a domain model. Malformed records
//! are rejected with a validation error instead of being skipped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::{Coordinate, Geometry};
use super::location::{City, Contest, Location, LocationKind};
use super::quiz::Question;
use super::user::UserProfile;
use crate::error::{EngineError, EngineResult};

fn required<T>(value: Option<T>, record: &str, field: &str) -> EngineResult<T> {
    value.ok_or_else(|| EngineError::validation(format!("{} record missing `{}`", record, field)))
}

fn required_text(value: Option<String>, record: &str, field: &str) -> EngineResult<String> {
    let text = required(value, record, field)?;
    if text.trim().is_empty() {
        return Err(EngineError::validation(format!(
            "{} record has empty `{}`",
            record, field
        )));
    }
    Ok(text)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CityRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub question_count: Option<usize>,
}

impl TryFrom<CityRecord> for City {
    type Error = EngineError;

    fn try_from(record: CityRecord) -> EngineResult<Self> {
        let centroid = Coordinate::new(
            required(record.lat, "city", "lat")?,
            required(record.lon, "city", "lon")?,
        )?;
        Ok(City {
            id: required_text(record.id, "city", "id")?,
            name: required_text(record.name, "city", "name")?,
            centroid,
            question_count: record.question_count.unwrap_or(0),
        })
    }
}

impl From<&City> for CityRecord {
    fn from(city: &City) -> Self {
        CityRecord {
            id: Some(city.id.clone()),
            name: Some(city.name.clone()),
            lat: Some(city.centroid.lat),
            lon: Some(city.centroid.lon),
            question_count: Some(city.question_count),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometryRecord {
    #[serde(rename = "type")]
    pub shape: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub radius_meters: Option<f64>,
    /// `[lat, lon]` pairs.
    pub vertices: Option<Vec<[f64; 2]>>,
}

impl GeometryRecord {
    pub fn into_geometry(self, default_radius_meters: f64) -> EngineResult<Geometry> {
        match required_text(self.shape, "geometry", "type")?.as_str() {
            "point" | "circle" => {
                let center = Coordinate::new(
                    required(self.lat, "geometry", "lat")?,
                    required(self.lon, "geometry", "lon")?,
                )?;
                Geometry::circle(center, self.radius_meters.unwrap_or(default_radius_meters))
            }
            "polygon" => {
                let vertices = required(self.vertices, "geometry", "vertices")?
                    .into_iter()
                    .map(|[lat, lon]| Coordinate::new(lat, lon))
                    .collect::<EngineResult<Vec<_>>>()?;
                Geometry::polygon(vertices)
            }
            other => Err(EngineError::validation(format!(
                "Unknown geometry type: {}",
                other
            ))),
        }
    }
}

impl From<&Geometry> for GeometryRecord {
    fn from(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Circle {
                center,
                radius_meters,
            } => GeometryRecord {
                shape: Some("circle".to_string()),
                lat: Some(center.lat),
                lon: Some(center.lon),
                radius_meters: Some(*radius_meters),
                vertices: None,
            },
            Geometry::Polygon { vertices } => GeometryRecord {
                shape: Some("polygon".to_string()),
                vertices: Some(vertices.iter().map(|v| [v.lat, v.lon]).collect()),
                ..GeometryRecord::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContestRecord {
    pub attacker_id: Option<String>,
    pub attacker_name: Option<String>,
    pub defender_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    pub city_id: Option<String>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub geometry: Option<GeometryRecord>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub contest: Option<ContestRecord>,
    #[serde(default)]
    pub revision: Option<u64>,
}

impl LocationRecord {
    pub fn into_location(self, default_radius_meters: f64) -> EngineResult<Location> {
        let id = required_text(self.id, "location", "id")?;
        let kind = match required_text(self.kind, "location", "kind")?.as_str() {
            "building" => LocationKind::Building,
            "area" => LocationKind::Area,
            other => {
                return Err(EngineError::validation(format!(
                    "Unknown location kind: {}",
                    other
                )))
            }
        };
        let geometry =
            required(self.geometry, "location", "geometry")?.into_geometry(default_radius_meters)?;

        let contest = match self.contest {
            Some(record) => {
                let contest = Contest {
                    location_id: id.clone(),
                    attacker_id: required_text(record.attacker_id, "contest", "attacker_id")?,
                    attacker_name: required_text(record.attacker_name, "contest", "attacker_name")?,
                    defender_id: record.defender_id,
                    started_at: required(record.started_at, "contest", "started_at")?,
                };
                if self.owner_id.is_none() {
                    return Err(EngineError::validation(format!(
                        "Location {} has a contest but no owner",
                        id
                    )));
                }
                Some(contest)
            }
            None => None,
        };

        Ok(Location {
            city_id: required_text(self.city_id, "location", "city_id")?,
            name: required_text(self.name, "location", "name")?,
            kind,
            geometry,
            owner_id: self.owner_id,
            contest,
            revision: self.revision.unwrap_or(0),
            id,
        })
    }
}

impl From<&Location> for LocationRecord {
    fn from(location: &Location) -> Self {
        LocationRecord {
            id: Some(location.id.clone()),
            city_id: Some(location.city_id.clone()),
            name: Some(location.name.clone()),
            kind: Some(location.kind.as_str().to_string()),
            geometry: Some(GeometryRecord::from(&location.geometry)),
            owner_id: location.owner_id.clone(),
            contest: location.contest.as_ref().map(ContestRecord::from),
            revision: Some(location.revision),
        }
    }
}

impl From<&Contest> for ContestRecord {
    fn from(contest: &Contest) -> Self {
        ContestRecord {
            attacker_id: Some(contest.attacker_id.clone()),
            attacker_name: Some(contest.attacker_name.clone()),
            defender_id: contest.defender_id.clone(),
            started_at: Some(contest.started_at),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub city_id: Option<String>,
    pub index: Option<usize>,
    pub prompt: Option<String>,
    pub answer: Option<String>,
    pub distractors: Option<Vec<String>>,
}

impl TryFrom<QuestionRecord> for Question {
    type Error = EngineError;

    fn try_from(record: QuestionRecord) -> EngineResult<Self> {
        let answer = required_text(record.answer, "question", "answer")?;
        let distractors = required(record.distractors, "question", "distractors")?;
        if distractors.len() < 2 {
            return Err(EngineError::validation(
                "question record needs at least 2 distractors",
            ));
        }
        if distractors
            .iter()
            .any(|d| d.trim().is_empty() || d.trim() == answer.trim())
        {
            return Err(EngineError::validation(
                "question distractors must be non-empty and differ from the answer",
            ));
        }
        Ok(Question {
            city_id: required_text(record.city_id, "question", "city_id")?,
            index: required(record.index, "question", "index")?,
            prompt: required_text(record.prompt, "question", "prompt")?,
            answer,
            distractors,
        })
    }
}

impl From<&Question> for QuestionRecord {
    fn from(question: &Question) -> Self {
        QuestionRecord {
            id: Some(format!("{}:{}", question.city_id, question.index)),
            city_id: Some(question.city_id.clone()),
            index: Some(question.index),
            prompt: Some(question.prompt.clone()),
            answer: Some(question.answer.clone()),
            distractors: Some(question.distractors.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    pub display_name: Option<String>,
    /// Lowercased display name; carries the uniqueness index.
    pub display_name_key: Option<String>,
    pub captured_count: Option<u32>,
    #[serde(default)]
    pub captured_location_ids: Vec<String>,
    #[serde(default)]
    pub revision: u64,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub username_changed_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRecord> for UserProfile {
    type Error = EngineError;

    fn try_from(record: UserRecord) -> EngineResult<Self> {
        let id = required_text(record.id, "user", "id")?;
        let captured_count = required(record.captured_count, "user", "captured_count")?;
        if captured_count as usize != record.captured_location_ids.len() {
            return Err(EngineError::validation(format!(
                "user {} captured_count {} does not match {} captured ids",
                id,
                captured_count,
                record.captured_location_ids.len()
            )));
        }
        Ok(UserProfile {
            display_name: required_text(record.display_name, "user", "display_name")?,
            captured_count,
            captured_location_ids: record.captured_location_ids,
            revision: record.revision,
            created_at: required(record.created_at, "user", "created_at")?,
            username_changed_at: record.username_changed_at,
            id,
        })
    }
}

impl From<&UserProfile> for UserRecord {
    fn from(user: &UserProfile) -> Self {
        UserRecord {
            id: Some(user.id.clone()),
            display_name: Some(user.display_name.clone()),
            display_name_key: Some(user.display_name.to_lowercase()),
            captured_count: Some(user.captured_count),
            captured_location_ids: user.captured_location_ids.clone(),
            revision: user.revision,
            created_at: Some(user.created_at),
            username_changed_at: user.username_changed_at,
        }
    }
}
