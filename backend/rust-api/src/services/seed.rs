use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;

use crate::error::{EngineError, EngineResult};
use crate::models::records::{CityRecord, LocationRecord, QuestionRecord};
use crate::models::{City, Location, Question};
use crate::services::location_registry::LocationRegistry;
use crate::store::GameStore;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedFile {
    #[serde(default)]
    cities: Vec<CityRecord>,
    #[serde(default)]
    locations: Vec<LocationRecord>,
    #[serde(default)]
    questions: Vec<QuestionRecord>,
}

/// Validated reference data: cities, their locations and question banks.
#[derive(Debug, Clone, Default)]
pub struct SeedData {
    pub cities: Vec<City>,
    pub locations: Vec<Location>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub cities: usize,
    pub locations: usize,
    pub questions: usize,
    /// Stored locations the seed no longer lists.
    pub removed_locations: usize,
    /// Stored questions past a city's shrunk bank.
    pub removed_questions: usize,
}

impl SeedData {
    /// Parses and validates a seed document. The first invalid record
    /// rejects the whole seed.
    pub fn from_json(contents: &str, default_radius_meters: f64) -> EngineResult<Self> {
        let file: SeedFile = serde_json::from_str(contents)
            .map_err(|e| EngineError::validation(format!("Invalid seed document: {}", e)))?;

        let mut cities = file
            .cities
            .into_iter()
            .map(City::try_from)
            .collect::<EngineResult<Vec<_>>>()?;
        let locations = file
            .locations
            .into_iter()
            .map(|record| record.into_location(default_radius_meters))
            .collect::<EngineResult<Vec<_>>>()?;
        let questions = file
            .questions
            .into_iter()
            .map(Question::try_from)
            .collect::<EngineResult<Vec<_>>>()?;

        // A bank size left out of the city record is taken from its questions.
        for city in cities.iter_mut().filter(|c| c.question_count == 0) {
            city.question_count = questions
                .iter()
                .filter(|q| q.city_id == city.id)
                .map(|q| q.index + 1)
                .max()
                .unwrap_or(0);
        }

        let seed = SeedData {
            cities,
            locations,
            questions,
        };
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> EngineResult<()> {
        let mut city_ids = HashSet::new();
        for city in &self.cities {
            if !city_ids.insert(city.id.as_str()) {
                return Err(EngineError::validation(format!("Duplicate city {}", city.id)));
            }
        }

        let mut location_ids = HashSet::new();
        for location in &self.locations {
            if !location_ids.insert(location.id.as_str()) {
                return Err(EngineError::validation(format!(
                    "Duplicate location {}",
                    location.id
                )));
            }
            if !city_ids.contains(location.city_id.as_str()) {
                return Err(EngineError::validation(format!(
                    "Location {} references unknown city {}",
                    location.id, location.city_id
                )));
            }
            if location.owner_id.is_some() || location.contest.is_some() {
                return Err(EngineError::validation(format!(
                    "Seeded location {} must not carry ownership or contest state",
                    location.id
                )));
            }
        }

        let mut question_keys = HashSet::new();
        for question in &self.questions {
            let Some(city) = self.cities.iter().find(|c| c.id == question.city_id) else {
                return Err(EngineError::validation(format!(
                    "Question {} references unknown city {}",
                    question.index, question.city_id
                )));
            };
            if question.index >= city.question_count {
                return Err(EngineError::validation(format!(
                    "Question index {} outside bank of {} ({} questions)",
                    question.index, city.id, city.question_count
                )));
            }
            if !question_keys.insert((question.city_id.as_str(), question.index)) {
                return Err(EngineError::validation(format!(
                    "Duplicate question {}:{}",
                    question.city_id, question.index
                )));
            }
        }

        Ok(())
    }
}

/// Writes reference data. Existing locations keep their owner and contest.
///
/// A reseed also prunes what it dropped: unowned locations of a seeded city
/// that are no longer listed, and questions past a city's new bank size.
/// Owned locations are kept until released.
pub async fn apply(
    store: &dyn GameStore,
    registry: &LocationRegistry,
    seed: SeedData,
) -> EngineResult<SeedSummary> {
    let mut summary = SeedSummary {
        cities: seed.cities.len(),
        locations: seed.locations.len(),
        questions: seed.questions.len(),
        removed_locations: 0,
        removed_questions: 0,
    };

    let seeded_ids: HashSet<&str> = seed.locations.iter().map(|l| l.id.as_str()).collect();
    for city in &seed.cities {
        let previous_count = store.city(&city.id).await?.map_or(0, |c| c.question_count);
        store.upsert_city(city.clone()).await?;
        for index in city.question_count..previous_count {
            if store.remove_question(&city.id, index).await? {
                summary.removed_questions += 1;
            }
        }
        summary.removed_locations += prune_locations(store, registry, &city.id, &seeded_ids).await?;
    }
    for location in seed.locations {
        registry.upsert_location(location).await?;
    }
    for question in seed.questions {
        store.upsert_question(question).await?;
    }

    Ok(summary)
}

async fn prune_locations(
    store: &dyn GameStore,
    registry: &LocationRegistry,
    city_id: &str,
    seeded_ids: &HashSet<&str>,
) -> EngineResult<usize> {
    let mut removed = 0;
    for stale in store.locations(city_id, None).await? {
        if seeded_ids.contains(stale.id.as_str()) {
            continue;
        }
        if stale.owner_id.is_some() {
            tracing::warn!(
                location_id = %stale.id,
                "Location dropped from seed is still owned, keeping it"
            );
            continue;
        }
        registry.remove_location(&stale.id).await?;
        removed += 1;
    }
    Ok(removed)
}

/// Loads the configured seed file, if any, into the store.
pub async fn bootstrap(
    seed_path: Option<&str>,
    default_radius_meters: f64,
    store: &dyn GameStore,
    registry: &LocationRegistry,
) -> Result<Option<SeedSummary>> {
    let path = match seed_path {
        Some(path) if !path.is_empty() => Path::new(path),
        _ => {
            tracing::debug!("No seed file configured, skipping seeding");
            return Ok(None);
        }
    };

    if !path.exists() {
        tracing::warn!("Seed file {} not found, skipping seeding", path.display());
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let seed = SeedData::from_json(&contents, default_radius_meters)
        .with_context(|| format!("Rejected seed file {}", path.display()))?;
    let summary = apply(store, registry, seed)
        .await
        .context("Failed to write seed data")?;

    tracing::info!(
        cities = summary.cities,
        locations = summary.locations,
        questions = summary.questions,
        removed_locations = summary.removed_locations,
        removed_questions = summary.removed_questions,
        "Seed data loaded from {}",
        path.display()
    );
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    const SEED: &str = r#"{
        "cities": [{ "id": "uppsala", "name": "Uppsala", "lat": 59.8586, "lon": 17.6389 }],
        "locations": [
            {
                "id": "castle",
                "city_id": "uppsala",
                "name": "Uppsala Castle",
                "kind": "building",
                "geometry": { "type": "point", "lat": 59.8533, "lon": 17.635 }
            }
        ],
        "questions": [
            { "city_id": "uppsala", "index": 0, "prompt": "Q0", "answer": "A0", "distractors": ["x", "y"] },
            { "city_id": "uppsala", "index": 1, "prompt": "Q1", "answer": "A1", "distractors": ["x", "y"] }
        ]
    }"#;

    #[test]
    fn parses_seed_and_derives_bank_size() {
        let seed = SeedData::from_json(SEED, 50.0).unwrap();
        assert_eq!(seed.cities[0].question_count, 2);
        assert_eq!(seed.locations.len(), 1);
    }

    #[test]
    fn unknown_field_rejects_seed() {
        let bad = SEED.replace("\"kind\": \"building\"", "\"kind\": \"building\", \"colour\": \"red\"");
        assert!(matches!(
            SeedData::from_json(&bad, 50.0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn owned_seed_location_is_rejected() {
        let bad = SEED.replace("\"kind\": \"building\"", "\"kind\": \"building\", \"owner_id\": \"u1\"");
        assert!(SeedData::from_json(&bad, 50.0).is_err());
    }

    #[test]
    fn question_for_unknown_city_is_rejected() {
        let bad = SEED.replace("\"city_id\": \"uppsala\", \"index\": 1", "\"city_id\": \"lund\", \"index\": 1");
        assert!(SeedData::from_json(&bad, 50.0).is_err());
    }

    #[tokio::test]
    async fn apply_writes_everything() {
        let store = Arc::new(InMemoryStore::new());
        let registry = LocationRegistry::new(store.clone());
        let seed = SeedData::from_json(SEED, 50.0).unwrap();

        let summary = apply(store.as_ref(), &registry, seed).await.unwrap();
        assert_eq!(summary.questions, 2);
        assert!(store.location("castle").await.unwrap().is_some());
        assert!(store.question("uppsala", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reseed_prunes_dropped_locations_and_questions() {
        let store = Arc::new(InMemoryStore::new());
        let registry = LocationRegistry::new(store.clone());
        let with_park = SEED.replace(
            "\"locations\": [",
            r#""locations": [
            {
                "id": "park",
                "city_id": "uppsala",
                "name": "City Park",
                "kind": "building",
                "geometry": { "type": "point", "lat": 59.86, "lon": 17.64 }
            },"#,
        );
        apply(store.as_ref(), &registry, SeedData::from_json(&with_park, 50.0).unwrap())
            .await
            .unwrap();
        registry.transfer_ownership("castle", "u1", None, None).await.unwrap();

        // Castle is also dropped but stays because it is owned.
        let shrunk = SEED
            .replace(
                r#"{ "city_id": "uppsala", "index": 1, "prompt": "Q1", "answer": "A1", "distractors": ["x", "y"] }"#,
                "",
            )
            .replace(r#"["x", "y"] },"#, r#"["x", "y"] }"#);
        let mut seed = SeedData::from_json(&shrunk, 50.0).unwrap();
        seed.locations.clear();
        let summary = apply(store.as_ref(), &registry, seed).await.unwrap();

        assert_eq!(summary.removed_locations, 1);
        assert_eq!(summary.removed_questions, 1);
        assert!(store.location("park").await.unwrap().is_none());
        let castle = store.location("castle").await.unwrap().unwrap();
        assert_eq!(castle.owner_id.as_deref(), Some("u1"));
        assert!(store.question("uppsala", 0).await.unwrap().is_some());
        assert!(store.question("uppsala", 1).await.unwrap().is_none());
        assert_eq!(store.city("uppsala").await.unwrap().unwrap().question_count, 1);
    }
}
