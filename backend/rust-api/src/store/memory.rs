use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{name_key, GameStore};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    City, Contest, CountUpdate, Location, LocationKind, OwnershipTransfer, Question, UserProfile,
};

#[derive(Default)]
struct Tables {
    cities: BTreeMap<String, City>,
    locations: BTreeMap<String, Location>,
    questions: HashMap<(String, usize), Question>,
    users: BTreeMap<String, UserProfile>,
}

impl Tables {
    fn name_holder(&self, name: &str) -> Option<&UserProfile> {
        let key = name_key(name);
        self.users
            .values()
            .find(|user| name_key(&user.display_name) == key)
    }
}

/// Store keeping all tables behind one lock. Each mutation holds the write
/// lock for its whole check-and-apply, which serializes transactions.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn cities(&self) -> EngineResult<Vec<City>> {
        Ok(self.tables.read().await.cities.values().cloned().collect())
    }

    async fn city(&self, city_id: &str) -> EngineResult<Option<City>> {
        Ok(self.tables.read().await.cities.get(city_id).cloned())
    }

    async fn locations(
        &self,
        city_id: &str,
        kind: Option<LocationKind>,
    ) -> EngineResult<Vec<Location>> {
        let tables = self.tables.read().await;
        Ok(tables
            .locations
            .values()
            .filter(|l| l.city_id == city_id && kind.is_none_or(|k| l.kind == k))
            .cloned()
            .collect())
    }

    async fn all_locations(&self) -> EngineResult<Vec<Location>> {
        Ok(self.tables.read().await.locations.values().cloned().collect())
    }

    async fn location(&self, location_id: &str) -> EngineResult<Option<Location>> {
        Ok(self.tables.read().await.locations.get(location_id).cloned())
    }

    async fn question(&self, city_id: &str, index: usize) -> EngineResult<Option<Question>> {
        Ok(self
            .tables
            .read()
            .await
            .questions
            .get(&(city_id.to_string(), index))
            .cloned())
    }

    async fn user(&self, user_id: &str) -> EngineResult<Option<UserProfile>> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn users(&self) -> EngineResult<Vec<UserProfile>> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn user_by_name(&self, name: &str) -> EngineResult<Option<UserProfile>> {
        Ok(self.tables.read().await.name_holder(name).cloned())
    }

    async fn upsert_city(&self, city: City) -> EngineResult<()> {
        self.tables.write().await.cities.insert(city.id.clone(), city);
        Ok(())
    }

    async fn upsert_location(&self, mut location: Location) -> EngineResult<(Location, bool)> {
        let mut tables = self.tables.write().await;
        let inserted = match tables.locations.get(&location.id) {
            Some(existing) => {
                location.owner_id = existing.owner_id.clone();
                location.contest = existing.contest.clone();
                location.revision = existing.revision + 1;
                false
            }
            None => {
                location.revision = location.revision.max(1);
                true
            }
        };
        tables
            .locations
            .insert(location.id.clone(), location.clone());
        Ok((location, inserted))
    }

    async fn remove_location(&self, location_id: &str) -> EngineResult<Option<Location>> {
        let mut tables = self.tables.write().await;
        if let Some(location) = tables.locations.get(location_id) {
            if location.owner_id.is_some() {
                return Err(EngineError::validation(format!(
                    "Location {} is owned and cannot be removed",
                    location_id
                )));
            }
        }
        Ok(tables.locations.remove(location_id).map(|mut removed| {
            removed.revision += 1;
            removed
        }))
    }

    async fn upsert_question(&self, question: Question) -> EngineResult<()> {
        self.tables
            .write()
            .await
            .questions
            .insert((question.city_id.clone(), question.index), question);
        Ok(())
    }

    async fn remove_question(&self, city_id: &str, index: usize) -> EngineResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .questions
            .remove(&(city_id.to_string(), index))
            .is_some())
    }

    async fn transfer_ownership(
        &self,
        location_id: &str,
        new_owner_id: &str,
        expected_owner_id: Option<&str>,
        expected_contest: Option<&Contest>,
    ) -> EngineResult<OwnershipTransfer> {
        let mut tables = self.tables.write().await;

        let location = tables
            .locations
            .get(location_id)
            .ok_or_else(|| EngineError::LocationNotFound(location_id.to_string()))?;
        if location.owner_id.as_deref() != expected_owner_id {
            return Err(EngineError::OwnershipConflict {
                location_id: location_id.to_string(),
            });
        }
        if location.contest.as_ref() != expected_contest {
            return Err(EngineError::LocationContested {
                location_id: location_id.to_string(),
            });
        }
        if location.is_owned_by(new_owner_id) {
            return Err(EngineError::AlreadyOwner {
                location_id: location_id.to_string(),
            });
        }
        if !tables.users.contains_key(new_owner_id) {
            return Err(EngineError::UserNotFound(new_owner_id.to_string()));
        }

        // All checks passed; nothing below can fail.
        let previous_owner_id = location.owner_id.clone();

        let previous_owner_count = previous_owner_id
            .as_deref()
            .and_then(|id| tables.users.get_mut(id))
            .map(|user| {
                user.lose(location_id);
                CountUpdate::of(user)
            });

        let new_owner_count = match tables.users.get_mut(new_owner_id) {
            Some(user) => {
                user.gain(location_id);
                CountUpdate::of(user)
            }
            None => return Err(EngineError::UserNotFound(new_owner_id.to_string())),
        };

        let location = match tables.locations.get_mut(location_id) {
            Some(location) => {
                location.owner_id = Some(new_owner_id.to_string());
                location.contest = None;
                location.revision += 1;
                location.clone()
            }
            None => return Err(EngineError::LocationNotFound(location_id.to_string())),
        };

        Ok(OwnershipTransfer {
            location,
            previous_owner_id,
            new_owner_id: new_owner_id.to_string(),
            new_owner_count,
            previous_owner_count,
        })
    }

    async fn replace_contest(
        &self,
        location_id: &str,
        expected_owner_id: Option<&str>,
        expected: Option<&Contest>,
        replacement: Option<Contest>,
    ) -> EngineResult<Location> {
        let mut tables = self.tables.write().await;
        let location = tables
            .locations
            .get_mut(location_id)
            .ok_or_else(|| EngineError::LocationNotFound(location_id.to_string()))?;

        if location.owner_id.as_deref() != expected_owner_id {
            return Err(EngineError::OwnershipConflict {
                location_id: location_id.to_string(),
            });
        }
        if location.contest.as_ref() != expected {
            return Err(EngineError::AlreadyContested {
                location_id: location_id.to_string(),
            });
        }

        location.contest = replacement;
        location.revision += 1;
        Ok(location.clone())
    }

    async fn insert_user(&self, user: UserProfile) -> EngineResult<UserProfile> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.users.get(&user.id) {
            return Ok(existing.clone());
        }
        if tables.name_holder(&user.display_name).is_some() {
            return Err(EngineError::UsernameTaken);
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn rename_user(
        &self,
        user_id: &str,
        new_name: &str,
        changed_at: DateTime<Utc>,
    ) -> EngineResult<UserProfile> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(user_id) {
            return Err(EngineError::UserNotFound(user_id.to_string()));
        }
        if let Some(holder) = tables.name_holder(new_name) {
            if holder.id != user_id {
                return Err(EngineError::UsernameTaken);
            }
        }
        match tables.users.get_mut(user_id) {
            Some(user) => {
                user.display_name = new_name.to_string();
                user.username_changed_at = Some(changed_at);
                Ok(user.clone())
            }
            None => Err(EngineError::UserNotFound(user_id.to_string())),
        }
    }

    async fn delete_user(&self, user_id: &str) -> EngineResult<Vec<Location>> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(user_id).is_none() {
            return Err(EngineError::UserNotFound(user_id.to_string()));
        }

        let mut changed = Vec::new();
        for location in tables.locations.values_mut() {
            let owned = location.is_owned_by(user_id);
            let attacking = location
                .contest
                .as_ref()
                .is_some_and(|c| c.attacker_id == user_id);
            if owned {
                location.owner_id = None;
            }
            if owned || attacking {
                location.contest = None;
                location.revision += 1;
                changed.push(location.clone());
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinate, Geometry};
    use std::sync::Arc;

    fn castle() -> Location {
        Location {
            id: "castle".to_string(),
            city_id: "uppsala".to_string(),
            name: "Castle".to_string(),
            kind: LocationKind::Building,
            geometry: Geometry::Circle {
                center: Coordinate {
                    lat: 59.8537,
                    lon: 17.6335,
                },
                radius_meters: 50.0,
            },
            owner_id: None,
            contest: None,
            revision: 0,
        }
    }

    async fn store_with_users(ids: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.upsert_location(castle()).await.unwrap();
        for id in ids {
            store
                .insert_user(UserProfile::new(*id, format!("name-{}", id), Utc::now()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn transfer_moves_location_between_users() {
        let store = store_with_users(&["a", "b"]).await;
        store.transfer_ownership("castle", "a", None, None).await.unwrap();
        let transfer = store
            .transfer_ownership("castle", "b", Some("a"), None)
            .await
            .unwrap();

        assert_eq!(transfer.previous_owner_id.as_deref(), Some("a"));
        assert_eq!(transfer.new_owner_count.captured_count, 1);
        assert_eq!(transfer.previous_owner_count.unwrap().captured_count, 0);

        let a = store.user("a").await.unwrap().unwrap();
        let b = store.user("b").await.unwrap().unwrap();
        assert!(a.captured_location_ids.is_empty());
        assert_eq!(b.captured_location_ids, vec!["castle"]);
    }

    #[tokio::test]
    async fn stale_expectation_conflicts_without_side_effects() {
        let store = store_with_users(&["a", "b"]).await;
        store.transfer_ownership("castle", "a", None, None).await.unwrap();

        let err = store
            .transfer_ownership("castle", "b", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OwnershipConflict { .. }));

        // Retrying the successful call is rejected, never double-applied.
        let err = store
            .transfer_ownership("castle", "a", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OwnershipConflict { .. }));
        assert_eq!(store.user("a").await.unwrap().unwrap().captured_count, 1);
        assert_eq!(store.user("b").await.unwrap().unwrap().captured_count, 0);
    }

    #[tokio::test]
    async fn concurrent_transfers_have_exactly_one_winner() {
        let store = Arc::new(store_with_users(&["a", "b", "c", "d"]).await);
        let mut handles = Vec::new();
        for id in ["a", "b", "c", "d"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.transfer_ownership("castle", id, None, None).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(matches!(e, EngineError::OwnershipConflict { .. })),
            }
        }
        assert_eq!(winners, 1);

        let total: u32 = store
            .users()
            .await
            .unwrap()
            .iter()
            .map(|u| u.captured_count)
            .sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn contest_slot_is_compare_and_set() {
        let store = store_with_users(&["a", "b", "c"]).await;
        store.transfer_ownership("castle", "a", None, None).await.unwrap();

        let contest = Contest {
            location_id: "castle".to_string(),
            attacker_id: "b".to_string(),
            attacker_name: "name-b".to_string(),
            defender_id: Some("a".to_string()),
            started_at: Utc::now(),
        };
        store
            .replace_contest("castle", Some("a"), None, Some(contest.clone()))
            .await
            .unwrap();

        let err = store
            .replace_contest("castle", Some("a"), None, Some(contest.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyContested { .. }));

        let err = store
            .replace_contest("castle", Some("c"), Some(&contest), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OwnershipConflict { .. }));
    }

    #[tokio::test]
    async fn transfer_fails_when_contest_changed_since_read() {
        let store = store_with_users(&["a", "b", "c"]).await;
        store.transfer_ownership("castle", "a", None, None).await.unwrap();

        // b read the castle while it was quiet; c opened a contest since.
        let c_contest = Contest {
            location_id: "castle".to_string(),
            attacker_id: "c".to_string(),
            attacker_name: "name-c".to_string(),
            defender_id: Some("a".to_string()),
            started_at: Utc::now(),
        };
        store
            .replace_contest("castle", Some("a"), None, Some(c_contest.clone()))
            .await
            .unwrap();

        let err = store
            .transfer_ownership("castle", "b", Some("a"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LocationContested { .. }));

        let castle = store.location("castle").await.unwrap().unwrap();
        assert_eq!(castle.owner_id.as_deref(), Some("a"));
        assert_eq!(castle.contest, Some(c_contest.clone()));
        assert_eq!(store.user("b").await.unwrap().unwrap().captured_count, 0);

        // c holds the contest it expects and wins.
        let transfer = store
            .transfer_ownership("castle", "c", Some("a"), Some(&c_contest))
            .await
            .unwrap();
        assert_eq!(transfer.location.contest, None);
    }

    #[tokio::test]
    async fn every_write_bumps_the_revision() {
        let store = store_with_users(&["a", "b"]).await;
        let start = store.location("castle").await.unwrap().unwrap().revision;
        assert_eq!(start, 1);

        let transfer = store.transfer_ownership("castle", "a", None, None).await.unwrap();
        assert_eq!(transfer.location.revision, 2);

        let contest = Contest {
            location_id: "castle".to_string(),
            attacker_id: "b".to_string(),
            attacker_name: "name-b".to_string(),
            defender_id: Some("a".to_string()),
            started_at: Utc::now(),
        };
        let contested = store
            .replace_contest("castle", Some("a"), None, Some(contest))
            .await
            .unwrap();
        assert_eq!(contested.revision, 3);

        let (reseeded, inserted) = store.upsert_location(castle()).await.unwrap();
        assert!(!inserted);
        assert_eq!(reseeded.revision, 4);

        let released = store.delete_user("a").await.unwrap();
        assert_eq!(released[0].revision, 5);
        let removed = store.remove_location("castle").await.unwrap().unwrap();
        assert_eq!(removed.revision, 6);
    }

    #[tokio::test]
    async fn usernames_are_unique_case_insensitively() {
        let store = store_with_users(&["a"]).await;
        let err = store
            .insert_user(UserProfile::new("z", "NAME-A", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UsernameTaken));

        store
            .insert_user(UserProfile::new("b", "bea", Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            store.rename_user("b", "Name-A", Utc::now()).await,
            Err(EngineError::UsernameTaken)
        ));
        let renamed = store.rename_user("a", "Name-A", Utc::now()).await.unwrap();
        assert_eq!(renamed.display_name, "Name-A");
    }

    #[tokio::test]
    async fn delete_user_releases_everything_they_hold() {
        let store = store_with_users(&["a", "b"]).await;
        store.transfer_ownership("castle", "a", None, None).await.unwrap();

        let changed = store.delete_user("a").await.unwrap();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].owner_id.is_none());
        assert!(store.user("a").await.unwrap().is_none());
        assert!(store
            .location("castle")
            .await
            .unwrap()
            .unwrap()
            .owner_id
            .is_none());
    }
}
