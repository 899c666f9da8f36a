use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::LOCATION_SUBSCRIPTIONS_ACTIVE;
use crate::models::{
    ChangeKind, Contest, Location, LocationChange, LocationKind, OwnershipTransfer,
};
use crate::store::GameStore;

const CHANNEL_CAPACITY: usize = 1024;

/// Authoritative view of locations, their owners and contests. Every
/// committed mutation is published to live subscribers.
#[derive(Clone)]
pub struct LocationRegistry {
    store: Arc<dyn GameStore>,
    events: broadcast::Sender<LocationChange>,
}

impl LocationRegistry {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { store, events }
    }

    pub async fn list_locations(
        &self,
        city_id: &str,
        kind: Option<LocationKind>,
    ) -> EngineResult<Vec<Location>> {
        if self.store.city(city_id).await?.is_none() {
            return Err(EngineError::CityNotFound(city_id.to_string()));
        }
        self.store.locations(city_id, kind).await
    }

    pub async fn all_locations(&self) -> EngineResult<Vec<Location>> {
        self.store.all_locations().await
    }

    pub async fn location(&self, location_id: &str) -> EngineResult<Location> {
        self.store
            .location(location_id)
            .await?
            .ok_or_else(|| EngineError::LocationNotFound(location_id.to_string()))
    }

    /// Opens a live feed for one city. The current locations arrive first as
    /// `Added`, then committed changes. Events are published after the commit
    /// releases its lock, so two writers may broadcast out of order; the feed
    /// drops any change older than the revision it already delivered.
    pub async fn subscribe(
        &self,
        city_id: &str,
        kind: Option<LocationKind>,
    ) -> EngineResult<LocationSubscription> {
        // Subscribe before reading so nothing committed in between is lost.
        let receiver = self.events.subscribe();
        let initial = self.list_locations(city_id, kind).await?;

        LOCATION_SUBSCRIPTIONS_ACTIVE.inc();
        debug!(city_id, count = initial.len(), "Location subscription opened");

        Ok(LocationSubscription {
            city_id: city_id.to_string(),
            kind,
            pending: initial.into_iter().map(LocationChange::added).collect(),
            delivered: HashMap::new(),
            receiver: Some(receiver),
            store: self.store.clone(),
        })
    }

    pub fn publish(&self, change: LocationChange) {
        // No receivers is not an error.
        let _ = self.events.send(change);
    }

    pub async fn upsert_location(&self, location: Location) -> EngineResult<Location> {
        location.geometry.ensure_valid()?;
        let (stored, inserted) = self.store.upsert_location(location).await?;
        if inserted {
            self.publish(LocationChange::added(stored.clone()));
        } else {
            self.publish(LocationChange::modified(stored.clone()));
        }
        Ok(stored)
    }

    pub async fn remove_location(&self, location_id: &str) -> EngineResult<Location> {
        let removed = self
            .store
            .remove_location(location_id)
            .await?
            .ok_or_else(|| EngineError::LocationNotFound(location_id.to_string()))?;
        self.publish(LocationChange::removed(removed.clone()));
        Ok(removed)
    }

    /// Atomic owner change; see [`GameStore::transfer_ownership`].
    pub async fn transfer_ownership(
        &self,
        location_id: &str,
        new_owner_id: &str,
        expected_owner_id: Option<&str>,
        expected_contest: Option<&Contest>,
    ) -> EngineResult<OwnershipTransfer> {
        let transfer = self
            .store
            .transfer_ownership(location_id, new_owner_id, expected_owner_id, expected_contest)
            .await?;
        self.publish(LocationChange::modified(transfer.location.clone()));
        Ok(transfer)
    }

    pub async fn replace_contest(
        &self,
        location_id: &str,
        expected_owner_id: Option<&str>,
        expected: Option<&Contest>,
        replacement: Option<Contest>,
    ) -> EngineResult<Location> {
        let location = self
            .store
            .replace_contest(location_id, expected_owner_id, expected, replacement)
            .await?;
        self.publish(LocationChange::modified(location.clone()));
        Ok(location)
    }

    /// Cross-checks location owners against users' captured sets in both
    /// directions.
    pub async fn audit_ownership(&self) -> EngineResult<Vec<OwnershipMismatch>> {
        let locations = self.store.all_locations().await?;
        let users = self.store.users().await?;
        let mut mismatches = Vec::new();

        for location in &locations {
            let Some(owner_id) = location.owner_id.as_deref() else {
                continue;
            };
            match users.iter().find(|u| u.id == owner_id) {
                Some(user) if user.owns(&location.id) => {}
                Some(_) => mismatches.push(OwnershipMismatch::MissingFromUser {
                    location_id: location.id.clone(),
                    owner_id: owner_id.to_string(),
                }),
                None => mismatches.push(OwnershipMismatch::UnknownOwner {
                    location_id: location.id.clone(),
                    owner_id: owner_id.to_string(),
                }),
            }
        }

        for user in &users {
            for location_id in &user.captured_location_ids {
                let owned = locations
                    .iter()
                    .any(|l| &l.id == location_id && l.is_owned_by(&user.id));
                if !owned {
                    mismatches.push(OwnershipMismatch::NotOwnedByUser {
                        location_id: location_id.clone(),
                        user_id: user.id.clone(),
                    });
                }
            }
            if user.captured_count as usize != user.captured_location_ids.len() {
                mismatches.push(OwnershipMismatch::CountDrift {
                    user_id: user.id.clone(),
                    captured_count: user.captured_count,
                    actual: user.captured_location_ids.len(),
                });
            }
        }

        if !mismatches.is_empty() {
            warn!(count = mismatches.len(), "Ownership audit found mismatches");
        }
        Ok(mismatches)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OwnershipMismatch {
    UnknownOwner { location_id: String, owner_id: String },
    MissingFromUser { location_id: String, owner_id: String },
    NotOwnedByUser { location_id: String, user_id: String },
    CountDrift { user_id: String, captured_count: u32, actual: usize },
}

/// Last delivered state of one location.
#[derive(Debug, Clone, Copy)]
struct Delivered {
    revision: u64,
    removed: bool,
}

/// Live feed of one city's locations. Closing (or dropping) it stops delivery.
pub struct LocationSubscription {
    city_id: String,
    kind: Option<LocationKind>,
    pending: VecDeque<LocationChange>,
    delivered: HashMap<String, Delivered>,
    receiver: Option<broadcast::Receiver<LocationChange>>,
    store: Arc<dyn GameStore>,
}

impl LocationSubscription {
    /// Next change for this city, or `None` once closed.
    pub async fn next(&mut self) -> Option<LocationChange> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                if self.is_newer(&change) {
                    return Some(change);
                }
                continue;
            }
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(change) if self.wants(&change.location) && self.is_newer(&change) => {
                    return Some(change)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(city_id = %self.city_id, skipped, "Subscriber lagged, resyncing");
                    self.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            self.pending.clear();
            LOCATION_SUBSCRIPTIONS_ACTIVE.dec();
            debug!(city_id = %self.city_id, "Location subscription closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Records `change` as delivered unless an equal or later revision of the
    /// same location already went out. A re-added location starts a new
    /// revision sequence.
    fn is_newer(&mut self, change: &LocationChange) -> bool {
        let location = &change.location;
        let newer = match self.delivered.get(&location.id) {
            None => true,
            Some(last) if last.removed && change.kind == ChangeKind::Added => true,
            Some(last) => location.revision > last.revision,
        };
        if newer {
            self.delivered.insert(
                location.id.clone(),
                Delivered {
                    revision: location.revision,
                    removed: change.kind == ChangeKind::Removed,
                },
            );
        } else {
            debug!(
                location_id = %location.id,
                revision = location.revision,
                "Dropping out-of-order location change"
            );
        }
        newer
    }

    fn wants(&self, location: &Location) -> bool {
        location.city_id == self.city_id && self.kind.is_none_or(|k| location.kind == k)
    }

    /// Missed events are replaced by the current state of every location.
    async fn resync(&mut self) {
        match self.store.locations(&self.city_id, self.kind).await {
            Ok(locations) => self
                .pending
                .extend(locations.into_iter().map(LocationChange::modified)),
            Err(err) => warn!(error = %err, city_id = %self.city_id, "Resync failed"),
        }
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{City, Coordinate, Geometry, UserProfile};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn location(id: &str, city_id: &str, kind: LocationKind) -> Location {
        Location {
            id: id.to_string(),
            city_id: city_id.to_string(),
            name: id.to_string(),
            kind,
            geometry: Geometry::Circle {
                center: Coordinate { lat: 59.85, lon: 17.63 },
                radius_meters: 50.0,
            },
            owner_id: None,
            contest: None,
            revision: 0,
        }
    }

    async fn registry() -> LocationRegistry {
        let store = Arc::new(InMemoryStore::new());
        for id in ["uppsala", "lund"] {
            store
                .upsert_city(City {
                    id: id.to_string(),
                    name: id.to_string(),
                    centroid: Coordinate { lat: 59.85, lon: 17.63 },
                    question_count: 3,
                })
                .await
                .unwrap();
        }
        store
            .upsert_location(location("castle", "uppsala", LocationKind::Building))
            .await
            .unwrap();
        store
            .upsert_location(location("park", "uppsala", LocationKind::Area))
            .await
            .unwrap();
        store
            .insert_user(UserProfile::new("u1", "Ulla", Utc::now()))
            .await
            .unwrap();
        LocationRegistry::new(store)
    }

    #[tokio::test]
    async fn subscription_starts_with_current_state_then_diffs() {
        let registry = registry().await;
        let mut sub = registry.subscribe("uppsala", None).await.unwrap();

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(second.kind, ChangeKind::Added);

        registry
            .transfer_ownership("castle", "u1", None, None)
            .await
            .unwrap();
        let change = sub.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(change.location.owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn subscription_filters_city_and_kind() {
        let registry = registry().await;
        let mut sub = registry
            .subscribe("uppsala", Some(LocationKind::Area))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().location.id, "park");

        registry
            .upsert_location(location("cathedral", "lund", LocationKind::Area))
            .await
            .unwrap();
        registry
            .upsert_location(location("museum", "uppsala", LocationKind::Building))
            .await
            .unwrap();
        registry
            .upsert_location(location("meadow", "uppsala", LocationKind::Area))
            .await
            .unwrap();

        let change = sub.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Added);
        assert_eq!(change.location.id, "meadow");
    }

    #[tokio::test]
    async fn capture_published_before_older_contest_change_wins() {
        let registry = registry().await;
        registry
            .transfer_ownership("castle", "u1", None, None)
            .await
            .unwrap();
        registry
            .store
            .insert_user(UserProfile::new("u2", "Ulf", Utc::now()))
            .await
            .unwrap();
        let mut sub = registry
            .subscribe("uppsala", Some(LocationKind::Building))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().location.id, "castle");

        // A contest opens, then the capture clears it, but their events go
        // out in reverse commit order.
        let contest = Contest {
            location_id: "castle".to_string(),
            attacker_id: "u2".to_string(),
            attacker_name: "Ulf".to_string(),
            defender_id: Some("u1".to_string()),
            started_at: Utc::now(),
        };
        let contested = registry
            .store
            .replace_contest("castle", Some("u1"), None, Some(contest.clone()))
            .await
            .unwrap();
        let captured = registry
            .store
            .transfer_ownership("castle", "u2", Some("u1"), Some(&contest))
            .await
            .unwrap();
        registry.publish(LocationChange::modified(captured.location));
        registry.publish(LocationChange::modified(contested));

        let change = sub.next().await.unwrap();
        assert_eq!(change.location.owner_id.as_deref(), Some("u2"));
        assert!(change.location.contest.is_none());

        let late = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
        assert!(late.is_err(), "stale contest change was delivered");
    }

    #[tokio::test]
    async fn removed_location_can_be_added_again() {
        let registry = registry().await;
        let mut sub = registry
            .subscribe("uppsala", Some(LocationKind::Area))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().location.id, "park");

        registry.remove_location("park").await.unwrap();
        assert_eq!(sub.next().await.unwrap().kind, ChangeKind::Removed);

        registry
            .upsert_location(location("park", "uppsala", LocationKind::Area))
            .await
            .unwrap();
        let change = sub.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Added);
        assert_eq!(change.location.id, "park");
    }

    #[tokio::test]
    async fn closed_subscription_yields_nothing() {
        let registry = registry().await;
        let mut sub = registry.subscribe("uppsala", None).await.unwrap();
        sub.close();
        assert!(sub.is_closed());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_city_cannot_be_listed() {
        let registry = registry().await;
        assert!(matches!(
            registry.list_locations("atlantis", None).await,
            Err(EngineError::CityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn audit_is_clean_after_transfers() {
        let registry = registry().await;
        registry
            .transfer_ownership("castle", "u1", None, None)
            .await
            .unwrap();
        assert!(registry.audit_ownership().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_owned_location_is_refused() {
        let registry = registry().await;
        registry
            .transfer_ownership("castle", "u1", None, None)
            .await
            .unwrap();
        assert!(matches!(
            registry.remove_location("castle").await,
            Err(EngineError::Validation(_))
        ));
        let removed = registry.remove_location("park").await.unwrap();
        assert_eq!(removed.id, "park");
    }
}
