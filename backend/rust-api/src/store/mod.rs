//! Shared game state. Every ownership-mutating primitive is atomic: it
//! checks its expectations and applies its writes as one unit, or fails
//! leaving prior state unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::models::{
    City, Contest, Location, LocationKind, OwnershipTransfer, Question, UserProfile,
};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait GameStore: Send + Sync {
    /// Backend name reported by the health check.
    fn backend_name(&self) -> &'static str;

    async fn health(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn cities(&self) -> EngineResult<Vec<City>>;

    async fn city(&self, city_id: &str) -> EngineResult<Option<City>>;

    /// Locations of a city, ordered by id.
    async fn locations(
        &self,
        city_id: &str,
        kind: Option<LocationKind>,
    ) -> EngineResult<Vec<Location>>;

    async fn all_locations(&self) -> EngineResult<Vec<Location>>;

    async fn location(&self, location_id: &str) -> EngineResult<Option<Location>>;

    async fn question(&self, city_id: &str, index: usize) -> EngineResult<Option<Question>>;

    async fn user(&self, user_id: &str) -> EngineResult<Option<UserProfile>>;

    async fn users(&self) -> EngineResult<Vec<UserProfile>>;

    /// Case-insensitive lookup by display name.
    async fn user_by_name(&self, name: &str) -> EngineResult<Option<UserProfile>>;

    async fn upsert_city(&self, city: City) -> EngineResult<()>;

    /// Inserts or updates reference fields of a location. Owner and contest
    /// of an existing location are preserved. Returns the stored location and
    /// whether it was newly inserted.
    async fn upsert_location(&self, location: Location) -> EngineResult<(Location, bool)>;

    /// Removes an unowned location.
    async fn remove_location(&self, location_id: &str) -> EngineResult<Option<Location>>;

    async fn upsert_question(&self, question: Question) -> EngineResult<()>;

    async fn remove_question(&self, city_id: &str, index: usize) -> EngineResult<bool>;

    /// Compare-and-set on the owner and the contest slot. Sets
    /// `new_owner_id`, clears the contest and moves the location between the
    /// two users' captured sets.
    ///
    /// Fails with `OwnershipConflict` when the current owner differs from
    /// `expected_owner_id`, with `LocationContested` when the stored contest
    /// differs from `expected_contest`, and with `AlreadyOwner` when the new
    /// owner already holds the location.
    async fn transfer_ownership(
        &self,
        location_id: &str,
        new_owner_id: &str,
        expected_owner_id: Option<&str>,
        expected_contest: Option<&Contest>,
    ) -> EngineResult<OwnershipTransfer>;

    /// Compare-and-set on the contest slot, guarded by the expected owner.
    /// Fails with `OwnershipConflict` on owner mismatch and with
    /// `AlreadyContested` when the stored contest differs from `expected`.
    async fn replace_contest(
        &self,
        location_id: &str,
        expected_owner_id: Option<&str>,
        expected: Option<&Contest>,
        replacement: Option<Contest>,
    ) -> EngineResult<Location>;

    /// Creates a user. An existing user with the same id is returned as is;
    /// a different user holding the name yields `UsernameTaken`.
    async fn insert_user(&self, user: UserProfile) -> EngineResult<UserProfile>;

    /// Renames a user, enforcing case-insensitive uniqueness.
    async fn rename_user(
        &self,
        user_id: &str,
        new_name: &str,
        changed_at: DateTime<Utc>,
    ) -> EngineResult<UserProfile>;

    /// Removes a user, releasing every location they own and clearing every
    /// contest they hold as attacker. Returns the locations that changed.
    async fn delete_user(&self, user_id: &str) -> EngineResult<Vec<Location>>;
}

pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
