use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind as MongoErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::{IndexOptions, ReplaceOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};

use super::{name_key, GameStore};
use crate::error::{EngineError, EngineResult};
use crate::metrics::track_db_operation;
use crate::models::records::{CityRecord, ContestRecord, LocationRecord, QuestionRecord, UserRecord};
use crate::models::{
    City, Contest, CountUpdate, Location, LocationKind, OwnershipTransfer, Question, UserProfile,
};
use crate::utils::retry::{retry_transient, RetryPolicy};

const CITIES: &str = "cities";
const LOCATIONS: &str = "locations";
const QUESTIONS: &str = "questions";
const USERS: &str = "users";

/// MongoDB-backed store. Multi-document mutations run inside client-session
/// transactions (requires a replica set); single-document CAS uses filtered
/// updates.
pub struct MongoStore {
    client: Client,
    db: Database,
    default_radius_meters: f64,
}

impl MongoStore {
    pub async fn connect(
        uri: &str,
        database: &str,
        default_radius_meters: f64,
    ) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .context("Failed to connect to MongoDB")?;
        let db = client.database(database);
        let store = Self {
            client,
            db,
            default_radius_meters,
        };
        store.ensure_indexes().await?;
        tracing::info!("MongoDB store ready (database: {})", database);
        Ok(store)
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let unique = IndexOptions::builder().unique(true).build();

        self.users()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "display_name_key": 1 })
                    .options(unique.clone())
                    .build(),
            )
            .await
            .context("Failed to create users.display_name_key index")?;

        self.questions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "city_id": 1, "index": 1 })
                    .options(unique)
                    .build(),
            )
            .await
            .context("Failed to create questions index")?;

        self.locations()
            .create_index(IndexModel::builder().keys(doc! { "city_id": 1 }).build())
            .await
            .context("Failed to create locations.city_id index")?;

        Ok(())
    }

    fn cities(&self) -> Collection<CityRecord> {
        self.db.collection(CITIES)
    }

    fn locations(&self) -> Collection<LocationRecord> {
        self.db.collection(LOCATIONS)
    }

    fn questions(&self) -> Collection<QuestionRecord> {
        self.db.collection(QUESTIONS)
    }

    fn users(&self) -> Collection<UserRecord> {
        self.db.collection(USERS)
    }

    fn decode_location(&self, record: LocationRecord) -> EngineResult<Location> {
        record.into_location(self.default_radius_meters)
    }

    async fn find_locations(&self, filter: Document) -> EngineResult<Vec<Location>> {
        let records: Vec<LocationRecord> = track_db_operation("find", LOCATIONS, async {
            self.locations()
                .find(filter)
                .sort(doc! { "_id": 1 })
                .await?
                .try_collect()
                .await
        })
        .await
        .context("Failed to query locations")?;

        records
            .into_iter()
            .map(|record| self.decode_location(record))
            .collect()
    }

    /// Runs `op` inside a transaction, retrying transient transaction errors.
    async fn in_transaction<T, F>(&self, op: F) -> EngineResult<T>
    where
        F: for<'s> Fn(
                &'s Self,
                &'s mut ClientSession,
            ) -> futures::future::BoxFuture<'s, EngineResult<T>>
            + Send
            + Sync,
        T: Send,
    {
        retry_transient(
            RetryPolicy::default(),
            || async {
                let mut session = self
                    .client
                    .start_session()
                    .await
                    .context("Failed to start MongoDB session")?;
                session
                    .start_transaction()
                    .await
                    .context("Failed to start transaction")?;

                let result = op(self, &mut session).await;
                match result {
                    Ok(value) => {
                        session
                            .commit_transaction()
                            .await
                            .context("Failed to commit transaction")?;
                        Ok(value)
                    }
                    Err(e) => {
                        if let Err(abort_err) = session.abort_transaction().await {
                            tracing::warn!("Failed to abort transaction: {}", abort_err);
                        }
                        Err(e)
                    }
                }
            },
            is_transient,
        )
        .await
    }

    async fn transfer_in_session(
        &self,
        session: &mut ClientSession,
        location_id: &str,
        new_owner_id: &str,
        expected_owner_id: Option<&str>,
        expected_contest: Option<&Contest>,
    ) -> EngineResult<OwnershipTransfer> {
        let record = self
            .locations()
            .find_one(doc! { "_id": location_id })
            .session(&mut *session)
            .await
            .context("Failed to read location")?
            .ok_or_else(|| EngineError::LocationNotFound(location_id.to_string()))?;
        let mut location = self.decode_location(record)?;

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

        let mut new_owner = self
            .read_user(session, new_owner_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(new_owner_id.to_string()))?;

        let previous_owner_id = location.owner_id.clone();
        location.owner_id = Some(new_owner_id.to_string());
        location.contest = None;
        location.revision += 1;

        let filter = doc! {
            "_id": location_id,
            "owner_id": optional_bson(expected_owner_id),
            "contest": contest_bson(expected_contest)?,
        };
        let replaced = self
            .locations()
            .replace_one(filter, LocationRecord::from(&location))
            .session(&mut *session)
            .await
            .context("Failed to write location owner")?;
        if replaced.matched_count != 1 {
            return Err(EngineError::OwnershipConflict {
                location_id: location_id.to_string(),
            });
        }

        new_owner.gain(location_id);
        self.write_user(session, &new_owner).await?;

        let previous_owner_count = match previous_owner_id.as_deref() {
            Some(previous_id) => match self.read_user(session, previous_id).await? {
                Some(mut previous) => {
                    previous.lose(location_id);
                    self.write_user(session, &previous).await?;
                    Some(CountUpdate::of(&previous))
                }
                None => None,
            },
            None => None,
        };

        Ok(OwnershipTransfer {
            location,
            previous_owner_id,
            new_owner_id: new_owner_id.to_string(),
            new_owner_count: CountUpdate::of(&new_owner),
            previous_owner_count,
        })
    }

    async fn delete_user_in_session(
        &self,
        session: &mut ClientSession,
        user_id: &str,
    ) -> EngineResult<Vec<Location>> {
        let deleted = self
            .users()
            .delete_one(doc! { "_id": user_id })
            .session(&mut *session)
            .await
            .context("Failed to delete user")?;
        if deleted.deleted_count == 0 {
            return Err(EngineError::UserNotFound(user_id.to_string()));
        }

        let affected_filter = doc! {
            "$or": [
                { "owner_id": user_id },
                { "contest.attacker_id": user_id },
            ]
        };
        let records: Vec<LocationRecord> = self
            .locations()
            .find(affected_filter)
            .session(&mut *session)
            .await
            .context("Failed to query user locations")?
            .stream(&mut *session)
            .try_collect()
            .await
            .context("Failed to read user locations")?;

        let mut changed = Vec::with_capacity(records.len());
        for record in records {
            let mut location = self.decode_location(record)?;
            if location.is_owned_by(user_id) {
                location.owner_id = None;
            }
            location.contest = None;
            location.revision += 1;

            self.locations()
                .replace_one(doc! { "_id": &location.id }, LocationRecord::from(&location))
                .session(&mut *session)
                .await
                .context("Failed to release location")?;
            changed.push(location);
        }
        Ok(changed)
    }

    async fn read_user(
        &self,
        session: &mut ClientSession,
        user_id: &str,
    ) -> EngineResult<Option<UserProfile>> {
        let record = self
            .users()
            .find_one(doc! { "_id": user_id })
            .session(&mut *session)
            .await
            .context("Failed to read user")?;
        record.map(UserProfile::try_from).transpose()
    }

    async fn write_user(
        &self,
        session: &mut ClientSession,
        user: &UserProfile,
    ) -> EngineResult<()> {
        self.users()
            .replace_one(doc! { "_id": &user.id }, UserRecord::from(user))
            .session(&mut *session)
            .await
            .context("Failed to write user")?;
        Ok(())
    }
}

fn optional_bson(value: Option<&str>) -> Bson {
    match value {
        Some(v) => Bson::String(v.to_string()),
        None => Bson::Null,
    }
}

fn contest_bson(contest: Option<&Contest>) -> EngineResult<Bson> {
    match contest {
        Some(c) => mongodb::bson::to_bson(&ContestRecord::from(c))
            .context("Failed to encode contest")
            .map_err(EngineError::from),
        None => Ok(Bson::Null),
    }
}

fn is_transient(err: &EngineError) -> bool {
    match err {
        EngineError::Storage(e) => e
            .downcast_ref::<mongodb::error::Error>()
            .is_some_and(|e| e.contains_label(TRANSIENT_TRANSACTION_ERROR)),
        _ => false,
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match *err.kind {
        MongoErrorKind::Write(WriteFailure::WriteError(ref we)) => we.code == 11000,
        MongoErrorKind::Command(ref ce) => ce.code == 11000,
        _ => false,
    }
}

#[async_trait]
impl GameStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn health(&self) -> EngineResult<()> {
        self.ping().await.map_err(EngineError::from)
    }

    async fn cities(&self) -> EngineResult<Vec<City>> {
        let records: Vec<CityRecord> = track_db_operation("find", CITIES, async {
            self.cities()
                .find(doc! {})
                .sort(doc! { "_id": 1 })
                .await?
                .try_collect()
                .await
        })
        .await
        .context("Failed to query cities")?;

        records.into_iter().map(City::try_from).collect()
    }

    async fn city(&self, city_id: &str) -> EngineResult<Option<City>> {
        let record = track_db_operation("find_one", CITIES, async {
            self.cities().find_one(doc! { "_id": city_id }).await
        })
        .await
        .context("Failed to query city")?;
        record.map(City::try_from).transpose()
    }

    async fn locations(
        &self,
        city_id: &str,
        kind: Option<LocationKind>,
    ) -> EngineResult<Vec<Location>> {
        let mut filter = doc! { "city_id": city_id };
        if let Some(kind) = kind {
            filter.insert("kind", kind.as_str());
        }
        self.find_locations(filter).await
    }

    async fn all_locations(&self) -> EngineResult<Vec<Location>> {
        self.find_locations(doc! {}).await
    }

    async fn location(&self, location_id: &str) -> EngineResult<Option<Location>> {
        let record = track_db_operation("find_one", LOCATIONS, async {
            self.locations().find_one(doc! { "_id": location_id }).await
        })
        .await
        .context("Failed to query location")?;
        record.map(|r| self.decode_location(r)).transpose()
    }

    async fn question(&self, city_id: &str, index: usize) -> EngineResult<Option<Question>> {
        let record = track_db_operation("find_one", QUESTIONS, async {
            self.questions()
                .find_one(doc! { "city_id": city_id, "index": index as i64 })
                .await
        })
        .await
        .context("Failed to query question")?;
        record.map(Question::try_from).transpose()
    }

    async fn user(&self, user_id: &str) -> EngineResult<Option<UserProfile>> {
        let record = track_db_operation("find_one", USERS, async {
            self.users().find_one(doc! { "_id": user_id }).await
        })
        .await
        .context("Failed to query user")?;
        record.map(UserProfile::try_from).transpose()
    }

    async fn users(&self) -> EngineResult<Vec<UserProfile>> {
        let records: Vec<UserRecord> = track_db_operation("find", USERS, async {
            self.users().find(doc! {}).await?.try_collect().await
        })
        .await
        .context("Failed to query users")?;
        records.into_iter().map(UserProfile::try_from).collect()
    }

    async fn user_by_name(&self, name: &str) -> EngineResult<Option<UserProfile>> {
        let record = track_db_operation("find_one", USERS, async {
            self.users()
                .find_one(doc! { "display_name_key": name_key(name) })
                .await
        })
        .await
        .context("Failed to query user by name")?;
        record.map(UserProfile::try_from).transpose()
    }

    async fn upsert_city(&self, city: City) -> EngineResult<()> {
        self.cities()
            .replace_one(doc! { "_id": &city.id }, CityRecord::from(&city))
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .context("Failed to upsert city")?;
        Ok(())
    }

    async fn upsert_location(&self, mut location: Location) -> EngineResult<(Location, bool)> {
        let existing = self.location(&location.id).await?;
        let inserted = match existing {
            Some(existing) => {
                location.owner_id = existing.owner_id;
                location.contest = existing.contest;
                location.revision = existing.revision + 1;
                false
            }
            None => {
                location.revision = location.revision.max(1);
                true
            }
        };

        self.locations()
            .replace_one(doc! { "_id": &location.id }, LocationRecord::from(&location))
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .context("Failed to upsert location")?;
        Ok((location, inserted))
    }

    async fn remove_location(&self, location_id: &str) -> EngineResult<Option<Location>> {
        let existing = match self.location(location_id).await? {
            Some(location) => location,
            None => return Ok(None),
        };
        if existing.owner_id.is_some() {
            return Err(EngineError::validation(format!(
                "Location {} is owned and cannot be removed",
                location_id
            )));
        }

        let deleted = self
            .locations()
            .delete_one(doc! { "_id": location_id, "owner_id": Bson::Null })
            .await
            .context("Failed to delete location")?;
        if deleted.deleted_count == 0 {
            return Err(EngineError::OwnershipConflict {
                location_id: location_id.to_string(),
            });
        }
        Ok(Some(Location {
            revision: existing.revision + 1,
            ..existing
        }))
    }

    async fn upsert_question(&self, question: Question) -> EngineResult<()> {
        let record = QuestionRecord::from(&question);
        self.questions()
            .replace_one(
                doc! { "city_id": &question.city_id, "index": question.index as i64 },
                record,
            )
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .context("Failed to upsert question")?;
        Ok(())
    }

    async fn remove_question(&self, city_id: &str, index: usize) -> EngineResult<bool> {
        let deleted = self
            .questions()
            .delete_one(doc! { "city_id": city_id, "index": index as i64 })
            .await
            .context("Failed to delete question")?;
        Ok(deleted.deleted_count > 0)
    }

    async fn transfer_ownership(
        &self,
        location_id: &str,
        new_owner_id: &str,
        expected_owner_id: Option<&str>,
        expected_contest: Option<&Contest>,
    ) -> EngineResult<OwnershipTransfer> {
        let location_id = location_id.to_string();
        let new_owner_id = new_owner_id.to_string();
        let expected_owner_id = expected_owner_id.map(str::to_string);
        let expected_contest = expected_contest.cloned();

        track_db_operation(
            "transfer_ownership",
            LOCATIONS,
            self.in_transaction(move |store, session| {
                let location_id = location_id.clone();
                let new_owner_id = new_owner_id.clone();
                let expected_owner_id = expected_owner_id.clone();
                let expected_contest = expected_contest.clone();
                Box::pin(async move {
                    store
                        .transfer_in_session(
                            session,
                            &location_id,
                            &new_owner_id,
                            expected_owner_id.as_deref(),
                            expected_contest.as_ref(),
                        )
                        .await
                })
            }),
        )
        .await
    }

    async fn replace_contest(
        &self,
        location_id: &str,
        expected_owner_id: Option<&str>,
        expected: Option<&Contest>,
        replacement: Option<Contest>,
    ) -> EngineResult<Location> {
        let expected_bson = contest_bson(expected)?;
        let replacement_bson = contest_bson(replacement.as_ref())?;
        let filter = doc! {
            "_id": location_id,
            "owner_id": optional_bson(expected_owner_id),
            "contest": expected_bson,
        };
        let update = doc! {
            "$set": { "contest": replacement_bson },
            "$inc": { "revision": 1_i64 },
        };

        let updated = track_db_operation("find_one_and_update", LOCATIONS, async {
            self.locations()
                .find_one_and_update(filter, update)
                .return_document(ReturnDocument::After)
                .await
        })
        .await
        .context("Failed to update contest")?;

        if let Some(record) = updated {
            return self.decode_location(record);
        }

        // Classify the failed compare-and-set.
        match self.location(location_id).await? {
            None => Err(EngineError::LocationNotFound(location_id.to_string())),
            Some(current) if current.owner_id.as_deref() != expected_owner_id => {
                Err(EngineError::OwnershipConflict {
                    location_id: location_id.to_string(),
                })
            }
            Some(_) => Err(EngineError::AlreadyContested {
                location_id: location_id.to_string(),
            }),
        }
    }

    async fn insert_user(&self, user: UserProfile) -> EngineResult<UserProfile> {
        if let Some(existing) = self.user(&user.id).await? {
            return Ok(existing);
        }

        match self.users().insert_one(UserRecord::from(&user)).await {
            Ok(_) => Ok(user),
            Err(e) if is_duplicate_key(&e) => match self.user(&user.id).await? {
                Some(existing) => Ok(existing),
                None => Err(EngineError::UsernameTaken),
            },
            Err(e) => Err(anyhow::Error::new(e).context("Failed to insert user").into()),
        }
    }

    async fn rename_user(
        &self,
        user_id: &str,
        new_name: &str,
        changed_at: DateTime<Utc>,
    ) -> EngineResult<UserProfile> {
        let changed_at_bson =
            mongodb::bson::to_bson(&changed_at).context("Failed to encode timestamp")?;
        let update = doc! {
            "$set": {
                "display_name": new_name,
                "display_name_key": name_key(new_name),
                "username_changed_at": changed_at_bson,
            }
        };

        match self
            .users()
            .find_one_and_update(doc! { "_id": user_id }, update)
            .return_document(ReturnDocument::After)
            .await
        {
            Ok(Some(record)) => UserProfile::try_from(record),
            Ok(None) => Err(EngineError::UserNotFound(user_id.to_string())),
            Err(e) if is_duplicate_key(&e) => Err(EngineError::UsernameTaken),
            Err(e) => Err(anyhow::Error::new(e).context("Failed to rename user").into()),
        }
    }

    async fn delete_user(&self, user_id: &str) -> EngineResult<Vec<Location>> {
        let user_id = user_id.to_string();
        self.in_transaction(move |store, session| {
            let user_id = user_id.clone();
            Box::pin(async move { store.delete_user_in_session(session, &user_id).await })
        })
        .await
    }
}
