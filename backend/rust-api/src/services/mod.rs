use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;

use crate::config::{Config, StorageBackend};
use crate::store::{GameStore, InMemoryStore, MongoStore};
use crate::utils::time::{Clock, SystemClock};

use attack_window::AttackWindowManager;
use capture_service::CaptureService;
use contest_sweeper::ContestSweeper;
use geo_index::GeospatialIndex;
use leaderboard::LeaderboardAggregator;
use location_registry::LocationRegistry;
use quiz_service::QuizService;
use user_service::{UserService, UsernameRules};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn GameStore>,
    pub clock: Arc<dyn Clock>,
    pub geo: GeospatialIndex,
    pub registry: LocationRegistry,
    pub contests: AttackWindowManager,
    pub quizzes: QuizService,
    pub captures: CaptureService,
    pub leaderboard: LeaderboardAggregator,
    pub users: UserService,
}

impl AppState {
    /// Opens the configured store, seeds it and wires up the services.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn GameStore> = match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory store");
                Arc::new(InMemoryStore::new())
            }
            StorageBackend::Mongo => {
                let uri = config
                    .storage
                    .mongo_uri
                    .as_deref()
                    .context("storage.mongo_uri is required for the mongo backend")?;
                tracing::info!("Connecting to MongoDB...");
                let store = MongoStore::connect(
                    uri,
                    &config.storage.mongo_database,
                    config.game.default_geofence_radius_meters,
                )
                .await?;
                tracing::info!("MongoDB connection established");
                Arc::new(store)
            }
        };

        Self::with_store(config, store, Arc::new(SystemClock)).await
    }

    pub async fn with_store(
        config: Config,
        store: Arc<dyn GameStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let game = config.game.clone();
        let registry = LocationRegistry::new(store.clone());

        seed::bootstrap(
            config.storage.seed_path.as_deref(),
            game.default_geofence_radius_meters,
            store.as_ref(),
            &registry,
        )
        .await?;

        let cities = store.cities().await.context("Failed to load cities")?;
        let geo = GeospatialIndex::new(cities);
        if geo.is_empty() {
            tracing::warn!("No cities configured; nearest-city lookups will fail");
        }

        let contests = AttackWindowManager::new(
            registry.clone(),
            clock.clone(),
            game.attack_time_limit_minutes,
        );
        let quizzes = QuizService::new(
            store.clone(),
            clock.clone(),
            game.quiz_question_count,
            Duration::seconds(game.quiz_per_question_seconds),
            Duration::seconds(game.won_session_ttl_seconds),
        );
        let leaderboard = LeaderboardAggregator::new();
        let users = store.users().await.context("Failed to load users")?;
        leaderboard.rebuild(&users).await;

        let captures = CaptureService::new(
            store.clone(),
            clock.clone(),
            registry.clone(),
            contests.clone(),
            quizzes.clone(),
            leaderboard.clone(),
        );
        let user_service = UserService::new(
            store.clone(),
            clock.clone(),
            UsernameRules::from(&game),
            registry.clone(),
            quizzes.clone(),
            leaderboard.clone(),
        );

        let mismatches = registry
            .audit_ownership()
            .await
            .context("Failed to audit ownership")?;
        for mismatch in &mismatches {
            tracing::error!(?mismatch, "Ownership inconsistency at startup");
        }

        tracing::info!(
            cities = geo.len(),
            users = users.len(),
            backend = store.backend_name(),
            "Application state ready"
        );

        Ok(Self {
            config,
            store,
            clock,
            geo,
            registry,
            contests,
            quizzes,
            captures,
            leaderboard,
            users: user_service,
        })
    }

    /// Background sweeper, when an interval is configured.
    pub fn sweeper(&self) -> Option<ContestSweeper> {
        let secs = self.config.game.contest_sweep_interval_secs;
        (secs > 0).then(|| {
            ContestSweeper::new(
                self.contests.clone(),
                self.captures.clone(),
                std::time::Duration::from_secs(secs),
            )
        })
    }
}

pub mod attack_window;
pub mod capture_service;
pub mod contest_sweeper;
pub mod eligibility;
pub mod geo_index;
pub mod leaderboard;
pub mod location_registry;
pub mod quiz_service;
pub mod seed;
pub mod user_service;
