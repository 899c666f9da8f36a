use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub game: GameConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Mongo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub mongo_uri: Option<String>,
    pub mongo_database: String,
    pub seed_path: Option<String>,
}

/// Tunables delivered by remote configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub attack_time_limit_minutes: i64,
    pub quiz_question_count: usize,
    pub quiz_per_question_seconds: i64,
    pub min_username_length: usize,
    pub max_username_length: usize,
    pub username_cooldown_hours: i64,
    pub default_geofence_radius_meters: f64,
    pub won_session_ttl_seconds: i64,
    /// 0 keeps contest expiry purely lazy.
    pub contest_sweep_interval_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            attack_time_limit_minutes: 10,
            quiz_question_count: 3,
            quiz_per_question_seconds: 20,
            min_username_length: 3,
            max_username_length: 20,
            username_cooldown_hours: 24,
            default_geofence_radius_meters: 50.0,
            won_session_ttl_seconds: 300,
            contest_sweep_interval_secs: 0,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let problem = if self.attack_time_limit_minutes <= 0 {
            Some("game.attack_time_limit_minutes must be positive")
        } else if self.quiz_question_count == 0 {
            Some("game.quiz_question_count must be positive")
        } else if self.quiz_per_question_seconds <= 0 {
            Some("game.quiz_per_question_seconds must be positive")
        } else if self.min_username_length == 0
            || self.min_username_length > self.max_username_length
        {
            Some("game.min_username_length must be in 1..=max_username_length")
        } else if self.username_cooldown_hours < 0 {
            Some("game.username_cooldown_hours must not be negative")
        } else if !(self.default_geofence_radius_meters > 0.0) {
            Some("game.default_geofence_radius_meters must be positive")
        } else if self.won_session_ttl_seconds <= 0 {
            Some("game.won_session_ttl_seconds must be positive")
        } else {
            None
        };

        match problem {
            Some(message) => Err(config::ConfigError::Message(message.to_string())),
            None => Ok(()),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!("Using default JWT secret (dev mode only)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let backend = match settings
            .get_string("storage.backend")
            .or_else(|_| env::var("STORAGE_BACKEND"))
            .unwrap_or_else(|_| "memory".to_string())
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "mongo" => StorageBackend::Mongo,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "Unknown storage backend: {}",
                    other
                )))
            }
        };

        let storage = StorageConfig {
            backend,
            mongo_uri: settings
                .get_string("storage.mongo_uri")
                .or_else(|_| env::var("MONGO_URI"))
                .ok(),
            mongo_database: settings
                .get_string("storage.mongo_database")
                .or_else(|_| env::var("MONGO_DATABASE"))
                .unwrap_or_else(|_| "conquest".to_string()),
            seed_path: settings
                .get_string("storage.seed_path")
                .or_else(|_| env::var("SEED_PATH"))
                .ok(),
        };

        if storage.backend == StorageBackend::Mongo && storage.mongo_uri.is_none() {
            return Err(config::ConfigError::Message(
                "storage.mongo_uri is required for the mongo backend".to_string(),
            ));
        }

        let game = match settings.get::<GameConfig>("game") {
            Ok(game) => game,
            Err(config::ConfigError::NotFound(_)) => GameConfig::default(),
            Err(e) => return Err(e),
        };
        game.validate()?;

        Ok(Config {
            bind_addr,
            jwt_secret,
            storage,
            game,
        })
    }

    /// In-memory configuration used by tests and local tooling.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_secret: jwt_secret.to_string(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                mongo_uri: None,
                mongo_database: "conquest".to_string(),
                seed_path: None,
            },
            game: GameConfig::default(),
        }
    }
}
