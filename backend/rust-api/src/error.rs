//! Domain errors for the ownership and contest engine.

use thiserror::Error;

/// Coarse classification used by callers to decide whether to retry,
/// re-fetch or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Expired,
    Rejected,
    Storage,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Location {location_id} is owned by someone else than expected")]
    OwnershipConflict { location_id: String },

    #[error("Location {location_id} already has an active contest")]
    AlreadyContested { location_id: String },

    #[error("User already owns location {location_id}")]
    AlreadyOwner { location_id: String },

    #[error("Location {location_id} is being contested by another player")]
    LocationContested { location_id: String },

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("City not found: {0}")]
    CityNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Quiz session not found: {0}")]
    SessionNotFound(String),

    #[error("Question {index} missing from bank of city {city_id}")]
    QuestionMissing { city_id: String, index: usize },

    #[error("Quiz session has expired")]
    QuizExpired,

    #[error("Contest on location {location_id} has expired")]
    ContestExpired { location_id: String },

    #[error("Coordinate is outside the geofence of location {location_id}")]
    NotInsideGeofence { location_id: String },

    #[error("Quiz was not won")]
    QuizNotWon,

    #[error("Failed to load quiz questions: {0}")]
    QuizLoadFailed(String),

    #[error("No cities configured")]
    NoCitiesConfigured,

    #[error("Username can be changed again in {remaining_minutes} minutes")]
    UsernameCooldown { remaining_minutes: i64 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::OwnershipConflict { .. }
            | EngineError::AlreadyContested { .. }
            | EngineError::AlreadyOwner { .. }
            | EngineError::LocationContested { .. }
            | EngineError::UsernameTaken => ErrorKind::Conflict,
            EngineError::LocationNotFound(_)
            | EngineError::CityNotFound(_)
            | EngineError::UserNotFound(_)
            | EngineError::SessionNotFound(_)
            | EngineError::QuestionMissing { .. } => ErrorKind::NotFound,
            EngineError::QuizExpired | EngineError::ContestExpired { .. } => ErrorKind::Expired,
            EngineError::NotInsideGeofence { .. }
            | EngineError::QuizNotWon
            | EngineError::QuizLoadFailed(_)
            | EngineError::NoCitiesConfigured
            | EngineError::UsernameCooldown { .. } => ErrorKind::Rejected,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Conflicts may succeed after the caller re-reads state and tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::OwnershipConflict { .. } | EngineError::AlreadyContested { .. }
        )
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::OwnershipConflict { .. } => "ownership_conflict",
            EngineError::AlreadyContested { .. } => "already_contested",
            EngineError::AlreadyOwner { .. } => "already_owner",
            EngineError::LocationContested { .. } => "location_contested",
            EngineError::UsernameTaken => "username_taken",
            EngineError::LocationNotFound(_) => "location_not_found",
            EngineError::CityNotFound(_) => "city_not_found",
            EngineError::UserNotFound(_) => "user_not_found",
            EngineError::SessionNotFound(_) => "session_not_found",
            EngineError::QuestionMissing { .. } => "question_missing",
            EngineError::QuizExpired => "quiz_expired",
            EngineError::ContestExpired { .. } => "contest_expired",
            EngineError::NotInsideGeofence { .. } => "not_inside_geofence",
            EngineError::QuizNotWon => "quiz_not_won",
            EngineError::QuizLoadFailed(_) => "quiz_load_failed",
            EngineError::NoCitiesConfigured => "no_cities_configured",
            EngineError::UsernameCooldown { .. } => "username_cooldown",
            EngineError::Storage(_) => "storage_error",
        }
    }
}
