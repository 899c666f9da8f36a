use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::config::GameConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::leaderboard::{CapturedLocationSummary, CityCaptures, UserCapturesResponse};
use crate::models::user::DeleteAccountResponse;
use crate::models::{LocationChange, UserProfile};
use crate::services::leaderboard::LeaderboardAggregator;
use crate::services::location_registry::LocationRegistry;
use crate::services::quiz_service::QuizService;
use crate::store::GameStore;
use crate::utils::time::Clock;

lazy_static! {
    static ref USERNAME_CHARS: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap();
}

#[derive(Debug, Clone, Copy)]
pub struct UsernameRules {
    pub min_length: usize,
    pub max_length: usize,
    pub cooldown: Duration,
}

impl From<&GameConfig> for UsernameRules {
    fn from(game: &GameConfig) -> Self {
        Self {
            min_length: game.min_username_length,
            max_length: game.max_username_length,
            cooldown: Duration::hours(game.username_cooldown_hours),
        }
    }
}

impl UsernameRules {
    /// Trimmed name if it satisfies length and character rules.
    pub fn check<'a>(&self, name: &'a str) -> EngineResult<&'a str> {
        let name = name.trim();
        let length = name.chars().count();
        if length < self.min_length || length > self.max_length {
            return Err(EngineError::validation(format!(
                "Username must be between {} and {} characters",
                self.min_length, self.max_length
            )));
        }
        if !USERNAME_CHARS.is_match(name) {
            return Err(EngineError::validation(
                "Username may only contain letters, digits, '_', '.' and '-'",
            ));
        }
        Ok(name)
    }
}

/// User lifecycle: first sign-in, renames and account deletion.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn GameStore>,
    clock: Arc<dyn Clock>,
    rules: UsernameRules,
    registry: LocationRegistry,
    quizzes: QuizService,
    leaderboard: LeaderboardAggregator,
}

impl UserService {
    pub fn new(
        store: Arc<dyn GameStore>,
        clock: Arc<dyn Clock>,
        rules: UsernameRules,
        registry: LocationRegistry,
        quizzes: QuizService,
        leaderboard: LeaderboardAggregator,
    ) -> Self {
        Self {
            store,
            clock,
            rules,
            registry,
            quizzes,
            leaderboard,
        }
    }

    /// Creates the user on first sign-in; later sign-ins return the
    /// existing profile unchanged.
    pub async fn sign_in(&self, user_id: &str, display_name: &str) -> EngineResult<UserProfile> {
        if user_id.trim().is_empty() {
            return Err(EngineError::validation("User id must not be empty"));
        }
        if let Some(existing) = self.store.user(user_id).await? {
            return Ok(existing);
        }

        let name = self.rules.check(display_name)?;
        let user = self
            .store
            .insert_user(UserProfile::new(user_id, name, self.clock.now()))
            .await?;
        self.leaderboard.upsert_user(&user).await;
        info!(user_id, display_name = %user.display_name, "User signed in for the first time");
        Ok(user)
    }

    pub async fn profile(&self, user_id: &str) -> EngineResult<UserProfile> {
        self.store
            .user(user_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(user_id.to_string()))
    }

    pub async fn is_name_available(&self, name: &str) -> EngineResult<bool> {
        Ok(self.store.user_by_name(name).await?.is_none())
    }

    pub async fn change_username(
        &self,
        user_id: &str,
        new_name: &str,
    ) -> EngineResult<UserProfile> {
        let name = self.rules.check(new_name)?;
        let user = self.profile(user_id).await?;
        if user.display_name == name {
            return Ok(user);
        }

        let now = self.clock.now();
        if let Some(changed_at) = user.username_changed_at {
            let next_allowed = changed_at + self.rules.cooldown;
            if now < next_allowed {
                let remaining = next_allowed - now;
                // Round up so a few seconds left never shows as zero.
                let remaining_minutes = (remaining.num_seconds() + 59) / 60;
                return Err(EngineError::UsernameCooldown { remaining_minutes });
            }
        }

        let renamed = self.store.rename_user(user_id, name, now).await?;
        self.leaderboard.rename(user_id, &renamed.display_name).await;
        info!(user_id, display_name = %renamed.display_name, "Username changed");
        Ok(renamed)
    }

    /// Deletes the user, releasing every location they own and every
    /// contest they hold.
    pub async fn delete_account(&self, user_id: &str) -> EngineResult<DeleteAccountResponse> {
        let abandoned = self.quizzes.discard_user(user_id).await;
        let changed = self.store.delete_user(user_id).await?;
        self.leaderboard.remove(user_id).await;

        let released_location_ids = changed
            .iter()
            .filter(|l| l.owner_id.is_none())
            .map(|l| l.id.clone())
            .collect();
        for location in changed {
            self.registry.publish(LocationChange::modified(location));
        }
        if !abandoned.is_empty() {
            // Contests were cleared with the user; nothing left to release.
            info!(user_id, sessions = abandoned.len(), "Discarded quiz sessions of deleted user");
        }

        info!(user_id, "Account deleted");
        Ok(DeleteAccountResponse {
            user_id: user_id.to_string(),
            released_location_ids,
        })
    }

    /// The user's captured locations grouped by city, verified against
    /// current ownership.
    pub async fn captures(&self, user_id: &str) -> EngineResult<UserCapturesResponse> {
        let user = self.profile(user_id).await?;
        let mut by_city: BTreeMap<String, Vec<CapturedLocationSummary>> = BTreeMap::new();

        for location_id in &user.captured_location_ids {
            match self.store.location(location_id).await? {
                Some(location) if location.is_owned_by(user_id) => {
                    by_city
                        .entry(location.city_id.clone())
                        .or_default()
                        .push(CapturedLocationSummary {
                            location_id: location.id,
                            name: location.name,
                        });
                }
                _ => warn!(
                    user_id,
                    location_id = %location_id,
                    "Captured set disagrees with location owner"
                ),
            }
        }

        let mut cities = Vec::with_capacity(by_city.len());
        for (city_id, mut locations) in by_city {
            locations.sort_by(|a, b| a.name.cmp(&b.name));
            let city_name = self
                .store
                .city(&city_id)
                .await?
                .map(|c| c.name)
                .unwrap_or_else(|| city_id.clone());
            cities.push(CityCaptures {
                city_id,
                city_name,
                locations,
            });
        }

        Ok(UserCapturesResponse {
            user_id: user.id,
            display_name: user.display_name,
            captured_count: user.captured_count,
            cities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> UsernameRules {
        UsernameRules {
            min_length: 3,
            max_length: 20,
            cooldown: Duration::hours(24),
        }
    }

    #[test]
    fn username_rules_trim_and_validate() {
        assert_eq!(rules().check("  ulla.k_99 ").unwrap(), "ulla.k_99");
        assert!(rules().check("ab").is_err());
        assert!(rules().check("a".repeat(21).as_str()).is_err());
        assert!(rules().check("has space").is_err());
        assert!(rules().check("emoji🙂").is_err());
    }
}
