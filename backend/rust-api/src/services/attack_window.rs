use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::record_contest;
use crate::models::location::ContestStatus;
use crate::models::{Contest, Location};
use crate::services::location_registry::LocationRegistry;
use crate::utils::time::Clock;

/// Owns the contest slot of each location: who is attacking and for how long
/// the owner may still defend.
#[derive(Clone)]
pub struct AttackWindowManager {
    registry: LocationRegistry,
    clock: Arc<dyn Clock>,
    limit_minutes: i64,
}

impl AttackWindowManager {
    pub fn new(registry: LocationRegistry, clock: Arc<dyn Clock>, limit_minutes: i64) -> Self {
        Self {
            registry,
            clock,
            limit_minutes,
        }
    }

    pub fn limit_minutes(&self) -> i64 {
        self.limit_minutes
    }

    /// Opens a contest on a location owned by someone other than the
    /// attacker. An expired contest is replaced; an active one is not.
    pub async fn begin_contest(
        &self,
        location_id: &str,
        attacker_id: &str,
        attacker_name: &str,
    ) -> EngineResult<Contest> {
        let location = self.registry.location(location_id).await?;
        let owner_id = match location.owner_id.as_deref() {
            Some(owner) if owner == attacker_id => {
                return Err(EngineError::AlreadyOwner {
                    location_id: location_id.to_string(),
                })
            }
            Some(owner) => owner.to_string(),
            None => {
                return Err(EngineError::validation(format!(
                    "Location {} has no owner to contest",
                    location_id
                )))
            }
        };

        let now = self.clock.now();
        if let Some(existing) = &location.contest {
            if self.is_active(existing) {
                return Err(EngineError::AlreadyContested {
                    location_id: location_id.to_string(),
                });
            }
            record_contest("expired");
        }

        let contest = Contest {
            location_id: location_id.to_string(),
            attacker_id: attacker_id.to_string(),
            attacker_name: attacker_name.to_string(),
            defender_id: Some(owner_id.clone()),
            started_at: now,
        };

        self.registry
            .replace_contest(
                location_id,
                Some(&owner_id),
                location.contest.as_ref(),
                Some(contest.clone()),
            )
            .await
            .map_err(|err| match err {
                // The slot or owner moved under us; either way someone else won.
                EngineError::OwnershipConflict { location_id } => {
                    EngineError::AlreadyContested { location_id }
                }
                other => other,
            })?;

        record_contest("begun");
        info!(location_id, attacker_id, defender_id = %owner_id, "Contest begun");
        Ok(contest)
    }

    pub fn remaining_minutes(&self, contest: &Contest) -> i64 {
        contest.remaining_minutes(self.clock.now(), self.limit_minutes)
    }

    pub fn is_active(&self, contest: &Contest) -> bool {
        contest.is_active(self.clock.now(), self.limit_minutes)
    }

    pub async fn status(&self, location_id: &str) -> EngineResult<ContestStatus> {
        let location = self.registry.location(location_id).await?;
        Ok(self.status_of(&location))
    }

    pub fn status_of(&self, location: &Location) -> ContestStatus {
        match &location.contest {
            Some(contest) => ContestStatus {
                location_id: location.id.clone(),
                contest: Some(contest.clone()),
                active: self.is_active(contest),
                remaining_minutes: self.remaining_minutes(contest).max(0),
                expires_at: Some(contest.expires_at(self.limit_minutes)),
            },
            None => ContestStatus {
                location_id: location.id.clone(),
                contest: None,
                active: false,
                remaining_minutes: 0,
                expires_at: None,
            },
        }
    }

    /// Clears the contest if `attacker_id` still holds it. Returns whether
    /// anything was cleared; a contest that already moved on is left alone.
    pub async fn clear_contest(&self, location_id: &str, attacker_id: &str) -> EngineResult<bool> {
        let location = match self.registry.location(location_id).await {
            Ok(location) => location,
            Err(EngineError::LocationNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let Some(contest) = location.contest.as_ref() else {
            return Ok(false);
        };
        if contest.attacker_id != attacker_id {
            return Ok(false);
        }

        match self
            .registry
            .replace_contest(location_id, location.owner_id.as_deref(), Some(contest), None)
            .await
        {
            Ok(_) => {
                record_contest("cleared");
                info!(location_id, attacker_id, "Contest cleared");
                Ok(true)
            }
            Err(err) if err.is_retryable() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Clears every expired contest. Expiry is also evaluated lazily on each
    /// read, so this only tidies what is shown to subscribers.
    pub async fn sweep_expired(&self) -> EngineResult<usize> {
        let locations = self.registry.all_locations().await?;
        let mut cleared = 0;

        for location in locations {
            let Some(contest) = location.contest.as_ref() else {
                continue;
            };
            if self.is_active(contest) {
                continue;
            }
            match self
                .registry
                .replace_contest(&location.id, location.owner_id.as_deref(), Some(contest), None)
                .await
            {
                Ok(_) => {
                    record_contest("expired");
                    cleared += 1;
                }
                Err(err) if err.is_retryable() => {}
                Err(err) => warn!(
                    error = %err,
                    location_id = %location.id,
                    "Failed to clear expired contest"
                ),
            }
        }

        Ok(cleared)
    }
}
