use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::models::{Coordinate, Location, QuizStatus};

/// Everything a capture is judged on, read before the transaction.
#[derive(Debug, Clone, Copy)]
pub struct CaptureAttempt<'a> {
    pub user_id: &'a str,
    pub location: &'a Location,
    pub position: &'a Coordinate,
    pub quiz_status: QuizStatus,
}

/// Checks presence, contest state and quiz outcome, in that order.
///
/// Capturing from another owner additionally needs the capturer's own
/// contest to still be open; `ContestExpired` otherwise.
pub fn check_capture(
    attempt: &CaptureAttempt<'_>,
    now: DateTime<Utc>,
    limit_minutes: i64,
) -> EngineResult<()> {
    let location = attempt.location;
    attempt.position.ensure_valid()?;

    if !location.geometry.contains(attempt.position) {
        return Err(EngineError::NotInsideGeofence {
            location_id: location.id.clone(),
        });
    }

    if location.is_owned_by(attempt.user_id) {
        return Err(EngineError::AlreadyOwner {
            location_id: location.id.clone(),
        });
    }

    if let Some(contest) = &location.contest {
        if contest.attacker_id != attempt.user_id && contest.is_active(now, limit_minutes) {
            return Err(EngineError::LocationContested {
                location_id: location.id.clone(),
            });
        }
    }

    if attempt.quiz_status != QuizStatus::Won {
        return Err(EngineError::QuizNotWon);
    }

    if location.owner_id.is_some() {
        let own_contest_open = location.contest.as_ref().is_some_and(|c| {
            c.attacker_id == attempt.user_id && c.is_active(now, limit_minutes)
        });
        if !own_contest_open {
            return Err(EngineError::ContestExpired {
                location_id: location.id.clone(),
            });
        }
    }

    Ok(())
}
