use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::record_capture;
use crate::models::quiz::{QuizSessionView, SubmitAnswerResponse};
use crate::models::{CaptureResponse, Coordinate, QuizSession, QuizStatus};
use crate::services::attack_window::AttackWindowManager;
use crate::services::eligibility::{check_capture, CaptureAttempt};
use crate::services::leaderboard::LeaderboardAggregator;
use crate::services::location_registry::LocationRegistry;
use crate::services::quiz_service::QuizService;
use crate::store::GameStore;
use crate::utils::time::Clock;

/// Drives a capture attempt end to end: quiz start, answers, eligibility,
/// the ownership transaction and the leaderboard update.
#[derive(Clone)]
pub struct CaptureService {
    store: Arc<dyn GameStore>,
    clock: Arc<dyn Clock>,
    registry: LocationRegistry,
    contests: AttackWindowManager,
    quizzes: QuizService,
    leaderboard: LeaderboardAggregator,
}

impl CaptureService {
    pub fn new(
        store: Arc<dyn GameStore>,
        clock: Arc<dyn Clock>,
        registry: LocationRegistry,
        contests: AttackWindowManager,
        quizzes: QuizService,
        leaderboard: LeaderboardAggregator,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            contests,
            quizzes,
            leaderboard,
        }
    }

    /// Starts a quiz for `location_id`. The player must stand inside the
    /// geofence; on a location owned by someone else this opens a contest.
    pub async fn begin_quiz(
        &self,
        user_id: &str,
        location_id: &str,
        position: &Coordinate,
    ) -> EngineResult<QuizSessionView> {
        position.ensure_valid()?;
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(user_id.to_string()))?;
        let location = self.registry.location(location_id).await?;

        if !location.geometry.contains(position) {
            record_capture("not_inside_geofence");
            return Err(EngineError::NotInsideGeofence {
                location_id: location_id.to_string(),
            });
        }
        if location.is_owned_by(user_id) {
            return Err(EngineError::AlreadyOwner {
                location_id: location_id.to_string(),
            });
        }
        if let Some(contest) = &location.contest {
            if self.contests.is_active(contest) {
                return Err(if contest.attacker_id == user_id {
                    EngineError::AlreadyContested {
                        location_id: location_id.to_string(),
                    }
                } else {
                    EngineError::LocationContested {
                        location_id: location_id.to_string(),
                    }
                });
            }
        }

        let city = self
            .store
            .city(&location.city_id)
            .await?
            .ok_or_else(|| EngineError::CityNotFound(location.city_id.clone()))?;

        let opens_contest = location.owner_id.is_some();
        let (session, superseded) = self
            .quizzes
            .start(user_id, location_id, &city, opens_contest)
            .await?;
        self.release_all(&superseded).await;

        if opens_contest {
            if let Err(err) = self
                .contests
                .begin_contest(location_id, user_id, &user.display_name)
                .await
            {
                // Nothing to release: the contest never opened.
                if let Err(abandon_err) = self.quizzes.abandon(&session.id, user_id).await {
                    warn!(
                        error = %abandon_err,
                        session_id = %session.id,
                        "Failed to abandon quiz after contest was refused"
                    );
                }
                return Err(match err {
                    EngineError::AlreadyContested { location_id } => {
                        EngineError::LocationContested { location_id }
                    }
                    other => other,
                });
            }
        }

        info!(
            session_id = %session.id,
            user_id,
            location_id,
            contested = opens_contest,
            "Capture quiz started"
        );
        Ok(session.view())
    }

    pub async fn quiz(&self, user_id: &str, session_id: &str) -> EngineResult<QuizSessionView> {
        let session = self.quizzes.get(session_id, user_id).await?;
        self.release(&session).await;
        Ok(session.view())
    }

    pub async fn submit_answer(
        &self,
        user_id: &str,
        session_id: &str,
        answer: &str,
    ) -> EngineResult<SubmitAnswerResponse> {
        let (outcome, session) = self.quizzes.answer(session_id, user_id, answer).await?;
        self.release(&session).await;
        Ok(SubmitAnswerResponse {
            correct: outcome.correct,
            session: session.view(),
        })
    }

    pub async fn abandon_quiz(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> EngineResult<QuizSessionView> {
        let session = self.quizzes.abandon(session_id, user_id).await?;
        self.release(&session).await;
        Ok(session.view())
    }

    /// Transfers the location to `user_id` if every capture precondition
    /// holds. The won session is single-use.
    pub async fn attempt_capture(
        &self,
        user_id: &str,
        session_id: &str,
        position: &Coordinate,
    ) -> EngineResult<CaptureResponse> {
        let session = match self.quizzes.get(session_id, user_id).await {
            Ok(session) => session,
            Err(err) => {
                record_capture(err.code());
                return Err(err);
            }
        };
        self.release(&session).await;
        let location = self.registry.location(&session.location_id).await?;

        // Won against an unowned location that someone else took meanwhile.
        if !session.opened_contest
            && location.owner_id.is_some()
            && !location.is_owned_by(user_id)
        {
            record_capture("ownership_conflict");
            return Err(EngineError::OwnershipConflict {
                location_id: location.id.clone(),
            });
        }

        let attempt = CaptureAttempt {
            user_id,
            location: &location,
            position,
            quiz_status: session.status,
        };
        if let Err(err) = check_capture(&attempt, self.clock.now(), self.contests.limit_minutes()) {
            record_capture(err.code());
            warn!(user_id, location_id = %location.id, error = %err, "Capture rejected");
            if let EngineError::ContestExpired { .. } = err {
                if let Err(consume_err) = self.quizzes.consume(session_id, user_id).await {
                    warn!(
                        error = %consume_err,
                        session_id,
                        "Failed to discard session of expired contest"
                    );
                }
                self.contests.clear_contest(&location.id, user_id).await?;
            }
            return Err(err);
        }

        let session = match self.quizzes.peek_won(session_id, user_id).await {
            Ok(_) => self.quizzes.consume(session_id, user_id).await?,
            Err(err) => {
                record_capture(err.code());
                return Err(err);
            }
        };

        let transfer = match self
            .registry
            .transfer_ownership(
                &location.id,
                user_id,
                location.owner_id.as_deref(),
                location.contest.as_ref(),
            )
            .await
        {
            Ok(transfer) => transfer,
            Err(err) => {
                if err.is_retryable() {
                    self.quizzes.restore(session).await;
                }
                record_capture(err.code());
                warn!(user_id, location_id = %location.id, error = %err, "Capture failed");
                return Err(err);
            }
        };

        self.leaderboard.apply_transfer(&transfer).await;
        record_capture("success");
        info!(
            user_id,
            location_id = %location.id,
            previous_owner = ?transfer.previous_owner_id,
            captured_count = transfer.new_owner_count.captured_count,
            "Location captured"
        );

        Ok(CaptureResponse {
            location: transfer.location,
            previous_owner_id: transfer.previous_owner_id,
            captured_count: transfer.new_owner_count.captured_count,
        })
    }

    /// Times out overdue sessions and releases their contests.
    pub async fn purge_stale_sessions(&self) -> usize {
        let lost = self.quizzes.purge_stale().await;
        self.release_all(&lost).await;
        lost.len()
    }

    /// A lost attempt that opened a contest clears it; the owner is unchanged.
    async fn release(&self, session: &QuizSession) {
        if session.status != QuizStatus::Lost || !session.opened_contest {
            return;
        }
        match self
            .contests
            .clear_contest(&session.location_id, &session.user_id)
            .await
        {
            Ok(true) => record_capture("quiz_lost"),
            Ok(false) => {}
            Err(err) => warn!(
                error = %err,
                location_id = %session.location_id,
                "Failed to clear contest after lost quiz"
            ),
        }
    }

    async fn release_all(&self, sessions: &[QuizSession]) {
        for session in sessions {
            self.release(session).await;
        }
    }
}
