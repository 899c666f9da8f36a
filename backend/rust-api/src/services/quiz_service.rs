use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::metrics::{record_quiz, QUIZ_SESSIONS_ACTIVE};
use crate::models::quiz::{AnswerOutcome, PresentedQuestion};
use crate::models::{City, Question, QuizSession, QuizStatus};
use crate::store::GameStore;
use crate::utils::time::Clock;

/// Redraws allowed per question slot after its first draw hits a missing
/// bank entry.
const MISSING_QUESTION_RETRIES: usize = 3;

/// Runs timed quiz sessions. Sessions live only in memory: a lost session
/// is dropped at once, a won one stays until a capture consumes it or its
/// grace period ends.
#[derive(Clone)]
pub struct QuizService {
    store: Arc<dyn GameStore>,
    clock: Arc<dyn Clock>,
    sessions: Arc<Mutex<HashMap<String, QuizSession>>>,
    required_count: usize,
    per_question: Duration,
    won_ttl: Duration,
}

impl QuizService {
    pub fn new(
        store: Arc<dyn GameStore>,
        clock: Arc<dyn Clock>,
        required_count: usize,
        per_question: Duration,
        won_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            required_count,
            per_question,
            won_ttl,
        }
    }

    /// Creates a session for `location_id` and loads its questions. Any
    /// unfinished session the user still holds is abandoned and returned so
    /// the caller can release what it held.
    pub async fn start(
        &self,
        user_id: &str,
        location_id: &str,
        city: &City,
        opened_contest: bool,
    ) -> EngineResult<(QuizSession, Vec<QuizSession>)> {
        let now = self.clock.now();
        let mut session = QuizSession::new(
            Uuid::new_v4().to_string(),
            user_id,
            location_id,
            &city.id,
            self.required_count,
            self.per_question,
            now,
        );
        session.opened_contest = opened_contest;

        let questions = self.sample_questions(city).await?;
        let presented = questions.iter().map(present).collect();
        session.load_questions(questions, presented, self.clock.now())?;

        let mut sessions = self.sessions.lock().await;
        let mut superseded = Vec::new();
        let stale: Vec<String> = sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_terminal())
            .map(|s| s.id.clone())
            .collect();
        for id in stale {
            if let Some(mut previous) = sessions.remove(&id) {
                previous.abandon(now);
                record_quiz("lost");
                superseded.push(previous);
            }
        }
        sessions.insert(session.id.clone(), session.clone());
        QUIZ_SESSIONS_ACTIVE.set(sessions.len() as i64);
        record_quiz("started");

        debug!(session_id = %session.id, user_id, location_id, "Quiz session started");
        Ok((session, superseded))
    }

    /// Current state of a session, firing its deadline first.
    pub async fn get(&self, session_id: &str, user_id: &str) -> EngineResult<QuizSession> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = owned_session(&mut sessions, session_id, user_id)?;
        session.timeout(now);
        let snapshot = session.clone();
        self.settle(&mut sessions, &snapshot);
        Ok(snapshot)
    }

    pub async fn answer(
        &self,
        session_id: &str,
        user_id: &str,
        answer: &str,
    ) -> EngineResult<(AnswerOutcome, QuizSession)> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = owned_session(&mut sessions, session_id, user_id)?;
        let outcome = session.answer(answer, now)?;
        if outcome.status == QuizStatus::Won {
            record_quiz("won");
        }
        let snapshot = session.clone();
        self.settle(&mut sessions, &snapshot);
        Ok((outcome, snapshot))
    }

    pub async fn abandon(&self, session_id: &str, user_id: &str) -> EngineResult<QuizSession> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let session = owned_session(&mut sessions, session_id, user_id)?;
        session.abandon(now);
        let snapshot = session.clone();
        self.settle(&mut sessions, &snapshot);
        Ok(snapshot)
    }

    /// Reads a won session without consuming it. Fails with `QuizNotWon`
    /// while the session is unfinished and `QuizExpired` once the grace
    /// period is over.
    pub async fn peek_won(&self, session_id: &str, user_id: &str) -> EngineResult<QuizSession> {
        let session = self.get(session_id, user_id).await?;
        match session.status {
            QuizStatus::Won if self.won_expired(&session) => {
                self.sessions.lock().await.remove(session_id);
                Err(EngineError::QuizExpired)
            }
            QuizStatus::Won => Ok(session),
            _ => Err(EngineError::QuizNotWon),
        }
    }

    /// Removes a won session so it cannot back a second capture.
    pub async fn consume(&self, session_id: &str, user_id: &str) -> EngineResult<QuizSession> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(s) if s.user_id == user_id && s.status == QuizStatus::Won => {}
            Some(s) if s.user_id == user_id => return Err(EngineError::QuizNotWon),
            _ => return Err(EngineError::SessionNotFound(session_id.to_string())),
        }
        let session = sessions
            .remove(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        QUIZ_SESSIONS_ACTIVE.set(sessions.len() as i64);
        Ok(session)
    }

    /// Puts a consumed session back after a capture lost a race.
    pub async fn restore(&self, session: QuizSession) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id.clone(), session);
        QUIZ_SESSIONS_ACTIVE.set(sessions.len() as i64);
    }

    /// Times out overdue sessions and drops won sessions past their grace
    /// period. Returns the sessions that were lost by this call.
    pub async fn purge_stale(&self) -> Vec<QuizSession> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let mut lost = Vec::new();

        for session in sessions.values_mut() {
            if session.timeout(now) {
                record_quiz("lost");
                lost.push(session.clone());
            }
        }
        let won_ttl = self.won_ttl;
        sessions.retain(|_, s| match s.status {
            QuizStatus::Lost => false,
            QuizStatus::Won => s.finished_at.is_some_and(|at| now - at <= won_ttl),
            _ => true,
        });
        QUIZ_SESSIONS_ACTIVE.set(sessions.len() as i64);
        lost
    }

    /// Drops every session of a user, returning the unfinished ones.
    pub async fn discard_user(&self, user_id: &str) -> Vec<QuizSession> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let mut dropped = Vec::new();
        sessions.retain(|_, s| {
            if s.user_id != user_id {
                return true;
            }
            if !s.is_terminal() {
                s.abandon(now);
                dropped.push(s.clone());
            }
            false
        });
        QUIZ_SESSIONS_ACTIVE.set(sessions.len() as i64);
        dropped
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn won_expired(&self, session: &QuizSession) -> bool {
        session
            .finished_at
            .is_some_and(|at| self.clock.now() - at > self.won_ttl)
    }

    /// Lost sessions leave the map as soon as they are observed.
    fn settle(&self, sessions: &mut HashMap<String, QuizSession>, snapshot: &QuizSession) {
        if snapshot.status == QuizStatus::Lost {
            sessions.remove(&snapshot.id);
            record_quiz("lost");
        }
        QUIZ_SESSIONS_ACTIVE.set(sessions.len() as i64);
    }

    /// Draws `required_count` distinct indices from the city's bank.
    async fn sample_questions(&self, city: &City) -> EngineResult<Vec<Question>> {
        if city.question_count < self.required_count {
            return Err(EngineError::QuizLoadFailed(format!(
                "city {} has {} questions, {} required",
                city.id, city.question_count, self.required_count
            )));
        }

        let mut candidates = {
            let mut rng = rand::rng();
            rand::seq::index::sample(&mut rng, city.question_count, city.question_count)
                .into_iter()
        };
        let mut questions = Vec::with_capacity(self.required_count);
        while questions.len() < self.required_count {
            questions.push(self.load_slot(city, &mut candidates).await?);
        }
        Ok(questions)
    }

    /// Fills one question slot. A missing entry is replaced by the next
    /// candidate index, at most `MISSING_QUESTION_RETRIES` times.
    async fn load_slot(
        &self,
        city: &City,
        candidates: &mut impl Iterator<Item = usize>,
    ) -> EngineResult<Question> {
        let mut last_miss = None;
        for attempt in 0..=MISSING_QUESTION_RETRIES {
            let Some(index) = candidates.next() else {
                return Err(EngineError::QuizLoadFailed(format!(
                    "question bank of {} exhausted",
                    city.id
                )));
            };
            match self.fetch_question(&city.id, index).await {
                Ok(question) => return Ok(question),
                Err(err @ EngineError::QuestionMissing { .. }) => {
                    warn!(error = %err, attempt, "Drawing another question");
                    last_miss = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let reason = last_miss.map(|e| e.to_string()).unwrap_or_default();
        Err(EngineError::QuizLoadFailed(format!(
            "gave up after {} retries: {}",
            MISSING_QUESTION_RETRIES, reason
        )))
    }

    async fn fetch_question(&self, city_id: &str, index: usize) -> EngineResult<Question> {
        self.store
            .question(city_id, index)
            .await?
            .ok_or_else(|| EngineError::QuestionMissing {
                city_id: city_id.to_string(),
                index,
            })
    }
}

fn owned_session<'a>(
    sessions: &'a mut HashMap<String, QuizSession>,
    session_id: &str,
    user_id: &str,
) -> EngineResult<&'a mut QuizSession> {
    match sessions.get_mut(session_id) {
        Some(session) if session.user_id == user_id => Ok(session),
        _ => Err(EngineError::SessionNotFound(session_id.to_string())),
    }
}

/// Answer plus distractors in random order.
fn present(question: &Question) -> PresentedQuestion {
    let mut choices: Vec<String> = question
        .distractors
        .iter()
        .cloned()
        .chain(std::iter::once(question.answer.clone()))
        .collect();
    choices.shuffle(&mut rand::rng());
    PresentedQuestion {
        prompt: question.prompt.clone(),
        choices,
    }
}
