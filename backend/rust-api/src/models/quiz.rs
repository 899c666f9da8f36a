use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::geo::Coordinate;
use crate::error::{EngineError, EngineResult};

/// Entry of a per-city question bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub city_id: String,
    pub index: usize,
    pub prompt: String,
    pub answer: String,
    pub distractors: Vec<String>,
}

/// Question as shown to the player: no marked answer, choices shuffled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentedQuestion {
    pub prompt: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    AwaitingQuestions,
    InProgress,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    WrongAnswer,
    Timeout,
    Abandoned,
}

/// One timed trivia attempt gating a capture.
#[derive(Debug, Clone)]
pub struct QuizSession {
    pub id: String,
    pub user_id: String,
    pub location_id: String,
    pub city_id: String,
    pub required_count: usize,
    pub correct_count: usize,
    pub current_index: usize,
    pub status: QuizStatus,
    pub loss_reason: Option<LossReason>,
    /// Set when starting this attempt opened a contest on an owned location.
    pub opened_contest: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    per_question: Duration,
    deadline: Option<DateTime<Utc>>,
    questions: Vec<Question>,
    presented: Vec<PresentedQuestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub status: QuizStatus,
    pub loss_reason: Option<LossReason>,
}

impl QuizSession {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        location_id: impl Into<String>,
        city_id: impl Into<String>,
        required_count: usize,
        per_question: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            location_id: location_id.into(),
            city_id: city_id.into(),
            required_count,
            correct_count: 0,
            current_index: 0,
            status: QuizStatus::AwaitingQuestions,
            loss_reason: None,
            opened_contest: false,
            started_at: now,
            finished_at: None,
            per_question,
            deadline: None,
            questions: Vec::new(),
            presented: Vec::new(),
        }
    }

    /// Moves `AwaitingQuestions -> InProgress`. `presented` must be parallel to
    /// `questions`.
    pub fn load_questions(
        &mut self,
        questions: Vec<Question>,
        presented: Vec<PresentedQuestion>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.status != QuizStatus::AwaitingQuestions {
            return Err(EngineError::validation("Quiz questions already loaded"));
        }
        if questions.len() != self.required_count || presented.len() != questions.len() {
            return Err(EngineError::QuizLoadFailed(format!(
                "expected {} questions, got {}",
                self.required_count,
                questions.len()
            )));
        }
        self.questions = questions;
        self.presented = presented;
        self.status = QuizStatus::InProgress;
        self.deadline = Some(now + self.per_question);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, QuizStatus::Won | QuizStatus::Lost)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn current_question(&self) -> Option<&PresentedQuestion> {
        if self.status == QuizStatus::InProgress {
            self.presented.get(self.current_index)
        } else {
            None
        }
    }

    /// Fires the per-question deadline. Returns true if this call ended the quiz.
    pub fn timeout(&mut self, now: DateTime<Utc>) -> bool {
        match (self.status, self.deadline) {
            (QuizStatus::InProgress, Some(deadline)) if now > deadline => {
                self.lose(LossReason::Timeout, now);
                true
            }
            _ => false,
        }
    }

    /// Foreground focus lost. Ends any non-terminal session.
    pub fn abandon(&mut self, now: DateTime<Utc>) {
        if !self.is_terminal() {
            self.lose(LossReason::Abandoned, now);
        }
    }

    pub fn answer(&mut self, submitted: &str, now: DateTime<Utc>) -> EngineResult<AnswerOutcome> {
        let submitted = submitted.trim();
        if submitted.is_empty() {
            return Err(EngineError::validation("Answer must not be empty"));
        }
        if self.status != QuizStatus::InProgress {
            return Err(EngineError::validation(format!(
                "Quiz is not in progress ({:?})",
                self.status
            )));
        }

        if self.timeout(now) {
            return Ok(self.outcome(false));
        }

        let question = self
            .questions
            .get(self.current_index)
            .ok_or_else(|| EngineError::QuizLoadFailed("question index out of range".into()))?;

        if submitted == question.answer.trim() {
            self.correct_count += 1;
            self.current_index += 1;
            if self.correct_count == self.required_count {
                self.status = QuizStatus::Won;
                self.deadline = None;
                self.finished_at = Some(now);
            } else {
                self.deadline = Some(now + self.per_question);
            }
            Ok(self.outcome(true))
        } else {
            self.lose(LossReason::WrongAnswer, now);
            Ok(self.outcome(false))
        }
    }

    pub fn view(&self) -> QuizSessionView {
        QuizSessionView {
            session_id: self.id.clone(),
            location_id: self.location_id.clone(),
            status: self.status,
            loss_reason: self.loss_reason,
            correct_count: self.correct_count,
            required_count: self.required_count,
            current_question: self.current_question().cloned(),
            deadline: self.deadline,
        }
    }

    fn lose(&mut self, reason: LossReason, now: DateTime<Utc>) {
        self.status = QuizStatus::Lost;
        self.loss_reason = Some(reason);
        self.deadline = None;
        self.finished_at = Some(now);
    }

    fn outcome(&self, correct: bool) -> AnswerOutcome {
        AnswerOutcome {
            correct,
            status: self.status,
            loss_reason: self.loss_reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSessionView {
    pub session_id: String,
    pub location_id: String,
    pub status: QuizStatus,
    pub loss_reason: Option<LossReason>,
    pub correct_count: usize,
    pub required_count: usize,
    pub current_question: Option<PresentedQuestion>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartQuizRequest {
    #[validate(length(min = 1, message = "location_id is required"))]
    pub location_id: String,
    #[validate(nested)]
    pub position: Coordinate,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 500, message = "Answer must be between 1 and 500 characters"))]
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    pub correct: bool,
    pub session: QuizSessionView,
}
