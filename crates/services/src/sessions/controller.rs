use std::fmt;
use std::sync::Arc;

use lesson_core::Clock;
use lesson_core::model::{
    ConversationPhase, ConversationStateMachine, FeedbackEntry, FeedbackLedger, Message,
    MessageKind, Question, Session, Transcript,
};
use storage::repository::KeyValueStore;

use super::progress::{SessionProgress, SessionReport};
use crate::error::{LedgerError, SessionError};
use crate::grader::{EvaluationRequest, Grader, GraderResult};
use crate::ledger_service::FeedbackLedgerService;
use crate::navigator::{NavigationMetadata, QuestionNavigator};

/// Result of a graded answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub entry: FeedbackEntry,
    pub result: GraderResult,
    pub progress: SessionProgress,
}

/// Where the conversation went after leaving `NextPrompt`.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    Question(Question),
    Summary(SessionProgress),
}

/// Answer held while the grader is working on it.
struct PendingAnswer {
    question: Question,
    text: String,
    seconds_spent: u64,
    hint_used: bool,
}

/// Composition root for one learner session.
///
/// Methods take `&mut self`, so while an evaluation is awaiting the grader no
/// other transition, record or navigation can run on the same session.
pub struct SessionController {
    clock: Clock,
    grader: Arc<dyn Grader>,
    ledger: FeedbackLedgerService,
    navigator: QuestionNavigator,
    machine: ConversationStateMachine,
    transcript: Transcript,
    session: Option<Arc<Session>>,
    hint_used: bool,
    pending: Option<PendingAnswer>,
    last_timestamp: i64,
}

impl SessionController {
    #[must_use]
    pub fn new(clock: Clock, store: Arc<dyn KeyValueStore>, grader: Arc<dyn Grader>) -> Self {
        Self {
            clock,
            grader,
            ledger: FeedbackLedgerService::new(store),
            navigator: QuestionNavigator::new(),
            machine: ConversationStateMachine::new(),
            transcript: Transcript::new(),
            session: None,
            hint_used: false,
            pending: None,
            last_timestamp: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ConversationPhase {
        self.machine.current()
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_deref()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.navigator.current()
    }

    #[must_use]
    pub fn navigation(&self) -> NavigationMetadata {
        self.navigator.metadata()
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub fn ledger(&self) -> Option<&FeedbackLedger> {
        self.ledger.ledger()
    }

    #[must_use]
    pub fn is_memory_only(&self) -> bool {
        self.ledger.is_memory_only()
    }

    /// The learner's stored answer to the current question, if any.
    #[must_use]
    pub fn current_answer(&self) -> Option<&str> {
        let question = self.navigator.current()?;
        self.ledger
            .ledger()?
            .entry(&question.id)?
            .user_response
            .as_deref()
    }

    /// # Errors
    ///
    /// Returns `SessionError::Ledger` if no session has been started.
    pub fn progress(&self) -> Result<SessionProgress, SessionError> {
        let ledger = self.ledger.ledger().ok_or(LedgerError::NotLoaded)?;
        Ok(SessionProgress::from_ledger(ledger))
    }

    /// Load `session`, reconcile its ledger and move to `ReadyCheck`.
    ///
    /// Questions that already have a ledger entry are skipped: the navigator
    /// resumes at the first unanswered one. A completed session resumes on
    /// its last question, where answering again replaces the stored verdict;
    /// check `is_complete` on the returned progress and offer `reset` instead.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Definition` for an invalid question list.
    pub async fn start(&mut self, session: Session) -> Result<SessionProgress, SessionError> {
        session.validate()?;
        let session = Arc::new(session);

        let ledger = self.ledger.load(&session).await;
        let progress = SessionProgress::from_ledger(ledger);
        self.last_timestamp = ledger
            .entries()
            .values()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(0);

        self.navigator.load(Arc::clone(&session));
        if let Some(ledger) = self.ledger.ledger() {
            self.navigator.resume_from(ledger);
        }

        self.machine = ConversationStateMachine::new();
        self.machine.transition(ConversationPhase::ReadyCheck)?;
        self.transcript.clear_all();
        self.pending = None;
        self.hint_used = false;

        if let Some(question) = self.navigator.current() {
            self.transcript.set_current(question.id.clone());
            let greeting = if progress.is_complete {
                format!(
                    "Welcome back to \"{}\"! All {} questions are answered. \
                     Reset to start over, or begin to revise the last answer.",
                    session.title, progress.total
                )
            } else {
                format!(
                    "Welcome to \"{}\"! {} of {} questions answered so far. Ready?",
                    session.title, progress.answered, progress.total
                )
            };
            self.transcript
                .push(Message::new(MessageKind::Greeting, greeting, self.clock.now()));
        }

        tracing::info!(
            session = %session.id,
            answered = progress.answered,
            total = progress.total,
            "session started"
        );
        self.session = Some(session);
        Ok(progress)
    }

    /// Leave `ReadyCheck` and ask the current question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted`, `NoQuestion` for an empty session,
    /// or a transition error when not at `ReadyCheck`.
    pub fn begin(&mut self) -> Result<Question, SessionError> {
        if self.session.is_none() {
            return Err(SessionError::NotStarted);
        }
        self.ask()
    }

    fn ask(&mut self) -> Result<Question, SessionError> {
        let question = self
            .navigator
            .current()
            .cloned()
            .ok_or(SessionError::NoQuestion)?;
        self.machine
            .transition_through(&[ConversationPhase::Ask, ConversationPhase::ListenInput])?;
        self.hint_used = false;
        self.transcript.set_current(question.id.clone());
        self.transcript.push(Message::new(
            MessageKind::Assistant,
            question.prompt.clone(),
            self.clock.now(),
        ));
        Ok(question)
    }

    /// Reveal the hint for the current question and flag it as used.
    ///
    /// Returns `None` when the question has no hint.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `ListenInput`.
    pub fn use_hint(&mut self) -> Result<Option<String>, SessionError> {
        self.expect_phase(ConversationPhase::ListenInput)?;
        let question = self.navigator.current().ok_or(SessionError::NoQuestion)?;
        if !question.has_hint() {
            return Ok(None);
        }
        let hint = question.hint.clone();
        self.hint_used = true;
        self.transcript
            .push(Message::new(MessageKind::Hint, hint.clone(), self.clock.now()));
        Ok(Some(hint))
    }

    /// Submit the learner's answer and wait for the grader.
    ///
    /// On grader failure the conversation stays at `Evaluate` with the answer
    /// kept; call [`SessionController::retry_evaluation`] to try again.
    ///
    /// # Errors
    ///
    /// Returns a transition error when not listening, `SessionError::Grader`
    /// when evaluation fails.
    pub async fn submit_answer(
        &mut self,
        text: &str,
        seconds_spent: u64,
    ) -> Result<AnswerOutcome, SessionError> {
        let question = self
            .navigator
            .current()
            .cloned()
            .ok_or(SessionError::NoQuestion)?;
        self.machine.transition(ConversationPhase::Evaluate)?;
        self.transcript
            .push(Message::new(MessageKind::User, text, self.clock.now()));
        self.pending = Some(PendingAnswer {
            question,
            text: text.to_owned(),
            seconds_spent,
            hint_used: self.hint_used,
        });
        self.evaluate_pending().await
    }

    /// Re-run the grader on the answer left pending by a failed evaluation.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `Evaluate`,
    /// `NoPendingAnswer`, or `SessionError::Grader` if it fails again.
    pub async fn retry_evaluation(&mut self) -> Result<AnswerOutcome, SessionError> {
        self.evaluate_pending().await
    }

    async fn evaluate_pending(&mut self) -> Result<AnswerOutcome, SessionError> {
        self.expect_phase(ConversationPhase::Evaluate)?;
        let session = self.session.clone().ok_or(SessionError::NotStarted)?;
        let pending = self.pending.as_ref().ok_or(SessionError::NoPendingAnswer)?;
        let question_id = pending.question.id.clone();
        let hint_used = pending.hint_used;
        let answer = pending.text.clone();
        let request = EvaluationRequest::new(&session, &pending.question, pending.text.clone())
            .with_hint_used(hint_used)
            .with_time_spent(pending.seconds_spent);

        let waiting = Message::new(
            MessageKind::Waiting,
            "Evaluating your answer...",
            self.clock.now(),
        );
        let waiting_id = waiting.id;
        self.transcript.push(waiting);

        let outcome = self.grader.evaluate(&request).await;
        self.transcript.remove(waiting_id);

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(question = %question_id, %err, "evaluation failed");
                self.transcript.push(Message::new(
                    MessageKind::Error,
                    format!("We could not evaluate your answer: {err}"),
                    self.clock.now(),
                ));
                return Err(err.into());
            }
        };

        let timestamp = self.next_timestamp();
        let entry = FeedbackEntry::new(
            question_id.clone(),
            &result.decision,
            result.score,
            hint_used,
            timestamp,
        )
        .with_criteria(result.criteria.clone())
        .with_free_text(result.feedback.clone())
        .with_user_response(answer);

        let ledger = self.ledger.record(entry.clone()).await?;
        let progress = SessionProgress::from_ledger(ledger);
        self.navigator.mark_answered(question_id);
        self.pending = None;

        self.machine.transition(ConversationPhase::Feedback)?;
        self.transcript.push(Message::new(
            MessageKind::Feedback,
            FeedbackText(&result).to_string(),
            self.clock.now(),
        ));
        self.machine.transition(ConversationPhase::NextPrompt)?;

        Ok(AnswerOutcome {
            entry,
            result,
            progress,
        })
    }

    /// Try the current question again: drop its feedback and ask it anew.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `NextPrompt`.
    pub async fn retry_question(&mut self) -> Result<Question, SessionError> {
        self.expect_phase(ConversationPhase::NextPrompt)?;
        self.navigator.reset_current(&mut self.ledger).await?;
        self.transcript.clear_current();
        self.machine
            .transition_through(&[ConversationPhase::Feedback, ConversationPhase::NextPrompt])?;
        self.ask()
    }

    /// Move on: ask the next question, or go to `Summary` after the last one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `NextPrompt`.
    pub fn continue_next(&mut self) -> Result<NextStep, SessionError> {
        self.expect_phase(ConversationPhase::NextPrompt)?;
        if self.navigator.advance() {
            return self.ask().map(NextStep::Question);
        }
        self.machine.transition(ConversationPhase::Summary)?;
        Ok(NextStep::Summary(self.progress()?))
    }

    /// Go back and ask the previous question.
    ///
    /// Returns `None` (staying at `NextPrompt`) on the first question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `NextPrompt`.
    pub fn previous_question(&mut self) -> Result<Option<Question>, SessionError> {
        self.expect_phase(ConversationPhase::NextPrompt)?;
        if !self.navigator.go_back() {
            return Ok(None);
        }
        self.ask().map(Some)
    }

    /// Leave `Summary` for `Exit`, optionally asking for general feedback.
    ///
    /// A failing summary request is logged and leaves `general_feedback` empty.
    ///
    /// # Errors
    ///
    /// Returns a transition error when not at `Summary`.
    pub async fn finish(
        &mut self,
        request_general_feedback: bool,
    ) -> Result<SessionReport, SessionError> {
        self.machine.transition(ConversationPhase::Exit)?;
        let progress = self.progress()?;

        let mut general_feedback = None;
        if request_general_feedback {
            if let Some(ledger) = self.ledger.ledger() {
                match self.grader.summarize(ledger).await {
                    Ok(text) => general_feedback = Some(text),
                    Err(err) => tracing::warn!(%err, "general feedback unavailable"),
                }
            }
        }

        Ok(SessionReport {
            progress,
            general_feedback,
        })
    }

    /// Erase the stored ledger and start the same session from scratch.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` if no session was started.
    pub async fn reset(&mut self) -> Result<SessionProgress, SessionError> {
        let session = self.session.clone().ok_or(SessionError::NotStarted)?;
        self.ledger.clear().await?;
        self.last_timestamp = 0;
        tracing::info!(session = %session.id, "session reset");
        self.start(Session::clone(&session)).await
    }

    fn expect_phase(&self, expected: ConversationPhase) -> Result<(), SessionError> {
        let actual = self.machine.current();
        if actual == expected {
            Ok(())
        } else {
            Err(SessionError::WrongPhase { expected, actual })
        }
    }

    /// Strictly increasing entry timestamp, even with a fixed clock.
    fn next_timestamp(&mut self) -> i64 {
        let ts = self.clock.now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("session", &self.session.as_ref().map(|s| s.id.clone()))
            .field("phase", &self.machine.current())
            .field("current_index", &self.navigator.current_index())
            .field("pending", &self.pending.is_some())
            .field("memory_only", &self.ledger.is_memory_only())
            .finish_non_exhaustive()
    }
}

/// Learner-facing rendering of a grader verdict.
struct FeedbackText<'a>(&'a GraderResult);

impl fmt::Display for FeedbackText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        write!(f, "{}", result.feedback)?;
        if let Some(corrections) = &result.corrections {
            write!(f, "\n\nCorrections: {corrections}")?;
        }
        if !result.tips.trim().is_empty() {
            write!(f, "\n\nTip: {}", result.tips)?;
        }
        Ok(())
    }
}
