use std::collections::HashSet;
use std::sync::Arc;

use lesson_core::model::{FeedbackLedger, Question, QuestionId, Session};

use crate::error::LedgerError;
use crate::ledger_service::FeedbackLedgerService;

/// Navigation state exposed to a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationMetadata {
    pub can_go_back: bool,
    pub can_go_next: bool,
    pub current_index: usize,
    pub total_questions: usize,
    pub current_question_answered: bool,
}

/// Position in the question list plus the questions answered in this run.
///
/// The answered set is scoped to the in-memory run and cleared on `load`;
/// the ledger is the durable view of what has been answered.
#[derive(Debug, Default)]
pub struct QuestionNavigator {
    session: Option<Arc<Session>>,
    current_index: usize,
    answered: HashSet<QuestionId>,
}

impl QuestionNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, session: Arc<Session>) {
        self.session = Some(session);
        self.current_index = 0;
        self.answered.clear();
    }

    /// Seed the answered set from the ledger and move to the first question
    /// that has no entry yet. When every question has one, the position ends
    /// on the last question.
    pub fn resume_from(&mut self, ledger: &FeedbackLedger) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        self.answered = session
            .questions
            .iter()
            .filter(|q| ledger.contains(&q.id))
            .map(|q| q.id.clone())
            .collect();
        self.current_index = session
            .questions
            .iter()
            .position(|q| !ledger.contains(&q.id))
            .unwrap_or_else(|| session.question_count().saturating_sub(1));
    }

    #[must_use]
    pub fn current(&self) -> Option<&Question> {
        self.session.as_ref()?.question(self.current_index)
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.question_count())
    }

    /// Move to the next question. Never moves past the last one.
    pub fn advance(&mut self) -> bool {
        if self.current_index + 1 < self.total() {
            self.current_index += 1;
            true
        } else {
            false
        }
    }

    /// Move to the previous question. Never moves before the first one.
    pub fn go_back(&mut self) -> bool {
        if self.current_index > 0 && self.total() > 0 {
            self.current_index -= 1;
            true
        } else {
            false
        }
    }

    pub fn mark_answered(&mut self, question_id: QuestionId) {
        self.answered.insert(question_id);
        tracing::debug!(answered = self.answered.len(), "question marked as answered");
    }

    #[must_use]
    pub fn is_answered(&self, question_id: &QuestionId) -> bool {
        self.answered.contains(question_id)
    }

    /// Durable view: whether the ledger holds an entry for `question_id`.
    #[must_use]
    pub fn is_answered_in_ledger(ledger: &FeedbackLedger, question_id: &QuestionId) -> bool {
        ledger.contains(question_id)
    }

    /// Forget the current question's answer, here and in the ledger.
    ///
    /// Returns the id that was reset, or `None` when no question is active.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::NotLoaded` if the ledger has not been loaded.
    pub async fn reset_current(
        &mut self,
        ledger: &mut FeedbackLedgerService,
    ) -> Result<Option<QuestionId>, LedgerError> {
        let Some(question_id) = self.current().map(|q| q.id.clone()) else {
            return Ok(None);
        };
        self.answered.remove(&question_id);
        ledger.remove(&question_id).await?;
        tracing::info!(question = %question_id, "question reset for retry");
        Ok(Some(question_id))
    }

    #[must_use]
    pub fn metadata(&self) -> NavigationMetadata {
        let total = self.total();
        NavigationMetadata {
            can_go_back: self.current_index > 0,
            can_go_next: self.current_index + 1 < total,
            current_index: self.current_index,
            total_questions: total,
            current_question_answered: self.current().is_some_and(|q| self.is_answered(&q.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::{FeedbackEntry, QuestionKind};
    use storage::repository::InMemoryStore;

    fn session(n: usize) -> Arc<Session> {
        let questions = (1..=n)
            .map(|i| Question::new(format!("q{i}").as_str(), QuestionKind::Text, "prompt"))
            .collect();
        Arc::new(Session::new("s1", "Navigation", questions))
    }

    #[test]
    fn current_is_none_before_load() {
        let nav = QuestionNavigator::new();
        assert!(nav.current().is_none());
        assert_eq!(nav.total(), 0);
    }

    #[test]
    fn advance_stops_at_last_question() {
        let mut nav = QuestionNavigator::new();
        nav.load(session(2));
        assert_eq!(nav.current().unwrap().id, QuestionId::new("q1"));
        assert!(nav.advance());
        assert_eq!(nav.current().unwrap().id, QuestionId::new("q2"));
        assert!(!nav.advance());
        assert_eq!(nav.current_index(), 1);
    }

    #[test]
    fn go_back_stops_at_first_question() {
        let mut nav = QuestionNavigator::new();
        nav.load(session(2));
        assert!(!nav.go_back());
        nav.advance();
        assert!(nav.go_back());
        assert_eq!(nav.current_index(), 0);
    }

    #[test]
    fn load_clears_session_scoped_answers() {
        let mut nav = QuestionNavigator::new();
        nav.load(session(2));
        nav.mark_answered(QuestionId::new("q1"));
        assert!(nav.is_answered(&QuestionId::new("q1")));

        nav.load(session(2));
        assert!(!nav.is_answered(&QuestionId::new("q1")));
        assert_eq!(nav.current_index(), 0);
    }

    #[test]
    fn resume_positions_on_first_unanswered() {
        let s = session(3);
        let mut ledger = FeedbackLedger::fresh(&s);
        ledger.upsert(FeedbackEntry::new(QuestionId::new("q1"), "correct", 1.0, false, 1));
        ledger.upsert(FeedbackEntry::new(QuestionId::new("q3"), "correct", 1.0, false, 2));

        let mut nav = QuestionNavigator::new();
        nav.load(s);
        nav.resume_from(&ledger);
        assert_eq!(nav.current().unwrap().id, QuestionId::new("q2"));
        assert!(nav.is_answered(&QuestionId::new("q3")));
        assert!(QuestionNavigator::is_answered_in_ledger(
            &ledger,
            &QuestionId::new("q1")
        ));
    }

    #[test]
    fn metadata_reflects_position() {
        let mut nav = QuestionNavigator::new();
        nav.load(session(3));
        nav.advance();
        nav.mark_answered(QuestionId::new("q2"));
        assert_eq!(
            nav.metadata(),
            NavigationMetadata {
                can_go_back: true,
                can_go_next: true,
                current_index: 1,
                total_questions: 3,
                current_question_answered: true,
            }
        );
    }

    #[tokio::test]
    async fn reset_current_removes_ledger_entry() {
        let s = session(2);
        let mut ledger = FeedbackLedgerService::new(Arc::new(InMemoryStore::new()));
        ledger.load(&s).await;
        ledger
            .record(FeedbackEntry::new(QuestionId::new("q1"), "correct", 9.0, false, 1))
            .await
            .unwrap();

        let mut nav = QuestionNavigator::new();
        nav.load(s);
        nav.mark_answered(QuestionId::new("q1"));

        let reset = nav.reset_current(&mut ledger).await.unwrap();
        assert_eq!(reset, Some(QuestionId::new("q1")));
        assert!(!nav.is_answered(&QuestionId::new("q1")));
        let stored = ledger.ledger().unwrap();
        assert!(!stored.contains(&QuestionId::new("q1")));
        assert_eq!(stored.correct(), 0);
    }
}
