use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::ids::{MessageId, QuestionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Assistant,
    User,
    Hint,
    Feedback,
    Greeting,
    Waiting,
    Error,
}

/// One conversational turn shown to the learner.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn new(kind: MessageKind, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            kind,
            content: content.into(),
            timestamp,
        }
    }
}

/// Per-question chat history for the current run. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    chats: HashMap<QuestionId, Vec<Message>>,
    current: Option<QuestionId>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&mut self, question_id: QuestionId) {
        self.chats.entry(question_id.clone()).or_default();
        tracing::debug!(question = %question_id, "switched transcript");
        self.current = Some(question_id);
    }

    #[must_use]
    pub fn current(&self) -> Option<&QuestionId> {
        self.current.as_ref()
    }

    /// Append to the current question's history.
    ///
    /// Returns `false` (and drops the message) when no question is selected.
    pub fn push(&mut self, message: Message) -> bool {
        let Some(current) = self.current.as_ref() else {
            tracing::warn!("cannot add message: no current question set");
            return false;
        };
        self.chats.entry(current.clone()).or_default().push(message);
        true
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.current
            .as_ref()
            .map_or(&[], |current| self.messages_for(current))
    }

    #[must_use]
    pub fn messages_for(&self, question_id: &QuestionId) -> &[Message] {
        self.chats.get(question_id).map_or(&[], Vec::as_slice)
    }

    pub fn remove(&mut self, id: MessageId) {
        if let Some(messages) = self
            .current
            .as_ref()
            .and_then(|current| self.chats.get_mut(current))
        {
            messages.retain(|message| message.id != id);
        }
    }

    pub fn clear_current(&mut self) {
        if let Some(current) = self.current.clone() {
            self.clear_for(&current);
        }
    }

    pub fn clear_for(&mut self, question_id: &QuestionId) {
        self.chats.insert(question_id.clone(), Vec::new());
        tracing::debug!(question = %question_id, "cleared transcript");
    }

    pub fn clear_all(&mut self) {
        self.chats.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn msg(kind: MessageKind, text: &str) -> Message {
        Message::new(kind, text, fixed_now())
    }

    #[test]
    fn push_without_current_question_is_dropped() {
        let mut transcript = Transcript::new();
        assert!(!transcript.push(msg(MessageKind::Greeting, "hello")));
        assert!(transcript.messages().is_empty());
    }

    #[test]
    fn histories_are_kept_per_question() {
        let mut transcript = Transcript::new();
        transcript.set_current(QuestionId::new("q1"));
        transcript.push(msg(MessageKind::Assistant, "first?"));
        transcript.push(msg(MessageKind::User, "answer"));

        transcript.set_current(QuestionId::new("q2"));
        transcript.push(msg(MessageKind::Assistant, "second?"));

        assert_eq!(transcript.messages().len(), 1);
        assert_eq!(transcript.messages_for(&QuestionId::new("q1")).len(), 2);
    }

    #[test]
    fn remove_and_clear_only_touch_current() {
        let mut transcript = Transcript::new();
        transcript.set_current(QuestionId::new("q1"));
        transcript.push(msg(MessageKind::Assistant, "keep"));
        transcript.set_current(QuestionId::new("q2"));
        let waiting = msg(MessageKind::Waiting, "grading...");
        let waiting_id = waiting.id;
        transcript.push(waiting);
        transcript.push(msg(MessageKind::Feedback, "nice"));

        transcript.remove(waiting_id);
        assert_eq!(transcript.messages().len(), 1);
        assert_eq!(transcript.messages()[0].kind, MessageKind::Feedback);

        transcript.clear_current();
        assert!(transcript.messages().is_empty());
        assert_eq!(transcript.messages_for(&QuestionId::new("q1")).len(), 1);
    }
}
