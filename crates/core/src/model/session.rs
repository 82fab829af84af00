use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{QuestionId, SessionId};
use crate::model::question::Question;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionDefinitionError {
    #[error("session id must not be empty")]
    MissingId,

    #[error("question id must not be empty (position {index})")]
    BlankQuestionId { index: usize },

    #[error("duplicate question id: {0}")]
    DuplicateQuestion(QuestionId),

    #[error("invalid session definition: {0}")]
    Parse(String),
}

/// Descriptive data that travels with a session definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMetadata {
    #[serde(alias = "duration")]
    pub duration_minutes: u32,
    pub difficulty: String,
    pub tags: Vec<String>,
}

/// An ordered question list plus the context a grader needs.
///
/// Loaded once per run and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub level: String,
    #[serde(default, alias = "activityContext")]
    pub context: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl Session {
    #[must_use]
    pub fn new(
        id: impl Into<SessionId>,
        title: impl Into<String>,
        questions: Vec<Question>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            level: String::new(),
            context: String::new(),
            description: String::new(),
            questions,
            metadata: SessionMetadata::default(),
        }
    }

    /// Parse and validate a session definition from JSON.
    ///
    /// # Errors
    ///
    /// Returns `SessionDefinitionError::Parse` for malformed JSON, or any
    /// error from [`Session::validate`].
    pub fn from_json(raw: &str) -> Result<Self, SessionDefinitionError> {
        let session: Session =
            serde_json::from_str(raw).map_err(|e| SessionDefinitionError::Parse(e.to_string()))?;
        session.validate()?;
        Ok(session)
    }

    /// Check that the session has an id and that question ids are unique.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), SessionDefinitionError> {
        if self.id.as_str().trim().is_empty() {
            return Err(SessionDefinitionError::MissingId);
        }
        let mut seen = HashSet::with_capacity(self.questions.len());
        for (index, question) in self.questions.iter().enumerate() {
            if question.id.is_blank() {
                return Err(SessionDefinitionError::BlankQuestionId { index });
            }
            if !seen.insert(&question.id) {
                return Err(SessionDefinitionError::DuplicateQuestion(question.id.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    #[must_use]
    pub fn position_of(&self, id: &QuestionId) -> Option<usize> {
        self.questions.iter().position(|q| &q.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::question::QuestionKind;

    fn q(id: &str) -> Question {
        Question::new(id, QuestionKind::Text, format!("prompt {id}"))
    }

    #[test]
    fn parses_activity_style_definition() {
        let raw = r#"{
            "id": "travel-1",
            "title": "At the airport",
            "level": "A2",
            "activityContext": "Check-in desk",
            "description": "Practice check-in dialogue",
            "questions": [
                {"id": "q1", "type": "text", "question": "Where are you flying?"},
                {"id": "q2", "type": "audio", "question": "Any bags to check?"}
            ],
            "metadata": {"duration": 10, "difficulty": "easy", "tags": ["travel"]}
        }"#;
        let session = Session::from_json(raw).unwrap();
        assert_eq!(session.question_count(), 2);
        assert_eq!(session.context, "Check-in desk");
        assert_eq!(session.metadata.duration_minutes, 10);
        assert_eq!(session.position_of(&QuestionId::new("q2")), Some(1));
    }

    #[test]
    fn rejects_duplicate_question_ids() {
        let session = Session::new("s1", "Dupes", vec![q("q1"), q("q1")]);
        let err = session.validate().unwrap_err();
        assert_eq!(
            err,
            SessionDefinitionError::DuplicateQuestion(QuestionId::new("q1"))
        );
    }

    #[test]
    fn rejects_blank_question_ids() {
        let session = Session::new("s1", "Blank", vec![q("q1"), q(" ")]);
        assert!(matches!(
            session.validate(),
            Err(SessionDefinitionError::BlankQuestionId { index: 1 })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Session::from_json("{ not json").unwrap_err();
        assert!(matches!(err, SessionDefinitionError::Parse(_)));
    }
}
