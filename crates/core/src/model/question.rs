use serde::{Deserialize, Serialize};

use crate::model::ids::QuestionId;

/// How a question expects to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Text,
    Audio,
}

impl QuestionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Text => "text",
            QuestionKind::Audio => "audio",
        }
    }
}

/// A single prompt in a session. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(alias = "question")]
    pub prompt: String,
    #[serde(default)]
    pub hint: String,
    #[serde(default, alias = "evaluatePoints")]
    pub evaluation_points: Vec<String>,
}

impl Question {
    #[must_use]
    pub fn new(id: impl Into<QuestionId>, kind: QuestionKind, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            prompt: prompt.into(),
            hint: String::new(),
            evaluation_points: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    #[must_use]
    pub fn with_evaluation_points<I, S>(mut self, points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evaluation_points = points.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn has_hint(&self) -> bool {
        !self.hint.trim().is_empty()
    }
}
