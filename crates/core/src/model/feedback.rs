use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ids::QuestionId;

//
// ─── DECISION ─────────────────────────────────────────────────────────────────
//

/// Closed set of verdicts a grader can reach for one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Correct,
    Partial,
    Incorrect,
}

/// Accepted spellings, matched after trimming and lowercasing.
const DECISION_SYNONYMS: &[(&str, Decision)] = &[
    ("correct", Decision::Correct),
    ("correcto", Decision::Correct),
    ("partial", Decision::Partial),
    ("parcial", Decision::Partial),
    ("incorrect", Decision::Incorrect),
    ("incorrecto", Decision::Incorrect),
];

impl Decision {
    /// Map a raw grader decision onto the closed enum.
    ///
    /// Returns `None` for anything outside the synonym table.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        DECISION_SYNONYMS
            .iter()
            .find(|(label, _)| *label == lowered)
            .map(|(_, decision)| *decision)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Correct => "correct",
            Decision::Partial => "partial",
            Decision::Incorrect => "incorrect",
        }
    }
}

/// Canonical stored form of a raw decision string.
///
/// Recognized values collapse to their English label; anything else is kept
/// lowercased so it can still be inspected later.
#[must_use]
pub fn normalize_decision_label(raw: &str) -> String {
    match Decision::normalize(raw) {
        Some(decision) => decision.as_str().to_owned(),
        None => raw.trim().to_lowercase(),
    }
}

//
// ─── FEEDBACK ENTRY ───────────────────────────────────────────────────────────
//

/// Named sub-scores reported by the grader (e.g. `grammaticalCorrectness`).
pub type Criteria = BTreeMap<String, f64>;

/// Graded outcome for a single question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub question_id: QuestionId,
    decision: String,
    pub score: f64,
    #[serde(default)]
    pub criteria: Criteria,
    #[serde(default)]
    pub hint_used: bool,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_text: Option<String>,
    /// The learner's own answer, kept so it can be shown again on return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_response: Option<String>,
}

impl FeedbackEntry {
    #[must_use]
    pub fn new(
        question_id: QuestionId,
        decision: &str,
        score: f64,
        hint_used: bool,
        timestamp: i64,
    ) -> Self {
        Self {
            question_id,
            decision: normalize_decision_label(decision),
            score,
            criteria: Criteria::new(),
            hint_used,
            timestamp,
            free_text: None,
            user_response: None,
        }
    }

    #[must_use]
    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    #[must_use]
    pub fn with_free_text(mut self, text: impl Into<String>) -> Self {
        self.free_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_user_response(mut self, text: impl Into<String>) -> Self {
        self.user_response = Some(text.into());
        self
    }

    /// Stored (normalized) decision label.
    #[must_use]
    pub fn decision_label(&self) -> &str {
        &self.decision
    }

    /// Parsed decision, `None` if the label is not recognized.
    #[must_use]
    pub fn decision(&self) -> Option<Decision> {
        Decision::normalize(&self.decision)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilingual_synonyms_normalize() {
        assert_eq!(Decision::normalize("Correcto"), Some(Decision::Correct));
        assert_eq!(Decision::normalize("PARCIAL"), Some(Decision::Partial));
        assert_eq!(Decision::normalize(" incorrect "), Some(Decision::Incorrect));
        assert_eq!(Decision::normalize("Incorrecto"), Some(Decision::Incorrect));
    }

    #[test]
    fn unknown_decision_is_none() {
        assert_eq!(Decision::normalize("maybe"), None);
        assert_eq!(Decision::normalize(""), None);
    }

    #[test]
    fn entry_stores_canonical_label() {
        let entry = FeedbackEntry::new(QuestionId::new("q1"), "CORRECTO", 9.0, false, 1);
        assert_eq!(entry.decision_label(), "correct");
        assert_eq!(entry.decision(), Some(Decision::Correct));

        let odd = FeedbackEntry::new(QuestionId::new("q2"), "Needs Work", 3.0, false, 2);
        assert_eq!(odd.decision_label(), "needs work");
        assert_eq!(odd.decision(), None);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let entry = FeedbackEntry::new(QuestionId::new("q1"), "partial", 5.5, true, 10)
            .with_free_text("close enough");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["questionId"], "q1");
        assert_eq!(value["hintUsed"], true);
        assert_eq!(value["freeText"], "close enough");
        assert!(value.get("userResponse").is_none());

        let answered = entry.with_user_response("Hola, buenos dias");
        let value = serde_json::to_value(&answered).unwrap();
        assert_eq!(value["userResponse"], "Hola, buenos dias");
    }
}
