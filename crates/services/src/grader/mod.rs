pub mod assistant;
pub mod reply;

use async_trait::async_trait;

use lesson_core::model::{FeedbackLedger, Question, Session};

use crate::error::GraderError;

pub use assistant::{AssistantGrader, GraderConfig};
pub use reply::{GraderResult, parse_reply, strip_code_fence};

/// Everything the grader needs to judge one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub session_title: String,
    pub session_level: String,
    pub session_context: String,
    pub session_description: String,
    pub question: Question,
    pub user_input: String,
    pub hint_used: bool,
    pub time_spent_secs: u64,
}

impl EvaluationRequest {
    #[must_use]
    pub fn new(session: &Session, question: &Question, user_input: impl Into<String>) -> Self {
        Self {
            session_title: session.title.clone(),
            session_level: session.level.clone(),
            session_context: session.context.clone(),
            session_description: session.description.clone(),
            question: question.clone(),
            user_input: user_input.into(),
            hint_used: false,
            time_spent_secs: 0,
        }
    }

    #[must_use]
    pub fn with_hint_used(mut self, hint_used: bool) -> Self {
        self.hint_used = hint_used;
        self
    }

    #[must_use]
    pub fn with_time_spent(mut self, secs: u64) -> Self {
        self.time_spent_secs = secs;
        self
    }

    /// Prompt text sent to the assistant.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        let q = &self.question;
        format!(
            "# Answer evaluation\n\n\
             ## Session\n\
             **Title**: {title}\n\
             **Level**: {level}\n\
             **Context**: {context}\n\
             **Description**: {description}\n\n\
             ## Question\n\
             **ID**: {id}\n\
             **Question**: {prompt}\n\
             **Type**: {kind}\n\
             **Evaluation points**: {points}\n\
             **Hint available**: {hint}\n\n\
             ## Learner answer\n\
             **Input**: {input}\n\
             **Hint used**: {hint_used}\n\
             **Time spent**: {secs} seconds\n\n\
             Evaluate the answer and reply ONLY with the JSON object \
             described in your instructions.",
            title = self.session_title,
            level = self.session_level,
            context = self.session_context,
            description = self.session_description,
            id = q.id,
            prompt = q.prompt,
            kind = q.kind.as_str(),
            points = q.evaluation_points.join(", "),
            hint = q.hint,
            input = self.user_input,
            hint_used = self.hint_used,
            secs = self.time_spent_secs,
        )
    }
}

/// External evaluation service.
///
/// Retry and backoff are the implementation's business; callers only see a
/// final result or a failure.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Score one answer.
    ///
    /// # Errors
    ///
    /// Returns `GraderError` on timeout, service failure or a malformed reply.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<GraderResult, GraderError>;

    /// General end-of-session feedback over the whole ledger.
    ///
    /// # Errors
    ///
    /// Returns `GraderError` on timeout, service failure or an empty reply.
    async fn summarize(&self, ledger: &FeedbackLedger) -> Result<String, GraderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::QuestionKind;

    #[test]
    fn prompt_carries_session_question_and_answer() {
        let question = Question::new("q7", QuestionKind::Audio, "Order a coffee")
            .with_hint("Use 'I would like'")
            .with_evaluation_points(["politeness", "vocabulary"]);
        let mut session = Session::new("cafe", "At the cafe", vec![question.clone()]);
        session.level = "A1".into();

        let prompt = EvaluationRequest::new(&session, &question, "One coffee please")
            .with_hint_used(true)
            .with_time_spent(42)
            .to_prompt();

        assert!(prompt.contains("**Title**: At the cafe"));
        assert!(prompt.contains("**Level**: A1"));
        assert!(prompt.contains("**ID**: q7"));
        assert!(prompt.contains("**Type**: audio"));
        assert!(prompt.contains("politeness, vocabulary"));
        assert!(prompt.contains("**Input**: One coffee please"));
        assert!(prompt.contains("**Hint used**: true"));
        assert!(prompt.contains("42 seconds"));
    }
}
