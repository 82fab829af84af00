//! Shared error types for the services crate.

use thiserror::Error;

use lesson_core::model::{ConversationPhase, SessionDefinitionError, TransitionError};

/// Errors emitted by `FeedbackLedgerService`.
///
/// Store failures never show up here: they are absorbed by the service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    #[error("no feedback ledger is loaded")]
    NotLoaded,
}

/// Errors emitted by a `Grader`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GraderError {
    #[error("grader is not configured")]
    Disabled,
    #[error("grader request failed with status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("grader run failed: {0}")]
    RunFailed(String),
    #[error("grader run expired")]
    Expired,
    #[error("timed out waiting for grader after {attempts} polls")]
    Timeout { attempts: u32 },
    #[error("grader returned no reply")]
    EmptyResponse,
    #[error("grader reply is malformed: {0}")]
    Malformed(String),
}

/// Errors emitted by `SessionController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no session has been started")]
    NotStarted,
    #[error("no question is active")]
    NoQuestion,
    #[error("no answer is waiting for evaluation")]
    NoPendingAnswer,
    #[error("operation requires {expected}, conversation is at {actual}")]
    WrongPhase {
        expected: ConversationPhase,
        actual: ConversationPhase,
    },
    #[error(transparent)]
    Definition(#[from] SessionDefinitionError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Grader(#[from] GraderError),
}
