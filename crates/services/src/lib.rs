#![forbid(unsafe_code)]

pub mod error;
pub mod grader;
pub mod ledger_service;
pub mod navigator;
pub mod sessions;

pub use lesson_core::Clock;

pub use error::{GraderError, LedgerError, SessionError};
pub use grader::{AssistantGrader, EvaluationRequest, Grader, GraderConfig, GraderResult};
pub use ledger_service::{FeedbackLedgerService, ledger_key};
pub use navigator::{NavigationMetadata, QuestionNavigator};
pub use sessions::{AnswerOutcome, NextStep, SessionController, SessionProgress, SessionReport};
