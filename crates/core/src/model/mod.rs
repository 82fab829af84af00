mod feedback;
mod ids;
mod ledger;
mod phase;
mod question;
mod session;
mod transcript;

pub use ids::{MessageId, QuestionId, SessionId};

pub use feedback::{Criteria, Decision, FeedbackEntry, normalize_decision_label};
pub use ledger::{
    DecisionCounts, FeedbackLedger, LEDGER_SCHEMA_VERSION, ReconcileError, ReconcileReport,
};
pub use phase::{ConversationPhase, ConversationStateMachine, TransitionError};
pub use question::{Question, QuestionKind};
pub use session::{Session, SessionDefinitionError, SessionMetadata};
pub use transcript::{Message, MessageKind, Transcript};
