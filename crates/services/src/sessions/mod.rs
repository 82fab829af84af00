mod controller;
mod progress;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use controller::{AnswerOutcome, NextStep, SessionController};
pub use progress::{SessionProgress, SessionReport};
