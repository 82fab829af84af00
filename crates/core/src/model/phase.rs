use std::fmt;
use thiserror::Error;

//
// ─── PHASE ────────────────────────────────────────────────────────────────────
//

/// Step of the question/answer/feedback cycle.
///
/// `Init` is the only initial phase and `Exit` the only terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationPhase {
    Init,
    ReadyCheck,
    Ask,
    ListenInput,
    Evaluate,
    Feedback,
    NextPrompt,
    Summary,
    Exit,
}

impl ConversationPhase {
    pub const ALL: [ConversationPhase; 9] = [
        ConversationPhase::Init,
        ConversationPhase::ReadyCheck,
        ConversationPhase::Ask,
        ConversationPhase::ListenInput,
        ConversationPhase::Evaluate,
        ConversationPhase::Feedback,
        ConversationPhase::NextPrompt,
        ConversationPhase::Summary,
        ConversationPhase::Exit,
    ];

    /// Phases reachable in one step from `self`.
    ///
    /// `NextPrompt -> Feedback` is the "try again" edge; nothing advances past
    /// `Feedback` without an explicit choice at `NextPrompt`.
    #[must_use]
    pub fn allowed_targets(self) -> &'static [ConversationPhase] {
        use ConversationPhase::{
            Ask, Evaluate, Exit, Feedback, Init, ListenInput, NextPrompt, ReadyCheck, Summary,
        };
        match self {
            Init => &[ReadyCheck],
            ReadyCheck => &[Ask],
            Ask => &[ListenInput],
            ListenInput => &[Evaluate],
            Evaluate => &[Feedback],
            Feedback => &[NextPrompt],
            NextPrompt => &[Ask, Summary, Feedback],
            Summary => &[Exit],
            Exit => &[],
        }
    }

    #[must_use]
    pub fn can_reach(self, target: ConversationPhase) -> bool {
        self.allowed_targets().contains(&target)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationPhase::Init => "INIT",
            ConversationPhase::ReadyCheck => "READY_CHECK",
            ConversationPhase::Ask => "ASK",
            ConversationPhase::ListenInput => "LISTEN_INPUT",
            ConversationPhase::Evaluate => "EVALUATE",
            ConversationPhase::Feedback => "FEEDBACK",
            ConversationPhase::NextPrompt => "NEXT_PROMPT",
            ConversationPhase::Summary => "SUMMARY",
            ConversationPhase::Exit => "EXIT",
        }
    }
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransitionError {
    #[error("invalid transition from {from} to {to}; allowed: {}", format_allowed(.allowed))]
    Illegal {
        from: ConversationPhase,
        to: ConversationPhase,
        allowed: &'static [ConversationPhase],
    },
}

fn format_allowed(allowed: &[ConversationPhase]) -> String {
    if allowed.is_empty() {
        return "none".to_owned();
    }
    allowed
        .iter()
        .map(|phase| phase.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

//
// ─── MACHINE ──────────────────────────────────────────────────────────────────
//

/// Owns the single active phase of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStateMachine {
    current: ConversationPhase,
}

impl Default for ConversationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ConversationPhase::Init,
        }
    }

    #[must_use]
    pub fn current(&self) -> ConversationPhase {
        self.current
    }

    #[must_use]
    pub fn can_transition(&self, target: ConversationPhase) -> bool {
        self.current.can_reach(target)
    }

    /// Move to `target` if the edge exists.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError::Illegal` carrying the attempted edge and the
    /// allowed set; the current phase is left untouched.
    pub fn transition(&mut self, target: ConversationPhase) -> Result<(), TransitionError> {
        if !self.can_transition(target) {
            let err = TransitionError::Illegal {
                from: self.current,
                to: target,
                allowed: self.current.allowed_targets(),
            };
            tracing::warn!(%err, "rejected phase transition");
            return Err(err);
        }
        tracing::info!(from = %self.current, to = %target, "phase transition");
        self.current = target;
        Ok(())
    }

    /// Apply a chain of transitions, stopping at the first illegal edge.
    ///
    /// # Errors
    ///
    /// Returns the first `TransitionError`; edges before it stay applied.
    pub fn transition_through(
        &mut self,
        targets: &[ConversationPhase],
    ) -> Result<(), TransitionError> {
        for target in targets {
            self.transition(*target)?;
        }
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
