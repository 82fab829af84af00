use lesson_core::model::FeedbackLedger;

/// Aggregated view of session progress, useful for a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: u32,
    pub answered: u32,
    pub remaining: u32,
    pub is_complete: bool,
    pub correct: u32,
    pub partial: u32,
    pub incorrect: u32,
}

impl SessionProgress {
    #[must_use]
    pub fn from_ledger(ledger: &FeedbackLedger) -> Self {
        Self {
            total: ledger.total_questions(),
            answered: ledger.answered_questions(),
            remaining: ledger
                .total_questions()
                .saturating_sub(ledger.answered_questions()),
            is_complete: ledger.is_complete(),
            correct: ledger.correct(),
            partial: ledger.partial(),
            incorrect: ledger.incorrect(),
        }
    }
}

/// Final outcome handed back when the conversation exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub progress: SessionProgress,
    pub general_feedback: Option<String>,
}
